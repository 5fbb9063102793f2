//! Password-derived sealing.
//!
//! Used for two things: locking address private keys under the mailbox
//! passphrase, and wrapping session keys for recipients who only share a
//! message password with the sender (encrypted-to-outside).
//!
//! Layout: `[16-byte salt || 24-byte nonce || ciphertext || 16-byte tag]`.
//! The key is `Argon2id(password, salt)`; the cipher is XChaCha20-Poly1305.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// Seal `plaintext` under a key derived from `password`.
pub fn seal_with_password(plaintext: &[u8], password: &str) -> Result<Vec<u8>, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::InvalidKey("empty password".into()));
    }

    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt)?;
    let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;

    let mut output = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    output.extend_from_slice(&salt);
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Open data produced by [`seal_with_password`].
pub fn open_with_password(data: &[u8], password: &str) -> Result<Vec<u8>, CryptoError> {
    if data.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
        return Err(CryptoError::MalformedPacket(
            "password packet too short".to_string(),
        ));
    }

    let (salt, rest) = data.split_at(SALT_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(password, salt)?;
    let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|e| CryptoError::DecryptionError(e.to_string()))?;

    cipher
        .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| CryptoError::DecryptionError(e.to_string()))
}

/// Derive a 32-byte key from a password using `Argon2id`.
///
/// Production: `m=65536, t=3, p=4`.
/// Debug builds: `m=256, t=1, p=1` so the test suite stays fast.
fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    #[cfg(debug_assertions)]
    let params = Params::new(256, 1, 1, Some(32));
    #[cfg(not(debug_assertions))]
    let params = Params::new(65536, 3, 4, Some(32));
    let params = params.map_err(|e| CryptoError::KeyGeneration(format!("argon2 params: {e}")))?;

    let hasher = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; 32]);
    hasher
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| CryptoError::KeyGeneration(format!("argon2: {e}")))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let sealed = seal_with_password(b"session key bytes", "hunter2").unwrap();
        let opened = open_with_password(&sealed, "hunter2").unwrap();
        assert_eq!(opened, b"session key bytes");
    }

    #[test]
    fn wrong_password_rejected() {
        let sealed = seal_with_password(b"secret", "right").unwrap();
        assert!(open_with_password(&sealed, "wrong").is_err());
    }

    #[test]
    fn salts_differ_between_seals() {
        let a = seal_with_password(b"same", "pw").unwrap();
        let b = seal_with_password(b"same", "pw").unwrap();
        assert_ne!(a[..SALT_LEN], b[..SALT_LEN]);
    }

    #[test]
    fn empty_password_refused() {
        assert!(matches!(
            seal_with_password(b"x", ""),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn truncated_packet_rejected() {
        assert!(matches!(
            open_with_password(&[0u8; 20], "pw"),
            Err(CryptoError::MalformedPacket(_))
        ));
    }
}
