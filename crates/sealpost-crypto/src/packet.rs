//! Key packets: a session key wrapped for one recipient public key.
//!
//! Layout: `[32-byte ephemeral X25519 public || 24-byte nonce || ciphertext || 16-byte tag]`.
//! The wrapping key is HKDF-SHA256 over the ephemeral/recipient DH secret with
//! info = `ephemeral || recipient || "sealpost-key-packet-v1"`.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::{PrivateKey, PublicKey};
use crate::password::{open_with_password, seal_with_password};
use crate::session_key::SessionKey;

const EPHEMERAL_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
const INFO_LABEL: &[u8] = b"sealpost-key-packet-v1";

/// Wrap `session_key` so only the holder of `recipient`'s private key can recover it.
pub fn wrap_session_key(
    session_key: &SessionKey,
    recipient: &PublicKey,
) -> Result<Vec<u8>, CryptoError> {
    let recipient_x = recipient.to_x25519()?;

    let ephemeral = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let ephemeral_public = X25519Public::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient_x);
    let wrapping_key = derive_wrapping_key(shared.as_bytes(), &ephemeral_public, &recipient_x);

    let cipher = XChaCha20Poly1305::new_from_slice(&wrapping_key[..])
        .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let plaintext = Zeroizing::new(session_key.to_packet_bytes());
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce_bytes), plaintext.as_slice())
        .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;

    let mut packet = Vec::with_capacity(EPHEMERAL_LEN + NONCE_LEN + ciphertext.len());
    packet.extend_from_slice(ephemeral_public.as_bytes());
    packet.extend_from_slice(&nonce_bytes);
    packet.extend_from_slice(&ciphertext);
    Ok(packet)
}

/// Recover the session key from a packet produced by [`wrap_session_key`].
pub fn unwrap_session_key(packet: &[u8], recipient: &PrivateKey) -> Result<SessionKey, CryptoError> {
    if packet.len() < EPHEMERAL_LEN + NONCE_LEN + TAG_LEN {
        return Err(CryptoError::MalformedPacket("key packet too short".into()));
    }

    let (ephemeral_bytes, rest) = packet.split_at(EPHEMERAL_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let mut ephemeral = [0u8; EPHEMERAL_LEN];
    ephemeral.copy_from_slice(ephemeral_bytes);
    let ephemeral_public = X25519Public::from(ephemeral);

    let secret = recipient.to_x25519_secret();
    let recipient_public = X25519Public::from(&secret);
    let shared = secret.diffie_hellman(&ephemeral_public);
    let wrapping_key = derive_wrapping_key(shared.as_bytes(), &ephemeral_public, &recipient_public);

    let cipher = XChaCha20Poly1305::new_from_slice(&wrapping_key[..])
        .map_err(|e| CryptoError::DecryptionError(e.to_string()))?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| CryptoError::DecryptionError(e.to_string()))?,
    );

    SessionKey::from_packet_bytes(&plaintext)
}

/// Wrap `session_key` under a message password instead of a public key.
pub fn wrap_session_key_with_password(
    session_key: &SessionKey,
    password: &str,
) -> Result<Vec<u8>, CryptoError> {
    let plaintext = Zeroizing::new(session_key.to_packet_bytes());
    seal_with_password(&plaintext, password)
}

pub fn unwrap_session_key_with_password(
    packet: &[u8],
    password: &str,
) -> Result<SessionKey, CryptoError> {
    let plaintext = Zeroizing::new(open_with_password(packet, password)?);
    SessionKey::from_packet_bytes(&plaintext)
}

fn derive_wrapping_key(
    shared: &[u8; 32],
    ephemeral_public: &X25519Public,
    recipient_public: &X25519Public,
) -> Zeroizing<[u8; 32]> {
    let mut info = Vec::with_capacity(2 * EPHEMERAL_LEN + INFO_LABEL.len());
    info.extend_from_slice(ephemeral_public.as_bytes());
    info.extend_from_slice(recipient_public.as_bytes());
    info.extend_from_slice(INFO_LABEL);

    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(&info, &mut key[..])
        .expect("32-byte output is valid for HKDF-SHA256");
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_key::SessionAlgorithm;

    #[test]
    fn wrap_unwrap_round_trip() {
        let recipient = PrivateKey::generate();
        let session_key = SessionKey::generate(SessionAlgorithm::Aes256);

        let packet = wrap_session_key(&session_key, &recipient.public_key()).unwrap();
        let recovered = unwrap_session_key(&packet, &recipient).unwrap();
        assert_eq!(recovered, session_key);
    }

    #[test]
    fn packets_for_same_key_differ() {
        let recipient = PrivateKey::generate();
        let session_key = SessionKey::generate(SessionAlgorithm::Aes256);

        let a = wrap_session_key(&session_key, &recipient.public_key()).unwrap();
        let b = wrap_session_key(&session_key, &recipient.public_key()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn other_recipient_cannot_unwrap() {
        let alice = PrivateKey::generate();
        let mallory = PrivateKey::generate();
        let session_key = SessionKey::generate(SessionAlgorithm::Aes256);

        let packet = wrap_session_key(&session_key, &alice.public_key()).unwrap();
        assert!(unwrap_session_key(&packet, &mallory).is_err());
    }

    #[test]
    fn malformed_recipient_key_fails_wrap() {
        let session_key = SessionKey::generate(SessionAlgorithm::Aes256);
        let bad = PublicKey::from_bytes(vec![0u8; 5]);
        assert!(matches!(
            wrap_session_key(&session_key, &bad),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn password_wrap_round_trip() {
        let session_key = SessionKey::generate(SessionAlgorithm::Aes256);
        let packet = wrap_session_key_with_password(&session_key, "correct horse").unwrap();

        assert_eq!(
            unwrap_session_key_with_password(&packet, "correct horse").unwrap(),
            session_key
        );
        assert!(unwrap_session_key_with_password(&packet, "battery staple").is_err());
    }

    #[test]
    fn short_packet_rejected() {
        let recipient = PrivateKey::generate();
        assert!(matches!(
            unwrap_session_key(&[0u8; 40], &recipient),
            Err(CryptoError::MalformedPacket(_))
        ));
    }
}
