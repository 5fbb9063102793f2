use crate::error::CryptoError;
use crate::keys::{AddressKey, MailboxPassphrase, PublicKey};
use crate::packet::{unwrap_session_key, wrap_session_key, wrap_session_key_with_password};
use crate::password::seal_with_password;
use crate::sealed::{encrypt_data_packet, open_data_packet};
use crate::session_key::{SessionAlgorithm, SessionKey};

/// A freshly signed and encrypted payload (signed MIME or signed plaintext).
#[derive(Debug, Clone)]
pub struct SignedPayload {
    pub session_key: SessionKey,
    pub data_packet: Vec<u8>,
}

/// The cryptographic operations the dispatch pipeline needs.
///
/// Every call is synchronous and CPU-bound; async callers run them on the
/// blocking pool. The dispatch crate depends only on this trait, so its
/// scheme logic can be tested against deterministic fakes.
pub trait MessageCrypto: Send + Sync {
    /// Unlock `address_key` and recover the session key from `key_packet`.
    fn decrypt_session_key(
        &self,
        key_packet: &[u8],
        address_key: &AddressKey,
        passphrase: &MailboxPassphrase,
    ) -> Result<SessionKey, CryptoError>;

    /// Decrypt a data packet into UTF-8 text.
    fn decrypt_body(&self, data_packet: &[u8], session_key: &SessionKey)
        -> Result<String, CryptoError>;

    /// Wrap a session key for a recipient public key.
    fn encrypt_session_key(
        &self,
        session_key: &SessionKey,
        recipient: &PublicKey,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Wrap a session key with a message password.
    fn encrypt_session_key_with_password(
        &self,
        session_key: &SessionKey,
        password: &str,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Encrypt arbitrary bytes with a password (outside-recipient tokens).
    fn encrypt_with_password(&self, data: &[u8], password: &str) -> Result<Vec<u8>, CryptoError>;

    /// Sign `payload` with the unlocked `signer` and encrypt it under a fresh session key.
    fn sign_and_encrypt(
        &self,
        payload: &[u8],
        algorithm: SessionAlgorithm,
        signer: &AddressKey,
        passphrase: &MailboxPassphrase,
    ) -> Result<SignedPayload, CryptoError>;
}

/// [`MessageCrypto`] backed by this crate's Ed25519/X25519/AES-GCM primitives.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCrypto;

impl MessageCrypto for NativeCrypto {
    fn decrypt_session_key(
        &self,
        key_packet: &[u8],
        address_key: &AddressKey,
        passphrase: &MailboxPassphrase,
    ) -> Result<SessionKey, CryptoError> {
        let private_key = address_key.unlock(passphrase)?;
        unwrap_session_key(key_packet, &private_key)
    }

    fn decrypt_body(
        &self,
        data_packet: &[u8],
        session_key: &SessionKey,
    ) -> Result<String, CryptoError> {
        let opened = open_data_packet(data_packet, session_key)?;
        String::from_utf8(opened.cleartext)
            .map_err(|e| CryptoError::DecryptionError(format!("body is not utf-8: {e}")))
    }

    fn encrypt_session_key(
        &self,
        session_key: &SessionKey,
        recipient: &PublicKey,
    ) -> Result<Vec<u8>, CryptoError> {
        tracing::trace!(recipient = %recipient.fingerprint(), "wrapping session key");
        wrap_session_key(session_key, recipient)
    }

    fn encrypt_session_key_with_password(
        &self,
        session_key: &SessionKey,
        password: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        wrap_session_key_with_password(session_key, password)
    }

    fn encrypt_with_password(&self, data: &[u8], password: &str) -> Result<Vec<u8>, CryptoError> {
        seal_with_password(data, password)
    }

    fn sign_and_encrypt(
        &self,
        payload: &[u8],
        algorithm: SessionAlgorithm,
        signer: &AddressKey,
        passphrase: &MailboxPassphrase,
    ) -> Result<SignedPayload, CryptoError> {
        let private_key = signer.unlock(passphrase)?;
        let session_key = SessionKey::generate(algorithm);
        let data_packet = encrypt_data_packet(payload, &session_key, Some(&private_key))?;
        Ok(SignedPayload {
            session_key,
            data_packet,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::PrivateKey;
    use crate::packet::unwrap_session_key_with_password;
    use crate::password::open_with_password;
    use crate::sealed::SealedMessage;

    fn address_key(passphrase: &MailboxPassphrase) -> (PrivateKey, AddressKey) {
        let private_key = PrivateKey::generate();
        let locked = AddressKey::lock("addr-key", &private_key, passphrase).unwrap();
        (private_key, locked)
    }

    #[test]
    fn decrypts_stored_draft() {
        let passphrase = MailboxPassphrase::new("mailbox");
        let (private_key, key) = address_key(&passphrase);
        let sealed = SealedMessage::seal("<p>draft</p>", &private_key.public_key()).unwrap();

        let crypto = NativeCrypto;
        let session_key = crypto
            .decrypt_session_key(&sealed.key_packet, &key, &passphrase)
            .unwrap();
        let body = crypto.decrypt_body(&sealed.data_packet, &session_key).unwrap();
        assert_eq!(body, "<p>draft</p>");
    }

    #[test]
    fn wrong_passphrase_is_key_locked() {
        let passphrase = MailboxPassphrase::new("mailbox");
        let (private_key, key) = address_key(&passphrase);
        let sealed = SealedMessage::seal("x", &private_key.public_key()).unwrap();

        let result =
            NativeCrypto.decrypt_session_key(&sealed.key_packet, &key, &MailboxPassphrase::new("nope"));
        assert!(matches!(result, Err(CryptoError::KeyLocked(_))));
    }

    #[test]
    fn signed_payload_carries_sender_signature() {
        let passphrase = MailboxPassphrase::new("mailbox");
        let (private_key, key) = address_key(&passphrase);

        let signed = NativeCrypto
            .sign_and_encrypt(b"multipart body", SessionAlgorithm::Aes256, &key, &passphrase)
            .unwrap();
        let opened = open_data_packet(&signed.data_packet, &signed.session_key).unwrap();
        assert_eq!(opened.cleartext, b"multipart body");
        assert!(opened.verify(&private_key.public_key()).is_ok());
    }

    #[test]
    fn password_wraps_open_with_the_password() {
        let session_key = SessionKey::generate(SessionAlgorithm::Aes256);
        let packet = NativeCrypto
            .encrypt_session_key_with_password(&session_key, "shared secret")
            .unwrap();
        assert_eq!(
            unwrap_session_key_with_password(&packet, "shared secret").unwrap(),
            session_key
        );

        let token = NativeCrypto.encrypt_with_password(b"token", "shared secret").unwrap();
        assert_eq!(open_with_password(&token, "shared secret").unwrap(), b"token");
    }
}
