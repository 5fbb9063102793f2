//! Sealed messages and data packets.
//!
//! A sealed message is what a draft looks like at rest:
//! `[u32 LE key packet length || key packet || data packet]`.
//!
//! A data packet is a [`SessionKey`]-encrypted payload whose plaintext is
//! `[flag (1)] [Ed25519 signature (64), only if flag == 1] [cleartext]`.
//! Recipients whose server-side delivery reuses the body get this data
//! packet verbatim, so its framing must not change between at-rest and
//! on-the-wire use.

use crate::error::CryptoError;
use crate::keys::{PrivateKey, PublicKey};
use crate::packet::wrap_session_key;
use crate::session_key::{SessionAlgorithm, SessionKey};

const LEN_PREFIX: usize = 4;
const SIGNATURE_LEN: usize = 64;
const FLAG_UNSIGNED: u8 = 0;
const FLAG_SIGNED: u8 = 1;

/// An encrypted message split into its two packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub key_packet: Vec<u8>,
    pub data_packet: Vec<u8>,
}

impl SealedMessage {
    /// Encrypt `cleartext` under a fresh session key wrapped for `owner`.
    pub fn seal(cleartext: &str, owner: &PublicKey) -> Result<Self, CryptoError> {
        let session_key = SessionKey::generate(SessionAlgorithm::default());
        let data_packet = encrypt_data_packet(cleartext.as_bytes(), &session_key, None)?;
        let key_packet = wrap_session_key(&session_key, owner)?;
        Ok(Self {
            key_packet,
            data_packet,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(LEN_PREFIX + self.key_packet.len() + self.data_packet.len());
        let len = u32::try_from(self.key_packet.len()).unwrap_or(u32::MAX);
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&self.key_packet);
        out.extend_from_slice(&self.data_packet);
        out
    }

    /// Split stored bytes back into key packet and data packet.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < LEN_PREFIX {
            return Err(CryptoError::MalformedPacket("sealed message too short".into()));
        }
        let (prefix, rest) = bytes.split_at(LEN_PREFIX);
        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(prefix);
        let key_len = u32::from_le_bytes(len_bytes) as usize;

        if key_len == 0 || key_len >= rest.len() {
            return Err(CryptoError::MalformedPacket(format!(
                "key packet length {key_len} does not fit in {} bytes",
                rest.len()
            )));
        }
        let (key_packet, data_packet) = rest.split_at(key_len);
        Ok(Self {
            key_packet: key_packet.to_vec(),
            data_packet: data_packet.to_vec(),
        })
    }
}

/// Decrypted contents of a data packet.
#[derive(Debug, Clone)]
pub struct OpenedPayload {
    pub cleartext: Vec<u8>,
    pub signature: Option<[u8; SIGNATURE_LEN]>,
}

impl OpenedPayload {
    /// Check the embedded signature against `signer`. Unsigned payloads fail.
    pub fn verify(&self, signer: &PublicKey) -> Result<(), CryptoError> {
        let signature = self
            .signature
            .ok_or_else(|| CryptoError::VerificationError("payload is not signed".into()))?;
        signer.verify(&self.cleartext, &signature)
    }
}

/// Encrypt `cleartext` with `session_key`, embedding a signature when `signer` is given.
pub fn encrypt_data_packet(
    cleartext: &[u8],
    session_key: &SessionKey,
    signer: Option<&PrivateKey>,
) -> Result<Vec<u8>, CryptoError> {
    let mut payload = Vec::with_capacity(1 + SIGNATURE_LEN + cleartext.len());
    match signer {
        Some(key) => {
            payload.push(FLAG_SIGNED);
            payload.extend_from_slice(&key.sign(cleartext));
        }
        None => payload.push(FLAG_UNSIGNED),
    }
    payload.extend_from_slice(cleartext);
    session_key.encrypt(&payload)
}

pub fn open_data_packet(
    data_packet: &[u8],
    session_key: &SessionKey,
) -> Result<OpenedPayload, CryptoError> {
    let payload = session_key.decrypt(data_packet)?;
    let (&flag, rest) = payload
        .split_first()
        .ok_or_else(|| CryptoError::MalformedPacket("empty data packet".into()))?;

    match flag {
        FLAG_UNSIGNED => Ok(OpenedPayload {
            cleartext: rest.to_vec(),
            signature: None,
        }),
        FLAG_SIGNED => {
            if rest.len() < SIGNATURE_LEN {
                return Err(CryptoError::MalformedPacket("truncated signature".into()));
            }
            let (sig, cleartext) = rest.split_at(SIGNATURE_LEN);
            let mut signature = [0u8; SIGNATURE_LEN];
            signature.copy_from_slice(sig);
            Ok(OpenedPayload {
                cleartext: cleartext.to_vec(),
                signature: Some(signature),
            })
        }
        other => Err(CryptoError::MalformedPacket(format!(
            "unknown data packet flag {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::unwrap_session_key;

    #[test]
    fn seal_split_and_open() {
        let owner = PrivateKey::generate();
        let sealed = SealedMessage::seal("Lorem ipsum dolor sit amet", &owner.public_key()).unwrap();

        let split = SealedMessage::from_bytes(&sealed.to_bytes()).unwrap();
        assert_eq!(split, sealed);

        let session_key = unwrap_session_key(&split.key_packet, &owner).unwrap();
        let opened = open_data_packet(&split.data_packet, &session_key).unwrap();
        assert_eq!(opened.cleartext, b"Lorem ipsum dolor sit amet");
        assert!(opened.signature.is_none());
    }

    #[test]
    fn signed_payload_verifies() {
        let signer = PrivateKey::generate();
        let session_key = SessionKey::generate(SessionAlgorithm::Aes256);

        let packet = encrypt_data_packet(b"mime body", &session_key, Some(&signer)).unwrap();
        let opened = open_data_packet(&packet, &session_key).unwrap();

        assert_eq!(opened.cleartext, b"mime body");
        assert!(opened.verify(&signer.public_key()).is_ok());
        assert!(opened.verify(&PrivateKey::generate().public_key()).is_err());
    }

    #[test]
    fn unsigned_payload_does_not_verify() {
        let session_key = SessionKey::generate(SessionAlgorithm::Aes256);
        let packet = encrypt_data_packet(b"plain", &session_key, None).unwrap();
        let opened = open_data_packet(&packet, &session_key).unwrap();
        assert!(opened.verify(&PrivateKey::generate().public_key()).is_err());
    }

    #[test]
    fn garbage_does_not_split() {
        assert!(SealedMessage::from_bytes(&[1, 2]).is_err());
        // Claims a 255-byte key packet but carries 3 bytes.
        assert!(SealedMessage::from_bytes(&[255, 0, 0, 0, 1, 2, 3]).is_err());
        // Key packet with nothing left for the data packet.
        assert!(SealedMessage::from_bytes(&[3, 0, 0, 0, 1, 2, 3]).is_err());
    }
}
