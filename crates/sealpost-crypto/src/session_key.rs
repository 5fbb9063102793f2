use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Symmetric algorithm a session key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionAlgorithm {
    #[default]
    #[serde(rename = "aes256")]
    Aes256,
}

impl SessionAlgorithm {
    /// Name used on the wire (`"aes256"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aes256 => "aes256",
        }
    }

    pub(crate) fn id(self) -> u8 {
        match self {
            Self::Aes256 => 9,
        }
    }

    pub(crate) fn from_id(id: u8) -> Result<Self, CryptoError> {
        match id {
            9 => Ok(Self::Aes256),
            other => Err(CryptoError::MalformedPacket(format!(
                "unknown session algorithm id {other}"
            ))),
        }
    }
}

impl fmt::Display for SessionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content-encryption key of one message body, MIME body or attachment.
///
/// One session key encrypts the data packet once; recipients get it
/// individually wrapped (see [`crate::packet`]) or, for cleartext delivery,
/// handed to the server as-is.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SessionKey {
    key: [u8; KEY_LEN],
    #[zeroize(skip)]
    algorithm: SessionAlgorithm,
}

impl SessionKey {
    /// Generate a fresh random session key.
    pub fn generate(algorithm: SessionAlgorithm) -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self { key, algorithm }
    }

    pub fn from_bytes(bytes: &[u8], algorithm: SessionAlgorithm) -> Result<Self, CryptoError> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("session key must be {KEY_LEN} bytes, got {}", bytes.len()))
        })?;
        Ok(Self { key, algorithm })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn algorithm(&self) -> SessionAlgorithm {
        self.algorithm
    }

    /// Serialize as `algorithm id (1) || key (32)`; the plaintext of a key packet.
    pub(crate) fn to_packet_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + KEY_LEN);
        buf.push(self.algorithm.id());
        buf.extend_from_slice(&self.key);
        buf
    }

    pub(crate) fn from_packet_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let (&id, key) = bytes
            .split_first()
            .ok_or_else(|| CryptoError::MalformedPacket("empty session key packet".into()))?;
        Self::from_bytes(key, SessionAlgorithm::from_id(id)?)
    }

    /// Encrypt a data packet: `[12-byte nonce || ciphertext || tag]`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;

        let mut output = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    /// Decrypt a data packet produced by [`SessionKey::encrypt`].
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_LEN {
            return Err(CryptoError::DecryptionError("data too short".into()));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CryptoError::DecryptionError(e.to_string()))?;

        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CryptoError::DecryptionError(e.to_string()))
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && self.key == other.key
    }
}

impl Eq for SessionKey {}
