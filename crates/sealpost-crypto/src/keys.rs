use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::password::{open_with_password, seal_with_password};

/// A recipient or address public key (Ed25519 verifying key bytes).
///
/// Stored unvalidated: a key handed to us by a contact or by key discovery
/// may be malformed, and that must surface as an error at the moment the key
/// is used, not when the preference record is constructed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    bytes: Vec<u8>,
}

impl PublicKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Short hex fingerprint for logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.bytes[..8.min(self.bytes.len())])
    }

    /// Parse into an Ed25519 verifying key.
    pub fn to_verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        let bytes: [u8; 32] = self
            .bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("public key is {} bytes", self.bytes.len())))?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("invalid Ed25519 public key: {e}")))
    }

    /// Convert to an X25519 public key with the Edwards→Montgomery map (RFC 7748).
    pub fn to_x25519(&self) -> Result<x25519_dalek::PublicKey, CryptoError> {
        let montgomery = self.to_verifying_key()?.to_montgomery();
        Ok(x25519_dalek::PublicKey::from(montgomery.to_bytes()))
    }

    /// Verify a detached signature made by the matching [`PrivateKey`].
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let signature = Signature::from_slice(signature)
            .map_err(|e| CryptoError::VerificationError(e.to_string()))?;
        self.to_verifying_key()?
            .verify(message, &signature)
            .map_err(|e| CryptoError::VerificationError(e.to_string()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.bytes))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded)
            .map(Self::from_bytes)
            .map_err(serde::de::Error::custom)
    }
}

/// An unlocked address private key.
///
/// Signs with Ed25519 and decrypts key packets with the X25519 secret
/// derived from the same scalar.
#[derive(ZeroizeOnDrop)]
pub struct PrivateKey {
    signing_key: SigningKey,
}

impl PrivateKey {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(self.signing_key.verifying_key().to_bytes().to_vec())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// X25519 static secret from the SHA-512-expanded scalar, so that its
    /// public half equals [`PublicKey::to_x25519`] of our public key.
    pub fn to_x25519_secret(&self) -> x25519_dalek::StaticSecret {
        x25519_dalek::StaticSecret::from(self.signing_key.to_scalar_bytes())
    }

    fn secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public_key", &self.public_key().fingerprint())
            .finish()
    }
}

/// The user's mailbox passphrase. Unlocks address keys.
#[derive(Clone)]
pub struct MailboxPassphrase(Zeroizing<String>);

impl MailboxPassphrase {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(Zeroizing::new(passphrase.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MailboxPassphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MailboxPassphrase(..)")
    }
}

/// A sender address key as stored locally: public half in the clear,
/// secret half sealed under the mailbox passphrase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressKey {
    pub id: String,
    pub public_key: PublicKey,
    #[serde(with = "hex_bytes")]
    pub locked_secret: Vec<u8>,
    pub active: bool,
    pub primary: bool,
}

impl AddressKey {
    /// Lock `private_key` under `passphrase`.
    pub fn lock(
        id: impl Into<String>,
        private_key: &PrivateKey,
        passphrase: &MailboxPassphrase,
    ) -> Result<Self, CryptoError> {
        let locked_secret = seal_with_password(private_key.secret_bytes(), passphrase.expose())?;
        Ok(Self {
            id: id.into(),
            public_key: private_key.public_key(),
            locked_secret,
            active: true,
            primary: false,
        })
    }

    #[must_use]
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Unlock the private key. A wrong passphrase yields [`CryptoError::KeyLocked`].
    pub fn unlock(&self, passphrase: &MailboxPassphrase) -> Result<PrivateKey, CryptoError> {
        let secret = Zeroizing::new(
            open_with_password(&self.locked_secret, passphrase.expose())
                .map_err(|_| CryptoError::KeyLocked(self.id.clone()))?,
        );
        let bytes: [u8; 32] = secret
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("locked secret of {} has wrong length", self.id)))?;
        let private_key = PrivateKey::from_secret_bytes(&bytes);
        if private_key.public_key() != self.public_key {
            return Err(CryptoError::InvalidKey(format!(
                "secret of {} does not match its public key",
                self.id
            )));
        }
        Ok(private_key)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded).map_err(serde::de::Error::custom)
    }
}
