pub mod capability;
pub mod error;
pub mod keys;
pub mod packet;
pub mod password;
pub mod sealed;
pub mod session_key;

pub use capability::{MessageCrypto, NativeCrypto, SignedPayload};
pub use error::CryptoError;
pub use keys::{AddressKey, MailboxPassphrase, PrivateKey, PublicKey};
pub use sealed::SealedMessage;
pub use session_key::{SessionAlgorithm, SessionKey};
