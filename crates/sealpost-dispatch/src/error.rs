use sealpost_crypto::CryptoError;
use thiserror::Error;

/// Failures while turning a stored message into [`crate::DispatchMetadata`].
///
/// All of these are deterministic for a given input; re-running the same
/// attempt will fail the same way.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("message id is empty")]
    MessageIdEmpty,

    #[error("no sender address found")]
    NoSenderAddressFound,

    #[error("sender address {0} has no usable key")]
    NoSenderAddressKeyFound(String),

    #[error("stored message could not be split: {0}")]
    SplitMessageFail(CryptoError),

    /// No active address key opens the body's key packet.
    #[error("body session key could not be recovered: {0}")]
    BodySessionKeyFail(CryptoError),

    #[error("message body could not be decrypted: {0}")]
    DecryptBodyFail(CryptoError),

    #[error("message has no recipients")]
    NoRecipients,

    #[error("recipient preferences unavailable: {0}")]
    RecipientPreferences(#[from] PolicyError),

    #[error("session key of attachment {attachment_id} could not be recovered: {source}")]
    AttachmentKeyFail {
        attachment_id: String,
        source: CryptoError,
    },

    #[error("attachment {attachment_id} could not be fetched: {source}")]
    AttachmentFetchFail {
        attachment_id: String,
        source: FetchError,
    },

    #[error("blocking task failed: {0}")]
    BlockingTask(String),
}

/// Failures while building the wire request.
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("session key could not be created: {0}")]
    SessionKeyFailedToCreate(CryptoError),

    #[error("recipient {0} has no public key")]
    MissingRecipientPublicKey(String),

    #[error("recipient {0} needs a message password but none is set")]
    MissingPassword(String),

    #[error("message has no recipients")]
    NoRecipients,

    #[error("MIME assembly failed: {0}")]
    MimeAssembly(String),

    /// Any other crypto failure, unchanged.
    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    #[error("blocking task failed: {0}")]
    BlockingTask(String),
}

impl From<CryptoError> for BuilderError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::KeyGeneration(_) => Self::SessionKeyFailedToCreate(e),
            other => Self::Crypto(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("server rejected message (HTTP {status}, code {code}): {message}")]
    Http {
        status: u16,
        code: u32,
        message: String,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TransportError {
    /// Whether a fresh attempt (new metadata, new packages) might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Network(_) => true,
            Self::Serialization(_) => false,
        }
    }
}

#[derive(Debug, Error)]
#[error("recipient policy provider failed: {0}")]
pub struct PolicyError(pub String);

#[derive(Debug, Error)]
#[error("attachment fetch failed: {0}")]
pub struct FetchError(pub String);

#[derive(Debug, Error)]
#[error("local state reconcile failed: {0}")]
pub struct ReconcileError(pub String);

/// What a dispatch attempt reports. Each variant carries the stage error unchanged.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Builder(#[from] BuilderError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server accepted the message but local state was not updated.
    #[error("message sent but {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("a send attempt for message {0} is already in flight")]
    AttemptInFlight(String),
}
