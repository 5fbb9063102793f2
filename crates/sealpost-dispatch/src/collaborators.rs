//! Traits for the collaborators the pipeline consumes but does not own.
//!
//! Implemented by the embedding application (API client, local database,
//! contact-key resolver). [`crate::memory`] has in-memory versions.

use async_trait::async_trait;

use crate::error::{FetchError, PolicyError, ReconcileError, TransportError};
use crate::model::{AttachmentRef, SendPreference, SendReceipt};
use crate::wire::WireRequest;

/// Decides each recipient's [`SendPreference`].
#[async_trait]
pub trait RecipientPolicyProvider: Send + Sync {
    /// Resolve one preference per address, in the same order.
    async fn resolve(&self, addresses: &[String]) -> Result<Vec<SendPreference>, PolicyError>;
}

#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    /// The attachment's decrypted content.
    async fn fetch(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, FetchError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit the request once. Timeouts are the transport's own business.
    async fn submit(&self, request: &WireRequest) -> Result<SendReceipt, TransportError>;
}

#[async_trait]
pub trait LocalStateReconciler: Send + Sync {
    async fn mark_sent(&self, message_id: &str, receipt: &SendReceipt)
        -> Result<(), ReconcileError>;
}
