//! In-memory collaborators.
//!
//! Used by the tests and the demo CLI. Nothing here talks to a server or
//! touches disk; state is lost when the value is dropped.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::collaborators::{AttachmentFetcher, LocalStateReconciler, RecipientPolicyProvider, Transport};
use crate::error::{FetchError, PolicyError, ReconcileError, TransportError};
use crate::model::{AttachmentRef, SendPreference, SendReceipt};
use crate::wire::WireRequest;

/// Fixed preferences keyed by address. Unknown addresses are an error.
#[derive(Debug, Default)]
pub struct StaticPolicyProvider {
    preferences: HashMap<String, SendPreference>,
}

impl StaticPolicyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, preference: SendPreference) -> Self {
        self.preferences.insert(preference.email.clone(), preference);
        self
    }
}

#[async_trait]
impl RecipientPolicyProvider for StaticPolicyProvider {
    async fn resolve(&self, addresses: &[String]) -> Result<Vec<SendPreference>, PolicyError> {
        addresses
            .iter()
            .map(|address| {
                self.preferences
                    .get(address)
                    .cloned()
                    .ok_or_else(|| PolicyError(format!("no preference for {address}")))
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryAttachmentFetcher {
    contents: HashMap<String, Vec<u8>>,
}

impl MemoryAttachmentFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, attachment_id: impl Into<String>, content: Vec<u8>) -> Self {
        self.contents.insert(attachment_id.into(), content);
        self
    }
}

#[async_trait]
impl AttachmentFetcher for MemoryAttachmentFetcher {
    async fn fetch(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, FetchError> {
        self.contents
            .get(&attachment.id)
            .cloned()
            .ok_or_else(|| FetchError(format!("attachment {} not found", attachment.id)))
    }
}

/// Records every submitted request and accepts it, unless a failure was queued.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    submitted: Mutex<Vec<WireRequest>>,
    failures: Mutex<VecDeque<TransportError>>,
    latency: Option<Duration>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every submission for `latency` before answering.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next submission with `error`. Queued failures are used in order.
    pub fn fail_next(&self, error: TransportError) {
        self.failures.lock().push_back(error);
    }

    pub fn submitted(&self) -> Vec<WireRequest> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn submit(&self, request: &WireRequest) -> Result<SendReceipt, TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        self.submitted.lock().push(request.clone());
        let sent_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        Ok(SendReceipt {
            message_id: request.message_id.clone(),
            sent_at,
        })
    }
}

/// Keeps the receipts of messages marked sent.
#[derive(Debug, Default)]
pub struct MemoryReconciler {
    sent: Mutex<Vec<SendReceipt>>,
    failure: Mutex<Option<String>>,
}

impl MemoryReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `mark_sent` fail with `reason` until cleared.
    pub fn set_failure(&self, reason: Option<String>) {
        *self.failure.lock() = reason;
    }

    pub fn sent(&self) -> Vec<SendReceipt> {
        self.sent.lock().clone()
    }

    pub fn is_sent(&self, message_id: &str) -> bool {
        self.sent.lock().iter().any(|r| r.message_id == message_id)
    }
}

#[async_trait]
impl LocalStateReconciler for MemoryReconciler {
    async fn mark_sent(&self, message_id: &str, receipt: &SendReceipt) -> Result<(), ReconcileError> {
        if let Some(reason) = self.failure.lock().clone() {
            return Err(ReconcileError(reason));
        }
        tracing::debug!(message_id, sent_at = receipt.sent_at, "marked sent");
        self.sent.lock().push(receipt.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Scheme;

    #[tokio::test]
    async fn policy_provider_keeps_order_and_rejects_unknown() {
        let provider = StaticPolicyProvider::new()
            .with(SendPreference::new("a@x.com", Scheme::CleartextInline))
            .with(SendPreference::new("b@x.com", Scheme::CleartextMime));

        let resolved = provider
            .resolve(&["b@x.com".to_string(), "a@x.com".to_string()])
            .await
            .unwrap();
        assert_eq!(resolved[0].scheme, Scheme::CleartextMime);
        assert_eq!(resolved[1].scheme, Scheme::CleartextInline);

        assert!(provider.resolve(&["c@x.com".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn reconciler_failure_is_switchable() {
        let reconciler = MemoryReconciler::new();
        let receipt = SendReceipt {
            message_id: "m".into(),
            sent_at: 1,
        };

        reconciler.set_failure(Some("database locked".into()));
        assert!(reconciler.mark_sent("m", &receipt).await.is_err());
        assert!(!reconciler.is_sent("m"));

        reconciler.set_failure(None);
        reconciler.mark_sent("m", &receipt).await.unwrap();
        assert!(reconciler.is_sent("m"));
    }
}
