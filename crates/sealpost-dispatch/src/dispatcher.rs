use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::builder::PackageBuilder;
use crate::collaborators::{LocalStateReconciler, Transport};
use crate::error::{BuilderError, DispatchError};
use crate::metadata::MetadataPreparer;
use crate::model::{PendingSend, SendReceipt};

/// Where an attempt is. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    PreparingMetadata,
    BuildingPackages,
    Submitting,
    Sent,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::PreparingMetadata => "preparing_metadata",
            Self::BuildingPackages => "building_packages",
            Self::Submitting => "submitting",
            Self::Sent => "sent",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of one attempt plus every phase it went through, in order.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub phases: Vec<Phase>,
    pub result: Result<SendReceipt, DispatchError>,
}

impl DispatchOutcome {
    pub fn final_phase(&self) -> Phase {
        self.phases.last().copied().unwrap_or(Phase::NotStarted)
    }
}

/// Releases the message id when the attempt ends, however it ends.
struct InFlightGuard<'a> {
    registry: &'a Mutex<HashSet<String>>,
    message_id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(registry: &'a Mutex<HashSet<String>>, message_id: &str) -> Option<Self> {
        registry.lock().insert(message_id.to_owned()).then(|| Self {
            registry,
            message_id: message_id.to_owned(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.message_id);
    }
}

/// Runs prepare → build → submit → reconcile for one message at a time.
pub struct Dispatcher {
    preparer: MetadataPreparer,
    builder: PackageBuilder,
    transport: Arc<dyn Transport>,
    reconciler: Arc<dyn LocalStateReconciler>,
    in_flight: Mutex<HashSet<String>>,
}

impl Dispatcher {
    pub fn new(
        preparer: MetadataPreparer,
        builder: PackageBuilder,
        transport: Arc<dyn Transport>,
        reconciler: Arc<dyn LocalStateReconciler>,
    ) -> Self {
        Self {
            preparer,
            builder,
            transport,
            reconciler,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Run one attempt and return only its result.
    pub async fn send(&self, pending: PendingSend) -> Result<SendReceipt, DispatchError> {
        self.run_attempt(pending).await.result
    }

    /// Run one attempt. A second attempt for a message that is already in
    /// flight is refused before any collaborator is called.
    pub async fn run_attempt(&self, pending: PendingSend) -> DispatchOutcome {
        let mut phases = vec![Phase::NotStarted];
        let message_id = pending.message.id.clone();

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &message_id) else {
            tracing::warn!(message_id = %message_id, "send attempt already in flight");
            return DispatchOutcome {
                phases,
                result: Err(DispatchError::AttemptInFlight(message_id)),
            };
        };

        let result = self.attempt(&pending, &mut phases).await;
        if let Err(error) = &result {
            // A reconcile failure happens after Sent; the message is delivered.
            if !matches!(error, DispatchError::Reconcile(_)) {
                phases.push(Phase::Failed);
            }
            tracing::debug!(message_id = %message_id, error = %error, "send attempt failed");
        }

        DispatchOutcome { phases, result }
    }

    async fn attempt(
        &self,
        pending: &PendingSend,
        phases: &mut Vec<Phase>,
    ) -> Result<SendReceipt, DispatchError> {
        let message_id = pending.message.id.as_str();

        phases.push(Phase::PreparingMetadata);
        let metadata = self.preparer.prepare(pending).await?;

        phases.push(Phase::BuildingPackages);
        let builder = self.builder.clone();
        let auth = pending.auth.clone();
        let timing = pending.timing();
        let request = tokio::task::spawn_blocking(move || builder.build(&metadata, &auth, &timing))
            .await
            .map_err(|e| BuilderError::BlockingTask(e.to_string()))??;

        phases.push(Phase::Submitting);
        tracing::info!(
            message_id,
            packages = request.packages.len(),
            delay_seconds = request.delay_seconds,
            "submitting message"
        );
        let receipt = self.transport.submit(&request).await?;

        phases.push(Phase::Sent);
        tracing::info!(message_id, sent_at = receipt.sent_at, "message sent");

        if let Err(error) = self.reconciler.mark_sent(message_id, &receipt).await {
            tracing::warn!(message_id, error = %error, "sent message not reconciled locally");
            return Err(error.into());
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use sealpost_crypto::{AddressKey, MailboxPassphrase, NativeCrypto, PrivateKey, SealedMessage};

    use crate::config::DispatchConfig;
    use crate::error::{MetadataError, TransportError};
    use crate::memory::{MemoryAttachmentFetcher, MemoryReconciler, MemoryTransport, StaticPolicyProvider};
    use crate::model::{Address, AuthContext, Scheme, SendPreference, SenderContext, StoredMessage};

    struct Harness {
        dispatcher: Dispatcher,
        transport: Arc<MemoryTransport>,
        reconciler: Arc<MemoryReconciler>,
    }

    fn harness(transport: MemoryTransport) -> Harness {
        let crypto = Arc::new(NativeCrypto);
        let policy = StaticPolicyProvider::new()
            .with(SendPreference::new("someone@gmail.com", Scheme::CleartextInline));
        let transport = Arc::new(transport);
        let reconciler = Arc::new(MemoryReconciler::new());
        let dispatcher = Dispatcher::new(
            MetadataPreparer::new(
                crypto.clone(),
                Arc::new(policy),
                Arc::new(MemoryAttachmentFetcher::new()),
                DispatchConfig::default(),
            ),
            PackageBuilder::new(crypto, DispatchConfig::default()),
            transport.clone(),
            reconciler.clone(),
        );
        Harness {
            dispatcher,
            transport,
            reconciler,
        }
    }

    fn pending() -> PendingSend {
        let passphrase = MailboxPassphrase::new("mailbox");
        let owner = PrivateKey::generate();
        let key = AddressKey::lock("key-1", &owner, &passphrase).unwrap().primary();
        let sealed = SealedMessage::seal("<p>hello</p>", &owner.public_key()).unwrap();
        PendingSend {
            message: StoredMessage {
                id: "msg-1".into(),
                sealed_body: sealed.to_bytes(),
                to: vec!["someone@gmail.com".into()],
                ..StoredMessage::default()
            },
            sender: SenderContext {
                addresses: vec![Address {
                    id: "addr-1".into(),
                    email: "me@proton.me".into(),
                    enabled: true,
                    keys: vec![key],
                }],
                mailbox_passphrase: passphrase,
            },
            delivery_time: None,
            undo_delay_seconds: 10,
            auth: AuthContext::default(),
        }
    }

    #[tokio::test]
    async fn successful_attempt_walks_every_phase() {
        let h = harness(MemoryTransport::new());
        let outcome = h.dispatcher.run_attempt(pending()).await;

        assert_eq!(
            outcome.phases,
            vec![
                Phase::NotStarted,
                Phase::PreparingMetadata,
                Phase::BuildingPackages,
                Phase::Submitting,
                Phase::Sent,
            ]
        );
        assert_eq!(outcome.result.unwrap().message_id, "msg-1");
        assert!(h.reconciler.is_sent("msg-1"));
        assert_eq!(h.transport.submitted()[0].delay_seconds, 10);
    }

    #[tokio::test]
    async fn transport_failure_leaves_local_state_alone() {
        let h = harness(MemoryTransport::new());
        h.transport.fail_next(TransportError::Http {
            status: 422,
            code: 2001,
            message: "invalid recipient".into(),
        });

        let outcome = h.dispatcher.run_attempt(pending()).await;
        assert_eq!(outcome.final_phase(), Phase::Failed);
        assert!(matches!(
            outcome.result,
            Err(DispatchError::Transport(TransportError::Http { code: 2001, .. }))
        ));
        assert!(h.reconciler.sent().is_empty());
        assert!(h.transport.submitted().is_empty());
    }

    #[tokio::test]
    async fn metadata_failure_stops_before_building() {
        let h = harness(MemoryTransport::new());
        let mut pending = pending();
        pending.message.id.clear();

        let outcome = h.dispatcher.run_attempt(pending).await;
        assert_eq!(
            outcome.phases,
            vec![Phase::NotStarted, Phase::PreparingMetadata, Phase::Failed]
        );
        assert!(matches!(
            outcome.result,
            Err(DispatchError::Metadata(MetadataError::MessageIdEmpty))
        ));
    }

    #[tokio::test]
    async fn reconcile_failure_still_reports_sent() {
        let h = harness(MemoryTransport::new());
        h.reconciler.set_failure(Some("database locked".into()));

        let outcome = h.dispatcher.run_attempt(pending()).await;
        assert_eq!(outcome.final_phase(), Phase::Sent);
        assert!(matches!(outcome.result, Err(DispatchError::Reconcile(_))));
        assert_eq!(h.transport.submitted().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_attempt_is_refused() {
        let h = harness(MemoryTransport::new().with_latency(Duration::from_millis(100)));

        let (first, second) = tokio::join!(
            h.dispatcher.run_attempt(pending()),
            h.dispatcher.run_attempt(pending())
        );

        assert!(first.result.is_ok());
        assert_eq!(second.phases, vec![Phase::NotStarted]);
        assert!(matches!(
            second.result,
            Err(DispatchError::AttemptInFlight(id)) if id == "msg-1"
        ));
        assert_eq!(h.transport.submitted().len(), 1);

        // The id is released once the first attempt ends.
        assert!(h.dispatcher.send(pending()).await.is_ok());
    }

    #[test]
    fn phase_names() {
        assert_eq!(Phase::BuildingPackages.to_string(), "building_packages");
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::Submitting.is_terminal());
    }
}
