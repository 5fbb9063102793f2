use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use futures::future::try_join_all;
use sealpost_crypto::{
    AddressKey, CryptoError, MailboxPassphrase, MessageCrypto, SealedMessage, SessionKey,
};

use crate::collaborators::{AttachmentFetcher, RecipientPolicyProvider};
use crate::config::DispatchConfig;
use crate::error::{FetchError, MetadataError, PolicyError};
use crate::model::{Address, AttachmentRef, PendingSend, SendPreference};

/// An attachment together with its recovered session key.
#[derive(Debug, Clone)]
pub struct PreparedAttachment {
    pub reference: AttachmentRef,
    pub session_key: SessionKey,
}

/// Send-ready snapshot of one message. Built once per attempt, never mutated.
#[derive(Debug, Clone)]
pub struct DispatchMetadata {
    pub message_id: String,
    pub time_to_expire: Option<Duration>,
    pub decrypted_body: String,
    /// Data packet of the stored message, reused verbatim on the wire.
    pub encrypted_body: Vec<u8>,
    pub body_session_key: SessionKey,
    pub attachments: Vec<PreparedAttachment>,
    /// Base64 attachment content keyed by attachment id.
    pub encoded_attachments: BTreeMap<String, String>,
    pub recipient_preferences: Vec<SendPreference>,
    pub password: Option<String>,
    pub password_hint: Option<String>,
    pub signing_key: AddressKey,
    pub mailbox_passphrase: MailboxPassphrase,
}

/// Decrypts the stored message, resolves recipients and loads attachments.
pub struct MetadataPreparer {
    crypto: Arc<dyn MessageCrypto>,
    policy: Arc<dyn RecipientPolicyProvider>,
    fetcher: Arc<dyn AttachmentFetcher>,
    config: DispatchConfig,
}

impl MetadataPreparer {
    pub fn new(
        crypto: Arc<dyn MessageCrypto>,
        policy: Arc<dyn RecipientPolicyProvider>,
        fetcher: Arc<dyn AttachmentFetcher>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            crypto,
            policy,
            fetcher,
            config,
        }
    }

    pub async fn prepare(&self, pending: &PendingSend) -> Result<DispatchMetadata, MetadataError> {
        let message = &pending.message;
        if message.id.is_empty() {
            return Err(MetadataError::MessageIdEmpty);
        }

        let address = resolve_sender_address(
            &pending.sender.addresses,
            message.sender_address_id.as_deref(),
        )
        .ok_or(MetadataError::NoSenderAddressFound)?;
        let signing_key = address
            .signing_key()
            .cloned()
            .ok_or_else(|| MetadataError::NoSenderAddressKeyFound(address.id.clone()))?;
        tracing::debug!(
            message_id = %message.id,
            address = %address.email,
            key = %signing_key.public_key.fingerprint(),
            "resolved sender"
        );

        let sealed = SealedMessage::from_bytes(&message.sealed_body)
            .map_err(MetadataError::SplitMessageFail)?;

        let active_keys: Vec<AddressKey> = address.active_keys().cloned().collect();
        let passphrase = pending.sender.mailbox_passphrase.clone();

        let (body_session_key, decrypted_body) = {
            let crypto = Arc::clone(&self.crypto);
            let keys = active_keys.clone();
            let passphrase = passphrase.clone();
            let key_packet = sealed.key_packet.clone();
            let data_packet = sealed.data_packet.clone();
            tokio::task::spawn_blocking(move || {
                let session_key =
                    recover_session_key(crypto.as_ref(), &keys, &key_packet, &passphrase)
                        .map_err(MetadataError::BodySessionKeyFail)?;
                let body = crypto
                    .decrypt_body(&data_packet, &session_key)
                    .map_err(MetadataError::DecryptBodyFail)?;
                Ok::<_, MetadataError>((session_key, body))
            })
            .await
            .map_err(|e| MetadataError::BlockingTask(e.to_string()))??
        };

        let recipient_preferences = self
            .resolve_recipients(&message.id, message.all_recipients())
            .await?;

        let attachments = {
            let crypto = Arc::clone(&self.crypto);
            let references = message.attachments.clone();
            tokio::task::spawn_blocking(move || {
                references
                    .into_iter()
                    .map(|reference| {
                        match recover_session_key(
                            crypto.as_ref(),
                            &active_keys,
                            &reference.key_packet,
                            &passphrase,
                        ) {
                            Ok(session_key) => Ok(PreparedAttachment {
                                reference,
                                session_key,
                            }),
                            Err(source) => Err(MetadataError::AttachmentKeyFail {
                                attachment_id: reference.id,
                                source,
                            }),
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .await
            .map_err(|e| MetadataError::BlockingTask(e.to_string()))??
        };

        let encoded_attachments = self.fetch_attachments(&message.attachments).await?;

        tracing::debug!(
            message_id = %message.id,
            recipients = recipient_preferences.len(),
            attachments = attachments.len(),
            "metadata prepared"
        );

        Ok(DispatchMetadata {
            message_id: message.id.clone(),
            time_to_expire: message.expiration_offset,
            decrypted_body,
            encrypted_body: sealed.data_packet,
            body_session_key,
            attachments,
            encoded_attachments,
            recipient_preferences,
            password: message.password.clone(),
            password_hint: message.password_hint.clone(),
            signing_key,
            mailbox_passphrase: pending.sender.mailbox_passphrase.clone(),
        })
    }

    async fn resolve_recipients(
        &self,
        message_id: &str,
        recipients: Vec<String>,
    ) -> Result<Vec<SendPreference>, MetadataError> {
        if recipients.is_empty() {
            return Err(MetadataError::NoRecipients);
        }

        let preferences = self.policy.resolve(&recipients).await?;
        if preferences.len() != recipients.len() {
            return Err(PolicyError(format!(
                "expected {} preferences, got {}",
                recipients.len(),
                preferences.len()
            ))
            .into());
        }

        for preference in &preferences {
            if let Some(error) = &preference.resolution_error {
                tracing::warn!(
                    message_id,
                    email = %preference.email,
                    scheme = ?preference.scheme,
                    error = %error,
                    "recipient preference resolved with error"
                );
            }
        }
        Ok(preferences)
    }

    async fn fetch_attachments(
        &self,
        attachments: &[AttachmentRef],
    ) -> Result<BTreeMap<String, String>, MetadataError> {
        let max_bytes = self.config.max_attachment_bytes;
        let fetches = attachments.iter().map(|attachment| async move {
            let content = self
                .fetcher
                .fetch(attachment)
                .await
                .and_then(|content| {
                    if content.len() > max_bytes {
                        Err(FetchError(format!(
                            "{} bytes exceeds the {max_bytes} byte limit",
                            content.len()
                        )))
                    } else {
                        Ok(content)
                    }
                })
                .map_err(|source| MetadataError::AttachmentFetchFail {
                    attachment_id: attachment.id.clone(),
                    source,
                })?;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&content);
            Ok::<_, MetadataError>((attachment.id.clone(), encoded))
        });

        Ok(try_join_all(fetches).await?.into_iter().collect())
    }
}

fn resolve_sender_address<'a>(
    addresses: &'a [Address],
    wanted: Option<&str>,
) -> Option<&'a Address> {
    wanted
        .and_then(|id| addresses.iter().find(|address| address.id == id))
        .or_else(|| addresses.iter().find(|address| address.enabled))
}

/// Try every key in order; the first one that opens the packet wins.
fn recover_session_key(
    crypto: &dyn MessageCrypto,
    keys: &[AddressKey],
    key_packet: &[u8],
    passphrase: &MailboxPassphrase,
) -> Result<SessionKey, CryptoError> {
    let mut last_error = CryptoError::InvalidKey("no active address key".into());
    for key in keys {
        match crypto.decrypt_session_key(key_packet, key, passphrase) {
            Ok(session_key) => return Ok(session_key),
            Err(e) => {
                tracing::debug!(key = %key.id, error = %e, "address key did not open packet");
                last_error = e;
            }
        }
    }
    Err(last_error)
}
