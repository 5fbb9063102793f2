//! JSON send fixtures.
//!
//! A fixture describes a draft and its recipients. Keys are generated fresh
//! for every run: the sender's address key seals the draft at rest, and each
//! recipient whose scheme needs a public key gets a throwaway one.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use base64::Engine as _;
use rand::RngCore;
use sealpost_crypto::packet::wrap_session_key;
use sealpost_crypto::{
    AddressKey, MailboxPassphrase, PrivateKey, SealedMessage, SessionAlgorithm, SessionKey,
};
use sealpost_dispatch::memory::{MemoryAttachmentFetcher, StaticPolicyProvider};
use sealpost_dispatch::{
    Address, AttachmentRef, AuthContext, MimeType, PendingSend, Scheme, SendPreference,
    SenderContext, StoredMessage,
};
use serde::Deserialize;

const SENDER_ADDRESS_ID: &str = "addr-1";

#[derive(Debug, Deserialize)]
pub struct Fixture {
    #[serde(default = "default_message_id")]
    pub message_id: String,
    #[serde(default = "default_sender")]
    pub sender: String,
    pub body: String,
    pub recipients: Vec<RecipientFixture>,
    #[serde(default)]
    pub attachments: Vec<AttachmentFixture>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_hint: Option<String>,
    #[serde(default)]
    pub expires_in_secs: Option<u64>,
    #[serde(default)]
    pub undo_delay_seconds: u32,
}

#[derive(Debug, Deserialize)]
pub struct RecipientFixture {
    pub email: String,
    pub scheme: Scheme,
    #[serde(default)]
    pub sign: bool,
    /// Defaults to what the scheme implies.
    #[serde(default)]
    pub encrypt: Option<bool>,
    #[serde(default)]
    pub mime_type: MimeType,
}

#[derive(Debug, Deserialize)]
pub struct AttachmentFixture {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    #[serde(default)]
    pub content_id: Option<String>,
    /// Base64 content.
    pub content: String,
}

/// A fixture turned into a pending send plus the collaborators that serve it.
pub struct PreparedRun {
    pub pending: PendingSend,
    pub policy: StaticPolicyProvider,
    pub fetcher: MemoryAttachmentFetcher,
}

fn default_message_id() -> String {
    "draft-1".to_string()
}

fn default_sender() -> String {
    "me@sealpost.local".to_string()
}

impl Fixture {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture {}", path.display()))?;
        let fixture: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse fixture {}", path.display()))?;
        if fixture.recipients.is_empty() {
            bail!("fixture {} has no recipients", path.display());
        }
        Ok(fixture)
    }

    pub fn into_run(self) -> anyhow::Result<PreparedRun> {
        let passphrase = MailboxPassphrase::new(hex_secret());
        let owner = PrivateKey::generate();
        let address_key = AddressKey::lock("key-1", &owner, &passphrase)?.primary();
        let sealed = SealedMessage::seal(&self.body, &owner.public_key())?;

        let mut policy = StaticPolicyProvider::new();
        let mut to = Vec::with_capacity(self.recipients.len());
        for recipient in &self.recipients {
            let mut preference = SendPreference::new(&recipient.email, recipient.scheme)
                .with_sign(recipient.sign)
                .with_mime_type(recipient.mime_type);
            if let Some(encrypt) = recipient.encrypt {
                preference = preference.with_encrypt(encrypt);
            }
            if matches!(
                recipient.scheme,
                Scheme::ProtonInternal | Scheme::PgpInline | Scheme::PgpMime
            ) {
                preference = preference.with_public_key(PrivateKey::generate().public_key());
            }
            policy = policy.with(preference);
            to.push(recipient.email.clone());
        }

        let mut fetcher = MemoryAttachmentFetcher::new();
        let mut attachments = Vec::with_capacity(self.attachments.len());
        for attachment in self.attachments {
            let content = base64::engine::general_purpose::STANDARD
                .decode(&attachment.content)
                .with_context(|| format!("attachment {} is not valid base64", attachment.id))?;
            let session_key = SessionKey::generate(SessionAlgorithm::default());
            let key_packet = wrap_session_key(&session_key, &owner.public_key())?;

            fetcher = fetcher.with(attachment.id.clone(), content);
            attachments.push(AttachmentRef {
                id: attachment.id,
                file_name: attachment.file_name,
                mime_type: attachment.mime_type,
                content_id: attachment.content_id,
                key_packet,
            });
        }

        let pending = PendingSend {
            message: StoredMessage {
                id: self.message_id,
                sender_address_id: Some(SENDER_ADDRESS_ID.to_string()),
                sealed_body: sealed.to_bytes(),
                to,
                attachments,
                expiration_offset: self.expires_in_secs.map(Duration::from_secs),
                password: self.password,
                password_hint: self.password_hint,
                ..StoredMessage::default()
            },
            sender: SenderContext {
                addresses: vec![Address {
                    id: SENDER_ADDRESS_ID.to_string(),
                    email: self.sender,
                    enabled: true,
                    keys: vec![address_key],
                }],
                mailbox_passphrase: passphrase,
            },
            delivery_time: None,
            undo_delay_seconds: self.undo_delay_seconds,
            auth: AuthContext {
                uid: "sealpost-cli".to_string(),
                access_token: String::new(),
            },
        };

        Ok(PreparedRun {
            pending,
            policy,
            fetcher,
        })
    }
}

/// Per-run mailbox passphrase; never leaves the process.
fn hex_secret() -> String {
    let mut raw = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    hex::encode(raw)
}
