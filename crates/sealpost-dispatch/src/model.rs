use std::fmt;
use std::time::{Duration, SystemTime};

use sealpost_crypto::{AddressKey, MailboxPassphrase, PublicKey};
use serde::{Deserialize, Serialize};

/// Per-recipient encryption/signing/MIME policy.
///
/// Wire ids are bit flags so a package group can carry the union of its
/// members' schemes in a single `Type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    ProtonInternal,
    EncryptedToOutside,
    CleartextInline,
    PgpInline,
    PgpMime,
    CleartextMime,
}

impl Scheme {
    pub const fn wire_id(self) -> u32 {
        match self {
            Self::ProtonInternal => 1,
            Self::EncryptedToOutside => 2,
            Self::CleartextInline => 4,
            Self::PgpInline => 8,
            Self::PgpMime => 16,
            Self::CleartextMime => 32,
        }
    }

    pub const fn is_mime(self) -> bool {
        matches!(self, Self::PgpMime | Self::CleartextMime)
    }

    pub const fn is_cleartext(self) -> bool {
        matches!(self, Self::CleartextInline | Self::CleartextMime)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ProtonInternal => "proton",
            Self::EncryptedToOutside => "encrypted-to-outside",
            Self::CleartextInline => "cleartext-inline",
            Self::PgpInline => "pgp-inline",
            Self::PgpMime => "pgp-mime",
            Self::CleartextMime => "cleartext-mime",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MimeType {
    Mime,
    #[default]
    Html,
    PlainText,
}

impl MimeType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mime => "multipart/mixed",
            Self::Html => "text/html",
            Self::PlainText => "text/plain",
        }
    }
}

/// One recipient's cryptographic contract, as decided by the policy provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPreference {
    pub email: String,
    pub encrypt: bool,
    pub sign: bool,
    pub scheme: Scheme,
    pub mime_type: MimeType,
    pub recipient_public_key: Option<PublicKey>,
    pub is_public_key_pinned: bool,
    pub has_api_keys: bool,
    pub has_pinned_keys: bool,
    pub resolution_error: Option<String>,
}

impl SendPreference {
    /// A preference with the usual flags for `scheme`: encrypting schemes
    /// encrypt, cleartext schemes do not, nothing is signed, body is HTML.
    pub fn new(email: impl Into<String>, scheme: Scheme) -> Self {
        Self {
            email: email.into(),
            encrypt: !scheme.is_cleartext(),
            sign: false,
            scheme,
            mime_type: MimeType::Html,
            recipient_public_key: None,
            is_public_key_pinned: false,
            has_api_keys: matches!(scheme, Scheme::ProtonInternal),
            has_pinned_keys: false,
            resolution_error: None,
        }
    }

    pub fn with_public_key(mut self, key: PublicKey) -> Self {
        self.recipient_public_key = Some(key);
        self
    }

    pub fn with_encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    pub fn with_sign(mut self, sign: bool) -> Self {
        self.sign = sign;
        self
    }

    pub fn with_mime_type(mut self, mime_type: MimeType) -> Self {
        self.mime_type = mime_type;
        self
    }

    pub fn with_resolution_error(mut self, error: impl Into<String>) -> Self {
        self.resolution_error = Some(error.into());
        self
    }

    /// Whether this recipient gets the plaintext rendering of the body.
    pub fn is_plain_text(&self) -> bool {
        self.mime_type == MimeType::PlainText && !self.scheme.is_mime()
    }
}

/// An attachment as referenced by a stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub content_id: Option<String>,
    /// Attachment session key wrapped to the sender address key.
    pub key_packet: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Address {
    pub id: String,
    pub email: String,
    pub enabled: bool,
    pub keys: Vec<AddressKey>,
}

impl Address {
    pub fn active_keys(&self) -> impl Iterator<Item = &AddressKey> {
        self.keys.iter().filter(|key| key.active)
    }

    /// The primary active key, otherwise the first active one.
    pub fn signing_key(&self) -> Option<&AddressKey> {
        self.active_keys()
            .find(|key| key.primary)
            .or_else(|| self.active_keys().next())
    }
}

/// A message as it sits in local storage, body still sealed.
#[derive(Debug, Clone, Default)]
pub struct StoredMessage {
    pub id: String,
    pub sender_address_id: Option<String>,
    pub sealed_body: Vec<u8>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub attachments: Vec<AttachmentRef>,
    pub expiration_offset: Option<Duration>,
    pub password: Option<String>,
    pub password_hint: Option<String>,
}

impl StoredMessage {
    /// to, cc and bcc in that order.
    pub fn all_recipients(&self) -> Vec<String> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SenderContext {
    pub addresses: Vec<Address>,
    pub mailbox_passphrase: MailboxPassphrase,
}

/// Session credentials the transport turns into request headers.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub uid: String,
    pub access_token: String,
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("uid", &self.uid)
            .finish_non_exhaustive()
    }
}

/// Scheduled-send and undo-send timing for one attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendTiming {
    pub delivery_time: Option<SystemTime>,
    pub delay_seconds: u32,
}

/// Everything one dispatch attempt starts from.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub message: StoredMessage,
    pub sender: SenderContext,
    pub delivery_time: Option<SystemTime>,
    pub undo_delay_seconds: u32,
    pub auth: AuthContext,
}

impl PendingSend {
    pub fn timing(&self) -> SendTiming {
        SendTiming {
            delivery_time: self.delivery_time,
            delay_seconds: self.undo_delay_seconds,
        }
    }
}

/// What the server hands back for an accepted message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub sent_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealpost_crypto::PrivateKey;

    #[test]
    fn scheme_ids_are_distinct_bits() {
        let all = [
            Scheme::ProtonInternal,
            Scheme::EncryptedToOutside,
            Scheme::CleartextInline,
            Scheme::PgpInline,
            Scheme::PgpMime,
            Scheme::CleartextMime,
        ];
        let mask = all.iter().fold(0, |acc, s| acc | s.wire_id());
        assert_eq!(mask, 63);
        for scheme in all {
            assert_eq!(scheme.is_mime(), scheme.wire_id() > 10);
        }
    }

    #[test]
    fn plain_text_never_applies_to_mime_schemes() {
        let pref = SendPreference::new("a@example.com", Scheme::CleartextMime)
            .with_mime_type(MimeType::PlainText);
        assert!(!pref.is_plain_text());

        let pref = SendPreference::new("a@example.com", Scheme::CleartextInline)
            .with_mime_type(MimeType::PlainText);
        assert!(pref.is_plain_text());
    }

    #[test]
    fn signing_key_prefers_primary_active() {
        let passphrase = MailboxPassphrase::new("pw");
        let lock = |id: &str| AddressKey::lock(id, &PrivateKey::generate(), &passphrase).unwrap();

        let address = Address {
            id: "addr".into(),
            email: "me@example.com".into(),
            enabled: true,
            keys: vec![lock("old").inactive(), lock("second"), lock("main").primary()],
        };
        assert_eq!(address.signing_key().unwrap().id, "main");

        let address = Address {
            keys: vec![lock("old").inactive(), lock("second")],
            ..address
        };
        assert_eq!(address.signing_key().unwrap().id, "second");

        let address = Address {
            keys: vec![lock("old").inactive()],
            ..address
        };
        assert!(address.signing_key().is_none());
    }

    #[test]
    fn recipients_keep_to_cc_bcc_order() {
        let message = StoredMessage {
            to: vec!["a@x".into()],
            cc: vec!["b@x".into()],
            bcc: vec!["c@x".into()],
            ..StoredMessage::default()
        };
        assert_eq!(message.all_recipients(), ["a@x", "b@x", "c@x"]);
    }

    #[test]
    fn auth_debug_hides_token() {
        let auth = AuthContext {
            uid: "uid-1".into(),
            access_token: "secret-token".into(),
        };
        assert!(!format!("{auth:?}").contains("secret-token"));
    }
}
