//! The outbound request and its JSON body.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use sealpost_crypto::{SessionAlgorithm, SessionKey};
use serde_json::{json, Map, Value};

use crate::model::{AuthContext, MimeType, Scheme};

/// Extra fields for a password-protected outside recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutsidePackage {
    pub token: String,
    pub enc_token: Vec<u8>,
    pub password_hint: Option<String>,
}

/// One recipient's entry in the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePackage {
    pub email: String,
    pub scheme: Scheme,
    pub sign_flag: u8,
    pub plain_text: bool,
    /// Session key wrapped for this recipient alone.
    pub body_key_packet: Option<Vec<u8>>,
    pub attachment_key_packets: BTreeMap<String, Vec<u8>>,
    pub outside: Option<OutsidePackage>,
}

/// A session key handed to the server so it can deliver in the clear.
#[derive(Clone, PartialEq, Eq)]
pub struct ClearBodyKey {
    pub key: Vec<u8>,
    pub algorithm: SessionAlgorithm,
}

impl From<&SessionKey> for ClearBodyKey {
    fn from(session_key: &SessionKey) -> Self {
        Self {
            key: session_key.as_bytes().to_vec(),
            algorithm: session_key.algorithm(),
        }
    }
}

impl ClearBodyKey {
    fn to_json(&self) -> Value {
        json!({ "Key": b64(&self.key), "Algorithm": self.algorithm.as_str() })
    }
}

impl fmt::Debug for ClearBodyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClearBodyKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearAttachmentKey {
    pub attachment_id: String,
    pub key: ClearBodyKey,
}

/// Everything the server needs to deliver one message.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub message_id: String,
    pub api_path_prefix: String,
    pub expiration_time: Option<u64>,
    pub delivery_time: Option<SystemTime>,
    pub delay_seconds: u32,
    pub body: Vec<u8>,
    pub clear_body: Option<ClearBodyKey>,
    pub clear_mime_body: Option<ClearBodyKey>,
    pub mime_data_packet: Vec<u8>,
    pub clear_plain_text_body: Option<ClearBodyKey>,
    pub plain_text_data_packet: Vec<u8>,
    pub packages: Vec<MessagePackage>,
    pub clear_attachments: Option<Vec<ClearAttachmentKey>>,
    /// Used by the transport for headers; never part of the body.
    pub auth: AuthContext,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Group {
    PlainText,
    Html,
    Mime,
}

impl Group {
    fn of(package: &MessagePackage) -> Self {
        if package.scheme.is_mime() {
            Self::Mime
        } else if package.plain_text {
            Self::PlainText
        } else {
            Self::Html
        }
    }

    fn mime_type(self) -> MimeType {
        match self {
            Self::PlainText => MimeType::PlainText,
            Self::Html => MimeType::Html,
            Self::Mime => MimeType::Mime,
        }
    }
}

impl WireRequest {
    /// `POST` target for this message.
    pub fn path(&self) -> String {
        format!("{}/{}", self.api_path_prefix, self.message_id)
    }

    /// The JSON request body.
    pub fn to_api_body(&self) -> Value {
        let packages: Vec<Value> = [Group::PlainText, Group::Html, Group::Mime]
            .into_iter()
            .filter_map(|group| self.group_json(group))
            .collect();

        let mut body = Map::new();
        if let Some(expires_in) = self.expiration_time.filter(|&secs| secs > 0) {
            body.insert("ExpiresIn".into(), json!(expires_in));
        }
        body.insert("DelaySeconds".into(), json!(self.delay_seconds));
        if let Some(delivery) = self.delivery_time {
            let secs = delivery
                .duration_since(UNIX_EPOCH)
                .map_or(0, |elapsed| elapsed.as_secs());
            body.insert("DeliveryTime".into(), json!(secs));
        }
        body.insert("Packages".into(), Value::Array(packages));
        Value::Object(body)
    }

    fn group_json(&self, group: Group) -> Option<Value> {
        let members: Vec<&MessagePackage> = self
            .packages
            .iter()
            .filter(|package| Group::of(package) == group)
            .collect();
        if members.is_empty() {
            return None;
        }

        let mut addresses = Map::new();
        let mut type_mask = 0u32;
        let mut has_cleartext = false;
        for package in &members {
            type_mask |= package.scheme.wire_id();
            has_cleartext |= package.scheme.is_cleartext();
            addresses.insert(package.email.clone(), address_json(package));
        }

        let data_packet = match group {
            Group::PlainText => &self.plain_text_data_packet,
            Group::Html => &self.body,
            Group::Mime => &self.mime_data_packet,
        };

        let mut out = Map::new();
        out.insert("Addresses".into(), Value::Object(addresses));
        out.insert("Type".into(), json!(type_mask));
        out.insert("Body".into(), json!(b64(data_packet)));
        out.insert("MIMEType".into(), json!(group.mime_type().as_str()));

        if has_cleartext {
            let body_key = match group {
                Group::PlainText => self.clear_plain_text_body.as_ref(),
                Group::Html => self.clear_body.as_ref(),
                Group::Mime => self.clear_mime_body.as_ref(),
            };
            if let Some(key) = body_key {
                out.insert("BodyKey".into(), key.to_json());
            }
            if group != Group::Mime {
                if let Some(attachments) = &self.clear_attachments {
                    let keys: Map<String, Value> = attachments
                        .iter()
                        .map(|a| (a.attachment_id.clone(), a.key.to_json()))
                        .collect();
                    out.insert("AttachmentKeys".into(), Value::Object(keys));
                }
            }
        }
        Some(Value::Object(out))
    }
}

fn address_json(package: &MessagePackage) -> Value {
    let mut address = Map::new();
    address.insert("Type".into(), json!(package.scheme.wire_id()));
    address.insert("Signature".into(), json!(package.sign_flag));
    if let Some(packet) = &package.body_key_packet {
        address.insert("BodyKeyPacket".into(), json!(b64(packet)));
    }
    if !package.attachment_key_packets.is_empty() {
        let packets: Map<String, Value> = package
            .attachment_key_packets
            .iter()
            .map(|(id, packet)| (id.clone(), json!(b64(packet))))
            .collect();
        address.insert("AttachmentKeyPackets".into(), Value::Object(packets));
    }
    if let Some(outside) = &package.outside {
        address.insert("Token".into(), json!(outside.token));
        address.insert("EncToken".into(), json!(b64(&outside.enc_token)));
        if let Some(hint) = &outside.password_hint {
            address.insert("PasswordHint".into(), json!(hint));
        }
    }
    Value::Object(address)
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
