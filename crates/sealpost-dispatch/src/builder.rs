use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine as _;
use rand::RngCore;
use sealpost_crypto::{MessageCrypto, PublicKey, SessionKey, SignedPayload};

use crate::config::DispatchConfig;
use crate::error::BuilderError;
use crate::lane::{Classified, Lane, LanePlan};
use crate::metadata::DispatchMetadata;
use crate::mime::{build_mime_body, random_boundary};
use crate::model::{AuthContext, SendTiming};
use crate::plaintext::html_to_plain_text;
use crate::wire::{ClearAttachmentKey, ClearBodyKey, MessagePackage, OutsidePackage, WireRequest};

/// Turns [`DispatchMetadata`] into a [`WireRequest`].
///
/// Synchronous and CPU-bound; async callers run it on the blocking pool.
#[derive(Clone)]
pub struct PackageBuilder {
    crypto: Arc<dyn MessageCrypto>,
    config: DispatchConfig,
}

/// Artifacts shared by every recipient of a lane, each built at most once.
struct SharedArtifacts {
    mime: Option<SignedPayload>,
    plain_text: Option<SignedPayload>,
}

impl SharedArtifacts {
    /// Key for a recipient's body: the plaintext rendering's key for
    /// plaintext recipients, the stored body's key otherwise.
    fn body_key<'a>(&'a self, recipient: &Classified<'_>, metadata: &'a DispatchMetadata) -> &'a SessionKey {
        match (&self.plain_text, recipient.plain_text) {
            (Some(plain_text), true) => &plain_text.session_key,
            _ => &metadata.body_session_key,
        }
    }

    fn mime(&self) -> Result<&SignedPayload, BuilderError> {
        self.mime
            .as_ref()
            .ok_or_else(|| BuilderError::MimeAssembly("signed MIME body was not built".into()))
    }
}

impl PackageBuilder {
    pub fn new(crypto: Arc<dyn MessageCrypto>, config: DispatchConfig) -> Self {
        Self { crypto, config }
    }

    pub fn build(
        &self,
        metadata: &DispatchMetadata,
        auth: &AuthContext,
        timing: &SendTiming,
    ) -> Result<WireRequest, BuilderError> {
        let plan = LanePlan::new(&metadata.recipient_preferences, metadata.password.is_some())?;
        let artifacts = self.shared_artifacts(metadata, &plan)?;

        let packages = plan
            .recipients
            .iter()
            .map(|recipient| self.package_for(recipient, metadata, &artifacts))
            .collect::<Result<Vec<_>, _>>()?;

        let has_cleartext = plan.has_cleartext();
        let clear_body = has_cleartext.then(|| ClearBodyKey::from(&metadata.body_session_key));
        let clear_mime_body = if plan.has_clear_mime() {
            artifacts.mime.as_ref().map(|mime| ClearBodyKey::from(&mime.session_key))
        } else {
            None
        };
        let clear_plain_text_body = if has_cleartext {
            artifacts
                .plain_text
                .as_ref()
                .map(|plain_text| ClearBodyKey::from(&plain_text.session_key))
        } else {
            None
        };
        let clear_attachments = (has_cleartext && !metadata.attachments.is_empty()).then(|| {
            metadata
                .attachments
                .iter()
                .map(|attachment| ClearAttachmentKey {
                    attachment_id: attachment.reference.id.clone(),
                    key: ClearBodyKey::from(&attachment.session_key),
                })
                .collect()
        });

        tracing::debug!(
            message_id = %metadata.message_id,
            packages = packages.len(),
            signed_mime = artifacts.mime.is_some(),
            plain_text = artifacts.plain_text.is_some(),
            cleartext = has_cleartext,
            "wire request built"
        );

        Ok(WireRequest {
            message_id: metadata.message_id.clone(),
            api_path_prefix: self.config.api_path_prefix.clone(),
            expiration_time: metadata
                .time_to_expire
                .map(|ttl| ttl.as_secs())
                .filter(|&secs| secs > 0),
            delivery_time: timing.delivery_time,
            delay_seconds: timing.delay_seconds,
            body: metadata.encrypted_body.clone(),
            clear_body,
            clear_mime_body,
            mime_data_packet: artifacts.mime.map(|mime| mime.data_packet).unwrap_or_default(),
            clear_plain_text_body,
            plain_text_data_packet: artifacts
                .plain_text
                .map(|plain_text| plain_text.data_packet)
                .unwrap_or_default(),
            packages,
            clear_attachments,
            auth: auth.clone(),
        })
    }

    fn shared_artifacts(
        &self,
        metadata: &DispatchMetadata,
        plan: &LanePlan<'_>,
    ) -> Result<SharedArtifacts, BuilderError> {
        let algorithm = self.config.default_session_algorithm;

        let mime = if plan.needs_signed_mime() {
            let boundary = random_boundary(self.config.mime_boundary_bytes);
            let body = build_mime_body(
                &metadata.decrypted_body,
                &metadata.attachments,
                &metadata.encoded_attachments,
                &boundary,
            )?;
            let signed = self.crypto.sign_and_encrypt(
                &body,
                algorithm,
                &metadata.signing_key,
                &metadata.mailbox_passphrase,
            )?;
            tracing::debug!(message_id = %metadata.message_id, bytes = body.len(), "signed MIME body");
            Some(signed)
        } else {
            None
        };

        let plain_text = if plan.needs_plain_text() {
            let text = html_to_plain_text(&metadata.decrypted_body);
            let signed = self.crypto.sign_and_encrypt(
                text.as_bytes(),
                algorithm,
                &metadata.signing_key,
                &metadata.mailbox_passphrase,
            )?;
            tracing::debug!(message_id = %metadata.message_id, bytes = text.len(), "signed plaintext body");
            Some(signed)
        } else {
            None
        };

        Ok(SharedArtifacts { mime, plain_text })
    }

    fn package_for(
        &self,
        recipient: &Classified<'_>,
        metadata: &DispatchMetadata,
        artifacts: &SharedArtifacts,
    ) -> Result<MessagePackage, BuilderError> {
        let preference = recipient.preference;
        let mut package = MessagePackage {
            email: preference.email.clone(),
            scheme: recipient.lane.wire_scheme(preference.scheme),
            sign_flag: recipient.lane.sign_flag(preference),
            plain_text: recipient.plain_text,
            body_key_packet: None,
            attachment_key_packets: BTreeMap::new(),
            outside: None,
        };

        match recipient.lane {
            Lane::Internal | Lane::PgpInline => {
                let key = recipient.recipient_key()?;
                let session_key = artifacts.body_key(recipient, metadata);
                package.body_key_packet = Some(self.crypto.encrypt_session_key(session_key, key)?);
                package.attachment_key_packets = self.wrap_attachments(metadata, key)?;
            }
            Lane::Outside => {
                let password = metadata
                    .password
                    .as_deref()
                    .ok_or_else(|| BuilderError::MissingPassword(preference.email.clone()))?;
                let session_key = artifacts.body_key(recipient, metadata);
                package.body_key_packet = Some(
                    self.crypto
                        .encrypt_session_key_with_password(session_key, password)?,
                );
                package.attachment_key_packets = metadata
                    .attachments
                    .iter()
                    .map(|attachment| {
                        let packet = self
                            .crypto
                            .encrypt_session_key_with_password(&attachment.session_key, password)?;
                        Ok((attachment.reference.id.clone(), packet))
                    })
                    .collect::<Result<_, BuilderError>>()?;

                let token = random_token(self.config.outside_token_len);
                let enc_token = self.crypto.encrypt_with_password(token.as_bytes(), password)?;
                package.outside = Some(OutsidePackage {
                    token,
                    enc_token,
                    password_hint: metadata.password_hint.clone(),
                });
            }
            Lane::PgpMime => {
                let key = recipient.recipient_key()?;
                package.body_key_packet =
                    Some(self.crypto.encrypt_session_key(&artifacts.mime()?.session_key, key)?);
            }
            Lane::ClearInline | Lane::ClearMime => {}
        }

        tracing::debug!(
            message_id = %metadata.message_id,
            email = %preference.email,
            scheme = ?package.scheme,
            lane = ?recipient.lane,
            sign = package.sign_flag,
            "package built"
        );
        Ok(package)
    }

    fn wrap_attachments(
        &self,
        metadata: &DispatchMetadata,
        key: &PublicKey,
    ) -> Result<BTreeMap<String, Vec<u8>>, BuilderError> {
        metadata
            .attachments
            .iter()
            .map(|attachment| {
                let packet = self.crypto.encrypt_session_key(&attachment.session_key, key)?;
                Ok((attachment.reference.id.clone(), packet))
            })
            .collect()
    }
}

/// Random base64 token of exactly `len` characters.
fn random_token(len: usize) -> String {
    let mut raw = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    let mut token = base64::engine::general_purpose::STANDARD.encode(raw);
    token.truncate(len);
    token
}
