//! Recipient classification.
//!
//! Every recipient lands in exactly one [`Lane`]. The [`LanePlan`] then says
//! which shared artifacts the request needs, so each is produced at most
//! once no matter how many recipients share it.

use sealpost_crypto::PublicKey;

use crate::error::BuilderError;
use crate::model::{Scheme, SendPreference};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Same-provider recipient: session key wrapped under their key.
    Internal,
    /// Password-protected message for an outside recipient.
    Outside,
    /// Inline PGP, encrypted to the recipient key.
    PgpInline,
    /// Inline body the server delivers in the clear.
    ClearInline,
    /// PGP/MIME, signed MIME body encrypted to the recipient key.
    PgpMime,
    /// Signed MIME body the server delivers in the clear.
    ClearMime,
}

impl Lane {
    pub fn classify(preference: &SendPreference) -> Self {
        match preference.scheme {
            Scheme::ProtonInternal => Self::Internal,
            Scheme::EncryptedToOutside => Self::Outside,
            Scheme::PgpInline if preference.encrypt => Self::PgpInline,
            Scheme::PgpInline | Scheme::CleartextInline => Self::ClearInline,
            Scheme::PgpMime if preference.encrypt => Self::PgpMime,
            Scheme::PgpMime | Scheme::CleartextMime => Self::ClearMime,
        }
    }

    pub fn needs_recipient_key(self) -> bool {
        matches!(self, Self::Internal | Self::PgpInline | Self::PgpMime)
    }

    pub fn is_mime(self) -> bool {
        matches!(self, Self::PgpMime | Self::ClearMime)
    }

    pub fn is_cleartext(self) -> bool {
        matches!(self, Self::ClearInline | Self::ClearMime)
    }

    /// Scheme reported to the server. An unencrypted PGP preference is
    /// delivered as the matching cleartext scheme.
    pub fn wire_scheme(self, requested: Scheme) -> Scheme {
        match self {
            Self::ClearInline => Scheme::CleartextInline,
            Self::ClearMime => Scheme::CleartextMime,
            Self::Internal | Self::Outside | Self::PgpInline | Self::PgpMime => requested,
        }
    }

    /// The `Signature` flag of the recipient's package.
    pub fn sign_flag(self, preference: &SendPreference) -> u8 {
        match self {
            Self::Internal | Self::Outside => 0,
            Self::PgpMime => 1,
            Self::PgpInline | Self::ClearInline | Self::ClearMime => u8::from(preference.sign),
        }
    }
}

/// One recipient after classification.
#[derive(Debug, Clone, Copy)]
pub struct Classified<'a> {
    pub preference: &'a SendPreference,
    pub lane: Lane,
    pub plain_text: bool,
}

impl Classified<'_> {
    /// The recipient key, for lanes that wrap to one.
    pub fn recipient_key(&self) -> Result<&PublicKey, BuilderError> {
        self.preference
            .recipient_public_key
            .as_ref()
            .ok_or_else(|| BuilderError::MissingRecipientPublicKey(self.preference.email.clone()))
    }
}

/// All recipients of one request, classified and checked.
#[derive(Debug)]
pub struct LanePlan<'a> {
    pub recipients: Vec<Classified<'a>>,
}

impl<'a> LanePlan<'a> {
    /// Classify every preference and reject anything the builder cannot serve
    /// before any cryptographic work starts.
    pub fn new(preferences: &'a [SendPreference], has_password: bool) -> Result<Self, BuilderError> {
        if preferences.is_empty() {
            return Err(BuilderError::NoRecipients);
        }

        let recipients = preferences
            .iter()
            .map(|preference| {
                let lane = Lane::classify(preference);
                let classified = Classified {
                    preference,
                    lane,
                    plain_text: preference.is_plain_text(),
                };
                if lane.needs_recipient_key() {
                    classified.recipient_key()?;
                }
                if lane == Lane::Outside && !has_password {
                    return Err(BuilderError::MissingPassword(preference.email.clone()));
                }
                Ok(classified)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { recipients })
    }

    fn any(&self, f: impl Fn(&Classified<'a>) -> bool) -> bool {
        self.recipients.iter().any(f)
    }

    pub fn needs_signed_mime(&self) -> bool {
        self.any(|r| r.lane.is_mime())
    }

    pub fn needs_plain_text(&self) -> bool {
        self.any(|r| r.plain_text)
    }

    pub fn has_cleartext(&self) -> bool {
        self.any(|r| r.lane.is_cleartext())
    }

    pub fn has_clear_mime(&self) -> bool {
        self.any(|r| r.lane == Lane::ClearMime)
    }
}
