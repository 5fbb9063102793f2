//! Dispatch configuration.
//!
//! Defaults match what the mail API expects; the CLI can override them from
//! a JSON file.

use sealpost_crypto::SessionAlgorithm;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Random bytes in a MIME boundary (hex-encoded, so twice as many characters).
pub const DEFAULT_MIME_BOUNDARY_BYTES: usize = 20;

/// Length of the random token given to password-protected outside recipients.
pub const DEFAULT_OUTSIDE_TOKEN_LEN: usize = 32;

/// Largest attachment accepted for sending.
pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 25 * 1024 * 1024;

pub const DEFAULT_API_PATH_PREFIX: &str = "/mail/v4/messages";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("mime_boundary_bytes must be between 8 and 32, got {0}")]
    MimeBoundary(usize),

    #[error("outside_token_len must be at least 16, got {0}")]
    OutsideToken(usize),

    #[error("max_attachment_bytes must be non-zero")]
    MaxAttachment,

    #[error("api_path_prefix must start with '/' and not end with one: {0:?}")]
    ApiPathPrefix(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Algorithm for session keys the pipeline creates (signed MIME, plaintext).
    pub default_session_algorithm: SessionAlgorithm,
    pub mime_boundary_bytes: usize,
    pub outside_token_len: usize,
    pub max_attachment_bytes: usize,
    pub api_path_prefix: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_session_algorithm: SessionAlgorithm::default(),
            mime_boundary_bytes: DEFAULT_MIME_BOUNDARY_BYTES,
            outside_token_len: DEFAULT_OUTSIDE_TOKEN_LEN,
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            api_path_prefix: DEFAULT_API_PATH_PREFIX.to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn with_mime_boundary_bytes(mut self, bytes: usize) -> Self {
        self.mime_boundary_bytes = bytes;
        self
    }

    pub fn with_outside_token_len(mut self, len: usize) -> Self {
        self.outside_token_len = len;
        self
    }

    pub fn with_max_attachment_bytes(mut self, bytes: usize) -> Self {
        self.max_attachment_bytes = bytes;
        self
    }

    pub fn with_api_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_path_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8..=32).contains(&self.mime_boundary_bytes) {
            return Err(ConfigError::MimeBoundary(self.mime_boundary_bytes));
        }
        if self.outside_token_len < 16 {
            return Err(ConfigError::OutsideToken(self.outside_token_len));
        }
        if self.max_attachment_bytes == 0 {
            return Err(ConfigError::MaxAttachment);
        }
        if !self.api_path_prefix.starts_with('/') || self.api_path_prefix.ends_with('/') {
            return Err(ConfigError::ApiPathPrefix(self.api_path_prefix.clone()));
        }
        Ok(())
    }
}
