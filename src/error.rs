//! Per-device failure taxonomy.
//!
//! Every variant is raised inside a single bootstrap engine and ends that
//! engine only. Process-level setup (config, image unpacking, preflight)
//! reports through `anyhow` instead.

use std::time::Duration;
use thiserror::Error;

/// Result alias used by the engine and the device adapter.
pub type FlashResult<T> = std::result::Result<T, FlashError>;

#[derive(Debug, Error)]
pub enum FlashError {
    /// Non-zero exit, `ERR`-prefixed output, or a response that did not
    /// carry what the caller needed.
    #[error("command failed: update {command}: {detail}")]
    CommandFailure { command: String, detail: String },

    /// A required file or image role is absent.
    #[error("missing artifact: {0}")]
    MissingArtifact(String),

    /// The board did not come back on the bus in time.
    #[error("{device} did not reconnect within {}s", waited.as_secs())]
    ReconnectTimeout { device: String, waited: Duration },

    #[error("unsupported SoC family '{0}'")]
    UnsupportedSoc(String),

    /// Secure fuses are set but the image carries no signed artifact for `0`.
    #[error(
        "board is in secure mode but the image does not contain a signed '{0}' (signed bootloader required)"
    )]
    SecureImageMissing(String),
}

impl FlashError {
    pub(crate) fn command(command: impl Into<String>, detail: impl Into<String>) -> Self {
        FlashError::CommandFailure {
            command: command.into(),
            detail: detail.into(),
        }
    }

    /// Short machine-friendly tag used in run records.
    pub fn kind(&self) -> &'static str {
        match self {
            FlashError::CommandFailure { .. } => "command_failure",
            FlashError::MissingArtifact(_) => "missing_artifact",
            FlashError::ReconnectTimeout { .. } => "reconnect_timeout",
            FlashError::UnsupportedSoc(_) => "unsupported_soc",
            FlashError::SecureImageMissing(_) => "secure_image_missing",
        }
    }
}
