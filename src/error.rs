// THEORY:
// Errors are split by who has to react to them. `ConfigError` only ever happens before the
// live loop starts and is the one fatal class. `VisionError` covers everything the loop and the
// out-of-band readers can hit at runtime; none of it is allowed to stop the loop. `StoreError`
// is the persistence boundary's own failure type and folds into `VisionError` with `?`.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for pipeline operations.
pub type VisionResult<T> = Result<T, VisionError>;

/// The handling category an error falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed input unit (frame, zone). Reject the unit, log, continue.
    InputError,
    /// Persisted data contradicts an invariant. Log and skip the record.
    InvariantViolation,
    /// Infrastructure failure (store, encoder). Log and retry on the next opportunity.
    Infrastructure,
}

/// Runtime errors raised by the vision pipeline and its consumers.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error(
        "frame shape mismatch: background model is {expected_width}x{expected_height}x{expected_channels}, frame is {width}x{height}x{channels}"
    )]
    FrameShapeMismatch {
        expected_width: u32,
        expected_height: u32,
        expected_channels: u8,
        width: u32,
        height: u32,
        channels: u8,
    },

    #[error("timestamp {timestamp} is not after the previous update at {previous}")]
    NonMonotonicTimestamp {
        previous: chrono::NaiveDateTime,
        timestamp: chrono::NaiveDateTime,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("render error: {0}")]
    Render(#[from] image::ImageError),

    #[error("snapshot I/O failed for {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode snapshot metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl VisionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidFrame(_) | Self::FrameShapeMismatch { .. } => ErrorCategory::InputError,
            Self::NonMonotonicTimestamp { .. } => ErrorCategory::InvariantViolation,
            Self::Store(_) | Self::Render(_) | Self::Snapshot { .. } | Self::Metadata(_) => {
                ErrorCategory::Infrastructure
            }
        }
    }
}

/// Configuration failures. Any of these aborts startup before the first frame.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("invalid zone #{index}: {reason}")]
    InvalidZone { index: usize, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by an `EventSink` / `EventStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store lock poisoned")]
    Poisoned,
}
