//! Error types shared across Reelcut crates.

/// Top-level error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Media metadata for {source_id} not ready after {waited_ms:.0}ms")]
    MetadataTimeout { source_id: String, waited_ms: f64 },

    #[error("Failed to decode {source_id}: {message}")]
    DecodeFailure { source_id: String, message: String },

    #[error("Encoder unsupported: {message}")]
    EncoderUnsupported { message: String },

    #[error("Encode queue error: {message}")]
    EncodeQueueError { message: String },

    #[error("Export session aborted")]
    SessionAborted,

    #[error("Export produced an empty output ({bytes} bytes)")]
    EmptyOutput { bytes: usize },

    #[error("Not ready: {message}")]
    NotReady { message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Timeline error: {message}")]
    Timeline { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn metadata_timeout(source_id: impl Into<String>, waited_ms: f64) -> Self {
        Self::MetadataTimeout {
            source_id: source_id.into(),
            waited_ms,
        }
    }

    pub fn decode(source_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::DecodeFailure {
            source_id: source_id.into(),
            message: msg.into(),
        }
    }

    pub fn encoder_unsupported(msg: impl Into<String>) -> Self {
        Self::EncoderUnsupported {
            message: msg.into(),
        }
    }

    pub fn encode_queue(msg: impl Into<String>) -> Self {
        Self::EncodeQueueError {
            message: msg.into(),
        }
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady {
            message: msg.into(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }

    pub fn timeline(msg: impl Into<String>) -> Self {
        Self::Timeline {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// A deliberate user stop, not a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::SessionAborted)
    }

    /// Errors the engine handles locally before surfacing anything.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DecodeFailure { .. } | Self::NotReady { .. })
    }

    /// Human-readable message for the host's error callback.
    pub fn user_message(&self) -> String {
        match self {
            Self::MetadataTimeout { .. } | Self::NotReady { .. } => {
                "Media is not ready yet. Please wait a moment and try again.".to_string()
            }
            Self::EncoderUnsupported { .. } => {
                "Video export is not supported on this device.".to_string()
            }
            Self::EmptyOutput { .. } => {
                "Export finished but produced no data. Please try again.".to_string()
            }
            Self::SessionAborted => "Export was cancelled.".to_string(),
            other => format!("Export failed: {other}"),
        }
    }
}
