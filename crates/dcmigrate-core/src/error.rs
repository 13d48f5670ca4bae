//! Error types for dcmigrate.

use thiserror::Error;

use crate::queue::QueueError;
use crate::stage::InvalidMigrationStageError;

/// The shared error type for the migration orchestrator.
///
/// Stage-graph violations, queue failures and persistence problems each get
/// their own variant so callers can decide between retry, surfacing the
/// problem to an operator, or a controlled reset.
#[derive(Error, Debug, Clone)]
pub enum DcmError {
    /// A requested transition is not allowed by the stage graph.
    #[error(transparent)]
    InvalidStage(#[from] InvalidMigrationStageError),

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization {
        format: String, // "TOML", "JSON", etc.
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The durable stage store could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The persisted record no longer matches what the caller acted on.
    #[error("Conflicting update: {0}")]
    Conflict(String),

    /// Managed queue lookup failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// The provisioning backend rejected or failed a request.
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// A migration is already underway.
    #[error("Migration already exists in stage `{stage}`")]
    MigrationExists { stage: String },

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DcmError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a Persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Creates a Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Creates a Provisioning error
    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::Provisioning(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is a rejected stage transition
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidStage(_))
    }

    /// Check if this is a conflicting update
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Check if this is a persistence error
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    /// Check if this is a config error
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true when retrying the same call later may succeed.
    ///
    /// Only transport-level queue failures qualify; everything else needs a
    /// different input or an operator.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Queue(err) => err.is_retryable(),
            _ => false,
        }
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for DcmError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for DcmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for DcmError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for DcmError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// A type alias for `Result<T, DcmError>`.
pub type Result<T> = std::result::Result<T, DcmError>;
