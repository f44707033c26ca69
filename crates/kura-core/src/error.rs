//! Error types for the classification index.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using kura's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for classification index operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local class not found
    #[error("Local class not found: {0}")]
    ClassNotFound(Uuid),

    /// Classification not found
    #[error("Classification not found: {0}")]
    ClassificationNotFound(Uuid),

    /// Attaching `node` under `parent` would close a loop in the tree.
    #[error("Cycle detected: {parent} is {node} or one of its descendants")]
    CycleDetected { node: Uuid, parent: Uuid },

    /// Deletion blocked by objects assigned directly to the class.
    #[error("Local class {id} has {count} directly assigned objects")]
    HasObjects { id: Uuid, count: i64 },

    /// Deletion blocked by child classes.
    #[error("Local class {id} has {count} child classes")]
    HasChildren { id: Uuid, count: i64 },

    /// Concurrent mutation touched the same subtree
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) | Error::ClassNotFound(_) | Error::ClassificationNotFound(_) => {
                "NOT_FOUND"
            }
            Error::CycleDetected { .. } => "CYCLE_DETECTED",
            Error::HasObjects { .. } => "HAS_OBJECTS",
            Error::HasChildren { .. } => "HAS_CHILDREN",
            Error::Conflict(_) => "CONFLICT",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::Database(_) | Error::Serialization(_) | Error::Internal(_) => "INTERNAL",
        }
    }

    /// True for errors raised by a rejected hierarchy mutation.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::CycleDetected { .. }
                | Error::HasObjects { .. }
                | Error::HasChildren { .. }
                | Error::Conflict(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
