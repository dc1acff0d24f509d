//! Error types for Northbound operations.

use thiserror::Error;

/// Result type alias for Northbound operations.
pub type NbResult<T> = Result<T, NbError>;

/// Whether a failed Northbound call was a read or a mutation.
///
/// A failed read can be retried blindly; a failed mutation cannot, as its
/// effect on the database is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NbOpKind {
    /// Idempotent read (lookups, listings).
    Read,
    /// Mutation (creates, deletes, rule replacements).
    Write,
}

/// Errors surfaced by an [`NbClient`](crate::NbClient) implementation.
#[derive(Debug, Clone, Error)]
pub enum NbError {
    /// A record with the same identity already exists.
    #[error("Object already exists: {name}")]
    Exists {
        /// Name of the conflicting object.
        name: String,
    },

    /// The requested record does not exist.
    #[error("Object not found: {name}")]
    NotFound {
        /// Name of the missing object.
        name: String,
    },

    /// One match was expected but multiple records were found.
    #[error("Too many objects found: {name}")]
    TooMany {
        /// Name that matched more than once.
        name: String,
    },

    /// The record exists but was not created by this manager.
    #[error("Object not managed by us: {name}")]
    NotManaged {
        /// Name of the foreign object.
        name: String,
    },

    /// The Northbound API call itself failed (transport, transaction).
    #[error("Northbound API failure during {operation}: {message}")]
    Api {
        /// The operation that failed.
        operation: String,
        /// Whether the operation was a read or a mutation.
        kind: NbOpKind,
        /// Error detail from the transport.
        message: String,
    },
}

impl NbError {
    /// Creates a not-found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates an already-exists error.
    pub fn exists(name: impl Into<String>) -> Self {
        Self::Exists { name: name.into() }
    }

    /// Creates an API failure error for a read operation.
    pub fn api_read(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            operation: operation.into(),
            kind: NbOpKind::Read,
            message: message.into(),
        }
    }

    /// Creates an API failure error for a mutation.
    pub fn api_write(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            operation: operation.into(),
            kind: NbOpKind::Write,
            message: message.into(),
        }
    }

    /// Returns true if retrying the same call may succeed.
    ///
    /// Only failures of idempotent reads qualify. A failed mutation is fatal
    /// for the caller: the transaction's effect is unknown, so blindly
    /// resubmitting it is never safe. Semantic errors are not retryable
    /// either.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NbError::Api {
                kind: NbOpKind::Read,
                ..
            }
        )
    }
}
