//! Error types for the ACL engine.
//!
//! One taxonomy covers the whole engine; user-visible messages always name
//! the offending subject or ACL.

use thiserror::Error;

use crate::catalog::CatalogError;
use ovn_nb::NbError;

/// Result type alias for engine operations.
pub type AclResult<T> = Result<T, AclError>;

/// Errors produced by the compiler, reconciler, reaper and baseline emitter.
#[derive(Debug, Clone, Error)]
pub enum AclError {
    /// An expected entity is absent.
    #[error("Not found: {what}")]
    NotFound {
        /// Description of the missing entity.
        what: String,
    },

    /// Uniqueness violation during create.
    #[error("Already exists: {what}")]
    Conflict {
        /// Description of the conflicting entity.
        what: String,
    },

    /// A rule names an unknown ACL, address set, or peer.
    #[error("Unknown reference {subject:?} in rule subject")]
    ReferenceNotFound {
        /// The offending subject token.
        subject: String,
    },

    /// Malformed range, bad protocol/port combination, or unknown action.
    #[error("Invalid rule: {reason}")]
    InvalidRule {
        /// What is wrong with the rule.
        reason: String,
    },

    /// A rule depends on a peer not present on the bound network.
    #[error("ACL requiring peer \"{network}/{peer}\" cannot be applied to network {applied_to:?}")]
    PeerMissing {
        /// Network that owns the peer according to the rule.
        network: String,
        /// Peer name.
        peer: String,
        /// Network the ACL was being applied to.
        applied_to: String,
    },

    /// An OVN Northbound call failed.
    #[error("OVN Northbound error: {source}")]
    Ovn {
        /// The underlying client error.
        #[from]
        source: NbError,
    },

    /// A catalog query failed.
    #[error("Catalog error: {source}")]
    Catalog {
        /// The underlying catalog error.
        #[from]
        source: CatalogError,
    },

    /// The operation was aborted by its cancellation token.
    #[error("Operation cancelled")]
    Cancelled,
}

impl AclError {
    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates a reference-not-found error naming the offending token.
    pub fn reference_not_found(subject: impl Into<String>) -> Self {
        Self::ReferenceNotFound {
            subject: subject.into(),
        }
    }

    /// Creates an invalid-rule error.
    pub fn invalid_rule(reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the operation may succeed.
    ///
    /// Only failed OVN reads qualify; failed OVN mutations, semantic errors
    /// and cancellation do not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AclError::Ovn { source } if source.is_retryable())
    }
}
