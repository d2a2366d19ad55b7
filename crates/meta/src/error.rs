//! Metadata-store error types and result alias.
//!
//! Every [`LedgerManager`](crate::LedgerManager) implementation maps its
//! internal failures onto [`MetaError`]. The client layer relies on this
//! classification to tell a lost compare-and-swap race apart from a missing
//! ledger or a broken connection.
//!
//! # Error Types
//!
//! - [`MetaError::NotFound`] - No metadata is stored for the ledger id
//! - [`MetaError::AlreadyExists`] - Create raced with an existing record
//! - [`MetaError::VersionMismatch`] - Compare-and-swap lost against a newer version
//! - [`MetaError::InvalidMetadata`] - A metadata transition violates an invariant
//! - [`MetaError::Serialization`] - Stored bytes could not be encoded/decoded
//! - [`MetaError::Connection`] - The store could not be reached
//! - [`MetaError::Internal`] - Store-specific failure
//! - [`MetaError::Timeout`] - The store did not answer in time
//!
//! # Example
//!
//! ```
//! use ledgerkit_meta::{LedgerId, MetaError, MetaResult};
//!
//! fn lookup(id: LedgerId) -> MetaResult<()> {
//!     Err(MetaError::not_found(id))
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

use crate::types::{LedgerId, Version};

/// A shared boxed error type for source chain tracking.
///
/// `Arc` keeps [`MetaError`] cheaply cloneable so a single failure can be
/// reported to several waiters.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for metadata-store operations.
pub type MetaResult<T> = Result<T, MetaError>;

/// Errors that can occur while reading or mutating ledger metadata.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match
/// expressions must include a wildcard arm.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum MetaError {
    /// No metadata exists for the ledger.
    #[error("no metadata for ledger {ledger_id}")]
    NotFound {
        /// The ledger that was looked up.
        ledger_id: LedgerId,
    },

    /// Metadata already exists for the ledger id being created.
    #[error("metadata already exists for ledger {ledger_id}")]
    AlreadyExists {
        /// The ledger id that collided.
        ledger_id: LedgerId,
    },

    /// A compare-and-swap presented a stale version.
    ///
    /// This is never transient: the caller read metadata that has since
    /// changed and must decide how to reconcile.
    #[error("version mismatch for ledger {ledger_id}: expected {expected}, found {actual}")]
    VersionMismatch {
        /// The ledger whose metadata changed.
        ledger_id: LedgerId,
        /// The version the caller presented.
        expected: Version,
        /// The version currently stored.
        actual: Version,
    },

    /// A requested metadata transition would break a metadata invariant.
    #[error("invalid metadata: {message}")]
    InvalidMetadata {
        /// Which invariant was violated.
        message: String,
    },

    /// Stored bytes could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
        /// The underlying codec error.
        #[source]
        source: Option<BoxError>,
    },

    /// The metadata store could not be reached.
    #[error("connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
        /// The underlying transport error.
        #[source]
        source: Option<BoxError>,
    },

    /// Store-specific failure that fits no other category.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The store did not answer within the allotted time.
    #[error("metadata operation timed out")]
    Timeout,
}

impl MetaError {
    /// Creates a `NotFound` error for the given ledger.
    #[must_use]
    pub fn not_found(ledger_id: LedgerId) -> Self {
        Self::NotFound { ledger_id }
    }

    /// Creates an `AlreadyExists` error for the given ledger.
    #[must_use]
    pub fn already_exists(ledger_id: LedgerId) -> Self {
        Self::AlreadyExists { ledger_id }
    }

    /// Creates a `VersionMismatch` error.
    #[must_use]
    pub fn version_mismatch(ledger_id: LedgerId, expected: Version, actual: Version) -> Self {
        Self::VersionMismatch { ledger_id, expected, actual }
    }

    /// Creates an `InvalidMetadata` error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidMetadata { message: message.into() }
    }

    /// Creates a `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates an `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Returns `true` when retrying the same request may succeed.
    ///
    /// Only connection failures and timeouts qualify. Version mismatches are
    /// deliberately excluded: retrying a stale compare-and-swap would mask a
    /// concurrent writer.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: i64) -> LedgerId {
        LedgerId::try_from(raw).unwrap_or(LedgerId::MIN)
    }

    #[test]
    fn test_transient_classification() {
        assert!(MetaError::connection("refused").is_transient());
        assert!(MetaError::timeout().is_transient());
        assert!(!MetaError::not_found(id(1)).is_transient());
        assert!(!MetaError::already_exists(id(1)).is_transient());
        assert!(
            !MetaError::version_mismatch(id(1), Version::new(1), Version::new(2)).is_transient()
        );
        assert!(!MetaError::internal("boom").is_transient());
    }

    #[test]
    fn test_display_includes_ledger_and_versions() {
        let err = MetaError::version_mismatch(id(7), Version::new(3), Version::new(4));
        assert_eq!(err.to_string(), "version mismatch for ledger 7: expected 3, found 4");

        let err = MetaError::not_found(id(42));
        assert_eq!(err.to_string(), "no metadata for ledger 42");
    }

    #[test]
    fn test_serialization_preserves_source() {
        let source = std::io::Error::other("truncated");
        let err = MetaError::serialization_with_source("decode failed", source);
        let chained = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(chained.as_deref(), Some("truncated"));
    }
}
