//! Client error types and result alias.
//!
//! Every public operation of the client returns [`ClientResult<T>`]. Failures
//! from the metadata store, the storage nodes and the ensemble provider are
//! classified into [`ClientError`] at the boundary where they occur and keep
//! the original failure as their `source`.
//!
//! # Classification
//!
//! | Variant | Meaning | Retried by the client |
//! |---------|---------|-----------------------|
//! | [`InvalidArgument`](ClientError::InvalidArgument) | Caller input violates an invariant | never |
//! | [`NullInput`](ClientError::NullInput) | A required argument is absent | never |
//! | [`ClientClosed`](ClientError::ClientClosed) | Client was shut down | never |
//! | [`LedgerClosed`](ClientError::LedgerClosed) | Ledger finalized, fenced or deleted | never |
//! | [`NoSuchLedger`](ClientError::NoSuchLedger) | No metadata for the ledger | never |
//! | [`NoSuchEntry`](ClientError::NoSuchEntry) | Entry absent on enough replicas | never |
//! | [`VersionConflict`](ClientError::VersionConflict) | Metadata changed concurrently | never |
//! | [`DigestMismatch`](ClientError::DigestMismatch) | Integrity check failed | never |
//! | [`NotEnoughReplicas`](ClientError::NotEnoughReplicas) | Quorum could not be reached | never |
//! | [`IllegalOperation`](ClientError::IllegalOperation) | Operation not allowed on this handle | never |
//! | [`Unexpected`](ClientError::Unexpected) | Collaborator failure or timeout | metadata reads only |
//! | [`Config`](ClientError::Config) | Invalid client configuration | never |

use std::sync::Arc;

use ledgerkit_meta::{EntryId, InvalidLedgerId, LedgerId, MetaError, QuorumError};
use thiserror::Error;

use crate::{bookie::BookieError, ensemble::EnsembleError};

/// A shared boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the ledger client.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match
/// expressions must include a wildcard arm.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// Caller-supplied parameters violate a stated invariant.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Which invariant was violated.
        message: String,
    },

    /// A required argument was not supplied.
    #[error("required argument `{argument}` is missing")]
    NullInput {
        /// Name of the missing argument.
        argument: &'static str,
    },

    /// The client has been shut down.
    #[error("client is closed")]
    ClientClosed,

    /// The ledger no longer accepts appends.
    #[error("ledger {ledger_id} is closed")]
    LedgerClosed {
        /// The closed ledger.
        ledger_id: LedgerId,
    },

    /// No metadata exists for the ledger.
    #[error("no such ledger: {ledger_id}")]
    NoSuchLedger {
        /// The missing ledger.
        ledger_id: LedgerId,
    },

    /// The entry is not stored on enough replicas.
    #[error("no such entry: {entry_id} in ledger {ledger_id}")]
    NoSuchEntry {
        /// The ledger that was read.
        ledger_id: LedgerId,
        /// The missing entry.
        entry_id: EntryId,
    },

    /// A metadata compare-and-swap lost against a concurrent writer.
    ///
    /// The ledger may have been fenced, recovered or closed by another
    /// client; callers must re-read before assuming any state.
    #[error("metadata of ledger {ledger_id} changed concurrently")]
    VersionConflict {
        /// The contended ledger.
        ledger_id: LedgerId,
        /// The store's version mismatch.
        #[source]
        source: Option<BoxError>,
    },

    /// An entry failed its integrity check.
    #[error("digest mismatch for entry {entry_id} in ledger {ledger_id}")]
    DigestMismatch {
        /// The ledger that was read.
        ledger_id: LedgerId,
        /// The corrupt entry.
        entry_id: EntryId,
    },

    /// Too few replicas answered to reach a quorum.
    #[error("not enough replicas for entry {entry_id} in ledger {ledger_id}: {message}")]
    NotEnoughReplicas {
        /// The ledger being accessed.
        ledger_id: LedgerId,
        /// The entry being accessed.
        entry_id: EntryId,
        /// What the replicas reported.
        message: String,
    },

    /// The operation is not allowed on this handle.
    #[error("illegal operation: {message}")]
    IllegalOperation {
        /// Why the operation was refused.
        message: String,
    },

    /// A collaborator failed outside every other category.
    #[error("unexpected error: {message}")]
    Unexpected {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The client configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Creates an `InvalidArgument` error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// Creates an `IllegalOperation` error.
    #[must_use]
    pub fn illegal_operation(message: impl Into<String>) -> Self {
        Self::IllegalOperation { message: message.into() }
    }

    /// Creates an `Unexpected` error without a source.
    #[must_use]
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected { message: message.into(), source: None }
    }

    /// Creates an `Unexpected` error wrapping `source`.
    #[must_use]
    pub fn unexpected_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unexpected { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates the `Unexpected` error reported when an operation exceeds its
    /// deadline.
    #[must_use]
    pub fn timeout(operation: &str) -> Self {
        Self::Unexpected { message: format!("{operation} timed out"), source: None }
    }

    /// Short stable name of the variant, used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::NullInput { .. } => "null_input",
            Self::ClientClosed => "client_closed",
            Self::LedgerClosed { .. } => "ledger_closed",
            Self::NoSuchLedger { .. } => "no_such_ledger",
            Self::NoSuchEntry { .. } => "no_such_entry",
            Self::VersionConflict { .. } => "version_conflict",
            Self::DigestMismatch { .. } => "digest_mismatch",
            Self::NotEnoughReplicas { .. } => "not_enough_replicas",
            Self::IllegalOperation { .. } => "illegal_operation",
            Self::Unexpected { .. } => "unexpected",
            Self::Config(_) => "config",
        }
    }
}

impl From<MetaError> for ClientError {
    fn from(err: MetaError) -> Self {
        match err {
            MetaError::NotFound { ledger_id } => Self::NoSuchLedger { ledger_id },
            MetaError::VersionMismatch { ledger_id, .. } => {
                Self::VersionConflict { ledger_id, source: Some(Arc::new(err)) }
            },
            other => Self::Unexpected {
                message: format!("metadata store failure: {other}"),
                source: Some(Arc::new(other)),
            },
        }
    }
}

impl From<BookieError> for ClientError {
    fn from(err: BookieError) -> Self {
        match err {
            BookieError::Fenced { ledger_id, .. } => Self::LedgerClosed { ledger_id },
            BookieError::NoSuchEntry { ledger_id, entry_id, .. } => {
                Self::NoSuchEntry { ledger_id, entry_id }
            },
            other => Self::Unexpected {
                message: format!("bookie failure: {other}"),
                source: Some(Arc::new(other)),
            },
        }
    }
}

impl From<EnsembleError> for ClientError {
    fn from(err: EnsembleError) -> Self {
        Self::Unexpected {
            message: format!("ensemble selection failed: {err}"),
            source: Some(Arc::new(err)),
        }
    }
}

impl From<QuorumError> for ClientError {
    fn from(err: QuorumError) -> Self {
        Self::invalid_argument(err.to_string())
    }
}

impl From<InvalidLedgerId> for ClientError {
    fn from(err: InvalidLedgerId) -> Self {
        Self::invalid_argument(err.to_string())
    }
}

/// Configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A duration or count that must be non-zero is zero.
    #[error("{field} must be positive, got {value}")]
    MustBePositive {
        /// The offending field.
        field: &'static str,
        /// The rejected value, rendered for display.
        value: String,
    },

    /// A value is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// The offending field.
        field: &'static str,
        /// The minimum allowed value.
        min: String,
        /// The rejected value.
        value: String,
    },

    /// Two fields contradict each other.
    #[error("{message}")]
    InvalidRelation {
        /// Which relation is violated.
        message: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ledgerkit_meta::{BookieId, Version};

    use super::*;

    fn id(raw: i64) -> LedgerId {
        LedgerId::try_from(raw).unwrap()
    }

    #[test]
    fn test_meta_not_found_maps_to_no_such_ledger() {
        let err: ClientError = MetaError::not_found(id(2001)).into();
        assert!(matches!(err, ClientError::NoSuchLedger { ledger_id } if ledger_id == id(2001)));
    }

    #[test]
    fn test_version_mismatch_maps_to_conflict_with_source() {
        let err: ClientError =
            MetaError::version_mismatch(id(3), Version::new(1), Version::new(2)).into();
        assert!(matches!(err, ClientError::VersionConflict { .. }));
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("version mismatch for ledger 3: expected 1, found 2"));
    }

    #[test]
    fn test_other_meta_errors_are_unexpected() {
        let err: ClientError = MetaError::connection("refused").into();
        assert_eq!(err.kind(), "unexpected");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_bookie_errors_map_by_class() {
        let fenced: ClientError = BookieError::Fenced { ledger_id: id(1) }.into();
        assert!(matches!(fenced, ClientError::LedgerClosed { .. }));

        let missing: ClientError =
            BookieError::NoSuchEntry { ledger_id: id(1), entry_id: 4 }.into();
        assert!(matches!(missing, ClientError::NoSuchEntry { entry_id: 4, .. }));

        let down: ClientError = BookieError::Unavailable { bookie: BookieId::new("b0") }.into();
        assert!(matches!(down, ClientError::Unexpected { .. }));
    }

    #[test]
    fn test_quorum_errors_are_invalid_arguments() {
        let err: ClientError = QuorumError::AckQuorumExceedsWriteQuorum {
            ack_quorum: 5,
            write_quorum: 4,
        }
        .into();
        assert_eq!(err.to_string(), "invalid argument: ack quorum (5) exceeds write quorum (4)");
    }

    #[test]
    fn test_config_error_display() {
        let err = ClientError::from(ConfigError::MustBePositive {
            field: "metadata_timeout",
            value: "0s".into(),
        });
        assert_eq!(err.to_string(), "metadata_timeout must be positive, got 0s");
    }
}
