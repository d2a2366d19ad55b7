//! Storage-node ("bookie") contract.
//!
//! The client talks to bookies only through [`BookieClient`]. A bookie stores
//! [`EntryFrame`]s per ledger, authenticates writers by the ledger's master
//! key, and can be *fenced*: once fenced for a ledger it refuses regular
//! appends, which is how recovery stops a writer that is still alive.
//!
//! [`MemoryBookieCluster`] is an in-process implementation with fault
//! injection for tests.

mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use ledgerkit_meta::{BookieId, EntryId, LedgerId};
use thiserror::Error;

pub use self::memory::MemoryBookieCluster;
use crate::entry::EntryFrame;

/// Result type alias for bookie operations.
pub type BookieResult<T> = Result<T, BookieError>;

/// Failures reported by a bookie.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum BookieError {
    /// The bookie holds no such entry.
    #[error("bookie has no entry {entry_id} of ledger {ledger_id}")]
    NoSuchEntry {
        /// The ledger that was read.
        ledger_id: LedgerId,
        /// The missing entry.
        entry_id: EntryId,
    },

    /// The bookie holds nothing for the ledger.
    #[error("bookie has no data for ledger {ledger_id}")]
    NoSuchLedger {
        /// The ledger that was read.
        ledger_id: LedgerId,
    },

    /// The ledger is fenced on this bookie and regular appends are refused.
    #[error("ledger {ledger_id} is fenced")]
    Fenced {
        /// The fenced ledger.
        ledger_id: LedgerId,
    },

    /// The presented master key does not match the one the ledger was
    /// written with.
    #[error("master key rejected for ledger {ledger_id}")]
    Unauthorized {
        /// The ledger being accessed.
        ledger_id: LedgerId,
    },

    /// The bookie could not be reached.
    #[error("bookie {bookie} is unavailable")]
    Unavailable {
        /// The unreachable bookie.
        bookie: BookieId,
    },
}

impl BookieError {
    /// Returns `true` if the entry is known to be absent on this bookie.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::NoSuchEntry { .. } | Self::NoSuchLedger { .. })
    }
}

/// How an append is treated by a fenced bookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddMode {
    /// Writer append, refused once the ledger is fenced.
    Regular,
    /// Recovery re-replication, accepted on fenced ledgers.
    Recovery,
}

/// Client of the ensemble's storage nodes.
#[async_trait]
pub trait BookieClient: Send + Sync {
    /// Stores `frame` on `bookie`.
    ///
    /// # Errors
    ///
    /// Returns [`BookieError::Fenced`] for a regular append to a fenced
    /// ledger, [`BookieError::Unauthorized`] for a wrong master key and
    /// [`BookieError::Unavailable`] if the bookie cannot be reached.
    async fn add_entry(
        &self,
        bookie: &BookieId,
        master_key: &Bytes,
        frame: EntryFrame,
        mode: AddMode,
    ) -> BookieResult<()>;

    /// Reads one entry from `bookie`.
    ///
    /// # Errors
    ///
    /// Returns [`BookieError::NoSuchEntry`] or [`BookieError::NoSuchLedger`]
    /// if the bookie does not hold the entry.
    async fn read_entry(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
        entry_id: EntryId,
    ) -> BookieResult<EntryFrame>;

    /// Returns the last-add-confirmed piggybacked on the newest entry the
    /// bookie holds for the ledger (`-1` if none), fencing the ledger first
    /// when `fence` is set.
    ///
    /// # Errors
    ///
    /// Returns [`BookieError::Unauthorized`] for a wrong master key and
    /// [`BookieError::Unavailable`] if the bookie cannot be reached.
    async fn read_last_add_confirmed(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
        master_key: &Bytes,
        fence: bool,
    ) -> BookieResult<EntryId>;
}
