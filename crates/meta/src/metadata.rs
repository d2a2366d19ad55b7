//! The versioned ledger metadata record.
//!
//! [`LedgerMetadata`] describes everything a client needs to read or write a
//! ledger: its quorum sizes, digest algorithm, password-derived key, the
//! history of ensembles that stored its entries, and its lifecycle state.
//!
//! # Lifecycle
//!
//! ```text
//!            create                 close (CAS)
//!   ──────────────────→  OPEN  ─────────────────────→  CLOSED
//!                          │                             ↑
//!                          │ recovery (CAS)              │ recovery close (CAS)
//!                          └──────→  IN_RECOVERY  ───────┘
//! ```
//!
//! Transitions never mutate in place. Each one returns a new record that the
//! caller writes back through
//! [`LedgerManager::write_ledger_metadata`](crate::LedgerManager::write_ledger_metadata)
//! with the version it read. A CLOSED record rejects every further
//! transition.

use std::collections::{BTreeMap, HashSet};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    error::{MetaError, MetaResult},
    types::{BookieId, EntryId, INVALID_ENTRY_ID, LedgerId},
};

/// Integrity-code algorithm applied to every entry of a ledger.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DigestType {
    /// IEEE CRC-32.
    #[default]
    Crc32,
    /// Castagnoli CRC-32C.
    Crc32c,
    /// Keyed HMAC-SHA256, keyed by the ledger password.
    Mac,
    /// No integrity code.
    Dummy,
}

impl DigestType {
    /// Stable name of the algorithm, used when deriving keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Crc32 => "CRC32",
            Self::Crc32c => "CRC32C",
            Self::Mac => "MAC",
            Self::Dummy => "DUMMY",
        }
    }
}

impl std::fmt::Display for DigestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a quorum configuration is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QuorumError {
    /// The ensemble has no members.
    #[error("ensemble size must be at least 1")]
    EmptyEnsemble,
    /// More replicas requested than ensemble members.
    #[error("write quorum ({write_quorum}) exceeds ensemble size ({ensemble})")]
    WriteQuorumExceedsEnsemble {
        /// Requested write quorum.
        write_quorum: u32,
        /// Requested ensemble size.
        ensemble: u32,
    },
    /// More acknowledgements required than replicas written.
    #[error("ack quorum ({ack_quorum}) exceeds write quorum ({write_quorum})")]
    AckQuorumExceedsWriteQuorum {
        /// Requested ack quorum.
        ack_quorum: u32,
        /// Requested write quorum.
        write_quorum: u32,
    },
}

/// Replication parameters of a ledger: ensemble size `E`, write quorum `Qw`
/// and ack quorum `Qa`, with `E >= Qw >= Qa` and `E >= 1`.
///
/// # Examples
///
/// ```
/// use ledgerkit_meta::{QuorumConfig, QuorumError};
///
/// let quorum = QuorumConfig::new(4, 3, 2).unwrap();
/// assert_eq!(quorum.write_set(5), vec![1, 2, 3]);
///
/// assert_eq!(
///     QuorumConfig::new(4, 4, 5),
///     Err(QuorumError::AckQuorumExceedsWriteQuorum { ack_quorum: 5, write_quorum: 4 }),
/// );
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuorumConfig {
    ensemble_size: u32,
    write_quorum_size: u32,
    ack_quorum_size: u32,
}

impl QuorumConfig {
    /// Validates and creates a quorum configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`QuorumError`] when `E == 0`, `Qw > E` or `Qa > Qw`.
    pub fn new(
        ensemble_size: u32,
        write_quorum_size: u32,
        ack_quorum_size: u32,
    ) -> Result<Self, QuorumError> {
        let config = Self { ensemble_size, write_quorum_size, ack_quorum_size };
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), QuorumError> {
        if self.ensemble_size == 0 {
            return Err(QuorumError::EmptyEnsemble);
        }
        if self.write_quorum_size > self.ensemble_size {
            return Err(QuorumError::WriteQuorumExceedsEnsemble {
                write_quorum: self.write_quorum_size,
                ensemble: self.ensemble_size,
            });
        }
        if self.ack_quorum_size > self.write_quorum_size {
            return Err(QuorumError::AckQuorumExceedsWriteQuorum {
                ack_quorum: self.ack_quorum_size,
                write_quorum: self.write_quorum_size,
            });
        }
        Ok(())
    }

    /// Ensemble size `E`.
    #[must_use]
    pub fn ensemble_size(&self) -> u32 {
        self.ensemble_size
    }

    /// Write quorum `Qw`.
    #[must_use]
    pub fn write_quorum_size(&self) -> u32 {
        self.write_quorum_size
    }

    /// Ack quorum `Qa`.
    #[must_use]
    pub fn ack_quorum_size(&self) -> u32 {
        self.ack_quorum_size
    }

    /// Ensemble positions that store `entry_id`.
    ///
    /// Entries are striped round-robin: entry `e` goes to the `Qw`
    /// consecutive positions starting at `e mod E`.
    #[must_use]
    pub fn write_set(&self, entry_id: EntryId) -> Vec<usize> {
        let ensemble = self.ensemble_size as usize;
        let start = entry_id.rem_euclid(i64::from(self.ensemble_size)) as usize;
        (0..self.write_quorum_size as usize).map(|i| (start + i) % ensemble).collect()
    }
}

/// Lifecycle state of a ledger.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerState {
    /// Accepting appends from its writer.
    Open,
    /// A reader is fencing and closing the ledger.
    InRecovery,
    /// Finalized: length and last entry are fixed forever.
    Closed,
}

/// Metadata of one ledger.
///
/// Construct with [`LedgerMetadata::builder`]; derive successors with
/// [`close`](Self::close), [`mark_in_recovery`](Self::mark_in_recovery) and
/// [`with_ensemble_change`](Self::with_ensemble_change).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerMetadata {
    ledger_id: LedgerId,
    quorum: QuorumConfig,
    digest_type: DigestType,
    master_key: Bytes,
    ensembles: BTreeMap<EntryId, Vec<BookieId>>,
    state: LedgerState,
    last_entry_id: EntryId,
    length: u64,
    #[serde(default)]
    custom_metadata: BTreeMap<String, Bytes>,
}

#[bon::bon]
impl LedgerMetadata {
    /// Builds the initial OPEN metadata of a new ledger.
    ///
    /// The ensemble becomes the ensemble in effect from entry `0`.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::InvalidMetadata`] if the quorum is invalid or the
    /// ensemble does not hold exactly `E` distinct bookies.
    #[builder]
    pub fn new(
        ledger_id: LedgerId,
        quorum: QuorumConfig,
        #[builder(default)] digest_type: DigestType,
        #[builder(into)] master_key: Bytes,
        ensemble: Vec<BookieId>,
        #[builder(default)] custom_metadata: BTreeMap<String, Bytes>,
    ) -> MetaResult<Self> {
        let mut ensembles = BTreeMap::new();
        ensembles.insert(0, ensemble);
        let metadata = Self {
            ledger_id,
            quorum,
            digest_type,
            master_key,
            ensembles,
            state: LedgerState::Open,
            last_entry_id: INVALID_ENTRY_ID,
            length: 0,
            custom_metadata,
        };
        metadata.validate()?;
        Ok(metadata)
    }
}

impl LedgerMetadata {
    /// Checks every structural invariant of the record.
    ///
    /// Stores call this after decoding so a corrupt record is reported as
    /// [`MetaError::InvalidMetadata`] instead of surfacing later as a
    /// confusing read failure.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::InvalidMetadata`] naming the first broken invariant.
    pub fn validate(&self) -> MetaResult<()> {
        self.quorum.check().map_err(|e| MetaError::invalid(e.to_string()))?;

        if self.ensembles.is_empty() {
            return Err(MetaError::invalid("ensemble history is empty"));
        }
        if self.ensembles.keys().next() != Some(&0) {
            return Err(MetaError::invalid("first ensemble must start at entry 0"));
        }
        let size = self.quorum.ensemble_size as usize;
        for (start, ensemble) in &self.ensembles {
            if ensemble.len() != size {
                return Err(MetaError::invalid(format!(
                    "ensemble at entry {start} has {} bookies, expected {size}",
                    ensemble.len()
                )));
            }
            let distinct: HashSet<&BookieId> = ensemble.iter().collect();
            if distinct.len() != ensemble.len() {
                return Err(MetaError::invalid(format!(
                    "ensemble at entry {start} contains duplicate bookies"
                )));
            }
        }

        if self.last_entry_id < INVALID_ENTRY_ID {
            return Err(MetaError::invalid("last entry id below -1"));
        }
        if self.state != LedgerState::Closed
            && (self.last_entry_id != INVALID_ENTRY_ID || self.length != 0)
        {
            return Err(MetaError::invalid("only a closed ledger records its last entry"));
        }
        if self.last_entry_id == INVALID_ENTRY_ID && self.length != 0 {
            return Err(MetaError::invalid("an empty ledger cannot have a non-zero length"));
        }
        Ok(())
    }

    /// The ledger this record describes.
    #[must_use]
    pub fn ledger_id(&self) -> LedgerId {
        self.ledger_id
    }

    /// Replication parameters.
    #[must_use]
    pub fn quorum(&self) -> QuorumConfig {
        self.quorum
    }

    /// Digest algorithm of the ledger's entries.
    #[must_use]
    pub fn digest_type(&self) -> DigestType {
        self.digest_type
    }

    /// Password-derived key presented to bookies and checked at open.
    #[must_use]
    pub fn master_key(&self) -> &Bytes {
        &self.master_key
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> LedgerState {
        self.state
    }

    /// Returns `true` once the ledger is finalized.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == LedgerState::Closed
    }

    /// Last entry of a closed ledger, `-1` while open or empty.
    #[must_use]
    pub fn last_entry_id(&self) -> EntryId {
        self.last_entry_id
    }

    /// Bytes confirmed durable, fixed at close.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Application-supplied key/value pairs recorded at creation.
    #[must_use]
    pub fn custom_metadata(&self) -> &BTreeMap<String, Bytes> {
        &self.custom_metadata
    }

    /// Full ensemble history keyed by first entry id.
    #[must_use]
    pub fn all_ensembles(&self) -> &BTreeMap<EntryId, Vec<BookieId>> {
        &self.ensembles
    }

    /// Ensemble responsible for `entry_id`.
    ///
    /// Entries below zero resolve to the first ensemble.
    #[must_use]
    pub fn ensemble_at(&self, entry_id: EntryId) -> &[BookieId] {
        self.ensembles
            .range(..=entry_id.max(0))
            .next_back()
            .map(|(_, ensemble)| ensemble.as_slice())
            .unwrap_or_default()
    }

    /// The ensemble new appends go to, with the entry it starts at.
    #[must_use]
    pub fn current_ensemble(&self) -> (EntryId, &[BookieId]) {
        self.ensembles
            .iter()
            .next_back()
            .map(|(start, ensemble)| (*start, ensemble.as_slice()))
            .unwrap_or((0, &[][..]))
    }

    /// Returns a CLOSED successor fixing the last entry and length.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::InvalidMetadata`] if the record is already closed
    /// or the final position is inconsistent.
    pub fn close(&self, last_entry_id: EntryId, length: u64) -> MetaResult<Self> {
        self.ensure_mutable()?;
        if last_entry_id < INVALID_ENTRY_ID {
            return Err(MetaError::invalid(format!("cannot close at entry {last_entry_id}")));
        }
        if last_entry_id == INVALID_ENTRY_ID && length != 0 {
            return Err(MetaError::invalid("an empty ledger cannot have a non-zero length"));
        }
        let mut next = self.clone();
        next.state = LedgerState::Closed;
        next.last_entry_id = last_entry_id;
        next.length = length;
        Ok(next)
    }

    /// Returns an IN_RECOVERY successor.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::InvalidMetadata`] if the record is closed.
    pub fn mark_in_recovery(&self) -> MetaResult<Self> {
        self.ensure_mutable()?;
        let mut next = self.clone();
        next.state = LedgerState::InRecovery;
        Ok(next)
    }

    /// Returns a successor whose ensemble from `start_entry` onwards is
    /// `ensemble`.
    ///
    /// If the current ensemble already starts at `start_entry` it is
    /// replaced; otherwise a new history entry is appended.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::InvalidMetadata`] if the record is closed, if
    /// `start_entry` precedes the current ensemble, or if the new ensemble is
    /// malformed.
    pub fn with_ensemble_change(
        &self,
        start_entry: EntryId,
        ensemble: Vec<BookieId>,
    ) -> MetaResult<Self> {
        self.ensure_mutable()?;
        let (current_start, _) = self.current_ensemble();
        if start_entry < current_start {
            return Err(MetaError::invalid(format!(
                "ensemble change at entry {start_entry} precedes current ensemble at \
                 {current_start}"
            )));
        }
        let mut next = self.clone();
        next.ensembles.insert(start_entry, ensemble);
        next.validate()?;
        Ok(next)
    }

    fn ensure_mutable(&self) -> MetaResult<()> {
        if self.is_closed() {
            return Err(MetaError::invalid(format!(
                "metadata of closed ledger {} is immutable",
                self.ledger_id
            )));
        }
        Ok(())
    }
}
