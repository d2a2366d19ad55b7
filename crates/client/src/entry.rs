//! Entry framing.
//!
//! An [`EntryFrame`] is what the client hands to and receives from a bookie:
//! the payload plus the header fields covered by its digest. A verified
//! frame is exposed to callers as a [`LedgerEntry`].

use bytes::Bytes;
use ledgerkit_meta::{EntryId, LedgerId};

/// One entry as stored on a bookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFrame {
    /// Owning ledger.
    pub ledger_id: LedgerId,
    /// Position within the ledger.
    pub entry_id: EntryId,
    /// Writer's last-add-confirmed when this entry was sent.
    pub last_add_confirmed: EntryId,
    /// Cumulative ledger length in bytes, including this entry.
    pub length: u64,
    /// Integrity code over the header fields and payload.
    pub digest: Bytes,
    /// Application data.
    pub payload: Bytes,
}

/// Encodes the digest-covered header: ledger id, entry id, last-add-confirmed
/// and length, each as 8 big-endian bytes.
pub(crate) fn header_bytes(
    ledger_id: LedgerId,
    entry_id: EntryId,
    last_add_confirmed: EntryId,
    length: u64,
) -> [u8; 32] {
    let mut header = [0u8; 32];
    header[0..8].copy_from_slice(&ledger_id.get().to_be_bytes());
    header[8..16].copy_from_slice(&entry_id.to_be_bytes());
    header[16..24].copy_from_slice(&last_add_confirmed.to_be_bytes());
    header[24..32].copy_from_slice(&length.to_be_bytes());
    header
}

/// A verified entry returned by a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    ledger_id: LedgerId,
    entry_id: EntryId,
    length: u64,
    payload: Bytes,
}

impl LedgerEntry {
    pub(crate) fn from_frame(frame: EntryFrame) -> Self {
        Self {
            ledger_id: frame.ledger_id,
            entry_id: frame.entry_id,
            length: frame.length,
            payload: frame.payload,
        }
    }

    /// Owning ledger.
    #[must_use]
    pub fn ledger_id(&self) -> LedgerId {
        self.ledger_id
    }

    /// Position within the ledger.
    #[must_use]
    pub fn entry_id(&self) -> EntryId {
        self.entry_id
    }

    /// Cumulative ledger length through this entry.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Application data.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the entry, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
