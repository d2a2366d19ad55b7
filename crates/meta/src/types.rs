//! Identity and versioning types shared by the metadata store and the client.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Entry identifier within a ledger.
///
/// Entry ids start at `0`. The value [`INVALID_ENTRY_ID`] (`-1`) stands for
/// "no entry", e.g. the last entry of a ledger that has never been written.
pub type EntryId = i64;

/// Sentinel entry id meaning "no entry".
pub const INVALID_ENTRY_ID: EntryId = -1;

/// Raised when a raw integer cannot be used as a [`LedgerId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("ledger id must be non-negative, got {0}")]
pub struct InvalidLedgerId(pub i64);

/// Process-unique identity of a ledger.
///
/// Ledger ids are 63-bit non-negative integers assigned once by a
/// [`LedgerIdGenerator`](crate::LedgerIdGenerator). The wrapped value can
/// only be produced through [`TryFrom<i64>`], so a negative id is rejected at
/// the boundary instead of deep inside the client.
///
/// # Examples
///
/// ```
/// use ledgerkit_meta::LedgerId;
///
/// let id = LedgerId::try_from(4113).unwrap();
/// assert_eq!(id.get(), 4113);
/// assert_eq!(id.to_string(), "4113");
/// assert!(LedgerId::try_from(-1).is_err());
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct LedgerId(i64);

impl LedgerId {
    /// The smallest valid ledger id.
    pub const MIN: LedgerId = LedgerId(0);

    /// The largest valid ledger id.
    pub const MAX: LedgerId = LedgerId(i64::MAX);

    /// Returns the raw id.
    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for LedgerId {
    type Error = InvalidLedgerId;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        if raw < 0 { Err(InvalidLedgerId(raw)) } else { Ok(Self(raw)) }
    }
}

impl From<LedgerId> for i64 {
    fn from(id: LedgerId) -> Self {
        id.0
    }
}

impl fmt::Display for LedgerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque version token handed out by the metadata store.
///
/// Every successful write produces a new version. A compare-and-swap must
/// present the version it read; the store rejects it if the stored version
/// has moved on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Creates a version token from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the version that follows this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the raw value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A value paired with the store version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// The value as stored.
    pub value: T,
    /// The store version of `value`.
    pub version: Version,
}

impl<T> Versioned<T> {
    /// Pairs a value with its version.
    pub fn new(value: T, version: Version) -> Self {
        Self { value, version }
    }

    /// Splits into value and version.
    pub fn into_parts(self) -> (T, Version) {
        (self.value, self.version)
    }
}

/// Identity of a storage node ("bookie").
///
/// # Examples
///
/// ```
/// use ledgerkit_meta::BookieId;
///
/// let bookie = BookieId::new("bookie-0:3181");
/// assert_eq!(bookie.as_str(), "bookie-0:3181");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookieId(String);

impl BookieId {
    /// Creates a bookie id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BookieId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for BookieId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_id_rejects_negative() {
        assert_eq!(LedgerId::try_from(-1), Err(InvalidLedgerId(-1)));
        assert_eq!(LedgerId::try_from(i64::MIN), Err(InvalidLedgerId(i64::MIN)));
        assert_eq!(LedgerId::try_from(0).unwrap(), LedgerId::MIN);
        assert_eq!(LedgerId::try_from(i64::MAX).unwrap(), LedgerId::MAX);
    }

    #[test]
    fn test_ledger_id_serde_validates() {
        let id: LedgerId = serde_json::from_str("4113").unwrap();
        assert_eq!(id.get(), 4113);
        assert_eq!(serde_json::to_string(&id).unwrap(), "4113");
        assert!(serde_json::from_str::<LedgerId>("-5").is_err());
    }

    #[test]
    fn test_version_ordering() {
        let v = Version::new(1);
        assert!(v.next() > v);
        assert_eq!(v.next().get(), 2);
        assert_eq!(Version::new(u64::MAX).next(), Version::new(u64::MAX));
    }

    #[test]
    fn test_versioned_into_parts() {
        let versioned = Versioned::new("meta", Version::new(9));
        assert_eq!(versioned.into_parts(), ("meta", Version::new(9)));
    }
}
