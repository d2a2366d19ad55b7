//! In-memory metadata store and id generator.
//!
//! [`MemoryLedgerManager`] implements [`LedgerManager`] on a
//! [`BTreeMap`] guarded by a [`parking_lot::RwLock`]. Records are kept in
//! their serialized JSON form so every read decodes and validates, exactly as
//! a networked store would.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use ledgerkit_meta::{
//!     BookieId, LedgerId, LedgerManager, LedgerMetadata, MemoryLedgerManager, QuorumConfig,
//!     Version,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = MemoryLedgerManager::new();
//!     let id = LedgerId::try_from(1).unwrap();
//!     let metadata = LedgerMetadata::builder()
//!         .ledger_id(id)
//!         .quorum(QuorumConfig::new(1, 1, 1).unwrap())
//!         .master_key(Bytes::from_static(b"key"))
//!         .ensemble(vec![BookieId::new("bookie-0")])
//!         .build()
//!         .unwrap();
//!
//!     let created = manager.create_ledger_metadata(id, &metadata).await.unwrap();
//!     assert_eq!(created.version, Version::new(1));
//! }
//! ```
//!
//! # Fail Points
//!
//! With the `failpoints` feature enabled the store evaluates:
//!
//! | Name | Effect of `return` |
//! |------|--------------------|
//! | `meta-create` | create fails with a connection error |
//! | `meta-read` | read fails with a connection error |
//! | `meta-write` | compare-and-swap fails with a connection error |
//! | `meta-remove` | remove fails with a connection error |

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use parking_lot::RwLock;

use crate::{
    error::{MetaError, MetaResult},
    manager::{LedgerIdGenerator, LedgerManager},
    metadata::LedgerMetadata,
    types::{LedgerId, Version, Versioned},
};

/// Version assigned to a freshly created record.
const INITIAL_VERSION: Version = Version::new(1);

#[derive(Debug, Clone)]
struct StoredRecord {
    bytes: Bytes,
    version: Version,
}

/// In-memory [`LedgerManager`].
///
/// # Cloning
///
/// `MemoryLedgerManager` is cheaply cloneable via [`Arc`]. All clones share
/// the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerManager {
    records: Arc<RwLock<BTreeMap<LedgerId, StoredRecord>>>,
}

impl MemoryLedgerManager {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if metadata is stored for `ledger_id`.
    #[must_use]
    pub fn contains(&self, ledger_id: LedgerId) -> bool {
        self.records.read().contains_key(&ledger_id)
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Advances the stored version of a record without changing its content,
    /// as a concurrent writer touching the record would.
    ///
    /// Returns the new version, or `None` if no record exists.
    pub fn bump_version(&self, ledger_id: LedgerId) -> Option<Version> {
        let mut records = self.records.write();
        let record = records.get_mut(&ledger_id)?;
        record.version = record.version.next();
        Some(record.version)
    }

    fn encode(metadata: &LedgerMetadata) -> MetaResult<Bytes> {
        serde_json::to_vec(metadata)
            .map(Bytes::from)
            .map_err(|e| MetaError::serialization_with_source("failed to encode metadata", e))
    }

    fn decode(record: &StoredRecord) -> MetaResult<Versioned<LedgerMetadata>> {
        let metadata: LedgerMetadata = serde_json::from_slice(&record.bytes)
            .map_err(|e| MetaError::serialization_with_source("failed to decode metadata", e))?;
        metadata.validate()?;
        Ok(Versioned::new(metadata, record.version))
    }

    fn check_id(ledger_id: LedgerId, metadata: &LedgerMetadata) -> MetaResult<()> {
        if metadata.ledger_id() != ledger_id {
            return Err(MetaError::invalid(format!(
                "metadata for ledger {} stored under id {ledger_id}",
                metadata.ledger_id()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerManager for MemoryLedgerManager {
    #[tracing::instrument(skip(self, metadata))]
    async fn create_ledger_metadata(
        &self,
        ledger_id: LedgerId,
        metadata: &LedgerMetadata,
    ) -> MetaResult<Versioned<LedgerMetadata>> {
        fail_point!("meta-create", |_| {
            Err(MetaError::connection("injected failure before metadata create"))
        });
        Self::check_id(ledger_id, metadata)?;
        metadata.validate()?;
        let bytes = Self::encode(metadata)?;

        let mut records = self.records.write();
        if records.contains_key(&ledger_id) {
            return Err(MetaError::already_exists(ledger_id));
        }
        records.insert(ledger_id, StoredRecord { bytes, version: INITIAL_VERSION });
        tracing::debug!(version = %INITIAL_VERSION, "created ledger metadata");
        Ok(Versioned::new(metadata.clone(), INITIAL_VERSION))
    }

    #[tracing::instrument(skip(self))]
    async fn read_ledger_metadata(
        &self,
        ledger_id: LedgerId,
    ) -> MetaResult<Versioned<LedgerMetadata>> {
        fail_point!("meta-read", |_| {
            Err(MetaError::connection("injected failure before metadata read"))
        });
        let record = self
            .records
            .read()
            .get(&ledger_id)
            .cloned()
            .ok_or_else(|| MetaError::not_found(ledger_id))?;
        Self::decode(&record)
    }

    #[tracing::instrument(skip(self, metadata))]
    async fn write_ledger_metadata(
        &self,
        ledger_id: LedgerId,
        metadata: &LedgerMetadata,
        expected: Version,
    ) -> MetaResult<Versioned<LedgerMetadata>> {
        fail_point!("meta-write", |_| {
            Err(MetaError::connection("injected failure before metadata write"))
        });
        Self::check_id(ledger_id, metadata)?;
        metadata.validate()?;
        let bytes = Self::encode(metadata)?;

        let mut records = self.records.write();
        let record = records.get_mut(&ledger_id).ok_or_else(|| MetaError::not_found(ledger_id))?;
        if record.version != expected {
            tracing::debug!(actual = %record.version, "metadata version mismatch");
            return Err(MetaError::version_mismatch(ledger_id, expected, record.version));
        }
        let version = record.version.next();
        *record = StoredRecord { bytes, version };
        tracing::debug!(%version, "wrote ledger metadata");
        Ok(Versioned::new(metadata.clone(), version))
    }

    #[tracing::instrument(skip(self))]
    async fn remove_ledger_metadata(&self, ledger_id: LedgerId) -> MetaResult<()> {
        fail_point!("meta-remove", |_| {
            Err(MetaError::connection("injected failure before metadata remove"))
        });
        match self.records.write().remove(&ledger_id) {
            Some(_) => Ok(()),
            None => Err(MetaError::not_found(ledger_id)),
        }
    }

    async fn list_ledgers(&self) -> MetaResult<Vec<LedgerId>> {
        Ok(self.records.read().keys().copied().collect())
    }
}

/// [`LedgerIdGenerator`] handing out consecutive ids from an atomic counter.
#[derive(Debug, Clone)]
pub struct MonotonicIdGenerator {
    /// Next id to hand out; negative once [`LedgerId::MAX`] was issued.
    next: Arc<AtomicI64>,
}

impl MonotonicIdGenerator {
    /// Creates a generator whose first id is `0`.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(LedgerId::MIN)
    }

    /// Creates a generator whose first id is `first`.
    #[must_use]
    pub fn starting_at(first: LedgerId) -> Self {
        Self { next: Arc::new(AtomicI64::new(first.get())) }
    }
}

impl Default for MonotonicIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerIdGenerator for MonotonicIdGenerator {
    async fn generate_ledger_id(&self) -> MetaResult<LedgerId> {
        let raw = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current >= 0).then(|| current.checked_add(1).unwrap_or(-1))
            })
            .map_err(|_| MetaError::internal("ledger id space exhausted"))?;
        LedgerId::try_from(raw).map_err(|e| MetaError::internal(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testutil::{ledger_id, sample_metadata};

    #[tokio::test]
    async fn test_create_then_read_returns_initial_version() {
        let manager = MemoryLedgerManager::new();
        let id = ledger_id(5);
        let metadata = sample_metadata(id, 3, 2, 2);

        let created = manager.create_ledger_metadata(id, &metadata).await.unwrap();
        assert_eq!(created.version, INITIAL_VERSION);

        let read = manager.read_ledger_metadata(id).await.unwrap();
        assert_eq!(read, created);
        assert!(manager.contains(id));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_mismatched_id() {
        let manager = MemoryLedgerManager::new();
        let metadata = sample_metadata(ledger_id(5), 1, 1, 1);
        let err = manager.create_ledger_metadata(ledger_id(6), &metadata).await.unwrap_err();
        assert!(matches!(err, MetaError::InvalidMetadata { .. }));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_bump_version_invalidates_readers() {
        let manager = MemoryLedgerManager::new();
        let id = ledger_id(9);
        let metadata = sample_metadata(id, 1, 1, 1);
        let created = manager.create_ledger_metadata(id, &metadata).await.unwrap();

        assert_eq!(manager.bump_version(id), Some(created.version.next()));
        let closed = metadata.close(-1, 0).unwrap();
        let err = manager.write_ledger_metadata(id, &closed, created.version).await.unwrap_err();
        assert!(matches!(err, MetaError::VersionMismatch { .. }));
        assert_eq!(manager.bump_version(ledger_id(10)), None);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_reported_as_serialization_error() {
        let manager = MemoryLedgerManager::new();
        let id = ledger_id(3);
        manager.records.write().insert(
            id,
            StoredRecord { bytes: Bytes::from_static(b"{not json"), version: INITIAL_VERSION },
        );
        let err = manager.read_ledger_metadata(id).await.unwrap_err();
        assert!(matches!(err, MetaError::Serialization { .. }));
    }

    #[tokio::test]
    async fn test_id_generator_is_monotonic() {
        let generator = MonotonicIdGenerator::starting_at(ledger_id(4111));
        let first = generator.generate_ledger_id().await.unwrap();
        let second = generator.generate_ledger_id().await.unwrap();
        assert_eq!(first.get(), 4111);
        assert_eq!(second.get(), 4112);
    }

    #[tokio::test]
    async fn test_id_generator_issues_max_then_reports_exhaustion() {
        let generator = MonotonicIdGenerator::starting_at(LedgerId::MAX);
        assert_eq!(generator.generate_ledger_id().await.unwrap(), LedgerId::MAX);

        let err = generator.generate_ledger_id().await.unwrap_err();
        assert!(matches!(err, MetaError::Internal { .. }));
        // Exhaustion is sticky.
        assert!(generator.generate_ledger_id().await.is_err());
    }

    #[tokio::test]
    async fn test_clones_share_records() {
        let manager = MemoryLedgerManager::new();
        let clone = manager.clone();
        let id = ledger_id(1);
        manager.create_ledger_metadata(id, &sample_metadata(id, 1, 1, 1)).await.unwrap();
        assert!(clone.contains(id));
    }
}
