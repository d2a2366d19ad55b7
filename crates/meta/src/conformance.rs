//! Conformance test suite for [`LedgerManager`] implementations.
//!
//! Each function checks one aspect of the store contract against a fresh
//! store. Run them from an integration test:
//!
//! ```no_run
//! use ledgerkit_meta::{MemoryLedgerManager, conformance};
//!
//! #[tokio::test]
//! async fn create_then_read_roundtrips() {
//!     conformance::create_then_read_roundtrips(&MemoryLedgerManager::new()).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Contract aspect |
//! |----------|-----------------|
//! | Create | Uniqueness of records, initial version |
//! | Read | Missing records, stable versions |
//! | CAS | Version checks on `write_ledger_metadata` |
//! | Remove | Removal and its interaction with CAS |
//! | List | Ordered enumeration |
//! | Concurrent | Exactly one compare-and-swap winner |

use std::sync::Arc;

use crate::{
    assert_meta_not_found, assert_version_mismatch,
    error::MetaError,
    manager::LedgerManager,
    metadata::LedgerState,
    testutil::{bookie_ids, ledger_id, sample_metadata},
    types::Version,
};

// ============================================================================
// Create
// ============================================================================

/// A created record reads back unchanged with the version create returned.
pub async fn create_then_read_roundtrips<M: LedgerManager>(manager: &M) {
    let id = ledger_id(100);
    let metadata = sample_metadata(id, 3, 2, 2);
    let created = manager.create_ledger_metadata(id, &metadata).await.expect("create");
    assert_eq!(created.value, metadata);

    let read = manager.read_ledger_metadata(id).await.expect("read");
    assert_eq!(read.value, metadata);
    assert_eq!(read.version, created.version, "read must observe the created version");
}

/// Creating a second record under the same id fails without touching the first.
pub async fn create_duplicate_is_rejected<M: LedgerManager>(manager: &M) {
    let id = ledger_id(101);
    let first = sample_metadata(id, 1, 1, 1);
    let created = manager.create_ledger_metadata(id, &first).await.expect("create");

    let second = sample_metadata(id, 2, 2, 1);
    let result = manager.create_ledger_metadata(id, &second).await;
    assert!(
        matches!(result, Err(MetaError::AlreadyExists { .. })),
        "duplicate create should fail with AlreadyExists, got: {result:?}"
    );

    let read = manager.read_ledger_metadata(id).await.expect("read");
    assert_eq!(read.value, first);
    assert_eq!(read.version, created.version);
}

// ============================================================================
// Read
// ============================================================================

/// Reading an id that was never created fails with `NotFound`.
pub async fn read_missing_is_not_found<M: LedgerManager>(manager: &M) {
    assert_meta_not_found!(manager.read_ledger_metadata(ledger_id(2001)).await);
}

// ============================================================================
// CAS
// ============================================================================

/// A write presenting the current version succeeds and advances the version.
pub async fn cas_with_current_version_advances<M: LedgerManager>(manager: &M) {
    let id = ledger_id(110);
    let metadata = sample_metadata(id, 1, 1, 1);
    let created = manager.create_ledger_metadata(id, &metadata).await.expect("create");

    let closed = metadata.close(4, 40).expect("close transition");
    let written =
        manager.write_ledger_metadata(id, &closed, created.version).await.expect("cas write");
    assert_ne!(written.version, created.version, "a successful write must change the version");

    let read = manager.read_ledger_metadata(id).await.expect("read");
    assert_eq!(read.value.state(), LedgerState::Closed);
    assert_eq!(read.value.last_entry_id(), 4);
    assert_eq!(read.version, written.version);
}

/// A write presenting a stale version fails and leaves the record unchanged.
pub async fn cas_with_stale_version_is_rejected<M: LedgerManager>(manager: &M) {
    let id = ledger_id(111);
    let metadata = sample_metadata(id, 2, 2, 2);
    let created = manager.create_ledger_metadata(id, &metadata).await.expect("create");

    let recovering = metadata.mark_in_recovery().expect("recovery transition");
    let after_first =
        manager.write_ledger_metadata(id, &recovering, created.version).await.expect("first cas");

    let closed = metadata.close(-1, 0).expect("close transition");
    assert_version_mismatch!(manager.write_ledger_metadata(id, &closed, created.version).await);

    let read = manager.read_ledger_metadata(id).await.expect("read");
    assert_eq!(read.value.state(), LedgerState::InRecovery);
    assert_eq!(read.version, after_first.version);
}

/// Writing a record that does not exist fails with `NotFound`.
pub async fn cas_on_missing_is_not_found<M: LedgerManager>(manager: &M) {
    let id = ledger_id(112);
    let metadata = sample_metadata(id, 1, 1, 1);
    assert_meta_not_found!(manager.write_ledger_metadata(id, &metadata, Version::new(1)).await);
}

/// Ensemble history survives a compare-and-swap round trip.
pub async fn cas_preserves_ensemble_history<M: LedgerManager>(manager: &M) {
    let id = ledger_id(113);
    let metadata = sample_metadata(id, 2, 2, 2);
    let created = manager.create_ledger_metadata(id, &metadata).await.expect("create");

    let mut replacement = bookie_ids(3);
    replacement.remove(0);
    let changed = metadata.with_ensemble_change(7, replacement.clone()).expect("change");
    manager.write_ledger_metadata(id, &changed, created.version).await.expect("cas write");

    let read = manager.read_ledger_metadata(id).await.expect("read");
    assert_eq!(read.value.all_ensembles().len(), 2);
    assert_eq!(read.value.ensemble_at(7), replacement.as_slice());
    assert_eq!(read.value.ensemble_at(6), bookie_ids(2).as_slice());
}

// ============================================================================
// Remove
// ============================================================================

/// A removed record is gone and cannot be written.
pub async fn remove_deletes_record<M: LedgerManager>(manager: &M) {
    let id = ledger_id(120);
    let metadata = sample_metadata(id, 1, 1, 1);
    let created = manager.create_ledger_metadata(id, &metadata).await.expect("create");

    manager.remove_ledger_metadata(id).await.expect("remove");
    assert_meta_not_found!(manager.read_ledger_metadata(id).await);
    assert_meta_not_found!(manager.write_ledger_metadata(id, &metadata, created.version).await);
}

/// Removing an id that was never created fails with `NotFound`.
pub async fn remove_missing_is_not_found<M: LedgerManager>(manager: &M) {
    assert_meta_not_found!(manager.remove_ledger_metadata(ledger_id(121)).await);
}

// ============================================================================
// List
// ============================================================================

/// `list_ledgers` returns every stored id in ascending order.
pub async fn list_returns_sorted_ids<M: LedgerManager>(manager: &M) {
    for raw in [132, 130, 131] {
        let id = ledger_id(raw);
        manager.create_ledger_metadata(id, &sample_metadata(id, 1, 1, 1)).await.expect("create");
    }
    manager.remove_ledger_metadata(ledger_id(131)).await.expect("remove");

    let ids = manager.list_ledgers().await.expect("list");
    let listed: Vec<i64> =
        ids.iter().map(|id| id.get()).filter(|raw| (130..=132).contains(raw)).collect();
    assert_eq!(listed, vec![130, 132]);
}

// ============================================================================
// Concurrent
// ============================================================================

/// Concurrent writes against the same version: exactly one wins.
pub async fn concurrent_cas_exactly_one_winner<M: LedgerManager + 'static>(manager: Arc<M>) {
    let id = ledger_id(140);
    let metadata = sample_metadata(id, 1, 1, 1);
    let created = manager.create_ledger_metadata(id, &metadata).await.expect("create");

    let mut handles = Vec::new();
    for i in 0i64..10 {
        let manager = Arc::clone(&manager);
        let closed = metadata.close(i, (i as u64 + 1) * 10).expect("close transition");
        let version = created.version;
        handles.push(tokio::spawn(async move {
            manager.write_ledger_metadata(id, &closed, version).await
        }));
    }

    let mut successes = 0u32;
    let mut conflicts = 0u32;
    for handle in handles {
        match handle.await.expect("task join") {
            Ok(_) => successes += 1,
            Err(MetaError::VersionMismatch { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }

    assert_eq!(successes, 1, "exactly one CAS writer should win");
    assert_eq!(conflicts, 9, "remaining writers should get VersionMismatch");
}

// ============================================================================
// Convenience runner
// ============================================================================

/// Run the full conformance suite against the given store.
///
/// Ids used by the individual checks do not overlap, so a single store can
/// host the whole run.
pub async fn run_all<M: LedgerManager + 'static>(manager: Arc<M>) {
    create_then_read_roundtrips(manager.as_ref()).await;
    create_duplicate_is_rejected(manager.as_ref()).await;

    read_missing_is_not_found(manager.as_ref()).await;

    cas_with_current_version_advances(manager.as_ref()).await;
    cas_with_stale_version_is_rejected(manager.as_ref()).await;
    cas_on_missing_is_not_found(manager.as_ref()).await;
    cas_preserves_ensemble_history(manager.as_ref()).await;

    remove_deletes_record(manager.as_ref()).await;
    remove_missing_is_not_found(manager.as_ref()).await;

    list_returns_sorted_ids(manager.as_ref()).await;

    concurrent_cas_exactly_one_winner(manager).await;
}
