//! Conformance test suite for `MemoryLedgerManager`.
//!
//! Each test runs a single conformance check against a fresh store. The
//! `run_all` test exercises the full suite against one shared store to
//! verify that no check depends on running in isolation.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use ledgerkit_meta::{MemoryLedgerManager, conformance};

// ============================================================================
// Create / Read
// ============================================================================

#[tokio::test]
async fn create_then_read_roundtrips() {
    conformance::create_then_read_roundtrips(&MemoryLedgerManager::new()).await;
}

#[tokio::test]
async fn create_duplicate_is_rejected() {
    conformance::create_duplicate_is_rejected(&MemoryLedgerManager::new()).await;
}

#[tokio::test]
async fn read_missing_is_not_found() {
    conformance::read_missing_is_not_found(&MemoryLedgerManager::new()).await;
}

// ============================================================================
// CAS
// ============================================================================

#[tokio::test]
async fn cas_with_current_version_advances() {
    conformance::cas_with_current_version_advances(&MemoryLedgerManager::new()).await;
}

#[tokio::test]
async fn cas_with_stale_version_is_rejected() {
    conformance::cas_with_stale_version_is_rejected(&MemoryLedgerManager::new()).await;
}

#[tokio::test]
async fn cas_on_missing_is_not_found() {
    conformance::cas_on_missing_is_not_found(&MemoryLedgerManager::new()).await;
}

#[tokio::test]
async fn cas_preserves_ensemble_history() {
    conformance::cas_preserves_ensemble_history(&MemoryLedgerManager::new()).await;
}

// ============================================================================
// Remove / List
// ============================================================================

#[tokio::test]
async fn remove_deletes_record() {
    conformance::remove_deletes_record(&MemoryLedgerManager::new()).await;
}

#[tokio::test]
async fn remove_missing_is_not_found() {
    conformance::remove_missing_is_not_found(&MemoryLedgerManager::new()).await;
}

#[tokio::test]
async fn list_returns_sorted_ids() {
    conformance::list_returns_sorted_ids(&MemoryLedgerManager::new()).await;
}

// ============================================================================
// Concurrent
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cas_exactly_one_winner() {
    conformance::concurrent_cas_exactly_one_winner(Arc::new(MemoryLedgerManager::new())).await;
}

// ============================================================================
// Full suite
// ============================================================================

#[tokio::test]
async fn run_all() {
    conformance::run_all(Arc::new(MemoryLedgerManager::new())).await;
}
