#![allow(clippy::expect_used, clippy::panic)]
//! Races between metadata mutations of one ledger: writer close against
//! recovery, close against delete, and concurrent appends.

use std::{collections::BTreeSet, sync::Arc};

use ledgerkit_client::{
    ClientError,
    testutil::{TEST_PASSWORD, TestCluster, options},
};
use ledgerkit_meta::{DigestType, LedgerManager, LedgerState};
use tokio::task::JoinSet;

// ============================================================================
// close vs recovery
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_racing_recovery_has_exactly_one_winner() {
    for _ in 0..50 {
        let cluster = TestCluster::new(3);
        let writer = cluster.client().create_ledger(options(3, 3, 2)).await.expect("create");
        for i in 0..3 {
            writer.add_entry(format!("entry-{i}").as_bytes()).await.expect("add");
        }
        let ledger_id = writer.ledger_id();
        let recovering = cluster.client();

        let (closed, opened) = tokio::join!(
            writer.close(),
            recovering.open_ledger(ledger_id, DigestType::Dummy, TEST_PASSWORD),
        );

        let opened = opened.expect("recovery open always yields a CLOSED snapshot");
        let stored = cluster.manager.read_ledger_metadata(ledger_id).await.expect("read");
        assert_eq!(stored.value.state(), LedgerState::Closed);
        assert_eq!(stored.value.last_entry_id(), 2);
        assert_eq!(opened.versioned_metadata(), stored);

        match closed {
            Ok(()) => {
                assert_eq!(writer.versioned_metadata(), stored, "the writer's CAS won");
                assert!(writer.is_closed());
            },
            Err(ClientError::VersionConflict { .. }) => {
                assert!(!writer.is_closed(), "a losing close must not mark the handle closed");
            },
            Err(other) => panic!("unexpected close error: {other:?}"),
        }
    }
}

#[tokio::test]
async fn close_against_stale_version_is_version_conflict() {
    let cluster = TestCluster::new(1);
    let client = cluster.client();
    let writer = client.create_ledger(options(1, 1, 1)).await.expect("create");
    writer.add_entry(b"entry").await.expect("add");

    // Another party writes the record between this handle's read and CAS.
    cluster.manager.bump_version(writer.ledger_id()).expect("record exists");

    let result = writer.close().await;
    assert!(matches!(result, Err(ClientError::VersionConflict { .. })), "got: {result:?}");
    let stored = cluster.manager.read_ledger_metadata(writer.ledger_id()).await.expect("read");
    assert_eq!(stored.value.state(), LedgerState::Open, "a lost CAS leaves the record as is");
    assert_eq!(client.open_handles(), 1, "a lost close keeps the handle registered");
}

// ============================================================================
// close vs delete
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_racing_delete_never_resurrects_the_ledger() {
    for _ in 0..50 {
        let cluster = TestCluster::new(1);
        let client = cluster.client();
        let writer = client.create_ledger(options(1, 1, 1)).await.expect("create");
        writer.add_entry(b"entry").await.expect("add");
        let ledger_id = writer.ledger_id();

        let (closed, deleted) = tokio::join!(writer.close(), client.delete_ledger(ledger_id));

        deleted.expect("delete of an existing ledger succeeds");
        match closed {
            Ok(()) | Err(ClientError::NoSuchLedger { .. }) => {},
            Err(other) => panic!("unexpected close error: {other:?}"),
        }
        assert!(!cluster.manager.contains(ledger_id));
    }
}

// ============================================================================
// concurrent appends
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_get_distinct_contiguous_ids() {
    const APPENDS: i64 = 64;

    let cluster = TestCluster::new(5);
    let client = cluster.client();
    let writer = Arc::new(client.create_ledger(options(3, 2, 2)).await.expect("create"));

    let mut tasks = JoinSet::new();
    for i in 0..APPENDS {
        let writer = Arc::clone(&writer);
        tasks.spawn(async move { writer.add_entry(format!("{i}").as_bytes()).await });
    }
    let mut ids = BTreeSet::new();
    while let Some(joined) = tasks.join_next().await {
        let entry_id = joined.expect("task panicked").expect("append");
        assert!(ids.insert(entry_id), "duplicate entry id {entry_id}");
    }

    assert_eq!(ids, (0..APPENDS).collect::<BTreeSet<_>>());
    assert_eq!(writer.last_add_confirmed(), APPENDS - 1);
    writer.close().await.expect("close");

    let reader = client
        .open_ledger(writer.ledger_id(), DigestType::Dummy, TEST_PASSWORD)
        .await
        .expect("open");
    let entries =
        reader.read_entries(0, APPENDS - 1).expect("range").try_collect().await.expect("read");
    assert_eq!(entries.len() as i64, APPENDS);
    let total: u64 = entries.iter().map(|e| e.payload().len() as u64).sum();
    assert_eq!(reader.length(), total);
    assert_eq!(entries.last().expect("entries").length(), total);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_append_fails_every_later_append() {
    let cluster = TestCluster::new(1);
    let client = cluster.client();
    let writer = Arc::new(client.create_ledger(options(1, 1, 1)).await.expect("create"));
    writer.add_entry(b"ok").await.expect("add");
    let bookie = writer.metadata().ensemble_at(0)[0].clone();
    cluster.bookies.set_available(&bookie, false);

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let writer = Arc::clone(&writer);
        tasks.spawn(async move { writer.add_entry(b"doomed").await });
    }
    while let Some(joined) = tasks.join_next().await {
        assert!(joined.expect("task panicked").is_err());
    }

    cluster.bookies.set_available(&bookie, true);
    assert!(writer.add_entry(b"after").await.is_err(), "a broken handle stays broken");
    assert_eq!(writer.last_add_confirmed(), 0);
}

// ============================================================================
// stress
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore = "stress test; run with --ignored"]
async fn stress_many_ledgers_in_parallel() {
    const LEDGERS: usize = 200;
    const ENTRIES: usize = 20;

    let cluster = TestCluster::new(6);
    let client = cluster.client();

    let mut tasks = JoinSet::new();
    for _ in 0..LEDGERS {
        let client = client.clone();
        tasks.spawn(async move {
            let writer = client.create_ledger(options(3, 3, 2)).await?;
            for i in 0..ENTRIES {
                writer.add_entry(format!("{i}").as_bytes()).await?;
            }
            writer.close().await?;
            let reader =
                client.open_ledger(writer.ledger_id(), DigestType::Dummy, TEST_PASSWORD).await?;
            reader.read_entries(0, ENTRIES as i64 - 1)?.try_collect().await.map(|e| e.len())
        });
    }
    while let Some(joined) = tasks.join_next().await {
        assert_eq!(joined.expect("task panicked").expect("ledger round trip"), ENTRIES);
    }

    let snapshot = client.metrics().snapshot();
    assert_eq!(snapshot.create.count, LEDGERS as u64);
    assert_eq!(snapshot.add_entry.count, (LEDGERS * ENTRIES) as u64);
    assert_eq!(client.open_handles(), 0, "dropped handles unregister themselves");
}
