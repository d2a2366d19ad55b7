#![allow(clippy::expect_used, clippy::panic)]
//! Entry read tests: admin range reads, handle read bounds, and quorum-read
//! classification of absent and corrupt copies.

use futures::StreamExt;
use ledgerkit_client::{
    ClientError, CreateLedgerOptions, LedgerClient, LedgerHandle, assert_client_err,
    testutil::{TEST_PASSWORD, TestCluster, options},
};
use ledgerkit_meta::{DigestType, LedgerId};
use rstest::rstest;

/// Creates a ledger with `count` entries `"entry-{i}"` and leaves it open.
async fn ledger_with_entries(client: &LedgerClient, count: usize) -> LedgerHandle {
    let handle = client.create_ledger(options(3, 3, 2)).await.expect("create");
    for i in 0..count {
        handle.add_entry(format!("entry-{i}").as_bytes()).await.expect("add");
    }
    handle
}

// ============================================================================
// admin reads
// ============================================================================

#[rstest]
#[case::single_first(0, 0, 1)]
#[case::until_absent(0, -1, 3)]
#[case::first_two(0, 1, 2)]
#[case::single_middle(1, 1, 1)]
#[case::tail(1, 2, 2)]
#[tokio::test]
async fn admin_reads_ranges(#[case] first: i64, #[case] last: i64, #[case] expected: usize) {
    let cluster = TestCluster::new(3);
    let client = cluster.client();
    let handle = ledger_with_entries(&client, 3).await;
    handle.close().await.expect("close");

    let entries = client
        .admin(TEST_PASSWORD)
        .read_entries(handle.ledger_id().get(), first, last)
        .await
        .expect("admin read")
        .try_collect()
        .await
        .expect("entries");

    assert_eq!(entries.len(), expected);
    for (offset, entry) in entries.iter().enumerate() {
        let entry_id = first + offset as i64;
        assert_eq!(entry.entry_id(), entry_id);
        assert_eq!(entry.payload().as_ref(), format!("entry-{entry_id}").as_bytes());
    }
}

#[rstest]
#[case::reversed(0, 1, 0)]
#[case::negative_first_sentinel_last(0, -1, -1)]
#[case::negative_first_below_sentinel(0, -1, -2)]
#[case::negative_first(0, -1, 0)]
#[case::last_below_sentinel(0, 0, -2)]
#[case::negative_ledger(-1, 0, 0)]
#[tokio::test]
async fn admin_rejects_malformed_arguments(
    #[case] ledger_id: i64,
    #[case] first: i64,
    #[case] last: i64,
) {
    let cluster = TestCluster::new(3);
    let client = cluster.client();
    let handle = ledger_with_entries(&client, 3).await;
    assert_eq!(handle.ledger_id().get(), 0);

    assert_client_err!(
        client.admin(TEST_PASSWORD).read_entries(ledger_id, first, last).await,
        ClientError::InvalidArgument { .. }
    );
}

#[tokio::test]
async fn admin_read_of_missing_ledger_is_no_such_ledger() {
    let cluster = TestCluster::new(3);
    let client = cluster.client();

    assert_client_err!(
        client.admin(TEST_PASSWORD).read_entries(4111, 0, 0).await,
        ClientError::NoSuchLedger { .. }
    );
}

#[tokio::test]
async fn admin_read_with_wrong_password_is_invalid_argument() {
    let cluster = TestCluster::new(3);
    let client = cluster.client();
    let handle = ledger_with_entries(&client, 1).await;

    assert_client_err!(
        client.admin(b"wrong".as_slice()).read_entries(handle.ledger_id().get(), 0, 0).await,
        ClientError::InvalidArgument { .. }
    );
}

#[tokio::test]
async fn admin_reads_past_last_add_confirmed_of_open_ledger() {
    let cluster = TestCluster::new(3);
    let client = cluster.client();
    let handle = ledger_with_entries(&client, 3).await;

    let entries = client
        .admin(TEST_PASSWORD)
        .read_entries(handle.ledger_id().get(), 0, -1)
        .await
        .expect("admin read")
        .try_collect()
        .await
        .expect("entries");

    assert_eq!(entries.len(), 3);
    let stored = handle.metadata();
    assert!(!stored.is_closed(), "admin reads must not recover the ledger");
}

#[tokio::test]
async fn admin_bounded_read_past_end_fails_on_first_absent_entry() {
    let cluster = TestCluster::new(3);
    let client = cluster.client();
    let handle = ledger_with_entries(&client, 2).await;
    handle.close().await.expect("close");

    let mut entries = client
        .admin(TEST_PASSWORD)
        .read_entries(handle.ledger_id().get(), 1, 5)
        .await
        .expect("admin read");

    assert_eq!(entries.next().await.expect("one entry").expect("entry").entry_id(), 1);
    assert_client_err!(
        entries.next().await.expect("error item"),
        ClientError::NoSuchEntry { entry_id: 2, .. }
    );
    assert!(entries.next().await.is_none(), "sequence ends after an error");
}

#[tokio::test]
async fn admin_lists_ledgers() {
    let cluster = TestCluster::new(3);
    let client = cluster.client();
    let a = ledger_with_entries(&client, 0).await;
    let b = ledger_with_entries(&client, 0).await;

    let listed = client.admin(TEST_PASSWORD).list_ledgers().await.expect("list");

    assert_eq!(listed, vec![a.ledger_id(), b.ledger_id()]);
}

#[tokio::test]
async fn admin_on_closed_client_is_rejected() {
    let cluster = TestCluster::new(3);
    let client = cluster.client();
    let admin = client.admin(TEST_PASSWORD);
    client.close();

    assert_client_err!(admin.read_entries(0, 0, 0).await, ClientError::ClientClosed);
    assert_client_err!(admin.list_ledgers().await, ClientError::ClientClosed);
}

// ============================================================================
// handle reads
// ============================================================================

#[rstest]
#[case::negative_first(-1, 0)]
#[case::negative_last(0, -1)]
#[case::reversed(1, 0)]
#[tokio::test]
async fn handle_rejects_malformed_ranges(#[case] first: i64, #[case] last: i64) {
    let cluster = TestCluster::new(3);
    let client = cluster.client();
    let handle = ledger_with_entries(&client, 2).await;

    assert_client_err!(handle.read_entries(first, last), ClientError::InvalidArgument { .. });
}

#[tokio::test]
async fn writer_reads_up_to_last_add_confirmed() {
    let cluster = TestCluster::new(3);
    let client = cluster.client();
    let handle = ledger_with_entries(&client, 3).await;
    assert_eq!(handle.last_add_confirmed(), 2);

    let entries = handle.read_entries(0, 2).expect("range").try_collect().await.expect("read");
    let ids: Vec<_> = entries.iter().map(|e| e.entry_id()).collect();
    assert_eq!(ids, vec![0, 1, 2]);

    assert_client_err!(handle.read_entries(1, 3), ClientError::NoSuchEntry { entry_id: 3, .. });
    assert_client_err!(handle.read_entries(5, 7), ClientError::NoSuchEntry { entry_id: 5, .. });
}

#[tokio::test]
async fn closed_ledger_is_readable_through_open_handle() {
    let cluster = TestCluster::new(3);
    let client = cluster.client();
    let writer = ledger_with_entries(&client, 4).await;
    writer.close().await.expect("close");

    let reader = client
        .open_ledger(writer.ledger_id(), DigestType::Dummy, TEST_PASSWORD)
        .await
        .expect("open");
    let payloads: Vec<_> = reader
        .read_entries(0, 3)
        .expect("range")
        .into_stream()
        .map(|entry| entry.expect("entry").into_payload())
        .collect()
        .await;

    assert_eq!(payloads.len(), 4);
    assert_eq!(payloads[3].as_ref(), b"entry-3");
    assert_client_err!(reader.read_entries(0, 4), ClientError::NoSuchEntry { entry_id: 4, .. });
}

#[tokio::test]
async fn read_after_handle_close_is_ledger_closed() {
    let cluster = TestCluster::new(3);
    let client = cluster.client();
    let handle = ledger_with_entries(&client, 1).await;
    handle.close().await.expect("close");

    assert_client_err!(handle.read_entries(0, 0), ClientError::LedgerClosed { .. });
}

#[tokio::test]
async fn read_after_client_close_is_client_closed() {
    let cluster = TestCluster::new(3);
    let client = cluster.client();
    let handle = ledger_with_entries(&client, 2).await;
    let mut entries = handle.read_entries(0, 1).expect("range");
    assert!(entries.next().await.expect("first").is_ok());

    client.close();

    assert_client_err!(entries.next().await.expect("error item"), ClientError::ClientClosed);
    assert_client_err!(handle.read_entries(0, 0), ClientError::ClientClosed);
}

// ============================================================================
// quorum read classification
// ============================================================================

/// Opens a closed single-entry ledger replicated to all of `E = Qw = 3`
/// bookies with `Qa = 2`.
async fn closed_single_entry(
    cluster: &TestCluster,
    digest_type: DigestType,
) -> (LedgerClient, LedgerId) {
    let client = cluster.client();
    let options = CreateLedgerOptions::builder()
        .ensemble_size(3)
        .write_quorum_size(3)
        .ack_quorum_size(2)
        .digest_type(digest_type)
        .password(TEST_PASSWORD)
        .build();
    let handle = client.create_ledger(options).await.expect("create");
    handle.add_entry(b"payload").await.expect("add");
    handle.close().await.expect("close");
    cluster.await_copies(handle.ledger_id(), 0, 3).await;
    (client, handle.ledger_id())
}

#[tokio::test]
async fn one_corrupt_copy_is_tolerated() {
    let cluster = TestCluster::new(3);
    let (client, ledger_id) = closed_single_entry(&cluster, DigestType::Crc32c).await;
    let bookies = cluster.bookies.bookie_ids();
    assert!(cluster.bookies.corrupt_entry(&bookies[0], ledger_id, 0));

    let reader = client.open_ledger(ledger_id, DigestType::Crc32c, TEST_PASSWORD).await;
    let entries = reader.expect("open").read_entries(0, 0).expect("range");
    let entries = entries.try_collect().await.expect("a valid copy remains");

    assert_eq!(entries[0].payload().as_ref(), b"payload");
}

#[tokio::test]
async fn all_copies_corrupt_is_digest_mismatch() {
    let cluster = TestCluster::new(3);
    let (client, ledger_id) = closed_single_entry(&cluster, DigestType::Mac).await;
    for bookie in cluster.bookies.bookie_ids() {
        assert!(cluster.bookies.corrupt_entry(&bookie, ledger_id, 0));
    }

    let reader = client.open_ledger(ledger_id, DigestType::Mac, TEST_PASSWORD).await;
    let result = reader.expect("open").read_entries(0, 0).expect("range").try_collect().await;

    assert_client_err!(result, ClientError::DigestMismatch { entry_id: 0, .. });
    assert_eq!(client.metrics().snapshot().digest_failures, 3);
}

#[tokio::test]
async fn corrupt_copy_is_not_reported_as_absent() {
    let cluster = TestCluster::new(3);
    let (client, ledger_id) = closed_single_entry(&cluster, DigestType::Crc32).await;
    let bookies = cluster.bookies.bookie_ids();
    // One copy absent is below the Qw - Qa + 1 = 2 absence threshold.
    assert!(cluster.bookies.drop_entry(&bookies[0], ledger_id, 0));
    assert!(cluster.bookies.corrupt_entry(&bookies[1], ledger_id, 0));
    assert!(cluster.bookies.corrupt_entry(&bookies[2], ledger_id, 0));

    let reader = client.open_ledger(ledger_id, DigestType::Crc32, TEST_PASSWORD).await;
    let result = reader.expect("open").read_entries(0, 0).expect("range").try_collect().await;

    assert_client_err!(result, ClientError::DigestMismatch { .. });
}

#[tokio::test]
async fn enough_absent_copies_is_no_such_entry() {
    let cluster = TestCluster::new(3);
    let (client, ledger_id) = closed_single_entry(&cluster, DigestType::Crc32).await;
    let bookies = cluster.bookies.bookie_ids();
    assert!(cluster.bookies.drop_entry(&bookies[0], ledger_id, 0));
    assert!(cluster.bookies.drop_entry(&bookies[1], ledger_id, 0));

    let reader = client.open_ledger(ledger_id, DigestType::Crc32, TEST_PASSWORD).await;
    let result = reader.expect("open").read_entries(0, 0).expect("range").try_collect().await;

    // The remaining copy wins before absence is considered.
    assert_eq!(result.expect("one copy left").len(), 1);

    assert!(cluster.bookies.drop_entry(&bookies[2], ledger_id, 0));
    let reader = client.open_ledger(ledger_id, DigestType::Crc32, TEST_PASSWORD).await;
    let result = reader.expect("open").read_entries(0, 0).expect("range").try_collect().await;
    assert_client_err!(result, ClientError::NoSuchEntry { entry_id: 0, .. });
}

#[tokio::test]
async fn unreachable_copies_are_not_enough_replicas() {
    let cluster = TestCluster::new(3);
    let (client, ledger_id) = closed_single_entry(&cluster, DigestType::Crc32).await;
    let bookies = cluster.bookies.bookie_ids();
    let reader = client
        .open_ledger(ledger_id, DigestType::Crc32, TEST_PASSWORD)
        .await
        .expect("open");
    for bookie in &bookies {
        cluster.bookies.set_available(bookie, false);
    }

    let result = reader.read_entries(0, 0).expect("range").try_collect().await;

    assert_client_err!(result, ClientError::NotEnoughReplicas { entry_id: 0, .. });
}
