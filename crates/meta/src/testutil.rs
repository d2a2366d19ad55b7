//! Shared test utilities for metadata-store testing.
//!
//! This module provides builders for sample metadata, assertion macros over
//! [`MetaResult`], and [`FaultyLedgerManager`], a wrapper that injects
//! connection failures and hangs into any [`LedgerManager`]. It is
//! feature-gated behind `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! ledgerkit-meta = { path = "../meta", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use ledgerkit_meta::testutil::{bookie_ids, ledger_id, sample_metadata};
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    error::{MetaError, MetaResult},
    manager::LedgerManager,
    metadata::{DigestType, LedgerMetadata, QuorumConfig},
    types::{BookieId, LedgerId, Version, Versioned},
};

/// Builds a [`LedgerId`] from a literal.
///
/// # Panics
///
/// Panics if `raw` is negative.
#[must_use]
pub fn ledger_id(raw: i64) -> LedgerId {
    LedgerId::try_from(raw).expect("test ledger id must be non-negative")
}

/// Creates `count` distinct bookie ids named `bookie-0`, `bookie-1`, ...
#[must_use]
pub fn bookie_ids(count: usize) -> Vec<BookieId> {
    (0..count).map(|i| BookieId::new(format!("bookie-{i}"))).collect()
}

/// Creates OPEN metadata with a DUMMY digest and an `E`-member ensemble.
///
/// # Panics
///
/// Panics if the quorum sizes are invalid.
#[must_use]
pub fn sample_metadata(
    ledger_id: LedgerId,
    ensemble_size: u32,
    write_quorum: u32,
    ack_quorum: u32,
) -> LedgerMetadata {
    LedgerMetadata::builder()
        .ledger_id(ledger_id)
        .quorum(
            QuorumConfig::new(ensemble_size, write_quorum, ack_quorum)
                .expect("test quorum must be valid"),
        )
        .digest_type(DigestType::Dummy)
        .master_key(Bytes::from_static(b"test-master-key"))
        .ensemble(bookie_ids(ensemble_size as usize))
        .build()
        .expect("sample metadata must be valid")
}

/// Assert that a [`MetaResult`] is a [`MetaError::VersionMismatch`].
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use ledgerkit_meta::{LedgerId, MetaError, MetaResult, Version, assert_version_mismatch};
///
/// let result: MetaResult<()> =
///     Err(MetaError::version_mismatch(LedgerId::MIN, Version::new(1), Version::new(2)));
/// assert_version_mismatch!(result);
/// ```
#[macro_export]
macro_rules! assert_version_mismatch {
    ($result:expr) => {{
        let result = $result;
        assert!(
            matches!(result, Err($crate::MetaError::VersionMismatch { .. })),
            "expected MetaError::VersionMismatch, got: {:?}",
            result,
        );
    }};
    ($result:expr, $msg:expr) => {{
        let result = $result;
        assert!(
            matches!(result, Err($crate::MetaError::VersionMismatch { .. })),
            "{}: expected MetaError::VersionMismatch, got: {:?}",
            $msg,
            result,
        );
    }};
}

/// Assert that a [`MetaResult`] is a [`MetaError::NotFound`].
#[macro_export]
macro_rules! assert_meta_not_found {
    ($result:expr) => {{
        let result = $result;
        assert!(
            matches!(result, Err($crate::MetaError::NotFound { .. })),
            "expected MetaError::NotFound, got: {:?}",
            result,
        );
    }};
}

/// Assert that a [`MetaResult`] is `Ok` and return the inner value.
#[macro_export]
macro_rules! assert_meta_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got MetaError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got MetaError: {e:?}", $msg),
        }
    };
}

/// [`LedgerManager`] wrapper that injects faults into an inner store.
///
/// Faults are toggled at runtime, so a test can let setup succeed and then
/// break the store for the operation under test.
///
/// | Fault | Effect |
/// |-------|--------|
/// | [`hang_creates`](Self::hang_creates) | `create_ledger_metadata` never completes |
/// | [`hang_writes`](Self::hang_writes) | `write_ledger_metadata` never completes |
/// | [`fail_next_reads`](Self::fail_next_reads) | the next `n` reads fail with a connection error |
/// | [`fail_next_writes`](Self::fail_next_writes) | the next `n` writes fail with a connection error |
pub struct FaultyLedgerManager<M> {
    inner: M,
    hang_creates: AtomicBool,
    hang_writes: AtomicBool,
    failing_reads: AtomicU32,
    failing_writes: AtomicU32,
    reads: AtomicU32,
    writes: AtomicU32,
}

impl<M: LedgerManager> FaultyLedgerManager<M> {
    /// Wraps `inner` with every fault disabled.
    pub fn new(inner: M) -> Arc<Self> {
        Arc::new(Self {
            inner,
            hang_creates: AtomicBool::new(false),
            hang_writes: AtomicBool::new(false),
            failing_reads: AtomicU32::new(0),
            failing_writes: AtomicU32::new(0),
            reads: AtomicU32::new(0),
            writes: AtomicU32::new(0),
        })
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &M {
        &self.inner
    }

    /// Makes every subsequent create hang forever (or stop hanging).
    pub fn hang_creates(&self, hang: bool) {
        self.hang_creates.store(hang, Ordering::SeqCst);
    }

    /// Makes every subsequent compare-and-swap hang forever (or stop hanging).
    pub fn hang_writes(&self, hang: bool) {
        self.hang_writes.store(hang, Ordering::SeqCst);
    }

    /// Fails the next `count` reads with [`MetaError::Connection`].
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Fails the next `count` writes with [`MetaError::Connection`].
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of reads attempted, including injected failures.
    pub fn read_attempts(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of writes attempted, including injected failures.
    pub fn write_attempts(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
    }
}

#[async_trait]
impl<M: LedgerManager> LedgerManager for FaultyLedgerManager<M> {
    async fn create_ledger_metadata(
        &self,
        ledger_id: LedgerId,
        metadata: &LedgerMetadata,
    ) -> MetaResult<Versioned<LedgerMetadata>> {
        if self.hang_creates.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.create_ledger_metadata(ledger_id, metadata).await
    }

    async fn read_ledger_metadata(
        &self,
        ledger_id: LedgerId,
    ) -> MetaResult<Versioned<LedgerMetadata>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_reads) {
            return Err(MetaError::connection("injected read failure"));
        }
        self.inner.read_ledger_metadata(ledger_id).await
    }

    async fn write_ledger_metadata(
        &self,
        ledger_id: LedgerId,
        metadata: &LedgerMetadata,
        expected: Version,
    ) -> MetaResult<Versioned<LedgerMetadata>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.hang_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if Self::take_failure(&self.failing_writes) {
            return Err(MetaError::connection("injected write failure"));
        }
        self.inner.write_ledger_metadata(ledger_id, metadata, expected).await
    }

    async fn remove_ledger_metadata(&self, ledger_id: LedgerId) -> MetaResult<()> {
        self.inner.remove_ledger_metadata(ledger_id).await
    }

    async fn list_ledgers(&self) -> MetaResult<Vec<LedgerId>> {
        self.inner.list_ledgers().await
    }
}
