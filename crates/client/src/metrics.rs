//! Client metrics.
//!
//! [`Metrics`] counts lifecycle operations, entry appends and reads, their
//! failures, ensemble changes and integrity failures. Counters are lock-free
//! atomics updated with `Ordering::Relaxed`: each counter is independent and
//! only ever incremented, so a [`snapshot`](Metrics::snapshot) may observe
//! counters from slightly different instants, which is fine for telemetry.
//!
//! ```
//! use std::time::Duration;
//! use ledgerkit_client::metrics::{Metrics, Operation};
//!
//! let metrics = Metrics::new();
//! metrics.record(Operation::Create, Duration::from_micros(250), true);
//! metrics.record(Operation::Open, Duration::from_micros(90), false);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.create.count, 1);
//! assert_eq!(snapshot.open.failures, 1);
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

/// Operations tracked by [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `LedgerClient::create_ledger`.
    Create,
    /// `LedgerClient::open_ledger` and `open_ledger_no_recovery`.
    Open,
    /// `LedgerHandle::close`.
    Close,
    /// `LedgerClient::delete_ledger`.
    Delete,
    /// One entry append.
    AddEntry,
    /// One entry read.
    ReadEntry,
}

impl Operation {
    const ALL: [Operation; 6] = [
        Operation::Create,
        Operation::Open,
        Operation::Close,
        Operation::Delete,
        Operation::AddEntry,
        Operation::ReadEntry,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Default)]
struct OperationCounters {
    count: AtomicU64,
    failures: AtomicU64,
    latency_us: AtomicU64,
}

impl OperationCounters {
    fn snapshot(&self) -> OperationSnapshot {
        OperationSnapshot {
            count: self.count.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            latency_us: self.latency_us.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters of one [`Operation`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationSnapshot {
    /// Completed operations, successful or not.
    pub count: u64,
    /// Operations that returned an error.
    pub failures: u64,
    /// Cumulative latency in microseconds.
    pub latency_us: u64,
}

impl OperationSnapshot {
    /// Average latency in microseconds, `0.0` before the first operation.
    #[must_use]
    pub fn avg_latency_us(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.latency_us as f64 / self.count as f64 }
    }
}

/// Point-in-time view of every client counter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Ledger creations.
    pub create: OperationSnapshot,
    /// Ledger opens, with or without recovery.
    pub open: OperationSnapshot,
    /// Handle closes.
    pub close: OperationSnapshot,
    /// Ledger deletions.
    pub delete: OperationSnapshot,
    /// Entry appends.
    pub add_entry: OperationSnapshot,
    /// Entry reads.
    pub read_entry: OperationSnapshot,
    /// Bookie replacements written to metadata.
    pub ensemble_changes: u64,
    /// Entry copies that failed verification.
    pub digest_failures: u64,
    /// Metadata reads retried after a transient failure.
    pub metadata_retries: u64,
    /// Recoveries run by `open_ledger`.
    pub recoveries: u64,
}

/// Lock-free collector of client counters.
///
/// Cloning is cheap; clones share counters.
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    operations: [OperationCounters; Operation::ALL.len()],
    ensemble_changes: AtomicU64,
    digest_failures: AtomicU64,
    metadata_retries: AtomicU64,
    recoveries: AtomicU64,
}

impl Metrics {
    /// Creates a collector with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed operation.
    pub fn record(&self, operation: Operation, duration: Duration, succeeded: bool) {
        let counters = &self.inner.operations[operation.index()];
        counters.count.fetch_add(1, Ordering::Relaxed);
        counters.latency_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if !succeeded {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a bookie replacement.
    pub fn record_ensemble_change(&self) {
        self.inner.ensemble_changes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an entry copy that failed verification.
    pub fn record_digest_failure(&self) {
        self.inner.digest_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a retried metadata read.
    pub fn record_retry(&self) {
        self.inner.metadata_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a recovery run.
    pub fn record_recovery(&self) {
        self.inner.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current value of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let ops = &self.inner.operations;
        MetricsSnapshot {
            create: ops[Operation::Create.index()].snapshot(),
            open: ops[Operation::Open.index()].snapshot(),
            close: ops[Operation::Close.index()].snapshot(),
            delete: ops[Operation::Delete.index()].snapshot(),
            add_entry: ops[Operation::AddEntry.index()].snapshot(),
            read_entry: ops[Operation::ReadEntry.index()].snapshot(),
            ensemble_changes: self.inner.ensemble_changes.load(Ordering::Relaxed),
            digest_failures: self.inner.digest_failures.load(Ordering::Relaxed),
            metadata_retries: self.inner.metadata_retries.load(Ordering::Relaxed),
            recoveries: self.inner.recoveries.load(Ordering::Relaxed),
        }
    }

    /// Logs current counters at INFO level.
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        tracing::info!(
            create = s.create.count,
            open = s.open.count,
            close = s.close.count,
            delete = s.delete.count,
            add_entry = s.add_entry.count,
            add_entry_failures = s.add_entry.failures,
            read_entry = s.read_entry.count,
            read_entry_failures = s.read_entry.failures,
            ensemble_changes = s.ensemble_changes,
            digest_failures = s.digest_failures,
            "ledger client metrics snapshot"
        );
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").field("snapshot", &self.snapshot()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_indices_are_distinct() {
        let mut seen: Vec<usize> = Operation::ALL.iter().map(|op| op.index()).collect();
        seen.dedup();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_record_counts_failures_and_latency() {
        let metrics = Metrics::new();
        metrics.record(Operation::AddEntry, Duration::from_micros(100), true);
        metrics.record(Operation::AddEntry, Duration::from_micros(300), false);

        let add = metrics.snapshot().add_entry;
        assert_eq!(add.count, 2);
        assert_eq!(add.failures, 1);
        assert_eq!(add.avg_latency_us(), 200.0);
        assert_eq!(metrics.snapshot().read_entry, OperationSnapshot::default());
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.record_ensemble_change();
        clone.record_digest_failure();
        clone.record_retry();
        clone.record_recovery();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.ensemble_changes, 1);
        assert_eq!(snapshot.digest_failures, 1);
        assert_eq!(snapshot.metadata_retries, 1);
        assert_eq!(snapshot.recoveries, 1);
    }
}
