//! Shared test utilities for ledger-client testing.
//!
//! [`TestCluster`] wires a [`LedgerClient`] to in-memory collaborators that
//! tests can inspect and break: a [`MemoryLedgerManager`], a
//! [`MonotonicIdGenerator`], a [`MemoryBookieCluster`] and a
//! [`RandomEnsembleProvider`] over the same bookies. It is feature-gated
//! behind `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! ledgerkit-client = { path = "../client", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use ledgerkit_client::testutil::{TestCluster, options};
//!
//! # async fn example() -> ledgerkit_client::ClientResult<()> {
//! let cluster = TestCluster::new(3);
//! let client = cluster.client();
//! let handle = client.create_ledger(options(3, 2, 2)).await?;
//! handle.add_entry(b"hello").await?;
//! handle.close().await?;
//! # Ok(())
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use ledgerkit_meta::{
    DigestType, EntryId, LedgerId, LedgerManager, MemoryLedgerManager, MonotonicIdGenerator,
};

use crate::{
    bookie::MemoryBookieCluster,
    client::{CreateLedgerOptions, LedgerClient},
    config::{ClientConfig, RetryConfig},
    ensemble::{EnsembleProvider, RandomEnsembleProvider},
    metrics::Metrics,
};

/// Password used by [`options`].
pub const TEST_PASSWORD: &[u8] = b"password";

/// Configuration with short timeouts and near-instant retries.
///
/// # Panics
///
/// Never; the values are valid.
#[must_use]
pub fn fast_config() -> ClientConfig {
    ClientConfig::builder()
        .metadata_timeout(Duration::from_secs(2))
        .add_entry_timeout(Duration::from_secs(2))
        .read_entry_timeout(Duration::from_secs(2))
        .metadata_retry(
            RetryConfig::builder()
                .max_retries(3)
                .initial_backoff(Duration::from_millis(1))
                .max_backoff(Duration::from_millis(5))
                .build(),
        )
        .build()
        .expect("fast test configuration is valid")
}

/// Options for a `DUMMY`-digest ledger protected by [`TEST_PASSWORD`].
#[must_use]
pub fn options(ensemble: u32, write_quorum: u32, ack_quorum: u32) -> CreateLedgerOptions {
    CreateLedgerOptions::builder()
        .ensemble_size(ensemble)
        .write_quorum_size(write_quorum)
        .ack_quorum_size(ack_quorum)
        .digest_type(DigestType::Dummy)
        .password(TEST_PASSWORD)
        .build()
}

/// In-memory collaborators shared by any number of clients.
#[derive(Debug, Clone)]
pub struct TestCluster {
    /// Metadata store.
    pub manager: MemoryLedgerManager,
    /// Ledger id source.
    pub ids: MonotonicIdGenerator,
    /// Storage nodes.
    pub bookies: MemoryBookieCluster,
    /// Placement over [`bookies`](Self::bookies).
    pub provider: Arc<RandomEnsembleProvider>,
}

impl TestCluster {
    /// Creates a cluster with `bookie_count` available bookies.
    #[must_use]
    pub fn new(bookie_count: usize) -> Self {
        let bookies = MemoryBookieCluster::with_bookies(bookie_count);
        let provider = Arc::new(RandomEnsembleProvider::new(bookies.bookie_ids()));
        Self {
            manager: MemoryLedgerManager::new(),
            ids: MonotonicIdGenerator::new(),
            bookies,
            provider,
        }
    }

    /// A client with [`fast_config`].
    #[must_use]
    pub fn client(&self) -> LedgerClient {
        self.client_with_config(fast_config())
    }

    /// A client with `config`.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    #[must_use]
    pub fn client_with_config(&self, config: ClientConfig) -> LedgerClient {
        self.client_over(Arc::new(self.manager.clone()), config)
    }

    /// A client whose metadata store is `manager` instead of
    /// [`manager`](Self::manager), e.g. a
    /// [`FaultyLedgerManager`](ledgerkit_meta::testutil::FaultyLedgerManager)
    /// wrapping it.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    #[must_use]
    pub fn client_over(
        &self,
        manager: Arc<dyn LedgerManager>,
        config: ClientConfig,
    ) -> LedgerClient {
        let provider: Arc<dyn EnsembleProvider> = self.provider.clone();
        LedgerClient::builder()
            .config(config)
            .ledger_manager(manager)
            .id_generator(Arc::new(self.ids.clone()))
            .ensemble_provider(provider)
            .bookie_client(Arc::new(self.bookies.clone()))
            .metrics(Metrics::new())
            .build()
            .expect("test client configuration is valid")
    }

    /// Bookies holding a copy of the entry.
    #[must_use]
    pub fn copies(&self, ledger_id: LedgerId, entry_id: EntryId) -> usize {
        self.bookies
            .bookie_ids()
            .iter()
            .filter(|bookie| self.bookies.has_entry(bookie, ledger_id, entry_id))
            .count()
    }

    /// Waits until `copies` bookies hold the entry.
    ///
    /// Appends return after `Qa` acknowledgements; writes to the rest of the
    /// write set finish in the background.
    ///
    /// # Panics
    ///
    /// Panics if the copies do not appear within five seconds.
    pub async fn await_copies(&self, ledger_id: LedgerId, entry_id: EntryId, copies: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.copies(ledger_id, entry_id) < copies {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("entry copies did not appear");
    }
}

/// Assert that a [`ClientResult`](crate::ClientResult) failed with the given
/// [`ClientError`](crate::ClientError) variant.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use ledgerkit_client::{ClientError, ClientResult, assert_client_err};
///
/// let result: ClientResult<()> = Err(ClientError::ClientClosed);
/// assert_client_err!(result, ClientError::ClientClosed);
/// ```
#[macro_export]
macro_rules! assert_client_err {
    ($result:expr, $pattern:pat) => {{
        let result = $result;
        assert!(
            matches!(result, Err($pattern)),
            "expected {}, got: {:?}",
            stringify!($pattern),
            result,
        );
    }};
    ($result:expr, $pattern:pat, $msg:expr) => {{
        let result = $result;
        assert!(
            matches!(result, Err($pattern)),
            "{}: expected {}, got: {:?}",
            $msg,
            stringify!($pattern),
            result,
        );
    }};
}

/// Assert that a [`ClientResult`](crate::ClientResult) is `Ok` and return the
/// inner value.
#[macro_export]
macro_rules! assert_client_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got ClientError: {e:?}"),
        }
    };
}
