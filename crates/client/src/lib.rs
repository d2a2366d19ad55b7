//! Client-side ledger lifecycle manager for a quorum-replicated log store.
//!
//! A ledger is an append-only sequence of entries replicated over an
//! ensemble of storage nodes (bookies). This crate creates, opens, appends
//! to, reads, recovers, closes and deletes ledgers, coordinating through a
//! [`LedgerManager`](ledgerkit_meta::LedgerManager) whose versioned records
//! make every state transition a compare-and-swap.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        LedgerClient                         │
//! │      create_ledger │ open_ledger │ delete_ledger │ admin    │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │         LedgerHandle         │     recovery (fence, read    │
//! │  add_entry │ read_entries │  │      forward, close)         │
//! │  close │ ensemble changes    │                              │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │   LedgerManager │ LedgerIdGenerator │ EnsembleProvider      │
//! │  BookieClient  (collaborator traits, injected at build)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lifecycle transitions of one ledger are applied in order per client, and
//! a transition that loses a compare-and-swap race fails with
//! [`ClientError::VersionConflict`] rather than overwriting.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use ledgerkit_client::{
//!     CreateLedgerOptions, LedgerClient, MemoryBookieCluster, RandomEnsembleProvider,
//! };
//! use ledgerkit_meta::{DigestType, MemoryLedgerManager, MonotonicIdGenerator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bookies = MemoryBookieCluster::with_bookies(3);
//!     let client = LedgerClient::builder()
//!         .ledger_manager(Arc::new(MemoryLedgerManager::new()))
//!         .id_generator(Arc::new(MonotonicIdGenerator::new()))
//!         .ensemble_provider(Arc::new(RandomEnsembleProvider::new(bookies.bookie_ids())))
//!         .bookie_client(Arc::new(bookies))
//!         .build()?;
//!
//!     let options = CreateLedgerOptions::builder()
//!         .ensemble_size(3)
//!         .write_quorum_size(2)
//!         .ack_quorum_size(2)
//!         .digest_type(DigestType::Crc32c)
//!         .password(b"secret")
//!         .build();
//!     let writer = client.create_ledger(options).await?;
//!     writer.add_entry(b"first").await?;
//!     writer.add_entry(b"second").await?;
//!     writer.close().await?;
//!
//!     let reader = client.open_ledger(writer.ledger_id(), DigestType::Crc32c, b"secret").await?;
//!     let entries = reader.read_entries(0, reader.last_add_confirmed())?.try_collect().await?;
//!     assert_eq!(entries.len(), 2);
//!
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module ([`TestCluster`](testutil::TestCluster),
//!   assertion macros) and the metadata crate's test utilities.
//! - **`failpoints`**: Activates the fail points evaluated by the client, the in-memory
//!   bookies and the in-memory metadata store.

#![deny(unsafe_code)]

mod admin;
pub mod bookie;
mod client;
pub mod config;
mod context;
pub mod digest;
pub mod ensemble;
mod entry;
pub mod error;
mod handle;
pub mod metrics;
mod read;
mod recovery;
mod retry;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;

pub use admin::LedgerAdmin;
pub use bookie::{AddMode, BookieClient, BookieError, MemoryBookieCluster};
pub use client::{CreateLedgerOptions, LedgerClient};
pub use config::{ClientConfig, RetryConfig};
pub use digest::DigestManager;
pub use ensemble::{EnsembleError, EnsembleProvider, RandomEnsembleProvider};
pub use entry::{EntryFrame, LedgerEntry};
pub use error::{BoxError, ClientError, ClientResult, ConfigError};
pub use handle::LedgerHandle;
pub use metrics::{Metrics, MetricsSnapshot};
pub use read::LedgerEntries;
