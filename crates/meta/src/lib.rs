//! Ledger metadata model and metadata-store contract.
//!
//! This crate holds everything the ledgerkit client shares with a
//! coordination service: the [`LedgerMetadata`] record, its identity and
//! version types, and the [`LedgerManager`] / [`LedgerIdGenerator`] traits a
//! store implements.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ledgerkit-client                         │
//! │     create / open / delete ledgers, append, read, close     │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    ledgerkit-meta                           │
//! │   LedgerMetadata │ LedgerManager trait │ LedgerIdGenerator  │
//! │        (versioned records, compare-and-swap writes)         │
//! ├───────────────────────┬─────────────────────────────────────┤
//! │  MemoryLedgerManager  │    coordination-service store       │
//! │      (testing)        │          (production)               │
//! └───────────────────────┴─────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use bytes::Bytes;
//! use ledgerkit_meta::{
//!     BookieId, LedgerIdGenerator, LedgerManager, LedgerMetadata, MemoryLedgerManager,
//!     MonotonicIdGenerator, QuorumConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ids = MonotonicIdGenerator::new();
//!     let manager = MemoryLedgerManager::new();
//!
//!     let id = ids.generate_ledger_id().await?;
//!     let metadata = LedgerMetadata::builder()
//!         .ledger_id(id)
//!         .quorum(QuorumConfig::new(3, 2, 2)?)
//!         .master_key(Bytes::from_static(b"derived-key"))
//!         .ensemble(vec!["b0".into(), "b1".into(), BookieId::new("b2")])
//!         .build()?;
//!
//!     let created = manager.create_ledger_metadata(id, &metadata).await?;
//!
//!     // Every transition is a compare-and-swap against the version read.
//!     let closed = created.value.close(-1, 0)?;
//!     manager.write_ledger_metadata(id, &closed, created.version).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (sample metadata, assertion macros,
//!   [`FaultyLedgerManager`](testutil::FaultyLedgerManager)) and the `conformance` suite.
//! - **`failpoints`**: Activates the fail points evaluated by [`MemoryLedgerManager`].

#![deny(unsafe_code)]

#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod error;
pub mod manager;
pub mod memory;
pub mod metadata;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod types;

pub use error::{BoxError, MetaError, MetaResult};
pub use manager::{LedgerIdGenerator, LedgerManager};
pub use memory::{MemoryLedgerManager, MonotonicIdGenerator};
pub use metadata::{DigestType, LedgerMetadata, LedgerState, QuorumConfig, QuorumError};
pub use types::{BookieId, EntryId, INVALID_ENTRY_ID, InvalidLedgerId, LedgerId, Version, Versioned};
