//! Metadata-store contract.
//!
//! This module defines the two collaborators the client needs from a
//! coordination service: [`LedgerManager`], a versioned key/value store of
//! [`LedgerMetadata`] records, and [`LedgerIdGenerator`], a source of unique
//! ledger ids.
//!
//! # Consistency Model
//!
//! Every record carries a [`Version`]. Writes are compare-and-swap: the caller
//! presents the version it read and the store rejects the write with
//! [`MetaError::VersionMismatch`] if another writer got there first. Creation
//! and removal are unconditional on version but fail with
//! [`MetaError::AlreadyExists`] and [`MetaError::NotFound`] respectively.
//!
//! # Implementing a Store
//!
//! 1. Implement [`LedgerManager`] over the coordination service
//! 2. Call [`LedgerMetadata::validate`] on every decoded record
//! 3. Map service errors to [`MetaError`], using `Connection`/`Timeout` only
//!    for failures a retry may fix
//!
//! See [`MemoryLedgerManager`](crate::MemoryLedgerManager) for a reference
//! implementation, and run the checks in `conformance` (behind the
//! `testutil` feature) against any new store.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::MetaResult,
    metadata::LedgerMetadata,
    types::{LedgerId, Version, Versioned},
};

/// Versioned store of ledger metadata.
///
/// | Method | Description |
/// |--------|-------------|
/// | [`create_ledger_metadata`](LedgerManager::create_ledger_metadata) | Store a new record |
/// | [`read_ledger_metadata`](LedgerManager::read_ledger_metadata) | Fetch a record and its version |
/// | [`write_ledger_metadata`](LedgerManager::write_ledger_metadata) | Compare-and-swap a record |
/// | [`remove_ledger_metadata`](LedgerManager::remove_ledger_metadata) | Delete a record |
/// | [`list_ledgers`](LedgerManager::list_ledgers) | Enumerate stored ledger ids |
#[async_trait]
pub trait LedgerManager: Send + Sync {
    /// Stores metadata for a ledger that has none yet.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::AlreadyExists`](crate::MetaError::AlreadyExists)
    /// if a record is already stored under `ledger_id`.
    async fn create_ledger_metadata(
        &self,
        ledger_id: LedgerId,
        metadata: &LedgerMetadata,
    ) -> MetaResult<Versioned<LedgerMetadata>>;

    /// Reads the current record of a ledger.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::NotFound`](crate::MetaError::NotFound) if no
    /// record exists.
    async fn read_ledger_metadata(&self, ledger_id: LedgerId)
    -> MetaResult<Versioned<LedgerMetadata>>;

    /// Replaces the record of a ledger if its version is still `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::VersionMismatch`](crate::MetaError::VersionMismatch)
    /// if the stored version differs from `expected`, or
    /// [`MetaError::NotFound`](crate::MetaError::NotFound) if the record was
    /// removed.
    async fn write_ledger_metadata(
        &self,
        ledger_id: LedgerId,
        metadata: &LedgerMetadata,
        expected: Version,
    ) -> MetaResult<Versioned<LedgerMetadata>>;

    /// Removes the record of a ledger.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::NotFound`](crate::MetaError::NotFound) if no
    /// record exists.
    async fn remove_ledger_metadata(&self, ledger_id: LedgerId) -> MetaResult<()>;

    /// Lists every ledger id with stored metadata, in ascending order.
    async fn list_ledgers(&self) -> MetaResult<Vec<LedgerId>>;
}

/// Source of process-unique ledger ids.
#[async_trait]
pub trait LedgerIdGenerator: Send + Sync {
    /// Returns an id never handed out before by this generator.
    ///
    /// # Errors
    ///
    /// Returns an error if the id space is exhausted or the backing service
    /// is unreachable.
    async fn generate_ledger_id(&self) -> MetaResult<LedgerId>;
}

#[async_trait]
impl<T: LedgerManager + ?Sized> LedgerManager for Arc<T> {
    async fn create_ledger_metadata(
        &self,
        ledger_id: LedgerId,
        metadata: &LedgerMetadata,
    ) -> MetaResult<Versioned<LedgerMetadata>> {
        (**self).create_ledger_metadata(ledger_id, metadata).await
    }

    async fn read_ledger_metadata(
        &self,
        ledger_id: LedgerId,
    ) -> MetaResult<Versioned<LedgerMetadata>> {
        (**self).read_ledger_metadata(ledger_id).await
    }

    async fn write_ledger_metadata(
        &self,
        ledger_id: LedgerId,
        metadata: &LedgerMetadata,
        expected: Version,
    ) -> MetaResult<Versioned<LedgerMetadata>> {
        (**self).write_ledger_metadata(ledger_id, metadata, expected).await
    }

    async fn remove_ledger_metadata(&self, ledger_id: LedgerId) -> MetaResult<()> {
        (**self).remove_ledger_metadata(ledger_id).await
    }

    async fn list_ledgers(&self) -> MetaResult<Vec<LedgerId>> {
        (**self).list_ledgers().await
    }
}

#[async_trait]
impl<T: LedgerIdGenerator + ?Sized> LedgerIdGenerator for Arc<T> {
    async fn generate_ledger_id(&self) -> MetaResult<LedgerId> {
        (**self).generate_ledger_id().await
    }
}
