//! Shared client state.
//!
//! A [`ClientContext`] is owned jointly by a [`LedgerClient`](crate::LedgerClient)
//! and every handle it hands out. It holds the collaborators, the registry of
//! live handles and one ordering domain per ledger id.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use ledgerkit_meta::{LedgerId, LedgerIdGenerator, LedgerManager};
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::{
    bookie::BookieClient, config::ClientConfig, ensemble::EnsembleProvider, metrics::Metrics,
};

/// Collaborators and bookkeeping shared by a client and its handles.
pub(crate) struct ClientContext {
    pub(crate) config: ClientConfig,
    pub(crate) ledger_manager: Arc<dyn LedgerManager>,
    pub(crate) id_generator: Arc<dyn LedgerIdGenerator>,
    pub(crate) ensemble_provider: Arc<dyn EnsembleProvider>,
    pub(crate) bookie_client: Arc<dyn BookieClient>,
    pub(crate) metrics: Metrics,
    pub(crate) handles: HandleRegistry,
    pub(crate) ordering: OrderingDomains,
    closed: AtomicBool,
}

impl ClientContext {
    pub(crate) fn new(
        config: ClientConfig,
        ledger_manager: Arc<dyn LedgerManager>,
        id_generator: Arc<dyn LedgerIdGenerator>,
        ensemble_provider: Arc<dyn EnsembleProvider>,
        bookie_client: Arc<dyn BookieClient>,
        metrics: Metrics,
    ) -> Self {
        Self {
            config,
            ledger_manager,
            id_generator,
            ensemble_provider,
            bookie_client,
            metrics,
            handles: HandleRegistry::default(),
            ordering: OrderingDomains::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the context closed. Returns `false` if it already was.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .field("open_handles", &self.handles.count())
            .finish_non_exhaustive()
    }
}

/// Registration of one live handle.
#[derive(Debug)]
pub(crate) struct HandleToken {
    handle_id: u64,
    ledger_id: LedgerId,
    revoked: AtomicBool,
}

impl HandleToken {
    /// Set once the ledger was deleted through the owning client.
    pub(crate) fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }
}

/// Live handles keyed by ledger id.
#[derive(Debug, Default)]
pub(crate) struct HandleRegistry {
    next_handle_id: AtomicU64,
    handles: Mutex<HashMap<LedgerId, Vec<Arc<HandleToken>>>>,
}

impl HandleRegistry {
    pub(crate) fn register(&self, ledger_id: LedgerId) -> Arc<HandleToken> {
        let token = Arc::new(HandleToken {
            handle_id: self.next_handle_id.fetch_add(1, Ordering::Relaxed),
            ledger_id,
            revoked: AtomicBool::new(false),
        });
        self.handles.lock().entry(ledger_id).or_default().push(Arc::clone(&token));
        token
    }

    /// Removes `token`. Returns `false` if it was not registered.
    pub(crate) fn unregister(&self, token: &HandleToken) -> bool {
        let mut handles = self.handles.lock();
        let Some(tokens) = handles.get_mut(&token.ledger_id) else {
            return false;
        };
        let before = tokens.len();
        tokens.retain(|t| t.handle_id != token.handle_id);
        let removed = tokens.len() != before;
        if tokens.is_empty() {
            handles.remove(&token.ledger_id);
        }
        removed
    }

    /// Flags every handle of `ledger_id` as revoked and drops their
    /// registrations. Returns how many handles were affected.
    pub(crate) fn revoke(&self, ledger_id: LedgerId) -> usize {
        let tokens = self.handles.lock().remove(&ledger_id).unwrap_or_default();
        for token in &tokens {
            token.revoked.store(true, Ordering::Release);
        }
        tokens.len()
    }

    /// Drops every registration. Returns how many handles were registered.
    pub(crate) fn drain(&self) -> usize {
        self.handles.lock().drain().map(|(_, tokens)| tokens.len()).sum()
    }

    pub(crate) fn count(&self) -> usize {
        self.handles.lock().values().map(Vec::len).sum()
    }

    #[cfg(test)]
    pub(crate) fn count_for(&self, ledger_id: LedgerId) -> usize {
        self.handles.lock().get(&ledger_id).map_or(0, Vec::len)
    }
}

/// One single-flight lane per ledger id for metadata mutations.
///
/// Lanes are created on demand and removed once nobody holds or awaits them.
#[derive(Debug, Default)]
pub(crate) struct OrderingDomains {
    lanes: Mutex<HashMap<LedgerId, Arc<tokio::sync::Mutex<()>>>>,
}

impl OrderingDomains {
    /// Waits for exclusive use of the lane of `ledger_id`.
    pub(crate) async fn enter(&self, ledger_id: LedgerId) -> OrderingGuard<'_> {
        let lane = Arc::clone(self.lanes.lock().entry(ledger_id).or_default());
        let guard = lane.lock_owned().await;
        OrderingGuard { domains: self, ledger_id, guard: Some(guard) }
    }

    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.lanes.lock().len()
    }
}

/// Exclusive use of one ordering lane, released on drop.
#[derive(Debug)]
pub(crate) struct OrderingGuard<'a> {
    domains: &'a OrderingDomains,
    ledger_id: LedgerId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for OrderingGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut lanes = self.domains.lanes.lock();
        // Only the map's own reference left: nobody is waiting.
        if lanes.get(&self.ledger_id).is_some_and(|lane| Arc::strong_count(lane) == 1) {
            lanes.remove(&self.ledger_id);
        }
    }
}
