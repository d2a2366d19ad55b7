//! In-memory bookie cluster.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use ledgerkit_meta::{BookieId, EntryId, INVALID_ENTRY_ID, LedgerId};
use parking_lot::Mutex;

use super::{AddMode, BookieClient, BookieError, BookieResult};
use crate::entry::EntryFrame;

#[derive(Debug, Default)]
struct LedgerStore {
    master_key: Option<Bytes>,
    fenced: bool,
    entries: BTreeMap<EntryId, EntryFrame>,
}

impl LedgerStore {
    fn authorize(&mut self, ledger_id: LedgerId, master_key: &Bytes) -> BookieResult<()> {
        match &self.master_key {
            Some(stored) if stored != master_key => Err(BookieError::Unauthorized { ledger_id }),
            Some(_) => Ok(()),
            None => {
                self.master_key = Some(master_key.clone());
                Ok(())
            },
        }
    }
}

#[derive(Debug)]
struct Bookie {
    available: bool,
    latency: Duration,
    ledgers: HashMap<LedgerId, LedgerStore>,
}

impl Bookie {
    fn new() -> Self {
        Self { available: true, latency: Duration::ZERO, ledgers: HashMap::new() }
    }
}

/// In-process [`BookieClient`] backed by one entry map per bookie.
///
/// Faults can be injected per bookie:
///
/// | Method | Effect |
/// |--------|--------|
/// | [`set_available`](Self::set_available) | every request fails with `Unavailable` |
/// | [`set_latency`](Self::set_latency) | every request is delayed |
/// | [`corrupt_entry`](Self::corrupt_entry) | a stored payload is altered in place |
/// | [`drop_entry`](Self::drop_entry) | a stored entry is removed |
///
/// With the `failpoints` feature, the `bookie-add-entry` fail point makes
/// appends fail with `Unavailable`.
///
/// # Cloning
///
/// Clones share the same bookies.
#[derive(Debug, Clone, Default)]
pub struct MemoryBookieCluster {
    bookies: Arc<Mutex<BTreeMap<BookieId, Bookie>>>,
}

impl MemoryBookieCluster {
    /// Creates a cluster with no bookies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cluster of `count` bookies named `bookie-0`, `bookie-1`, ...
    #[must_use]
    pub fn with_bookies(count: usize) -> Self {
        let cluster = Self::new();
        for i in 0..count {
            cluster.add_bookie(BookieId::new(format!("bookie-{i}")));
        }
        cluster
    }

    /// Adds an empty, available bookie. Existing bookies are left untouched.
    pub fn add_bookie(&self, bookie: BookieId) {
        self.bookies.lock().entry(bookie).or_insert_with(Bookie::new);
    }

    /// Ids of every bookie in the cluster.
    #[must_use]
    pub fn bookie_ids(&self) -> Vec<BookieId> {
        self.bookies.lock().keys().cloned().collect()
    }

    /// Makes `bookie` reachable or unreachable.
    pub fn set_available(&self, bookie: &BookieId, available: bool) {
        if let Some(b) = self.bookies.lock().get_mut(bookie) {
            b.available = available;
        }
    }

    /// Delays every request to `bookie` by `latency`.
    pub fn set_latency(&self, bookie: &BookieId, latency: Duration) {
        if let Some(b) = self.bookies.lock().get_mut(bookie) {
            b.latency = latency;
        }
    }

    /// Flips the first payload byte of a stored entry. Returns `false` if
    /// the entry is not stored or has an empty payload.
    pub fn corrupt_entry(&self, bookie: &BookieId, ledger_id: LedgerId, entry_id: EntryId) -> bool {
        let mut bookies = self.bookies.lock();
        let Some(frame) = bookies
            .get_mut(bookie)
            .and_then(|b| b.ledgers.get_mut(&ledger_id))
            .and_then(|l| l.entries.get_mut(&entry_id))
        else {
            return false;
        };
        let mut payload = frame.payload.to_vec();
        let Some(first) = payload.first_mut() else {
            return false;
        };
        *first ^= 0xFF;
        frame.payload = Bytes::from(payload);
        true
    }

    /// Removes a stored entry. Returns `false` if it was not stored.
    pub fn drop_entry(&self, bookie: &BookieId, ledger_id: LedgerId, entry_id: EntryId) -> bool {
        self.bookies
            .lock()
            .get_mut(bookie)
            .and_then(|b| b.ledgers.get_mut(&ledger_id))
            .and_then(|l| l.entries.remove(&entry_id))
            .is_some()
    }

    /// Returns `true` if `bookie` stores `entry_id` of `ledger_id`.
    #[must_use]
    pub fn has_entry(&self, bookie: &BookieId, ledger_id: LedgerId, entry_id: EntryId) -> bool {
        self.bookies
            .lock()
            .get(bookie)
            .and_then(|b| b.ledgers.get(&ledger_id))
            .is_some_and(|l| l.entries.contains_key(&entry_id))
    }

    /// Number of entries of `ledger_id` stored on `bookie`.
    #[must_use]
    pub fn entry_count(&self, bookie: &BookieId, ledger_id: LedgerId) -> usize {
        self.bookies
            .lock()
            .get(bookie)
            .and_then(|b| b.ledgers.get(&ledger_id))
            .map_or(0, |l| l.entries.len())
    }

    /// Returns `true` if `ledger_id` is fenced on `bookie`.
    #[must_use]
    pub fn is_fenced(&self, bookie: &BookieId, ledger_id: LedgerId) -> bool {
        self.bookies
            .lock()
            .get(bookie)
            .and_then(|b| b.ledgers.get(&ledger_id))
            .is_some_and(|l| l.fenced)
    }

    /// Looks up the bookie's latency, failing if it is unknown or down.
    fn reachable(&self, bookie: &BookieId) -> BookieResult<Duration> {
        match self.bookies.lock().get(bookie) {
            Some(b) if b.available => Ok(b.latency),
            _ => Err(BookieError::Unavailable { bookie: bookie.clone() }),
        }
    }

    /// Applies `f` to the ledger store of a reachable bookie.
    fn with_ledger<T>(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
        f: impl FnOnce(&mut LedgerStore) -> BookieResult<T>,
    ) -> BookieResult<T> {
        let mut bookies = self.bookies.lock();
        match bookies.get_mut(bookie) {
            Some(b) if b.available => f(b.ledgers.entry(ledger_id).or_default()),
            _ => Err(BookieError::Unavailable { bookie: bookie.clone() }),
        }
    }

    async fn delay(&self, bookie: &BookieId) -> BookieResult<()> {
        let latency = self.reachable(bookie)?;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

#[async_trait]
impl BookieClient for MemoryBookieCluster {
    async fn add_entry(
        &self,
        bookie: &BookieId,
        master_key: &Bytes,
        frame: EntryFrame,
        mode: AddMode,
    ) -> BookieResult<()> {
        fail_point!("bookie-add-entry", |_| {
            Err(BookieError::Unavailable { bookie: bookie.clone() })
        });
        self.delay(bookie).await?;
        let ledger_id = frame.ledger_id;
        self.with_ledger(bookie, ledger_id, |store| {
            store.authorize(ledger_id, master_key)?;
            if store.fenced && mode == AddMode::Regular {
                return Err(BookieError::Fenced { ledger_id });
            }
            store.entries.insert(frame.entry_id, frame);
            Ok(())
        })
    }

    async fn read_entry(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
        entry_id: EntryId,
    ) -> BookieResult<EntryFrame> {
        self.delay(bookie).await?;
        let bookies = self.bookies.lock();
        let b = bookies
            .get(bookie)
            .filter(|b| b.available)
            .ok_or_else(|| BookieError::Unavailable { bookie: bookie.clone() })?;
        let store = b.ledgers.get(&ledger_id).ok_or(BookieError::NoSuchLedger { ledger_id })?;
        store
            .entries
            .get(&entry_id)
            .cloned()
            .ok_or(BookieError::NoSuchEntry { ledger_id, entry_id })
    }

    async fn read_last_add_confirmed(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
        master_key: &Bytes,
        fence: bool,
    ) -> BookieResult<EntryId> {
        self.delay(bookie).await?;
        self.with_ledger(bookie, ledger_id, |store| {
            store.authorize(ledger_id, master_key)?;
            if fence {
                store.fenced = true;
            }
            Ok(store
                .entries
                .values()
                .next_back()
                .map_or(INVALID_ENTRY_ID, |frame| frame.last_add_confirmed))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ledger(raw: i64) -> LedgerId {
        LedgerId::try_from(raw).unwrap()
    }

    fn frame(ledger_id: LedgerId, entry_id: EntryId, lac: EntryId) -> EntryFrame {
        EntryFrame {
            ledger_id,
            entry_id,
            last_add_confirmed: lac,
            length: (entry_id as u64 + 1) * 3,
            digest: Bytes::new(),
            payload: Bytes::from_static(b"abc"),
        }
    }

    fn key() -> Bytes {
        Bytes::from_static(b"key")
    }

    #[tokio::test]
    async fn test_add_then_read() {
        let cluster = MemoryBookieCluster::with_bookies(1);
        let bookie = BookieId::new("bookie-0");
        cluster
            .add_entry(&bookie, &key(), frame(ledger(1), 0, -1), AddMode::Regular)
            .await
            .unwrap();

        let read = cluster.read_entry(&bookie, ledger(1), 0).await.unwrap();
        assert_eq!(read, frame(ledger(1), 0, -1));
        assert!(cluster.has_entry(&bookie, ledger(1), 0));
        assert_eq!(cluster.entry_count(&bookie, ledger(1)), 1);
    }

    #[tokio::test]
    async fn test_missing_entry_and_ledger_are_distinguished() {
        let cluster = MemoryBookieCluster::with_bookies(1);
        let bookie = BookieId::new("bookie-0");
        assert_eq!(
            cluster.read_entry(&bookie, ledger(1), 0).await,
            Err(BookieError::NoSuchLedger { ledger_id: ledger(1) })
        );
        cluster
            .add_entry(&bookie, &key(), frame(ledger(1), 0, -1), AddMode::Regular)
            .await
            .unwrap();
        let err = cluster.read_entry(&bookie, ledger(1), 1).await.unwrap_err();
        assert_eq!(err, BookieError::NoSuchEntry { ledger_id: ledger(1), entry_id: 1 });
        assert!(err.is_missing());
    }

    #[tokio::test]
    async fn test_fencing_blocks_regular_but_not_recovery_adds() {
        let cluster = MemoryBookieCluster::with_bookies(1);
        let bookie = BookieId::new("bookie-0");
        cluster
            .add_entry(&bookie, &key(), frame(ledger(1), 0, -1), AddMode::Regular)
            .await
            .unwrap();
        cluster.add_entry(&bookie, &key(), frame(ledger(1), 1, 0), AddMode::Regular).await.unwrap();

        let lac = cluster.read_last_add_confirmed(&bookie, ledger(1), &key(), true).await.unwrap();
        assert_eq!(lac, 0);
        assert!(cluster.is_fenced(&bookie, ledger(1)));

        let err = cluster
            .add_entry(&bookie, &key(), frame(ledger(1), 2, 1), AddMode::Regular)
            .await
            .unwrap_err();
        assert_eq!(err, BookieError::Fenced { ledger_id: ledger(1) });
        cluster
            .add_entry(&bookie, &key(), frame(ledger(1), 2, 1), AddMode::Recovery)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wrong_master_key_is_unauthorized() {
        let cluster = MemoryBookieCluster::with_bookies(1);
        let bookie = BookieId::new("bookie-0");
        cluster
            .add_entry(&bookie, &key(), frame(ledger(1), 0, -1), AddMode::Regular)
            .await
            .unwrap();
        let other = Bytes::from_static(b"other");
        let err = cluster
            .add_entry(&bookie, &other, frame(ledger(1), 1, 0), AddMode::Regular)
            .await
            .unwrap_err();
        assert_eq!(err, BookieError::Unauthorized { ledger_id: ledger(1) });
    }

    #[tokio::test]
    async fn test_unavailable_bookie_rejects_everything() {
        let cluster = MemoryBookieCluster::with_bookies(1);
        let bookie = BookieId::new("bookie-0");
        cluster.set_available(&bookie, false);
        let err = cluster
            .add_entry(&bookie, &key(), frame(ledger(1), 0, -1), AddMode::Regular)
            .await
            .unwrap_err();
        assert!(matches!(err, BookieError::Unavailable { .. }));
        assert!(cluster.read_entry(&bookie, ledger(1), 0).await.is_err());

        let unknown = BookieId::new("nowhere");
        assert!(cluster.read_last_add_confirmed(&unknown, ledger(1), &key(), false).await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_and_drop_entry() {
        let cluster = MemoryBookieCluster::with_bookies(1);
        let bookie = BookieId::new("bookie-0");
        cluster
            .add_entry(&bookie, &key(), frame(ledger(1), 0, -1), AddMode::Regular)
            .await
            .unwrap();

        assert!(cluster.corrupt_entry(&bookie, ledger(1), 0));
        let read = cluster.read_entry(&bookie, ledger(1), 0).await.unwrap();
        assert_ne!(read.payload, Bytes::from_static(b"abc"));

        assert!(cluster.drop_entry(&bookie, ledger(1), 0));
        assert!(!cluster.drop_entry(&bookie, ledger(1), 0));
        assert!(!cluster.corrupt_entry(&bookie, ledger(1), 0));
    }
}
