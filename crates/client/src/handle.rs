//! Ledger handles.
//!
//! A [`LedgerHandle`] is bound to one ledger for its whole life. Handles
//! returned by [`LedgerClient::create_ledger`](crate::LedgerClient::create_ledger)
//! are *writers*: they append entries and finally close the ledger. Handles
//! returned by either open call are *read-only*.
//!
//! # Appends
//!
//! Each append is assigned the next entry id, signed by the ledger's
//! [`DigestManager`] and written to the entry's write set in a background
//! task. It is acknowledged once `Qa` bookies confirm. Results are released
//! strictly in entry-id order: an append returns only after every earlier
//! append has settled, and once one append fails every later one fails with
//! the same error and the handle stops accepting appends.
//!
//! When a bookie of the write set is unreachable the handle replaces it: a
//! new ensemble starting after the last confirmed entry is compare-and-swapped
//! into the metadata from within the ledger's ordering domain, and the write
//! is retried against it.
//!
//! # Closing
//!
//! [`close`](LedgerHandle::close) waits for in-flight appends, then
//! compare-and-swaps the metadata to CLOSED with the handle's own last
//! confirmed entry and length. A concurrent recovery makes this CAS fail with
//! [`ClientError::VersionConflict`].

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Instant,
};

use bytes::Bytes;
use fail::fail_point;
use futures::{StreamExt, stream::FuturesUnordered};
use ledgerkit_meta::{BookieId, EntryId, LedgerId, LedgerMetadata, Versioned};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{
    bookie::{AddMode, BookieError},
    context::{ClientContext, HandleToken},
    digest::DigestManager,
    entry::EntryFrame,
    error::{ClientError, ClientResult},
    metrics::Operation,
    read::{EntryReader, LedgerEntries},
    retry::with_timeout,
};

/// Whether a handle may append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleMode {
    Writer,
    ReadOnly,
}

/// A live view of one ledger.
///
/// Dropping a handle without closing it leaves the ledger OPEN; a later
/// [`open_ledger`](crate::LedgerClient::open_ledger) recovers and closes it.
pub struct LedgerHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    ctx: Arc<ClientContext>,
    ledger_id: LedgerId,
    mode: HandleMode,
    token: Arc<HandleToken>,
    digest: Arc<DigestManager>,
    state: Mutex<HandleState>,
    settled: watch::Sender<EntryId>,
}

struct HandleState {
    metadata: Versioned<LedgerMetadata>,
    next_entry_id: EntryId,
    pending_length: u64,
    last_add_confirmed: EntryId,
    confirmed_length: u64,
    /// Highest entry id up to which every append has settled.
    settled_through: EntryId,
    /// Finished appends waiting for an earlier one, with their length.
    outcomes: BTreeMap<EntryId, (u64, ClientResult<()>)>,
    /// Appends whose caller is still waiting for the result.
    waiting: HashSet<EntryId>,
    /// Settled results not yet picked up by their callers.
    results: HashMap<EntryId, ClientResult<EntryId>>,
    broken: Option<ClientError>,
    closing: bool,
    closed: bool,
}

impl LedgerHandle {
    pub(crate) fn new(
        ctx: Arc<ClientContext>,
        metadata: Versioned<LedgerMetadata>,
        digest: Arc<DigestManager>,
        mode: HandleMode,
        last_add_confirmed: EntryId,
    ) -> Self {
        let ledger_id = metadata.value.ledger_id();
        let confirmed_length = if metadata.value.is_closed() { metadata.value.length() } else { 0 };
        let token = ctx.handles.register(ledger_id);
        let (settled, _) = watch::channel(last_add_confirmed);
        let state = HandleState {
            metadata,
            next_entry_id: last_add_confirmed + 1,
            pending_length: confirmed_length,
            last_add_confirmed,
            confirmed_length,
            settled_through: last_add_confirmed,
            outcomes: BTreeMap::new(),
            waiting: HashSet::new(),
            results: HashMap::new(),
            broken: None,
            closing: false,
            closed: false,
        };
        Self {
            inner: Arc::new(HandleInner {
                ctx,
                ledger_id,
                mode,
                token,
                digest,
                state: Mutex::new(state),
                settled,
            }),
        }
    }

    /// The ledger this handle is bound to.
    #[must_use]
    pub fn ledger_id(&self) -> LedgerId {
        self.inner.ledger_id
    }

    /// Snapshot of the cached metadata.
    #[must_use]
    pub fn metadata(&self) -> LedgerMetadata {
        self.inner.state.lock().metadata.value.clone()
    }

    /// Snapshot of the cached metadata with its store version.
    #[must_use]
    pub fn versioned_metadata(&self) -> Versioned<LedgerMetadata> {
        self.inner.state.lock().metadata.clone()
    }

    /// Highest entry id known to be durably stored, `-1` if none.
    #[must_use]
    pub fn last_add_confirmed(&self) -> EntryId {
        let state = self.inner.state.lock();
        if state.metadata.value.is_closed() {
            state.metadata.value.last_entry_id()
        } else {
            state.last_add_confirmed
        }
    }

    /// Bytes confirmed through [`last_add_confirmed`](Self::last_add_confirmed).
    #[must_use]
    pub fn length(&self) -> u64 {
        let state = self.inner.state.lock();
        if state.metadata.value.is_closed() {
            state.metadata.value.length()
        } else {
            state.confirmed_length
        }
    }

    /// Returns `true` once [`close`](Self::close) has succeeded.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Returns `true` for handles obtained by opening a ledger.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.inner.mode == HandleMode::ReadOnly
    }

    /// Appends `data` as the next entry. See [`add_entry_bytes`](Self::add_entry_bytes).
    ///
    /// # Errors
    ///
    /// As for [`add_entry_bytes`](Self::add_entry_bytes).
    pub async fn add_entry(&self, data: &[u8]) -> ClientResult<EntryId> {
        self.add_entry_bytes(Bytes::copy_from_slice(data)).await
    }

    /// Appends `payload` as the next entry and returns its id once `Qa`
    /// bookies have stored it and every earlier append has settled.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ClientClosed`] after client shutdown.
    /// - [`ClientError::IllegalOperation`] on a read-only handle.
    /// - [`ClientError::LedgerClosed`] if the handle is closed, the ledger
    ///   was deleted through this client, or a bookie reports it fenced.
    /// - [`ClientError::VersionConflict`] if an ensemble change lost its CAS.
    /// - [`ClientError::NotEnoughReplicas`] if too few bookies acknowledged.
    /// - The error of an earlier failed append, once the handle is broken.
    #[tracing::instrument(
        skip(self, payload),
        fields(
            ledger_id = %self.inner.ledger_id,
            entry_id = tracing::field::Empty,
            size = payload.len(),
        )
    )]
    pub async fn add_entry_bytes(&self, payload: Bytes) -> ClientResult<EntryId> {
        let start = Instant::now();
        let result = HandleInner::add(&self.inner, payload).await;
        self.inner.ctx.metrics.record(Operation::AddEntry, start.elapsed(), result.is_ok());
        result
    }

    /// Reads entries `first..=last`.
    ///
    /// The returned sequence performs one quorum read per entry as it is
    /// consumed.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidArgument`] if `first < 0`, `last < 0` or
    ///   `first > last`.
    /// - [`ClientError::ClientClosed`] after client shutdown.
    /// - [`ClientError::LedgerClosed`] if this handle was closed.
    /// - [`ClientError::NoSuchEntry`] if `last` lies beyond the last entry
    ///   known to this handle; no bookie is contacted.
    #[tracing::instrument(skip(self), fields(ledger_id = %self.inner.ledger_id))]
    pub fn read_entries(&self, first: EntryId, last: EntryId) -> ClientResult<LedgerEntries> {
        if first < 0 || last < 0 || first > last {
            return Err(ClientError::invalid_argument(format!(
                "invalid entry range {first}..={last}"
            )));
        }
        let inner = &self.inner;
        if inner.ctx.is_closed() {
            return Err(ClientError::ClientClosed);
        }
        let metadata = {
            let state = inner.state.lock();
            if state.closed {
                return Err(ClientError::LedgerClosed { ledger_id: inner.ledger_id });
            }
            let known_last = if state.metadata.value.is_closed() {
                state.metadata.value.last_entry_id()
            } else {
                state.last_add_confirmed
            };
            if last > known_last {
                return Err(ClientError::NoSuchEntry {
                    ledger_id: inner.ledger_id,
                    entry_id: first.max(known_last + 1),
                });
            }
            state.metadata.value.clone()
        };
        let reader = EntryReader::new(Arc::clone(&inner.ctx), metadata, Arc::clone(&inner.digest));
        Ok(LedgerEntries::bounded(Arc::new(reader), first, last))
    }

    /// Closes the handle.
    ///
    /// A writer waits for in-flight appends and then records the ledger as
    /// CLOSED at its last confirmed entry. A read-only handle is only
    /// unregistered. Closing twice is a no-op, as is closing after client
    /// shutdown.
    ///
    /// # Errors
    ///
    /// - [`ClientError::VersionConflict`] if the metadata changed since this
    ///   handle last wrote it, e.g. because another client recovered the
    ///   ledger. The ledger must not be assumed closed by this handle.
    /// - [`ClientError::NoSuchLedger`] if the ledger was deleted.
    #[tracing::instrument(skip(self), fields(ledger_id = %self.inner.ledger_id))]
    pub async fn close(&self) -> ClientResult<()> {
        let start = Instant::now();
        let result = self.inner.close().await;
        self.inner.ctx.metrics.record(Operation::Close, start.elapsed(), result.is_ok());
        result
    }
}

impl std::fmt::Debug for LedgerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("LedgerHandle")
            .field("ledger_id", &self.inner.ledger_id)
            .field("mode", &self.inner.mode)
            .field("version", &state.metadata.version)
            .field("last_add_confirmed", &state.last_add_confirmed)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl HandleInner {
    fn ensure_writable(&self, state: &HandleState) -> ClientResult<()> {
        if self.ctx.is_closed() {
            return Err(ClientError::ClientClosed);
        }
        if self.mode == HandleMode::ReadOnly {
            return Err(ClientError::illegal_operation(format!(
                "ledger {} was opened read-only",
                self.ledger_id
            )));
        }
        if self.token.is_revoked() || state.closing || state.closed {
            return Err(ClientError::LedgerClosed { ledger_id: self.ledger_id });
        }
        if let Some(err) = &state.broken {
            return Err(err.clone());
        }
        Ok(())
    }

    async fn add(this: &Arc<Self>, payload: Bytes) -> ClientResult<EntryId> {
        let frame = {
            let mut state = this.state.lock();
            this.ensure_writable(&state)?;
            let entry_id = state.next_entry_id;
            state.next_entry_id += 1;
            state.pending_length += payload.len() as u64;
            state.waiting.insert(entry_id);
            this.digest.frame(entry_id, state.last_add_confirmed, state.pending_length, payload)
        };
        let entry_id = frame.entry_id;
        tracing::Span::current().record("entry_id", entry_id);

        // The write runs to completion even if the caller stops waiting,
        // otherwise later appends could never settle.
        let worker = Arc::clone(this);
        tokio::spawn(async move {
            let length = frame.length;
            let timeout = worker.ctx.config.add_entry_timeout;
            let outcome = match tokio::time::timeout(timeout, worker.replicate(frame)).await {
                Ok(outcome) => outcome,
                Err(_elapsed) => Err(ClientError::timeout("add_entry")),
            };
            worker.settle(entry_id, length, outcome);
        });

        let _waiter = Waiter { inner: this, entry_id };
        this.await_settled(entry_id).await?;
        let result = this.state.lock().results.remove(&entry_id);
        result.unwrap_or_else(|| {
            Err(ClientError::unexpected(format!("no completion recorded for entry {entry_id}")))
        })
    }

    async fn await_settled(&self, entry_id: EntryId) -> ClientResult<()> {
        let mut settled = self.settled.subscribe();
        settled
            .wait_for(|through| *through >= entry_id)
            .await
            .map(drop)
            .map_err(|e| ClientError::unexpected_with_source("append completion channel closed", e))
    }

    /// Records the outcome of `entry_id` and releases every append whose
    /// predecessors have all settled.
    fn settle(&self, entry_id: EntryId, length: u64, outcome: ClientResult<()>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.outcomes.insert(entry_id, (length, outcome));
        loop {
            let id = state.settled_through + 1;
            let Some((length, outcome)) = state.outcomes.remove(&id) else {
                break;
            };
            state.settled_through = id;
            let result = match (state.broken.clone(), outcome) {
                (Some(err), _) => Err(err),
                (None, Ok(())) => {
                    state.last_add_confirmed = id;
                    state.confirmed_length = length;
                    Ok(id)
                },
                (None, Err(err)) => {
                    tracing::warn!(
                        ledger_id = %self.ledger_id,
                        entry_id = id,
                        error = %err,
                        "append failed, handle no longer accepts appends"
                    );
                    state.broken = Some(err.clone());
                    Err(err)
                },
            };
            if state.waiting.contains(&id) {
                state.results.insert(id, result);
            }
        }
        // Published under the lock so concurrent settles never move it back.
        self.settled.send_replace(state.settled_through);
    }

    /// Writes `frame` to its write set until `Qa` bookies acknowledge,
    /// replacing unreachable bookies as needed.
    async fn replicate(self: &Arc<Self>, frame: EntryFrame) -> ClientResult<()> {
        let ledger_id = self.ledger_id;
        let entry_id = frame.entry_id;
        let mut changes = 0u32;
        loop {
            let (quorum, ensemble, master_key) = {
                let state = self.state.lock();
                let metadata = &state.metadata.value;
                (
                    metadata.quorum(),
                    metadata.ensemble_at(entry_id).to_vec(),
                    metadata.master_key().clone(),
                )
            };
            let needed = quorum.ack_quorum_size() as usize;

            let mut writes: FuturesUnordered<_> = quorum
                .write_set(entry_id)
                .into_iter()
                .filter_map(|pos| ensemble.get(pos).cloned())
                .map(|bookie| {
                    let client = Arc::clone(&self.ctx.bookie_client);
                    let key = master_key.clone();
                    let frame = frame.clone();
                    tokio::spawn(async move {
                        let result = client.add_entry(&bookie, &key, frame, AddMode::Regular).await;
                        (bookie, result)
                    })
                })
                .collect();

            let mut acks = 0usize;
            let mut unavailable: Vec<BookieId> = Vec::new();
            let mut failures: Vec<String> = Vec::new();
            while acks < needed {
                let Some(joined) = writes.next().await else {
                    break;
                };
                match joined {
                    Ok((_, Ok(()))) => acks += 1,
                    Ok((_, Err(BookieError::Fenced { .. }))) => {
                        tracing::debug!(
                            ledger_id = %ledger_id,
                            entry_id,
                            "ledger fenced by recovery"
                        );
                        return Err(ClientError::LedgerClosed { ledger_id });
                    },
                    Ok((bookie, Err(err @ BookieError::Unavailable { .. }))) => {
                        tracing::warn!(
                            ledger_id = %ledger_id,
                            entry_id,
                            bookie = %bookie,
                            error = %err,
                            "bookie write failed"
                        );
                        unavailable.push(bookie);
                    },
                    Ok((bookie, Err(err))) => failures.push(format!("{bookie}: {err}")),
                    Err(join_err) => failures.push(join_err.to_string()),
                }
            }
            if acks >= needed {
                return Ok(());
            }
            if unavailable.is_empty() || changes >= self.ctx.config.max_ensemble_changes {
                return Err(ClientError::NotEnoughReplicas {
                    ledger_id,
                    entry_id,
                    message: format!(
                        "{acks} of {needed} acks, unavailable: [{}], failed: [{}]",
                        unavailable.iter().map(BookieId::as_str).collect::<Vec<_>>().join(", "),
                        failures.join("; ")
                    ),
                });
            }
            changes += 1;
            self.replace_bookies(&unavailable).await?;
        }
    }

    /// Swaps `failed` bookies out of the current ensemble and persists the
    /// new ensemble with a compare-and-swap.
    async fn replace_bookies(&self, failed: &[BookieId]) -> ClientResult<()> {
        let _lane = self.ctx.ordering.enter(self.ledger_id).await;

        let (metadata, version, last_add_confirmed) = {
            let state = self.state.lock();
            (state.metadata.value.clone(), state.metadata.version, state.last_add_confirmed)
        };
        let (current_start, current) = metadata.current_ensemble();
        let positions: Vec<usize> = current
            .iter()
            .enumerate()
            .filter(|(_, bookie)| failed.contains(bookie))
            .map(|(pos, _)| pos)
            .collect();
        if positions.is_empty() {
            // Another append already replaced them.
            return Ok(());
        }

        let mut excluded = current.to_vec();
        excluded.extend(failed.iter().cloned());
        let replacements = with_timeout(
            self.ctx.config.metadata_timeout,
            "select_ensemble",
            self.ctx.ensemble_provider.select(positions.len(), &excluded),
        )
        .await?;
        let mut ensemble = current.to_vec();
        for (pos, bookie) in positions.into_iter().zip(replacements) {
            ensemble[pos] = bookie;
        }

        let start_entry = current_start.max(last_add_confirmed + 1);
        let updated = metadata.with_ensemble_change(start_entry, ensemble)?;
        let written = with_timeout(
            self.ctx.config.metadata_timeout,
            "write_ledger_metadata",
            self.ctx.ledger_manager.write_ledger_metadata(self.ledger_id, &updated, version),
        )
        .await?;

        tracing::debug!(
            ledger_id = %self.ledger_id,
            start_entry,
            version = %written.version,
            "ensemble changed"
        );
        self.state.lock().metadata = written;
        self.ctx.metrics.record_ensemble_change();
        Ok(())
    }

    async fn close(&self) -> ClientResult<()> {
        if self.mode == HandleMode::ReadOnly || self.ctx.is_closed() {
            let mut state = self.state.lock();
            if !state.closed {
                state.closed = true;
                self.ctx.handles.unregister(&self.token);
            }
            return Ok(());
        }

        let last_issued = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closing = true;
            state.next_entry_id - 1
        };
        self.await_settled(last_issued).await?;

        fail_point!("handle-close-before-cas");

        let _lane = self.ctx.ordering.enter(self.ledger_id).await;
        let (metadata, version, last_entry_id, length) = {
            let state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            (
                state.metadata.value.clone(),
                state.metadata.version,
                state.last_add_confirmed,
                state.confirmed_length,
            )
        };
        let closed = metadata.close(last_entry_id, length)?;
        let written = with_timeout(
            self.ctx.config.metadata_timeout,
            "write_ledger_metadata",
            self.ctx.ledger_manager.write_ledger_metadata(self.ledger_id, &closed, version),
        )
        .await
        .inspect_err(|err| {
            tracing::warn!(
                ledger_id = %self.ledger_id,
                error = %err,
                "close lost its metadata update"
            );
        })?;

        tracing::debug!(
            ledger_id = %self.ledger_id,
            last_entry_id,
            length,
            version = %written.version,
            "ledger closed"
        );
        let mut state = self.state.lock();
        state.metadata = written;
        state.closed = true;
        self.ctx.handles.unregister(&self.token);
        Ok(())
    }
}

/// Registration of a caller awaiting one append. Dropping it, including when
/// the caller's future is cancelled, discards the result.
struct Waiter<'a> {
    inner: &'a HandleInner,
    entry_id: EntryId,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.waiting.remove(&self.entry_id);
        state.results.remove(&self.entry_id);
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.ctx.handles.unregister(&self.token);
    }
}
