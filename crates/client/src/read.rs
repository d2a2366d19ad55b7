//! Quorum reads.
//!
//! An entry is requested from every bookie of its write set at once. The
//! first copy that passes digest verification wins. When no copy verifies,
//! the replies are classified:
//!
//! | Replies | Result |
//! |---------|--------|
//! | at least `Qw - Qa + 1` copies absent, or every copy absent | [`ClientError::NoSuchEntry`] |
//! | otherwise, any copy failed verification | [`ClientError::DigestMismatch`] |
//! | otherwise, a bookie missed the read timeout | [`ClientError::Unexpected`] |
//! | otherwise | [`ClientError::NotEnoughReplicas`] |
//!
//! A corrupt copy is never reported as absent, and absence is only reported
//! when enough replicas agree that no acknowledged write could be hiding
//! elsewhere.

use std::{sync::Arc, time::Instant};

use futures::{Stream, StreamExt, stream::FuturesUnordered};
use ledgerkit_meta::{EntryId, LedgerId, LedgerMetadata};

use crate::{
    context::ClientContext,
    digest::DigestManager,
    entry::{EntryFrame, LedgerEntry},
    error::{ClientError, ClientResult},
    metrics::Operation,
};

/// Reads verified entries of one ledger against a metadata snapshot.
pub(crate) struct EntryReader {
    ctx: Arc<ClientContext>,
    metadata: LedgerMetadata,
    digest: Arc<DigestManager>,
}

impl EntryReader {
    pub(crate) fn new(
        ctx: Arc<ClientContext>,
        metadata: LedgerMetadata,
        digest: Arc<DigestManager>,
    ) -> Self {
        Self { ctx, metadata, digest }
    }

    pub(crate) fn ledger_id(&self) -> LedgerId {
        self.metadata.ledger_id()
    }

    /// Reads and verifies one entry. Every bookie request is bounded by the
    /// read timeout, so the whole read is too.
    pub(crate) async fn read_entry(&self, entry_id: EntryId) -> ClientResult<EntryFrame> {
        let start = Instant::now();
        let result = self.quorum_read(entry_id).await;
        self.ctx.metrics.record(Operation::ReadEntry, start.elapsed(), result.is_ok());
        result
    }

    async fn quorum_read(&self, entry_id: EntryId) -> ClientResult<EntryFrame> {
        let ledger_id = self.ledger_id();
        let quorum = self.metadata.quorum();
        let ensemble = self.metadata.ensemble_at(entry_id);
        let write_set: Vec<_> =
            quorum.write_set(entry_id).into_iter().filter_map(|pos| ensemble.get(pos)).collect();
        if write_set.is_empty() {
            return Err(ClientError::NoSuchEntry { ledger_id, entry_id });
        }

        let bookies = &self.ctx.bookie_client;
        let timeout = self.ctx.config.read_entry_timeout;
        let mut replies: FuturesUnordered<_> = write_set
            .iter()
            .map(|bookie| async move {
                let reply =
                    tokio::time::timeout(timeout, bookies.read_entry(bookie, ledger_id, entry_id))
                        .await;
                (*bookie, reply)
            })
            .collect();

        let mut missing = 0usize;
        let mut corrupt = 0usize;
        let mut timed_out = 0usize;
        let mut failures = Vec::new();
        while let Some((bookie, reply)) = replies.next().await {
            let Ok(reply) = reply else {
                tracing::warn!(
                    ledger_id = %ledger_id,
                    entry_id,
                    bookie = %bookie,
                    timeout_ms = timeout.as_millis() as u64,
                    "bookie read timed out"
                );
                timed_out += 1;
                continue;
            };
            match reply {
                Ok(frame) => match self.digest.verify(entry_id, &frame) {
                    Ok(()) => return Ok(frame),
                    Err(_) => {
                        corrupt += 1;
                        self.ctx.metrics.record_digest_failure();
                        tracing::error!(
                            ledger_id = %ledger_id,
                            entry_id,
                            bookie = %bookie,
                            "entry copy failed digest verification"
                        );
                    },
                },
                Err(err) if err.is_missing() => missing += 1,
                Err(err) => {
                    tracing::warn!(
                        ledger_id = %ledger_id,
                        entry_id,
                        bookie = %bookie,
                        error = %err,
                        "bookie read failed"
                    );
                    failures.push(format!("{bookie}: {err}"));
                },
            }
        }

        let absent_threshold =
            (quorum.write_quorum_size() - quorum.ack_quorum_size() + 1) as usize;
        if missing >= absent_threshold || missing == write_set.len() {
            Err(ClientError::NoSuchEntry { ledger_id, entry_id })
        } else if corrupt > 0 {
            Err(ClientError::DigestMismatch { ledger_id, entry_id })
        } else if timed_out > 0 {
            Err(ClientError::timeout("read_entry"))
        } else {
            Err(ClientError::NotEnoughReplicas {
                ledger_id,
                entry_id,
                message: format!(
                    "{missing} absent, {corrupt} corrupt, failed: [{}]",
                    failures.join("; ")
                ),
            })
        }
    }
}

/// A lazy, single-pass sequence of verified entries in ascending id order.
///
/// Each call to [`next`](Self::next) performs one quorum read. The sequence
/// ends after the last requested entry or after the first error; it cannot
/// be restarted. Entries already returned stay valid.
///
/// ```no_run
/// # async fn example(handle: ledgerkit_client::LedgerHandle) -> ledgerkit_client::ClientResult<()> {
/// let mut entries = handle.read_entries(0, 9)?;
/// while let Some(entry) = entries.next().await {
///     let entry = entry?;
///     println!("{}: {} bytes", entry.entry_id(), entry.payload().len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct LedgerEntries {
    reader: Arc<EntryReader>,
    next_entry: EntryId,
    last_entry: Option<EntryId>,
    done: bool,
}

impl LedgerEntries {
    /// Entries `first..=last`; every absence is an error.
    pub(crate) fn bounded(reader: Arc<EntryReader>, first: EntryId, last: EntryId) -> Self {
        Self { reader, next_entry: first, last_entry: Some(last), done: false }
    }

    /// Entries from `first` until the first absent one, which ends the
    /// sequence without an error.
    pub(crate) fn until_absent(reader: Arc<EntryReader>, first: EntryId) -> Self {
        Self { reader, next_entry: first, last_entry: None, done: false }
    }

    /// Reads the next entry. Returns `None` once the sequence is exhausted
    /// or an error has been returned.
    #[allow(clippy::should_implement_trait)]
    pub async fn next(&mut self) -> Option<ClientResult<LedgerEntry>> {
        if self.done || self.last_entry.is_some_and(|last| self.next_entry > last) {
            self.done = true;
            return None;
        }
        if self.reader.ctx.is_closed() {
            self.done = true;
            return Some(Err(ClientError::ClientClosed));
        }

        let entry_id = self.next_entry;
        match self.reader.read_entry(entry_id).await {
            Ok(frame) => {
                self.next_entry += 1;
                Some(Ok(LedgerEntry::from_frame(frame)))
            },
            Err(ClientError::NoSuchEntry { .. }) if self.last_entry.is_none() => {
                self.done = true;
                None
            },
            Err(err) => {
                self.done = true;
                Some(Err(err))
            },
        }
    }

    /// Reads every remaining entry.
    ///
    /// # Errors
    ///
    /// Returns the first read error; entries read before it are discarded.
    pub async fn try_collect(mut self) -> ClientResult<Vec<LedgerEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await {
            entries.push(entry?);
        }
        Ok(entries)
    }

    /// Adapts the sequence into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = ClientResult<LedgerEntry>> + Send {
        futures::stream::unfold(self, |mut entries| async move {
            entries.next().await.map(|entry| (entry, entries))
        })
    }
}

impl std::fmt::Debug for LedgerEntries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerEntries")
            .field("ledger_id", &self.reader.ledger_id())
            .field("next_entry", &self.next_entry)
            .field("last_entry", &self.last_entry)
            .field("done", &self.done)
            .finish()
    }
}
