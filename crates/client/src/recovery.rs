//! Fencing recovery.
//!
//! A ledger whose writer went away stays OPEN. Opening it with recovery
//! takes it over in four steps:
//!
//! 1. Compare-and-swap the metadata to IN_RECOVERY. Losing this CAS means
//!    another party changed the ledger; if it is now CLOSED, that snapshot
//!    is used as is.
//! 2. Fence the ledger on every bookie of the last ensemble, collecting the
//!    last-add-confirmed each reports. Enough bookies must answer that every
//!    possible ack quorum includes one of them, so no acknowledged append can
//!    be missed and the old writer can no longer reach `Qa` acks.
//! 3. Read forward from the highest reported last-add-confirmed until an
//!    entry is absent, writing every recovered entry back to its write set.
//! 4. Compare-and-swap the metadata to CLOSED at the last recovered entry.

use std::sync::Arc;

use futures::future::join_all;
use ledgerkit_meta::{EntryId, INVALID_ENTRY_ID, LedgerMetadata, Versioned};

use crate::{
    bookie::AddMode,
    context::ClientContext,
    digest::DigestManager,
    entry::EntryFrame,
    error::{ClientError, ClientResult},
    read::EntryReader,
    retry::{with_retry, with_timeout},
};

/// Last-add-confirmed as reported by the bookies of the current ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LastAddConfirmed {
    /// Highest value reported, `-1` if none.
    pub(crate) entry_id: EntryId,
    /// Bookies that answered.
    pub(crate) responses: usize,
}

/// Asks every bookie of the current ensemble for its last-add-confirmed,
/// fencing the ledger on each when `fence` is set. Unreachable bookies and
/// bookies that do not answer within the read timeout are skipped.
pub(crate) async fn read_last_add_confirmed(
    ctx: &ClientContext,
    metadata: &LedgerMetadata,
    fence: bool,
) -> LastAddConfirmed {
    let ledger_id = metadata.ledger_id();
    let (_, ensemble) = metadata.current_ensemble();
    let replies = join_all(ensemble.iter().map(|bookie| async move {
        let reply = with_timeout(
            ctx.config.read_entry_timeout,
            "read_last_add_confirmed",
            ctx.bookie_client.read_last_add_confirmed(
                bookie,
                ledger_id,
                metadata.master_key(),
                fence,
            ),
        )
        .await;
        (bookie, reply)
    }))
    .await;

    let mut lac = LastAddConfirmed { entry_id: INVALID_ENTRY_ID, responses: 0 };
    for (bookie, reply) in replies {
        match reply {
            Ok(entry_id) => {
                lac.responses += 1;
                lac.entry_id = lac.entry_id.max(entry_id);
            },
            Err(err) => {
                tracing::warn!(
                    ledger_id = %ledger_id,
                    bookie = %bookie,
                    fence,
                    error = %err,
                    "last-add-confirmed request failed"
                );
            },
        }
    }
    lac
}

/// Recovers and closes an OPEN or IN_RECOVERY ledger. Returns the CLOSED
/// metadata.
#[tracing::instrument(skip(ctx, metadata, digest), fields(ledger_id = %metadata.value.ledger_id()))]
pub(crate) async fn recover(
    ctx: &Arc<ClientContext>,
    metadata: Versioned<LedgerMetadata>,
    digest: Arc<DigestManager>,
) -> ClientResult<Versioned<LedgerMetadata>> {
    let ledger_id = metadata.value.ledger_id();
    let _lane = ctx.ordering.enter(ledger_id).await;
    ctx.metrics.record_recovery();

    let in_recovery = metadata.value.mark_in_recovery()?;
    let claimed = match with_timeout(
        ctx.config.metadata_timeout,
        "write_ledger_metadata",
        ctx.ledger_manager.write_ledger_metadata(ledger_id, &in_recovery, metadata.version),
    )
    .await
    {
        Ok(claimed) => claimed,
        Err(err @ ClientError::VersionConflict { .. }) => {
            let current = with_retry(
                &ctx.config.metadata_retry,
                ctx.config.metadata_timeout,
                &ctx.metrics,
                "read_ledger_metadata",
                || ctx.ledger_manager.read_ledger_metadata(ledger_id),
            )
            .await?;
            if current.value.is_closed() {
                tracing::debug!(ledger_id = %ledger_id, "ledger closed concurrently");
                return Ok(current);
            }
            return Err(err);
        },
        Err(err) => return Err(err),
    };

    let quorum = claimed.value.quorum();
    let ensemble_size = quorum.ensemble_size() as usize;
    let required = (ensemble_size - quorum.ack_quorum_size() as usize + 1).min(ensemble_size);
    let fenced = read_last_add_confirmed(ctx, &claimed.value, true).await;
    if fenced.responses < required {
        return Err(ClientError::NotEnoughReplicas {
            ledger_id,
            entry_id: INVALID_ENTRY_ID,
            message: format!(
                "fenced {} of {ensemble_size} bookies, {required} required",
                fenced.responses
            ),
        });
    }
    tracing::debug!(ledger_id = %ledger_id, last_add_confirmed = fenced.entry_id, "ledger fenced");

    let reader = EntryReader::new(Arc::clone(ctx), claimed.value.clone(), digest);
    let mut last_entry_id = fenced.entry_id;
    let mut length = 0;
    if last_entry_id >= 0 {
        length = reader.read_entry(last_entry_id).await?.length;
    }
    loop {
        let entry_id = last_entry_id + 1;
        let frame = match reader.read_entry(entry_id).await {
            Ok(frame) => frame,
            Err(ClientError::NoSuchEntry { .. }) => break,
            Err(err) => return Err(err),
        };
        length = frame.length;
        rereplicate(ctx, &claimed.value, frame).await?;
        last_entry_id = entry_id;
    }

    let closed = claimed.value.close(last_entry_id, length)?;
    let written = with_timeout(
        ctx.config.metadata_timeout,
        "write_ledger_metadata",
        ctx.ledger_manager.write_ledger_metadata(ledger_id, &closed, claimed.version),
    )
    .await?;
    tracing::debug!(ledger_id = %ledger_id, last_entry_id, length, "ledger recovered");
    Ok(written)
}

/// Writes a recovered frame to its whole write set, requiring `Qa` acks.
/// A bookie that does not acknowledge within the add timeout counts as a
/// failed write.
async fn rereplicate(
    ctx: &ClientContext,
    metadata: &LedgerMetadata,
    frame: EntryFrame,
) -> ClientResult<()> {
    let ledger_id = metadata.ledger_id();
    let entry_id = frame.entry_id;
    let quorum = metadata.quorum();
    let ensemble = metadata.ensemble_at(entry_id);
    let writes = quorum.write_set(entry_id).into_iter().filter_map(|pos| ensemble.get(pos)).map(
        |bookie| {
            let frame = frame.clone();
            async move {
                with_timeout(
                    ctx.config.add_entry_timeout,
                    "add_entry",
                    ctx.bookie_client.add_entry(
                        bookie,
                        metadata.master_key(),
                        frame,
                        AddMode::Recovery,
                    ),
                )
                .await
            }
        },
    );
    let acks = join_all(writes).await.into_iter().filter(Result::is_ok).count();
    if acks < quorum.ack_quorum_size() as usize {
        return Err(ClientError::NotEnoughReplicas {
            ledger_id,
            entry_id,
            message: format!(
                "recovery write reached {acks} of {} bookies",
                quorum.ack_quorum_size()
            ),
        });
    }
    Ok(())
}
