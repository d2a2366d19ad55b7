//! Administrative access to ledgers.

use std::sync::Arc;

use ledgerkit_meta::{EntryId, INVALID_ENTRY_ID, LedgerId};
use zeroize::Zeroizing;

use crate::{
    client::{authenticate, read_metadata},
    context::ClientContext,
    digest::DigestManager,
    error::{ClientError, ClientResult},
    read::{EntryReader, LedgerEntries},
    retry::with_retry,
};

/// Maintenance operations that bypass ledger handles.
///
/// Obtained from [`LedgerClient::admin`](crate::LedgerClient::admin). Entries
/// are verified with the password given there and the digest type recorded
/// in each ledger's metadata.
pub struct LedgerAdmin {
    ctx: Arc<ClientContext>,
    password: Zeroizing<Vec<u8>>,
}

impl LedgerAdmin {
    pub(crate) fn new(ctx: Arc<ClientContext>, password: Vec<u8>) -> Self {
        Self { ctx, password: Zeroizing::new(password) }
    }

    /// Reads entries `first..=last` of a ledger without recovering it.
    ///
    /// A `last` of `-1` reads until the first absent entry, which ends the
    /// sequence quietly. Reads are not limited to the last-add-confirmed, so
    /// entries of a ledger that is still being written are visible.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidArgument`] if `ledger_id` or `first` is
    ///   negative, `last < -1`, or `first > last` for `last >= 0`, or if the
    ///   admin password does not match the ledger.
    /// - [`ClientError::ClientClosed`] after client shutdown.
    /// - [`ClientError::NoSuchLedger`] if the ledger does not exist.
    #[tracing::instrument(skip(self))]
    pub async fn read_entries(
        &self,
        ledger_id: i64,
        first: EntryId,
        last: EntryId,
    ) -> ClientResult<LedgerEntries> {
        let ledger_id = LedgerId::try_from(ledger_id)?;
        if first < 0 || last < INVALID_ENTRY_ID || (last != INVALID_ENTRY_ID && first > last) {
            return Err(ClientError::invalid_argument(format!(
                "invalid entry range {first}..={last}"
            )));
        }
        if self.ctx.is_closed() {
            return Err(ClientError::ClientClosed);
        }

        let metadata = read_metadata(&self.ctx, ledger_id).await?.value;
        let digest_type = metadata.digest_type();
        authenticate(&metadata, digest_type, &self.password)?;
        let digest = Arc::new(DigestManager::new(ledger_id, digest_type, &self.password)?);
        let reader = Arc::new(EntryReader::new(Arc::clone(&self.ctx), metadata, digest));

        Ok(if last == INVALID_ENTRY_ID {
            LedgerEntries::until_absent(reader, first)
        } else {
            LedgerEntries::bounded(reader, first, last)
        })
    }

    /// Ids of every ledger in the metadata store, ascending.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ClientClosed`] after client shutdown.
    /// - [`ClientError::Unexpected`] if the store fails.
    #[tracing::instrument(skip(self))]
    pub async fn list_ledgers(&self) -> ClientResult<Vec<LedgerId>> {
        if self.ctx.is_closed() {
            return Err(ClientError::ClientClosed);
        }
        with_retry(
            &self.ctx.config.metadata_retry,
            self.ctx.config.metadata_timeout,
            &self.ctx.metrics,
            "list_ledgers",
            || self.ctx.ledger_manager.list_ledgers(),
        )
        .await
    }
}

impl std::fmt::Debug for LedgerAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerAdmin").finish_non_exhaustive()
    }
}
