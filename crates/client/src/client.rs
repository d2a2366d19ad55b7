//! The ledger lifecycle manager.
//!
//! [`LedgerClient`] creates, opens and deletes ledgers. Each lifecycle call
//! validates its arguments first and touches collaborators only once they
//! are known to be acceptable, so a rejected call has no side effects.
//!
//! # Create
//!
//! Checks run in this order, each failing with its own error class:
//!
//! 1. client closed → [`ClientError::ClientClosed`]
//! 2. quorum violated → [`ClientError::InvalidArgument`]
//! 3. password absent → [`ClientError::NullInput`]
//!
//! A ledger id is then allocated, an ensemble selected and the OPEN metadata
//! persisted. If persisting fails the id is abandoned; nothing else refers
//! to it.

use std::{collections::BTreeMap, fmt, sync::Arc, time::Instant};

use bytes::Bytes;
use fail::fail_point;
use ledgerkit_meta::{
    DigestType, INVALID_ENTRY_ID, LedgerId, LedgerIdGenerator, LedgerManager, LedgerMetadata,
    QuorumConfig, Versioned,
};

use crate::{
    admin::LedgerAdmin,
    bookie::BookieClient,
    config::ClientConfig,
    context::ClientContext,
    digest::{self, DigestManager},
    ensemble::EnsembleProvider,
    error::{ClientError, ClientResult},
    handle::{HandleMode, LedgerHandle},
    metrics::{Metrics, Operation},
    recovery,
    retry::{with_retry, with_timeout},
};

/// Parameters of a new ledger.
///
/// ```
/// use ledgerkit_client::CreateLedgerOptions;
/// use ledgerkit_meta::DigestType;
///
/// let options = CreateLedgerOptions::builder()
///     .ensemble_size(3)
///     .write_quorum_size(3)
///     .ack_quorum_size(2)
///     .digest_type(DigestType::Crc32c)
///     .password(b"secret")
///     .build();
/// assert_eq!(options.ensemble_size, 3);
/// ```
#[derive(Clone, bon::Builder)]
pub struct CreateLedgerOptions {
    /// Bookies per ensemble (`E`).
    pub ensemble_size: u32,
    /// Copies written per entry (`Qw`).
    pub write_quorum_size: u32,
    /// Acknowledgements required per entry (`Qa`).
    pub ack_quorum_size: u32,
    /// Integrity code of every entry.
    #[builder(default)]
    pub digest_type: DigestType,
    /// Secret bound to the ledger. Empty is valid; absent is rejected.
    #[builder(into)]
    pub password: Option<Vec<u8>>,
    /// Application properties stored with the metadata.
    #[builder(default)]
    pub custom_metadata: BTreeMap<String, Bytes>,
}

impl fmt::Debug for CreateLedgerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateLedgerOptions")
            .field("ensemble_size", &self.ensemble_size)
            .field("write_quorum_size", &self.write_quorum_size)
            .field("ack_quorum_size", &self.ack_quorum_size)
            .field("digest_type", &self.digest_type)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("custom_metadata", &self.custom_metadata.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Client of a ledger store.
///
/// Cloning is cheap; clones share collaborators, open handles and the
/// closed flag.
#[derive(Clone)]
pub struct LedgerClient {
    ctx: Arc<ClientContext>,
}

#[bon::bon]
impl LedgerClient {
    /// Creates a client over the given collaborators.
    ///
    /// # Optional Fields
    ///
    /// * `config` - Timeouts and retry policy (default: [`ClientConfig::default`]).
    /// * `metrics` - Counter collector, shareable with other clients (default: new).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if `config` fails validation.
    #[builder]
    pub fn new(
        #[builder(default)] config: ClientConfig,
        ledger_manager: Arc<dyn LedgerManager>,
        id_generator: Arc<dyn LedgerIdGenerator>,
        ensemble_provider: Arc<dyn EnsembleProvider>,
        bookie_client: Arc<dyn BookieClient>,
        #[builder(default)] metrics: Metrics,
    ) -> ClientResult<Self> {
        config.validate()?;
        let ctx = ClientContext::new(
            config,
            ledger_manager,
            id_generator,
            ensemble_provider,
            bookie_client,
            metrics,
        );
        Ok(Self { ctx: Arc::new(ctx) })
    }
}

impl LedgerClient {
    /// Creates a ledger and returns its writer handle.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ClientClosed`] after [`close`](Self::close).
    /// - [`ClientError::InvalidArgument`] if `Qw > E`, `Qa > Qw` or `E == 0`.
    /// - [`ClientError::NullInput`] if no password was supplied.
    /// - [`ClientError::Unexpected`] if id allocation, ensemble selection or
    ///   the metadata write fails or times out.
    #[tracing::instrument(
        skip(self, options),
        fields(
            ensemble_size = options.ensemble_size,
            write_quorum_size = options.write_quorum_size,
            ack_quorum_size = options.ack_quorum_size,
            digest_type = %options.digest_type,
            ledger_id = tracing::field::Empty,
        )
    )]
    pub async fn create_ledger(&self, options: CreateLedgerOptions) -> ClientResult<LedgerHandle> {
        let start = Instant::now();
        let result = self.create(options).await;
        self.ctx.metrics.record(Operation::Create, start.elapsed(), result.is_ok());
        result
    }

    async fn create(&self, options: CreateLedgerOptions) -> ClientResult<LedgerHandle> {
        let ctx = &self.ctx;
        if ctx.is_closed() {
            return Err(ClientError::ClientClosed);
        }
        let quorum = QuorumConfig::new(
            options.ensemble_size,
            options.write_quorum_size,
            options.ack_quorum_size,
        )?;
        let password = options.password.ok_or(ClientError::NullInput { argument: "password" })?;

        let ledger_id = with_timeout(
            ctx.config.metadata_timeout,
            "generate_ledger_id",
            ctx.id_generator.generate_ledger_id(),
        )
        .await?;
        tracing::Span::current().record("ledger_id", tracing::field::display(ledger_id));

        let ensemble = with_timeout(
            ctx.config.metadata_timeout,
            "select_ensemble",
            ctx.ensemble_provider.select(quorum.ensemble_size() as usize, &[]),
        )
        .await?;
        let metadata = LedgerMetadata::builder()
            .ledger_id(ledger_id)
            .quorum(quorum)
            .digest_type(options.digest_type)
            .master_key(digest::master_key(options.digest_type, &password))
            .ensemble(ensemble)
            .custom_metadata(options.custom_metadata)
            .build()?;
        let digest = DigestManager::new(ledger_id, options.digest_type, &password)?;

        fail_point!("client-create-before-persist", |_| {
            Err(ClientError::unexpected("injected failure before metadata persistence"))
        });
        let created = with_timeout(
            ctx.config.metadata_timeout,
            "create_ledger_metadata",
            ctx.ledger_manager.create_ledger_metadata(ledger_id, &metadata),
        )
        .await?;

        tracing::debug!(ledger_id = %ledger_id, version = %created.version, "ledger created");
        Ok(LedgerHandle::new(
            Arc::clone(ctx),
            created,
            Arc::new(digest),
            HandleMode::Writer,
            INVALID_ENTRY_ID,
        ))
    }

    /// Opens a ledger, recovering and closing it first if it is still OPEN.
    ///
    /// The returned handle is read-only and its metadata is CLOSED.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ClientClosed`] after [`close`](Self::close).
    /// - [`ClientError::NoSuchLedger`] if the ledger does not exist.
    /// - [`ClientError::InvalidArgument`] if the digest type or password do
    ///   not match the ledger's.
    /// - [`ClientError::VersionConflict`] if another party changed the ledger
    ///   during recovery without closing it.
    /// - [`ClientError::NotEnoughReplicas`] if too few bookies could be fenced.
    #[tracing::instrument(
        skip(self, password),
        fields(ledger_id = %ledger_id, digest_type = %digest_type)
    )]
    pub async fn open_ledger(
        &self,
        ledger_id: LedgerId,
        digest_type: DigestType,
        password: &[u8],
    ) -> ClientResult<LedgerHandle> {
        let start = Instant::now();
        let result = self.open(ledger_id, digest_type, password, true).await;
        self.ctx.metrics.record(Operation::Open, start.elapsed(), result.is_ok());
        result
    }

    /// Opens a ledger without fencing or recovery.
    ///
    /// The returned handle is read-only. For an OPEN ledger it reads up to
    /// the last-add-confirmed reported by the current ensemble.
    ///
    /// # Errors
    ///
    /// As for [`open_ledger`](Self::open_ledger), minus the recovery errors.
    #[tracing::instrument(
        skip(self, password),
        fields(ledger_id = %ledger_id, digest_type = %digest_type)
    )]
    pub async fn open_ledger_no_recovery(
        &self,
        ledger_id: LedgerId,
        digest_type: DigestType,
        password: &[u8],
    ) -> ClientResult<LedgerHandle> {
        let start = Instant::now();
        let result = self.open(ledger_id, digest_type, password, false).await;
        self.ctx.metrics.record(Operation::Open, start.elapsed(), result.is_ok());
        result
    }

    async fn open(
        &self,
        ledger_id: LedgerId,
        digest_type: DigestType,
        password: &[u8],
        recover: bool,
    ) -> ClientResult<LedgerHandle> {
        let ctx = &self.ctx;
        if ctx.is_closed() {
            return Err(ClientError::ClientClosed);
        }
        let stored = read_metadata(ctx, ledger_id).await?;
        authenticate(&stored.value, digest_type, password)?;
        let digest = Arc::new(DigestManager::new(ledger_id, digest_type, password)?);

        let metadata = if recover && !stored.value.is_closed() {
            recovery::recover(ctx, stored, Arc::clone(&digest)).await?
        } else {
            stored
        };
        let last_add_confirmed = if metadata.value.is_closed() {
            metadata.value.last_entry_id()
        } else {
            recovery::read_last_add_confirmed(ctx, &metadata.value, false).await.entry_id
        };

        tracing::debug!(
            ledger_id = %ledger_id,
            state = ?metadata.value.state(),
            last_add_confirmed,
            "ledger opened"
        );
        Ok(LedgerHandle::new(
            Arc::clone(ctx),
            metadata,
            digest,
            HandleMode::ReadOnly,
            last_add_confirmed,
        ))
    }

    /// Deletes a ledger's metadata.
    ///
    /// Handles of the ledger held by this client fail their next append with
    /// [`ClientError::LedgerClosed`].
    ///
    /// # Errors
    ///
    /// - [`ClientError::ClientClosed`] after [`close`](Self::close).
    /// - [`ClientError::NoSuchLedger`] if the ledger does not exist.
    #[tracing::instrument(skip(self), fields(ledger_id = %ledger_id))]
    pub async fn delete_ledger(&self, ledger_id: LedgerId) -> ClientResult<()> {
        let start = Instant::now();
        let result = self.delete(ledger_id).await;
        self.ctx.metrics.record(Operation::Delete, start.elapsed(), result.is_ok());
        result
    }

    async fn delete(&self, ledger_id: LedgerId) -> ClientResult<()> {
        let ctx = &self.ctx;
        if ctx.is_closed() {
            return Err(ClientError::ClientClosed);
        }
        with_timeout(
            ctx.config.metadata_timeout,
            "remove_ledger_metadata",
            ctx.ledger_manager.remove_ledger_metadata(ledger_id),
        )
        .await?;
        let revoked = ctx.handles.revoke(ledger_id);
        tracing::debug!(ledger_id = %ledger_id, revoked, "ledger deleted");
        Ok(())
    }

    /// Shuts the client down.
    ///
    /// Every later lifecycle call fails with [`ClientError::ClientClosed`],
    /// as do appends and reads on handles of this client. In-flight
    /// operations run to completion. Closing twice is a no-op.
    pub fn close(&self) {
        if self.ctx.mark_closed() {
            let dropped = self.ctx.handles.drain();
            tracing::debug!(open_handles = dropped, "ledger client closed");
            self.ctx.metrics.log_metrics();
        }
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.ctx.is_closed()
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.ctx.config
    }

    /// Counters of this client.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.ctx.metrics
    }

    /// Number of registered handles.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.ctx.handles.count()
    }

    /// Administrative access, verifying entries with `password`.
    #[must_use]
    pub fn admin(&self, password: impl Into<Vec<u8>>) -> LedgerAdmin {
        LedgerAdmin::new(Arc::clone(&self.ctx), password.into())
    }
}

impl fmt::Debug for LedgerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerClient").field("ctx", &self.ctx).finish()
    }
}

/// Reads a ledger's metadata, retrying transient store failures.
pub(crate) async fn read_metadata(
    ctx: &ClientContext,
    ledger_id: LedgerId,
) -> ClientResult<Versioned<LedgerMetadata>> {
    with_retry(
        &ctx.config.metadata_retry,
        ctx.config.metadata_timeout,
        &ctx.metrics,
        "read_ledger_metadata",
        || ctx.ledger_manager.read_ledger_metadata(ledger_id),
    )
    .await
}

/// Checks caller credentials against the stored master key.
pub(crate) fn authenticate(
    metadata: &LedgerMetadata,
    digest_type: DigestType,
    password: &[u8],
) -> ClientResult<()> {
    if metadata.digest_type() != digest_type {
        return Err(ClientError::invalid_argument(format!(
            "digest type {digest_type} does not match ledger {} ({})",
            metadata.ledger_id(),
            metadata.digest_type()
        )));
    }
    if !digest::verify_master_key(metadata.master_key(), digest_type, password) {
        return Err(ClientError::invalid_argument(format!(
            "password does not match ledger {}",
            metadata.ledger_id()
        )));
    }
    Ok(())
}
