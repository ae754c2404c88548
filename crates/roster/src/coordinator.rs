//! Lecturer lifecycle sagas.
//!
//! [`LifecycleCoordinator`] keeps the relational store and the object store
//! consistent for a lecturer and its attachment. The two stores share no
//! transaction, so every saga orders its side effects around the single
//! relational commit:
//!
//! - **create** uploads the blob *before* commit and compensates it if anything up to and including
//!   the commit fails.
//! - **delete** removes the blob only *after* commit. If that fails the delete still succeeds and
//!   the blob is queued in the [`ReconciliationBacklog`].
//!
//! Each saga runs on its own tokio task. Dropping the caller's future does
//! not interrupt a saga midway, so compensation always runs to completion.

use std::{sync::Arc, time::Instant};

use fail::fail_point;
use tracing::Instrument;

use crate::{
    attachment::AttachmentStore,
    catalog::EntityCatalog,
    config::RosterConfig,
    error::{ConfigError, RelationalResult, RosterError, RosterResult},
    ledger::RankLedger,
    metrics::RosterMetrics,
    object_store::ObjectStore,
    reconcile::{OrphanReason, ReconciliationBacklog, Reconciler},
    relational::{RelationalStore, RelationalTransaction},
    retry::with_retry,
    saga::{CreatePhase, DeletePhase, SagaState},
    types::{
        AttachmentName, EntityId, Lecturer, LecturerProfile, LecturerRecord, NewLecturer,
        Partition, Rank,
    },
};

/// What happened to a deleted lecturer's attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentOutcome {
    /// The lecturer had no attachment.
    None,
    /// The blob was removed.
    Reclaimed(AttachmentName),
    /// The blob could not be removed and is queued for reconciliation.
    Pending {
        /// The queued attachment.
        name: AttachmentName,
        /// Delete attempts made before queueing.
        attempts: u32,
    },
}

/// Result of a successful delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    /// The deleted lecturer.
    pub entity: EntityId,
    /// The partition it was removed from.
    pub partition: Partition,
    /// The rank it held; every rank above it moved down by one.
    pub released_rank: Rank,
    /// The fate of its attachment.
    pub attachment: AttachmentOutcome,
}

impl DeleteReport {
    /// Returns `true` if nothing is left for the reconciler.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !matches!(self.attachment, AttachmentOutcome::Pending { .. })
    }

    /// Converts a pending attachment cleanup into an error, for callers that
    /// treat a queued orphan as a failure.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError::ReconciliationPending`] if the attachment was
    /// queued for reconciliation.
    pub fn require_complete(self) -> RosterResult<Self> {
        match &self.attachment {
            AttachmentOutcome::Pending { name, attempts } => {
                Err(RosterError::ReconciliationPending { name: name.clone(), attempts: *attempts })
            },
            _ => Ok(self),
        }
    }
}

/// Orchestrates create, delete and profile updates across both stores.
///
/// Cheaply cloneable; clones share collaborators, backlog and metrics.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use faculty_roster::{
///     AttachmentPayload, LecturerProfile, LifecycleCoordinator, MemoryObjectStore,
///     MemoryRelationalStore, NewLecturer, Partition, RosterConfig,
/// };
///
/// # tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap().block_on(async {
/// let coordinator = LifecycleCoordinator::new(
///     Arc::new(MemoryRelationalStore::new()),
///     Arc::new(MemoryObjectStore::new("pictures")),
///     RosterConfig::default(),
/// )
/// .unwrap();
///
/// let created = coordinator
///     .create(
///         NewLecturer::builder()
///             .partition(Partition::FullTime)
///             .profile(
///                 LecturerProfile::builder()
///                     .name("Ada")
///                     .designation("Lecturer")
///                     .qualifications("PhD")
///                     .build(),
///             )
///             .picture(AttachmentPayload::new(&b"png"[..], "image/png"))
///             .build(),
///     )
///     .await
///     .unwrap();
/// assert_eq!(created.rank.get(), 1);
/// assert!(created.picture_url.is_some());
///
/// let report = coordinator.delete(created.id, Partition::FullTime).await.unwrap();
/// assert_eq!(report.released_rank.get(), 1);
/// # });
/// ```
#[derive(Clone)]
pub struct LifecycleCoordinator {
    relational: Arc<dyn RelationalStore>,
    ledger: RankLedger,
    attachments: AttachmentStore,
    backlog: ReconciliationBacklog,
    metrics: RosterMetrics,
    config: Arc<RosterConfig>,
}

impl LifecycleCoordinator {
    /// Creates a coordinator over the given stores.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        objects: Arc<dyn ObjectStore>,
        config: RosterConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            ledger: RankLedger::new(Arc::clone(&relational)),
            relational,
            attachments: AttachmentStore::new(objects),
            backlog: ReconciliationBacklog::new(),
            metrics: RosterMetrics::new(),
            config: Arc::new(config),
        })
    }

    /// Returns the shared reconciliation backlog.
    #[must_use]
    pub fn backlog(&self) -> &ReconciliationBacklog {
        &self.backlog
    }

    /// Returns the shared metrics.
    #[must_use]
    pub fn metrics(&self) -> &RosterMetrics {
        &self.metrics
    }

    /// Returns the rank ledger.
    #[must_use]
    pub fn ledger(&self) -> &RankLedger {
        &self.ledger
    }

    /// Returns the attachment store.
    #[must_use]
    pub fn attachments(&self) -> &AttachmentStore {
        &self.attachments
    }

    /// Returns a read-only catalog over the same stores.
    #[must_use]
    pub fn catalog(&self) -> EntityCatalog {
        EntityCatalog::new(Arc::clone(&self.relational))
    }

    /// Returns a reconciler draining this coordinator's backlog.
    #[must_use]
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::clone(&self.relational),
            self.attachments.clone(),
            self.backlog.clone(),
            self.metrics.clone(),
            self.config.reconciler().clone(),
        )
    }

    /// Creates a lecturer ranked last in its partition, with an optional picture.
    ///
    /// On success the returned [`Lecturer`] carries its rank and, if a
    /// picture was stored, a signed URL valid for the configured TTL. A URL
    /// that cannot be signed is logged and omitted; the create still stands.
    ///
    /// # Errors
    ///
    /// - [`RosterError::InvalidInput`] if the profile is rejected
    /// - [`RosterError::LedgerWrite`] if the relational store fails, including at commit
    /// - [`RosterError::AttachmentWrite`] if the picture upload fails
    ///
    /// On any error nothing is left behind: the transaction is rolled back and
    /// an uploaded blob is deleted (or queued for reconciliation).
    #[tracing::instrument(skip(self, request), fields(partition = %request.partition))]
    pub async fn create(&self, request: NewLecturer) -> RosterResult<Lecturer> {
        request.profile.validate()?;
        let this = self.clone();
        let saga = async move {
            let started = Instant::now();
            let result = this.run_create(request).await;
            match &result {
                Ok(_) => this.metrics.record_create(started.elapsed()),
                Err(_) => this.metrics.record_create_failure(),
            }
            result
        };
        tokio::spawn(saga.in_current_span())
            .await
            .map_err(|e| RosterError::internal(format!("create saga task failed: {e}")))?
    }

    async fn run_create(&self, request: NewLecturer) -> RosterResult<Lecturer> {
        let NewLecturer { partition, profile, picture } = request;
        let picture = picture.filter(|p| !p.is_empty());
        let mut saga = SagaState::<CreatePhase>::new();

        let mut txn = match self.relational.begin().await {
            Ok(txn) => txn,
            Err(e) => {
                let err = RosterError::ledger_write("begin", e);
                return Err(self.abort_create(&mut saga, None, None, err).await);
            },
        };

        // Step 1: lecturer row and rank, inside the transaction.
        let reserved = match txn.insert_lecturer(partition, &profile).await {
            Ok(id) => {
                saga.bind_entity(id);
                self.ledger.insert(txn.as_mut(), partition, id).await.map(|rank| (id, rank))
            },
            Err(e) => Err(RosterError::ledger_write("insert_lecturer", e)),
        };
        let (id, rank) = match reserved {
            Ok(reserved) => reserved,
            Err(err) => return Err(self.abort_create(&mut saga, Some(txn), None, err).await),
        };
        saga.advance(CreatePhase::LedgerReserved)?;

        // Steps 2 and 3: upload, then point the row at the blob.
        let mut attachment = None;
        if let Some(payload) = picture {
            let name = AttachmentName::for_lecturer(id, &profile.name);
            if let Err(err) = self.attachments.put(&name, &payload).await {
                return Err(self.abort_create(&mut saga, Some(txn), None, err).await);
            }
            saga.advance(CreatePhase::AttachmentWritten)?;

            let linked = match txn.set_attachment(id, Some(&name)).await {
                Ok(1) => Ok(()),
                Ok(rows) => Err(RosterError::internal(format!(
                    "attachment update for {id} affected {rows} rows"
                ))),
                Err(e) => Err(RosterError::ledger_write("set_attachment", e)),
            };
            if let Err(err) = linked {
                return Err(self.abort_create(&mut saga, Some(txn), Some(&name), err).await);
            }
            attachment = Some(name);
        }

        // Step 4: the point of no return.
        if let Err(e) = commit_create(txn).await {
            let err = RosterError::ledger_write("commit", e);
            return Err(self.abort_create(&mut saga, None, attachment.as_ref(), err).await);
        }
        saga.advance(CreatePhase::Committed)?;

        // Step 5
        let picture_url = match &attachment {
            Some(name) => match self.attachments.signed_url(name, self.config.signed_url_ttl()).await
            {
                Ok(url) => Some(url),
                Err(err) => {
                    tracing::warn!(%id, error = %err, "could not sign attachment URL after create");
                    None
                },
            },
            None => None,
        };
        saga.advance(CreatePhase::Done)?;

        tracing::debug!(
            %id,
            %partition,
            %rank,
            has_attachment = attachment.is_some(),
            "lecturer created",
        );
        Ok(Lecturer { id, partition, rank, profile, attachment, picture_url })
    }

    /// Rolls back, compensates an uploaded blob, and returns `err` unchanged.
    async fn abort_create(
        &self,
        saga: &mut SagaState<CreatePhase>,
        txn: Option<Box<dyn RelationalTransaction>>,
        uploaded: Option<&AttachmentName>,
        err: RosterError,
    ) -> RosterError {
        if let Err(transition) = saga.advance(CreatePhase::Aborting) {
            tracing::error!(error = %transition, "create saga could not enter aborting");
        }
        tracing::warn!(entity = ?saga.entity(), error = %err, "create saga aborting");

        if let Some(txn) = txn
            && let Err(e) = txn.rollback().await
        {
            // The store discards the transaction when the handle is dropped.
            tracing::warn!(error = %e, "rollback failed");
        }
        if let Some(name) = uploaded {
            self.compensate_upload(name).await;
        }

        if let Err(transition) = saga.advance(CreatePhase::Failed) {
            tracing::error!(error = %transition, "create saga could not enter failed");
        }
        err
    }

    /// Deletes a blob uploaded by an aborted create, queueing it on failure.
    async fn compensate_upload(&self, name: &AttachmentName) {
        let retry = self.config.compensation_retry();
        match with_retry(retry, &self.metrics, "compensate_attachment", || {
            self.attachments.delete(name)
        })
        .await
        {
            Ok(()) => {
                self.metrics.record_compensation();
                tracing::warn!(%name, "uploaded attachment compensated");
            },
            Err(err) => {
                let attempts = if err.is_transient() { retry.max_attempts() } else { 1 };
                self.backlog.record(name.clone(), OrphanReason::CreateAborted, attempts, Some(&err));
                self.metrics.record_orphan();
                tracing::error!(%name, error = %err, "compensation failed, orphan recorded");
            },
        }
    }

    /// Deletes a lecturer from `partition`, closing its rank gap, then removes
    /// its attachment.
    ///
    /// Once the relational commit succeeds the delete is reported as a
    /// success even if the attachment cannot be removed; see
    /// [`DeleteReport::attachment`].
    ///
    /// # Errors
    ///
    /// - [`RosterError::NotFound`] if the lecturer does not exist in `partition`
    /// - [`RosterError::LedgerWrite`] if the relational store fails before or at commit
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, entity: EntityId, partition: Partition) -> RosterResult<DeleteReport> {
        let this = self.clone();
        let saga = async move {
            let started = Instant::now();
            let result = this.run_delete(entity, partition).await;
            match &result {
                Ok(_) => this.metrics.record_delete(started.elapsed()),
                Err(_) => this.metrics.record_delete_failure(),
            }
            result
        };
        tokio::spawn(saga.in_current_span())
            .await
            .map_err(|e| RosterError::internal(format!("delete saga task failed: {e}")))?
    }

    async fn run_delete(&self, entity: EntityId, partition: Partition) -> RosterResult<DeleteReport> {
        let mut saga = SagaState::<DeletePhase>::for_entity(entity);

        // Step 1
        let record = self
            .relational
            .lecturer(entity)
            .await
            .map_err(|e| RosterError::ledger_write("read_lecturer", e))?;
        if record.is_none_or(|r| r.partition != partition) {
            return Err(RosterError::not_found_in(entity, partition));
        }

        // Step 2
        let mut txn =
            self.relational.begin().await.map_err(|e| RosterError::ledger_write("begin", e))?;
        let (released_rank, attachment) = match self.release(txn.as_mut(), entity, partition).await
        {
            Ok(released) => released,
            Err(err) => {
                Self::abort_delete(&mut saga, txn, &err).await;
                return Err(err);
            },
        };
        saga.advance(DeletePhase::LedgerReleased)?;

        // Step 3
        if let Err(e) = commit_delete(txn).await {
            let err = RosterError::ledger_write("commit", e);
            saga.advance(DeletePhase::Aborting)?;
            tracing::warn!(%entity, error = %err, "delete saga aborting");
            saga.advance(DeletePhase::Failed)?;
            return Err(err);
        }
        saga.advance(DeletePhase::Committed)?;

        // Step 4: the row is gone for good; only the blob remains.
        let attachment = match attachment {
            None => {
                saga.advance(DeletePhase::AttachmentReclaimed)?;
                AttachmentOutcome::None
            },
            Some(name) => {
                let retry = self.config.compensation_retry();
                match with_retry(retry, &self.metrics, "reclaim_attachment", || {
                    self.attachments.delete(&name)
                })
                .await
                {
                    Ok(()) => {
                        saga.advance(DeletePhase::AttachmentReclaimed)?;
                        AttachmentOutcome::Reclaimed(name)
                    },
                    Err(err) => {
                        let attempts = if err.is_transient() { retry.max_attempts() } else { 1 };
                        self.backlog.record(
                            name.clone(),
                            OrphanReason::DeletedOwner,
                            attempts,
                            Some(&err),
                        );
                        self.metrics.record_orphan();
                        tracing::error!(
                            %entity,
                            %name,
                            error = %err,
                            "attachment delete failed after commit, orphan recorded",
                        );
                        saga.advance(DeletePhase::ReconciliationPending)?;
                        AttachmentOutcome::Pending { name, attempts }
                    },
                }
            },
        };
        if saga.phase() == DeletePhase::AttachmentReclaimed {
            saga.advance(DeletePhase::Done)?;
        }

        tracing::debug!(%entity, %partition, %released_rank, "lecturer deleted");
        Ok(DeleteReport { entity, partition, released_rank, attachment })
    }

    /// Releases the rank and deletes the row inside `txn`. Returns the
    /// released rank and the attachment the row referenced.
    async fn release(
        &self,
        txn: &mut dyn RelationalTransaction,
        entity: EntityId,
        partition: Partition,
    ) -> RosterResult<(Rank, Option<AttachmentName>)> {
        let released = self.ledger.remove(txn, partition, entity).await?;
        let attachment = txn
            .lecturer(entity)
            .await
            .map_err(|e| RosterError::ledger_write("read_lecturer", e))?
            .and_then(|record| record.attachment);
        let deleted = txn
            .delete_lecturer(entity)
            .await
            .map_err(|e| RosterError::ledger_write("delete_lecturer", e))?;
        if deleted == 0 {
            return Err(RosterError::not_found_in(entity, partition));
        }
        Ok((released, attachment))
    }

    async fn abort_delete(
        saga: &mut SagaState<DeletePhase>,
        txn: Box<dyn RelationalTransaction>,
        err: &RosterError,
    ) {
        if let Err(transition) = saga.advance(DeletePhase::Aborting) {
            tracing::error!(error = %transition, "delete saga could not enter aborting");
        }
        tracing::warn!(entity = ?saga.entity(), error = %err, "delete saga aborting");
        if let Err(e) = txn.rollback().await {
            tracing::warn!(error = %e, "rollback failed");
        }
        if let Err(transition) = saga.advance(DeletePhase::Failed) {
            tracing::error!(error = %transition, "delete saga could not enter failed");
        }
    }

    /// Replaces a lecturer's descriptive attributes.
    ///
    /// Partition, rank and attachment are unchanged; the attachment keeps the
    /// name it was created under.
    ///
    /// # Errors
    ///
    /// - [`RosterError::InvalidInput`] if the profile is rejected
    /// - [`RosterError::NotFound`] if the lecturer does not exist
    /// - [`RosterError::LedgerWrite`] if the relational store fails
    #[tracing::instrument(skip(self, profile))]
    pub async fn update_profile(
        &self,
        entity: EntityId,
        profile: LecturerProfile,
    ) -> RosterResult<LecturerRecord> {
        profile.validate()?;
        let mut txn =
            self.relational.begin().await.map_err(|e| RosterError::ledger_write("begin", e))?;

        let updated = txn
            .update_profile(entity, &profile)
            .await
            .map_err(|e| RosterError::ledger_write("update_profile", e))?;
        if updated == 0 {
            return Err(RosterError::not_found(entity));
        }
        let record = txn
            .lecturer(entity)
            .await
            .map_err(|e| RosterError::ledger_write("read_lecturer", e))?
            .ok_or_else(|| RosterError::not_found(entity))?;

        txn.commit().await.map_err(|e| RosterError::ledger_write("commit", e))?;
        self.metrics.record_profile_update();
        tracing::debug!(%entity, "lecturer profile updated");
        Ok(record)
    }
}

async fn commit_create(txn: Box<dyn RelationalTransaction>) -> RelationalResult<()> {
    fail_point!("saga-create-before-commit", |_| {
        Err(crate::error::RelationalError::connection("injected failure before create commit"))
    });
    txn.commit().await
}

async fn commit_delete(txn: Box<dyn RelationalTransaction>) -> RelationalResult<()> {
    fail_point!("saga-delete-before-commit", |_| {
        Err(crate::error::RelationalError::connection("injected failure before delete commit"))
    });
    txn.commit().await
}
