//! Orphaned attachment reconciliation.
//!
//! When the coordinator cannot remove a blob that no longer has an owner
//! (a failed compensation, or a post-commit delete that kept failing), it
//! records the blob in the [`ReconciliationBacklog`]. The [`Reconciler`]
//! drains the backlog later, either on demand with
//! [`run_once`](Reconciler::run_once) or periodically from a background task
//! started with [`spawn`](Reconciler::spawn).
//!
//! Before deleting, the reconciler re-reads the owning lecturer row. A blob
//! that turns out to still be referenced (an ambiguous commit that actually
//! succeeded) is dropped from the backlog without being deleted.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use fail::fail_point;
use parking_lot::Mutex;
use tokio::{select, sync::watch, task::JoinHandle, time::sleep};

use crate::{
    attachment::AttachmentStore,
    config::ReconcilerConfig,
    error::{RosterError, RosterResult},
    metrics::RosterMetrics,
    relational::RelationalStore,
    types::{AttachmentName, EntityId},
};

/// Why a blob was queued for reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrphanReason {
    /// The create saga aborted and could not remove its upload.
    CreateAborted,
    /// The lecturer was deleted but its blob could not be removed.
    DeletedOwner,
}

/// One orphaned blob awaiting removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogEntry {
    /// The orphaned blob.
    pub name: AttachmentName,
    /// Why it was queued.
    pub reason: OrphanReason,
    /// Delete attempts made so far, by the coordinator and the reconciler.
    pub attempts: u32,
    /// When the blob was first queued.
    pub recorded_at: DateTime<Utc>,
    /// The most recent failure, if any.
    pub last_error: Option<String>,
}

/// Shared queue of orphaned blobs, ordered by name.
///
/// Entries stay queued until the blob is reclaimed or found to still be
/// referenced. Cheaply cloneable; all clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationBacklog {
    entries: Arc<Mutex<BTreeMap<AttachmentName, BacklogEntry>>>,
}

impl ReconciliationBacklog {
    /// Creates an empty backlog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `name`, or adds `attempts` to an existing entry.
    pub fn record(
        &self,
        name: AttachmentName,
        reason: OrphanReason,
        attempts: u32,
        error: Option<&RosterError>,
    ) {
        let last_error = error.map(ToString::to_string);
        let mut entries = self.entries.lock();
        match entries.get_mut(&name) {
            Some(entry) => {
                entry.attempts = entry.attempts.saturating_add(attempts);
                entry.last_error = last_error.or(entry.last_error.take());
            },
            None => {
                let entry = BacklogEntry {
                    name: name.clone(),
                    reason,
                    attempts,
                    recorded_at: Utc::now(),
                    last_error,
                };
                entries.insert(name, entry);
            },
        }
    }

    /// Returns `true` if `name` is queued.
    #[must_use]
    pub fn contains(&self, name: &AttachmentName) -> bool {
        self.entries.lock().contains_key(name)
    }

    /// Returns the entry for `name`, if queued.
    #[must_use]
    pub fn get(&self, name: &AttachmentName) -> Option<BacklogEntry> {
        self.entries.lock().get(name).cloned()
    }

    /// Returns a copy of every queued entry.
    #[must_use]
    pub fn entries(&self) -> Vec<BacklogEntry> {
        self.entries.lock().values().cloned().collect()
    }

    /// Returns up to `limit` entries, least-attempted first.
    fn batch(&self, limit: usize) -> Vec<BacklogEntry> {
        let mut batch: Vec<BacklogEntry> = self.entries.lock().values().cloned().collect();
        batch.sort_by_key(|entry| (entry.attempts, entry.recorded_at));
        batch.truncate(limit);
        batch
    }

    fn resolve(&self, name: &AttachmentName) {
        self.entries.lock().remove(name);
    }

    /// Returns the number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Blobs deleted, or found already absent.
    pub reclaimed: Vec<AttachmentName>,
    /// Blobs dropped from the backlog because their owner still references them.
    pub still_referenced: Vec<AttachmentName>,
    /// Blobs that remain queued after another failure.
    pub failed: Vec<AttachmentName>,
}

impl ReconcileReport {
    /// Returns `true` if the pass touched nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reclaimed.is_empty() && self.still_referenced.is_empty() && self.failed.is_empty()
    }
}

enum Outcome {
    Reclaimed,
    Referenced,
}

/// Drains the [`ReconciliationBacklog`].
#[derive(Clone)]
pub struct Reconciler {
    relational: Arc<dyn RelationalStore>,
    attachments: AttachmentStore,
    backlog: ReconciliationBacklog,
    metrics: RosterMetrics,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Creates a reconciler over the given collaborators.
    #[must_use]
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        attachments: AttachmentStore,
        backlog: ReconciliationBacklog,
        metrics: RosterMetrics,
        config: ReconcilerConfig,
    ) -> Self {
        Self { relational, attachments, backlog, metrics, config }
    }

    /// Returns the backlog this reconciler drains.
    #[must_use]
    pub fn backlog(&self) -> &ReconciliationBacklog {
        &self.backlog
    }

    /// Processes up to `batch_size` backlog entries once.
    ///
    /// Failures are recorded on the entry and reported in
    /// [`ReconcileReport::failed`]; they do not abort the pass.
    #[tracing::instrument(skip(self), fields(backlog = self.backlog.len()))]
    pub async fn run_once(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for entry in self.backlog.batch(self.config.batch_size) {
            match self.reclaim(&entry.name).await {
                Ok(Outcome::Reclaimed) => {
                    self.backlog.resolve(&entry.name);
                    self.metrics.record_reclaimed();
                    tracing::info!(
                        name = %entry.name,
                        attempts = entry.attempts + 1,
                        "orphaned attachment reclaimed",
                    );
                    report.reclaimed.push(entry.name);
                },
                Ok(Outcome::Referenced) => {
                    self.backlog.resolve(&entry.name);
                    tracing::warn!(
                        name = %entry.name,
                        "queued attachment is still referenced, dropping entry",
                    );
                    report.still_referenced.push(entry.name);
                },
                Err(err) => {
                    tracing::warn!(name = %entry.name, error = %err, "reconciliation attempt failed");
                    self.backlog.record(entry.name.clone(), entry.reason, 1, Some(&err));
                    report.failed.push(entry.name);
                },
            }
        }
        report
    }

    async fn reclaim(&self, name: &AttachmentName) -> RosterResult<Outcome> {
        if let Some(owner) = name.owner()
            && self.is_referenced(owner, name).await?
        {
            return Ok(Outcome::Referenced);
        }

        fail_point!("reconciler-before-delete", |_| {
            Err(RosterError::StorageDelete {
                name: name.clone(),
                source: crate::error::ObjectStoreError::transport("injected failure before reclaim"),
            })
        });

        self.attachments.delete(name).await?;
        Ok(Outcome::Reclaimed)
    }

    async fn is_referenced(&self, owner: EntityId, name: &AttachmentName) -> RosterResult<bool> {
        let record = self
            .relational
            .lecturer(owner)
            .await
            .map_err(|e| RosterError::ledger_write("read_lecturer", e))?;
        Ok(record.is_some_and(|r| r.attachment.as_ref() == Some(name)))
    }

    /// Starts a background task that calls [`run_once`](Self::run_once)
    /// every `interval` until the returned handle is shut down or dropped.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use = "dropping the handle stops the reconciler"]
    pub fn spawn(self) -> ReconcilerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());
        let interval = self.config.interval;
        let task = tokio::spawn(async move {
            loop {
                select! {
                    _ = sleep(interval) => {}
                    _ = shutdown_rx.changed() => {
                        return;
                    }
                }
                let report = self.run_once().await;
                if !report.is_empty() {
                    tracing::debug!(
                        reclaimed = report.reclaimed.len(),
                        still_referenced = report.still_referenced.len(),
                        failed = report.failed.len(),
                        "reconciliation pass finished",
                    );
                }
            }
        });
        ReconcilerHandle { shutdown_tx, task: Some(task) }
    }
}

/// Handle to a background reconciler task.
///
/// Dropping the handle signals the task to stop after its current pass.
pub struct ReconcilerHandle {
    shutdown_tx: watch::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl ReconcilerHandle {
    /// Signals the task to stop and waits for it to exit, at most `timeout`.
    ///
    /// Returns `true` if the task exited in time.
    pub async fn shutdown(mut self, timeout: Duration) -> bool {
        let _ = self.shutdown_tx.send(());
        match self.task.take() {
            Some(task) => tokio::time::timeout(timeout, task).await.is_ok(),
            None => true,
        }
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        // The receiver may already be gone.
        let _ = self.shutdown_tx.send(());
    }
}
