//! In-memory relational store.
//!
//! [`MemoryRelationalStore`] models the `lecturer` and `rank` tables with
//! [`BTreeMap`]s behind a [`parking_lot::RwLock`]. Transactions stage their
//! writes in an overlay and apply them in one critical section on commit.
//!
//! # Constraints
//!
//! The store enforces the same constraints a SQL schema would:
//!
//! - `rank_pkey`: one rank row per lecturer, checked when staged and again at commit
//! - `rank_partition_rank_key`: unique `(partition, rank)`, checked at commit
//! - `rank_lecturer_fk`: a rank row references an existing lecturer, and a lecturer cannot be
//!   deleted while it holds a rank
//!
//! # Locking
//!
//! Each partition has a [`tokio::sync::Mutex`]. A transaction acquires it on
//! the first rank read-for-update or rank write in that partition and keeps
//! the owned guard until commit, rollback or drop.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

use async_trait::async_trait;
use fail::fail_point;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    error::{RelationalError, RelationalResult},
    relational::{
        RANK_LECTURER_FK, RANK_PKEY, RANK_SLOT_KEY, RelationalStore, RelationalTransaction,
    },
    types::{
        AttachmentName, EntityId, LecturerProfile, LecturerRecord, Partition, Rank, RankEntry,
        RankedLecturer,
    },
};

/// Position of one lecturer in the rank table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RankSlot {
    partition: Partition,
    rank: Rank,
}

#[derive(Debug, Default)]
struct Tables {
    lecturers: BTreeMap<EntityId, LecturerRecord>,
    /// Keyed by lecturer: the primary key that keeps an entity in one partition.
    ranks: BTreeMap<EntityId, RankSlot>,
}

impl Tables {
    fn ranks_in(&self, partition: Partition) -> Vec<RankEntry> {
        let mut entries: Vec<RankEntry> = self
            .ranks
            .iter()
            .filter(|(_, slot)| slot.partition == partition)
            .map(|(entity, slot)| RankEntry { partition, entity: *entity, rank: slot.rank })
            .collect();
        entries.sort_by_key(|entry| entry.rank);
        entries
    }
}

/// In-memory implementation of [`RelationalStore`].
///
/// Cheaply cloneable; all clones share the same tables and locks.
///
/// # Example
///
/// ```
/// use faculty_roster::{
///     LecturerProfile, MemoryRelationalStore, Partition, Rank, RankEntry, RelationalStore,
///     RelationalTransaction,
/// };
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = MemoryRelationalStore::new();
/// let profile = LecturerProfile::builder()
///     .name("Ada")
///     .designation("Lecturer")
///     .qualifications("MSc")
///     .build();
///
/// let mut txn = store.begin().await.unwrap();
/// let id = txn.insert_lecturer(Partition::FullTime, &profile).await.unwrap();
/// txn.insert_rank(RankEntry { partition: Partition::FullTime, entity: id, rank: Rank::FIRST })
///     .await
///     .unwrap();
/// txn.commit().await.unwrap();
///
/// assert_eq!(store.ranks(Partition::FullTime).await.unwrap().len(), 1);
/// # });
/// ```
#[derive(Clone)]
pub struct MemoryRelationalStore {
    tables: Arc<RwLock<Tables>>,
    next_id: Arc<AtomicI64>,
    partition_locks: Arc<HashMap<Partition, Arc<Mutex<()>>>>,
}

impl MemoryRelationalStore {
    /// Creates an empty store. Generated ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        let partition_locks =
            Partition::ALL.into_iter().map(|p| (p, Arc::new(Mutex::new(())))).collect();
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            next_id: Arc::new(AtomicI64::new(1)),
            partition_locks: Arc::new(partition_locks),
        }
    }

    /// Returns the number of committed lecturer rows.
    #[must_use]
    pub fn lecturer_count(&self) -> usize {
        self.tables.read().lecturers.len()
    }

    /// Returns the number of committed rank rows across all partitions.
    #[must_use]
    pub fn rank_count(&self) -> usize {
        self.tables.read().ranks.len()
    }
}

impl Default for MemoryRelationalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelationalStore for MemoryRelationalStore {
    #[tracing::instrument(skip(self))]
    async fn begin(&self) -> RelationalResult<Box<dyn RelationalTransaction>> {
        Ok(Box::new(MemoryTransaction::new(self.clone())))
    }

    #[tracing::instrument(skip(self))]
    async fn lecturer(&self, id: EntityId) -> RelationalResult<Option<LecturerRecord>> {
        Ok(self.tables.read().lecturers.get(&id).cloned())
    }

    #[tracing::instrument(skip(self))]
    async fn rank_of(&self, id: EntityId) -> RelationalResult<Option<RankEntry>> {
        let tables = self.tables.read();
        Ok(tables.ranks.get(&id).map(|slot| RankEntry {
            partition: slot.partition,
            entity: id,
            rank: slot.rank,
        }))
    }

    #[tracing::instrument(skip(self))]
    async fn ranks(&self, partition: Partition) -> RelationalResult<Vec<RankEntry>> {
        Ok(self.tables.read().ranks_in(partition))
    }

    #[tracing::instrument(skip(self))]
    async fn ranked_lecturer(&self, id: EntityId) -> RelationalResult<Option<RankedLecturer>> {
        let tables = self.tables.read();
        let Some(slot) = tables.ranks.get(&id) else {
            return Ok(None);
        };
        let record = tables.lecturers.get(&id).cloned().ok_or_else(|| {
            RelationalError::internal(format!("rank row without lecturer row: {id}"))
        })?;
        Ok(Some(RankedLecturer { record, rank: slot.rank }))
    }

    #[tracing::instrument(skip(self))]
    async fn ranked_lecturers(
        &self,
        partition: Partition,
    ) -> RelationalResult<Vec<RankedLecturer>> {
        let tables = self.tables.read();
        tables
            .ranks_in(partition)
            .into_iter()
            .map(|entry| {
                let record = tables.lecturers.get(&entry.entity).cloned().ok_or_else(|| {
                    RelationalError::internal(format!(
                        "rank row without lecturer row: {}",
                        entry.entity
                    ))
                })?;
                Ok(RankedLecturer { record, rank: entry.rank })
            })
            .collect()
    }
}

/// In-memory transaction.
///
/// Writes are staged per row (`None` marks a deleted row) and applied
/// atomically on commit. Reads merge the staged rows over the committed ones.
///
/// For every staged rank row the committed row it was based on is kept in
/// `rank_bases`. Partition locks only cover the partitions a transaction
/// touched, so commit rejects rows whose base changed underneath it.
struct MemoryTransaction {
    store: MemoryRelationalStore,
    locks: BTreeMap<Partition, OwnedMutexGuard<()>>,
    lecturers: BTreeMap<EntityId, Option<LecturerRecord>>,
    ranks: BTreeMap<EntityId, Option<RankSlot>>,
    rank_bases: BTreeMap<EntityId, Option<RankSlot>>,
    inserted: BTreeSet<EntityId>,
}

impl MemoryTransaction {
    fn new(store: MemoryRelationalStore) -> Self {
        Self {
            store,
            locks: BTreeMap::new(),
            lecturers: BTreeMap::new(),
            ranks: BTreeMap::new(),
            rank_bases: BTreeMap::new(),
            inserted: BTreeSet::new(),
        }
    }

    fn stage_rank(&mut self, id: EntityId, slot: Option<RankSlot>) {
        if !self.rank_bases.contains_key(&id) {
            let base = self.store.tables.read().ranks.get(&id).copied();
            self.rank_bases.insert(id, base);
        }
        self.ranks.insert(id, slot);
    }

    async fn ensure_locked(&mut self, partition: Partition) -> RelationalResult<()> {
        if self.locks.contains_key(&partition) {
            return Ok(());
        }
        let lock = self.store.partition_locks.get(&partition).cloned().ok_or_else(|| {
            RelationalError::internal(format!("no lock registered for partition {partition}"))
        })?;
        let guard = lock.lock_owned().await;
        tracing::trace!(%partition, "partition lock acquired");
        self.locks.insert(partition, guard);
        Ok(())
    }

    fn merged_lecturer(&self, id: EntityId) -> Option<LecturerRecord> {
        match self.lecturers.get(&id) {
            Some(staged) => staged.clone(),
            None => self.store.tables.read().lecturers.get(&id).cloned(),
        }
    }

    fn merged_slot(&self, id: EntityId) -> Option<RankSlot> {
        match self.ranks.get(&id) {
            Some(staged) => *staged,
            None => self.store.tables.read().ranks.get(&id).copied(),
        }
    }

    /// Ranks of one partition with this transaction's staged rows applied.
    fn partition_view(&self, partition: Partition) -> BTreeMap<EntityId, Rank> {
        let mut view: BTreeMap<EntityId, Rank> = self
            .store
            .tables
            .read()
            .ranks
            .iter()
            .filter(|(_, slot)| slot.partition == partition)
            .map(|(id, slot)| (*id, slot.rank))
            .collect();
        for (id, staged) in &self.ranks {
            match staged {
                Some(slot) if slot.partition == partition => {
                    view.insert(*id, slot.rank);
                },
                _ => {
                    view.remove(id);
                },
            }
        }
        view
    }
}

#[async_trait]
impl RelationalTransaction for MemoryTransaction {
    async fn lock_partition(&mut self, partition: Partition) -> RelationalResult<()> {
        self.ensure_locked(partition).await
    }

    async fn insert_lecturer(
        &mut self,
        partition: Partition,
        profile: &LecturerProfile,
    ) -> RelationalResult<EntityId> {
        let id = EntityId(self.store.next_id.fetch_add(1, Ordering::Relaxed));
        let record = LecturerRecord { id, partition, profile: profile.clone(), attachment: None };
        self.lecturers.insert(id, Some(record));
        self.inserted.insert(id);
        Ok(id)
    }

    async fn lecturer(&self, id: EntityId) -> RelationalResult<Option<LecturerRecord>> {
        Ok(self.merged_lecturer(id))
    }

    async fn set_attachment(
        &mut self,
        id: EntityId,
        attachment: Option<&AttachmentName>,
    ) -> RelationalResult<u64> {
        let Some(mut record) = self.merged_lecturer(id) else {
            return Ok(0);
        };
        record.attachment = attachment.cloned();
        self.lecturers.insert(id, Some(record));
        Ok(1)
    }

    async fn update_profile(
        &mut self,
        id: EntityId,
        profile: &LecturerProfile,
    ) -> RelationalResult<u64> {
        let Some(mut record) = self.merged_lecturer(id) else {
            return Ok(0);
        };
        record.profile = profile.clone();
        self.lecturers.insert(id, Some(record));
        Ok(1)
    }

    async fn delete_lecturer(&mut self, id: EntityId) -> RelationalResult<u64> {
        if self.merged_lecturer(id).is_none() {
            return Ok(0);
        }
        if self.merged_slot(id).is_some() {
            return Err(RelationalError::foreign_key_violation(RANK_LECTURER_FK));
        }
        self.lecturers.insert(id, None);
        Ok(1)
    }

    async fn max_rank(&mut self, partition: Partition) -> RelationalResult<Option<Rank>> {
        self.ensure_locked(partition).await?;
        Ok(self.partition_view(partition).into_values().max())
    }

    async fn rank_of(&self, id: EntityId) -> RelationalResult<Option<RankEntry>> {
        Ok(self
            .merged_slot(id)
            .map(|slot| RankEntry { partition: slot.partition, entity: id, rank: slot.rank }))
    }

    async fn insert_rank(&mut self, entry: RankEntry) -> RelationalResult<()> {
        self.ensure_locked(entry.partition).await?;
        if self.merged_lecturer(entry.entity).is_none() {
            return Err(RelationalError::foreign_key_violation(RANK_LECTURER_FK));
        }
        if self.merged_slot(entry.entity).is_some() {
            return Err(RelationalError::unique_violation(RANK_PKEY));
        }
        if self.partition_view(entry.partition).values().any(|rank| *rank == entry.rank) {
            return Err(RelationalError::unique_violation(RANK_SLOT_KEY));
        }
        self.stage_rank(entry.entity, Some(RankSlot { partition: entry.partition, rank: entry.rank }));
        Ok(())
    }

    async fn delete_rank(&mut self, partition: Partition, id: EntityId) -> RelationalResult<u64> {
        self.ensure_locked(partition).await?;
        match self.merged_slot(id) {
            Some(slot) if slot.partition == partition => {
                self.stage_rank(id, None);
                Ok(1)
            },
            _ => Ok(0),
        }
    }

    async fn shift_ranks_down(
        &mut self,
        partition: Partition,
        above: Rank,
    ) -> RelationalResult<u64> {
        self.ensure_locked(partition).await?;
        let mut shifted = 0;
        for (id, rank) in self.partition_view(partition) {
            if rank <= above {
                continue;
            }
            if let Some(lower) = rank.prev() {
                self.stage_rank(id, Some(RankSlot { partition, rank: lower }));
                shifted += 1;
            }
        }
        Ok(shifted)
    }

    #[tracing::instrument(skip(self), fields(
        lecturers = self.lecturers.len(),
        ranks = self.ranks.len(),
        locks = self.locks.len(),
    ))]
    async fn commit(self: Box<Self>) -> RelationalResult<()> {
        fail_point!("memory-relational-commit", |_| {
            Err(RelationalError::connection("injected failure before relational commit"))
        });

        let MemoryTransaction { store, locks, lecturers, ranks, rank_bases, inserted } = *self;
        let mut tables = store.tables.write();

        // A base that changed was written under another partition's lock.
        for (id, base) in &rank_bases {
            let current = tables.ranks.get(id).copied();
            if current == *base {
                continue;
            }
            return Err(match (base, ranks.get(id)) {
                (None, Some(Some(_))) => RelationalError::unique_violation(RANK_PKEY),
                _ => RelationalError::SerializationFailure,
            });
        }

        // Rows updated here but deleted by a concurrent commit must not be resurrected.
        for (id, staged) in &lecturers {
            if staged.is_some() && !inserted.contains(id) && !tables.lecturers.contains_key(id) {
                return Err(RelationalError::SerializationFailure);
            }
        }

        let touched: BTreeSet<Partition> = ranks.values().flatten().map(|s| s.partition).collect();
        for partition in touched {
            let mut seen = BTreeSet::new();
            let committed =
                tables.ranks.iter().filter(|(id, _)| !ranks.contains_key(*id)).map(|(_, slot)| *slot);
            let staged = ranks.values().flatten().copied();
            for slot in committed.chain(staged).filter(|slot| slot.partition == partition) {
                if !seen.insert(slot.rank) {
                    return Err(RelationalError::unique_violation(RANK_SLOT_KEY));
                }
            }
        }

        for (id, staged) in &ranks {
            if staged.is_none() {
                continue;
            }
            let exists = match lecturers.get(id) {
                Some(row) => row.is_some(),
                None => tables.lecturers.contains_key(id),
            };
            if !exists {
                return Err(RelationalError::foreign_key_violation(RANK_LECTURER_FK));
            }
        }

        for (id, staged) in ranks {
            match staged {
                Some(slot) => {
                    tables.ranks.insert(id, slot);
                },
                None => {
                    tables.ranks.remove(&id);
                },
            }
        }
        for (id, staged) in lecturers {
            match staged {
                Some(record) => {
                    tables.lecturers.insert(id, record);
                },
                None => {
                    tables.lecturers.remove(&id);
                },
            }
        }

        drop(tables);
        drop(locks);
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(locks = self.locks.len()))]
    async fn rollback(self: Box<Self>) -> RelationalResult<()> {
        Ok(())
    }
}
