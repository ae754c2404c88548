//! Relational store collaborator interface.
//!
//! This module defines the [`RelationalStore`] and [`RelationalTransaction`]
//! traits: the subset of a relational database that the rank ledger and the
//! lifecycle coordinator need. SQL dialects and connection pooling stay in
//! the implementation.
//!
//! # Tables
//!
//! | Table      | Primary key            | Notes                                      |
//! |------------|------------------------|--------------------------------------------|
//! | `lecturer` | `id` (generated)       | descriptive attributes, nullable attachment |
//! | `rank`     | `lecturer_id`          | unique `(partition, rank)`, FK to lecturer |
//!
//! The primary key on `rank.lecturer_id` enforces that an entity holds at most
//! one rank across all partitions. The foreign key forces a rank to be removed
//! before its lecturer row.
//!
//! # Locking
//!
//! [`RelationalTransaction::lock_partition`] serializes rank mutations within a
//! partition (for SQL stores: `SELECT ... FOR UPDATE` on the partition's rank
//! rows, or serializable isolation). Writes to rank rows and
//! [`max_rank`](RelationalTransaction::max_rank) acquire the lock implicitly.
//! Locks are held until the transaction commits, rolls back or is dropped.

use async_trait::async_trait;

use crate::{
    error::RelationalResult,
    types::{
        AttachmentName, EntityId, LecturerProfile, LecturerRecord, Partition, Rank, RankEntry,
        RankedLecturer,
    },
};

/// Primary key of the `rank` table: one rank per lecturer.
pub const RANK_PKEY: &str = "rank_pkey";

/// Unique `(partition, rank)` constraint of the `rank` table.
pub const RANK_SLOT_KEY: &str = "rank_partition_rank_key";

/// Foreign key from `rank.lecturer_id` to `lecturer.id`.
pub const RANK_LECTURER_FK: &str = "rank_lecturer_fk";

/// Connection source for the relational store.
///
/// Implementations must be thread-safe; one instance is shared by every
/// concurrent saga.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Begins a new transaction.
    ///
    /// The returned handle owns its connection until it is committed, rolled
    /// back or dropped. Dropping an open transaction rolls it back.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn begin(&self) -> RelationalResult<Box<dyn RelationalTransaction>>;

    /// Reads a committed lecturer row.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn lecturer(&self, id: EntityId) -> RelationalResult<Option<LecturerRecord>>;

    /// Reads the committed rank entry of a lecturer, in whatever partition it is.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn rank_of(&self, id: EntityId) -> RelationalResult<Option<RankEntry>>;

    /// Reads the committed rank entries of a partition, ascending by rank.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn ranks(&self, partition: Partition) -> RelationalResult<Vec<RankEntry>>;

    /// Reads the committed lecturers of a partition joined with their ranks,
    /// ascending by rank, from a single snapshot.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn ranked_lecturers(&self, partition: Partition)
    -> RelationalResult<Vec<RankedLecturer>>;

    /// Reads one committed lecturer joined with its rank from a single
    /// snapshot. Returns `None` if the lecturer holds no rank.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn ranked_lecturer(&self, id: EntityId) -> RelationalResult<Option<RankedLecturer>>;
}

/// An open relational transaction.
///
/// Reads observe the transaction's own pending writes. Nothing is visible to
/// other readers until [`commit`](RelationalTransaction::commit) succeeds.
///
/// `Sync` is required so the `&self` read methods yield `Send` futures.
#[async_trait]
pub trait RelationalTransaction: Send + Sync {
    /// Acquires the rank lock for `partition`, waiting for any other
    /// transaction that holds it. Re-acquiring a held lock is a no-op.
    async fn lock_partition(&mut self, partition: Partition) -> RelationalResult<()>;

    /// Inserts a lecturer row without an attachment and returns its generated id.
    async fn insert_lecturer(
        &mut self,
        partition: Partition,
        profile: &LecturerProfile,
    ) -> RelationalResult<EntityId>;

    /// Reads a lecturer row, including pending writes of this transaction.
    async fn lecturer(&self, id: EntityId) -> RelationalResult<Option<LecturerRecord>>;

    /// Replaces the attachment reference of a lecturer. Returns the number of
    /// rows affected.
    async fn set_attachment(
        &mut self,
        id: EntityId,
        attachment: Option<&AttachmentName>,
    ) -> RelationalResult<u64>;

    /// Replaces the descriptive attributes of a lecturer. Returns the number
    /// of rows affected.
    async fn update_profile(
        &mut self,
        id: EntityId,
        profile: &LecturerProfile,
    ) -> RelationalResult<u64>;

    /// Deletes a lecturer row. Returns the number of rows affected.
    ///
    /// Fails with a foreign key violation while the lecturer still holds a rank.
    async fn delete_lecturer(&mut self, id: EntityId) -> RelationalResult<u64>;

    /// Returns the highest rank in `partition`, or `None` if it is empty.
    ///
    /// Acquires the partition lock.
    async fn max_rank(&mut self, partition: Partition) -> RelationalResult<Option<Rank>>;

    /// Reads the rank entry of a lecturer, including pending writes.
    async fn rank_of(&self, id: EntityId) -> RelationalResult<Option<RankEntry>>;

    /// Inserts a rank row.
    ///
    /// Fails with a unique violation if the lecturer already holds a rank or
    /// the `(partition, rank)` slot is taken, and with a foreign key violation
    /// if the lecturer row does not exist. Acquires the partition lock.
    async fn insert_rank(&mut self, entry: RankEntry) -> RelationalResult<()>;

    /// Deletes the rank row of a lecturer in `partition`. Returns the number
    /// of rows affected. Acquires the partition lock.
    async fn delete_rank(&mut self, partition: Partition, id: EntityId) -> RelationalResult<u64>;

    /// Decrements every rank strictly above `above` in `partition` by one, as
    /// a single conditional bulk update:
    ///
    /// ```sql
    /// UPDATE rank SET rank = rank - 1 WHERE partition = $1 AND rank > $2
    /// ```
    ///
    /// Returns the number of rows shifted. Acquires the partition lock.
    async fn shift_ranks_down(&mut self, partition: Partition, above: Rank)
    -> RelationalResult<u64>;

    /// Commits all pending writes atomically and releases every lock.
    ///
    /// A failed commit leaves no pending write applied.
    async fn commit(self: Box<Self>) -> RelationalResult<()>;

    /// Discards all pending writes and releases every lock.
    async fn rollback(self: Box<Self>) -> RelationalResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync + ?Sized>() {}

    #[test]
    fn test_trait_objects_are_thread_safe() {
        assert_send_sync::<dyn RelationalStore>();
        assert_send_sync::<dyn RelationalTransaction>();
        assert_send_sync::<Box<dyn RelationalTransaction>>();
    }
}
