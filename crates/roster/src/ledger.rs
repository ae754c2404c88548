//! Dense per-partition rank ledger.
//!
//! The ledger keeps ranks in every partition contiguous: `{1..N}` for `N`
//! ranked lecturers. Mutations happen inside a caller-supplied
//! [`RelationalTransaction`] so they commit or roll back together with the
//! lecturer row they belong to.
//!
//! Every mutation takes the partition lock first, so concurrent inserts and
//! removals on one partition are linearized while other partitions proceed
//! independently.

use std::sync::Arc;

use crate::{
    error::{RelationalError, RosterError, RosterResult},
    relational::{RANK_PKEY, RelationalStore, RelationalTransaction},
    types::{EntityId, Partition, Rank, RankEntry, RankedLecturer},
};

/// Rank bookkeeping on top of a [`RelationalStore`].
#[derive(Clone)]
pub struct RankLedger {
    store: Arc<dyn RelationalStore>,
}

impl RankLedger {
    /// Creates a ledger reading committed ranks from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    /// Returns the rank the next insert into `partition` would receive.
    ///
    /// Acquires the partition lock inside `txn`, so the answer stays valid
    /// until the transaction ends.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError::LedgerWrite`] if the store fails.
    #[tracing::instrument(skip(self, txn))]
    pub async fn next_rank(
        &self,
        txn: &mut dyn RelationalTransaction,
        partition: Partition,
    ) -> RosterResult<Rank> {
        let max = txn
            .max_rank(partition)
            .await
            .map_err(|e| RosterError::ledger_write("next_rank", e))?;
        Ok(max.map_or(Rank::FIRST, Rank::next))
    }

    /// Appends `entity` at the end of `partition` and returns its rank.
    ///
    /// # Errors
    ///
    /// - [`RosterError::Conflict`] if the entity already holds a rank in any partition
    /// - [`RosterError::LedgerWrite`] if the store fails
    #[tracing::instrument(skip(self, txn))]
    pub async fn insert(
        &self,
        txn: &mut dyn RelationalTransaction,
        partition: Partition,
        entity: EntityId,
    ) -> RosterResult<Rank> {
        txn.lock_partition(partition)
            .await
            .map_err(|e| RosterError::ledger_write("lock_partition", e))?;

        let existing =
            txn.rank_of(entity).await.map_err(|e| RosterError::ledger_write("rank_of", e))?;
        if existing.is_some() {
            return Err(RosterError::conflict(entity));
        }

        let rank = self.next_rank(txn, partition).await?;
        txn.insert_rank(RankEntry { partition, entity, rank }).await.map_err(|e| match e {
            // The primary key is on the entity: a concurrent insert won the race.
            RelationalError::UniqueViolation { ref constraint } if constraint == RANK_PKEY => {
                RosterError::conflict(entity)
            },
            other => RosterError::ledger_write("insert_rank", other),
        })?;

        tracing::debug!(%partition, %entity, %rank, "rank reserved");
        Ok(rank)
    }

    /// Removes `entity` from `partition`, closing the gap it leaves.
    ///
    /// All ranks above the released one move down by one in a single bulk
    /// update. Returns the released rank.
    ///
    /// # Errors
    ///
    /// - [`RosterError::NotFound`] if the entity holds no rank in `partition`
    /// - [`RosterError::LedgerWrite`] if the store fails
    #[tracing::instrument(skip(self, txn))]
    pub async fn remove(
        &self,
        txn: &mut dyn RelationalTransaction,
        partition: Partition,
        entity: EntityId,
    ) -> RosterResult<Rank> {
        txn.lock_partition(partition)
            .await
            .map_err(|e| RosterError::ledger_write("lock_partition", e))?;

        let entry = txn
            .rank_of(entity)
            .await
            .map_err(|e| RosterError::ledger_write("rank_of", e))?
            .filter(|entry| entry.partition == partition)
            .ok_or_else(|| RosterError::not_found_in(entity, partition))?;

        let deleted = txn
            .delete_rank(partition, entity)
            .await
            .map_err(|e| RosterError::ledger_write("delete_rank", e))?;
        if deleted != 1 {
            return Err(RosterError::internal(format!(
                "expected to delete one rank row for {entity}, deleted {deleted}"
            )));
        }

        let shifted = txn
            .shift_ranks_down(partition, entry.rank)
            .await
            .map_err(|e| RosterError::ledger_write("shift_ranks_down", e))?;

        tracing::debug!(%partition, %entity, rank = %entry.rank, shifted, "rank released");
        Ok(entry.rank)
    }

    /// Lists the committed rank entries of `partition`, ascending by rank.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError::LedgerWrite`] if the store read fails.
    #[tracing::instrument(skip(self))]
    pub async fn list_ordered(&self, partition: Partition) -> RosterResult<Vec<RankEntry>> {
        self.store.ranks(partition).await.map_err(|e| RosterError::ledger_write("list_ordered", e))
    }

    /// Lists the committed lecturers of `partition` joined with their ranks,
    /// ascending by rank.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError::LedgerWrite`] if the store read fails.
    #[tracing::instrument(skip(self))]
    pub async fn ranked_records(&self, partition: Partition) -> RosterResult<Vec<RankedLecturer>> {
        self.store
            .ranked_lecturers(partition)
            .await
            .map_err(|e| RosterError::ledger_write("ranked_records", e))
    }

    /// Reads the committed record of `entity` joined with its rank.
    ///
    /// Returns `None` if the lecturer holds no rank.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError::LedgerWrite`] if the store read fails.
    #[tracing::instrument(skip(self))]
    pub async fn ranked_record(&self, entity: EntityId) -> RosterResult<Option<RankedLecturer>> {
        self.store
            .ranked_lecturer(entity)
            .await
            .map_err(|e| RosterError::ledger_write("ranked_record", e))
    }

    /// Reads the committed rank entry of `entity`, in whichever partition it is.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError::LedgerWrite`] if the store read fails.
    #[tracing::instrument(skip(self))]
    pub async fn rank_of(&self, entity: EntityId) -> RosterResult<Option<RankEntry>> {
        self.store.rank_of(entity).await.map_err(|e| RosterError::ledger_write("rank_of", e))
    }
}
