//! Read-only views over the ranked roster.
//!
//! Listings are materialized snapshots: each partition is read in a single
//! store call, as is a single lecturer lookup. Iterating a listing never goes back to the store. A
//! listing can be iterated any number of times and always yields the same
//! sequence.

use std::sync::Arc;

use crate::{
    error::RosterResult,
    ledger::RankLedger,
    relational::RelationalStore,
    types::{EntityId, Partition, RankedLecturer},
};

/// The lecturers of one partition, ascending by rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedListing {
    partition: Partition,
    entries: Arc<[RankedLecturer]>,
}

impl RankedListing {
    /// Returns the partition this listing covers.
    #[must_use]
    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Iterates the lecturers in rank order.
    pub fn iter(&self) -> std::slice::Iter<'_, RankedLecturer> {
        self.entries.iter()
    }

    /// Returns the number of lecturers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the partition is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a RankedListing {
    type Item = &'a RankedLecturer;
    type IntoIter = std::slice::Iter<'a, RankedLecturer>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Every partition's listing, concatenated in [`Partition::ALL`] order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogListing {
    partitions: Vec<RankedListing>,
}

impl CatalogListing {
    /// Iterates every lecturer: all of the first partition by rank, then the next.
    pub fn iter(&self) -> impl Iterator<Item = &RankedLecturer> + '_ {
        self.partitions.iter().flat_map(RankedListing::iter)
    }

    /// Returns the listing of one partition.
    #[must_use]
    pub fn partition(&self, partition: Partition) -> Option<&RankedListing> {
        self.partitions.iter().find(|listing| listing.partition == partition)
    }

    /// Returns the per-partition listings in concatenation order.
    #[must_use]
    pub fn partitions(&self) -> &[RankedListing] {
        &self.partitions
    }

    /// Returns the total number of lecturers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.iter().map(RankedListing::len).sum()
    }

    /// Returns `true` if no partition has lecturers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(RankedListing::is_empty)
    }
}

/// Read access to ranked lecturers.
#[derive(Clone)]
pub struct EntityCatalog {
    ledger: RankLedger,
}

impl EntityCatalog {
    /// Creates a catalog reading from `relational`.
    #[must_use]
    pub fn new(relational: Arc<dyn RelationalStore>) -> Self {
        Self { ledger: RankLedger::new(relational) }
    }

    /// Lists every partition in [`Partition::ALL`] order, each ascending by rank.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError::LedgerWrite`](crate::RosterError::LedgerWrite) if a store read fails.
    #[tracing::instrument(skip(self))]
    pub async fn list_all(&self) -> RosterResult<CatalogListing> {
        let mut partitions = Vec::with_capacity(Partition::ALL.len());
        for partition in Partition::ALL {
            partitions.push(self.list_partition(partition).await?);
        }
        Ok(CatalogListing { partitions })
    }

    /// Lists one partition ascending by rank.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError::LedgerWrite`](crate::RosterError::LedgerWrite) if the store read fails.
    #[tracing::instrument(skip(self))]
    pub async fn list_partition(&self, partition: Partition) -> RosterResult<RankedListing> {
        let entries = self.ledger.ranked_records(partition).await?;
        tracing::debug!(%partition, count = entries.len(), "partition listed");
        Ok(RankedListing { partition, entries: entries.into() })
    }

    /// Looks up one ranked lecturer.
    ///
    /// Returns `None` if the lecturer does not exist or holds no rank. The
    /// record and rank come from the same snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError::LedgerWrite`](crate::RosterError::LedgerWrite) if the store read fails.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, entity: EntityId) -> RosterResult<Option<RankedLecturer>> {
        self.ledger.ranked_record(entity).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        memory::MemoryRelationalStore,
        relational::RelationalTransaction,
        types::{LecturerProfile, Rank, RankEntry},
    };

    async fn seed(store: &MemoryRelationalStore, partition: Partition, names: &[&str]) {
        let mut txn = store.begin().await.unwrap();
        let base = store.ranks(partition).await.unwrap().len() as u32;
        for (i, name) in names.iter().enumerate() {
            let profile = LecturerProfile::builder()
                .name(*name)
                .designation("Lecturer")
                .qualifications("PhD")
                .build();
            let id = txn.insert_lecturer(partition, &profile).await.unwrap();
            let rank = Rank::new(base + i as u32 + 1).unwrap();
            txn.insert_rank(RankEntry { partition, entity: id, rank }).await.unwrap();
        }
        txn.commit().await.unwrap();
    }

    fn names<'a>(iter: impl Iterator<Item = &'a RankedLecturer>) -> Vec<String> {
        iter.map(|l| l.record.profile.name.clone()).collect()
    }

    #[tokio::test]
    async fn test_list_all_concatenates_in_fixed_order() {
        let store = MemoryRelationalStore::new();
        seed(&store, Partition::PartTime, &["P1", "P2"]).await;
        seed(&store, Partition::FullTime, &["F1", "F2", "F3"]).await;

        let catalog = EntityCatalog::new(Arc::new(store));
        let listing = catalog.list_all().await.unwrap();

        assert_eq!(names(listing.iter()), vec!["F1", "F2", "F3", "P1", "P2"]);
        assert_eq!(listing.len(), 5);
        assert_eq!(listing.partition(Partition::PartTime).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_listing_is_restartable() {
        let store = MemoryRelationalStore::new();
        seed(&store, Partition::FullTime, &["A", "B"]).await;
        let catalog = EntityCatalog::new(Arc::new(store.clone()));

        let listing = catalog.list_partition(Partition::FullTime).await.unwrap();
        let first = names(listing.iter());

        // Later writes do not affect an existing snapshot.
        seed(&store, Partition::FullTime, &["C"]).await;

        assert_eq!(names(listing.iter()), first);
        assert_eq!(names((&listing).into_iter()), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_empty_catalog() {
        let catalog = EntityCatalog::new(Arc::new(MemoryRelationalStore::new()));
        let listing = catalog.list_all().await.unwrap();
        assert!(listing.is_empty());
        assert_eq!(listing.partitions().len(), Partition::ALL.len());
        assert_eq!(listing.iter().count(), 0);
    }

    #[tokio::test]
    async fn test_get_returns_rank() {
        let store = MemoryRelationalStore::new();
        seed(&store, Partition::PartTime, &["A", "B"]).await;
        let catalog = EntityCatalog::new(Arc::new(store.clone()));

        let second = store.ranks(Partition::PartTime).await.unwrap()[1].entity;
        let found = catalog.get(second).await.unwrap().unwrap();
        assert_eq!(found.rank.get(), 2);
        assert_eq!(found.record.profile.name, "B");

        assert!(catalog.get(EntityId::from(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_follows_rank_shift_after_delete() {
        let store = MemoryRelationalStore::new();
        seed(&store, Partition::FullTime, &["A", "B", "C"]).await;
        let ranks = store.ranks(Partition::FullTime).await.unwrap();
        let catalog = EntityCatalog::new(Arc::new(store.clone()));

        let mut txn = store.begin().await.unwrap();
        txn.delete_rank(Partition::FullTime, ranks[0].entity).await.unwrap();
        txn.shift_ranks_down(Partition::FullTime, Rank::FIRST).await.unwrap();
        txn.commit().await.unwrap();

        let third = catalog.get(ranks[2].entity).await.unwrap().unwrap();
        assert_eq!(third.rank.get(), 2);
        assert_eq!(third.record.profile.name, "C");
        // The row survives but holds no rank.
        assert!(catalog.get(ranks[0].entity).await.unwrap().is_none());
    }
}
