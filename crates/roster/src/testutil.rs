//! Shared test utilities for roster testing.
//!
//! Fixtures for building requests, an in-memory [`Harness`], collaborator
//! wrappers that inject failures on demand, and assertion macros. Gated
//! behind the `testutil` feature so it never reaches production builds.
//!
//! ```toml
//! [dev-dependencies]
//! faculty-roster = { path = ".", features = ["testutil"] }
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use crate::{
    config::{RetryConfig, RosterConfig},
    coordinator::LifecycleCoordinator,
    error::{ObjectResult, ObjectStoreError, RelationalError, RelationalResult},
    memory::{MemoryObjectStore, MemoryRelationalStore},
    object_store::ObjectStore,
    relational::{RelationalStore, RelationalTransaction},
    types::{
        AttachmentName, AttachmentPayload, EntityId, LecturerProfile, LecturerRecord, NewLecturer,
        ObjectHandle, Partition, Rank, RankEntry, RankedLecturer, SignedUrl,
    },
};

/// Builds a valid profile with the given name.
#[must_use]
pub fn profile(name: &str) -> LecturerProfile {
    LecturerProfile::builder()
        .name(name)
        .designation("Lecturer")
        .qualifications("PhD")
        .linkedin(format!("https://www.linkedin.com/in/{}", name.to_lowercase().replace(' ', "-")))
        .build()
}

/// Builds a create request without a picture.
#[must_use]
pub fn new_lecturer(partition: Partition, name: &str) -> NewLecturer {
    NewLecturer::builder().partition(partition).profile(profile(name)).build()
}

/// Builds a create request with a small PNG-typed picture.
#[must_use]
pub fn new_lecturer_with_picture(partition: Partition, name: &str) -> NewLecturer {
    NewLecturer::builder()
        .partition(partition)
        .profile(profile(name))
        .picture(picture(name))
        .build()
}

/// A picture payload whose bytes identify `tag`.
#[must_use]
pub fn picture(tag: &str) -> AttachmentPayload {
    AttachmentPayload::new(Bytes::from(format!("png:{tag}")), "image/png")
}

/// A configuration with millisecond backoffs so failure tests stay fast.
#[must_use]
pub fn fast_config() -> RosterConfig {
    RosterConfig::builder()
        .compensation_retry(
            RetryConfig::builder()
                .max_retries(2)
                .initial_backoff(Duration::from_millis(1))
                .max_backoff(Duration::from_millis(4))
                .build()
                .unwrap_or_default(),
        )
        .build()
        .unwrap_or_default()
}

/// Checks that `entries` hold exactly the ranks `1..=entries.len()` in
/// order, each for a distinct entity.
///
/// # Errors
///
/// Returns a description of the first violation found.
pub fn check_dense(entries: &[RankEntry]) -> Result<(), String> {
    let mut seen = std::collections::BTreeSet::new();
    for (i, entry) in entries.iter().enumerate() {
        let expected = u32::try_from(i + 1).ok().and_then(Rank::new);
        if Some(entry.rank) != expected {
            return Err(format!("position {i} holds rank {}, expected {}", entry.rank, i + 1));
        }
        if !seen.insert(entry.entity) {
            return Err(format!("entity {} ranked twice", entry.entity));
        }
    }
    Ok(())
}

/// Assert that rank entries are dense: exactly `{1..N}` in order.
///
/// With a second argument, also assert that `N` equals it.
#[macro_export]
macro_rules! assert_ranks_dense {
    ($entries:expr) => {{
        let entries: &[$crate::RankEntry] = &$entries;
        if let Err(violation) = $crate::testutil::check_dense(entries) {
            panic!("ranks are not dense: {violation}; entries: {entries:?}");
        }
    }};
    ($entries:expr, $len:expr) => {{
        let entries: &[$crate::RankEntry] = &$entries;
        $crate::assert_ranks_dense!(entries);
        assert_eq!(entries.len(), $len, "unexpected number of ranked entries");
    }};
}

/// Assert that a [`RosterResult`](crate::RosterResult) is an error of the given variant.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use faculty_roster::{EntityId, RosterError, RosterResult, assert_roster_err};
///
/// let result: RosterResult<()> = Err(RosterError::conflict(EntityId::from(1)));
/// assert_roster_err!(result, Conflict);
/// ```
#[macro_export]
macro_rules! assert_roster_err {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::RosterError::$variant { .. })),
            "expected RosterError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
}

/// A coordinator wired to in-memory stores behind failure-injecting wrappers.
pub struct Harness {
    /// The coordinator under test.
    pub coordinator: LifecycleCoordinator,
    /// Failure switches for the relational store.
    pub relational: FailingRelationalStore,
    /// Failure switches for the object store.
    pub objects: FlakyObjectStore,
}

impl Harness {
    /// Builds a harness with [`fast_config`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    /// Builds a harness with `config`.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails validation.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_config(config: RosterConfig) -> Self {
        let relational = FailingRelationalStore::new(MemoryRelationalStore::new());
        let objects = FlakyObjectStore::new(MemoryObjectStore::new("pictures"));
        let coordinator =
            LifecycleCoordinator::new(Arc::new(relational.clone()), Arc::new(objects.clone()), config)
                .expect("harness configuration must be valid");
        Self { coordinator, relational, objects }
    }

    /// The committed rank entries of `partition`.
    pub async fn ranks(&self, partition: Partition) -> Vec<RankEntry> {
        self.relational.inner().ranks(partition).await.unwrap_or_default()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// FailingRelationalStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RelationalFaults {
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    fail_set_attachment: AtomicBool,
    commits: AtomicUsize,
}

/// [`MemoryRelationalStore`] wrapper with switchable failures.
///
/// Switches take effect on the next matching call, including calls on
/// transactions that are already open.
#[derive(Clone)]
pub struct FailingRelationalStore {
    inner: MemoryRelationalStore,
    faults: Arc<RelationalFaults>,
}

impl FailingRelationalStore {
    /// Wraps `inner` with all failures off.
    #[must_use]
    pub fn new(inner: MemoryRelationalStore) -> Self {
        Self { inner, faults: Arc::default() }
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &MemoryRelationalStore {
        &self.inner
    }

    /// Makes `begin` fail with a connection error.
    pub fn fail_begin(&self, fail: bool) {
        self.faults.fail_begin.store(fail, Ordering::SeqCst);
    }

    /// Makes `commit` fail with a connection error, discarding the transaction.
    pub fn fail_commit(&self, fail: bool) {
        self.faults.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Makes `set_attachment` fail with a timeout.
    pub fn fail_set_attachment(&self, fail: bool) {
        self.faults.fail_set_attachment.store(fail, Ordering::SeqCst);
    }

    /// Number of commits that reached the inner store.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.faults.commits.load(Ordering::SeqCst)
    }
}

struct FailingTransaction {
    inner: Box<dyn RelationalTransaction>,
    faults: Arc<RelationalFaults>,
}

#[async_trait]
impl RelationalStore for FailingRelationalStore {
    async fn begin(&self) -> RelationalResult<Box<dyn RelationalTransaction>> {
        if self.faults.fail_begin.load(Ordering::SeqCst) {
            return Err(RelationalError::connection("simulated begin failure"));
        }
        let inner = self.inner.begin().await?;
        Ok(Box::new(FailingTransaction { inner, faults: Arc::clone(&self.faults) }))
    }

    async fn lecturer(&self, id: EntityId) -> RelationalResult<Option<LecturerRecord>> {
        self.inner.lecturer(id).await
    }

    async fn rank_of(&self, id: EntityId) -> RelationalResult<Option<RankEntry>> {
        self.inner.rank_of(id).await
    }

    async fn ranks(&self, partition: Partition) -> RelationalResult<Vec<RankEntry>> {
        self.inner.ranks(partition).await
    }

    async fn ranked_lecturers(
        &self,
        partition: Partition,
    ) -> RelationalResult<Vec<RankedLecturer>> {
        self.inner.ranked_lecturers(partition).await
    }

    async fn ranked_lecturer(&self, id: EntityId) -> RelationalResult<Option<RankedLecturer>> {
        self.inner.ranked_lecturer(id).await
    }
}

#[async_trait]
impl RelationalTransaction for FailingTransaction {
    async fn lock_partition(&mut self, partition: Partition) -> RelationalResult<()> {
        self.inner.lock_partition(partition).await
    }

    async fn insert_lecturer(
        &mut self,
        partition: Partition,
        profile: &LecturerProfile,
    ) -> RelationalResult<EntityId> {
        self.inner.insert_lecturer(partition, profile).await
    }

    async fn lecturer(&self, id: EntityId) -> RelationalResult<Option<LecturerRecord>> {
        self.inner.lecturer(id).await
    }

    async fn set_attachment(
        &mut self,
        id: EntityId,
        attachment: Option<&AttachmentName>,
    ) -> RelationalResult<u64> {
        if self.faults.fail_set_attachment.load(Ordering::SeqCst) {
            return Err(RelationalError::Timeout);
        }
        self.inner.set_attachment(id, attachment).await
    }

    async fn update_profile(
        &mut self,
        id: EntityId,
        profile: &LecturerProfile,
    ) -> RelationalResult<u64> {
        self.inner.update_profile(id, profile).await
    }

    async fn delete_lecturer(&mut self, id: EntityId) -> RelationalResult<u64> {
        self.inner.delete_lecturer(id).await
    }

    async fn max_rank(&mut self, partition: Partition) -> RelationalResult<Option<Rank>> {
        self.inner.max_rank(partition).await
    }

    async fn rank_of(&self, id: EntityId) -> RelationalResult<Option<RankEntry>> {
        self.inner.rank_of(id).await
    }

    async fn insert_rank(&mut self, entry: RankEntry) -> RelationalResult<()> {
        self.inner.insert_rank(entry).await
    }

    async fn delete_rank(&mut self, partition: Partition, id: EntityId) -> RelationalResult<u64> {
        self.inner.delete_rank(partition, id).await
    }

    async fn shift_ranks_down(
        &mut self,
        partition: Partition,
        above: Rank,
    ) -> RelationalResult<u64> {
        self.inner.shift_ranks_down(partition, above).await
    }

    async fn commit(self: Box<Self>) -> RelationalResult<()> {
        if self.faults.fail_commit.load(Ordering::SeqCst) {
            // Dropping the inner transaction discards its writes.
            return Err(RelationalError::connection("simulated commit failure"));
        }
        self.inner.commit().await?;
        self.faults.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RelationalResult<()> {
        self.inner.rollback().await
    }
}

// ---------------------------------------------------------------------------
// FlakyObjectStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ObjectFaults {
    fail_put: AtomicBool,
    fail_signing: AtomicBool,
    failing_deletes: AtomicU32,
    deny_deletes: AtomicBool,
    delete_calls: AtomicUsize,
    hold_puts: AtomicBool,
    put_entered: Notify,
    put_released: Notify,
}

/// [`MemoryObjectStore`] wrapper with switchable failures.
#[derive(Clone)]
pub struct FlakyObjectStore {
    inner: MemoryObjectStore,
    faults: Arc<ObjectFaults>,
}

impl FlakyObjectStore {
    /// Wraps `inner` with all failures off.
    #[must_use]
    pub fn new(inner: MemoryObjectStore) -> Self {
        Self { inner, faults: Arc::default() }
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &MemoryObjectStore {
        &self.inner
    }

    /// Makes `put` fail with a transport error.
    pub fn fail_put(&self, fail: bool) {
        self.faults.fail_put.store(fail, Ordering::SeqCst);
    }

    /// Makes `signed_url` fail with a permission error.
    pub fn fail_signing(&self, fail: bool) {
        self.faults.fail_signing.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` deletes fail with a transient transport error.
    pub fn fail_next_deletes(&self, count: u32) {
        self.faults.failing_deletes.store(count, Ordering::SeqCst);
    }

    /// Makes every delete fail with a permission error, which is not retried.
    pub fn deny_deletes(&self, deny: bool) {
        self.faults.deny_deletes.store(deny, Ordering::SeqCst);
    }

    /// Number of delete calls received, failed or not.
    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.faults.delete_calls.load(Ordering::SeqCst)
    }

    /// Makes `put` park before writing until [`release_puts`](Self::release_puts).
    pub fn hold_puts(&self, hold: bool) {
        self.faults.hold_puts.store(hold, Ordering::SeqCst);
    }

    /// Resolves once a held `put` has parked.
    pub async fn put_started(&self) {
        self.faults.put_entered.notified().await;
    }

    /// Turns holding off and lets a parked `put` continue.
    pub fn release_puts(&self) {
        self.faults.hold_puts.store(false, Ordering::SeqCst);
        self.faults.put_released.notify_one();
    }
}

#[async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn put(&self, name: &str, bytes: Bytes, content_type: &str) -> ObjectResult<ObjectHandle> {
        if self.faults.fail_put.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::transport("simulated upload failure"));
        }
        if self.faults.hold_puts.load(Ordering::SeqCst) {
            self.faults.put_entered.notify_one();
            self.faults.put_released.notified().await;
        }
        self.inner.put(name, bytes, content_type).await
    }

    async fn delete(&self, name: &str) -> ObjectResult<()> {
        self.faults.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.deny_deletes.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::permission_denied("simulated delete denial"));
        }
        let consumed = self
            .faults
            .failing_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(ObjectStoreError::transport("simulated delete failure"));
        }
        self.inner.delete(name).await
    }

    async fn exists(&self, name: &str) -> ObjectResult<bool> {
        self.inner.exists(name).await
    }

    async fn signed_url(&self, name: &str, ttl: Duration) -> ObjectResult<SignedUrl> {
        if self.faults.fail_signing.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::permission_denied("simulated signing failure"));
        }
        self.inner.signed_url(name, ttl).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn entry(entity: i64, rank: u32) -> RankEntry {
        RankEntry {
            partition: Partition::FullTime,
            entity: EntityId::from(entity),
            rank: Rank::new(rank).unwrap(),
        }
    }

    #[test]
    fn test_check_dense() {
        assert!(check_dense(&[]).is_ok());
        assert!(check_dense(&[entry(1, 1), entry(2, 2)]).is_ok());
        assert!(check_dense(&[entry(1, 1), entry(2, 3)]).is_err());
        assert!(check_dense(&[entry(1, 1), entry(1, 2)]).is_err());
    }

    #[test]
    fn test_assert_ranks_dense_macro() {
        let entries = vec![entry(4, 1), entry(9, 2)];
        assert_ranks_dense!(entries, 2);
    }

    #[test]
    fn test_fixtures_are_valid() {
        let request = new_lecturer_with_picture(Partition::PartTime, "Grace Hopper");
        assert!(request.profile.validate().is_ok());
        assert_eq!(
            request.profile.linkedin.as_deref(),
            Some("https://www.linkedin.com/in/grace-hopper")
        );
        assert!(!request.picture.unwrap().is_empty());
        assert!(fast_config().validate().is_ok());
    }

    #[tokio::test]
    async fn test_flaky_deletes_consume_budget() {
        let objects = FlakyObjectStore::new(MemoryObjectStore::default());
        objects.put("a", Bytes::from_static(b"x"), "text/plain").await.unwrap();
        objects.fail_next_deletes(1);

        assert!(objects.delete("a").await.unwrap_err().is_transient());
        objects.delete("a").await.unwrap();
        assert_eq!(objects.delete_calls(), 2);
    }

    #[tokio::test]
    async fn test_held_put_waits_for_release() {
        let objects = FlakyObjectStore::new(MemoryObjectStore::default());
        objects.hold_puts(true);

        let writer = objects.clone();
        let upload = tokio::spawn(async move {
            writer.put("a", Bytes::from_static(b"x"), "text/plain").await
        });
        objects.put_started().await;
        assert!(objects.inner().is_empty());

        objects.release_puts();
        upload.await.unwrap().unwrap();
        assert_eq!(objects.inner().len(), 1);
    }
}
