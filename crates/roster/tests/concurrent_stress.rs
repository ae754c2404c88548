//! Concurrent stress tests for the rank ledger.
//!
//! These tests run many sagas at once on a multi-threaded runtime and verify
//! that ranks stay dense and unique per partition: no rank is handed out
//! twice and no gap survives a burst of deletes.

#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use std::collections::BTreeSet;

use faculty_roster::{
    EntityId, Partition, assert_ranks_dense,
    testutil::{Harness, new_lecturer, new_lecturer_with_picture},
};
use tokio::task::JoinSet;

// ---------------------------------------------------------------------------
// Concurrent creates
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_get_distinct_dense_ranks() {
    let h = Harness::new();
    let mut tasks = JoinSet::new();

    for i in 0..50 {
        let coordinator = h.coordinator.clone();
        tasks.spawn(async move {
            coordinator
                .create(new_lecturer(Partition::FullTime, &format!("Lecturer {i}")))
                .await
                .expect("create should succeed")
        });
    }

    let mut ranks = BTreeSet::new();
    while let Some(joined) = tasks.join_next().await {
        let created = joined.expect("task panicked");
        assert!(ranks.insert(created.rank.get()), "rank {} handed out twice", created.rank);
    }

    assert_eq!(ranks, (1..=50).collect::<BTreeSet<u32>>());
    assert_ranks_dense!(h.ranks(Partition::FullTime).await, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_across_partitions() {
    let h = Harness::new();
    let mut tasks = JoinSet::new();

    for i in 0..40 {
        let coordinator = h.coordinator.clone();
        let partition = if i % 2 == 0 { Partition::FullTime } else { Partition::PartTime };
        tasks.spawn(async move {
            coordinator
                .create(new_lecturer_with_picture(partition, &format!("Lecturer {i}")))
                .await
                .expect("create should succeed")
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.expect("task panicked");
    }

    assert_ranks_dense!(h.ranks(Partition::FullTime).await, 20);
    assert_ranks_dense!(h.ranks(Partition::PartTime).await, 20);
    assert_eq!(h.objects.inner().len(), 40);
}

// ---------------------------------------------------------------------------
// Concurrent deletes
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deletes_keep_ranks_dense() {
    let h = Harness::new();
    let mut ids = Vec::new();
    for i in 0..30 {
        let created =
            h.coordinator.create(new_lecturer(Partition::PartTime, &format!("L{i}"))).await.unwrap();
        ids.push(created.id);
    }

    let mut tasks = JoinSet::new();
    for id in ids.iter().copied().step_by(2) {
        let coordinator = h.coordinator.clone();
        tasks.spawn(async move { coordinator.delete(id, Partition::PartTime).await });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.expect("task panicked").expect("delete should succeed");
    }

    let ranks = h.ranks(Partition::PartTime).await;
    assert_ranks_dense!(ranks, 15);

    // Survivors keep their relative order.
    let survivors: Vec<EntityId> = ids.iter().copied().skip(1).step_by(2).collect();
    let ranked: Vec<EntityId> = ranks.iter().map(|e| e.entity).collect();
    assert_eq!(ranked, survivors);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_creates_and_deletes_stay_dense() {
    let h = Harness::new();
    let mut seeded = Vec::new();
    for i in 0..20 {
        seeded.push(
            h.coordinator
                .create(new_lecturer(Partition::FullTime, &format!("Seed {i}")))
                .await
                .unwrap()
                .id,
        );
    }

    let mut tasks = JoinSet::new();
    for (i, id) in seeded.into_iter().enumerate() {
        let coordinator = h.coordinator.clone();
        tasks.spawn(async move {
            coordinator.delete(id, Partition::FullTime).await.expect("delete should succeed");
        });
        let coordinator = h.coordinator.clone();
        tasks.spawn(async move {
            coordinator
                .create(new_lecturer(Partition::FullTime, &format!("New {i}")))
                .await
                .expect("create should succeed");
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.expect("task panicked");
    }

    assert_ranks_dense!(h.ranks(Partition::FullTime).await, 20);
    let snapshot = h.coordinator.metrics().snapshot();
    assert_eq!(snapshot.creates, 40);
    assert_eq!(snapshot.deletes, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_deletes_of_same_lecturer_succeed_once() {
    let h = Harness::new();
    h.coordinator.create(new_lecturer(Partition::FullTime, "Keep")).await.unwrap();
    let target = h.coordinator.create(new_lecturer(Partition::FullTime, "Gone")).await.unwrap().id;

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let coordinator = h.coordinator.clone();
        tasks.spawn(async move { coordinator.delete(target, Partition::FullTime).await });
    }

    let mut succeeded = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.expect("task panicked") {
            Ok(_) => succeeded += 1,
            Err(err) => assert!(
                matches!(err, faculty_roster::RosterError::NotFound { .. }),
                "unexpected error: {err}"
            ),
        }
    }

    assert_eq!(succeeded, 1);
    assert_ranks_dense!(h.ranks(Partition::FullTime).await, 1);
}
