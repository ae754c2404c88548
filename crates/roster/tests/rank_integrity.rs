//! Rank density and uniqueness across create and delete sequences.
//!
//! Every test drives the public [`LifecycleCoordinator`] API and then
//! inspects the committed rank table directly.

#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use faculty_roster::{
    EntityId, LifecycleCoordinator, Partition, RelationalStore, RosterError,
    assert_ranks_dense, assert_roster_err,
    testutil::{Harness, new_lecturer, new_lecturer_with_picture, profile},
};
use proptest::prelude::*;

async fn create(coordinator: &LifecycleCoordinator, partition: Partition, name: &str) -> EntityId {
    coordinator.create(new_lecturer(partition, name)).await.expect("create should succeed").id
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_closes_gap_and_next_create_ranks_last() {
    let h = Harness::new();
    let a = create(&h.coordinator, Partition::FullTime, "A").await;
    let b = create(&h.coordinator, Partition::FullTime, "B").await;

    let report = h.coordinator.delete(a, Partition::FullTime).await.expect("delete");
    assert_eq!(report.released_rank.get(), 1);

    let c = h.coordinator.create(new_lecturer(Partition::FullTime, "C")).await.expect("create");
    assert_eq!(c.rank.get(), 2);

    let ranks = h.ranks(Partition::FullTime).await;
    assert_ranks_dense!(ranks, 2);
    assert_eq!(ranks[0].entity, b);
    assert_eq!(ranks[1].entity, c.id);
}

#[tokio::test]
async fn deleting_last_rank_releases_it_for_reuse() {
    let h = Harness::new();
    create(&h.coordinator, Partition::PartTime, "A").await;
    let b = create(&h.coordinator, Partition::PartTime, "B").await;

    h.coordinator.delete(b, Partition::PartTime).await.expect("delete");
    let c = h.coordinator.create(new_lecturer(Partition::PartTime, "C")).await.expect("create");

    assert_eq!(c.rank.get(), 2);
    assert_ranks_dense!(h.ranks(Partition::PartTime).await, 2);
}

#[tokio::test]
async fn partitions_rank_independently() {
    let h = Harness::new();
    for name in ["F1", "F2", "F3"] {
        create(&h.coordinator, Partition::FullTime, name).await;
    }
    let first_part_timer = h
        .coordinator
        .create(new_lecturer(Partition::PartTime, "P1"))
        .await
        .expect("create");
    assert_eq!(first_part_timer.rank.get(), 1);

    let listing = h.coordinator.catalog().list_all().await.expect("list");
    let order: Vec<(Partition, u32)> =
        listing.iter().map(|l| (l.record.partition, l.rank.get())).collect();
    assert_eq!(
        order,
        vec![
            (Partition::FullTime, 1),
            (Partition::FullTime, 2),
            (Partition::FullTime, 3),
            (Partition::PartTime, 1),
        ]
    );
}

#[tokio::test]
async fn delete_from_wrong_partition_is_not_found() {
    let h = Harness::new();
    let a = create(&h.coordinator, Partition::FullTime, "A").await;

    let result = h.coordinator.delete(a, Partition::PartTime).await;
    assert_roster_err!(result, NotFound);
    assert_ranks_dense!(h.ranks(Partition::FullTime).await, 1);
}

#[tokio::test]
async fn delete_of_missing_lecturer_is_not_found() {
    let h = Harness::new();
    let result = h.coordinator.delete(EntityId::from(404), Partition::FullTime).await;
    assert_roster_err!(result, NotFound);
}

#[tokio::test]
async fn second_rank_for_same_entity_is_conflict() {
    let h = Harness::new();
    let a = create(&h.coordinator, Partition::FullTime, "A").await;

    let store = h.relational.inner();
    let mut txn = store.begin().await.unwrap();
    let result = h.coordinator.ledger().insert(txn.as_mut(), Partition::PartTime, a).await;
    assert_roster_err!(result, Conflict);
    txn.rollback().await.unwrap();

    assert_ranks_dense!(h.ranks(Partition::FullTime).await, 1);
    assert!(h.ranks(Partition::PartTime).await.is_empty());
}

#[tokio::test]
async fn invalid_profile_is_rejected_before_any_write() {
    let h = Harness::new();
    let mut request = new_lecturer_with_picture(Partition::FullTime, "A");
    request.profile.name = String::new();

    let result = h.coordinator.create(request).await;
    assert_roster_err!(result, InvalidInput);
    assert_eq!(h.relational.inner().lecturer_count(), 0);
    assert!(h.objects.inner().is_empty());
}

#[tokio::test]
async fn update_profile_keeps_rank_and_attachment() {
    let h = Harness::new();
    create(&h.coordinator, Partition::FullTime, "First").await;
    let created = h
        .coordinator
        .create(new_lecturer_with_picture(Partition::FullTime, "Ada"))
        .await
        .expect("create");

    let mut updated_profile = profile("Ada Lovelace");
    updated_profile.designation = "Professor".to_owned();
    let record = h.coordinator.update_profile(created.id, updated_profile).await.expect("update");

    assert_eq!(record.profile.designation, "Professor");
    assert_eq!(record.attachment, created.attachment);
    let ranked = h.coordinator.catalog().get(created.id).await.unwrap().unwrap();
    assert_eq!(ranked.rank.get(), 2);
    assert_eq!(ranked.record.profile.name, "Ada Lovelace");
    assert_eq!(h.coordinator.metrics().snapshot().profile_updates, 1);
}

#[tokio::test]
async fn update_of_missing_lecturer_is_not_found() {
    let h = Harness::new();
    let result = h.coordinator.update_profile(EntityId::from(7), profile("Nobody")).await;
    assert!(matches!(result, Err(RosterError::NotFound { partition: None, .. })));
}

// ---------------------------------------------------------------------------
// Property: any create/delete sequence keeps every partition dense
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    Create(Partition),
    Delete(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => prop_oneof![Just(Partition::FullTime), Just(Partition::PartTime)].prop_map(Op::Create),
        2 => any::<usize>().prop_map(Op::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn ranks_stay_dense_under_random_sequences(ops in prop::collection::vec(op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let h = Harness::new();
            let mut live: Vec<(EntityId, Partition)> = Vec::new();

            for (i, op) in ops.into_iter().enumerate() {
                match op {
                    Op::Create(partition) => {
                        let expected = h.ranks(partition).await.len() + 1;
                        let created = h
                            .coordinator
                            .create(new_lecturer(partition, &format!("L{i}")))
                            .await
                            .unwrap();
                        assert_eq!(created.rank.get() as usize, expected);
                        live.push((created.id, partition));
                    },
                    Op::Delete(pick) if !live.is_empty() => {
                        let (id, partition) = live.remove(pick % live.len());
                        h.coordinator.delete(id, partition).await.unwrap();
                    },
                    Op::Delete(_) => {},
                }

                for partition in Partition::ALL {
                    let expected = live.iter().filter(|(_, p)| *p == partition).count();
                    assert_ranks_dense!(h.ranks(partition).await, expected);
                }
            }
        });
    }
}
