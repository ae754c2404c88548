#![cfg(feature = "failpoints")]
#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]
//! Integration tests for fail-point injection.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p faculty-roster --features failpoints --test failpoint_tests
//! ```

use faculty_roster::{
    AttachmentOutcome, OrphanReason, Partition, RosterError, assert_ranks_dense,
    assert_roster_err,
    testutil::{Harness, new_lecturer, new_lecturer_with_picture},
};

#[tokio::test]
async fn create_commit_failpoint_compensates_upload() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("saga-create-before-commit", "return").expect("failed to configure fail point");

    let h = Harness::new();
    let result = h.coordinator.create(new_lecturer_with_picture(Partition::FullTime, "Ada")).await;

    assert!(matches!(result, Err(RosterError::LedgerWrite { operation: "commit", .. })));
    assert!(h.objects.inner().is_empty(), "blob uploaded before commit must be removed");
    assert_eq!(h.relational.inner().lecturer_count(), 0);

    scenario.teardown();
}

#[tokio::test]
async fn create_without_failpoint_succeeds() {
    let scenario = fail::FailScenario::setup();
    // No fail point configured; the saga should commit normally

    let h = Harness::new();
    let created = h
        .coordinator
        .create(new_lecturer_with_picture(Partition::FullTime, "Ada"))
        .await
        .expect("create should succeed");
    assert!(created.picture_url.is_some());

    scenario.teardown();
}

#[tokio::test]
async fn delete_commit_failpoint_leaves_ledger_untouched() {
    let scenario = fail::FailScenario::setup();

    let h = Harness::new();
    let a = h.coordinator.create(new_lecturer(Partition::PartTime, "A")).await.unwrap();
    h.coordinator.create(new_lecturer(Partition::PartTime, "B")).await.unwrap();

    fail::cfg("saga-delete-before-commit", "return").expect("failed to configure fail point");
    let result = h.coordinator.delete(a.id, Partition::PartTime).await;
    assert_roster_err!(result, LedgerWrite);
    assert_ranks_dense!(h.ranks(Partition::PartTime).await, 2);

    fail::remove("saga-delete-before-commit");
    let report = h.coordinator.delete(a.id, Partition::PartTime).await.expect("retry succeeds");
    assert_eq!(report.released_rank.get(), 1);
    assert_eq!(report.attachment, AttachmentOutcome::None);

    scenario.teardown();
}

#[tokio::test]
async fn store_commit_failpoint_rolls_back_create() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-relational-commit", "return").expect("failed to configure fail point");

    let h = Harness::new();
    let result = h.coordinator.create(new_lecturer_with_picture(Partition::FullTime, "Ada")).await;

    assert_roster_err!(result, LedgerWrite);
    assert!(h.ranks(Partition::FullTime).await.is_empty());
    assert!(h.objects.inner().is_empty());

    scenario.teardown();
}

#[tokio::test]
async fn reconciler_failpoint_keeps_entry_queued() {
    let scenario = fail::FailScenario::setup();

    let h = Harness::new();
    let created = h
        .coordinator
        .create(new_lecturer_with_picture(Partition::FullTime, "Ada"))
        .await
        .unwrap();
    h.objects.deny_deletes(true);
    h.coordinator.delete(created.id, Partition::FullTime).await.unwrap();
    h.objects.deny_deletes(false);
    let name = created.attachment.unwrap();

    fail::cfg("reconciler-before-delete", "return").expect("failed to configure fail point");
    let pass = h.coordinator.reconciler().run_once().await;
    assert_eq!(pass.failed, vec![name.clone()]);
    assert_eq!(h.coordinator.backlog().get(&name).unwrap().reason, OrphanReason::DeletedOwner);

    fail::remove("reconciler-before-delete");
    let pass = h.coordinator.reconciler().run_once().await;
    assert_eq!(pass.reclaimed, vec![name]);

    scenario.teardown();
}
