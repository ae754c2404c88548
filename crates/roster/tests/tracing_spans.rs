//! Integration test verifying that `#[instrument]` annotations produce
//! the expected spans across sagas, ledger and catalog operations.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use faculty_roster::{
    Partition,
    testutil::{Harness, new_lecturer, new_lecturer_with_picture},
};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records span names with their parent's name
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl SpanCollector {
    fn names(&self) -> Vec<String> {
        self.spans.lock().expect("lock poisoned").iter().map(|(name, _)| name.clone()).collect()
    }

    fn has_child(&self, parent: &str, child: &str) -> bool {
        self.spans
            .lock()
            .expect("lock poisoned")
            .iter()
            .any(|(name, p)| name == child && p.as_deref() == Some(parent))
    }
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            let parent = span.parent().map(|p| p.name().to_owned());
            self.spans.lock().expect("lock poisoned").push((span.name().to_owned(), parent));
        }
    }
}

fn collect() -> (SpanCollector, tracing::subscriber::DefaultGuard) {
    let collector = SpanCollector::default();
    let subscriber = tracing_subscriber::registry().with(collector.clone());
    (collector, tracing::subscriber::set_default(subscriber))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_saga_spans_nest_under_create() {
    let (collector, _guard) = collect();
    let h = Harness::new();

    h.coordinator
        .create(new_lecturer_with_picture(Partition::FullTime, "Ada"))
        .await
        .expect("create should succeed");

    let names = collector.names();
    assert!(names.iter().any(|s| s == "create"), "expected a 'create' span, got: {names:?}");
    assert!(collector.has_child("create", "insert"), "ledger insert not nested: {names:?}");
    assert!(collector.has_child("create", "put"), "attachment put not nested: {names:?}");
    assert!(collector.has_child("insert", "next_rank"), "next_rank not nested: {names:?}");
}

#[tokio::test]
async fn delete_saga_spans_nest_under_delete() {
    let h = Harness::new();
    let created = h
        .coordinator
        .create(new_lecturer_with_picture(Partition::PartTime, "Ada"))
        .await
        .expect("create should succeed");

    let (collector, _guard) = collect();
    h.coordinator.delete(created.id, Partition::PartTime).await.expect("delete should succeed");

    let names = collector.names();
    assert!(names.iter().any(|s| s == "delete"), "expected a 'delete' span, got: {names:?}");
    assert!(collector.has_child("delete", "remove"), "ledger remove not nested: {names:?}");
    assert!(collector.has_child("with_retry", "delete"), "attachment delete not retried: {names:?}");
}

#[tokio::test]
async fn catalog_listing_creates_spans() {
    let h = Harness::new();
    h.coordinator.create(new_lecturer(Partition::FullTime, "Ada")).await.expect("create");

    let (collector, _guard) = collect();
    h.coordinator.catalog().list_all().await.expect("list should succeed");

    assert!(collector.has_child("list_all", "list_partition"));
    let partitions = collector.names().iter().filter(|s| *s == "list_partition").count();
    assert_eq!(partitions, Partition::ALL.len());
}

#[tokio::test]
async fn reconciler_pass_creates_span() {
    let (collector, _guard) = collect();
    let h = Harness::new();

    let _ = h.coordinator.reconciler().run_once().await;

    let names = collector.names();
    assert!(names.iter().any(|s| s == "run_once"), "expected a 'run_once' span, got: {names:?}");
}
