//! Ranked faculty roster engine.
//!
//! This crate keeps a roster of lecturers ranked densely within partitions
//! (full-time and part-time), each with an optional picture stored as a blob.
//! Lecturer rows and ranks live in a relational store; pictures live in an
//! object store. The two stores share no transaction, so the
//! [`LifecycleCoordinator`] runs every create and delete as a saga that
//! leaves neither orphaned blobs nor dangling references behind.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │             HTTP / RPC surface (out of scope)            │
//! ├────────────────────────────────┬─────────────────────────┤
//! │      LifecycleCoordinator      │      EntityCatalog      │
//! │   (create / delete / update)   │   (ordered listings)    │
//! ├───────────────┬────────────────┴─────────────────────────┤
//! │  RankLedger   │  AttachmentStore  <──  Reconciler        │
//! ├───────────────┴─────────────┬────────────────────────────┤
//! │ RelationalStore/Transaction │        ObjectStore         │
//! ├─────────────────────────────┼────────────────────────────┤
//! │    MemoryRelationalStore    │     MemoryObjectStore      │
//! └─────────────────────────────┴────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use faculty_roster::{
//!     LecturerProfile, LifecycleCoordinator, MemoryObjectStore, MemoryRelationalStore,
//!     NewLecturer, Partition, RosterConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = LifecycleCoordinator::new(
//!         Arc::new(MemoryRelationalStore::new()),
//!         Arc::new(MemoryObjectStore::new("pictures")),
//!         RosterConfig::default(),
//!     )?;
//!
//!     for name in ["Ada", "Grace"] {
//!         let profile = LecturerProfile::builder()
//!             .name(name)
//!             .designation("Lecturer")
//!             .qualifications("PhD")
//!             .build();
//!         let request =
//!             NewLecturer::builder().partition(Partition::FullTime).profile(profile).build();
//!         coordinator.create(request).await?;
//!     }
//!
//!     let listing = coordinator.catalog().list_all().await?;
//!     let ranks: Vec<u32> = listing.iter().map(|l| l.rank.get()).collect();
//!     assert_eq!(ranks, vec![1, 2]);
//!     Ok(())
//! }
//! ```
//!
//! # Implementing a Store
//!
//! 1. Implement [`RelationalStore`] and a matching [`RelationalTransaction`], honoring the
//!    constraints documented in [`relational`]
//! 2. Implement [`ObjectStore`], reporting a missing object as [`ObjectStoreError::NotFound`]
//! 3. Map store-specific failures to [`RelationalError`] / [`ObjectStoreError`] and mark the
//!    retryable ones through their variants
//!
//! See the [`memory`] module source for reference implementations.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with fixtures, failure-injecting store wrappers
//!   and assertion macros. Enable this in `[dev-dependencies]` for integration tests.
//! - **`failpoints`**: Compiles the `fail` crate's fail points into the sagas, the in-memory
//!   relational store and the reconciler.

#![deny(unsafe_code)]

pub mod attachment;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod object_store;
pub mod reconcile;
pub mod relational;
mod retry;
pub mod saga;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod types;

// Re-export primary types at crate root for convenience
pub use attachment::AttachmentStore;
pub use catalog::{CatalogListing, EntityCatalog, RankedListing};
pub use config::{ReconcilerConfig, RetryConfig, RosterConfig};
pub use coordinator::{AttachmentOutcome, DeleteReport, LifecycleCoordinator};
pub use error::{
    BoxError, ConfigError, ErrorClass, ObjectResult, ObjectStoreError, RelationalError,
    RelationalResult, RosterError, RosterResult,
};
pub use ledger::RankLedger;
pub use memory::{MemoryObjectStore, MemoryRelationalStore};
pub use metrics::{RosterMetrics, RosterMetricsSnapshot};
pub use object_store::ObjectStore;
pub use reconcile::{
    BacklogEntry, OrphanReason, ReconcileReport, ReconciliationBacklog, Reconciler,
    ReconcilerHandle,
};
pub use relational::{RelationalStore, RelationalTransaction};
pub use saga::{CreatePhase, DeletePhase, Phase, SagaState};
pub use types::{
    AttachmentName, AttachmentPayload, EntityId, Lecturer, LecturerProfile, LecturerRecord,
    NewLecturer, ObjectHandle, Partition, Rank, RankEntry, RankedLecturer, SignedUrl,
};
