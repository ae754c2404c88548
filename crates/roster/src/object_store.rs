//! Object store collaborator interface.
//!
//! The object store holds attachment blobs. It shares no transaction boundary
//! with the relational store, so the lifecycle coordinator orders its calls
//! around the relational commit instead of relying on atomicity.
//!
//! Authentication and URL-signing schemes belong to the implementation; the
//! trait only fixes what the roster needs from them.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    error::ObjectResult,
    types::{ObjectHandle, SignedUrl},
};

/// Blob storage used for lecturer attachments.
///
/// Implementations are shared between concurrent sagas and must not need
/// per-call locking by the caller.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads `bytes` under `name`, replacing any existing object.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn put(&self, name: &str, bytes: Bytes, content_type: &str)
    -> ObjectResult<ObjectHandle>;

    /// Deletes the object called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::NotFound`](crate::ObjectStoreError::NotFound)
    /// when no such object exists, distinct from every other failure.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, name: &str) -> ObjectResult<()>;

    /// Returns `true` if an object called `name` exists.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn exists(&self, name: &str) -> ObjectResult<bool>;

    /// Produces a URL granting read access to `name` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::NotFound`](crate::ObjectStoreError::NotFound)
    /// when no such object exists.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn signed_url(&self, name: &str, ttl: Duration) -> ObjectResult<SignedUrl>;
}
