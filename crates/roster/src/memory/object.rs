//! In-memory object store.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeDelta, Utc};
use parking_lot::RwLock;

use crate::{
    error::{ObjectResult, ObjectStoreError},
    object_store::ObjectStore,
    types::{ObjectHandle, SignedUrl},
};

#[derive(Clone, Debug)]
struct StoredObject {
    bytes: Bytes,
    content_type: String,
    generation: u64,
}

/// In-memory implementation of [`ObjectStore`].
///
/// Objects live in a [`BTreeMap`] keyed by name. Every upload gets a fresh
/// generation number, and signed URLs have the form
/// `memory://{bucket}/{name}?generation={n}&expires={unix}`.
///
/// Cheaply cloneable; all clones share the same bucket.
#[derive(Clone)]
pub struct MemoryObjectStore {
    bucket: Arc<str>,
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    generation: Arc<AtomicU64>,
}

impl MemoryObjectStore {
    /// Creates an empty store named `bucket`.
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: Arc::from(bucket.into()),
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            generation: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Returns the contents of an object, if present.
    #[must_use]
    pub fn object(&self, name: &str) -> Option<Bytes> {
        self.objects.read().get(name).map(|o| o.bytes.clone())
    }

    /// Returns the names of all stored objects, in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns `true` if the bucket is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new("roster")
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn put(&self, name: &str, bytes: Bytes, content_type: &str) -> ObjectResult<ObjectHandle> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let size = bytes.len() as u64;
        let object = StoredObject { bytes, content_type: content_type.to_owned(), generation };
        self.objects.write().insert(name.to_owned(), object);
        Ok(ObjectHandle {
            name: name.to_owned(),
            size,
            content_type: content_type.to_owned(),
            generation,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, name: &str) -> ObjectResult<()> {
        match self.objects.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(ObjectStoreError::not_found(name)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn exists(&self, name: &str) -> ObjectResult<bool> {
        Ok(self.objects.read().contains_key(name))
    }

    #[tracing::instrument(skip(self))]
    async fn signed_url(&self, name: &str, ttl: Duration) -> ObjectResult<SignedUrl> {
        let generation = self
            .objects
            .read()
            .get(name)
            .map(|o| o.generation)
            .ok_or_else(|| ObjectStoreError::not_found(name))?;

        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let now = Utc::now();
        let expires_at = now.checked_add_signed(ttl).unwrap_or(now);
        let url = format!(
            "memory://{}/{}?generation={}&expires={}",
            self.bucket,
            name,
            generation,
            expires_at.timestamp()
        );
        Ok(SignedUrl { url, expires_at })
    }
}
