//! Attachment blob operations.
//!
//! [`AttachmentStore`] wraps an [`ObjectStore`] with the roster's naming and
//! error conventions. Deletes are idempotent: an object that is already gone
//! counts as deleted, which lets compensation and reconciliation retry
//! freely.

use std::{sync::Arc, time::Duration};

use crate::{
    error::{RosterError, RosterResult},
    object_store::ObjectStore,
    types::{AttachmentName, AttachmentPayload, ObjectHandle, SignedUrl},
};

/// Roster-level access to lecturer attachments.
#[derive(Clone)]
pub struct AttachmentStore {
    objects: Arc<dyn ObjectStore>,
}

impl AttachmentStore {
    /// Creates an attachment store backed by `objects`.
    #[must_use]
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }

    /// Uploads `payload` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError::AttachmentWrite`] if the upload fails.
    #[tracing::instrument(skip(self, payload), fields(size = payload.bytes.len()))]
    pub async fn put(
        &self,
        name: &AttachmentName,
        payload: &AttachmentPayload,
    ) -> RosterResult<ObjectHandle> {
        self.objects
            .put(name.as_str(), payload.bytes.clone(), &payload.content_type)
            .await
            .map_err(|source| RosterError::AttachmentWrite { name: name.clone(), source })
    }

    /// Deletes the blob called `name`. A missing blob is success.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError::StorageDelete`] for any failure other than the
    /// blob being absent.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, name: &AttachmentName) -> RosterResult<()> {
        match self.objects.delete(name.as_str()).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!(%name, "attachment already absent");
                Ok(())
            },
            Err(source) => Err(RosterError::StorageDelete { name: name.clone(), source }),
        }
    }

    /// Signs a read URL for `name` valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError::AttachmentAccess`] if the blob is missing or
    /// signing fails.
    #[tracing::instrument(skip(self))]
    pub async fn signed_url(&self, name: &AttachmentName, ttl: Duration) -> RosterResult<SignedUrl> {
        self.objects
            .signed_url(name.as_str(), ttl)
            .await
            .map_err(|source| RosterError::AttachmentAccess { name: name.clone(), source })
    }

    /// Returns `true` if the blob called `name` exists.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError::AttachmentAccess`] if the store cannot be read.
    #[tracing::instrument(skip(self))]
    pub async fn exists(&self, name: &AttachmentName) -> RosterResult<bool> {
        self.objects
            .exists(name.as_str())
            .await
            .map_err(|source| RosterError::AttachmentAccess { name: name.clone(), source })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{memory::MemoryObjectStore, types::EntityId};

    fn store() -> (MemoryObjectStore, AttachmentStore) {
        let objects = MemoryObjectStore::new("pictures");
        (objects.clone(), AttachmentStore::new(Arc::new(objects)))
    }

    #[tokio::test]
    async fn test_put_then_exists() {
        let (objects, attachments) = store();
        let name = AttachmentName::for_lecturer(EntityId::from(3), "Ada");
        let payload = AttachmentPayload::new(&b"png"[..], "image/png");

        let handle = attachments.put(&name, &payload).await.unwrap();
        assert_eq!(handle.name, "3-Ada");
        assert_eq!(handle.size, 3);
        assert!(attachments.exists(&name).await.unwrap());
        assert_eq!(objects.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (objects, attachments) = store();
        let name = AttachmentName::for_lecturer(EntityId::from(3), "Ada");
        attachments.put(&name, &AttachmentPayload::new(&b"x"[..], "image/png")).await.unwrap();

        attachments.delete(&name).await.unwrap();
        attachments.delete(&name).await.unwrap();
        assert!(objects.is_empty());
    }

    #[tokio::test]
    async fn test_signed_url_of_missing_blob_is_access_error() {
        let (_, attachments) = store();
        let name = AttachmentName::from_stored("9-Nobody");
        let err = attachments.signed_url(&name, Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, RosterError::AttachmentAccess { .. }));
    }
}
