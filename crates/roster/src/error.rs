//! Roster error types and result aliases.
//!
//! Three layers of errors exist in this crate:
//!
//! - [`RelationalError`] - failures reported by a [`RelationalStore`](crate::RelationalStore)
//!   implementation (connection loss, constraint violations, serialization failures).
//! - [`ObjectStoreError`] - failures reported by an [`ObjectStore`](crate::ObjectStore)
//!   implementation. A missing object is a distinct variant so that deletes can be treated as
//!   idempotent.
//! - [`RosterError`] - the errors surfaced by the ledger, attachment store, coordinator and
//!   catalog. Collaborator errors are wrapped with their source chain preserved.
//!
//! # Example
//!
//! ```
//! use faculty_roster::{EntityId, ErrorClass, RosterError, RosterResult};
//!
//! fn lookup(id: EntityId) -> RosterResult<()> {
//!     Err(RosterError::not_found(id))
//! }
//!
//! let err = lookup(EntityId::from(7)).unwrap_err();
//! assert_eq!(err.class(), ErrorClass::NotFound);
//! ```

use std::sync::Arc;

use thiserror::Error;

use crate::types::{AttachmentName, EntityId, Partition};

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for roster operations.
pub type RosterResult<T> = Result<T, RosterError>;

/// Result type alias for relational store operations.
pub type RelationalResult<T> = Result<T, RelationalError>;

/// Result type alias for object store operations.
pub type ObjectResult<T> = Result<T, ObjectStoreError>;

/// Errors reported by a relational store implementation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RelationalError {
    /// A unique constraint rejected the write.
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation {
        /// Name of the violated constraint.
        constraint: String,
    },

    /// A foreign key constraint rejected the write.
    #[error("Foreign key constraint violated: {constraint}")]
    ForeignKeyViolation {
        /// Name of the violated constraint.
        constraint: String,
    },

    /// The transaction could not be serialized against a concurrent one and
    /// was aborted by the store.
    #[error("Serialization failure")]
    SerializationFailure,

    /// Connection or network error.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation timed out.
    #[error("Operation timeout")]
    Timeout,

    /// Store-specific internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },
}

impl RelationalError {
    /// Creates a new `UniqueViolation` error.
    #[must_use]
    pub fn unique_violation(constraint: impl Into<String>) -> Self {
        Self::UniqueViolation { constraint: constraint.into() }
    }

    /// Creates a new `ForeignKeyViolation` error.
    #[must_use]
    pub fn foreign_key_violation(constraint: impl Into<String>) -> Self {
        Self::ForeignKeyViolation { constraint: constraint.into() }
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Returns `true` if retrying the whole transaction may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SerializationFailure | Self::Connection { .. } | Self::Timeout)
    }
}

/// Errors reported by an object store implementation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ObjectStoreError {
    /// The named object does not exist.
    #[error("Object not found: {name}")]
    NotFound {
        /// The object name that was not found.
        name: String,
    },

    /// The credentials in use are not allowed to perform the operation.
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Description of the rejected operation.
        message: String,
    },

    /// Network or transport failure talking to the object store.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport error.
        message: String,
        /// The underlying error that caused this transport failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation timed out.
    #[error("Operation timeout")]
    Timeout,
}

impl ObjectStoreError {
    /// Creates a new `NotFound` error for the given object name.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates a new `PermissionDenied` error.
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied { message: message.into() }
    }

    /// Creates a new `Transport` error with the given message.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into(), source: None }
    }

    /// Creates a new `Transport` error with a message and source error.
    #[must_use]
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` if this is the distinct "object is absent" signal.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if retrying the call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout)
    }
}

/// Client-facing classification of a [`RosterError`].
///
/// HTTP or RPC surfaces map these onto their own status codes
/// ("already exists", "not found", "bad request", "retry later").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The entity already holds a rank.
    AlreadyExists,
    /// The entity or partition does not exist.
    NotFound,
    /// The request was rejected before touching any store.
    InvalidArgument,
    /// A store failed; the caller may retry.
    Retryable,
    /// An unexpected failure inside the engine.
    Internal,
}

/// Errors surfaced by the roster engine.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RosterError {
    /// The entity already holds a rank entry (at most one per entity).
    #[error("Lecturer {entity} already holds a rank")]
    Conflict {
        /// The entity that is already ranked.
        entity: EntityId,
    },

    /// The entity does not exist, or has no rank entry in the given partition.
    #[error("Lecturer {entity} not found{}", partition_scope(.partition))]
    NotFound {
        /// The entity that was looked up.
        entity: EntityId,
        /// The partition the lookup was scoped to, if any.
        partition: Option<Partition>,
    },

    /// The relational store failed while inserting, removing or shifting ranks.
    #[error("Ledger write failed during {operation}")]
    LedgerWrite {
        /// The ledger step that failed.
        operation: &'static str,
        /// The relational store error.
        #[source]
        source: RelationalError,
    },

    /// Uploading an attachment failed.
    #[error("Attachment write failed for {name}")]
    AttachmentWrite {
        /// The attachment that could not be written.
        name: AttachmentName,
        /// The object store error.
        #[source]
        source: ObjectStoreError,
    },

    /// Deleting an attachment failed for a reason other than it being absent.
    #[error("Attachment delete failed for {name}")]
    StorageDelete {
        /// The attachment that could not be deleted.
        name: AttachmentName,
        /// The object store error.
        #[source]
        source: ObjectStoreError,
    },

    /// Reading attachment metadata or signing an access URL failed.
    #[error("Attachment access failed for {name}")]
    AttachmentAccess {
        /// The attachment that could not be read.
        name: AttachmentName,
        /// The object store error.
        #[source]
        source: ObjectStoreError,
    },

    /// A post-commit attachment cleanup failed and was queued for reconciliation.
    #[error("Attachment {name} queued for reconciliation after {attempts} attempts")]
    ReconciliationPending {
        /// The attachment awaiting cleanup.
        name: AttachmentName,
        /// Number of delete attempts made before queueing.
        attempts: u32,
    },

    /// The request was rejected before any store was touched.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Description of what was invalid.
        message: String,
    },

    /// Unexpected engine failure.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

fn partition_scope(partition: &Option<Partition>) -> String {
    partition.map(|p| format!(" in {p}")).unwrap_or_default()
}

impl RosterError {
    /// Creates a new `Conflict` error for an already ranked entity.
    #[must_use]
    pub fn conflict(entity: EntityId) -> Self {
        Self::Conflict { entity }
    }

    /// Creates a new unscoped `NotFound` error.
    #[must_use]
    pub fn not_found(entity: EntityId) -> Self {
        Self::NotFound { entity, partition: None }
    }

    /// Creates a new `NotFound` error scoped to a partition.
    #[must_use]
    pub fn not_found_in(entity: EntityId, partition: Partition) -> Self {
        Self::NotFound { entity, partition: Some(partition) }
    }

    /// Wraps a relational error raised during the named ledger step.
    #[must_use]
    pub fn ledger_write(operation: &'static str, source: RelationalError) -> Self {
        Self::LedgerWrite { operation, source }
    }

    /// Creates a new `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Returns the client-facing classification of this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Conflict { .. } => ErrorClass::AlreadyExists,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::InvalidInput { .. } => ErrorClass::InvalidArgument,
            Self::LedgerWrite { .. }
            | Self::AttachmentWrite { .. }
            | Self::StorageDelete { .. }
            | Self::AttachmentAccess { .. }
            | Self::ReconciliationPending { .. } => ErrorClass::Retryable,
            Self::Internal { .. } => ErrorClass::Internal,
        }
    }

    /// Returns `true` if the underlying failure is transient and the same
    /// call may succeed when retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::LedgerWrite { source, .. } => source.is_transient(),
            Self::AttachmentWrite { source, .. }
            | Self::StorageDelete { source, .. }
            | Self::AttachmentAccess { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// Errors raised while validating configuration builders.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A field is below its minimum allowed value.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// The offending field.
        field: &'static str,
        /// The minimum allowed value.
        min: String,
        /// The rejected value.
        value: String,
    },

    /// A field is above its maximum allowed value.
    #[error("{field} must be at most {max}, got {value}")]
    AboveMaximum {
        /// The offending field.
        field: &'static str,
        /// The maximum allowed value.
        max: String,
        /// The rejected value.
        value: String,
    },

    /// Two fields are individually valid but inconsistent with each other.
    #[error("{message}")]
    InvalidRelation {
        /// Description of the inconsistency.
        message: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_class_mapping() {
        let id = EntityId::from(1);
        assert_eq!(RosterError::conflict(id).class(), ErrorClass::AlreadyExists);
        assert_eq!(RosterError::not_found(id).class(), ErrorClass::NotFound);
        assert_eq!(RosterError::invalid_input("x").class(), ErrorClass::InvalidArgument);
        assert_eq!(
            RosterError::ledger_write("commit", RelationalError::Timeout).class(),
            ErrorClass::Retryable
        );
        assert_eq!(RosterError::internal("boom").class(), ErrorClass::Internal);
    }

    #[test]
    fn test_not_found_display_includes_partition() {
        let err = RosterError::not_found_in(EntityId::from(9), Partition::PartTime);
        assert_eq!(err.to_string(), "Lecturer 9 not found in part-time");

        let err = RosterError::not_found(EntityId::from(9));
        assert_eq!(err.to_string(), "Lecturer 9 not found");
    }

    #[test]
    fn test_transient_classification() {
        assert!(RelationalError::SerializationFailure.is_transient());
        assert!(RelationalError::connection("reset").is_transient());
        assert!(!RelationalError::unique_violation("pk").is_transient());

        assert!(ObjectStoreError::transport("reset").is_transient());
        assert!(!ObjectStoreError::not_found("x").is_transient());
        assert!(!ObjectStoreError::permission_denied("x").is_transient());

        let name = AttachmentName::for_lecturer(EntityId::from(1), "Ada");
        let err = RosterError::StorageDelete { name, source: ObjectStoreError::Timeout };
        assert!(err.is_transient());
        assert!(!RosterError::conflict(EntityId::from(1)).is_transient());
    }

    #[test]
    fn test_source_chain_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
        let err =
            RosterError::ledger_write("commit", RelationalError::connection_with_source("lost", io));

        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "Connection error: lost");
        assert_eq!(source.source().unwrap().to_string(), "peer reset");
    }
}
