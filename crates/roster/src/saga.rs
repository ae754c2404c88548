//! Saga state machines for the create and delete lifecycles.
//!
//! The coordinator drives each saga through a [`SagaState`]. Transitions are
//! checked against the phase's transition table so that a saga can never,
//! for example, report `Failed` after its relational commit. Every
//! transition is logged at `debug` with the saga kind and entity.
//!
//! ```text
//! create: Initiated -> LedgerReserved -> [AttachmentWritten] -> Committed -> Done
//!             \              \                  \
//!              +--------------+------------------+--> Aborting -> Failed
//!
//! delete: Initiated -> LedgerReleased -> Committed -> AttachmentReclaimed -> Done
//!             \              \               \
//!              +--> Aborting -> Failed        +--> ReconciliationPending
//! ```

use std::fmt;

use crate::{
    error::{RosterError, RosterResult},
    types::EntityId,
};

/// A saga phase with a fixed transition table.
pub trait Phase: Copy + Eq + fmt::Debug + Send + 'static {
    /// Saga kind used in logs.
    const KIND: &'static str;

    /// The phase every saga starts in.
    const INITIAL: Self;

    /// Returns `true` if moving from `self` to `next` is allowed.
    fn can_transition_to(self, next: Self) -> bool;

    /// Returns `true` if no further transition is possible.
    fn is_terminal(self) -> bool;
}

/// Phases of the create saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreatePhase {
    /// Nothing written yet.
    Initiated,
    /// Lecturer row and rank entry written in the open transaction.
    LedgerReserved,
    /// Attachment blob uploaded; it must be compensated if the saga aborts.
    AttachmentWritten,
    /// Relational transaction committed. No compensation happens past this point.
    Committed,
    /// Response assembled.
    Done,
    /// Rolling back and removing any uploaded blob.
    Aborting,
    /// Compensation finished; the error has been surfaced.
    Failed,
}

impl Phase for CreatePhase {
    const KIND: &'static str = "create";
    const INITIAL: Self = Self::Initiated;

    fn can_transition_to(self, next: Self) -> bool {
        use CreatePhase::*;
        matches!(
            (self, next),
            (Initiated, LedgerReserved)
                | (LedgerReserved, AttachmentWritten)
                | (LedgerReserved | AttachmentWritten, Committed)
                | (Committed, Done)
                | (Initiated | LedgerReserved | AttachmentWritten, Aborting)
                | (Aborting, Failed)
        )
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Phases of the delete saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeletePhase {
    /// Nothing written yet.
    Initiated,
    /// Rank released and lecturer row deleted in the open transaction.
    LedgerReleased,
    /// Relational transaction committed; the delete is durable.
    Committed,
    /// Attachment blob removed, or there was none.
    AttachmentReclaimed,
    /// Delete reported.
    Done,
    /// Blob removal failed and was queued for reconciliation. The delete
    /// still succeeded.
    ReconciliationPending,
    /// Rolling back the transaction.
    Aborting,
    /// Rolled back; the error has been surfaced.
    Failed,
}

impl Phase for DeletePhase {
    const KIND: &'static str = "delete";
    const INITIAL: Self = Self::Initiated;

    fn can_transition_to(self, next: Self) -> bool {
        use DeletePhase::*;
        matches!(
            (self, next),
            (Initiated, LedgerReleased)
                | (LedgerReleased, Committed)
                | (Committed, AttachmentReclaimed | ReconciliationPending)
                | (AttachmentReclaimed, Done)
                | (Initiated | LedgerReleased, Aborting)
                | (Aborting, Failed)
        )
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::ReconciliationPending | Self::Failed)
    }
}

/// Tracks the current phase of one running saga.
#[derive(Debug)]
pub struct SagaState<P: Phase> {
    entity: Option<EntityId>,
    phase: P,
}

impl<P: Phase> SagaState<P> {
    /// Starts a saga in [`Phase::INITIAL`].
    #[must_use]
    pub fn new() -> Self {
        Self { entity: None, phase: P::INITIAL }
    }

    /// Starts a saga for a known entity.
    #[must_use]
    pub fn for_entity(entity: EntityId) -> Self {
        Self { entity: Some(entity), phase: P::INITIAL }
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> P {
        self.phase
    }

    /// Returns the entity this saga works on, once known.
    #[must_use]
    pub fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    /// Records the entity id generated during the saga.
    pub fn bind_entity(&mut self, entity: EntityId) {
        self.entity = Some(entity);
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError::Internal`] if the transition is not allowed.
    pub fn advance(&mut self, next: P) -> RosterResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(RosterError::internal(format!(
                "illegal {} saga transition {:?} -> {:?}",
                P::KIND,
                self.phase,
                next
            )));
        }
        tracing::debug!(
            saga = P::KIND,
            entity = ?self.entity,
            from = ?self.phase,
            to = ?next,
            "saga transition",
        );
        self.phase = next;
        Ok(())
    }
}

impl<P: Phase> Default for SagaState<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_create_happy_path_with_attachment() {
        let mut saga = SagaState::<CreatePhase>::new();
        saga.advance(CreatePhase::LedgerReserved).unwrap();
        saga.bind_entity(EntityId::from(4));
        saga.advance(CreatePhase::AttachmentWritten).unwrap();
        saga.advance(CreatePhase::Committed).unwrap();
        saga.advance(CreatePhase::Done).unwrap();
        assert!(saga.phase().is_terminal());
        assert_eq!(saga.entity(), Some(EntityId::from(4)));
    }

    #[test]
    fn test_create_without_attachment_skips_phase() {
        let mut saga = SagaState::<CreatePhase>::new();
        saga.advance(CreatePhase::LedgerReserved).unwrap();
        saga.advance(CreatePhase::Committed).unwrap();
    }

    #[test]
    fn test_create_cannot_abort_after_commit() {
        let mut saga = SagaState::<CreatePhase>::new();
        saga.advance(CreatePhase::LedgerReserved).unwrap();
        saga.advance(CreatePhase::Committed).unwrap();
        let err = saga.advance(CreatePhase::Aborting).unwrap_err();
        assert!(matches!(err, RosterError::Internal { .. }));
        assert_eq!(saga.phase(), CreatePhase::Committed);
    }

    #[test]
    fn test_delete_never_fails_after_commit() {
        use DeletePhase::*;
        for phase in [Committed, AttachmentReclaimed, ReconciliationPending, Done] {
            assert!(!phase.can_transition_to(Aborting));
            assert!(!phase.can_transition_to(Failed));
        }
    }

    #[test]
    fn test_delete_post_commit_failure_is_terminal_pending() {
        let mut saga = SagaState::<DeletePhase>::for_entity(EntityId::from(8));
        saga.advance(DeletePhase::LedgerReleased).unwrap();
        saga.advance(DeletePhase::Committed).unwrap();
        saga.advance(DeletePhase::ReconciliationPending).unwrap();
        assert!(saga.phase().is_terminal());
    }

    #[test]
    fn test_failed_is_only_reachable_through_aborting() {
        assert!(!CreatePhase::Initiated.can_transition_to(CreatePhase::Failed));
        assert!(!DeletePhase::LedgerReleased.can_transition_to(DeletePhase::Failed));
        assert!(CreatePhase::Aborting.can_transition_to(CreatePhase::Failed));
    }
}
