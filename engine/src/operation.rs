//! Operation types describing requested mutations.
//!
//! An operation records what was asked for and how far it has progressed.
//! Phases only move forward:
//!
//! ```text
//! PendingOptimistic -> Confirmed -> Reconciling -> Synced
//!                   \-> RolledBack
//! ```

use crate::{error::Result, Error, OperationId, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

/// Progress of a single mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Applied locally, remote call in flight
    PendingOptimistic,
    /// Remote accepted the mutation
    Confirmed,
    /// Remote rejected the mutation and the store was restored
    RolledBack,
    /// Confirmed, authoritative re-fetch scheduled
    Reconciling,
    /// Authoritative re-fetch completed
    Synced,
}

impl Phase {
    /// Whether `self -> next` is a legal step.
    pub fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::PendingOptimistic, Phase::Confirmed)
                | (Phase::PendingOptimistic, Phase::RolledBack)
                | (Phase::Confirmed, Phase::Reconciling)
                | (Phase::Reconciling, Phase::Synced)
        )
    }

    /// Terminal phases of the mutation itself.
    pub fn is_settled(self) -> bool {
        !matches!(self, Phase::PendingOptimistic)
    }
}

/// A requested mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Operation ID
    pub op_id: OperationId,
    /// What kind of mutation
    pub kind: MutationKind,
    /// Target identifier (update/delete only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<RecordId>,
    /// Requested payload (create item or partial update)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Current phase
    pub phase: Phase,
    /// When the mutation was requested (milliseconds since epoch)
    pub started_at: Timestamp,
}

impl Operation {
    /// A create, starting in `PendingOptimistic`.
    pub fn create(op_id: impl Into<OperationId>, payload: Value, started_at: Timestamp) -> Self {
        Self {
            op_id: op_id.into(),
            kind: MutationKind::Create,
            target: None,
            payload: Some(payload),
            phase: Phase::PendingOptimistic,
            started_at,
        }
    }

    /// An update, starting in `PendingOptimistic`.
    pub fn update(
        op_id: impl Into<OperationId>,
        target: impl Into<RecordId>,
        payload: Value,
        started_at: Timestamp,
    ) -> Self {
        Self {
            op_id: op_id.into(),
            kind: MutationKind::Update,
            target: Some(target.into()),
            payload: Some(payload),
            phase: Phase::PendingOptimistic,
            started_at,
        }
    }

    /// A delete, starting in `PendingOptimistic`.
    pub fn delete(
        op_id: impl Into<OperationId>,
        target: impl Into<RecordId>,
        started_at: Timestamp,
    ) -> Self {
        Self {
            op_id: op_id.into(),
            kind: MutationKind::Delete,
            target: Some(target.into()),
            payload: None,
            phase: Phase::PendingOptimistic,
            started_at,
        }
    }

    /// Move to `next`, rejecting illegal steps.
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Mark confirmed by the remote.
    pub fn confirm(&mut self) -> Result<()> {
        self.advance(Phase::Confirmed)
    }

    /// Mark rolled back after a remote failure.
    pub fn roll_back(&mut self) -> Result<()> {
        self.advance(Phase::RolledBack)
    }
}
