//! Typed error hierarchy for the lead board.
//!
//! Two top-level enums cover the two layers:
//! - `StoreError`: failures reported by a lead/stage store backend
//! - `BoardError`: the taxonomy the board surfaces to its presentation layer
//!
//! Store errors never reach presentation directly; every network-facing board
//! operation converts them into a `BoardError` variant.

use thiserror::Error;

use crate::board::models::{LeadId, StageId};

/// Errors from a `LeadStore` / `StageStore` backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Stage {stage_id} still holds {remaining} lead(s)")]
    StageInUse { stage_id: StageId, remaining: usize },

    #[error("Store backend error: {0:#}")]
    Backend(#[source] anyhow::Error),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        Self::Backend(err)
    }
}

/// Errors surfaced by the kanban board.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Failed to load leads for stage {stage_id}: {source}")]
    FetchFailed {
        stage_id: StageId,
        #[source]
        source: StoreError,
    },

    #[error("Failed to move lead {lead_id}: {source}")]
    RelocationCommitFailed {
        lead_id: LeadId,
        #[source]
        source: StoreError,
    },

    #[error("Stage {stage_id} is not empty ({remaining} lead(s) remaining)")]
    StageNotEmpty { stage_id: StageId, remaining: usize },

    #[error("Failed to {action} stage: {source}")]
    StageMutationFailed {
        action: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Failed to load stages: {0}")]
    StagesUnavailable(#[source] StoreError),

    #[error("Stage {stage_id} is not on this board")]
    UnknownStage { stage_id: StageId },

    #[error("Invalid stage: {0}")]
    InvalidStage(String),

    #[error("Ownership scope is fixed for this employee")]
    ScopeLocked,
}

impl BoardError {
    /// Whether the failure is a user-facing rejection rather than a transport problem.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::StageNotEmpty { .. } | Self::InvalidStage(_) | Self::ScopeLocked
        )
    }
}
