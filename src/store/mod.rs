//! Backing stores consumed by the board.
//!
//! The board only talks to the `LeadStore` and `StageStore` traits. Two
//! implementations ship with the crate:
//!
//! | Module   | Backend                                                  |
//! |----------|----------------------------------------------------------|
//! | `db`     | SQLite via `DbHandle` (thin `Arc<Mutex<_>>`, blocking pool) |
//! | `memory` | In-process maps, for embedding and tests                  |
//!
//! Both re-check stage emptiness at deletion time, so the board's local
//! check is only ever a fast path.

pub mod db;
pub mod memory;

use async_trait::async_trait;

use crate::board::models::{
    Lead, LeadId, LeadPage, NewStage, PageQuery, PipelineId, Stage, StageId, StagePatch,
};
use crate::errors::StoreError;

pub use db::{DbHandle, LeadDb, SqliteStore};
pub use memory::MemoryStore;

#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Leads of one stage matching the query filter, ordered most recently
    /// updated first, plus the total matching count for the stage.
    async fn fetch_page(&self, query: &PageQuery) -> Result<LeadPage, StoreError>;

    /// Move a lead to another stage, returning the stored record.
    async fn update_lead_stage(
        &self,
        lead_id: &LeadId,
        stage_id: &StageId,
    ) -> Result<Lead, StoreError>;

    /// Authoritative number of leads referencing a stage, ignoring any filter.
    async fn count_leads_in_stage(&self, stage_id: &StageId) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait StageStore: Send + Sync {
    async fn list_stages(&self, pipeline_id: &PipelineId) -> Result<Vec<Stage>, StoreError>;

    async fn create_stage(&self, stage: NewStage) -> Result<Stage, StoreError>;

    async fn update_stage(&self, stage_id: &StageId, patch: StagePatch)
    -> Result<Stage, StoreError>;

    /// Fails with `StoreError::StageInUse` while any lead references the stage.
    async fn delete_stage(&self, stage_id: &StageId) -> Result<(), StoreError>;
}
