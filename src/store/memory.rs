use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{LeadStore, StageStore};
use crate::board::models::*;
use crate::errors::StoreError;

#[derive(Default)]
struct MemoryState {
    stages: BTreeMap<StageId, Stage>,
    leads: BTreeMap<LeadId, Lead>,
}

/// In-process store with the same filtering, ordering and delete-guard
/// semantics as the SQLite store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("store lock poisoned: {}", e)))
    }

    pub fn insert_stage(&self, stage: Stage) -> Result<(), StoreError> {
        self.lock()?.stages.insert(stage.id.clone(), stage);
        Ok(())
    }

    /// Insert or replace a lead record verbatim.
    pub fn insert_lead(&self, lead: Lead) -> Result<(), StoreError> {
        self.lock()?.leads.insert(lead.id.clone(), lead);
        Ok(())
    }

    pub fn lead(&self, id: &LeadId) -> Result<Option<Lead>, StoreError> {
        Ok(self.lock()?.leads.get(id).cloned())
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn fetch_page(&self, query: &PageQuery) -> Result<LeadPage, StoreError> {
        let state = self.lock()?;
        let mut matching: Vec<&Lead> = state
            .leads
            .values()
            .filter(|lead| {
                lead.stage_id == query.stage_id
                    && lead.pipeline_id == query.pipeline_id
                    && query.scope.admits(lead)
                    && matches_search(lead, &query.search)
            })
            .collect();
        matching.sort_by(|a, b| a.board_order(b));
        let total_count = matching.len();
        let leads = matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();
        Ok(LeadPage { leads, total_count })
    }

    async fn update_lead_stage(
        &self,
        lead_id: &LeadId,
        stage_id: &StageId,
    ) -> Result<Lead, StoreError> {
        let mut state = self.lock()?;
        let stage_pipeline = state
            .stages
            .get(stage_id)
            .map(|s| s.pipeline_id.clone())
            .ok_or_else(|| StoreError::NotFound {
                entity: "stage",
                id: stage_id.to_string(),
            })?;
        let lead = state
            .leads
            .get_mut(lead_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "lead",
                id: lead_id.to_string(),
            })?;
        if lead.pipeline_id != stage_pipeline {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "Stage {} belongs to pipeline {}, lead {} to {}",
                stage_id,
                stage_pipeline,
                lead_id,
                lead.pipeline_id
            )));
        }
        lead.stage_id = stage_id.clone();
        lead.updated_at = Utc::now();
        Ok(lead.clone())
    }

    async fn count_leads_in_stage(&self, stage_id: &StageId) -> Result<usize, StoreError> {
        Ok(self
            .lock()?
            .leads
            .values()
            .filter(|lead| &lead.stage_id == stage_id)
            .count())
    }
}

#[async_trait]
impl StageStore for MemoryStore {
    async fn list_stages(&self, pipeline_id: &PipelineId) -> Result<Vec<Stage>, StoreError> {
        let mut stages: Vec<Stage> = self
            .lock()?
            .stages
            .values()
            .filter(|s| &s.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        stages.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.id.cmp(&b.id)));
        Ok(stages)
    }

    async fn create_stage(&self, stage: NewStage) -> Result<Stage, StoreError> {
        let stage = Stage {
            id: StageId::generate(),
            name: stage.name,
            pipeline_id: stage.pipeline_id,
            order_index: stage.order_index,
            color: stage.color,
        };
        self.lock()?.stages.insert(stage.id.clone(), stage.clone());
        Ok(stage)
    }

    async fn update_stage(
        &self,
        stage_id: &StageId,
        patch: StagePatch,
    ) -> Result<Stage, StoreError> {
        let mut state = self.lock()?;
        let stage = state
            .stages
            .get_mut(stage_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "stage",
                id: stage_id.to_string(),
            })?;
        if let Some(name) = patch.name {
            stage.name = name;
        }
        if let Some(color) = patch.color {
            stage.color = color;
        }
        Ok(stage.clone())
    }

    async fn delete_stage(&self, stage_id: &StageId) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let remaining = state
            .leads
            .values()
            .filter(|lead| &lead.stage_id == stage_id)
            .count();
        if remaining > 0 {
            return Err(StoreError::StageInUse {
                stage_id: stage_id.clone(),
                remaining,
            });
        }
        state
            .stages
            .remove(stage_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                entity: "stage",
                id: stage_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::testing::{lead_at, stage};

    #[tokio::test]
    async fn fetch_page_orders_newest_first() {
        let store = MemoryStore::new();
        store.insert_stage(stage("s1", 0)).unwrap();
        store.insert_lead(lead_at("old", "s1", 1)).unwrap();
        store.insert_lead(lead_at("new", "s1", 5)).unwrap();
        store.insert_lead(lead_at("elsewhere", "s2", 9)).unwrap();

        let page = store
            .fetch_page(&PageQuery {
                stage_id: StageId::from("s1"),
                pipeline_id: PipelineId::from("p1"),
                scope: OwnershipScope::All,
                search: String::new(),
                offset: 0,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.leads[0].id.as_str(), "new");
        assert_eq!(page.leads[1].id.as_str(), "old");
    }

    #[tokio::test]
    async fn delete_stage_rejects_while_referenced() {
        let store = MemoryStore::new();
        store.insert_stage(stage("s1", 0)).unwrap();
        store.insert_lead(lead_at("a", "s1", 1)).unwrap();

        let err = StageStore::delete_stage(&store, &StageId::from("s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StageInUse { remaining: 1, .. }));
    }

    #[tokio::test]
    async fn update_lead_stage_touches_updated_at() {
        let store = MemoryStore::new();
        store.insert_stage(stage("s1", 0)).unwrap();
        store.insert_stage(stage("s2", 1)).unwrap();
        let before = lead_at("a", "s1", 1);
        store.insert_lead(before.clone()).unwrap();

        let moved = store
            .update_lead_stage(&LeadId::from("a"), &StageId::from("s2"))
            .await
            .unwrap();
        assert_eq!(moved.stage_id.as_str(), "s2");
        assert!(moved.updated_at > before.updated_at);
    }
}
