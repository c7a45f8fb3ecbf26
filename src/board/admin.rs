use std::sync::Arc;

use tracing::info;

use super::models::{NewStage, PipelineId, Stage, StageId, StagePatch};
use super::registry::AggregateRegistry;
use crate::errors::{BoardError, StoreError};
use crate::store::{LeadStore, StageStore};

/// Stage create / rename / recolor / delete.
///
/// Nothing here is optimistic: callers update their local stage list only
/// after the store confirms.
#[derive(Clone)]
pub struct StageAdminController {
    stages: Arc<dyn StageStore>,
    leads: Arc<dyn LeadStore>,
}

impl StageAdminController {
    pub fn new(stages: Arc<dyn StageStore>, leads: Arc<dyn LeadStore>) -> Self {
        Self { stages, leads }
    }

    /// Append a stage after the pipeline's existing ones.
    pub async fn create_stage(
        &self,
        existing: &[Stage],
        name: &str,
        color: Option<String>,
        pipeline_id: &PipelineId,
    ) -> Result<Stage, BoardError> {
        let name = validate_name(name)?;
        let order_index = existing
            .iter()
            .filter(|s| &s.pipeline_id == pipeline_id)
            .count() as i64;
        let stage = self
            .stages
            .create_stage(NewStage {
                name,
                color,
                pipeline_id: pipeline_id.clone(),
                order_index,
            })
            .await
            .map_err(|source| BoardError::StageMutationFailed {
                action: "create",
                source,
            })?;
        info!(stage_id = %stage.id, name = %stage.name, order_index, "stage created");
        Ok(stage)
    }

    pub async fn rename_or_recolor(
        &self,
        stage_id: &StageId,
        mut patch: StagePatch,
    ) -> Result<Stage, BoardError> {
        if patch.is_empty() {
            return Err(BoardError::InvalidStage("nothing to update".into()));
        }
        if let Some(name) = patch.name.take() {
            patch.name = Some(validate_name(&name)?);
        }
        let stage = self
            .stages
            .update_stage(stage_id, patch)
            .await
            .map_err(|source| BoardError::StageMutationFailed {
                action: "update",
                source,
            })?;
        info!(stage_id = %stage.id, "stage updated");
        Ok(stage)
    }

    /// Delete an empty stage.
    ///
    /// The registry check only sees loaded leads, so the store's count is
    /// consulted as well, and the store's own delete guard has the last word.
    pub async fn delete_stage(
        &self,
        stage_id: &StageId,
        registry: &AggregateRegistry,
    ) -> Result<(), BoardError> {
        let loaded = registry.count_in_stage(stage_id);
        if loaded > 0 {
            return Err(BoardError::StageNotEmpty {
                stage_id: stage_id.clone(),
                remaining: loaded,
            });
        }

        let remaining = self
            .leads
            .count_leads_in_stage(stage_id)
            .await
            .map_err(|source| BoardError::StageMutationFailed {
                action: "delete",
                source,
            })?;
        if remaining > 0 {
            return Err(BoardError::StageNotEmpty {
                stage_id: stage_id.clone(),
                remaining,
            });
        }

        self.stages
            .delete_stage(stage_id)
            .await
            .map_err(|source| match source {
                StoreError::StageInUse {
                    stage_id,
                    remaining,
                } => BoardError::StageNotEmpty {
                    stage_id,
                    remaining,
                },
                source => BoardError::StageMutationFailed {
                    action: "delete",
                    source,
                },
            })?;
        info!(stage_id = %stage_id, "stage deleted");
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<String, BoardError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(BoardError::InvalidStage("stage name must not be blank".into()));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::testing::{ScriptedStore, lead_at, stage};

    fn admin(store: &ScriptedStore) -> StageAdminController {
        let shared = Arc::new(store.clone());
        StageAdminController::new(shared.clone(), shared)
    }

    #[tokio::test]
    async fn create_appends_after_existing_stages() {
        let store = ScriptedStore::new();
        let existing = vec![stage("s1", 0), stage("s2", 1)];
        let created = admin(&store)
            .create_stage(&existing, "  Won ", Some("green".into()), &PipelineId::from("p1"))
            .await
            .unwrap();
        assert_eq!(created.order_index, 2);
        assert_eq!(created.name, "Won");
    }

    #[tokio::test]
    async fn blank_names_and_empty_patches_are_rejected() {
        let store = ScriptedStore::new();
        let admin = admin(&store);
        assert!(matches!(
            admin.create_stage(&[], "   ", None, &PipelineId::from("p1")).await,
            Err(BoardError::InvalidStage(_))
        ));
        assert!(matches!(
            admin
                .rename_or_recolor(&StageId::from("s1"), StagePatch::default())
                .await,
            Err(BoardError::InvalidStage(_))
        ));
    }

    #[tokio::test]
    async fn rename_and_recolor() {
        let store = ScriptedStore::new();
        store.memory.insert_stage(stage("s1", 0)).unwrap();
        let updated = admin(&store)
            .rename_or_recolor(
                &StageId::from("s1"),
                StagePatch {
                    name: Some("Qualified".into()),
                    color: Some(Some("amber".into())),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Qualified");
        assert_eq!(updated.color.as_deref(), Some("amber"));
    }

    #[tokio::test]
    async fn loaded_leads_block_deletion_locally() {
        let store = ScriptedStore::new();
        store.memory.insert_stage(stage("s1", 0)).unwrap();
        let mut registry = AggregateRegistry::new();
        registry.reconcile_stage(&StageId::from("s1"), &[lead_at("a", "s1", 1)]);

        let err = admin(&store)
            .delete_stage(&StageId::from("s1"), &registry)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::StageNotEmpty { remaining: 1, .. }));
        assert_eq!(store.count_calls(), 0);
    }

    #[tokio::test]
    async fn unloaded_leads_block_deletion_via_server_count() {
        let store = ScriptedStore::new();
        store.memory.insert_stage(stage("s1", 0)).unwrap();
        store.memory.insert_lead(lead_at("x", "s1", 1)).unwrap();
        store.memory.insert_lead(lead_at("y", "s1", 2)).unwrap();

        let err = admin(&store)
            .delete_stage(&StageId::from("s1"), &AggregateRegistry::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::StageNotEmpty { remaining: 2, .. }));
        assert_eq!(store.count_calls(), 1);
    }

    #[tokio::test]
    async fn store_failure_maps_to_stage_mutation_failed() {
        let store = ScriptedStore::new();
        store.fail_stage_writes(true);
        let err = admin(&store)
            .delete_stage(&StageId::from("s1"), &AggregateRegistry::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BoardError::StageMutationFailed {
                action: "delete",
                ..
            }
        ));
    }
}
