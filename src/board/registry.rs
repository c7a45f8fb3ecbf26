use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::column::StageColumnStore;
use super::models::{Lead, LeadId, StageId};

/// Where a lead was before an optimistic move.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorPlacement {
    pub stage_id: StageId,
    pub updated_at: DateTime<Utc>,
}

/// Union of every column's loaded leads, addressable by lead id.
///
/// Two writers only: `reconcile_stage` owns a whole stage partition and
/// `apply_optimistic_move` owns a single lead's stage. The next
/// reconciliation of a stage supersedes any optimistic value inside it.
#[derive(Debug, Clone, Default)]
pub struct AggregateRegistry {
    entries: HashMap<LeadId, Lead>,
}

impl AggregateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every entry currently filed under `stage_id` with `leads`.
    pub fn reconcile_stage(&mut self, stage_id: &StageId, leads: &[Lead]) {
        self.entries.retain(|_, lead| &lead.stage_id != stage_id);
        for lead in leads {
            self.entries.insert(lead.id.clone(), lead.clone());
        }
    }

    pub fn reconcile_column(&mut self, column: &StageColumnStore) {
        self.reconcile_stage(column.stage_id(), column.leads());
    }

    pub fn lookup(&self, lead_id: &LeadId) -> Option<&Lead> {
        self.entries.get(lead_id)
    }

    /// Refile one lead under a new stage, returning where it was.
    pub fn apply_optimistic_move(
        &mut self,
        lead_id: &LeadId,
        new_stage_id: &StageId,
        new_updated_at: DateTime<Utc>,
    ) -> Option<PriorPlacement> {
        let lead = self.entries.get_mut(lead_id)?;
        let prior = PriorPlacement {
            stage_id: std::mem::replace(&mut lead.stage_id, new_stage_id.clone()),
            updated_at: std::mem::replace(&mut lead.updated_at, new_updated_at),
        };
        Some(prior)
    }

    pub fn count_in_stage(&self, stage_id: &StageId) -> usize {
        self.entries
            .values()
            .filter(|lead| &lead.stage_id == stage_id)
            .count()
    }

    pub fn remove_stage(&mut self, stage_id: &StageId) {
        self.reconcile_stage(stage_id, &[]);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
