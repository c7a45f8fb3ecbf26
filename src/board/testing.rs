//! Shared fixtures for board tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use super::models::*;
use crate::errors::StoreError;
use crate::store::{LeadStore, MemoryStore, StageStore};

/// Lead in pipeline `p1`, updated at 09:`minute` on a fixed day.
pub fn lead_at(id: &str, stage_id: &str, minute: u32) -> Lead {
    let at = Utc
        .with_ymd_and_hms(2026, 3, 1, 9, minute, 0)
        .single()
        .expect("valid fixture time");
    Lead {
        id: LeadId::from(id),
        name: format!("Lead {id}"),
        phone: format!("+7 700 {minute:03}"),
        alt_phone: None,
        location: "Almaty".into(),
        age: None,
        status: Some(LeadStatus::New),
        stage_id: StageId::from(stage_id),
        pipeline_id: PipelineId::from("p1"),
        owner_id: None,
        created_at: at,
        updated_at: at,
    }
}

pub fn stage(id: &str, order_index: i64) -> Stage {
    Stage {
        id: StageId::from(id),
        name: id.to_string(),
        pipeline_id: PipelineId::from("p1"),
        order_index,
        color: None,
    }
}

/// Memory store with call counters, injected latency and injected failures.
#[derive(Clone, Default)]
pub struct ScriptedStore {
    pub memory: MemoryStore,
    fetches: Arc<Mutex<Vec<PageQuery>>>,
    counts: Arc<AtomicUsize>,
    fetch_delays: Arc<Mutex<VecDeque<Duration>>>,
    update_delay: Arc<Mutex<Duration>>,
    fail_fetches: Arc<AtomicBool>,
    fail_updates: Arc<AtomicBool>,
    fail_stage_writes: Arc<AtomicBool>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `p1` with the given stages and `count` leads per stage.
    pub fn seeded(stages: &[(&str, usize)]) -> Self {
        let store = Self::new();
        for (order, (stage_id, count)) in stages.iter().enumerate() {
            store.memory.insert_stage(stage(stage_id, order as i64)).unwrap();
            for i in 0..*count {
                let minute = (i % 60) as u32;
                store
                    .memory
                    .insert_lead(lead_at(&format!("{stage_id}-{i:03}"), stage_id, minute))
                    .unwrap();
            }
        }
        store
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    pub fn fetch_log(&self) -> Vec<PageQuery> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn count_calls(&self) -> usize {
        self.counts.load(Ordering::SeqCst)
    }

    /// Latencies for upcoming fetches, consumed in call order.
    pub fn delay_fetches(&self, delays: impl IntoIterator<Item = Duration>) {
        self.fetch_delays.lock().unwrap().extend(delays);
    }

    pub fn delay_updates(&self, delay: Duration) {
        *self.update_delay.lock().unwrap() = delay;
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stage_writes(&self, fail: bool) {
        self.fail_stage_writes.store(fail, Ordering::SeqCst);
    }

    fn injected(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!("injected {what} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl LeadStore for ScriptedStore {
    async fn fetch_page(&self, query: &PageQuery) -> Result<LeadPage, StoreError> {
        self.fetches.lock().unwrap().push(query.clone());
        let delay = self.fetch_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Self::injected(&self.fail_fetches, "fetch")?;
        self.memory.fetch_page(query).await
    }

    async fn update_lead_stage(
        &self,
        lead_id: &LeadId,
        stage_id: &StageId,
    ) -> Result<Lead, StoreError> {
        let delay = *self.update_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Self::injected(&self.fail_updates, "update")?;
        self.memory.update_lead_stage(lead_id, stage_id).await
    }

    async fn count_leads_in_stage(&self, stage_id: &StageId) -> Result<usize, StoreError> {
        self.counts.fetch_add(1, Ordering::SeqCst);
        Self::injected(&self.fail_stage_writes, "count")?;
        self.memory.count_leads_in_stage(stage_id).await
    }
}

#[async_trait]
impl StageStore for ScriptedStore {
    async fn list_stages(&self, pipeline_id: &PipelineId) -> Result<Vec<Stage>, StoreError> {
        self.memory.list_stages(pipeline_id).await
    }

    async fn create_stage(&self, stage: NewStage) -> Result<Stage, StoreError> {
        Self::injected(&self.fail_stage_writes, "stage create")?;
        self.memory.create_stage(stage).await
    }

    async fn update_stage(
        &self,
        stage_id: &StageId,
        patch: StagePatch,
    ) -> Result<Stage, StoreError> {
        Self::injected(&self.fail_stage_writes, "stage update")?;
        self.memory.update_stage(stage_id, patch).await
    }

    async fn delete_stage(&self, stage_id: &StageId) -> Result<(), StoreError> {
        Self::injected(&self.fail_stage_writes, "stage delete")?;
        StageStore::delete_stage(&self.memory, stage_id).await
    }
}
