//! Per-stage loaded window.
//!
//! A `StageColumnStore` never performs I/O. It hands out `PageTicket`s that
//! describe the fetch to issue and later accepts the response for that
//! ticket. A response is applied only if its ticket is still the column's
//! single in-flight load under the current filter generation; everything
//! else is discarded on arrival.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use super::fetcher::FetchedPage;
use super::models::{Lead, LeadId, StageId};
use crate::errors::BoardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadKind {
    Initial,
    More,
}

/// Identifies one outstanding page request for a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTicket {
    pub stage_id: StageId,
    pub generation: u64,
    pub offset: usize,
    pub limit: usize,
    pub kind: LoadKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The page was merged into the window.
    Applied { added: usize },
    /// The response belonged to a superseded request and was dropped.
    Discarded,
    /// The fetch failed; the window is unchanged.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Enter,
    Leave,
}

#[derive(Debug, Clone)]
pub struct StageColumnStore {
    stage_id: StageId,
    limit: usize,
    window: Vec<Lead>,
    has_more: bool,
    total_count: usize,
    generation: u64,
    in_flight: Option<PageTicket>,
    failed: Option<LoadKind>,
    last_error: Option<String>,
    /// Leads moved in or out optimistically whose commit has not settled.
    /// The server still sees them at their old stage.
    arriving: BTreeSet<LeadId>,
    departing: BTreeSet<LeadId>,
}

impl StageColumnStore {
    pub fn new(stage_id: StageId, limit: usize) -> Self {
        Self {
            stage_id,
            limit: limit.max(1),
            window: Vec::new(),
            has_more: false,
            total_count: 0,
            generation: 0,
            in_flight: None,
            failed: None,
            last_error: None,
            arriving: BTreeSet::new(),
            departing: BTreeSet::new(),
        }
    }

    pub fn stage_id(&self) -> &StageId {
        &self.stage_id
    }

    /// Loaded leads in board order.
    pub fn leads(&self) -> &[Lead] {
        &self.window
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Message of the last failed load, cleared by the next successful one.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn contains(&self, lead_id: &LeadId) -> bool {
        self.window.iter().any(|l| &l.id == lead_id)
    }

    /// Number of relocations into or out of this column still awaiting commit.
    pub fn pending_moves(&self) -> usize {
        self.arriving.len() + self.departing.len()
    }

    /// Position of the next unseen row in the server's view of the stage.
    fn server_offset(&self) -> usize {
        (self.window.len() + self.departing.len()).saturating_sub(self.arriving.len())
    }

    fn server_next(&mut self) -> PageTicket {
        let ticket = PageTicket {
            stage_id: self.stage_id.clone(),
            generation: self.generation,
            offset: self.server_offset(),
            limit: self.limit,
            kind: LoadKind::More,
        };
        self.in_flight = Some(ticket.clone());
        ticket
    }

    /// Reset to an empty window under `generation` and return the first-page
    /// request. Any load still in flight is superseded.
    pub fn initialize(&mut self, generation: u64) -> PageTicket {
        self.window.clear();
        self.has_more = false;
        self.total_count = 0;
        self.failed = None;
        self.last_error = None;
        self.arriving.clear();
        self.departing.clear();
        self.generation = generation;
        let ticket = PageTicket {
            stage_id: self.stage_id.clone(),
            generation,
            offset: 0,
            limit: self.limit,
            kind: LoadKind::Initial,
        };
        self.in_flight = Some(ticket.clone());
        ticket
    }

    /// Next-page request, or `None` when nothing more can be loaded right now.
    pub fn load_more(&mut self) -> Option<PageTicket> {
        if !self.has_more || self.in_flight.is_some() {
            return None;
        }
        Some(self.server_next())
    }

    /// Re-issue the load that last failed under the current generation.
    pub fn retry(&mut self) -> Option<PageTicket> {
        if self.in_flight.is_some() {
            return None;
        }
        match self.failed.take()? {
            LoadKind::Initial => Some(self.initialize(self.generation)),
            LoadKind::More => Some(self.server_next()),
        }
    }

    pub fn apply(
        &mut self,
        ticket: &PageTicket,
        result: Result<FetchedPage, BoardError>,
    ) -> ApplyOutcome {
        if ticket.generation != self.generation || self.in_flight.as_ref() != Some(ticket) {
            debug!(
                stage_id = %self.stage_id,
                ticket_generation = ticket.generation,
                current_generation = self.generation,
                "discarding stale page response"
            );
            return ApplyOutcome::Discarded;
        }
        self.in_flight = None;

        let page = match result {
            Ok(page) => page,
            Err(err) => {
                self.failed = Some(ticket.kind);
                self.last_error = Some(err.to_string());
                return ApplyOutcome::Failed;
            }
        };

        let mut arrived = Vec::new();
        if ticket.kind == LoadKind::Initial {
            arrived = self
                .window
                .drain(..)
                .filter(|lead| self.arriving.contains(&lead.id))
                .collect();
        }
        let has_more = page.has_more();
        let before = self.window.len();
        for lead in page.leads {
            if !self.departing.contains(&lead.id) && !self.contains(&lead.id) {
                self.window.push(lead);
            }
        }
        for lead in arrived {
            self.insert_ordered(lead);
        }
        self.total_count =
            (page.total_count + self.arriving.len()).saturating_sub(self.departing.len());
        self.has_more = has_more;
        self.failed = None;
        self.last_error = None;
        ApplyOutcome::Applied {
            added: self.window.len() - before,
        }
    }

    /// Adjust the window and count for a relocation without a round trip.
    ///
    /// The lead stays pending until `settle_move`; reversing a pending move
    /// cancels it instead of recording a new one.
    pub fn reconcile_after_move(&mut self, lead: &Lead, direction: MoveDirection) {
        match direction {
            MoveDirection::Enter => {
                if !self.departing.remove(&lead.id) {
                    self.arriving.insert(lead.id.clone());
                }
                self.insert_ordered(lead.clone());
                self.total_count += 1;
            }
            MoveDirection::Leave => {
                if !self.arriving.remove(&lead.id) {
                    self.departing.insert(lead.id.clone());
                }
                self.window.retain(|existing| existing.id != lead.id);
                self.total_count = self.total_count.saturating_sub(1);
            }
        }
    }

    fn insert_ordered(&mut self, lead: Lead) {
        if self.contains(&lead.id) {
            return;
        }
        let at = self
            .window
            .iter()
            .position(|existing| lead.board_order(existing).is_lt())
            .unwrap_or(self.window.len());
        self.window.insert(at, lead);
    }

    /// The server now agrees with the optimistic placement of `lead_id`.
    pub fn settle_move(&mut self, lead_id: &LeadId) {
        self.arriving.remove(lead_id);
        self.departing.remove(lead_id);
    }
}

/// All columns of a board keyed by stage, iterated in stage order.
#[derive(Debug, Clone, Default)]
pub struct ColumnSet {
    order: Vec<StageId>,
    columns: BTreeMap<StageId, StageColumnStore>,
}

impl ColumnSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: StageColumnStore) {
        let id = column.stage_id().clone();
        if self.columns.insert(id.clone(), column).is_none() {
            self.order.push(id);
        }
    }

    pub fn remove(&mut self, stage_id: &StageId) -> Option<StageColumnStore> {
        self.order.retain(|id| id != stage_id);
        self.columns.remove(stage_id)
    }

    pub fn get(&self, stage_id: &StageId) -> Option<&StageColumnStore> {
        self.columns.get(stage_id)
    }

    pub fn get_mut(&mut self, stage_id: &StageId) -> Option<&mut StageColumnStore> {
        self.columns.get_mut(stage_id)
    }

    pub fn contains(&self, stage_id: &StageId) -> bool {
        self.columns.contains_key(stage_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageColumnStore> {
        self.order.iter().filter_map(|id| self.columns.get(id))
    }

    pub fn stage_ids(&self) -> Vec<StageId> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn total_count(&self) -> usize {
        self.columns.values().map(|c| c.total_count()).sum()
    }
}
