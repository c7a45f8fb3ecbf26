//! Drag relocation state machine.
//!
//! ```text
//!            pointer_down            pointer_move ≥ activation
//!   Idle ───────────────▶ Pressed ───────────────────────────▶ Dragging
//!    ▲  ◀──── release (click) ──┘                                 │
//!    │                           keyboard_pick ──────────────────▶│
//!    └──────── release: Relocated | Rejected, cancel ─────────────┘
//! ```
//!
//! A valid drop mutates the registry and both columns before the commit is
//! issued. Each relocating lead stays in the moving set until `settle`, and
//! no gesture may start on a lead in that set.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use super::column::{ColumnSet, MoveDirection};
use super::models::{Lead, LeadId, StageId};
use super::registry::AggregateRegistry;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn distance_to(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DragPhase {
    Idle,
    Pressed { lead_id: LeadId, origin: Point },
    Dragging { lead_id: LeadId },
}

/// What the pointer was over when released.
#[derive(Debug, Clone, PartialEq)]
pub enum DropTarget {
    /// A column's empty area.
    Stage(StageId),
    /// Another card; the drop lands in that card's current stage.
    Lead(LeadId),
    Nowhere,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GestureRejected {
    #[error("Lead {0} is still being moved")]
    LeadBusy(LeadId),
    #[error("Lead {0} is not loaded on the board")]
    UnknownLead(LeadId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidDrop {
    NoTarget,
    SameStage,
    UnknownTarget,
    UnknownLead,
    LeadBusy,
}

/// An optimistic relocation awaiting its commit.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMove {
    pub lead_id: LeadId,
    pub from_stage: StageId,
    pub to_stage: StageId,
    pub prior_updated_at: DateTime<Utc>,
    pub moved_at: DateTime<Utc>,
    /// The lead as filed in the destination at drop time.
    lead: Lead,
    source_generation: Option<u64>,
    target_generation: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DropOutcome {
    /// Released without a gesture in progress.
    Ignored,
    /// Pressed and released under the activation distance.
    Click(LeadId),
    Rejected { lead_id: LeadId, reason: InvalidDrop },
    Relocated(PendingMove),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    Committed(PendingMove),
    RolledBack(PendingMove),
    /// No relocation was pending for the lead.
    Unknown,
}

#[derive(Debug, Clone)]
pub struct DragRelocationController {
    phase: DragPhase,
    activation_distance: f64,
    moving: BTreeMap<LeadId, PendingMove>,
}

impl DragRelocationController {
    pub fn new(activation_distance: f64) -> Self {
        Self {
            phase: DragPhase::Idle,
            activation_distance: activation_distance.max(0.0),
            moving: BTreeMap::new(),
        }
    }

    pub fn phase(&self) -> &DragPhase {
        &self.phase
    }

    /// The lead under the drag overlay, if a drag is active.
    pub fn active_lead_id(&self) -> Option<&LeadId> {
        match &self.phase {
            DragPhase::Dragging { lead_id } => Some(lead_id),
            _ => None,
        }
    }

    pub fn is_moving(&self, lead_id: &LeadId) -> bool {
        self.moving.contains_key(lead_id)
    }

    pub fn moving_lead_ids(&self) -> impl Iterator<Item = &LeadId> {
        self.moving.keys()
    }

    pub fn pending(&self, lead_id: &LeadId) -> Option<&PendingMove> {
        self.moving.get(lead_id)
    }

    fn check_startable(
        &self,
        lead_id: &LeadId,
        registry: &AggregateRegistry,
    ) -> Result<(), GestureRejected> {
        if self.is_moving(lead_id) {
            return Err(GestureRejected::LeadBusy(lead_id.clone()));
        }
        if registry.lookup(lead_id).is_none() {
            return Err(GestureRejected::UnknownLead(lead_id.clone()));
        }
        Ok(())
    }

    pub fn pointer_down(
        &mut self,
        lead_id: &LeadId,
        at: Point,
        registry: &AggregateRegistry,
    ) -> Result<(), GestureRejected> {
        self.check_startable(lead_id, registry)?;
        self.phase = DragPhase::Pressed {
            lead_id: lead_id.clone(),
            origin: at,
        };
        Ok(())
    }

    /// Returns the lead that just became active, if this move crossed the
    /// activation distance.
    pub fn pointer_move(&mut self, at: Point) -> Option<LeadId> {
        let DragPhase::Pressed { lead_id, origin } = &self.phase else {
            return None;
        };
        if origin.distance_to(&at) < self.activation_distance {
            return None;
        }
        let lead_id = lead_id.clone();
        debug!(lead_id = %lead_id, "drag activated");
        self.phase = DragPhase::Dragging {
            lead_id: lead_id.clone(),
        };
        Some(lead_id)
    }

    /// Keyboard sensors activate immediately.
    pub fn keyboard_pick(
        &mut self,
        lead_id: &LeadId,
        registry: &AggregateRegistry,
    ) -> Result<(), GestureRejected> {
        self.check_startable(lead_id, registry)?;
        debug!(lead_id = %lead_id, "keyboard drag activated");
        self.phase = DragPhase::Dragging {
            lead_id: lead_id.clone(),
        };
        Ok(())
    }

    pub fn cancel(&mut self) -> Option<LeadId> {
        match std::mem::replace(&mut self.phase, DragPhase::Idle) {
            DragPhase::Idle => None,
            DragPhase::Pressed { lead_id, .. } | DragPhase::Dragging { lead_id } => Some(lead_id),
        }
    }

    /// End the gesture. A valid drop is applied to `registry` and `columns`
    /// before this returns; the caller commits the returned move.
    pub fn release(
        &mut self,
        target: &DropTarget,
        registry: &mut AggregateRegistry,
        columns: &mut ColumnSet,
        now: DateTime<Utc>,
    ) -> DropOutcome {
        let lead_id = match std::mem::replace(&mut self.phase, DragPhase::Idle) {
            DragPhase::Idle => return DropOutcome::Ignored,
            DragPhase::Pressed { lead_id, .. } => return DropOutcome::Click(lead_id),
            DragPhase::Dragging { lead_id } => lead_id,
        };
        let reject = |reason: InvalidDrop| {
            debug!(lead_id = %lead_id, ?reason, "drop rejected");
            DropOutcome::Rejected {
                lead_id: lead_id.clone(),
                reason,
            }
        };

        if self.is_moving(&lead_id) {
            return reject(InvalidDrop::LeadBusy);
        }
        let Some(current_stage) = registry.lookup(&lead_id).map(|l| l.stage_id.clone()) else {
            return reject(InvalidDrop::UnknownLead);
        };
        let target_stage = match target {
            DropTarget::Stage(stage_id) if columns.contains(stage_id) => stage_id.clone(),
            DropTarget::Stage(_) => return reject(InvalidDrop::UnknownTarget),
            DropTarget::Lead(other) => match registry.lookup(other) {
                Some(card) if columns.contains(&card.stage_id) => card.stage_id.clone(),
                _ => return reject(InvalidDrop::UnknownTarget),
            },
            DropTarget::Nowhere => return reject(InvalidDrop::NoTarget),
        };
        if target_stage == current_stage {
            return reject(InvalidDrop::SameStage);
        }

        let Some(prior) = registry.apply_optimistic_move(&lead_id, &target_stage, now) else {
            return reject(InvalidDrop::UnknownLead);
        };
        let Some(moved) = registry.lookup(&lead_id).cloned() else {
            return reject(InvalidDrop::UnknownLead);
        };
        let source_generation =
            shift(columns, registry, &current_stage, &moved, MoveDirection::Leave);
        let target_generation =
            shift(columns, registry, &target_stage, &moved, MoveDirection::Enter);

        let pending = PendingMove {
            lead_id: lead_id.clone(),
            from_stage: current_stage,
            to_stage: target_stage,
            prior_updated_at: prior.updated_at,
            moved_at: now,
            lead: moved,
            source_generation,
            target_generation,
        };
        info!(
            lead_id = %lead_id,
            from = %pending.from_stage,
            to = %pending.to_stage,
            "lead relocated optimistically"
        );
        self.moving.insert(lead_id, pending.clone());
        DropOutcome::Relocated(pending)
    }

    /// Resolve a pending relocation. On failure the optimistic changes are
    /// reversed; columns reloaded since the drop already hold server state
    /// and are left alone.
    pub fn settle(
        &mut self,
        lead_id: &LeadId,
        committed: bool,
        registry: &mut AggregateRegistry,
        columns: &mut ColumnSet,
    ) -> SettleOutcome {
        let Some(pending) = self.moving.remove(lead_id) else {
            return SettleOutcome::Unknown;
        };
        if committed {
            for stage_id in [&pending.from_stage, &pending.to_stage] {
                if let Some(column) = columns.get_mut(stage_id) {
                    column.settle_move(lead_id);
                }
            }
            return SettleOutcome::Committed(pending);
        }

        if registry.lookup(lead_id).map(|l| &l.stage_id) == Some(&pending.to_stage) {
            registry.apply_optimistic_move(lead_id, &pending.from_stage, pending.prior_updated_at);
        }
        let moved = &pending.lead;
        let mut restored = moved.clone();
        restored.stage_id = pending.from_stage.clone();
        restored.updated_at = pending.prior_updated_at;

        if unchanged(columns, &pending.to_stage, pending.target_generation) {
            shift(columns, registry, &pending.to_stage, moved, MoveDirection::Leave);
        }
        if unchanged(columns, &pending.from_stage, pending.source_generation) {
            shift(columns, registry, &pending.from_stage, &restored, MoveDirection::Enter);
        }
        info!(lead_id = %lead_id, stage = %pending.from_stage, "relocation rolled back");
        SettleOutcome::RolledBack(pending)
    }
}

/// Apply a relocation to one column and refile its registry partition.
/// Returns the column's generation, or `None` if the stage has no column.
fn shift(
    columns: &mut ColumnSet,
    registry: &mut AggregateRegistry,
    stage_id: &StageId,
    lead: &Lead,
    direction: MoveDirection,
) -> Option<u64> {
    let column = columns.get_mut(stage_id)?;
    column.reconcile_after_move(lead, direction);
    registry.reconcile_column(column);
    Some(column.generation())
}

fn unchanged(columns: &ColumnSet, stage_id: &StageId, generation: Option<u64>) -> bool {
    generation.is_some() && columns.get(stage_id).map(|c| c.generation()) == generation
}
