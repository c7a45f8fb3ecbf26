use serde::Serialize;
use tokio::sync::broadcast;

use super::models::{LeadId, StageId};

/// Events the board emits to its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum BoardEvent {
    /// A card was clicked; opens the lead editor.
    LeadSelected { lead_id: LeadId },
    /// A relocation was committed by the store.
    LeadRelocated {
        lead_id: LeadId,
        from_stage: StageId,
        to_stage: StageId,
    },
    /// A relocation commit failed and the lead was put back.
    RelocationReverted {
        lead_id: LeadId,
        stage_id: StageId,
        reason: String,
    },
    /// Transient user-facing message.
    Notice { level: NoticeLevel, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Send to every subscriber. Having no subscribers is not an error.
pub fn broadcast_event(tx: &broadcast::Sender<BoardEvent>, event: BoardEvent) {
    let _ = tx.send(event);
}
