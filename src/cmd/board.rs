//! Board view and relocation: `leadboard board`, `leadboard move`.

use anyhow::{Context, Result, bail};
use console::style;
use leadboard::board::drag::InvalidDrop;
use leadboard::board::models::{Lead, LeadId, OwnershipScope, Stage, StageId};
use leadboard::board::{BoardEvent, DropOutcome, DropTarget, KanbanBoard};
use leadboard::identity::IdentityProvider;
use serde::Serialize;

use super::{Workspace, ensure_pipeline};

pub struct BoardView {
    pub pipeline: String,
    pub search: Option<String>,
    pub mine: bool,
    pub pages: usize,
    pub json: bool,
}

#[derive(Serialize)]
struct ColumnView<'a> {
    stage: &'a Stage,
    total_count: usize,
    has_more: bool,
    error: Option<&'a str>,
    leads: &'a [Lead],
}

pub async fn cmd_board(ws: &Workspace, view: BoardView) -> Result<()> {
    let store = ws.open_store()?;
    ensure_pipeline(&store, &view.pipeline).await?;
    let mut board = ws.board(&store, &view.pipeline);

    if let Some(search) = &view.search {
        board.set_search_input(search.clone());
        board.flush_search();
    }
    if view.mine {
        let Some(employee) = ws.config.identity().acting_employee() else {
            bail!("--mine needs an employee id (identity.employee_id or LEADBOARD_EMPLOYEE)");
        };
        board.set_scope(OwnershipScope::OwnedBy(employee))?;
    }

    board.open().await?;
    board.settle().await;
    for _ in 1..view.pages.max(1) {
        let mut issued = false;
        for stage_id in board.columns().stage_ids() {
            issued |= board.load_more(&stage_id);
        }
        if !issued {
            break;
        }
        board.settle().await;
    }

    if view.json {
        print_json(&board)
    } else {
        print_board(&board);
        Ok(())
    }
}

fn print_json(board: &KanbanBoard) -> Result<()> {
    let columns: Vec<ColumnView<'_>> = board
        .stages()
        .iter()
        .filter_map(|stage| {
            let column = board.column(&stage.id)?;
            Some(ColumnView {
                stage,
                total_count: column.total_count(),
                has_more: column.has_more(),
                error: column.last_error(),
                leads: column.leads(),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&columns)?);
    Ok(())
}

fn print_board(board: &KanbanBoard) {
    if board.stages().is_empty() {
        println!("No stages.");
        return;
    }
    for stage in board.stages() {
        let Some(column) = board.column(&stage.id) else {
            continue;
        };
        println!(
            "{} {}",
            style(&stage.name).bold().cyan(),
            style(format!("({}/{})", column.leads().len(), column.total_count())).dim()
        );
        if let Some(err) = column.last_error() {
            println!("  {} {}", style("!").red().bold(), err);
        }
        if column.leads().is_empty() {
            println!("  {}", style("(empty)").dim());
        }
        for lead in column.leads() {
            println!("  {}  {}  {}", lead.id, lead.name, lead.phone);
        }
        if column.has_more() {
            println!("  {}", style("... more").dim());
        }
        println!();
    }
}

pub async fn cmd_move(ws: &Workspace, pipeline: &str, lead: &str, stage: &str) -> Result<()> {
    let store = ws.open_store()?;
    ensure_pipeline(&store, pipeline).await?;
    let lead_id = LeadId::from(lead);
    let target = StageId::from(stage);

    let id = lead_id.clone();
    let current = store
        .handle()
        .call(move |db| db.get_lead(&id))
        .await?
        .with_context(|| format!("Lead {} not found", lead_id))?;
    if current.pipeline_id.as_str() != pipeline {
        bail!("Lead {} is not in pipeline {}", lead_id, pipeline);
    }

    let mut board = ws.board(&store, pipeline);
    let mut events = board.subscribe();
    board.open().await?;
    board.settle().await;

    // Page through the lead's column until its card is loaded.
    while board.registry().lookup(&lead_id).is_none() {
        if !board.load_more(&current.stage_id) {
            bail!("Lead {} is not visible on this board", lead_id);
        }
        board.settle().await;
    }

    board.keyboard_pick(&lead_id)?;
    match board.release(DropTarget::Stage(target.clone())) {
        DropOutcome::Relocated(_) => {}
        DropOutcome::Rejected { reason, .. } => {
            bail!("Cannot move lead {}: {}", lead_id, describe(reason, &target))
        }
        other => bail!("Cannot move lead {}: {:?}", lead_id, other),
    }
    board.settle().await;

    while let Ok(event) = events.try_recv() {
        match event {
            BoardEvent::LeadRelocated {
                from_stage,
                to_stage,
                ..
            } => {
                println!("Moved lead {} from {} to {}", lead_id, from_stage, to_stage);
                return Ok(());
            }
            BoardEvent::RelocationReverted { reason, .. } => {
                bail!("Move of lead {} was reverted: {}", lead_id, reason);
            }
            _ => {}
        }
    }
    bail!("Move of lead {} did not settle", lead_id)
}

fn describe(reason: InvalidDrop, target: &StageId) -> String {
    match reason {
        InvalidDrop::SameStage => format!("it is already in stage {}", target),
        InvalidDrop::UnknownTarget => format!("stage {} is not on this board", target),
        InvalidDrop::LeadBusy => "it is still being moved".to_string(),
        InvalidDrop::UnknownLead => "it is not loaded on the board".to_string(),
        InvalidDrop::NoTarget => "no drop target".to_string(),
    }
}
