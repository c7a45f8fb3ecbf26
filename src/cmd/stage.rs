//! Stage administration: `leadboard stage`.

use anyhow::Result;
use leadboard::board::KanbanBoard;
use leadboard::board::models::{PipelineId, StageId};
use leadboard::store::StageStore;

use super::super::StageCommands;
use super::{Workspace, ensure_pipeline};

pub async fn cmd_stage(ws: &Workspace, command: StageCommands) -> Result<()> {
    let store = ws.open_store()?;
    match command {
        StageCommands::List { pipeline, json } => {
            ensure_pipeline(&store, &pipeline).await?;
            let mut stages = store.list_stages(&PipelineId::from(pipeline)).await?;
            stages.sort_by_key(|s| s.order_index);
            if json {
                println!("{}", serde_json::to_string_pretty(&stages)?);
            } else if stages.is_empty() {
                println!("No stages.");
            } else {
                for s in stages {
                    let color = s.color.as_deref().unwrap_or("-");
                    println!("{:>3}  {}  {} [{}]", s.order_index, s.id, s.name, color);
                }
            }
        }
        StageCommands::Create {
            pipeline,
            name,
            color,
        } => {
            let mut board = opened_board(ws, &store, &pipeline).await?;
            let stage = board.create_stage(&name, color).await?;
            println!("{}", stage.id);
        }
        StageCommands::Rename {
            pipeline,
            stage,
            name,
        } => {
            let mut board = opened_board(ws, &store, &pipeline).await?;
            let stage = board.rename_stage(&StageId::from(stage), &name).await?;
            println!("Renamed stage {} to {}", stage.id, stage.name);
        }
        StageCommands::Recolor {
            pipeline,
            stage,
            color,
        } => {
            let mut board = opened_board(ws, &store, &pipeline).await?;
            let stage = board.recolor_stage(&StageId::from(stage), color).await?;
            match &stage.color {
                Some(color) => println!("Stage {} is now {}", stage.id, color),
                None => println!("Cleared color of stage {}", stage.id),
            }
        }
        StageCommands::Delete { pipeline, stage } => {
            let mut board = opened_board(ws, &store, &pipeline).await?;
            let stage_id = StageId::from(stage);
            board.delete_stage(&stage_id).await?;
            println!("Deleted stage {}", stage_id);
        }
    }
    Ok(())
}

async fn opened_board(
    ws: &Workspace,
    store: &std::sync::Arc<leadboard::store::SqliteStore>,
    pipeline: &str,
) -> Result<KanbanBoard> {
    ensure_pipeline(store, pipeline).await?;
    let mut board = ws.board(store, pipeline);
    board.open().await?;
    board.settle().await;
    Ok(board)
}
