//! Pipeline commands: `leadboard pipeline`.

use anyhow::Result;

use super::super::PipelineCommands;
use super::Workspace;

pub async fn cmd_pipeline(ws: &Workspace, command: PipelineCommands) -> Result<()> {
    let store = ws.open_store()?;
    match command {
        PipelineCommands::Create { name, branch } => {
            let name = name.trim().to_string();
            if name.is_empty() {
                anyhow::bail!("Pipeline name must not be blank");
            }
            let pipeline = store
                .handle()
                .call(move |db| db.create_pipeline(&name, &branch))
                .await?;
            tracing::info!(pipeline_id = %pipeline.id, "pipeline created");
            println!("{}", pipeline.id);
        }
        PipelineCommands::List { json } => {
            let pipelines = store.handle().call(|db| db.list_pipelines()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&pipelines)?);
            } else if pipelines.is_empty() {
                println!("No pipelines.");
            } else {
                for p in pipelines {
                    println!("{}  {} ({})", p.id, p.name, p.branch);
                }
            }
        }
    }
    Ok(())
}
