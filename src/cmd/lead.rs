//! Lead commands: `leadboard lead`.

use anyhow::{Context, Result, bail};
use leadboard::board::models::{EmployeeId, LeadStatus, NewLead, PipelineId, StageId};

use super::super::LeadCommands;
use super::Workspace;

pub async fn cmd_lead(ws: &Workspace, command: LeadCommands) -> Result<()> {
    let store = ws.open_store()?;
    match command {
        LeadCommands::Add {
            pipeline,
            stage,
            name,
            phone,
            alt_phone,
            location,
            age,
            status,
            owner,
        } => {
            if name.trim().is_empty() {
                bail!("Lead name must not be blank");
            }
            let status = status
                .map(|s| s.parse::<LeadStatus>())
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let new_lead = NewLead {
                name: name.trim().to_string(),
                phone,
                alt_phone,
                location,
                age,
                status,
                stage_id: StageId::from(stage),
                pipeline_id: PipelineId::from(pipeline),
                owner_id: owner.map(EmployeeId::from),
            };
            let lead = store
                .handle()
                .call(move |db| {
                    let stage = db
                        .get_stage(&new_lead.stage_id)?
                        .with_context(|| format!("Stage {} not found", new_lead.stage_id))?;
                    if stage.pipeline_id != new_lead.pipeline_id {
                        bail!(
                            "Stage {} does not belong to pipeline {}",
                            stage.id,
                            new_lead.pipeline_id
                        );
                    }
                    db.create_lead(&new_lead)
                })
                .await?;
            tracing::info!(lead_id = %lead.id, stage_id = %lead.stage_id, "lead created");
            println!("{}", lead.id);
        }
    }
    Ok(())
}
