use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "leadboard")]
#[command(version, about = "Lead pipeline kanban board")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to leadboard.toml (defaults to .leadboard/leadboard.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database path. Overrides leadboard.toml and LEADBOARD_DB.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .leadboard directory, default config and database
    Init,
    /// Manage pipelines
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Manage the stages (columns) of a pipeline
    Stage {
        #[command(subcommand)]
        command: StageCommands,
    },
    /// Manage leads
    Lead {
        #[command(subcommand)]
        command: LeadCommands,
    },
    /// Print a pipeline's board
    Board {
        #[arg(short, long)]
        pipeline: String,

        /// Filter leads by name, phone or location
        #[arg(short, long)]
        search: Option<String>,

        /// Only leads owned by the acting employee
        #[arg(long)]
        mine: bool,

        /// Pages to load per column
        #[arg(long, default_value = "1")]
        pages: usize,

        #[arg(long)]
        json: bool,
    },
    /// Move a lead to another stage of its pipeline
    Move {
        lead: String,
        stage: String,

        #[arg(short, long)]
        pipeline: String,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum PipelineCommands {
    Create {
        name: String,
        #[arg(long, default_value = "main")]
        branch: String,
    },
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum StageCommands {
    List {
        #[arg(short, long)]
        pipeline: String,
        #[arg(long)]
        json: bool,
    },
    /// Append a stage after the existing ones
    Create {
        #[arg(short, long)]
        pipeline: String,
        name: String,
        #[arg(long)]
        color: Option<String>,
    },
    Rename {
        #[arg(short, long)]
        pipeline: String,
        stage: String,
        name: String,
    },
    /// Set or clear (no --color) a stage's color
    Recolor {
        #[arg(short, long)]
        pipeline: String,
        stage: String,
        #[arg(long)]
        color: Option<String>,
    },
    /// Delete a stage that has no leads
    Delete {
        #[arg(short, long)]
        pipeline: String,
        stage: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum LeadCommands {
    Add {
        #[arg(short, long)]
        pipeline: String,
        #[arg(long)]
        stage: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        alt_phone: Option<String>,
        #[arg(long, default_value = "")]
        location: String,
        #[arg(long)]
        age: Option<u32>,
        /// new, contacted, qualified, lost or other
        #[arg(long)]
        status: Option<String>,
        /// Owning employee id
        #[arg(long)]
        owner: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default leadboard.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    leadboard::logging::init(cli.verbose, cli.json_logs);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir, &cli)?,
        Commands::Pipeline { command } => {
            let ws = cmd::Workspace::resolve(&project_dir, &cli)?;
            cmd::cmd_pipeline(&ws, command.clone()).await?;
        }
        Commands::Stage { command } => {
            let ws = cmd::Workspace::resolve(&project_dir, &cli)?;
            cmd::cmd_stage(&ws, command.clone()).await?;
        }
        Commands::Lead { command } => {
            let ws = cmd::Workspace::resolve(&project_dir, &cli)?;
            cmd::cmd_lead(&ws, command.clone()).await?;
        }
        Commands::Board {
            pipeline,
            search,
            mine,
            pages,
            json,
        } => {
            let ws = cmd::Workspace::resolve(&project_dir, &cli)?;
            cmd::cmd_board(
                &ws,
                cmd::BoardView {
                    pipeline: pipeline.clone(),
                    search: search.clone(),
                    mine: *mine,
                    pages: *pages,
                    json: *json,
                },
            )
            .await?;
        }
        Commands::Move {
            lead,
            stage,
            pipeline,
        } => {
            let ws = cmd::Workspace::resolve(&project_dir, &cli)?;
            cmd::cmd_move(&ws, pipeline, lead, stage).await?;
        }
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, &cli, command.clone())?;
        }
    }

    Ok(())
}
