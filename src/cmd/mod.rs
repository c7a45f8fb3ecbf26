//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled            |
//! |------------|-----------------------------|
//! | `setup`    | `Init`                      |
//! | `pipeline` | `Pipeline`                  |
//! | `stage`    | `Stage`                     |
//! | `lead`     | `Lead`                      |
//! | `board`    | `Board`, `Move`             |
//! | `config`   | `Config`                    |

pub mod board;
pub mod config;
pub mod lead;
pub mod pipeline;
pub mod setup;
pub mod stage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use leadboard::board::KanbanBoard;
use leadboard::board::models::PipelineId;
use leadboard::config::LeadboardConfig;
use leadboard::store::SqliteStore;

use super::Cli;

pub use board::{BoardView, cmd_board, cmd_move};
pub use config::cmd_config;
pub use lead::cmd_lead;
pub use pipeline::cmd_pipeline;
pub use setup::cmd_init;
pub use stage::cmd_stage;

/// Resolved configuration and database location for one invocation.
pub struct Workspace {
    pub config: LeadboardConfig,
    pub db_path: PathBuf,
}

impl Workspace {
    /// Layer config file → environment → CLI flags.
    pub fn resolve(project_dir: &Path, cli: &Cli) -> Result<Self> {
        let config = load_config(project_dir, cli)?.apply_env();
        let db_path = cli
            .db
            .clone()
            .unwrap_or_else(|| config.store.db_path.clone());
        let db_path = if db_path.is_absolute() {
            db_path
        } else {
            project_dir.join(db_path)
        };
        Ok(Self { config, db_path })
    }

    pub fn open_store(&self) -> Result<Arc<SqliteStore>> {
        if !self.db_path.exists() {
            bail!(
                "No database at {}. Run 'leadboard init' first.",
                self.db_path.display()
            );
        }
        Ok(Arc::new(SqliteStore::open(&self.db_path)?))
    }

    /// Board for `pipeline` over `store`, using the configured identity.
    pub fn board(&self, store: &Arc<SqliteStore>, pipeline: &str) -> KanbanBoard {
        KanbanBoard::new(
            PipelineId::from(pipeline),
            self.config.board.clone(),
            store.clone(),
            store.clone(),
            &self.config.identity(),
        )
    }
}

pub fn config_path(project_dir: &Path, cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .unwrap_or_else(|| LeadboardConfig::default_path(project_dir))
}

fn load_config(project_dir: &Path, cli: &Cli) -> Result<LeadboardConfig> {
    match &cli.config {
        Some(path) => LeadboardConfig::load(path),
        None => LeadboardConfig::load_or_default(project_dir),
    }
}

/// Fail unless `pipeline` exists.
pub async fn ensure_pipeline(store: &SqliteStore, pipeline: &str) -> Result<()> {
    let pipelines = store.handle().call(|db| db.list_pipelines()).await?;
    if !pipelines.iter().any(|p| p.id.as_str() == pipeline) {
        bail!("Pipeline {} not found", pipeline);
    }
    Ok(())
}
