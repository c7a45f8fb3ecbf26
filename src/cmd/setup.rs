//! Workspace initialization: `leadboard init`.

use std::path::Path;

use anyhow::{Context, Result};
use leadboard::config::{CONFIG_DIR, LeadboardConfig};
use leadboard::store::LeadDb;

use super::super::Cli;
use super::{Workspace, config_path};

pub fn cmd_init(project_dir: &Path, cli: &Cli) -> Result<()> {
    let dir = project_dir.join(CONFIG_DIR);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let path = config_path(project_dir, cli);
    if path.exists() {
        println!("Config already exists at {}", path.display());
    } else {
        LeadboardConfig::default().save(&path)?;
        println!("Wrote {}", path.display());
    }

    let ws = Workspace::resolve(project_dir, cli)?;
    if let Some(parent) = ws.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    LeadDb::new(&ws.db_path)?;
    println!("Initialized leadboard database at {}", ws.db_path.display());
    Ok(())
}
