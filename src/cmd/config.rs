//! Configuration view and validation commands: `leadboard config`.

use std::path::Path;

use anyhow::Result;
use leadboard::config::LeadboardConfig;

use super::super::{Cli, ConfigCommands};
use super::{Workspace, config_path};

pub fn cmd_config(project_dir: &Path, cli: &Cli, command: Option<ConfigCommands>) -> Result<()> {
    let path = config_path(project_dir, cli);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Leadboard Configuration");
            println!("=======================");
            println!();
            if path.exists() {
                println!("Config file: {}", path.display());
            } else {
                println!("No leadboard.toml found at {}; using defaults.", path.display());
            }
            println!();

            let ws = Workspace::resolve(project_dir, cli)?;
            let config = &ws.config;
            println!("[board]");
            println!("  page_size = {}", config.board.page_size);
            println!("  search_debounce_ms = {}", config.board.search_debounce_ms);
            println!(
                "  drag_activation_distance = {}",
                config.board.drag_activation_distance
            );
            println!("  scroll_threshold = {}", config.board.scroll_threshold);
            println!();
            println!("[identity]");
            match &config.identity.employee_id {
                Some(employee) => println!("  employee_id = \"{}\"", employee),
                None => println!("  employee_id = (unset)"),
            }
            println!("  force_own_scope = {}", config.identity.force_own_scope);
            println!();
            println!("Effective values (with env/CLI overrides):");
            println!("  db_path = \"{}\"", ws.db_path.display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !path.exists() {
                println!("No leadboard.toml found. Using defaults (valid).");
                return Ok(());
            }

            let config = LeadboardConfig::load(&path)?;
            let warnings = config.warnings();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if path.exists() {
                println!("leadboard.toml already exists at {}", path.display());
                return Ok(());
            }
            LeadboardConfig::default().save(&path)?;
            println!("Created {}", path.display());
        }
    }

    Ok(())
}
