//! Configuration for leadboard.
//!
//! Read from `.leadboard/leadboard.toml` (or `--config`), falling back to
//! defaults when the file is absent. Layering is file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [board]
//! page_size = 20
//! search_debounce_ms = 300
//! drag_activation_distance = 8.0
//! scroll_threshold = 48.0
//!
//! [identity]
//! employee_id = "emp-17"
//! force_own_scope = false
//!
//! [store]
//! db_path = ".leadboard/leadboard.db"
//! ```
//!
//! Environment overrides: `LEADBOARD_DB`, `LEADBOARD_EMPLOYEE`,
//! `LEADBOARD_FORCE_OWN_SCOPE`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::board::models::EmployeeId;
use crate::identity::StaticIdentity;

pub const CONFIG_DIR: &str = ".leadboard";
pub const CONFIG_FILE: &str = "leadboard.toml";

/// Tunables for the kanban board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSettings {
    /// Leads fetched per column page.
    pub page_size: usize,
    /// Quiet period before typed search text is committed.
    pub search_debounce_ms: u64,
    /// Pointer travel (px) before a press becomes a drag.
    pub drag_activation_distance: f64,
    /// Distance (px) from the bottom of a column that counts as "near bottom".
    pub scroll_threshold: f64,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            page_size: 20,
            search_debounce_ms: 300,
            drag_activation_distance: 8.0,
            scroll_threshold: 48.0,
        }
    }
}

impl BoardSettings {
    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySection {
    pub employee_id: Option<String>,
    /// Pin the board to the employee's own leads.
    pub force_own_scope: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub db_path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(CONFIG_DIR).join("leadboard.db"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadboardConfig {
    pub board: BoardSettings,
    pub identity: IdentitySection,
    pub store: StoreSection,
}

impl LeadboardConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse leadboard.toml")
    }

    /// Load from `<dir>/.leadboard/leadboard.toml`, or defaults if it doesn't exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = Self::default_path(dir);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn default_path(dir: &Path) -> PathBuf {
        dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize leadboard.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(self) -> Self {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    pub fn apply_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(db) = lookup("LEADBOARD_DB") {
            self.store.db_path = PathBuf::from(db);
        }
        if let Some(employee) = lookup("LEADBOARD_EMPLOYEE") {
            self.identity.employee_id = Some(employee).filter(|e| !e.trim().is_empty());
        }
        if let Some(forced) = lookup("LEADBOARD_FORCE_OWN_SCOPE") {
            self.identity.force_own_scope = !matches!(forced.as_str(), "0" | "false" | "");
        }
        self
    }

    /// Sanity warnings for `config validate`.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.board.page_size == 0 {
            warnings.push("board.page_size is 0; pages of 1 will be used".to_string());
        }
        if self.board.page_size > 500 {
            warnings.push(format!(
                "board.page_size {} is large; columns will load slowly",
                self.board.page_size
            ));
        }
        if self.identity.force_own_scope && self.identity.employee_id.is_none() {
            warnings.push(
                "identity.force_own_scope has no effect without identity.employee_id".to_string(),
            );
        }
        warnings
    }

    pub fn identity(&self) -> StaticIdentity {
        StaticIdentity::new(
            self.identity.employee_id.as_deref().map(EmployeeId::from),
            self.identity.force_own_scope,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = LeadboardConfig::default();
        assert_eq!(config.board.page_size, 20);
        assert_eq!(config.board.search_debounce(), Duration::from_millis(300));
        assert_eq!(config.store.db_path, PathBuf::from(".leadboard/leadboard.db"));
    }

    #[test]
    fn test_parse_partial_file() {
        let config = LeadboardConfig::parse(
            r#"
            [board]
            page_size = 50

            [identity]
            employee_id = "emp-3"
            force_own_scope = true
            "#,
        )
        .unwrap();
        assert_eq!(config.board.page_size, 50);
        assert_eq!(config.board.search_debounce_ms, 300);
        assert!(config.identity().force_own_scope);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = LeadboardConfig::parse("[board\npage_size = 1").unwrap_err();
        assert!(err.to_string().contains("Failed to parse leadboard.toml"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = LeadboardConfig::default_path(dir.path());
        let mut config = LeadboardConfig::default();
        config.board.scroll_threshold = 64.0;
        config.save(&path).unwrap();

        let loaded = LeadboardConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_env_overrides() {
        let config = LeadboardConfig::default().apply_env_with(|key| match key {
            "LEADBOARD_DB" => Some("/tmp/crm.db".to_string()),
            "LEADBOARD_EMPLOYEE" => Some("emp-9".to_string()),
            "LEADBOARD_FORCE_OWN_SCOPE" => Some("1".to_string()),
            _ => None,
        });
        assert_eq!(config.store.db_path, PathBuf::from("/tmp/crm.db"));
        assert_eq!(config.identity.employee_id.as_deref(), Some("emp-9"));
        assert!(config.identity.force_own_scope);
    }

    #[test]
    fn test_warnings() {
        let mut config = LeadboardConfig::default();
        assert!(config.warnings().is_empty());
        config.identity.force_own_scope = true;
        config.board.page_size = 0;
        assert_eq!(config.warnings().len(), 2);
    }
}
