use crate::aggregate_query::AggregateSpec;
use crate::error::{ReconError, Result};
use crate::reconcile::{Diagnostics, ReconcileOptions};
use crate::report::ReportType;
use crate::result::DEFAULT_SAMPLE_ROWS;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const LOCAL_CONFIG_FILE: &str = "tabrecon.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ReconConfig {
    #[serde(default)]
    pub reconcile: ReconcileSection,
    #[serde(default)]
    pub duckdb: DuckDbSection,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconcileSection {
    /// Rows kept in each missing-row sample
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,

    /// Where joined relations are persisted; in memory when unset
    #[serde(default)]
    pub intermediate_dir: Option<PathBuf>,

    /// Attribute keyed mismatches to individual columns
    #[serde(default)]
    pub column_diagnostics: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DuckDbSection {
    /// e.g. "4GB"
    #[serde(default)]
    pub memory_limit: Option<String>,
}

/// One source/target pair to reconcile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableConfig {
    pub name: String,
    pub source: PathBuf,
    pub target: PathBuf,

    #[serde(default)]
    pub join_columns: Vec<String>,

    #[serde(default)]
    pub report_type: ReportType,

    /// SQL predicate applied to both sides before aggregating
    #[serde(default)]
    pub filter: Option<String>,

    /// When present the table is reconciled at aggregate level
    #[serde(default)]
    pub aggregates: Vec<AggregateSpec>,
}

impl TableConfig {
    pub fn is_aggregate(&self) -> bool {
        !self.aggregates.is_empty()
    }
}

fn default_sample_rows() -> usize {
    DEFAULT_SAMPLE_ROWS
}

impl Default for ReconcileSection {
    fn default() -> Self {
        Self {
            sample_rows: DEFAULT_SAMPLE_ROWS,
            intermediate_dir: None,
            column_diagnostics: false,
        }
    }
}

impl ReconcileSection {
    pub fn options(&self) -> ReconcileOptions {
        let diagnostics = if self.column_diagnostics {
            Diagnostics::ColumnLevel
        } else {
            Diagnostics::FingerprintOnly
        };
        ReconcileOptions::default()
            .with_sample_rows(self.sample_rows)
            .with_diagnostics(diagnostics)
    }
}

/// Where the active configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit(PathBuf),
    Environment(PathBuf),
    CurrentDirectory(PathBuf),
    Global(PathBuf),
    Default,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Explicit(p)
            | ConfigSource::Environment(p)
            | ConfigSource::CurrentDirectory(p)
            | ConfigSource::Global(p) => Some(p),
            ConfigSource::Default => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ConfigSource::Explicit(p) => format!("--config {}", p.display()),
            ConfigSource::Environment(p) => format!("TABRECON_CONFIG {}", p.display()),
            ConfigSource::CurrentDirectory(p) => format!("current directory {}", p.display()),
            ConfigSource::Global(p) => format!("global {}", p.display()),
            ConfigSource::Default => "built-in defaults".to_string(),
        }
    }
}

impl ReconConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ReconConfig = toml::from_str(content)
            .map_err(|e| ReconError::config(format!("Failed to parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ReconError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }

    fn validate(&self) -> Result<()> {
        if self.reconcile.sample_rows == 0 {
            return Err(ReconError::config("reconcile.sample_rows must be at least 1"));
        }
        for table in &self.tables {
            if !table.is_aggregate() && table.report_type.compares_data() && table.join_columns.is_empty() {
                return Err(ReconError::config(format!(
                    "Table '{}' compares row data but has no join_columns",
                    table.name
                )));
            }
            for spec in &table.aggregates {
                spec.validate()
                    .map_err(|e| ReconError::config(format!("Table '{}': {e}", table.name)))?;
            }
        }
        Ok(())
    }

    /// Apply `TABRECON_SAMPLE_ROWS` and `TABRECON_INTERMEDIATE_DIR`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(rows) = env::var("TABRECON_SAMPLE_ROWS") {
            self.reconcile.sample_rows = rows.trim().parse().map_err(|_| {
                ReconError::config(format!("TABRECON_SAMPLE_ROWS must be a positive integer, got '{rows}'"))
            })?;
        }
        if let Ok(dir) = env::var("TABRECON_INTERMEDIATE_DIR") {
            self.reconcile.intermediate_dir = Some(PathBuf::from(dir));
        }
        self.validate()
    }
}

/// Find the configuration file to use
///
/// Priority (highest first): the explicit path, `TABRECON_CONFIG`, `./tabrecon.toml`,
/// `~/.tabrecon/global.toml`.
pub fn resolve_config_source(explicit: Option<&Path>) -> Result<ConfigSource> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ReconError::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(ConfigSource::Explicit(path.to_path_buf()));
    }

    if let Ok(env_path) = env::var("TABRECON_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(ConfigSource::Environment(path));
        }
        log::warn!("TABRECON_CONFIG points to missing file {}", path.display());
    }

    let local = env::current_dir()?.join(LOCAL_CONFIG_FILE);
    if local.exists() {
        return Ok(ConfigSource::CurrentDirectory(local));
    }

    if let Some(home_dir) = dirs::home_dir() {
        let global = home_dir.join(".tabrecon").join("global.toml");
        if global.exists() {
            return Ok(ConfigSource::Global(global));
        }
    }

    Ok(ConfigSource::Default)
}

/// Resolve, load and apply environment overrides
pub fn get_config(explicit: Option<&Path>) -> Result<(ReconConfig, ConfigSource)> {
    let source = resolve_config_source(explicit)?;
    let mut config = match source.path() {
        Some(path) => ReconConfig::load(path)?,
        None => ReconConfig::default(),
    };
    config.apply_env_overrides()?;
    log::debug!("Using configuration from {}", source.describe());
    Ok((config, source))
}
