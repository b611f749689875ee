//! Application configuration for Strataflow.
//!
//! Config lives in a `strataflow.toml` next to the data, with a fallback at
//! `~/.strataflow/strataflow.toml`. The loaded [`AppConfig`] is constructed
//! once at startup and passed by reference into every component; no
//! component reads the process environment directly.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataflowError};
use crate::types::Layer;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "strataflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".strataflow";

/// Directory under the artifact root holding cross-run state. The leading
/// underscore keeps it out of run-id resolution.
const STATE_DIR_NAME: &str = "_state";

// ---------------------------------------------------------------------------
// Config structs (matching strataflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Filesystem layout.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Ingestion engine settings.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Orchestrator settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Declarative dataset manifest: one entry per logical dataset.
    #[serde(default)]
    pub datasets: Vec<DatasetSpec>,

    /// Declarative mart manifest consumed by the aggregate stage.
    #[serde(default)]
    pub marts: Vec<MartSpec>,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory containing the tabular source files.
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,

    /// Root directory for layered run artifacts.
    #[serde(default = "default_artifact_root")]
    pub artifact_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_root: default_source_root(),
            artifact_root: default_artifact_root(),
        }
    }
}

fn default_source_root() -> PathBuf {
    "sources".into()
}
fn default_artifact_root() -> PathBuf {
    "artifacts".into()
}

/// `[ingest]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Bounded worker pool size for per-file processing.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    4
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Wall-clock budget per stage, in seconds. An expired stage is killed
    /// and marked failed rather than left hanging.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout_secs(),
        }
    }
}

fn default_stage_timeout_secs() -> u64 {
    900
}

/// `[[datasets]]` entry — one logical dataset in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSpec {
    /// Logical dataset name.
    pub name: String,

    /// Include glob over file names in the source root (e.g. `orders*.csv`).
    pub pattern: String,

    /// Optional exclude glob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,

    /// Expected header columns. Mismatches are recorded in run metadata,
    /// not fatal.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_schema: Vec<String>,
}

/// Aggregate operation applied by a mart column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOp::Count => "count",
            AggregateOp::Sum => "sum",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Avg => "avg",
        }
    }
}

/// One aggregate column in a mart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub op: AggregateOp,

    /// Input column. Not required for `count`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,

    /// Output column name. Defaults to `<op>_<column>` (or `count`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl AggregateSpec {
    /// Output column name for this aggregate.
    pub fn output_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.column {
            Some(col) => format!("{}_{col}", self.op.as_str()),
            None => self.op.as_str().to_string(),
        }
    }
}

/// `[[marts]]` entry — one business-ready output table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MartSpec {
    /// Mart (output table) name.
    pub name: String,

    /// Source table name in the standardized layer (file stem).
    pub source: String,

    /// Group-by key columns. Empty means one global row.
    #[serde(default)]
    pub group_by: Vec<String>,

    /// Aggregates to compute per group.
    pub aggregates: Vec<AggregateSpec>,
}

// ---------------------------------------------------------------------------
// Derived paths
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Root directory of a layer (`<artifact_root>/<layer>`).
    pub fn layer_root(&self, layer: Layer) -> PathBuf {
        self.paths.artifact_root.join(layer.dir_name())
    }

    /// Directory holding cross-run state, outside every per-run tree.
    pub fn state_dir(&self) -> PathBuf {
        self.paths.artifact_root.join(STATE_DIR_NAME)
    }

    /// Path of the persisted ingestion state document.
    pub fn ingest_state_path(&self) -> PathBuf {
        self.state_dir().join("ingest_state.json")
    }

    /// Validate manifest invariants before any stage runs.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for dataset in &self.datasets {
            if dataset.name.is_empty() {
                return Err(StrataflowError::config("dataset name must not be empty"));
            }
            if !seen.insert(dataset.name.as_str()) {
                return Err(StrataflowError::config(format!(
                    "duplicate dataset name: {}",
                    dataset.name
                )));
            }
        }
        for mart in &self.marts {
            for agg in &mart.aggregates {
                if agg.column.is_none() && agg.op != AggregateOp::Count {
                    return Err(StrataflowError::config(format!(
                        "mart '{}': {} requires a column",
                        mart.name,
                        agg.op.as_str()
                    )));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the home config directory (`~/.strataflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| StrataflowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Path of the config file: `./strataflow.toml` when present, else the
/// home fallback.
pub fn config_file_path() -> Result<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Ok(local);
    }
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if no config
/// file exists.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| StrataflowError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        StrataflowError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Write a default config file at `./strataflow.toml` and return its path.
pub fn init_config() -> Result<PathBuf> {
    let path = PathBuf::from(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| StrataflowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| StrataflowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
