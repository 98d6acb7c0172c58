use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use stagegraph_core::{
    CompilerConfig, GovernanceMode, JsonMap, RunnerConfig, SanitizerConfig, StageContext,
};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub compiler: CompilerConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub sanitizer: SanitizerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub job: JobConfig,

    /// Stages to register at startup
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` wins when set
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "stagegraph=info,stagegraph_core=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_artifact_root")]
    pub artifact_root: String,

    #[serde(default = "default_log_root")]
    pub log_root: String,

    #[serde(default)]
    pub dataset: Option<String>,

    #[serde(default)]
    pub governance_mode: GovernanceMode,

    /// Job-level stage config; step config overrides it per key
    #[serde(default)]
    pub config: JsonMap,
}

fn default_artifact_root() -> String {
    "artifacts".to_string()
}

fn default_log_root() -> String {
    "logs".to_string()
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            artifact_root: default_artifact_root(),
            log_root: default_log_root(),
            dataset: None,
            governance_mode: GovernanceMode::default(),
            config: JsonMap::new(),
        }
    }
}

/// A stage registered from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub id: u32,
    pub name: String,

    /// Make the stage fail with this message, for rehearsing failure paths
    #[serde(default)]
    pub fail_with: Option<String>,
}

impl AppConfig {
    /// Load the config file if it exists, otherwise use defaults
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::info!("Configuration file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read configuration file {}", config_path.display()))?;
        toml::from_str(&content).context("Failed to parse configuration file")
    }

    /// Build the context handed to every stage of one job
    pub fn stage_context(&self, job_id: &str, governance_mode: Option<GovernanceMode>) -> StageContext {
        let mode = governance_mode.unwrap_or(self.job.governance_mode);
        let mut context = StageContext::new(job_id, mode);
        context.artifact_path = format!("{}/{}", self.job.artifact_root, job_id);
        context.log_path = format!("{}/{}", self.job.log_root, job_id);
        context.dataset_pointer = self.job.dataset.clone();
        context.config = self.job.config.clone();
        context
    }
}
