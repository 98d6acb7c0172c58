// Stages declared in the config file

use crate::config::StageConfig;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use stagegraph_core::{CompilerConfig, Stage, StageContext, StageRegistry, StageResult};
use std::sync::Arc;

/// Stage that records what it was given and succeeds, or fails on request.
///
/// Stands in for real business logic when rehearsing a workflow from the
/// command line.
pub struct ConfiguredStage {
    id: u32,
    name: String,
    fail_with: Option<String>,
}

impl ConfiguredStage {
    pub fn new(config: &StageConfig) -> Self {
        Self {
            id: config.id,
            name: config.name.clone(),
            fail_with: config.fail_with.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Stage for ConfiguredStage {
    fn stage_id(&self) -> u32 {
        self.id
    }

    fn stage_name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &StageContext) -> Result<StageResult> {
        let started_at = Utc::now();
        tracing::info!(stage_id = self.id, stage = %self.name, job_id = %context.job_id, "Executing stage");

        if let Some(message) = &self.fail_with {
            bail!("{}", message);
        }

        let mut upstream: Vec<u32> = context.previous_results.keys().copied().collect();
        upstream.sort_unstable();

        Ok(StageResult::completed(self.id, &self.name)
            .with_output("artifact_path", serde_json::json!(context.artifact_path))
            .with_output("upstream_stages", serde_json::json!(upstream))
            .with_output("config_keys", serde_json::json!(context.config.keys().collect::<Vec<_>>()))
            .timed(started_at, Utc::now()))
    }
}

/// Build the registry from the configured stage list
pub fn build_registry(stages: &[StageConfig], compiler: &CompilerConfig) -> Result<StageRegistry> {
    let mut registry = StageRegistry::with_range(compiler);
    for stage in stages {
        registry
            .register(Arc::new(ConfiguredStage::new(stage)))
            .with_context(|| format!("Failed to register stage '{}'", stage.name))?;
    }
    tracing::debug!(stages = registry.len(), "Stage registry built");
    Ok(registry)
}
