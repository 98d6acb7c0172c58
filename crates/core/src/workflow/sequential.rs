use super::step_executor::StageInvoker;
use crate::config::RunnerConfig;
use crate::registry::StageRegistry;
use crate::sanitize::Sanitizer;
use crate::types::{StageContext, StageResult, StageStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Options for a sequential run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequentialOptions {
    /// Once a stage fails, record every later stage as skipped
    #[serde(default = "default_stop_on_failure")]
    pub stop_on_failure: bool,
}

fn default_stop_on_failure() -> bool {
    true
}

impl Default for SequentialOptions {
    fn default() -> Self {
        Self {
            stop_on_failure: default_stop_on_failure(),
        }
    }
}

/// Aggregated outcome of a sequential run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequentialReport {
    pub completed: Vec<u32>,
    pub failed: Vec<u32>,
    pub skipped: Vec<u32>,
    pub results: BTreeMap<u32, StageResult>,
    /// True only when every requested stage completed
    pub success: bool,
}

/// Runs a flat, ordered list of stage ids: no graph, no conditions, no gates
pub struct SequentialRunner {
    registry: Arc<StageRegistry>,
    invoker: StageInvoker,
}

impl SequentialRunner {
    pub fn new(registry: Arc<StageRegistry>, sanitizer: Arc<Sanitizer>, config: &RunnerConfig) -> Self {
        Self {
            registry,
            invoker: StageInvoker::new(sanitizer, config.stage_timeout()),
        }
    }

    pub async fn run_stages(
        &self,
        stage_ids: &[u32],
        context: &StageContext,
        options: SequentialOptions,
    ) -> SequentialReport {
        tracing::info!(
            job_id = %context.job_id,
            stages = stage_ids.len(),
            stop_on_failure = options.stop_on_failure,
            "Starting sequential run"
        );

        let mut report = SequentialReport {
            completed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            results: BTreeMap::new(),
            success: false,
        };
        let mut seen = HashSet::new();
        let mut halted = false;

        for &stage_id in stage_ids {
            if !seen.insert(stage_id) {
                tracing::warn!(stage_id, "Stage requested more than once, ignoring repeat");
                continue;
            }

            let result = if halted {
                StageResult::skipped(
                    Some(stage_id),
                    format!("stage_{}", stage_id),
                    "Skipped after an earlier stage failed",
                )
            } else {
                match self.registry.lookup(stage_id) {
                    None => {
                        tracing::warn!(stage_id, "Stage not registered, skipping");
                        StageResult::skipped(
                            Some(stage_id),
                            format!("stage_{}", stage_id),
                            "Stage not registered",
                        )
                        .with_warning(format!("Stage {} is not registered", stage_id))
                    }
                    Some(stage) => {
                        let mut ctx = context.clone();
                        for (id, previous) in &report.results {
                            if previous.status != StageStatus::Skipped {
                                ctx.previous_results.insert(*id, previous.clone());
                            }
                        }
                        self.invoker.invoke(stage, ctx).await
                    }
                }
            };

            match result.status {
                StageStatus::Completed => report.completed.push(stage_id),
                StageStatus::Failed => {
                    report.failed.push(stage_id);
                    if options.stop_on_failure && !halted {
                        tracing::warn!(stage_id, "Stage failed, skipping remaining stages");
                        halted = true;
                    }
                }
                StageStatus::Skipped => report.skipped.push(stage_id),
            }
            report.results.insert(stage_id, result);
        }

        report.success = report.failed.is_empty() && report.skipped.is_empty();
        tracing::info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            success = report.success,
            "Sequential run finished"
        );
        report
    }
}
