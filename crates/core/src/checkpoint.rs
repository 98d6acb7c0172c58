// Checkpoint seam between the DAG runner and whatever persists run state

use crate::types::RunState;
use anyhow::Result;

/// Receives the full run state after every step.
///
/// A failing `save` is logged by the runner and never aborts the run.
#[async_trait::async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn save(&self, state: &RunState) -> Result<()>;
}
