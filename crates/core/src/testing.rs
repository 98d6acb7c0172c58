// Fake stages and checkpoint sinks shared by unit tests

use crate::checkpoint::CheckpointSink;
use crate::registry::Stage;
use crate::types::{RunState, StageContext, StageResult};
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Behavior {
    Succeed,
    Fail(String),
    ReportFailure(String),
    Panic,
    Sleep(Duration),
}

/// Stage with a fixed behavior that counts its invocations
pub struct StaticStage {
    id: u32,
    name: String,
    behavior: Behavior,
    calls: AtomicUsize,
    last_context: Mutex<Option<StageContext>>,
}

impl StaticStage {
    fn build(id: u32, name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.to_string(),
            behavior,
            calls: AtomicUsize::new(0),
            last_context: Mutex::new(None),
        })
    }

    pub fn ok(id: u32, name: &str) -> Arc<Self> {
        Self::build(id, name, Behavior::Succeed)
    }

    /// Returns `Err` from `execute`
    pub fn failing(id: u32, name: &str, error: &str) -> Arc<Self> {
        Self::build(id, name, Behavior::Fail(error.to_string()))
    }

    /// Returns `Ok` with a failed result
    pub fn reporting_failure(id: u32, name: &str, error: &str) -> Arc<Self> {
        Self::build(id, name, Behavior::ReportFailure(error.to_string()))
    }

    pub fn panicking(id: u32, name: &str) -> Arc<Self> {
        Self::build(id, name, Behavior::Panic)
    }

    pub fn slow(id: u32, name: &str, delay: Duration) -> Arc<Self> {
        Self::build(id, name, Behavior::Sleep(delay))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_context(&self) -> Option<StageContext> {
        self.last_context.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Stage for StaticStage {
    fn stage_id(&self) -> u32 {
        self.id
    }

    fn stage_name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &StageContext) -> Result<StageResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock().unwrap() = Some(context.clone());

        match &self.behavior {
            Behavior::Succeed => Ok(StageResult::completed(self.id, &self.name)
                .with_output("job_id", context.job_id.clone().into())),
            Behavior::Fail(error) => Err(anyhow!("{}", error)),
            Behavior::ReportFailure(error) => {
                Ok(StageResult::failed(self.id, &self.name, error.clone()))
            }
            Behavior::Panic => panic!("stage {} exploded", self.id),
            Behavior::Sleep(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(StageResult::completed(self.id, &self.name))
            }
        }
    }
}

/// Checkpoint sink that keeps every saved state
#[derive(Default)]
pub struct RecordingSink {
    pub states: Mutex<Vec<RunState>>,
}

impl RecordingSink {
    pub fn saved(&self) -> Vec<RunState> {
        self.states.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CheckpointSink for RecordingSink {
    async fn save(&self, state: &RunState) -> Result<()> {
        self.states.lock().unwrap().push(state.clone());
        Ok(())
    }
}

/// Checkpoint sink that always fails
pub struct BrokenSink;

#[async_trait::async_trait]
impl CheckpointSink for BrokenSink {
    async fn save(&self, _state: &RunState) -> Result<()> {
        Err(anyhow!("disk full"))
    }
}
