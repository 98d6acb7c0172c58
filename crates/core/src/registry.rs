// Stage registry: stable integer ids mapped to stage implementations

use crate::config::CompilerConfig;
use crate::error::RegistryError;
use crate::types::{StageContext, StageResult};
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A unit of business logic the runners can invoke
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    /// Stable id referenced by workflow definitions
    fn stage_id(&self) -> u32;

    /// Human-readable name
    fn stage_name(&self) -> &str;

    /// Run the stage. An `Err` is converted to a failed `StageResult` by the runner.
    async fn execute(&self, context: &StageContext) -> Result<StageResult>;
}

/// Diagnostic view of one registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRegistration {
    pub stage_id: u32,
    pub stage_name: String,
}

/// Registry of stage implementations.
///
/// Built once at startup through explicit `register` calls, then shared
/// read-only (behind an `Arc`) by the compiler callers and runners.
pub struct StageRegistry {
    stages: BTreeMap<u32, Arc<dyn Stage>>,
    min_stage_id: u32,
    max_stage_id: u32,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::with_range(&CompilerConfig::default())
    }

    /// Registry accepting the same stage id range as the compiler
    pub fn with_range(config: &CompilerConfig) -> Self {
        Self {
            stages: BTreeMap::new(),
            min_stage_id: config.min_stage_id,
            max_stage_id: config.max_stage_id,
        }
    }

    /// Register a stage.
    ///
    /// Re-registering the same implementation is a no-op; binding a
    /// different implementation to a taken id fails.
    pub fn register(&mut self, stage: Arc<dyn Stage>) -> Result<(), RegistryError> {
        let stage_id = stage.stage_id();
        if stage_id < self.min_stage_id || stage_id > self.max_stage_id {
            return Err(RegistryError::InvalidStageId {
                stage_id,
                stage_name: stage.stage_name().to_string(),
                min: self.min_stage_id,
                max: self.max_stage_id,
            });
        }

        if let Some(existing) = self.stages.get(&stage_id) {
            if std::ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(&stage)) {
                return Ok(());
            }
            return Err(RegistryError::Duplicate {
                stage_id,
                existing: existing.stage_name().to_string(),
                incoming: stage.stage_name().to_string(),
            });
        }

        tracing::debug!(stage_id, stage_name = %stage.stage_name(), "Registered stage");
        self.stages.insert(stage_id, stage);
        Ok(())
    }

    /// Get a stage by id; `None` lets callers treat unimplemented stages gracefully
    pub fn lookup(&self, stage_id: u32) -> Option<Arc<dyn Stage>> {
        self.stages.get(&stage_id).cloned()
    }

    pub fn contains(&self, stage_id: u32) -> bool {
        self.stages.contains_key(&stage_id)
    }

    /// All registrations sorted by stage id
    pub fn list(&self) -> Vec<StageRegistration> {
        self.stages
            .values()
            .map(|s| StageRegistration {
                stage_id: s.stage_id(),
                stage_name: s.stage_name().to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Remove every registration. Test use only; compiled workflows hold
    /// plain stage ids and are unaffected.
    pub fn clear(&mut self) {
        self.stages.clear();
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
