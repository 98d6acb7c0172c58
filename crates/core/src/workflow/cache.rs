use super::compiler::{fingerprint, WorkflowCompiler};
use super::plan::CompiledWorkflow;
use crate::definition::WorkflowDefinition;
use crate::error::CompileError;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

type CacheKey = (String, String);

/// Compiled plans keyed by (workflow id, version).
///
/// A lookup whose definition fingerprint no longer matches the cached plan
/// recompiles and replaces the entry.
pub struct CompiledWorkflowCache {
    compiler: WorkflowCompiler,
    entries: RwLock<HashMap<CacheKey, Arc<CompiledWorkflow>>>,
}

impl CompiledWorkflowCache {
    pub fn new(compiler: WorkflowCompiler) -> Self {
        Self {
            compiler,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached plan for this version, compiling it on first use
    pub fn get_or_compile(
        &self,
        definition: &WorkflowDefinition,
        workflow_id: &str,
        version: &str,
    ) -> Result<Arc<CompiledWorkflow>, CompileError> {
        let key = (workflow_id.to_string(), version.to_string());

        if let Some(cached) = self.get(workflow_id, version) {
            if cached.fingerprint == fingerprint(definition)? {
                return Ok(cached);
            }
            tracing::warn!(
                workflow_id,
                version,
                "Definition changed without a version bump, replacing cached plan"
            );
        }

        let plan = Arc::new(self.compiler.compile(definition, workflow_id, version)?);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, plan.clone());
        Ok(plan)
    }

    pub fn get(&self, workflow_id: &str, version: &str) -> Option<Arc<CompiledWorkflow>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(workflow_id.to_string(), version.to_string()))
            .cloned()
    }

    /// Drop one cached plan. Returns whether it was present.
    pub fn invalidate(&self, workflow_id: &str, version: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(workflow_id.to_string(), version.to_string()))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
