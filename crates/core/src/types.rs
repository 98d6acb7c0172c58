use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Free-form JSON object used for configs, outputs and metadata
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a node in a workflow definition
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Operating mode that changes how gates and stages behave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceMode {
    /// Sandbox/demo: synthetic data, gates auto-pass after a short delay
    #[default]
    #[serde(alias = "sandbox", alias = "DEMO")]
    Demo,
    /// Pre-production standby: gates auto-pass immediately
    #[serde(alias = "STANDBY")]
    Standby,
    /// Production: gates auto-pass with a pending-integration warning
    #[serde(alias = "production", alias = "LIVE")]
    Live,
}

impl std::fmt::Display for GovernanceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "demo"),
            Self::Standby => write!(f, "standby"),
            Self::Live => write!(f, "live"),
        }
    }
}

impl std::str::FromStr for GovernanceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "demo" | "sandbox" => Ok(Self::Demo),
            "standby" => Ok(Self::Standby),
            "live" | "production" => Ok(Self::Live),
            other => Err(format!("unknown governance mode: {}", other)),
        }
    }
}

/// Outcome of a single stage or structural node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    Skipped,
}

/// Status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Reserved for gates that suspend pending external approval; no code path sets it yet.
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Result of executing a stage (or passing through a structural node)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// `None` for gates and structural nodes
    pub stage_id: Option<u32>,
    pub stage_name: String,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub output: JsonMap,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub metadata: JsonMap,
}

impl StageResult {
    fn with_status(stage_id: Option<u32>, stage_name: impl Into<String>, status: StageStatus) -> Self {
        let now = Utc::now();
        Self {
            stage_id,
            stage_name: stage_name.into(),
            status,
            started_at: now,
            completed_at: now,
            duration_ms: 0,
            output: JsonMap::new(),
            artifacts: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            metadata: JsonMap::new(),
        }
    }

    /// A completed result for a registered stage
    pub fn completed(stage_id: u32, stage_name: impl Into<String>) -> Self {
        Self::with_status(Some(stage_id), stage_name, StageStatus::Completed)
    }

    /// A failed result for a registered stage carrying one error message
    pub fn failed(stage_id: u32, stage_name: impl Into<String>, error: impl Into<String>) -> Self {
        let mut result = Self::with_status(Some(stage_id), stage_name, StageStatus::Failed);
        result.errors.push(error.into());
        result
    }

    /// A skipped result; `reason` lands in `metadata.skip_reason`
    pub fn skipped(stage_id: Option<u32>, stage_name: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut result = Self::with_status(stage_id, stage_name, StageStatus::Skipped);
        result
            .metadata
            .insert("skip_reason".to_string(), serde_json::Value::String(reason.into()));
        result
    }

    /// A completed result for a gate or structural node
    pub fn pass_through(name: impl Into<String>) -> Self {
        Self::with_status(None, name, StageStatus::Completed)
    }

    /// Set start/end timestamps and the derived duration
    pub fn timed(mut self, started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self.completed_at = completed_at;
        self.duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.output.insert(key.into(), value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == StageStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == StageStatus::Failed
    }
}

/// Everything a stage can read about the job it runs in.
///
/// Stages receive it by shared reference and never mutate it; the runners
/// derive a fresh copy per invocation with the merged step config and the
/// results produced so far in the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageContext {
    pub job_id: String,
    #[serde(default)]
    pub config: JsonMap,
    /// Locator of the input dataset (path or URI)
    #[serde(default)]
    pub dataset_pointer: Option<String>,
    pub artifact_path: String,
    pub log_path: String,
    #[serde(default)]
    pub governance_mode: GovernanceMode,
    /// Results from earlier stages of this run, keyed by stage id
    #[serde(default)]
    pub previous_results: HashMap<u32, StageResult>,
    /// Results carried over from earlier sessions of the same job
    #[serde(default)]
    pub prior_session_results: HashMap<u32, StageResult>,
    #[serde(default)]
    pub metadata: JsonMap,
}

impl StageContext {
    pub fn new(job_id: impl Into<String>, governance_mode: GovernanceMode) -> Self {
        let job_id = job_id.into();
        Self {
            artifact_path: format!("artifacts/{}", job_id),
            log_path: format!("logs/{}", job_id),
            job_id,
            governance_mode,
            ..Default::default()
        }
    }

    /// Copy of this context whose config is `self.config` overlaid with `overrides`
    pub fn with_config_overrides(&self, overrides: &JsonMap) -> Self {
        let mut ctx = self.clone();
        for (key, value) in overrides {
            ctx.config.insert(key.clone(), value.clone());
        }
        ctx
    }
}

/// Mutable, checkpointable record of one execution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: RunId,
    pub workflow_id: String,
    pub workflow_version: String,
    pub current_node_id: Option<NodeId>,
    #[serde(default)]
    pub completed_nodes: Vec<NodeId>,
    #[serde(default)]
    pub skipped_nodes: Vec<NodeId>,
    #[serde(default)]
    pub node_outputs: HashMap<NodeId, StageResult>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(workflow_id: impl Into<String>, workflow_version: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: RunId::new(),
            workflow_id: workflow_id.into(),
            workflow_version: workflow_version.into(),
            current_node_id: None,
            completed_nodes: Vec::new(),
            skipped_nodes: Vec::new(),
            node_outputs: HashMap::new(),
            status: RunStatus::Running,
            error_message: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Whether the node was already executed or skipped in this run
    pub fn is_visited(&self, node_id: &NodeId) -> bool {
        self.completed_nodes.contains(node_id) || self.skipped_nodes.contains(node_id)
    }

    /// Record an executed node. Returns false if it was already visited.
    pub fn record_completed(&mut self, node_id: NodeId, result: StageResult) -> bool {
        if self.is_visited(&node_id) {
            return false;
        }
        self.node_outputs.insert(node_id.clone(), result);
        self.completed_nodes.push(node_id);
        self.updated_at = Utc::now();
        true
    }

    /// Record a skipped node. Returns false if it was already visited.
    pub fn record_skipped(&mut self, node_id: NodeId, result: StageResult) -> bool {
        if self.is_visited(&node_id) {
            return false;
        }
        self.node_outputs.insert(node_id.clone(), result);
        self.skipped_nodes.push(node_id);
        self.updated_at = Utc::now();
        true
    }

    pub fn output(&self, node_id: &str) -> Option<&StageResult> {
        self.node_outputs.get(&NodeId::new(node_id))
    }

    pub(crate) fn finish(&mut self, status: RunStatus, error_message: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.error_message = error_message;
        self.updated_at = now;
        if status.is_terminal() {
            self.completed_at = Some(now);
        }
    }
}
