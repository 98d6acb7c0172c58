//! Error types for compilation, registration and run control.
//!
//! None of these messages ever include stage payloads; they reference
//! structural metadata only (node ids, stage ids, schema versions).

/// A workflow definition failed validation and produced no plan
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("Unsupported schema version '{found}' (expected '{expected}')")]
    UnsupportedSchemaVersion { found: String, expected: String },

    #[error("Workflow must contain at least one node")]
    NoNodes,

    #[error("Entry node '{0}' does not exist")]
    MissingEntryNode(String),

    #[error("Entry node '{0}' matches more than one node")]
    AmbiguousEntryNode(String),

    #[error("Node at position {0} has an empty id")]
    EmptyNodeId(usize),

    #[error("Duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error("Node '{node_id}' has unknown type '{node_type}'")]
    UnknownNodeType { node_id: String, node_type: String },

    #[error("Stage node '{0}' is missing stageId")]
    MissingStageId(String),

    #[error("Stage node '{node_id}' has non-integer stageId {value}")]
    InvalidStageId { node_id: String, value: String },

    #[error("Stage node '{node_id}' has stageId {stage_id} outside {min}..={max}")]
    StageIdOutOfRange {
        node_id: String,
        stage_id: i64,
        min: u32,
        max: u32,
    },

    #[error("Gate node '{node_id}' has unknown gateType '{gate_type}'")]
    UnknownGateType { node_id: String, gate_type: String },

    #[error("Edge '{edge_id}' references unknown node '{node_id}'")]
    UnknownEdgeEndpoint { edge_id: String, node_id: String },

    #[error("Edge '{edge_id}' has unknown condition kind '{kind}'")]
    UnknownConditionKind { edge_id: String, kind: String },

    #[error("Edges {} from '{from}' to '{to}' carry conflicting conditions", .edge_ids.join(", "))]
    ConflictingConditions {
        from: String,
        to: String,
        edge_ids: Vec<String>,
    },

    #[error("Definition could not be encoded for fingerprinting: {0}")]
    Encoding(String),

    #[error("Workflow contains a cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Topological order could not resolve nodes: {}", .0.join(", "))]
    UnresolvedNodes(Vec<String>),
}

/// Invalid or conflicting stage registration, raised at startup only
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Stage '{stage_name}' has stage id {stage_id} outside {min}..={max}")]
    InvalidStageId {
        stage_id: u32,
        stage_name: String,
        min: u32,
        max: u32,
    },

    #[error("Stage id {stage_id} is already registered to '{existing}', cannot register '{incoming}'")]
    Duplicate {
        stage_id: u32,
        existing: String,
        incoming: String,
    },
}

/// Failure in the DAG runner's own control flow, not attributable to a stage
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    #[error("Run state belongs to workflow {found}, not {expected}")]
    WorkflowMismatch { expected: String, found: String },

    #[error("Run state references node '{0}' that is not in the plan")]
    UnknownNode(String),
}
