// Compiled, immutable execution plans

use crate::types::{JsonMap, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kinds of approval/compliance checkpoints a gate node can represent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    AiApproval,
    PhiScan,
    HumanReview,
    ComplianceCheck,
}

impl GateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiApproval => "ai_approval",
            Self::PhiScan => "phi_scan",
            Self::HumanReview => "human_review",
            Self::ComplianceCheck => "compliance_check",
        }
    }
}

impl std::str::FromStr for GateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai_approval" => Ok(Self::AiApproval),
            "phi_scan" => Ok(Self::PhiScan),
            "human_review" => Ok(Self::HumanReview),
            "compliance_check" => Ok(Self::ComplianceCheck),
            other => Err(format!("unknown gate type: {}", other)),
        }
    }
}

/// Typed node, parsed from the definition's string tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "snake_case")]
pub enum NodeKind {
    Stage { stage_id: u32 },
    Gate { gate_type: Option<GateType> },
    Branch,
    Parallel,
    Merge,
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Stage { .. } => "stage",
            Self::Gate { .. } => "gate",
            Self::Branch => "branch",
            Self::Parallel => "parallel",
            Self::Merge => "merge",
        }
    }
}

/// Condition attached to the edge leading into a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Always,
    OnSuccess,
    OnFailure,
    /// Reserved. Parsed and kept, never evaluated; runners treat it as `Always`.
    Expr { expr: Option<String> },
}

/// One entry of the execution plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledStep {
    pub node_id: NodeId,
    #[serde(flatten)]
    pub kind: NodeKind,
    pub label: String,
    /// Direct predecessors, sorted by id
    pub depends_on: Vec<NodeId>,
    pub condition: Option<Condition>,
    /// Id of the `parallel` node this step fans out from. Informational only.
    pub parallel_group: Option<NodeId>,
    #[serde(default)]
    pub config: JsonMap,
}

impl CompiledStep {
    pub fn stage_id(&self) -> Option<u32> {
        match self.kind {
            NodeKind::Stage { stage_id } => Some(stage_id),
            _ => None,
        }
    }

    pub fn gate_type(&self) -> Option<GateType> {
        match self.kind {
            NodeKind::Gate { gate_type } => gate_type,
            _ => None,
        }
    }

    pub fn node_type(&self) -> &'static str {
        self.kind.type_name()
    }
}

/// Immutable, topologically ordered plan for one workflow version.
///
/// Safe to share (`Arc`) across any number of concurrent runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledWorkflow {
    pub workflow_id: String,
    pub version: String,
    pub steps: Vec<CompiledStep>,
    pub entry_node_id: NodeId,
    #[serde(default)]
    pub metadata: JsonMap,
    /// SHA-256 of the normalized definition this plan was compiled from
    pub fingerprint: String,
}

impl CompiledWorkflow {
    pub fn step(&self, node_id: &str) -> Option<&CompiledStep> {
        self.steps.iter().find(|s| s.node_id.as_str() == node_id)
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.steps.iter().any(|s| &s.node_id == node_id)
    }

    /// Position of a node in the execution order
    pub fn position(&self, node_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.node_id.as_str() == node_id)
    }

    /// Steps that list `node_id` as a direct dependency
    pub fn dependents(&self, node_id: &str) -> Vec<&CompiledStep> {
        self.steps
            .iter()
            .filter(|s| s.depends_on.iter().any(|d| d.as_str() == node_id))
            .collect()
    }

    /// Steps with no dependencies
    pub fn entry_steps(&self) -> Vec<&CompiledStep> {
        self.steps.iter().filter(|s| s.depends_on.is_empty()).collect()
    }

    /// Parallel node id to the steps tagged with it, in plan order
    pub fn parallel_groups(&self) -> BTreeMap<NodeId, Vec<NodeId>> {
        let mut groups: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for step in &self.steps {
            if let Some(group) = &step.parallel_group {
                groups
                    .entry(group.clone())
                    .or_default()
                    .push(step.node_id.clone());
            }
        }
        groups
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.steps.iter().map(|s| &s.node_id)
    }
}
