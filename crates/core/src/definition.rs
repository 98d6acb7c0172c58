// Author-supplied workflow definitions, before validation

use crate::types::JsonMap;
use serde::{Deserialize, Serialize};

/// The only definition schema version this crate understands
pub const SUPPORTED_SCHEMA_VERSION: &str = "1.0";

/// Raw workflow definition as exchanged with the authoring side.
///
/// Node types, stage ids and condition kinds are kept loosely typed here so
/// that the compiler can reject bad input with a validation error instead of
/// a deserialization failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub schema_version: String,
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
    pub entry_node_id: String,
    #[serde(default)]
    pub metadata: JsonMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub config: JsonMap,
}

impl NodeDefinition {
    pub fn stage(id: impl Into<String>, stage_id: u32) -> Self {
        Self {
            id: id.into(),
            node_type: "stage".to_string(),
            stage_id: Some(serde_json::Value::from(stage_id)),
            gate_type: None,
            label: None,
            config: JsonMap::new(),
        }
    }

    pub fn gate(id: impl Into<String>, gate_type: Option<&str>) -> Self {
        Self {
            id: id.into(),
            node_type: "gate".to_string(),
            stage_id: None,
            gate_type: gate_type.map(str::to_string),
            label: None,
            config: JsonMap::new(),
        }
    }

    /// A node of any of the structural types (`branch`, `parallel`, `merge`)
    pub fn structural(id: impl Into<String>, node_type: &str) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.to_string(),
            stage_id: None,
            gate_type: None,
            label: None,
            config: JsonMap::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionDefinition>,
}

impl EdgeDefinition {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            id: format!("{}->{}", from, to),
            from,
            to,
            condition: None,
        }
    }

    pub fn when(mut self, kind: &str) -> Self {
        self.condition = Some(ConditionDefinition {
            kind: kind.to_string(),
            expr: None,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDefinition {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
}

impl WorkflowDefinition {
    pub fn new(entry_node_id: impl Into<String>) -> Self {
        Self {
            schema_version: SUPPORTED_SCHEMA_VERSION.to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
            entry_node_id: entry_node_id.into(),
            metadata: JsonMap::new(),
        }
    }

    pub fn node(mut self, node: NodeDefinition) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn edge(mut self, edge: EdgeDefinition) -> Self {
        self.edges.push(edge);
        self
    }

    /// Parse a definition from its JSON form
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
