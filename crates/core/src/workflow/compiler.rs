use super::dag::WorkflowGraph;
use super::plan::{CompiledStep, CompiledWorkflow, Condition, GateType, NodeKind};
use crate::config::CompilerConfig;
use crate::definition::{EdgeDefinition, NodeDefinition, WorkflowDefinition, SUPPORTED_SCHEMA_VERSION};
use crate::error::CompileError;
use crate::types::NodeId;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Validated node, ready for graph construction
struct ParsedNode<'a> {
    id: NodeId,
    kind: NodeKind,
    source: &'a NodeDefinition,
}

/// Validated edge
struct ParsedEdge {
    id: String,
    from: NodeId,
    to: NodeId,
    condition: Option<Condition>,
}

/// Turns workflow definitions into execution plans.
///
/// Compilation is deterministic: the same definition yields the same plan
/// regardless of how its node and edge arrays are ordered.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCompiler {
    config: CompilerConfig,
}

impl WorkflowCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Validate `definition` and produce its plan
    pub fn compile(
        &self,
        definition: &WorkflowDefinition,
        workflow_id: &str,
        version: &str,
    ) -> Result<CompiledWorkflow, CompileError> {
        validate_schema_version(definition)?;
        validate_entry_node(definition)?;
        validate_node_ids(definition)?;
        let nodes = self.parse_nodes(definition)?;
        let edges = parse_edges(definition)?;
        let conditions = index_conditions(&edges)?;

        let node_ids: Vec<NodeId> = nodes.iter().map(|n| n.id.clone()).collect();
        let graph = WorkflowGraph::build(
            node_ids.iter(),
            edges.iter().map(|e| (&e.from, &e.to)),
        );

        if self.config.allow_cycles {
            tracing::debug!(workflow_id, "Cycle detection disabled");
        } else if let Some(cycle) = graph.find_cycle() {
            let path: Vec<String> = cycle.into_iter().map(|id| id.0).collect();
            return Err(CompileError::Cycle(path));
        }

        let order = graph.topological_order();
        if order.len() != nodes.len() {
            let placed: HashSet<&NodeId> = order.iter().collect();
            let mut unresolved: Vec<String> = node_ids
                .iter()
                .filter(|id| !placed.contains(id))
                .map(|id| id.0.clone())
                .collect();
            unresolved.sort();
            return Err(CompileError::UnresolvedNodes(unresolved));
        }

        let parallel_groups = parallel_groups(&order, &nodes, &graph);
        let by_id: HashMap<&NodeId, &ParsedNode> = nodes.iter().map(|n| (&n.id, n)).collect();

        let mut steps = Vec::with_capacity(order.len());
        for node_id in &order {
            let Some(node) = by_id.get(node_id) else {
                continue;
            };
            let depends_on = graph.predecessors(node_id);
            let condition = resolve_condition(node_id, &depends_on, &conditions);

            steps.push(CompiledStep {
                node_id: node_id.clone(),
                kind: node.kind.clone(),
                label: node
                    .source
                    .label
                    .clone()
                    .unwrap_or_else(|| node_id.0.clone()),
                depends_on,
                condition,
                parallel_group: parallel_groups.get(node_id).cloned(),
                config: node.source.config.clone(),
            });
        }

        tracing::info!(
            workflow_id,
            version,
            steps = steps.len(),
            "Compiled workflow"
        );

        Ok(CompiledWorkflow {
            workflow_id: workflow_id.to_string(),
            version: version.to_string(),
            steps,
            entry_node_id: NodeId::new(definition.entry_node_id.clone()),
            metadata: definition.metadata.clone(),
            fingerprint: fingerprint(definition)?,
        })
    }

    fn parse_nodes<'a>(
        &self,
        definition: &'a WorkflowDefinition,
    ) -> Result<Vec<ParsedNode<'a>>, CompileError> {
        definition
            .nodes
            .iter()
            .map(|node| {
                Ok(ParsedNode {
                    id: NodeId::new(node.id.clone()),
                    kind: self.parse_kind(node)?,
                    source: node,
                })
            })
            .collect()
    }

    fn parse_kind(&self, node: &NodeDefinition) -> Result<NodeKind, CompileError> {
        match node.node_type.as_str() {
            "stage" => {
                let value = match &node.stage_id {
                    None | Some(serde_json::Value::Null) => {
                        return Err(CompileError::MissingStageId(node.id.clone()))
                    }
                    Some(value) => value,
                };
                let stage_id = value.as_i64().ok_or_else(|| CompileError::InvalidStageId {
                    node_id: node.id.clone(),
                    value: value.to_string(),
                })?;
                if !self.config.stage_id_in_range(stage_id) {
                    return Err(CompileError::StageIdOutOfRange {
                        node_id: node.id.clone(),
                        stage_id,
                        min: self.config.min_stage_id,
                        max: self.config.max_stage_id,
                    });
                }
                // In range, so it fits
                Ok(NodeKind::Stage {
                    stage_id: stage_id as u32,
                })
            }
            "gate" => {
                let gate_type = match node.gate_type.as_deref() {
                    None => None,
                    Some(raw) => Some(raw.parse::<GateType>().map_err(|_| {
                        CompileError::UnknownGateType {
                            node_id: node.id.clone(),
                            gate_type: raw.to_string(),
                        }
                    })?),
                };
                Ok(NodeKind::Gate { gate_type })
            }
            "branch" => Ok(NodeKind::Branch),
            "parallel" => Ok(NodeKind::Parallel),
            "merge" => Ok(NodeKind::Merge),
            other => Err(CompileError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: other.to_string(),
            }),
        }
    }
}

fn validate_schema_version(definition: &WorkflowDefinition) -> Result<(), CompileError> {
    if definition.schema_version != SUPPORTED_SCHEMA_VERSION {
        return Err(CompileError::UnsupportedSchemaVersion {
            found: definition.schema_version.clone(),
            expected: SUPPORTED_SCHEMA_VERSION.to_string(),
        });
    }
    Ok(())
}

fn validate_entry_node(definition: &WorkflowDefinition) -> Result<(), CompileError> {
    if definition.nodes.is_empty() {
        return Err(CompileError::NoNodes);
    }

    let entry = &definition.entry_node_id;
    let matches = definition.nodes.iter().filter(|n| &n.id == entry).count();
    match matches {
        0 => Err(CompileError::MissingEntryNode(entry.clone())),
        1 => Ok(()),
        _ => Err(CompileError::AmbiguousEntryNode(entry.clone())),
    }
}

fn validate_node_ids(definition: &WorkflowDefinition) -> Result<(), CompileError> {
    let mut seen = HashSet::new();
    for (position, node) in definition.nodes.iter().enumerate() {
        if node.id.trim().is_empty() {
            return Err(CompileError::EmptyNodeId(position));
        }
        if !seen.insert(node.id.as_str()) {
            return Err(CompileError::DuplicateNodeId(node.id.clone()));
        }
    }
    Ok(())
}

fn parse_edges(definition: &WorkflowDefinition) -> Result<Vec<ParsedEdge>, CompileError> {
    let known: HashSet<&str> = definition.nodes.iter().map(|n| n.id.as_str()).collect();
    definition
        .edges
        .iter()
        .map(|edge| {
            for endpoint in [&edge.from, &edge.to] {
                if !known.contains(endpoint.as_str()) {
                    return Err(CompileError::UnknownEdgeEndpoint {
                        edge_id: edge.id.clone(),
                        node_id: endpoint.clone(),
                    });
                }
            }
            Ok(ParsedEdge {
                id: edge.id.clone(),
                from: NodeId::new(edge.from.clone()),
                to: NodeId::new(edge.to.clone()),
                condition: parse_condition(edge)?,
            })
        })
        .collect()
}

fn parse_condition(edge: &EdgeDefinition) -> Result<Option<Condition>, CompileError> {
    let Some(condition) = &edge.condition else {
        return Ok(None);
    };
    let parsed = match condition.kind.as_str() {
        "always" => Condition::Always,
        "on_success" => Condition::OnSuccess,
        "on_failure" => Condition::OnFailure,
        "expr" => {
            tracing::warn!(
                edge_id = %edge.id,
                "Expression conditions are restricted and will be treated as always-true"
            );
            Condition::Expr {
                expr: condition.expr.clone(),
            }
        }
        other => {
            return Err(CompileError::UnknownConditionKind {
                edge_id: edge.id.clone(),
                kind: other.to_string(),
            })
        }
    };
    Ok(Some(parsed))
}

/// Conditions keyed by (from, to).
///
/// Several edges may join the same pair; they must agree on the condition
/// they carry, otherwise the inherited condition would depend on array order.
fn index_conditions(edges: &[ParsedEdge]) -> Result<HashMap<(NodeId, NodeId), Condition>, CompileError> {
    let mut by_pair: BTreeMap<(&NodeId, &NodeId), Vec<(&str, &Condition)>> = BTreeMap::new();
    for edge in edges {
        if let Some(condition) = &edge.condition {
            by_pair
                .entry((&edge.from, &edge.to))
                .or_default()
                .push((edge.id.as_str(), condition));
        }
    }

    let mut conditions = HashMap::with_capacity(by_pair.len());
    for ((from, to), mut carried) in by_pair {
        carried.sort_by(|a, b| a.0.cmp(b.0));
        let (_, first) = carried[0];
        if carried.iter().any(|(_, condition)| *condition != first) {
            return Err(CompileError::ConflictingConditions {
                from: from.0.clone(),
                to: to.0.clone(),
                edge_ids: carried.iter().map(|(id, _)| id.to_string()).collect(),
            });
        }
        if carried.len() > 1 {
            tracing::debug!(from = %from, to = %to, edges = carried.len(), "Repeated conditional edge collapsed");
        }
        conditions.insert((from.clone(), to.clone()), first.clone());
    }
    Ok(conditions)
}

/// A step inherits its incoming edge's condition only when it has exactly
/// one predecessor.
fn resolve_condition(
    node_id: &NodeId,
    depends_on: &[NodeId],
    conditions: &HashMap<(NodeId, NodeId), Condition>,
) -> Option<Condition> {
    if let [only] = depends_on {
        return conditions.get(&(only.clone(), node_id.clone())).cloned();
    }

    let ignored = depends_on
        .iter()
        .filter(|from| conditions.contains_key(&((*from).clone(), node_id.clone())))
        .count();
    if ignored > 0 {
        tracing::warn!(
            node_id = %node_id,
            ignored,
            "Conditions on edges into a multi-predecessor step are not supported"
        );
    }
    None
}

/// Tag each direct successor of a `parallel` node with that node's id.
/// When a step follows several parallel nodes the earliest in plan order wins.
fn parallel_groups(
    order: &[NodeId],
    nodes: &[ParsedNode],
    graph: &WorkflowGraph,
) -> HashMap<NodeId, NodeId> {
    let parallel: HashSet<&NodeId> = nodes
        .iter()
        .filter(|n| n.kind == NodeKind::Parallel)
        .map(|n| &n.id)
        .collect();

    let mut groups = HashMap::new();
    for node_id in order.iter().filter(|id| parallel.contains(id)) {
        for successor in graph.successors(node_id) {
            groups.entry(successor).or_insert_with(|| node_id.clone());
        }
    }
    groups
}

/// SHA-256 of a definition's JSON encoding with nodes sorted by id and
/// edges by (from, to, id), so reordered arrays hash the same.
pub(crate) fn fingerprint(definition: &WorkflowDefinition) -> Result<String, CompileError> {
    let mut normalized = definition.clone();
    normalized.nodes.sort_by(|a, b| a.id.cmp(&b.id));
    normalized.edges.sort_by(|a, b| edge_sort_key(a).cmp(&edge_sort_key(b)));

    // serde_json maps are key-sorted, so object fields need no normalizing
    let encoded =
        serde_json::to_vec(&normalized).map_err(|e| CompileError::Encoding(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

fn edge_sort_key(edge: &EdgeDefinition) -> (&str, &str, &str, Option<&str>, Option<&str>) {
    let condition = edge.condition.as_ref();
    (
        edge.from.as_str(),
        edge.to.as_str(),
        edge.id.as_str(),
        condition.map(|c| c.kind.as_str()),
        condition.and_then(|c| c.expr.as_deref()),
    )
}
