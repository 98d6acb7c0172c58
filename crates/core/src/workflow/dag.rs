use crate::types::NodeId;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Directed graph over workflow node ids.
///
/// Nodes and edges are inserted in sorted id order and every traversal
/// visits neighbours sorted by id, so results never depend on the order of
/// the author's arrays.
pub struct WorkflowGraph {
    graph: DiGraph<NodeId, ()>,
    indices: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    /// Build from node ids and (from, to) pairs. Endpoints must already be
    /// known to exist; duplicate edges collapse into one.
    pub fn build<'a>(
        node_ids: impl IntoIterator<Item = &'a NodeId>,
        edges: impl IntoIterator<Item = (&'a NodeId, &'a NodeId)>,
    ) -> Self {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();

        let sorted_nodes: BTreeSet<&NodeId> = node_ids.into_iter().collect();
        for id in sorted_nodes {
            let idx = graph.add_node(id.clone());
            indices.insert(id.clone(), idx);
        }

        let sorted_edges: BTreeSet<(&NodeId, &NodeId)> = edges.into_iter().collect();
        for (from, to) in sorted_edges {
            if let (Some(&a), Some(&b)) = (indices.get(from), indices.get(to)) {
                graph.update_edge(a, b, ());
            }
        }

        Self { graph, indices }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    fn neighbors_sorted(&self, idx: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        neighbors.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
        neighbors.dedup();
        neighbors
    }

    fn ids(&self, indices: Vec<NodeIndex>) -> Vec<NodeId> {
        indices.into_iter().map(|n| self.graph[n].clone()).collect()
    }

    /// Direct predecessors of a node, sorted by id
    pub fn predecessors(&self, node_id: &NodeId) -> Vec<NodeId> {
        match self.indices.get(node_id) {
            Some(&idx) => self.ids(self.neighbors_sorted(idx, Direction::Incoming)),
            None => Vec::new(),
        }
    }

    /// Direct successors of a node, sorted by id
    pub fn successors(&self, node_id: &NodeId) -> Vec<NodeId> {
        match self.indices.get(node_id) {
            Some(&idx) => self.ids(self.neighbors_sorted(idx, Direction::Outgoing)),
            None => Vec::new(),
        }
    }

    /// Three-color depth-first search. Returns the first cycle found as a
    /// closed path (`[a, b, a]`), or `None` when the graph is acyclic.
    ///
    /// Iterative, so graph depth is bounded by heap rather than stack.
    pub fn find_cycle(&self) -> Option<Vec<NodeId>> {
        let mut color = vec![Color::White; self.graph.node_count()];

        let mut roots: Vec<NodeIndex> = self.graph.node_indices().collect();
        roots.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

        for root in roots {
            if color[root.index()] == Color::White {
                if let Some(cycle) = self.visit(root, &mut color) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit(&self, root: NodeIndex, color: &mut [Color]) -> Option<Vec<NodeId>> {
        // Each frame is a gray node and its remaining sorted successors; the
        // frames themselves form the current DFS path.
        let mut stack: Vec<(NodeIndex, std::vec::IntoIter<NodeIndex>)> = Vec::new();
        color[root.index()] = Color::Gray;
        stack.push((root, self.neighbors_sorted(root, Direction::Outgoing).into_iter()));

        loop {
            let Some((idx, pending)) = stack.last_mut() else {
                break;
            };
            let idx = *idx;
            let next = pending.next();
            match next {
                Some(next) => match color[next.index()] {
                    Color::Gray => {
                        let start = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                        let mut cycle: Vec<NodeId> = stack[start..]
                            .iter()
                            .map(|(n, _)| self.graph[*n].clone())
                            .collect();
                        cycle.push(self.graph[next].clone());
                        return Some(cycle);
                    }
                    Color::White => {
                        color[next.index()] = Color::Gray;
                        stack.push((next, self.neighbors_sorted(next, Direction::Outgoing).into_iter()));
                    }
                    Color::Black => {}
                },
                None => {
                    color[idx.index()] = Color::Black;
                    stack.pop();
                }
            }
        }
        None
    }

    /// Kahn's algorithm with a lexicographically ordered ready set.
    ///
    /// Nodes that can never become ready (anything on or behind a cycle) are
    /// simply absent from the result; callers compare lengths.
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.neighbors_sorted(n, Direction::Incoming).len())
            .collect();

        let mut ready: BTreeSet<(NodeId, NodeIndex)> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .map(|n| (self.graph[n].clone(), n))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some((id, idx)) = ready.pop_first() {
            order.push(id);
            for next in self.neighbors_sorted(idx, Direction::Outgoing) {
                let degree = &mut in_degree[next.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.insert((self.graph[next].clone(), next));
                }
            }
        }

        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<NodeId> {
        raw.iter().map(|s| NodeId::new(*s)).collect()
    }

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> WorkflowGraph {
        let nodes = ids(nodes);
        let edges: Vec<(NodeId, NodeId)> = edges
            .iter()
            .map(|(a, b)| (NodeId::new(*a), NodeId::new(*b)))
            .collect();
        WorkflowGraph::build(nodes.iter(), edges.iter().map(|(a, b)| (a, b)))
    }

    #[test]
    fn test_linear_order() {
        let g = graph(&["step3", "step1", "step2"], &[("step1", "step2"), ("step2", "step3")]);
        assert_eq!(g.topological_order(), ids(&["step1", "step2", "step3"]));
        assert!(g.find_cycle().is_none());
    }

    #[test]
    fn test_ready_set_is_lexicographic() {
        // Diamond: both branches become ready together; "b" sorts before "c"
        let g = graph(
            &["d", "c", "b", "a"],
            &[("a", "c"), ("a", "b"), ("c", "d"), ("b", "d")],
        );
        assert_eq!(g.topological_order(), ids(&["a", "b", "c", "d"]));
        assert_eq!(g.predecessors(&NodeId::new("d")), ids(&["b", "c"]));
        assert_eq!(g.successors(&NodeId::new("a")), ids(&["b", "c"]));
    }

    #[test]
    fn test_disconnected_components_ordered() {
        let g = graph(&["x", "a", "y"], &[("x", "y")]);
        assert_eq!(g.topological_order(), ids(&["a", "x", "y"]));
    }

    #[test]
    fn test_cycle_path_reported() {
        let g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "b")]);
        assert_eq!(g.find_cycle(), Some(ids(&["b", "c", "b"])));
        // Kahn leaves the cycle members unresolved
        assert_eq!(g.topological_order(), ids(&["a"]));
    }

    #[test]
    fn test_self_loop() {
        let g = graph(&["a"], &[("a", "a")]);
        assert_eq!(g.find_cycle(), Some(ids(&["a", "a"])));
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let g = graph(&["a", "b"], &[("a", "b"), ("a", "b")]);
        assert_eq!(g.predecessors(&NodeId::new("b")), ids(&["a"]));
        assert_eq!(g.topological_order(), ids(&["a", "b"]));
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let names: Vec<String> = (0..50_000).map(|i| format!("n{:05}", i)).collect();
        let nodes: Vec<NodeId> = names.iter().map(|n| NodeId::new(n.as_str())).collect();
        let edges: Vec<(NodeId, NodeId)> = nodes
            .windows(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        let g = WorkflowGraph::build(nodes.iter(), edges.iter().map(|(a, b)| (a, b)));

        assert!(g.find_cycle().is_none());
        assert_eq!(g.topological_order(), nodes);
    }

    #[test]
    fn test_cycle_at_end_of_long_chain() {
        let names: Vec<String> = (0..10_000).map(|i| format!("n{:05}", i)).collect();
        let nodes: Vec<NodeId> = names.iter().map(|n| NodeId::new(n.as_str())).collect();
        let mut edges: Vec<(NodeId, NodeId)> = nodes
            .windows(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        edges.push((NodeId::new("n09999"), NodeId::new("n09998")));
        let g = WorkflowGraph::build(nodes.iter(), edges.iter().map(|(a, b)| (a, b)));

        assert_eq!(g.find_cycle(), Some(ids(&["n09998", "n09999", "n09998"])));
    }
}
