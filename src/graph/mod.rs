//! Graph data structures for the workflow engine
//!
//! A runtime [`Graph`] is built from a declarative [`GraphDocument`] plus a
//! [`ToolRegistry`]. Loading validates the document in a fixed order
//! (structure, start node, edge endpoints, registered callables) so an
//! invalid graph never reaches the executor. Cycles are deliberately *not*
//! rejected: loop edges are admissible and bounded at runtime by their
//! `max_iterations`.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use thiserror::Error;

use crate::tools::ToolRegistry;

pub mod document;
pub mod edge;
pub mod node;

pub use document::{ConditionSpec, EdgeSpec, GraphDocument, LoopSpec, NodeSpec};
pub use edge::{BranchPredicate, Edge, EdgeCondition, EdgeType, LoopConfig};
pub use node::Node;

/// Errors specific to graph definition and lookup
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// The document failed structural validation
    #[error("Invalid graph definition: {0}")]
    Validation(String),

    /// The declared start node is not defined
    #[error("Start node '{0}' is not defined")]
    StartNodeMissing(String),

    /// An edge references a node that is not defined
    #[error("Edge references unknown nodes: {from} -> {to}")]
    UnknownEdgeEndpoint {
        /// Source id as written in the document
        from: String,
        /// Target id as written in the document
        to: String,
    },

    /// A node references a callable missing from the registry
    #[error("Callable '{0}' is not registered")]
    ToolNotRegistered(String),

    /// Runtime lookup of an unknown node id
    #[error("Node '{node_id}' not found in graph '{graph_id}'")]
    NodeNotFound {
        /// Node id that was looked up
        node_id: String,
        /// Graph the lookup ran against
        graph_id: String,
    },
}

/// Runtime graph composed of resolved nodes and typed edges.
///
/// Outgoing edges are kept in **declaration order**; that order is the
/// successor dispatch order during execution.
#[derive(Debug, Clone)]
pub struct Graph {
    id: String,
    name: String,
    start_node: String,
    graph: DiGraph<Node, Edge>,
    node_map: HashMap<String, NodeIndex>,
    adjacency: HashMap<String, Vec<EdgeIndex>>,
}

impl Graph {
    /// Build a runtime graph from a document, resolving callables through
    /// the registry.
    pub fn from_document(
        document: &GraphDocument,
        registry: &ToolRegistry,
    ) -> Result<Self, GraphError> {
        document.validate()?;

        let node_ids: std::collections::HashSet<&str> =
            document.nodes.iter().map(|n| n.id.as_str()).collect();

        if !node_ids.contains(document.start_node.as_str()) {
            return Err(GraphError::StartNodeMissing(document.start_node.clone()));
        }

        for edge in &document.edges {
            if !node_ids.contains(edge.from_node.as_str())
                || !node_ids.contains(edge.to_node.as_str())
            {
                return Err(GraphError::UnknownEdgeEndpoint {
                    from: edge.from_node.clone(),
                    to: edge.to_node.clone(),
                });
            }
        }

        let mut graph = DiGraph::new();
        let mut node_map = HashMap::new();

        for spec in &document.nodes {
            let func = registry
                .get(&spec.callable)
                .map_err(|_| GraphError::ToolNotRegistered(spec.callable.clone()))?;
            let node = Node::new(
                &spec.id,
                spec.name.clone(),
                &spec.callable,
                func,
                spec.metadata.clone(),
            );
            let idx = graph.add_node(node);
            node_map.insert(spec.id.clone(), idx);
        }

        let mut adjacency: HashMap<String, Vec<EdgeIndex>> = HashMap::new();
        for spec in &document.edges {
            let edge = Edge {
                source: spec.from_node.clone(),
                target: spec.to_node.clone(),
                edge_type: spec.edge_type,
                condition: spec.condition.as_ref().map(|c| EdgeCondition::Expression {
                    expression: c.expression.clone(),
                    language: c.language.clone(),
                }),
                loop_config: spec.loop_spec.as_ref().map(|l| LoopConfig {
                    max_iterations: l.max_iterations,
                    until_expression: l.until_expression.clone(),
                }),
            };
            let idx = graph.add_edge(
                node_map[&spec.from_node],
                node_map[&spec.to_node],
                edge,
            );
            adjacency
                .entry(spec.from_node.clone())
                .or_default()
                .push(idx);
        }

        Ok(Self {
            id: document.id.clone(),
            name: document.name.clone(),
            start_node: document.start_node.clone(),
            graph,
            node_map,
            adjacency,
        })
    }

    /// Graph identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Graph name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the node the traversal starts from
    pub fn start_node(&self) -> &str {
        &self.start_node
    }

    /// Look up a node by id
    pub fn node(&self, node_id: &str) -> Result<&Node, GraphError> {
        self.node_map
            .get(node_id)
            .and_then(|idx| self.graph.node_weight(*idx))
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: node_id.to_string(),
                graph_id: self.id.clone(),
            })
    }

    /// Outgoing edges of a node, in declaration order
    pub fn out_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.adjacency
            .get(node_id)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|idx| self.graph.edge_weight(*idx))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Node ids in declaration order
    pub fn node_ids(&self) -> Vec<&str> {
        self.graph
            .node_weights()
            .map(|node| node.id.as_str())
            .collect()
    }

    /// Serialize the runtime graph back into its wire form.
    ///
    /// Programmatic branch predicates have no wire representation and are
    /// omitted.
    pub fn to_document(&self) -> GraphDocument {
        let nodes = self
            .graph
            .node_weights()
            .map(|node| NodeSpec {
                id: node.id.clone(),
                callable: node.callable.clone(),
                name: Some(node.name.clone()),
                metadata: node.metadata.clone(),
            })
            .collect();

        let edges = self
            .graph
            .edge_weights()
            .map(|edge| EdgeSpec {
                from_node: edge.source.clone(),
                to_node: edge.target.clone(),
                edge_type: edge.edge_type,
                condition: edge.condition.as_ref().and_then(|c| match c {
                    EdgeCondition::Expression {
                        expression,
                        language,
                    } => Some(ConditionSpec {
                        expression: expression.clone(),
                        language: language.clone(),
                    }),
                    EdgeCondition::Predicate(_) => None,
                }),
                loop_spec: edge.loop_config.as_ref().map(|l| LoopSpec {
                    max_iterations: l.max_iterations,
                    until_expression: l.until_expression.clone(),
                }),
            })
            .collect();

        GraphDocument {
            id: self.id.clone(),
            name: self.name.clone(),
            start_node: self.start_node.clone(),
            nodes,
            edges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::register_builtins;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let registry = ToolRegistry::new();
        register_builtins(&registry);
        registry
    }

    fn basic_document() -> GraphDocument {
        GraphDocument::from_value(json!({
            "id": "basic",
            "name": "Basic Graph",
            "start_node": "start",
            "nodes": [
                {"id": "start", "callable": "tools.noop"},
                {"id": "finish", "callable": "tools.approve"}
            ],
            "edges": [
                {"from": "start", "to": "finish", "type": "sequential"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_graph_loading() {
        let graph = Graph::from_document(&basic_document(), &registry()).unwrap();
        assert_eq!(graph.id(), "basic");
        assert_eq!(graph.start_node(), "start");
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.node("start").is_ok());
        assert!(graph.node("missing").is_err());
    }

    #[test]
    fn test_missing_start_node_fails() {
        let mut document = basic_document();
        document.start_node = "nowhere".to_string();
        let err = Graph::from_document(&document, &registry()).unwrap_err();
        assert_eq!(err, GraphError::StartNodeMissing("nowhere".to_string()));
    }

    #[test]
    fn test_unknown_edge_endpoint_fails() {
        let mut document = basic_document();
        document.edges[0].to_node = "ghost".to_string();
        let err = Graph::from_document(&document, &registry()).unwrap_err();
        assert!(matches!(err, GraphError::UnknownEdgeEndpoint { .. }));
    }

    #[test]
    fn test_unregistered_callable_fails() {
        let mut document = basic_document();
        document.nodes[1].callable = "tools.unknown".to_string();
        let err = Graph::from_document(&document, &registry()).unwrap_err();
        assert_eq!(err, GraphError::ToolNotRegistered("tools.unknown".to_string()));
    }

    #[test]
    fn test_out_edges_preserve_declaration_order() {
        let document = GraphDocument::from_value(json!({
            "id": "fanout",
            "name": "Fanout",
            "start_node": "review",
            "nodes": [
                {"id": "review", "callable": "tools.noop"},
                {"id": "approve", "callable": "tools.noop"},
                {"id": "fix", "callable": "tools.noop"}
            ],
            "edges": [
                {"from": "review", "to": "approve", "type": "branch",
                 "condition": {"expression": "context.get('issues', 0) == 0"}},
                {"from": "review", "to": "fix", "type": "branch",
                 "condition": {"expression": "context.get('issues', 0) > 0"}},
                {"from": "review", "to": "approve"}
            ]
        }))
        .unwrap();

        let graph = Graph::from_document(&document, &registry()).unwrap();
        let targets: Vec<&str> = graph
            .out_edges("review")
            .iter()
            .map(|e| e.target.as_str())
            .collect();
        assert_eq!(targets, vec!["approve", "fix", "approve"]);
        assert!(graph.out_edges("approve").is_empty());
    }

    #[test]
    fn test_cycles_are_admitted_at_load_time() {
        let document = GraphDocument::from_value(json!({
            "id": "cyclic",
            "name": "Cyclic",
            "start_node": "review",
            "nodes": [
                {"id": "review", "callable": "tools.noop"},
                {"id": "fix", "callable": "tools.noop"}
            ],
            "edges": [
                {"from": "review", "to": "fix", "type": "sequential"},
                {"from": "fix", "to": "review", "type": "loop",
                 "loop": {"max_iterations": 3}}
            ]
        }))
        .unwrap();

        assert!(Graph::from_document(&document, &registry()).is_ok());
    }

    #[test]
    fn test_document_round_trip_is_stable() {
        let document = GraphDocument::from_value(json!({
            "id": "rt",
            "name": "Round Trip",
            "start_node": "a",
            "nodes": [
                {"id": "a", "callable": "tools.noop", "metadata": {"stage": 1}},
                {"id": "b", "callable": "tools.approve", "name": "B Node"}
            ],
            "edges": [
                {"from": "a", "to": "b", "type": "branch",
                 "condition": {"expression": "context.get('go', False)"}},
                {"from": "b", "to": "a", "type": "loop",
                 "loop": {"max_iterations": 2, "until_expression": "context.get('done')"}}
            ]
        }))
        .unwrap();

        let reg = registry();
        let graph = Graph::from_document(&document, &reg).unwrap();
        let serialized = graph.to_document();
        let reloaded = Graph::from_document(&serialized, &reg).unwrap();

        // A second round trip is a fixed point
        assert_eq!(reloaded.to_document(), serialized);
        assert_eq!(reloaded.node_ids(), graph.node_ids());
        assert_eq!(reloaded.start_node(), graph.start_node());
        assert_eq!(reloaded.edge_count(), graph.edge_count());
    }
}
