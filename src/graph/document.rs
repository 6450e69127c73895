//! Declarative wire format for workflow graphs
//!
//! A [`GraphDocument`] is the JSON shape clients submit: nodes referencing
//! registry callables by name, and typed edges using `from`/`to` on the wire.

use serde::{Deserialize, Serialize};

use super::edge::EdgeType;
use super::GraphError;
use crate::state::Context;

fn default_language() -> String {
    "python".to_string()
}

fn default_max_iterations() -> u32 {
    5
}

/// Declarative node definition referencing a registry entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    /// Node identifier, unique within the graph
    pub id: String,

    /// Name of the registered callable backing this node
    pub callable: String,

    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Free-form metadata
    #[serde(default, skip_serializing_if = "Context::is_empty")]
    pub metadata: Context,
}

/// Declarative branch condition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionSpec {
    /// Expression source text
    pub expression: String,

    /// Expression language marker; only `"python"` is evaluated
    #[serde(default = "default_language")]
    pub language: String,
}

/// Declarative loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoopSpec {
    /// Maximum traversals of the edge within one run, in `[1, 100]`
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Loop exit condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until_expression: Option<String>,
}

impl Default for LoopSpec {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            until_expression: None,
        }
    }
}

/// Declarative edge definition supporting branch/loop metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeSpec {
    /// Source node id
    #[serde(rename = "from")]
    pub from_node: String,

    /// Target node id
    #[serde(rename = "to")]
    pub to_node: String,

    /// Edge dispatch type; defaults to sequential
    #[serde(default, rename = "type")]
    pub edge_type: EdgeType,

    /// Branch condition; only valid on branch edges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionSpec>,

    /// Loop configuration; only valid on loop edges
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_spec: Option<LoopSpec>,
}

/// Top-level graph document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphDocument {
    /// Graph identifier, unique within the graph store
    pub id: String,

    /// Human-readable graph name
    pub name: String,

    /// Node the traversal starts from
    pub start_node: String,

    /// Node definitions
    pub nodes: Vec<NodeSpec>,

    /// Edge definitions; declaration order is the dispatch order
    pub edges: Vec<EdgeSpec>,
}

impl GraphDocument {
    /// Parse a document from a JSON value
    pub fn from_value(value: serde_json::Value) -> Result<Self, GraphError> {
        serde_json::from_value(value)
            .map_err(|e| GraphError::Validation(format!("invalid graph definition: {e}")))
    }

    /// Structural validation: unique node ids, loop bounds, and edge shape
    /// rules (conditions only on branch edges, loop blocks only on loop
    /// edges).
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(GraphError::Validation(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        for edge in &self.edges {
            if edge.condition.is_some() && edge.edge_type != EdgeType::Branch {
                return Err(GraphError::Validation(format!(
                    "edge {} -> {} carries a condition but is not a branch edge",
                    edge.from_node, edge.to_node
                )));
            }
            if edge.loop_spec.is_some() && edge.edge_type != EdgeType::Loop {
                return Err(GraphError::Validation(format!(
                    "edge {} -> {} carries a loop block but is not a loop edge",
                    edge.from_node, edge.to_node
                )));
            }
            if let Some(loop_spec) = &edge.loop_spec {
                if !(1..=100).contains(&loop_spec.max_iterations) {
                    return Err(GraphError::Validation(format!(
                        "edge {} -> {}: max_iterations must be in [1, 100], got {}",
                        edge.from_node, edge.to_node, loop_spec.max_iterations
                    )));
                }
            }
        }

        Ok(())
    }
}
