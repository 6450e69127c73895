//! Edge types for the workflow graph

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::state::WorkflowState;

/// Types of edges supported in the graph
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    /// Always traversed
    #[default]
    Sequential,
    /// Traversed when its condition evaluates truthy
    Branch,
    /// Bounded back-edge
    Loop,
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::Branch => f.write_str("branch"),
            Self::Loop => f.write_str("loop"),
        }
    }
}

/// Callable form of a branch condition
pub type BranchPredicate = Arc<dyn Fn(&WorkflowState) -> bool + Send + Sync>;

/// Condition attached to a branch edge
#[derive(Clone)]
pub enum EdgeCondition {
    /// A sandboxed expression evaluated against the run's state.
    ///
    /// Only `language == "python"` expressions are evaluated; any other
    /// language marker makes the condition false.
    Expression {
        /// Expression source text
        expression: String,
        /// Expression language marker
        language: String,
    },
    /// A host predicate, only constructible programmatically
    Predicate(BranchPredicate),
}

impl EdgeCondition {
    /// Condition from an expression in the default language
    pub fn expression(expression: impl Into<String>) -> Self {
        Self::Expression {
            expression: expression.into(),
            language: "python".to_string(),
        }
    }

    /// Condition from a host predicate
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&WorkflowState) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }
}

impl std::fmt::Debug for EdgeCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expression {
                expression,
                language,
            } => f
                .debug_struct("Expression")
                .field("expression", expression)
                .field("language", language)
                .finish(),
            Self::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

/// Configuration for loop edges
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoopConfig {
    /// Maximum traversals of this edge within one run, in `[1, 100]`
    pub max_iterations: u32,

    /// Loop exit condition; when it evaluates truthy the edge stops matching
    pub until_expression: Option<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            until_expression: None,
        }
    }
}

/// Concrete runtime edge
#[derive(Debug, Clone)]
pub struct Edge {
    /// Source node id
    pub source: String,

    /// Target node id
    pub target: String,

    /// Dispatch behaviour of this edge
    pub edge_type: EdgeType,

    /// Present only on branch edges
    pub condition: Option<EdgeCondition>,

    /// Present only on loop edges
    pub loop_config: Option<LoopConfig>,
}

impl Edge {
    /// A sequential edge
    pub fn sequential(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            edge_type: EdgeType::Sequential,
            condition: None,
            loop_config: None,
        }
    }

    /// A branch edge guarded by the given condition
    pub fn branch(
        source: impl Into<String>,
        target: impl Into<String>,
        condition: EdgeCondition,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            edge_type: EdgeType::Branch,
            condition: Some(condition),
            loop_config: None,
        }
    }

    /// A loop edge bounded by the given configuration
    pub fn looping(
        source: impl Into<String>,
        target: impl Into<String>,
        config: LoopConfig,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            edge_type: EdgeType::Loop,
            condition: None,
            loop_config: Some(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_edge() {
        let edge = Edge::sequential("a", "b");
        assert_eq!(edge.edge_type, EdgeType::Sequential);
        assert!(edge.condition.is_none());
        assert!(edge.loop_config.is_none());
    }

    #[test]
    fn test_branch_edge_with_predicate() {
        let edge = Edge::branch(
            "a",
            "b",
            EdgeCondition::predicate(|state| state.get("go").is_some()),
        );
        assert_eq!(edge.edge_type, EdgeType::Branch);
        assert!(matches!(edge.condition, Some(EdgeCondition::Predicate(_))));
    }

    #[test]
    fn test_loop_config_defaults() {
        let config = LoopConfig::default();
        assert_eq!(config.max_iterations, 5);
        assert!(config.until_expression.is_none());
    }

    #[test]
    fn test_edge_type_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(EdgeType::Sequential).unwrap(),
            serde_json::json!("sequential")
        );
        assert_eq!(
            serde_json::from_value::<EdgeType>(serde_json::json!("loop")).unwrap(),
            EdgeType::Loop
        );
    }
}
