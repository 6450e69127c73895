//! # Graphflow
//!
//! A workflow execution engine for running user-defined directed graphs of
//! tool callables against a shared mutable state.
//!
//! ## Overview
//!
//! Clients register a graph (nodes plus typed edges), launch runs against it,
//! inspect run state, cancel runs, and subscribe to a live log stream. Each
//! run traverses the graph one node at a time, selects successors via
//! sequential / branch / loop edges whose conditions are evaluated in a
//! sandboxed expression language, and produces a structured execution log.
//!
//! ## Key features
//!
//! - **Typed graph documents**: declarative JSON graphs validated against a
//!   tool registry before a single node runs
//! - **Sandboxed conditions**: branch and loop expressions are parsed into a
//!   typed AST, never handed to a host interpreter
//! - **Cooperative cancellation**: runs observe a cancel flag at every
//!   traversal step and poll it while a node is in flight
//! - **Per-node timeouts**: a wall-clock bound on every node invocation
//! - **Live log streaming**: per-run pub/sub fan-out of log and status events

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Main error type for workflow operations
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Graph definition or validation error
    #[error("Graph error: {0}")]
    Graph(#[from] graph::GraphError),

    /// Tool registry error
    #[error("Tool error: {0}")]
    Tool(#[from] tools::ToolError),

    /// Condition expression error
    #[error("Expression error: {0}")]
    Expression(#[from] expr::ExprError),

    /// Execution error during graph traversal
    #[error("Execution error: {0}")]
    Execution(#[from] engine::ExecutionError),

    /// Store error (unknown ids, duplicates, conflicting updates)
    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core graph module containing the runtime graph and its wire format
pub mod graph;

/// Workflow state carried along a run
pub mod state;

/// Tool registry and callable types
pub mod tools;

/// Sandboxed condition expression evaluator
pub mod expr;

/// Execution engine module
pub mod engine;

/// In-memory graph and run stores
pub mod store;

/// Per-run log stream fan-out
pub mod stream;

/// Orchestration service tying graphs, runs, executor, and streams together
pub mod service;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: WorkflowError = store::StoreError::RunNotFound("missing".into()).into();
        assert!(matches!(err, WorkflowError::Store(_)));
        assert!(err.to_string().contains("missing"));
    }
}
