//! Workflow execution engine with branching, looping, and logging
//!
//! The [`Executor`] walks a [`Graph`] one node at a time. At every traversal
//! step it observes the cancellation flag, invokes the current node under a
//! wall-clock timeout, then scans the node's outgoing edges **in declaration
//! order** and follows the first edge whose predicate matches. Every step
//! emits a structured [`ExecutionLog`] both into the returned
//! [`ExecutionResult`] and through an optional log hook for live streaming.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::expr::{self, ExprError};
use crate::graph::{Edge, EdgeCondition, EdgeType, Graph, Node};
use crate::state::{Context, ExecutionStatus, WorkflowState};
use crate::tools::ToolCallable;

/// Default wall-clock bound for a single node invocation
const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between cancellation polls while a node is in flight
const DEFAULT_CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Log entries emitted before any node was entered use this id
const EXECUTOR_NODE_ID: &str = "executor";

/// Errors raised during graph traversal
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// A node callable returned an error or panicked
    #[error("Node execution failed: {0}")]
    NodeFailed(String),

    /// A node exceeded the per-node timeout
    #[error("Node '{node_id}' timed out after {timeout:?}")]
    Timeout {
        /// Node that timed out
        node_id: String,
        /// Configured timeout
        timeout: Duration,
    },

    /// A loop edge exceeded its configured iteration limit
    #[error("Loop {source_node}->{target} exceeded {max_iterations} iterations.")]
    LoopLimitExceeded {
        /// Loop edge source
        source_node: String,
        /// Loop edge target
        target: String,
        /// Configured bound
        max_iterations: u32,
    },

    /// The run was cancelled
    #[error("Execution cancelled")]
    Cancelled,

    /// An edge condition failed to parse or evaluate
    #[error(transparent)]
    Expression(#[from] ExprError),
}

/// Outcome of a single node execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    /// The node completed and returned a state
    Success,
    /// The node failed, timed out, or broke the traversal
    Failed,
    /// The run was cancelled at this point
    Cancelled,
}

/// Structured log entry for one execution step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    /// Node the entry belongs to, or `"executor"` for pre-node cancellation
    pub node_id: String,

    /// Step outcome
    pub status: LogStatus,

    /// When the entry was emitted
    pub timestamp: DateTime<Utc>,

    /// Optional human-readable note
    pub message: Option<String>,

    /// Error description for failed or cancelled steps
    pub error: Option<String>,
}

impl ExecutionLog {
    fn new(node_id: impl Into<String>, status: LogStatus) -> Self {
        Self {
            node_id: node_id.into(),
            status,
            timestamp: Utc::now(),
            message: None,
            error: None,
        }
    }

    /// A success entry
    pub fn success(node_id: impl Into<String>) -> Self {
        Self::new(node_id, LogStatus::Success)
    }

    /// A failure entry with a message and error description
    pub fn failed(
        node_id: impl Into<String>,
        message: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut log = Self::new(node_id, LogStatus::Failed);
        log.message = Some(message.into());
        log.error = Some(error.into());
        log
    }

    /// A cancellation entry
    pub fn cancelled(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        let mut log = Self::new(node_id, LogStatus::Cancelled);
        log.message = Some(message.into());
        log
    }
}

/// Aggregate result for an entire workflow run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Run identifier
    pub run_id: Uuid,

    /// The state after the final executed node
    pub final_state: WorkflowState,

    /// Log entries in execution order
    pub logs: Vec<ExecutionLog>,
}

/// Observer invoked for every emitted [`ExecutionLog`]
pub type LogHook = Arc<dyn Fn(&ExecutionLog) + Send + Sync>;

/// Polled predicate signalling a cancellation request
pub type CancelChecker = Arc<dyn Fn() -> bool + Send + Sync>;

/// Optional observation hooks for a run
#[derive(Clone, Default)]
pub struct RunHooks {
    /// Called with every emitted log entry, in execution order
    pub log_hook: Option<LogHook>,

    /// Polled at every traversal step and while nodes are in flight
    pub cancel_checker: Option<CancelChecker>,
}

impl RunHooks {
    /// Hooks observing nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a log hook
    pub fn with_log_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ExecutionLog) + Send + Sync + 'static,
    {
        self.log_hook = Some(Arc::new(hook));
        self
    }

    /// Attach a cancellation checker
    pub fn with_cancel_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.cancel_checker = Some(Arc::new(checker));
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel_checker.as_ref().is_some_and(|check| check())
    }
}

struct NodeFailure {
    state: WorkflowState,
    log: ExecutionLog,
    status: ExecutionStatus,
}

enum InvokeOutcome {
    Finished(anyhow::Result<WorkflowState>),
    TimedOut,
    CancelledInFlight,
}

/// Workflow executor
///
/// Stateless apart from its configuration; one executor can drive any number
/// of concurrent runs.
#[derive(Debug, Clone)]
pub struct Executor {
    node_timeout: Duration,
    cancel_poll_interval: Duration,
}

impl Executor {
    /// Executor with default timeout (30 s) and cancel poll interval (100 ms)
    pub fn new() -> Self {
        Self {
            node_timeout: DEFAULT_NODE_TIMEOUT,
            cancel_poll_interval: DEFAULT_CANCEL_POLL_INTERVAL,
        }
    }

    /// Override the per-node timeout
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    /// Override the cancellation poll interval
    pub fn with_cancel_poll_interval(mut self, interval: Duration) -> Self {
        self.cancel_poll_interval = interval;
        self
    }

    /// Execute the graph and return the final state and logs.
    ///
    /// Failures and cancellations are reported through the returned result:
    /// the final state carries the terminal status and the last log entry
    /// describes what ended the run.
    pub async fn run(
        &self,
        graph: &Graph,
        mut state: WorkflowState,
        hooks: RunHooks,
    ) -> ExecutionResult {
        let mut logs = Vec::new();
        let mut loop_counters: HashMap<(String, String), u32> = HashMap::new();

        state.transition(ExecutionStatus::Running);
        tracing::debug!(run_id = %state.run_id, graph_id = graph.id(), "run started");

        let mut current = Some(graph.start_node().to_string());

        while let Some(node_id) = current.take() {
            if hooks.cancelled() {
                let log = ExecutionLog::cancelled(&node_id, "Run cancelled by user");
                self.emit(&mut logs, &hooks, log);
                state.transition(ExecutionStatus::Cancelled);
                break;
            }

            let node = match graph.node(&node_id) {
                Ok(node) => node,
                Err(err) => {
                    let log =
                        ExecutionLog::failed(&node_id, "Node lookup failed", err.to_string());
                    self.emit(&mut logs, &hooks, log);
                    state.transition(ExecutionStatus::Failed);
                    break;
                }
            };

            match self.invoke(node, state, &hooks).await {
                Ok((next_state, log)) => {
                    state = next_state;
                    self.emit(&mut logs, &hooks, log);
                }
                Err(failure) => {
                    state = failure.state;
                    self.emit(&mut logs, &hooks, failure.log);
                    state.transition(failure.status);
                    break;
                }
            }

            match self.select_next(graph.out_edges(&node_id), &state, &mut loop_counters) {
                Ok(next) => current = next,
                Err(err) => {
                    let message = match &err {
                        ExecutionError::LoopLimitExceeded { .. } => "Loop evaluation failed",
                        _ => "Edge evaluation failed",
                    };
                    tracing::error!(run_id = %state.run_id, node_id = %node_id, error = %err,
                        "successor selection failed");
                    let log = ExecutionLog::failed(&node_id, message, err.to_string());
                    self.emit(&mut logs, &hooks, log);
                    state.transition(ExecutionStatus::Failed);
                    break;
                }
            }
        }

        state.transition(ExecutionStatus::Completed);
        tracing::debug!(run_id = %state.run_id, status = %state.status(), "run finished");

        ExecutionResult {
            run_id: state.run_id,
            final_state: state,
            logs,
        }
    }

    fn emit(&self, logs: &mut Vec<ExecutionLog>, hooks: &RunHooks, log: ExecutionLog) {
        if let Some(hook) = &hooks.log_hook {
            hook(&log);
        }
        logs.push(log);
    }

    /// Execute a single node under the timeout and cancellation contract.
    ///
    /// Asynchronous callables run directly on the scheduler; synchronous ones
    /// are offloaded to a blocking worker so the coordinator stays
    /// responsive. While the node is in flight the cancel checker is polled
    /// at the configured interval; on observing a request the in-flight
    /// future is dropped. Cancellation is best-effort cooperative: a blocking
    /// callable that ignores it keeps running detached.
    async fn invoke(
        &self,
        node: &Node,
        mut state: WorkflowState,
        hooks: &RunHooks,
    ) -> Result<(WorkflowState, ExecutionLog), NodeFailure> {
        if hooks.cancelled() {
            state.record(
                EXECUTOR_NODE_ID,
                Some("Run cancelled before node execution".to_string()),
                Context::new(),
            );
            return Err(NodeFailure {
                log: ExecutionLog::cancelled(EXECUTOR_NODE_ID, "Run cancelled by user"),
                state,
                status: ExecutionStatus::Cancelled,
            });
        }

        let fallback = state.clone();

        let mut fut: BoxFuture<'static, anyhow::Result<WorkflowState>> = match &node.func {
            ToolCallable::Async(f) => f(state),
            ToolCallable::Sync(f) => {
                let f = f.clone();
                let handle = tokio::task::spawn_blocking(move || f(state));
                Box::pin(async move {
                    handle
                        .await
                        .map_err(|e| anyhow::anyhow!("node task panicked: {e}"))?
                })
            }
        };

        let timeout = tokio::time::sleep(self.node_timeout);
        tokio::pin!(timeout);
        let mut poll = tokio::time::interval_at(
            tokio::time::Instant::now() + self.cancel_poll_interval,
            self.cancel_poll_interval,
        );

        let outcome = loop {
            tokio::select! {
                result = &mut fut => break InvokeOutcome::Finished(result),
                _ = &mut timeout => break InvokeOutcome::TimedOut,
                _ = poll.tick() => {
                    if hooks.cancelled() {
                        break InvokeOutcome::CancelledInFlight;
                    }
                }
            }
        };
        drop(fut);

        match outcome {
            InvokeOutcome::Finished(Ok(mut new_state)) => {
                new_state.record(
                    &node.id,
                    Some("Node executed successfully".to_string()),
                    Context::new(),
                );
                Ok((new_state, ExecutionLog::success(&node.id)))
            }
            InvokeOutcome::Finished(Err(err)) => {
                let mut state = fallback;
                let mut data = Context::new();
                data.insert("error".to_string(), json!(err.to_string()));
                state.record(
                    &node.id,
                    Some("Node execution failed".to_string()),
                    data,
                );
                tracing::error!(node_id = %node.id, error = %err, "node execution failed");
                Err(NodeFailure {
                    log: ExecutionLog::failed(&node.id, "Node execution failed", err.to_string()),
                    state,
                    status: ExecutionStatus::Failed,
                })
            }
            InvokeOutcome::TimedOut => {
                let mut state = fallback;
                let mut data = Context::new();
                data.insert("error".to_string(), json!("timeout"));
                state.record(
                    &node.id,
                    Some("Node execution timed out".to_string()),
                    data,
                );
                tracing::error!(node_id = %node.id, timeout = ?self.node_timeout,
                    "node execution timed out");
                Err(NodeFailure {
                    log: ExecutionLog::failed(
                        &node.id,
                        format!(
                            "Node '{}' timed out after {:?}",
                            node.id, self.node_timeout
                        ),
                        "timeout",
                    ),
                    state,
                    status: ExecutionStatus::Failed,
                })
            }
            InvokeOutcome::CancelledInFlight => {
                let mut state = fallback;
                state.record(
                    &node.id,
                    Some("Node execution cancelled".to_string()),
                    Context::new(),
                );
                Err(NodeFailure {
                    log: ExecutionLog::cancelled(&node.id, "Run cancelled by user"),
                    state,
                    status: ExecutionStatus::Cancelled,
                })
            }
        }
    }

    /// Determine the next node: the first edge in declaration order whose
    /// predicate matches wins; no match ends the run.
    fn select_next(
        &self,
        edges: Vec<&Edge>,
        state: &WorkflowState,
        loop_counters: &mut HashMap<(String, String), u32>,
    ) -> Result<Option<String>, ExecutionError> {
        for edge in edges {
            let matched = match edge.edge_type {
                EdgeType::Sequential => true,
                EdgeType::Branch => self.evaluate_branch(edge, state)?,
                EdgeType::Loop => self.should_continue_loop(edge, state, loop_counters)?,
            };
            if matched {
                return Ok(Some(edge.target.clone()));
            }
        }
        Ok(None)
    }

    fn evaluate_branch(&self, edge: &Edge, state: &WorkflowState) -> Result<bool, ExecutionError> {
        match &edge.condition {
            Some(EdgeCondition::Predicate(predicate)) => Ok(predicate(state)),
            Some(EdgeCondition::Expression {
                expression,
                language,
            }) => {
                if language == "python" {
                    Ok(expr::evaluate_truthy(expression, state)?)
                } else {
                    Ok(false)
                }
            }
            None => Ok(false),
        }
    }

    fn should_continue_loop(
        &self,
        edge: &Edge,
        state: &WorkflowState,
        loop_counters: &mut HashMap<(String, String), u32>,
    ) -> Result<bool, ExecutionError> {
        let config = edge.loop_config.clone().unwrap_or_default();

        if let Some(until) = &config.until_expression {
            if expr::evaluate_truthy(until, state)? {
                return Ok(false);
            }
        }

        // Counters are keyed per (source, target) pair so two loops out of
        // the same node are tracked independently
        let counter = loop_counters
            .entry((edge.source.clone(), edge.target.clone()))
            .or_insert(0);
        *counter += 1;
        if *counter > config.max_iterations {
            return Err(ExecutionError::LoopLimitExceeded {
                source_node: edge.source.clone(),
                target: edge.target.clone(),
                max_iterations: config.max_iterations,
            });
        }
        Ok(true)
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::LoopConfig;

    fn edge(edge_type: EdgeType, source: &str, target: &str) -> Edge {
        Edge {
            source: source.to_string(),
            target: target.to_string(),
            edge_type,
            condition: None,
            loop_config: None,
        }
    }

    #[test]
    fn test_sequential_edge_always_matches() {
        let executor = Executor::new();
        let seq = edge(EdgeType::Sequential, "a", "b");
        let state = WorkflowState::new();
        let mut counters = HashMap::new();

        let next = executor.select_next(vec![&seq], &state, &mut counters).unwrap();
        assert_eq!(next, Some("b".to_string()));
    }

    #[test]
    fn test_branch_without_condition_never_matches() {
        let executor = Executor::new();
        let branch = edge(EdgeType::Branch, "a", "b");
        let state = WorkflowState::new();
        let mut counters = HashMap::new();

        let next = executor
            .select_next(vec![&branch], &state, &mut counters)
            .unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn test_sequential_after_branch_acts_as_fallthrough() {
        let executor = Executor::new();
        let mut branch = edge(EdgeType::Branch, "a", "b");
        branch.condition = Some(EdgeCondition::expression("context.get('go', False)"));
        let fallback = edge(EdgeType::Sequential, "a", "c");
        let state = WorkflowState::new();
        let mut counters = HashMap::new();

        let next = executor
            .select_next(vec![&branch, &fallback], &state, &mut counters)
            .unwrap();
        assert_eq!(next, Some("c".to_string()));
    }

    #[test]
    fn test_loop_counters_are_tracked_per_edge_pair() {
        let executor = Executor::new();
        let mut loop_b = edge(EdgeType::Loop, "a", "b");
        loop_b.loop_config = Some(LoopConfig {
            max_iterations: 1,
            until_expression: None,
        });
        let mut loop_c = edge(EdgeType::Loop, "a", "c");
        loop_c.loop_config = Some(LoopConfig {
            max_iterations: 1,
            until_expression: None,
        });
        let state = WorkflowState::new();
        let mut counters = HashMap::new();

        // Each pair has its own budget of one traversal
        assert!(executor
            .should_continue_loop(&loop_b, &state, &mut counters)
            .unwrap());
        assert!(executor
            .should_continue_loop(&loop_c, &state, &mut counters)
            .unwrap());

        let err = executor
            .should_continue_loop(&loop_b, &state, &mut counters)
            .unwrap_err();
        assert!(matches!(err, ExecutionError::LoopLimitExceeded { .. }));
    }

    #[test]
    fn test_loop_until_expression_stops_matching() {
        let executor = Executor::new();
        let mut looping = edge(EdgeType::Loop, "a", "b");
        looping.loop_config = Some(LoopConfig {
            max_iterations: 5,
            until_expression: Some("context.get('done', False)".to_string()),
        });

        let mut state = WorkflowState::new();
        let mut counters = HashMap::new();
        assert!(executor
            .should_continue_loop(&looping, &state, &mut counters)
            .unwrap());

        state.set("done", json!(true));
        assert!(!executor
            .should_continue_loop(&looping, &state, &mut counters)
            .unwrap());
        // The until-exit does not consume loop budget
        assert_eq!(counters[&("a".to_string(), "b".to_string())], 1);
    }

    #[test]
    fn test_non_python_condition_language_is_false() {
        let executor = Executor::new();
        let mut branch = edge(EdgeType::Branch, "a", "b");
        branch.condition = Some(EdgeCondition::Expression {
            expression: "True".to_string(),
            language: "lua".to_string(),
        });
        let state = WorkflowState::new();
        assert!(!executor.evaluate_branch(&branch, &state).unwrap());
    }
}
