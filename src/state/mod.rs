//! Workflow state carried along a single run
//!
//! A run owns exactly one [`WorkflowState`]: a mutable context tree that tool
//! callables read and write, an append-only history of snapshots, and the
//! run lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use uuid::Uuid;

/// Mutable key/value context shared by the nodes of a run
pub type Context = serde_json::Map<String, Value>;

/// Lifecycle status of a workflow run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Run created but not yet started
    Pending,
    /// Run is traversing the graph
    Running,
    /// Run finished normally
    Completed,
    /// Run finished with an error
    Failed,
    /// Run was cancelled by request
    Cancelled,
}

impl ExecutionStatus {
    /// Whether this status is terminal (frozen once reached)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed | Self::Cancelled => 2,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Immutable record of state at a point in the run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Node that produced this snapshot
    pub node_id: String,

    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,

    /// Optional human-readable note
    pub message: Option<String>,

    /// Structured data attached to the snapshot
    pub data: Context,
}

/// Shared mutable workflow state passed between nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Unique identifier of the run this state belongs to
    pub run_id: Uuid,

    status: ExecutionStatus,

    /// Context tree freely read and mutated by tool callables
    pub context: Context,

    /// Append-only execution history
    pub history: SmallVec<[StateSnapshot; 8]>,
}

impl WorkflowState {
    /// Create a fresh pending state with an empty context
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            context: Context::new(),
            history: SmallVec::new(),
        }
    }

    /// Create a fresh pending state with the given initial context
    pub fn with_context(context: Context) -> Self {
        Self {
            context,
            ..Self::new()
        }
    }

    /// Current lifecycle status
    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// Advance the lifecycle status.
    ///
    /// Transitions are monotone: the status never moves backwards, and once a
    /// terminal status is reached further transitions are ignored (the first
    /// terminal status wins).
    pub fn transition(&mut self, next: ExecutionStatus) {
        if self.status.is_terminal() || next.rank() < self.status.rank() {
            return;
        }
        self.status = next;
    }

    /// Read a context value by key
    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    /// Write a context value
    #[inline]
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.context.insert(key.into(), value);
    }

    /// Merge multiple entries into the context
    pub fn update_context(&mut self, entries: impl IntoIterator<Item = (String, Value)>) {
        for (key, value) in entries {
            self.context.insert(key, value);
        }
    }

    /// Append a snapshot to the execution history
    pub fn record(
        &mut self,
        node_id: impl Into<String>,
        message: impl Into<Option<String>>,
        data: Context,
    ) {
        self.history.push(StateSnapshot {
            node_id: node_id.into(),
            timestamp: Utc::now(),
            message: message.into(),
            data,
        });
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}
