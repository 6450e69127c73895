//! In-memory graph and run stores
//!
//! The [`GraphStore`] keeps registered graph documents keyed by id. The
//! [`RunStore`] keeps one record per run and serializes all mutation of a
//! record through a per-run mutex embedded in its entry, so operations on
//! distinct runs are fully parallel. Critical sections never await, so the
//! record mutex is a blocking one; that also lets the executor's synchronous
//! log hook append directly.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;

use crate::engine::{ExecutionLog, ExecutionResult};
use crate::graph::GraphDocument;
use crate::state::{ExecutionStatus, WorkflowState};

/// Errors raised by the graph and run stores
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// No run exists under the given id
    #[error("Run '{0}' not found")]
    RunNotFound(String),

    /// No graph exists under the given id
    #[error("Graph '{0}' not found")]
    GraphNotFound(String),

    /// A graph with the same id is already stored
    #[error("Graph '{0}' already exists")]
    GraphAlreadyExists(String),

    /// A run with the same id is already stored
    #[error("Run '{0}' already exists")]
    RunAlreadyExists(String),

    /// The run already reached a terminal status
    #[error("Run '{0}' is already finished")]
    Conflict(String),
}

/// Tracks execution metadata and resulting state for one run
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    /// Run identifier
    pub run_id: String,

    /// Graph the run executes
    pub graph_id: String,

    /// Workflow state handed to the executor
    pub state: WorkflowState,

    /// Lifecycle status as seen by the API
    pub status: ExecutionStatus,

    /// Log entries accumulated so far, in execution order
    pub logs: Vec<ExecutionLog>,

    /// Final result, present once the run is terminal
    pub result: Option<ExecutionResult>,

    /// Whether cancellation has been requested
    pub cancelled: bool,
}

impl RunRecord {
    /// A fresh pending record
    pub fn new(
        run_id: impl Into<String>,
        graph_id: impl Into<String>,
        state: WorkflowState,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            graph_id: graph_id.into(),
            state,
            status: ExecutionStatus::Pending,
            logs: Vec::new(),
            result: None,
            cancelled: false,
        }
    }
}

/// Partial update applied to a run record
#[derive(Default)]
pub struct RunPatch {
    /// New lifecycle status; ignored once the record is terminal
    pub status: Option<ExecutionStatus>,

    /// Replacement log sequence
    pub logs: Option<Vec<ExecutionLog>>,

    /// Final execution result
    pub result: Option<ExecutionResult>,
}

impl RunPatch {
    /// An empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status field
    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Replace the log sequence
    pub fn with_logs(mut self, logs: Vec<ExecutionLog>) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Set the final result
    pub fn with_result(mut self, result: ExecutionResult) -> Self {
        self.result = Some(result);
        self
    }
}

/// In-memory store for workflow run records
pub struct RunStore {
    runs: DashMap<String, Arc<Mutex<RunRecord>>>,
}

impl RunStore {
    /// An empty store
    pub fn new() -> Self {
        Self {
            runs: DashMap::new(),
        }
    }

    fn entry(&self, run_id: &str) -> Result<Arc<Mutex<RunRecord>>, StoreError> {
        self.runs
            .get(run_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))
    }

    /// Persist a new run record
    pub fn create(&self, record: RunRecord) -> Result<(), StoreError> {
        let run_id = record.run_id.clone();
        match self.runs.entry(run_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StoreError::RunAlreadyExists(run_id))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(record)));
                Ok(())
            }
        }
    }

    /// Fetch a snapshot of a run record
    pub fn get(&self, run_id: &str) -> Result<RunRecord, StoreError> {
        let entry = self.entry(run_id)?;
        let record = entry.lock();
        Ok(record.clone())
    }

    /// Apply a partial update to a run record.
    ///
    /// Status writes never regress a terminal status: the first terminal
    /// status wins and later writes are ignored.
    pub fn update(&self, run_id: &str, patch: RunPatch) -> Result<(), StoreError> {
        let entry = self.entry(run_id)?;
        let mut record = entry.lock();
        if let Some(status) = patch.status {
            if !record.status.is_terminal() {
                record.status = status;
            }
        }
        if let Some(logs) = patch.logs {
            record.logs = logs;
        }
        if let Some(result) = patch.result {
            record.result = Some(result);
        }
        Ok(())
    }

    /// Append a single log entry to a run record
    pub fn append_log(&self, run_id: &str, log: ExecutionLog) -> Result<(), StoreError> {
        let entry = self.entry(run_id)?;
        entry.lock().logs.push(log);
        Ok(())
    }

    /// Mark a run for cancellation.
    ///
    /// Sets the cancelled flag and, unless the run already reached a terminal
    /// status, flips the status to cancelled. Idempotent.
    pub fn request_cancel(&self, run_id: &str) -> Result<RunRecord, StoreError> {
        let entry = self.entry(run_id)?;
        let mut record = entry.lock();
        record.cancelled = true;
        if !record.status.is_terminal() {
            record.status = ExecutionStatus::Cancelled;
        }
        Ok(record.clone())
    }

    /// Whether cancellation has been requested for the run.
    ///
    /// Unknown runs read as not cancelled; the executor polls this through a
    /// closure that outlives API-level existence checks.
    pub fn is_cancelled(&self, run_id: &str) -> bool {
        self.runs
            .get(run_id)
            .map(|entry| entry.value().lock().cancelled)
            .unwrap_or(false)
    }
}

impl Default for RunStore {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory store for registered graph documents
pub struct GraphStore {
    graphs: RwLock<HashMap<String, GraphDocument>>,
}

impl GraphStore {
    /// An empty store
    pub fn new() -> Self {
        Self {
            graphs: RwLock::new(HashMap::new()),
        }
    }

    /// Persist a graph document; fails if its id is already taken
    pub fn insert(&self, document: GraphDocument) -> Result<(), StoreError> {
        let mut graphs = self.graphs.write();
        if graphs.contains_key(&document.id) {
            return Err(StoreError::GraphAlreadyExists(document.id));
        }
        graphs.insert(document.id.clone(), document);
        Ok(())
    }

    /// Retrieve a stored graph document
    pub fn get(&self, graph_id: &str) -> Result<GraphDocument, StoreError> {
        self.graphs
            .read()
            .get(graph_id)
            .cloned()
            .ok_or_else(|| StoreError::GraphNotFound(graph_id.to_string()))
    }

    /// Check whether a graph id is stored
    pub fn contains(&self, graph_id: &str) -> bool {
        self.graphs.read().contains_key(graph_id)
    }

    /// Ids of all stored graphs, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.graphs.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}
