//! Orchestration service
//!
//! [`WorkflowService`] glues the pieces together: graph documents are
//! validated against the tool registry and stored, runs are created as
//! records, handed to the executor (inline or on a background task), and
//! every emitted log is appended to the record and published to the log
//! stream hub. This is the surface a transport adapter (HTTP, WebSocket,
//! CLI) wraps.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::engine::{ExecutionLog, Executor, RunHooks};
use crate::graph::{Graph, GraphDocument};
use crate::state::{Context, ExecutionStatus, WorkflowState};
use crate::store::{GraphStore, RunPatch, RunRecord, RunStore, StoreError};
use crate::stream::{LogStreamHub, StreamEvent};
use crate::tools::ToolRegistry;

/// Install a process-wide tracing subscriber honouring `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Request to launch a workflow run
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchRequest {
    /// Graph to execute
    pub graph_id: String,

    /// Initial context handed to the run
    #[serde(default)]
    pub initial_state: Context,

    /// Execute on a background task instead of inline
    #[serde(default)]
    pub background: bool,
}

impl LaunchRequest {
    /// A foreground launch with the given initial context
    pub fn new(graph_id: impl Into<String>, initial_state: Context) -> Self {
        Self {
            graph_id: graph_id.into(),
            initial_state,
            background: false,
        }
    }

    /// Switch the launch to a background task
    pub fn in_background(mut self) -> Self {
        self.background = true;
        self
    }
}

/// Summary returned when a run is scheduled, finished, or cancelled
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    /// Run identifier
    pub run_id: String,

    /// Graph the run executes
    pub graph_id: String,

    /// Lifecycle status at the time of the reply
    pub status: ExecutionStatus,
}

/// Run state and accumulated logs
#[derive(Debug, Clone, Serialize)]
pub struct RunStateView {
    /// Run identifier
    pub run_id: String,

    /// Graph the run executes
    pub graph_id: String,

    /// Lifecycle status
    pub status: ExecutionStatus,

    /// Run context; the final context once the run is terminal
    pub context: Context,

    /// Log entries in execution order
    pub logs: Vec<ExecutionLog>,
}

struct ServiceInner {
    registry: Arc<ToolRegistry>,
    graphs: GraphStore,
    runs: RunStore,
    hub: LogStreamHub,
    executor: Executor,
}

/// The workflow engine's orchestration surface
#[derive(Clone)]
pub struct WorkflowService {
    inner: Arc<ServiceInner>,
}

impl WorkflowService {
    /// Service over the given tool registry with a default executor
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_executor(registry, Executor::new())
    }

    /// Service over the given tool registry and executor configuration
    pub fn with_executor(registry: Arc<ToolRegistry>, executor: Executor) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                registry,
                graphs: GraphStore::new(),
                runs: RunStore::new(),
                hub: LogStreamHub::new(),
                executor,
            }),
        }
    }

    /// The tool registry backing graph validation
    pub fn registry(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    /// The graph store
    pub fn graph_store(&self) -> &GraphStore {
        &self.inner.graphs
    }

    /// The run store
    pub fn run_store(&self) -> &RunStore {
        &self.inner.runs
    }

    /// The log stream hub
    pub fn hub(&self) -> &LogStreamHub {
        &self.inner.hub
    }

    /// Validate and register a workflow graph; returns its id.
    ///
    /// Fails with *already-exists* on an id collision and with a validation
    /// error when the document is malformed or references unregistered
    /// callables.
    pub fn create_graph(&self, document: GraphDocument) -> crate::Result<String> {
        if self.inner.graphs.contains(&document.id) {
            return Err(StoreError::GraphAlreadyExists(document.id).into());
        }

        let graph = Graph::from_document(&document, &self.inner.registry)?;
        let graph_id = graph.id().to_string();
        self.inner.graphs.insert(document)?;
        tracing::info!(graph_id = %graph_id, "registered graph");
        Ok(graph_id)
    }

    /// Launch a workflow run.
    ///
    /// With `background = false` this blocks until the run is terminal and
    /// reports the terminal status; with `background = true` it returns
    /// `pending` immediately and the run proceeds on a spawned task.
    pub async fn launch_run(&self, request: LaunchRequest) -> crate::Result<RunSummary> {
        if !self.inner.graphs.contains(&request.graph_id) {
            return Err(StoreError::GraphNotFound(request.graph_id).into());
        }

        let state = WorkflowState::with_context(request.initial_state);
        let run_id = Uuid::new_v4().to_string();
        let record = RunRecord::new(&run_id, &request.graph_id, state);
        let status = record.status;
        self.inner.runs.create(record)?;

        if request.background {
            let inner = self.inner.clone();
            let task_run_id = run_id.clone();
            let graph_id = request.graph_id.clone();
            tokio::spawn(async move {
                execute_run(inner, task_run_id, graph_id).await;
            });
            return Ok(RunSummary {
                run_id,
                graph_id: request.graph_id,
                status,
            });
        }

        execute_run(self.inner.clone(), run_id.clone(), request.graph_id.clone()).await;
        let record = self.inner.runs.get(&run_id)?;
        Ok(RunSummary {
            run_id,
            graph_id: request.graph_id,
            status: record.status,
        })
    }

    /// Return run status, context, and accumulated logs
    pub fn get_run_state(&self, run_id: &str) -> crate::Result<RunStateView> {
        let record = self.inner.runs.get(run_id)?;
        let context = match &record.result {
            Some(result) => result.final_state.context.clone(),
            None => record.state.context.clone(),
        };
        Ok(RunStateView {
            run_id: record.run_id,
            graph_id: record.graph_id,
            status: record.status,
            context,
            logs: record.logs,
        })
    }

    /// Request cancellation of an active run.
    ///
    /// Fails with *not-found* for unknown runs and with *conflict* when the
    /// run already reached a terminal status.
    pub fn cancel_run(&self, run_id: &str) -> crate::Result<RunSummary> {
        let record = self.inner.runs.get(run_id)?;
        if record.status.is_terminal() {
            return Err(StoreError::Conflict(run_id.to_string()).into());
        }

        let record = self.inner.runs.request_cancel(run_id)?;
        self.inner
            .hub
            .publish(run_id, StreamEvent::status(ExecutionStatus::Cancelled));
        tracing::info!(run_id = %run_id, "cancellation requested");

        Ok(RunSummary {
            run_id: record.run_id,
            graph_id: record.graph_id,
            status: ExecutionStatus::Cancelled,
        })
    }

    /// Subscribe to a run's event stream.
    ///
    /// The stream first yields every log already accumulated in the record,
    /// then each newly-published log or status event in publication order,
    /// and ends after the first status event carrying a terminal status.
    pub fn subscribe_logs(
        &self,
        run_id: &str,
    ) -> crate::Result<UnboundedReceiverStream<StreamEvent>> {
        let inner = self.inner.clone();

        // Register before snapshotting the record so nothing is missed; an
        // event landing in between may be delivered twice
        let mut subscription = inner.hub.register(run_id);
        let record = match inner.runs.get(run_id) {
            Ok(record) => record,
            Err(err) => {
                inner.hub.unregister(run_id, subscription.id());
                return Err(err.into());
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            let mut open = true;
            for log in record.logs {
                if tx.send(StreamEvent::log(log)).is_err() {
                    open = false;
                    break;
                }
            }

            if open {
                if record.status.is_terminal() {
                    let _ = tx.send(StreamEvent::status(record.status));
                } else {
                    while let Some(event) = subscription.recv().await {
                        let terminal = event.is_terminal_status();
                        if tx.send(event).is_err() || terminal {
                            break;
                        }
                    }
                }
            }

            inner.hub.unregister(&run_id, subscription.id());
        });

        Ok(UnboundedReceiverStream::new(rx))
    }
}

/// Drive one run to a terminal status, mirroring every log into the record
/// and the hub.
async fn execute_run(inner: Arc<ServiceInner>, run_id: String, graph_id: String) {
    if let Err(err) = run_to_completion(&inner, &run_id, &graph_id).await {
        tracing::error!(run_id = %run_id, error = %err, "run failed outside the executor");
        let _ = inner
            .runs
            .update(&run_id, RunPatch::new().with_status(ExecutionStatus::Failed));
        inner.hub.publish(
            &run_id,
            StreamEvent::Status {
                status: ExecutionStatus::Failed,
                error: Some(err.to_string()),
            },
        );
    }
}

async fn run_to_completion(
    inner: &Arc<ServiceInner>,
    run_id: &str,
    graph_id: &str,
) -> crate::Result<()> {
    let document = inner.graphs.get(graph_id)?;
    let graph = Graph::from_document(&document, &inner.registry)?;
    let record = inner.runs.get(run_id)?;

    let hooks = RunHooks::new()
        .with_log_hook({
            let inner = inner.clone();
            let run_id = run_id.to_string();
            move |log: &ExecutionLog| {
                let _ = inner.runs.append_log(&run_id, log.clone());
                inner.hub.publish(&run_id, StreamEvent::log(log.clone()));
            }
        })
        .with_cancel_checker({
            let inner = inner.clone();
            let run_id = run_id.to_string();
            move || inner.runs.is_cancelled(&run_id)
        });

    inner
        .runs
        .update(run_id, RunPatch::new().with_status(ExecutionStatus::Running))?;
    // A cancellation may have landed since the record was read; the status
    // write above is a no-op in that case, so announce what actually stuck
    let started = inner.runs.get(run_id)?.status;
    inner.hub.publish(run_id, StreamEvent::status(started));

    let result = inner.executor.run(&graph, record.state.clone(), hooks).await;
    let final_status = result.final_state.status();

    inner.runs.update(
        run_id,
        RunPatch::new()
            .with_status(final_status)
            .with_logs(result.logs.clone())
            .with_result(result),
    )?;

    // A concurrent cancellation may have reached the record first; announce
    // whatever status actually stuck
    let effective = inner.runs.get(run_id)?.status;
    tracing::info!(run_id = %run_id, status = %effective, "run finished");
    inner.hub.publish(run_id, StreamEvent::status(effective));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::register_builtins;
    use serde_json::json;

    fn service() -> WorkflowService {
        let registry = Arc::new(ToolRegistry::new());
        register_builtins(&registry);
        WorkflowService::new(registry)
    }

    fn document(id: &str) -> GraphDocument {
        GraphDocument::from_value(json!({
            "id": id,
            "name": "Graph",
            "start_node": "start",
            "nodes": [
                {"id": "start", "callable": "tools.noop"},
                {"id": "finish", "callable": "tools.approve"}
            ],
            "edges": [{"from": "start", "to": "finish"}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_graph_rejects_duplicates() {
        let service = service();
        assert_eq!(service.create_graph(document("g1")).unwrap(), "g1");

        let err = service.create_graph(document("g1")).unwrap_err();
        assert!(matches!(
            err,
            crate::WorkflowError::Store(StoreError::GraphAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_create_graph_rejects_unknown_callable() {
        let service = service();
        let mut doc = document("g1");
        doc.nodes[0].callable = "tools.nope".to_string();

        let err = service.create_graph(doc).unwrap_err();
        assert!(matches!(err, crate::WorkflowError::Graph(_)));
        assert!(!service.graph_store().contains("g1"));
    }

    #[tokio::test]
    async fn test_launch_run_unknown_graph_fails() {
        let service = service();
        let err = service
            .launch_run(LaunchRequest::new("missing", Context::new()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::WorkflowError::Store(StoreError::GraphNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_foreground_run_reports_terminal_status() {
        let service = service();
        service.create_graph(document("g1")).unwrap();

        let summary = service
            .launch_run(LaunchRequest::new("g1", Context::new()))
            .await
            .unwrap();
        assert_eq!(summary.status, ExecutionStatus::Completed);

        let view = service.get_run_state(&summary.run_id).unwrap();
        assert_eq!(view.status, ExecutionStatus::Completed);
        assert_eq!(view.context.get("approved"), Some(&json!(true)));
        assert_eq!(view.logs.len(), 2);
    }
}
