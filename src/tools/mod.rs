//! Tool registry and callable types
//!
//! A *tool* is a named function that transforms a [`WorkflowState`]. Graph
//! nodes reference tools by name; the registry resolves those names when a
//! graph document is loaded. Tools come in synchronous and asynchronous
//! flavours and the executor accepts either.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::json;
use thiserror::Error;

use crate::state::{Context, WorkflowState};

pub mod code_review;

/// Errors related to tool registration and lookup
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// A tool with the same name is already registered
    #[error("Tool '{0}' is already registered")]
    AlreadyRegistered(String),

    /// No tool is registered under the requested name
    #[error("Tool '{0}' is not registered")]
    NotFound(String),
}

/// Synchronous tool function signature
pub type SyncToolFn = dyn Fn(WorkflowState) -> anyhow::Result<WorkflowState> + Send + Sync;

/// Asynchronous tool function signature (boxed future form)
pub type AsyncToolFn =
    dyn Fn(WorkflowState) -> BoxFuture<'static, anyhow::Result<WorkflowState>> + Send + Sync;

/// Trait for implementing asynchronous tools as types
#[async_trait]
pub trait Tool: Send + Sync {
    /// Transform the workflow state
    async fn call(&self, state: WorkflowState) -> anyhow::Result<WorkflowState>;
}

/// A registered callable, either synchronous or asynchronous.
///
/// Synchronous callables are offloaded to a blocking worker by the executor;
/// asynchronous callables run directly on the scheduler.
#[derive(Clone)]
pub enum ToolCallable {
    /// Synchronous function
    Sync(Arc<SyncToolFn>),
    /// Asynchronous function
    Async(Arc<AsyncToolFn>),
}

impl ToolCallable {
    /// Wrap a synchronous closure
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(WorkflowState) -> anyhow::Result<WorkflowState> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wrap an asynchronous closure
    pub fn async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(WorkflowState) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<WorkflowState>> + Send + 'static,
    {
        Self::Async(Arc::new(move |state| Box::pin(f(state))))
    }

    /// Wrap a [`Tool`] implementation
    pub fn from_tool(tool: Arc<dyn Tool>) -> Self {
        Self::Async(Arc::new(move |state| {
            let tool = tool.clone();
            Box::pin(async move { tool.call(state).await })
        }))
    }
}

impl std::fmt::Debug for ToolCallable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("ToolCallable::Sync"),
            Self::Async(_) => f.write_str("ToolCallable::Async"),
        }
    }
}

/// Registry mapping tool names to callables.
///
/// Registrations typically happen at startup; the registry is safe to share
/// across tasks afterwards.
pub struct ToolRegistry {
    tools: DashMap<String, ToolCallable>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
        }
    }

    /// Register a callable under the provided name.
    ///
    /// Fails if the name is already taken.
    pub fn register(
        &self,
        name: impl Into<String>,
        callable: ToolCallable,
    ) -> Result<(), ToolError> {
        let name = name.into();
        match self.tools.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ToolError::AlreadyRegistered(name))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(callable);
                Ok(())
            }
        }
    }

    /// Register a synchronous closure
    pub fn register_fn<F>(&self, name: impl Into<String>, f: F) -> Result<(), ToolError>
    where
        F: Fn(WorkflowState) -> anyhow::Result<WorkflowState> + Send + Sync + 'static,
    {
        self.register(name, ToolCallable::sync(f))
    }

    /// Register an asynchronous closure
    pub fn register_async<F, Fut>(&self, name: impl Into<String>, f: F) -> Result<(), ToolError>
    where
        F: Fn(WorkflowState) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<WorkflowState>> + Send + 'static,
    {
        self.register(name, ToolCallable::async_fn(f))
    }

    /// Register a [`Tool`] implementation
    pub fn register_tool(
        &self,
        name: impl Into<String>,
        tool: Arc<dyn Tool>,
    ) -> Result<(), ToolError> {
        self.register(name, ToolCallable::from_tool(tool))
    }

    /// Remove a registered tool; silent no-op when absent
    pub fn unregister(&self, name: &str) {
        self.tools.remove(name);
    }

    /// Retrieve a registered callable by name
    pub fn get(&self, name: &str) -> Result<ToolCallable, ToolError> {
        self.tools
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Check whether a tool name is registered
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List registered tool names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register the minimal set of default tools (`tools.noop`, `tools.approve`).
///
/// Names that are already taken are left untouched.
pub fn register_builtins(registry: &ToolRegistry) {
    if !registry.has("tools.noop") {
        let _ = registry.register_fn("tools.noop", |mut state| {
            state.record("noop", Some("No-op tool executed".to_string()), Context::new());
            Ok(state)
        });
    }
    if !registry.has("tools.approve") {
        let _ = registry.register_fn("tools.approve", |mut state| {
            state.set("approved", json!(true));
            Ok(state)
        });
    }
}
