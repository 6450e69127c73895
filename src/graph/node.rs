//! Node types for the workflow graph

use crate::state::Context;
use crate::tools::ToolCallable;

/// A workflow node wrapping an executable tool callable
#[derive(Clone)]
pub struct Node {
    /// Unique identifier within the graph
    pub id: String,

    /// Human-readable name; defaults to the id
    pub name: String,

    /// Registry name the callable was resolved from
    pub callable: String,

    /// The resolved callable
    pub func: ToolCallable,

    /// Free-form metadata attached by the graph author
    pub metadata: Context,
}

impl Node {
    /// Construct a node, defaulting the display name to the id
    pub fn new(
        id: impl Into<String>,
        name: Option<String>,
        callable: impl Into<String>,
        func: ToolCallable,
        metadata: Context,
    ) -> Self {
        let id = id.into();
        Self {
            name: name.unwrap_or_else(|| id.clone()),
            id,
            callable: callable.into(),
            func,
            metadata,
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("callable", &self.callable)
            .field("func", &self.func)
            .finish()
    }
}
