//! Handler registries — register once at startup, dispatch by task type.
//!
//! An explicit registry object (built by the embedder and passed to the
//! driver) rather than a global dispatch table.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::HandlerError;
use crate::task::{Params, TaskNode};

use super::{ImmediateHandler, TaskHandler};

/// Registry of queued-task handlers, keyed by task type.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a task type. A later registration for the
    /// same type replaces the earlier one.
    pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let kind = kind.into();
        debug!(kind = %kind, "Registered task handler");
        self.handlers.insert(kind, handler);
    }

    /// Check if a handler is registered for this task type.
    pub fn has(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// List all registered task types.
    pub fn list(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Dispatch a task to its handler.
    ///
    /// `None` means no handler is registered for this type — a
    /// configuration error, distinct from the task-level failure carried in
    /// `Some(Err(..))`.
    pub async fn dispatch(
        &self,
        task: &TaskNode,
        context: &Params,
    ) -> Option<Result<(), HandlerError>> {
        let handler = self.handlers.get(&task.kind)?;
        Some(handler.run(task, context).await)
    }
}

/// The second, separate table: handlers attempted synchronously inline
/// before a task is ever queued.
#[derive(Default)]
pub struct ImmediateRegistry {
    handlers: HashMap<String, Arc<dyn ImmediateHandler>>,
}

impl ImmediateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an immediate handler for a task type.
    pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn ImmediateHandler>) {
        let kind = kind.into();
        debug!(kind = %kind, "Registered immediate handler");
        self.handlers.insert(kind, handler);
    }

    /// Check if an immediate handler is registered for this task type.
    pub fn has(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Attempt inline handling. Returns false when no handler is registered
    /// or the handler declined.
    pub async fn try_handle(&self, task: &TaskNode, agent_id: &str, channel_id: &str) -> bool {
        match self.handlers.get(&task.kind) {
            Some(handler) => handler.try_handle(task, agent_id, channel_id).await,
            None => false,
        }
    }
}
