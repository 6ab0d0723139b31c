//! Task handlers — the execution side of the scheduler boundary.
//!
//! The scheduler never interprets a task beyond its `type` string. The
//! driver resolves that string through a [`HandlerRegistry`] built at
//! startup; what a task actually *does* lives entirely in the handlers.

pub mod registry;

pub use registry::{HandlerRegistry, ImmediateRegistry};

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::task::{Params, TaskNode};

/// Executes queued tasks of one type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one task. An error feeds the retry path; permanent failure
    /// eventually drops the owning graph.
    async fn run(&self, task: &TaskNode, context: &Params) -> Result<(), HandlerError>;
}

/// Handles tasks inline at submission time instead of queueing them.
#[async_trait]
pub trait ImmediateHandler: Send + Sync {
    /// Attempt to handle the task right now. Returns whether it was handled.
    async fn try_handle(&self, task: &TaskNode, agent_id: &str, channel_id: &str) -> bool;
}

/// Handler for the synthetic `"wait"` type.
///
/// A wait node's whole job is its readiness gate; by the time it is
/// dispatched the deadline has passed, so execution is trivially successful.
#[derive(Debug, Default)]
pub struct WaitHandler;

#[async_trait]
impl TaskHandler for WaitHandler {
    async fn run(&self, _task: &TaskNode, _context: &Params) -> Result<(), HandlerError> {
        Ok(())
    }
}
