//! Error types for the scheduler.

/// Top-level error type for the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),
}

/// Queue and graph bookkeeping errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Task graph {id} not found")]
    GraphNotFound { id: String },

    #[error("Task {task} not found in graph {graph}")]
    TaskNotFound { graph: String, task: String },
}

/// Snapshot persistence errors.
///
/// A malformed snapshot is a hard failure: `load` never attempts partial
/// recovery. The `.bak` sibling exists for manual repair.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed snapshot document: {reason}")]
    MalformedDocument { reason: String },

    #[error("Malformed graph block: {0}")]
    Json(#[from] serde_json::Error),
}

/// Task handler execution errors.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("No handler registered for task type {kind}")]
    NotRegistered { kind: String },

    #[error("Handler for task type {kind} failed: {reason}")]
    Failed { kind: String, reason: String },
}

/// Result type alias for the scheduler.
pub type Result<T> = std::result::Result<T, Error>;
