//! Driver loop — pulls ready tasks off the work queue and runs their
//! handlers, reporting success or failure back into the graph.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::handlers::HandlerRegistry;
use crate::queue::{FailOutcome, WorkQueue};

/// Drives the work queue: one dispatched task per `tick_once`.
///
/// The driver processes one task at a time; all queue mutations go through
/// `WorkQueue` methods, which take the queue lock, so running extra driver
/// workers is safe but unnecessary.
pub struct Driver {
    queue: Arc<WorkQueue>,
    handlers: Arc<HandlerRegistry>,
    config: SchedulerConfig,
}

impl Driver {
    /// Create a driver over a queue and a handler registry.
    pub fn new(
        queue: Arc<WorkQueue>,
        handlers: Arc<HandlerRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            queue,
            handlers,
            config,
        }
    }

    /// Run one scheduling step. Returns whether a task was dispatched.
    pub async fn tick_once(&self) -> bool {
        let Some(task) = self.queue.round_robin_one_task(Utc::now()) else {
            return false;
        };

        match self.handlers.dispatch(&task.node, &task.context).await {
            None => {
                // Configuration error, not a task failure: the node stays
                // active and reverts to pending on the next snapshot load.
                error!(
                    kind = %task.node.kind,
                    graph_id = %task.graph_id,
                    task_id = %task.node.id,
                    "No handler registered for task type"
                );
            }
            Some(Ok(())) => match self.queue.complete_task(&task.graph_id, &task.node.id) {
                Ok(done) if done.graph_removed => {
                    info!(graph_id = %task.graph_id, "Conversation work finished");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        graph_id = %task.graph_id,
                        task_id = %task.node.id,
                        error = %e,
                        "Completed task no longer in queue"
                    );
                }
            },
            Some(Err(e)) => {
                warn!(
                    graph_id = %task.graph_id,
                    task_id = %task.node.id,
                    error = %e,
                    "Task handler failed"
                );
                match self.queue.fail_task(
                    &task.graph_id,
                    &task.node.id,
                    self.config.retry_interval,
                    self.config.max_retries,
                ) {
                    Ok(FailOutcome::Retrying) | Ok(FailOutcome::GraphDropped) => {}
                    Err(e) => {
                        warn!(
                            graph_id = %task.graph_id,
                            task_id = %task.node.id,
                            error = %e,
                            "Failed task no longer in queue"
                        );
                    }
                }
            }
        }
        true
    }

    /// Spawn the driver as a background loop: drain everything currently
    /// ready, then idle for one tick interval.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.tick_interval);
            loop {
                while self.tick_once().await {}
                interval.tick().await;
            }
        })
    }
}

/// Spawn a background task that periodically snapshots the queue.
pub fn spawn_snapshot_task(
    queue: Arc<WorkQueue>,
    path: PathBuf,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = queue.save(&path) {
                warn!(path = %path.display(), error = %e, "Snapshot save failed");
            }
        }
    })
}
