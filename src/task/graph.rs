//! Task graphs — one conversation's pending work as dependency-linked tasks.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::QueueError;

use super::node::{Params, TaskNode, TaskStatus};

/// An ordered collection of task nodes sharing a conversation context.
///
/// The graph exclusively owns its nodes; retry and pacing delays are
/// expressed as topology (extra `"wait"` nodes) rather than scheduler
/// special-casing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraph {
    #[serde(rename = "identifier")]
    pub id: String,
    /// Opaque to the scheduler except for the `agent_id`/`channel_id`
    /// convenience lookup on the work queue.
    #[serde(default)]
    pub context: Params,
    #[serde(rename = "nodes", default)]
    pub tasks: Vec<TaskNode>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context: Params::new(),
            tasks: Vec::new(),
        }
    }

    /// Attach a context map (builder style).
    pub fn with_context(mut self, context: Params) -> Self {
        self.context = context;
        self
    }

    /// Append a task. No identifier uniqueness check; that is the caller's
    /// responsibility.
    pub fn add_task(&mut self, task: TaskNode) {
        self.tasks.push(task);
    }

    /// Identifiers of all `Done` nodes.
    pub fn completed_ids(&self) -> HashSet<String> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .map(|t| t.id.clone())
            .collect()
    }

    /// All tasks ready to dispatch at `now`, in insertion order.
    ///
    /// Polls readiness on every node, so a wait node's deadline may be
    /// frozen as a side effect.
    pub fn pending_tasks(&mut self, now: DateTime<Utc>) -> Vec<&TaskNode> {
        let done = self.completed_ids();
        let mut ready = Vec::new();
        for (i, task) in self.tasks.iter_mut().enumerate() {
            if task.is_ready(&done, now) {
                ready.push(i);
            }
        }
        ready.into_iter().map(|i| &self.tasks[i]).collect()
    }

    /// Linear lookup by identifier.
    pub fn get_node(&self, task_id: &str) -> Option<&TaskNode> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Linear mutable lookup by identifier.
    pub fn get_node_mut(&mut self, task_id: &str) -> Option<&mut TaskNode> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    /// True once every node is terminal.
    pub fn is_complete(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// Mark a task `Done`.
    pub fn mark_done(&mut self, task_id: &str) -> Result<(), QueueError> {
        let node = self.node_mut(task_id)?;
        node.status = TaskStatus::Done;
        Ok(())
    }

    /// Cancel a task. A cancelled node is never `Pending`, so it is filtered
    /// out of scheduling implicitly.
    pub fn cancel(&mut self, task_id: &str) -> Result<(), QueueError> {
        let node = self.node_mut(task_id)?;
        node.status = TaskStatus::Cancelled;
        info!(graph_id = %self.id, task_id = %task_id, "Task cancelled");
        Ok(())
    }

    /// Interpose a fresh `"wait"` node before `task_id`.
    ///
    /// The wait node gets a unique generated identifier, the given duration,
    /// and no dependencies; `task_id` gains a dependency on it. Returns the
    /// wait node so callers can annotate it further (e.g. attach a typing
    /// indicator parameter).
    pub fn insert_delay(
        &mut self,
        task_id: &str,
        delay: Duration,
    ) -> Result<&mut TaskNode, QueueError> {
        if self.get_node(task_id).is_none() {
            return Err(QueueError::TaskNotFound {
                graph: self.id.clone(),
                task: task_id.to_string(),
            });
        }

        let wait_id = self.fresh_wait_id();
        let idx = self.tasks.len();
        self.tasks.push(TaskNode::wait(&wait_id, delay));
        if let Some(node) = self.get_node_mut(task_id) {
            node.depends_on.push(wait_id.clone());
        }

        debug!(
            graph_id = %self.id,
            task_id = %task_id,
            wait_id = %wait_id,
            delay_secs = delay.as_secs_f64(),
            "Inserted delay"
        );
        Ok(&mut self.tasks[idx])
    }

    /// Record a failed dispatch of `task_id`.
    ///
    /// Below the retry ceiling the task is re-pended behind a fresh wait
    /// node and `true` is returned. At the ceiling the task becomes
    /// `Failed` and `false` is returned: the caller must drop the whole
    /// graph rather than leave partial work stranded.
    pub fn fail_task(
        &mut self,
        task_id: &str,
        retry_interval: Duration,
        max_retries: u32,
    ) -> Result<bool, QueueError> {
        let retries = self.node_mut(task_id)?.record_retry();

        if retries >= u64::from(max_retries) {
            if let Some(node) = self.get_node_mut(task_id) {
                node.status = TaskStatus::Failed;
            }
            warn!(
                graph_id = %self.id,
                task_id = %task_id,
                retries,
                "Task exhausted its retries; graph must be dropped"
            );
            return Ok(false);
        }

        self.insert_delay(task_id, retry_interval)?;
        if let Some(node) = self.get_node_mut(task_id) {
            node.status = TaskStatus::Pending;
        }
        info!(
            graph_id = %self.id,
            task_id = %task_id,
            retries,
            retry_in_secs = retry_interval.as_secs_f64(),
            "Task failed; retry scheduled"
        );
        Ok(true)
    }

    /// Reset `Active` nodes to `Pending` (snapshot-load recovery: nothing
    /// was actually mid-flight across a restart).
    pub(crate) fn reset_active(&mut self) -> usize {
        let mut reset = 0;
        for task in &mut self.tasks {
            if task.status == TaskStatus::Active {
                task.status = TaskStatus::Pending;
                reset += 1;
            }
        }
        reset
    }

    fn node_mut(&mut self, task_id: &str) -> Result<&mut TaskNode, QueueError> {
        let graph_id = self.id.clone();
        self.get_node_mut(task_id).ok_or(QueueError::TaskNotFound {
            graph: graph_id,
            task: task_id.to_string(),
        })
    }

    /// Generated wait ids are UUID-suffixed; collision is astronomically
    /// unlikely but checked anyway since regeneration is free.
    fn fresh_wait_id(&self) -> String {
        loop {
            let id = format!("wait-{}", Uuid::new_v4());
            if self.get_node(&id).is_none() {
                return id;
            }
        }
    }
}
