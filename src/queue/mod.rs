//! Work queue — round-robin scheduling across all live task graphs.
//!
//! The queue is the single shared mutable resource: one coarse mutex guards
//! the graph list and the rotation cursor. The scan is O(graphs) and does no
//! I/O, so fine-grained locking buys nothing here.

pub mod snapshot;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{QueueError, SnapshotError};
use crate::task::{Params, TaskGraph, TaskNode, TaskStatus};

/// A task selected for dispatch, detached from the queue lock.
///
/// Carries clones of the node and the owning graph's context so neither the
/// driver nor the handler holds the lock while the task runs.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub graph_id: String,
    pub context: Params,
    pub node: TaskNode,
}

/// Outcome of completing a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Whether the owning graph finished and was retired from the queue.
    pub graph_removed: bool,
}

/// Outcome of reporting a dispatched task as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The task was re-pended behind a fresh wait node.
    Retrying,
    /// The retry ceiling was hit; the graph was dropped from the queue.
    GraphDropped,
}

#[derive(Debug, Default)]
struct QueueInner {
    graphs: Vec<TaskGraph>,
    /// Rotation cursor. In-memory only: it resets to 0 on restart, which is
    /// acceptable since fairness is a soft guarantee.
    last_index: usize,
}

/// The process-wide scheduler: all live task graphs plus the rotation cursor.
#[derive(Debug, Default)]
pub struct WorkQueue {
    inner: Mutex<QueueInner>,
}

impl WorkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        // Poison recovery: the graph list stays structurally valid.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Select the next ready task in round-robin rotation.
    ///
    /// Starting at the cursor, each graph is visited at most once. The first
    /// graph with a ready task yields its first ready task (graph insertion
    /// order), the task transitions `Pending → Active`, and the cursor
    /// advances past that graph so the next call favors the next one.
    pub fn round_robin_one_task(&self, now: DateTime<Utc>) -> Option<ScheduledTask> {
        let mut inner = self.lock();
        let len = inner.graphs.len();
        if len == 0 {
            return None;
        }

        let start = inner.last_index % len;
        for offset in 0..len {
            let pos = (start + offset) % len;
            let scheduled = {
                let graph = &mut inner.graphs[pos];
                let done = graph.completed_ids();
                let mut selected = None;
                for task in graph.tasks.iter_mut() {
                    if task.is_ready(&done, now) {
                        task.status = TaskStatus::Active;
                        selected = Some(ScheduledTask {
                            graph_id: graph.id.clone(),
                            context: graph.context.clone(),
                            node: task.clone(),
                        });
                        break;
                    }
                }
                selected
            };
            if let Some(scheduled) = scheduled {
                inner.last_index = pos + 1;
                debug!(
                    graph_id = %scheduled.graph_id,
                    task_id = %scheduled.node.id,
                    kind = %scheduled.node.kind,
                    "Selected task for dispatch"
                );
                return Some(scheduled);
            }
        }
        None
    }

    /// Add a graph to the queue.
    pub fn add_graph(&self, graph: TaskGraph) {
        info!(graph_id = %graph.id, tasks = graph.tasks.len(), "Added task graph");
        self.lock().graphs.push(graph);
    }

    /// Remove a graph by identifier, returning it if present.
    pub fn remove_graph(&self, graph_id: &str) -> Option<TaskGraph> {
        let mut inner = self.lock();
        let pos = inner.graphs.iter().position(|g| g.id == graph_id)?;
        let graph = inner.graphs.remove(pos);
        info!(graph_id = %graph.id, "Removed task graph");
        Some(graph)
    }

    /// Bulk-remove every graph whose context matches the predicate (e.g. all
    /// graphs for an agent being deleted). Returns the number removed.
    pub fn remove_all<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Params) -> bool,
    {
        let mut inner = self.lock();
        let before = inner.graphs.len();
        inner.graphs.retain(|g| !predicate(&g.context));
        let removed = before - inner.graphs.len();
        if removed > 0 {
            info!(removed, "Bulk-removed task graphs");
        }
        removed
    }

    /// Reverse lookup: the id of the first graph containing `task_id`.
    pub fn graph_containing(&self, task_id: &str) -> Option<String> {
        self.lock()
            .graphs
            .iter()
            .find(|g| g.get_node(task_id).is_some())
            .map(|g| g.id.clone())
    }

    /// Convenience index into the otherwise-opaque context map: the graph
    /// whose context carries this `agent_id`/`channel_id` pair.
    pub fn graph_for_conversation(&self, agent_id: &str, channel_id: &str) -> Option<String> {
        self.lock()
            .graphs
            .iter()
            .find(|g| {
                g.context.get("agent_id").and_then(Value::as_str) == Some(agent_id)
                    && g.context.get("channel_id").and_then(Value::as_str) == Some(channel_id)
            })
            .map(|g| g.id.clone())
    }

    /// Run a closure against a live graph under the queue lock. External
    /// callers use this to add tasks to a graph without racing the scan.
    pub fn with_graph_mut<F, T>(&self, graph_id: &str, f: F) -> Result<T, QueueError>
    where
        F: FnOnce(&mut TaskGraph) -> T,
    {
        let mut inner = self.lock();
        let graph = inner
            .graphs
            .iter_mut()
            .find(|g| g.id == graph_id)
            .ok_or_else(|| QueueError::GraphNotFound {
                id: graph_id.to_string(),
            })?;
        Ok(f(graph))
    }

    /// Mark a dispatched task `Done`; retire the graph if that completed it.
    pub fn complete_task(&self, graph_id: &str, task_id: &str) -> Result<Completion, QueueError> {
        let mut inner = self.lock();
        let pos = inner
            .graphs
            .iter()
            .position(|g| g.id == graph_id)
            .ok_or_else(|| QueueError::GraphNotFound {
                id: graph_id.to_string(),
            })?;

        inner.graphs[pos].mark_done(task_id)?;
        if inner.graphs[pos].is_complete() {
            let graph = inner.graphs.remove(pos);
            info!(graph_id = %graph.id, "Task graph complete; retired");
            return Ok(Completion {
                graph_removed: true,
            });
        }
        Ok(Completion {
            graph_removed: false,
        })
    }

    /// Report a dispatched task as failed.
    ///
    /// Below the retry ceiling the task is re-pended behind a wait node; at
    /// the ceiling the whole graph is dropped.
    pub fn fail_task(
        &self,
        graph_id: &str,
        task_id: &str,
        retry_interval: Duration,
        max_retries: u32,
    ) -> Result<FailOutcome, QueueError> {
        let mut inner = self.lock();
        let pos = inner
            .graphs
            .iter()
            .position(|g| g.id == graph_id)
            .ok_or_else(|| QueueError::GraphNotFound {
                id: graph_id.to_string(),
            })?;

        if inner.graphs[pos].fail_task(task_id, retry_interval, max_retries)? {
            Ok(FailOutcome::Retrying)
        } else {
            let graph = inner.graphs.remove(pos);
            warn!(
                graph_id = %graph.id,
                task_id = %task_id,
                "Dropped task graph after retry ceiling"
            );
            Ok(FailOutcome::GraphDropped)
        }
    }

    /// Cancel a single task.
    pub fn cancel_task(&self, graph_id: &str, task_id: &str) -> Result<(), QueueError> {
        self.with_graph_mut(graph_id, |g| g.cancel(task_id))?
    }

    /// Number of live graphs.
    pub fn graph_count(&self) -> usize {
        self.lock().graphs.len()
    }

    /// Check if the queue has no graphs.
    pub fn is_empty(&self) -> bool {
        self.lock().graphs.is_empty()
    }

    /// Serialize the full queue to `path` (see [`snapshot`] for the format).
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let graphs = self.lock().graphs.clone();
        snapshot::save(path, &graphs)
    }

    /// Rebuild a queue from a snapshot. `Active` nodes revert to `Pending`
    /// and the rotation cursor starts at 0.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let graphs = snapshot::load(path)?;
        Ok(Self {
            inner: Mutex::new(QueueInner {
                graphs,
                last_index: 0,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn one_task_graph(graph_id: &str, task_id: &str) -> TaskGraph {
        let mut graph = TaskGraph::new(graph_id);
        graph.add_task(TaskNode::new(task_id, "send"));
        graph
    }

    #[test]
    fn empty_queue_yields_nothing() {
        let queue = WorkQueue::new();
        assert!(queue.round_robin_one_task(t0()).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn round_robin_visits_each_graph_once() {
        let queue = WorkQueue::new();
        for i in 0..3 {
            queue.add_graph(one_task_graph(&format!("g{i}"), "t"));
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(queue.round_robin_one_task(t0()).unwrap().graph_id);
        }
        seen.sort();
        assert_eq!(seen, vec!["g0", "g1", "g2"]);

        // Everything is now Active; nothing further to schedule.
        assert!(queue.round_robin_one_task(t0()).is_none());
    }

    #[test]
    fn cursor_advances_past_yielding_graph() {
        let queue = WorkQueue::new();
        let mut g0 = TaskGraph::new("g0");
        g0.add_task(TaskNode::new("a", "send"));
        g0.add_task(TaskNode::new("b", "send"));
        queue.add_graph(g0);
        queue.add_graph(one_task_graph("g1", "c"));

        // g0 has two independent ready tasks, but g1 gets its turn first.
        assert_eq!(queue.round_robin_one_task(t0()).unwrap().graph_id, "g0");
        assert_eq!(queue.round_robin_one_task(t0()).unwrap().graph_id, "g1");
        assert_eq!(queue.round_robin_one_task(t0()).unwrap().graph_id, "g0");
    }

    #[test]
    fn first_ready_task_in_graph_order() {
        let queue = WorkQueue::new();
        let mut graph = TaskGraph::new("g");
        graph.add_task(TaskNode::new("second", "send").with_depends_on(vec!["first".into()]));
        graph.add_task(TaskNode::new("first", "send"));
        queue.add_graph(graph);

        let task = queue.round_robin_one_task(t0()).unwrap();
        assert_eq!(task.node.id, "first");
        assert_eq!(task.node.status, TaskStatus::Active);
    }

    #[test]
    fn dispatch_marks_active_in_queue() {
        let queue = WorkQueue::new();
        queue.add_graph(one_task_graph("g", "t"));
        queue.round_robin_one_task(t0()).unwrap();

        let status = queue
            .with_graph_mut("g", |g| g.get_node("t").unwrap().status)
            .unwrap();
        assert_eq!(status, TaskStatus::Active);
    }

    #[test]
    fn complete_task_retires_finished_graph() {
        let queue = WorkQueue::new();
        queue.add_graph(one_task_graph("g", "t"));
        let task = queue.round_robin_one_task(t0()).unwrap();

        let outcome = queue.complete_task(&task.graph_id, &task.node.id).unwrap();
        assert!(outcome.graph_removed);
        assert!(queue.is_empty());
    }

    #[test]
    fn complete_task_keeps_unfinished_graph() {
        let queue = WorkQueue::new();
        let mut graph = TaskGraph::new("g");
        graph.add_task(TaskNode::new("a", "send"));
        graph.add_task(TaskNode::new("b", "send").with_depends_on(vec!["a".into()]));
        queue.add_graph(graph);

        let task = queue.round_robin_one_task(t0()).unwrap();
        assert_eq!(task.node.id, "a");
        let outcome = queue.complete_task("g", "a").unwrap();
        assert!(!outcome.graph_removed);

        let next = queue.round_robin_one_task(t0()).unwrap();
        assert_eq!(next.node.id, "b");
    }

    #[test]
    fn fail_task_drops_graph_at_ceiling() {
        let queue = WorkQueue::new();
        queue.add_graph(one_task_graph("g", "t"));
        queue.round_robin_one_task(t0()).unwrap();

        let outcome = queue
            .fail_task("g", "t", Duration::from_secs(1), 1)
            .unwrap();
        assert_eq!(outcome, FailOutcome::GraphDropped);
        assert!(queue.is_empty());
    }

    #[test]
    fn fail_task_reschedules_below_ceiling() {
        let queue = WorkQueue::new();
        queue.add_graph(one_task_graph("g", "t"));
        queue.round_robin_one_task(t0()).unwrap();

        let outcome = queue
            .fail_task("g", "t", Duration::from_secs(5), 10)
            .unwrap();
        assert_eq!(outcome, FailOutcome::Retrying);
        assert_eq!(queue.graph_count(), 1);

        // Not ready until the inserted wait elapses and completes.
        assert!(queue.round_robin_one_task(t0()).is_none());
        let later = t0() + chrono::Duration::seconds(5);
        let wait = queue.round_robin_one_task(later).unwrap();
        assert!(wait.node.id.starts_with("wait-"));
    }

    #[test]
    fn remove_all_by_context() {
        let queue = WorkQueue::new();
        for (graph_id, agent) in [("g0", "alice"), ("g1", "bob"), ("g2", "alice")] {
            let mut graph = one_task_graph(graph_id, "t");
            graph
                .context
                .insert("agent_id".into(), Value::String(agent.into()));
            queue.add_graph(graph);
        }

        let removed = queue.remove_all(|ctx| {
            ctx.get("agent_id").and_then(Value::as_str) == Some("alice")
        });
        assert_eq!(removed, 2);
        assert_eq!(queue.graph_count(), 1);
    }

    #[test]
    fn conversation_lookup() {
        let queue = WorkQueue::new();
        let mut graph = one_task_graph("g", "t");
        graph
            .context
            .insert("agent_id".into(), Value::String("alice".into()));
        graph
            .context
            .insert("channel_id".into(), Value::String("42".into()));
        queue.add_graph(graph);

        assert_eq!(
            queue.graph_for_conversation("alice", "42"),
            Some("g".to_string())
        );
        assert_eq!(queue.graph_for_conversation("alice", "7"), None);
        assert_eq!(queue.graph_containing("t"), Some("g".to_string()));
        assert_eq!(queue.graph_containing("missing"), None);
    }

    #[test]
    fn with_graph_mut_adds_tasks_under_lock() {
        let queue = WorkQueue::new();
        queue.add_graph(one_task_graph("g", "a"));
        queue
            .with_graph_mut("g", |g| {
                g.add_task(TaskNode::new("b", "send").with_depends_on(vec!["a".into()]));
            })
            .unwrap();
        assert!(matches!(
            queue.with_graph_mut("missing", |_| ()),
            Err(QueueError::GraphNotFound { .. })
        ));

        let task = queue.round_robin_one_task(t0()).unwrap();
        assert_eq!(task.node.id, "a");
    }

    #[test]
    fn cancel_task_excludes_from_scheduling() {
        let queue = WorkQueue::new();
        queue.add_graph(one_task_graph("g", "t"));
        queue.cancel_task("g", "t").unwrap();
        assert!(queue.round_robin_one_task(t0()).is_none());
    }
}
