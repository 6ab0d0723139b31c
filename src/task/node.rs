//! Task nodes — the status machine, readiness checks, and wait deadlines.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Task type interpreted by the scheduler itself: delays dependents until a
/// deadline. Every other type is opaque and resolved through the handler
/// registry.
pub const WAIT_KIND: &str = "wait";

/// Timestamp format of the `until` wait parameter (UTC offset without colon,
/// e.g. `2025-01-01T00:00:00+0000`).
pub const UNTIL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

const DURATION_KEY: &str = "duration";
const UNTIL_KEY: &str = "until";
const PREVIOUS_RETRIES_KEY: &str = "previous_retries";

/// Open string-keyed parameter map carried by tasks and graph contexts.
pub type Params = Map<String, Value>;

/// Status of a task node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies and dispatch.
    #[default]
    Pending,
    /// Currently dispatched to a handler. Never persisted as such; a
    /// snapshot load reverts it to `Pending`.
    Active,
    /// Handler completed successfully.
    Done,
    /// Retry ceiling reached; the owning graph is dropped.
    Failed,
    /// Cancelled externally.
    Cancelled,
}

impl TaskStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Check if the task is still live (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Typed view over a `"wait"` node's parameters.
///
/// The deadline lives in the node's open params map so it serializes with
/// the node, but reads go through this struct so the freeze-on-first-unblock
/// transition is explicit rather than an incidental map write.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitParams {
    /// Wait length in seconds, counted from first unblock.
    pub duration_secs: Option<f64>,
    /// Frozen deadline in [`UNTIL_FORMAT`], set exactly once.
    pub until: Option<String>,
}

impl WaitParams {
    /// Read the wait view out of a params map.
    pub fn read(params: &Params) -> Self {
        Self {
            duration_secs: params.get(DURATION_KEY).and_then(Value::as_f64),
            until: params
                .get(UNTIL_KEY)
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// A single unit of work: a handler type, parameters, and the sibling
/// dependencies that must be `Done` before it may run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    /// Unique within the owning graph (caller responsibility).
    #[serde(rename = "identifier")]
    pub id: String,
    /// Handler selector (e.g. `"send"`, `"wait"`, `"sticker"`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Open parameter map; retry/wait bookkeeping mutates it in place.
    #[serde(default)]
    pub params: Params,
    /// Sibling identifiers that must be `Done` first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
}

impl TaskNode {
    /// Create a pending node with no parameters or dependencies.
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            params: Params::new(),
            depends_on: Vec::new(),
            status: TaskStatus::Pending,
        }
    }

    /// Build a synthetic `"wait"` node with the given duration.
    pub fn wait(id: impl Into<String>, duration: Duration) -> Self {
        let mut node = Self::new(id, WAIT_KIND);
        node.params
            .insert(DURATION_KEY.to_string(), Value::from(duration.as_secs_f64()));
        node
    }

    /// Attach parameters (builder style).
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Attach dependencies (builder style).
    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// True iff the node is `Pending` and every dependency id is in `done`.
    pub fn is_unblocked(&self, done: &HashSet<String>) -> bool {
        self.status == TaskStatus::Pending && self.depends_on.iter().all(|dep| done.contains(dep))
    }

    /// True iff the node may be dispatched right now.
    ///
    /// Non-wait nodes are ready as soon as they are unblocked. A `"wait"`
    /// node freezes its deadline (`until = now + duration`) the first time
    /// it is polled unblocked — not at creation time, so a wait stuck behind
    /// unmet dependencies does not start its countdown early — and is ready
    /// only once `now` has passed the frozen deadline.
    pub fn is_ready(&mut self, done: &HashSet<String>, now: DateTime<Utc>) -> bool {
        if !self.is_unblocked(done) {
            return false;
        }
        if self.kind != WAIT_KIND {
            return true;
        }

        let wait = WaitParams::read(&self.params);
        let until = match (wait.until, wait.duration_secs) {
            (Some(until), _) => until,
            (None, Some(secs)) => {
                let deadline = now + chrono::Duration::milliseconds((secs * 1000.0) as i64);
                let formatted = deadline.format(UNTIL_FORMAT).to_string();
                self.params
                    .insert(UNTIL_KEY.to_string(), Value::String(formatted.clone()));
                formatted
            }
            (None, None) => {
                warn!(
                    task_id = %self.id,
                    "Wait task has neither duration nor until; it will never become ready"
                );
                return false;
            }
        };

        match DateTime::parse_from_str(&until, UNTIL_FORMAT) {
            Ok(deadline) => now >= deadline.with_timezone(&Utc),
            Err(e) => {
                warn!(
                    task_id = %self.id,
                    until = %until,
                    error = %e,
                    "Unparsable wait deadline; task will never become ready"
                );
                false
            }
        }
    }

    /// Number of failed attempts recorded so far.
    pub fn previous_retries(&self) -> u64 {
        self.params
            .get(PREVIOUS_RETRIES_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    /// Record one more failed attempt and return the new count.
    pub(crate) fn record_retry(&mut self) -> u64 {
        let next = self.previous_retries() + 1;
        self.params
            .insert(PREVIOUS_RETRIES_KEY.to_string(), Value::from(next));
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn done(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unblocked_requires_pending_and_done_deps() {
        let mut node = TaskNode::new("b", "send").with_depends_on(vec!["a".into()]);
        assert!(!node.is_unblocked(&done(&[])));
        assert!(node.is_unblocked(&done(&["a"])));

        node.status = TaskStatus::Active;
        assert!(!node.is_unblocked(&done(&["a"])));
        node.status = TaskStatus::Done;
        assert!(!node.is_unblocked(&done(&["a"])));
    }

    #[test]
    fn unmet_deps_never_ready_regardless_of_now() {
        let mut node = TaskNode::new("b", "send").with_depends_on(vec!["a".into()]);
        assert!(!node.is_ready(&done(&[]), t0()));
        assert!(!node.is_ready(&done(&[]), t0() + chrono::Duration::days(365)));
    }

    #[test]
    fn non_wait_ready_when_unblocked() {
        let mut node = TaskNode::new("a", "send");
        assert!(node.is_ready(&done(&[]), t0()));
    }

    #[test]
    fn wait_deadline_frozen_once() {
        let mut node = TaskNode::wait("w", Duration::from_secs(5));
        assert!(!node.is_ready(&done(&[]), t0()));
        let first = WaitParams::read(&node.params).until.unwrap();
        assert_eq!(first, "2025-01-01T00:00:05+0000");

        // Polling again later must not move the deadline.
        assert!(!node.is_ready(&done(&[]), t0() + chrono::Duration::seconds(2)));
        let second = WaitParams::read(&node.params).until.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn wait_not_ready_just_before_deadline() {
        let mut node = TaskNode::wait("w", Duration::from_secs(5));
        assert!(!node.is_ready(&done(&[]), t0()));
        assert!(!node.is_ready(&done(&[]), t0() + chrono::Duration::milliseconds(4900)));
        assert!(node.is_ready(&done(&[]), t0() + chrono::Duration::seconds(5)));
        assert!(node.is_ready(&done(&[]), t0() + chrono::Duration::seconds(6)));
    }

    #[test]
    fn wait_countdown_starts_at_first_unblock() {
        let mut node =
            TaskNode::wait("w", Duration::from_secs(5)).with_depends_on(vec!["a".into()]);
        // Blocked: no deadline yet.
        assert!(!node.is_ready(&done(&[]), t0()));
        assert!(WaitParams::read(&node.params).until.is_none());

        // Dependency lands a minute later; countdown starts there.
        let unblocked_at = t0() + chrono::Duration::seconds(60);
        assert!(!node.is_ready(&done(&["a"]), unblocked_at));
        assert_eq!(
            WaitParams::read(&node.params).until.unwrap(),
            "2025-01-01T00:01:05+0000"
        );
    }

    #[test]
    fn wait_with_explicit_until() {
        let mut node = TaskNode::new("w", WAIT_KIND);
        node.params.insert(
            "until".into(),
            Value::String("2025-01-01T00:00:10+0000".into()),
        );
        assert!(!node.is_ready(&done(&[]), t0()));
        assert!(node.is_ready(&done(&[]), t0() + chrono::Duration::seconds(10)));
    }

    #[test]
    fn malformed_wait_never_ready() {
        // Neither duration nor until.
        let mut bare = TaskNode::new("w1", WAIT_KIND);
        assert!(!bare.is_ready(&done(&[]), t0() + chrono::Duration::days(1)));

        // Unparsable until string.
        let mut garbled = TaskNode::new("w2", WAIT_KIND);
        garbled
            .params
            .insert("until".into(), Value::String("not-a-timestamp".into()));
        assert!(!garbled.is_ready(&done(&[]), t0() + chrono::Duration::days(1)));
    }

    #[test]
    fn retry_counter() {
        let mut node = TaskNode::new("a", "send");
        assert_eq!(node.previous_retries(), 0);
        assert_eq!(node.record_retry(), 1);
        assert_eq!(node.record_retry(), 2);
        assert_eq!(node.previous_retries(), 2);
    }

    #[test]
    fn status_terminal_partition() {
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::Pending.is_active());
        assert!(TaskStatus::Active.is_active());
    }

    #[test]
    fn status_serde_roundtrip() {
        let json = serde_json::to_string(&TaskStatus::Active).unwrap();
        assert_eq!(json, "\"active\"");
        let parsed: TaskStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, TaskStatus::Active);
    }

    #[test]
    fn node_serde_field_names() {
        let node = TaskNode::new("a", "send").with_depends_on(vec!["b".into()]);
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["identifier"], "a");
        assert_eq!(value["type"], "send");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["depends_on"][0], "b");

        let back: TaskNode = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, "a");
        assert_eq!(back.kind, "send");
    }
}
