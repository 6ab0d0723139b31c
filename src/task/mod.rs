//! Task model — nodes, statuses, and per-conversation graphs.
//!
//! Core components:
//! - `node` — TaskNode status machine, readiness checks, wait deadlines
//! - `graph` — TaskGraph dependency bookkeeping and retry topology

pub mod graph;
pub mod node;

pub use graph::TaskGraph;
pub use node::{Params, TaskNode, TaskStatus, UNTIL_FORMAT, WAIT_KIND, WaitParams};
