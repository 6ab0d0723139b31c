//! Agenda — persistent task-graph scheduler for conversational agents.
//!
//! Pending work for each conversation is modeled as a graph of
//! dependency-linked tasks. A single work queue round-robins across all
//! live graphs so no conversation can starve the others, and snapshots
//! the full queue to disk for crash recovery.

pub mod config;
pub mod driver;
pub mod error;
pub mod handlers;
pub mod queue;
pub mod task;
