//! Snapshot persistence — a human-readable Markdown document with one fenced
//! JSON block per graph, so operators can inspect pending work in any text
//! viewer.
//!
//! Writes are crash-safe: the previous file is copied to a `.bak` sibling,
//! the new document goes to a `.tmp` sibling, then an atomic rename commits
//! it. Both operations are synchronous whole-file I/O; callers snapshot
//! periodically, never on the per-tick hot path.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::SnapshotError;
use crate::task::TaskGraph;

const HEADER: &str = "# Work Queue Snapshot";
const FENCE_OPEN: &str = "```json";
const FENCE_CLOSE: &str = "```";

/// Serialize `graphs` to `path`.
pub fn save(path: &Path, graphs: &[TaskGraph]) -> Result<(), SnapshotError> {
    let mut doc = String::from(HEADER);
    doc.push('\n');
    for graph in graphs {
        doc.push_str(&format!("\n## Task Graph: {}\n\n{FENCE_OPEN}\n", graph.id));
        doc.push_str(&serde_json::to_string_pretty(graph)?);
        doc.push('\n');
        doc.push_str(FENCE_CLOSE);
        doc.push('\n');
    }

    if path.exists() {
        fs::copy(path, sibling(path, ".bak"))?;
    }
    let tmp = sibling(path, ".tmp");
    fs::write(&tmp, &doc)?;
    fs::rename(&tmp, path)?;

    info!(
        path = %path.display(),
        graphs = graphs.len(),
        "Saved work queue snapshot"
    );
    Ok(())
}

/// Parse the snapshot at `path` back into graphs.
///
/// Any node persisted as `active` reverts to `pending`: active only ever
/// reflects in-memory execution state, so after a restart the task must be
/// re-attempted from scratch. Malformed JSON is a hard failure.
pub fn load(path: &Path) -> Result<Vec<TaskGraph>, SnapshotError> {
    let doc = fs::read_to_string(path)?;
    let mut graphs = parse(&doc)?;

    let mut reset = 0;
    for graph in &mut graphs {
        reset += graph.reset_active();
    }
    if reset > 0 {
        debug!(reset, "Reverted active tasks to pending on load");
    }
    info!(
        path = %path.display(),
        graphs = graphs.len(),
        "Loaded work queue snapshot"
    );
    Ok(graphs)
}

fn parse(doc: &str) -> Result<Vec<TaskGraph>, SnapshotError> {
    let has_header = doc
        .lines()
        .next()
        .is_some_and(|line| line.trim() == HEADER);
    if !has_header {
        return Err(SnapshotError::MalformedDocument {
            reason: format!("missing `{HEADER}` header"),
        });
    }

    let mut graphs = Vec::new();
    let mut block: Option<String> = None;
    for line in doc.lines() {
        let trimmed = line.trim();
        match block.as_mut() {
            None if trimmed == FENCE_OPEN => block = Some(String::new()),
            None => {}
            Some(_) if trimmed == FENCE_CLOSE => {
                let buf = block.take().unwrap_or_default();
                graphs.push(serde_json::from_str(&buf)?);
            }
            Some(buf) => {
                buf.push_str(line);
                buf.push('\n');
            }
        }
    }
    if block.is_some() {
        return Err(SnapshotError::MalformedDocument {
            reason: "unterminated fenced block".to_string(),
        });
    }
    Ok(graphs)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
