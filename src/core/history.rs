//! Task history snapshots and resume target selection.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use super::error::{Error, Result};

/// One entry of the engine's task history.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    pub ts: u64,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub workspace: Option<String>,
}

/// Pull a task history out of an extension message.
///
/// Both full `state` messages and `taskHistoryUpdated` carry one. Entries that
/// do not have the expected shape are skipped.
#[must_use]
pub fn extract_task_history(message: &Value) -> Option<Vec<HistoryItem>> {
    let items = match message.get("type").and_then(Value::as_str)? {
        "state" => message.get("state")?.get("taskHistory")?.as_array()?,
        "taskHistoryUpdated" => message.get("taskHistory")?.as_array()?,
        _ => return None,
    };

    Some(
        items
            .iter()
            .filter_map(|item| HistoryItem::deserialize(item).ok())
            .collect(),
    )
}

fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Compare two workspace paths ignoring trailing separators and `.` segments.
#[must_use]
pub fn paths_equal(a: &str, b: &Path) -> bool {
    normalize(Path::new(a)) == normalize(b)
}

/// Tasks of `workspace`, newest first.
#[must_use]
pub fn workspace_sessions<'a>(history: &'a [HistoryItem], workspace: &Path) -> Vec<&'a HistoryItem> {
    let mut sessions: Vec<_> = history
        .iter()
        .filter(|item| {
            item.workspace
                .as_deref()
                .is_some_and(|path| paths_equal(path, workspace))
        })
        .collect();
    sessions.sort_by(|a, b| b.ts.cmp(&a.ts));
    sessions
}

/// Pick the task to resume.
///
/// An explicit session id is checked against the snapshot when one was
/// received; without a snapshot it is trusted as given. Otherwise the newest
/// task of the workspace is chosen.
pub fn resolve_resume_session(
    history: Option<&[HistoryItem]>,
    workspace: &Path,
    requested: Option<&str>,
) -> Result<String> {
    if let Some(requested) = requested.map(str::trim).filter(|id| !id.is_empty()) {
        let known = history.is_none_or(|history| history.iter().any(|item| item.id == requested));
        if !known {
            return Err(Error::SessionNotFound(requested.to_string()));
        }
        return Ok(requested.to_string());
    }

    history
        .and_then(|history| workspace_sessions(history, workspace).first().map(|item| item.id.clone()))
        .ok_or(Error::NoPreviousTask)
}
