use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

use crate::workspace::ProjectLayout;

// --- Documents ---

/// `implementation_plan.json`. Fields this crate does not understand are kept
/// in `extra` so a status rewrite never drops another tool's data.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ImplementationPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(
        rename = "reviewReason",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub review_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<PlanPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa_signoff: Option<QaSignoff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One plan phase. Older plans call the units `chunks`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct PlanPhase {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<PlanSubtask>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<PlanSubtask>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct PlanSubtask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlanSubtask {
    pub fn new(id: &str, status: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            status: status.to_string(),
            extra: Map::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct QaSignoff {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImplementationPlan {
    /// Every sub-unit across all phases, `subtasks` and legacy `chunks` alike.
    pub fn sub_units(&self) -> impl Iterator<Item = &PlanSubtask> {
        self.phases
            .iter()
            .flat_map(|p| p.subtasks.iter().chain(p.chunks.iter()))
    }

    pub fn has_sub_units(&self) -> bool {
        self.sub_units().next().is_some()
    }
}

/// `task_metadata.json`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_review_before_merge: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// In-memory view of a task as the rest of the application holds it.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub metadata: TaskMetadata,
    pub subtasks: Vec<PlanSubtask>,
}

impl Task {
    /// Build the in-memory view from the primary record.
    ///
    /// Unreadable metadata leaves the defaults in place; the merge gate re-reads
    /// the files itself and treats corruption conservatively.
    pub fn load(layout: &ProjectLayout, task_id: &str) -> Self {
        let metadata = match read_json_doc::<TaskMetadata>(&layout.metadata_path(task_id)) {
            DocRead::Loaded(m) => m,
            DocRead::Missing | DocRead::Corrupt(_) => TaskMetadata::default(),
        };
        let subtasks = match read_json_doc::<ImplementationPlan>(&layout.primary_plan_path(task_id))
        {
            DocRead::Loaded(plan) => plan.sub_units().cloned().collect(),
            DocRead::Missing | DocRead::Corrupt(_) => Vec::new(),
        };
        Self {
            id: task_id.to_string(),
            title: metadata.title.clone().unwrap_or_else(|| task_id.to_string()),
            metadata,
            subtasks,
        }
    }
}

// --- Reading ---

/// Outcome of reading an optional JSON document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocRead<T> {
    Missing,
    Corrupt(String),
    Loaded(T),
}

impl<T> DocRead<T> {
    pub fn loaded(self) -> Option<T> {
        match self {
            DocRead::Loaded(doc) => Some(doc),
            DocRead::Missing | DocRead::Corrupt(_) => None,
        }
    }
}

pub fn read_json_doc<T: DeserializeOwned>(path: &Path) -> DocRead<T> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return DocRead::Missing,
        Err(e) => return DocRead::Corrupt(format!("Failed to read {}: {}", path.display(), e)),
    };
    match serde_json::from_str(&contents) {
        Ok(doc) => DocRead::Loaded(doc),
        Err(e) => DocRead::Corrupt(format!("Failed to parse {}: {}", path.display(), e)),
    }
}

/// Read a task's plan, preferring the workspace copy when it exists.
///
/// A corrupt workspace copy is reported as corrupt rather than falling back
/// to the primary record, which may be older.
pub fn load_preferred_plan(layout: &ProjectLayout, task_id: &str) -> DocRead<ImplementationPlan> {
    match read_json_doc(&layout.workspace_plan_path(task_id)) {
        DocRead::Missing => read_json_doc(&layout.primary_plan_path(task_id)),
        other => other,
    }
}

// --- Writing ---

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// Writes to a temp file in the same directory, syncs it, then renames over
/// the target, so readers see either the old or the new document.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let parent = path
        .parent()
        .ok_or_else(|| format!("Cannot determine parent directory of {}", path.display()))?;

    fs::create_dir_all(parent)
        .map_err(|e| format!("Failed to create directory {}: {}", parent.display(), e))?;

    let mut json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize {}: {}", path.display(), e))?;
    json.push('\n');

    let temp_file = NamedTempFile::new_in(parent)
        .map_err(|e| format!("Failed to create temp file in {}: {}", parent.display(), e))?;

    fs::write(temp_file.path(), &json).map_err(|e| format!("Failed to write temp file: {}", e))?;

    let file = fs::File::open(temp_file.path())
        .map_err(|e| format!("Failed to open temp file for sync: {}", e))?;
    file.sync_all()
        .map_err(|e| format!("Failed to sync temp file: {}", e))?;

    temp_file
        .persist(path)
        .map_err(|e| format!("Failed to rename temp file to {}: {}", path.display(), e))?;

    Ok(())
}
