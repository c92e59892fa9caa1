use std::path::Path;

use chrono::Utc;

use crate::log_warn;
use crate::plan::{read_json_doc, write_json_atomic, DocRead, ImplementationPlan, TaskMetadata};
use crate::types::{ReviewReason, TaskStatus};
use crate::workspace::ProjectLayout;

/// Result of writing one of the two status locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// An existing record was updated.
    Updated,
    /// No primary record existed; one was built from known task fields.
    Synthesized,
    /// The location does not exist for this task; nothing was written.
    Skipped,
    Failed(String),
}

impl WriteOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, WriteOutcome::Failed(_))
    }
}

/// Per-location outcome of one status write. Partial failure is recorded,
/// never rolled back; the next status change rewrites both locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistReport {
    pub primary: WriteOutcome,
    pub workspace: WriteOutcome,
}

impl PersistReport {
    pub fn is_complete(&self) -> bool {
        !self.primary.is_failed() && !self.workspace.is_failed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLocation {
    Primary,
    Workspace,
}

/// Status as a reader sees it, with the location it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub status: Option<String>,
    pub review_reason: Option<String>,
    pub location: RecordLocation,
}

/// Writes task status to the primary record and the workspace copy.
#[derive(Clone, Debug)]
pub struct StatusStore {
    layout: ProjectLayout,
}

impl StatusStore {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Record `status` (and `reason`, when given) for `task_id` in both locations.
    ///
    /// The primary record is synthesized if missing. The workspace copy is only
    /// written if it already exists. Both writes are always attempted, primary
    /// first; failures are logged and reported, not returned as errors.
    pub fn persist_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        reason: Option<ReviewReason>,
    ) -> PersistReport {
        let primary = self.write_primary(task_id, status, reason);
        if let WriteOutcome::Failed(e) = &primary {
            log_warn!("[status] {} primary record not updated: {}", task_id, e);
        }

        let workspace = self.write_workspace(task_id, status, reason);
        if let WriteOutcome::Failed(e) = &workspace {
            log_warn!("[status] {} workspace record not updated: {}", task_id, e);
        }

        PersistReport { primary, workspace }
    }

    /// Current status, preferring the workspace copy when both exist.
    pub fn read_status(&self, task_id: &str) -> Option<StatusRecord> {
        let workspace = read_json_doc::<ImplementationPlan>(&self.layout.workspace_plan_path(task_id));
        if let DocRead::Loaded(plan) = workspace {
            return Some(to_record(plan, RecordLocation::Workspace));
        }
        read_json_doc::<ImplementationPlan>(&self.layout.primary_plan_path(task_id))
            .loaded()
            .map(|plan| to_record(plan, RecordLocation::Primary))
    }

    fn write_primary(
        &self,
        task_id: &str,
        status: TaskStatus,
        reason: Option<ReviewReason>,
    ) -> WriteOutcome {
        let path = self.layout.primary_plan_path(task_id);
        let (mut plan, outcome) = match read_json_doc::<ImplementationPlan>(&path) {
            DocRead::Loaded(plan) => (plan, WriteOutcome::Updated),
            DocRead::Missing => (self.synthesize_plan(task_id), WriteOutcome::Synthesized),
            // Overwriting would destroy whatever is left of the record.
            DocRead::Corrupt(e) => return WriteOutcome::Failed(e),
        };
        apply_status(&mut plan, status, reason);
        write_plan(&path, &plan, outcome)
    }

    fn write_workspace(
        &self,
        task_id: &str,
        status: TaskStatus,
        reason: Option<ReviewReason>,
    ) -> WriteOutcome {
        let path = self.layout.workspace_plan_path(task_id);
        match read_json_doc::<ImplementationPlan>(&path) {
            DocRead::Missing => WriteOutcome::Skipped,
            DocRead::Corrupt(e) => WriteOutcome::Failed(e),
            DocRead::Loaded(mut plan) => {
                apply_status(&mut plan, status, reason);
                write_plan(&path, &plan, WriteOutcome::Updated)
            }
        }
    }

    fn synthesize_plan(&self, task_id: &str) -> ImplementationPlan {
        let metadata = read_json_doc::<TaskMetadata>(&self.layout.metadata_path(task_id))
            .loaded()
            .unwrap_or_default();
        ImplementationPlan {
            feature: Some(metadata.title.unwrap_or_else(|| task_id.to_string())),
            description: metadata.description,
            created_at: Some(Utc::now().to_rfc3339()),
            ..Default::default()
        }
    }
}

fn apply_status(plan: &mut ImplementationPlan, status: TaskStatus, reason: Option<ReviewReason>) {
    plan.status = Some(status.as_str().to_string());
    if let Some(reason) = reason {
        plan.review_reason = Some(reason.as_str().to_string());
    }
    plan.updated_at = Some(Utc::now().to_rfc3339());
}

fn write_plan(path: &Path, plan: &ImplementationPlan, on_success: WriteOutcome) -> WriteOutcome {
    match write_json_atomic(path, plan) {
        Ok(()) => on_success,
        Err(e) => WriteOutcome::Failed(e),
    }
}

fn to_record(plan: ImplementationPlan, location: RecordLocation) -> StatusRecord {
    StatusRecord {
        status: plan.status,
        review_reason: plan.review_reason,
        location,
    }
}
