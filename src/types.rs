use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Enums ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Running,
    Paused,
    Completed,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueStatus::Running => write!(f, "running"),
            QueueStatus::Paused => write!(f, "paused"),
            QueueStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Terminal outcome of a task run, as reported by the execution engine.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    Failed,
}

/// Task board status written to the plan record.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    InProgress,
    AiReview,
    HumanReview,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::AiReview => "ai_review",
            TaskStatus::HumanReview => "human_review",
            TaskStatus::Done => "done",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn parse_task_status(s: &str) -> Result<TaskStatus, String> {
    match s.to_lowercase().as_str() {
        "backlog" => Ok(TaskStatus::Backlog),
        "in_progress" => Ok(TaskStatus::InProgress),
        "ai_review" => Ok(TaskStatus::AiReview),
        "human_review" => Ok(TaskStatus::HumanReview),
        "done" => Ok(TaskStatus::Done),
        _ => Err(format!(
            "Invalid status '{}': expected backlog, in_progress, ai_review, human_review, or done",
            s
        )),
    }
}

/// Why a task sits in review. `Completed` is the only reason that does not block auto-merge.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    Completed,
    Errors,
    QaRejected,
    PlanReview,
    Stopped,
}

impl ReviewReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewReason::Completed => "completed",
            ReviewReason::Errors => "errors",
            ReviewReason::QaRejected => "qa_rejected",
            ReviewReason::PlanReview => "plan_review",
            ReviewReason::Stopped => "stopped",
        }
    }
}

pub fn parse_review_reason(s: &str) -> Result<ReviewReason, String> {
    match s.to_lowercase().as_str() {
        "completed" => Ok(ReviewReason::Completed),
        "errors" => Ok(ReviewReason::Errors),
        "qa_rejected" => Ok(ReviewReason::QaRejected),
        "plan_review" => Ok(ReviewReason::PlanReview),
        "stopped" => Ok(ReviewReason::Stopped),
        _ => Err(format!(
            "Invalid review reason '{}': expected completed, errors, qa_rejected, plan_review, or stopped",
            s
        )),
    }
}

// --- Structs ---

/// A task created from one plan entry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TaskRef {
    pub id: String,
    pub title: String,
}

impl TaskRef {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ScheduleGroup {
    pub tasks: Vec<TaskRef>,
    pub mode: ScheduleMode,
}

impl ScheduleGroup {
    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.iter().any(|t| t.id == task_id)
    }
}

/// A schedule group as declared by the plan parser: task titles plus a parallel flag.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct RawScheduleGroup {
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub parallel: bool,
}

/// A terminal-status event for one task, the only input that drives a queue forward.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskSignal {
    pub task_id: String,
    pub outcome: TaskOutcome,
}

impl TaskSignal {
    pub fn succeeded(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            outcome: TaskOutcome::Succeeded,
        }
    }

    pub fn failed(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            outcome: TaskOutcome::Failed,
        }
    }
}

/// Persisted scheduler progress for one batch.
///
/// Invariants:
/// - `cursor < groups.len()` while status is not `Completed`
/// - `cursor == groups.len()` iff status is `Completed`
/// - `completed_task_ids` only grows and holds ids from groups `<= cursor`
///
/// Unknown fields are ignored on read so older binaries can load newer files.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    pub status: QueueStatus,
    pub cursor: usize,
    pub groups: Vec<ScheduleGroup>,
    #[serde(default)]
    pub completed_task_ids: Vec<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_by_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_task_ids: Vec<String>,
}

impl QueueState {
    /// A fresh running queue positioned at the first group.
    pub fn new(groups: Vec<ScheduleGroup>) -> Self {
        Self {
            status: QueueStatus::Running,
            cursor: 0,
            groups,
            completed_task_ids: Vec::new(),
            updated_at: Utc::now(),
            paused_by_task_id: None,
            failed_task_ids: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == QueueStatus::Completed
    }

    pub fn is_paused(&self) -> bool {
        self.status == QueueStatus::Paused
    }

    pub fn current_group(&self) -> Option<&ScheduleGroup> {
        self.groups.get(self.cursor)
    }

    pub fn is_task_completed(&self, task_id: &str) -> bool {
        self.completed_task_ids.iter().any(|id| id == task_id)
    }

    /// Completed, or failed under the `continue` policy. Either way the task no longer holds its group open.
    pub fn is_task_settled(&self, task_id: &str) -> bool {
        self.is_task_completed(task_id) || self.failed_task_ids.iter().any(|id| id == task_id)
    }

    /// Ids in the current group that still hold it open, in list order.
    pub fn pending_in_current_group(&self) -> Vec<String> {
        match self.current_group() {
            Some(group) => group
                .tasks
                .iter()
                .filter(|t| !self.is_task_settled(&t.id))
                .map(|t| t.id.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Record a successful completion. Returns false for duplicates.
    pub fn record_completed(&mut self, task_id: &str) -> bool {
        if self.is_task_completed(task_id) {
            return false;
        }
        self.completed_task_ids.push(task_id.to_string());
        self.touch();
        true
    }

    /// Record a failure that does not hold the group open. Returns false for duplicates.
    pub fn record_failed(&mut self, task_id: &str) -> bool {
        if self.is_task_settled(task_id) {
            return false;
        }
        self.failed_task_ids.push(task_id.to_string());
        self.touch();
        true
    }

    /// Running -> Paused. No-op (returns false) when already paused or completed.
    pub fn mark_paused(&mut self, triggering_task_id: Option<&str>) -> bool {
        if self.status != QueueStatus::Running {
            return false;
        }
        self.status = QueueStatus::Paused;
        self.paused_by_task_id = triggering_task_id.map(str::to_string);
        self.touch();
        true
    }

    /// Paused -> Running. No-op (returns false) when already running or completed.
    pub fn mark_running(&mut self) -> bool {
        if self.status != QueueStatus::Paused {
            return false;
        }
        self.status = QueueStatus::Running;
        self.paused_by_task_id = None;
        self.touch();
        true
    }

    /// Repair a state loaded from disk so the cursor invariants hold.
    ///
    /// Clamps an out-of-range cursor and reconciles `status` with
    /// `cursor == groups.len()`. Settled ids must belong to a group at or
    /// before the cursor; anything else is dropped. Returns true if anything
    /// changed.
    pub fn normalize(&mut self) -> bool {
        let mut changed = false;
        let len = self.groups.len();

        if self.cursor > len {
            self.cursor = len;
            changed = true;
        }
        if self.status == QueueStatus::Completed && self.cursor < len {
            self.cursor = len;
            changed = true;
        }
        if self.cursor == len && self.status != QueueStatus::Completed {
            self.status = QueueStatus::Completed;
            self.paused_by_task_id = None;
            changed = true;
        }

        let reached: HashSet<String> = self
            .groups
            .iter()
            .take(self.cursor + 1)
            .flat_map(|g| g.tasks.iter().map(|t| t.id.clone()))
            .collect();
        for ids in [&mut self.completed_task_ids, &mut self.failed_task_ids] {
            let before = ids.len();
            let mut seen = HashSet::new();
            ids.retain(|id| reached.contains(id) && seen.insert(id.clone()));
            if ids.len() != before {
                changed = true;
            }
        }

        if changed {
            self.touch();
        }
        changed
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Verdict of the auto-merge gate. Derived on demand, never persisted.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AutoMergeDecision {
    pub eligible: bool,
    pub requires_merge_review: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<MergeBlocker>,
}

impl AutoMergeDecision {
    pub fn eligible(requires_merge_review: bool) -> Self {
        Self {
            eligible: true,
            requires_merge_review,
            reason: None,
        }
    }

    pub fn blocked(requires_merge_review: bool, reason: MergeBlocker) -> Self {
        Self {
            eligible: false,
            requires_merge_review,
            reason: Some(reason),
        }
    }

    /// Machine-readable reason string, e.g. `"review_required"` or `"qa_rejected"`.
    pub fn reason_code(&self) -> Option<String> {
        self.reason.as_ref().map(|r| r.to_string())
    }
}

/// First failing check of the auto-merge precedence chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeBlocker {
    ReviewRequired,
    SubtasksIncomplete,
    /// Plan review reason other than `completed`.
    Review(String),
    /// QA sign-off status other than `approved`.
    Qa(String),
    NoWorktree,
}

impl std::fmt::Display for MergeBlocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeBlocker::ReviewRequired => write!(f, "review_required"),
            MergeBlocker::SubtasksIncomplete => write!(f, "subtasks_incomplete"),
            MergeBlocker::Review(reason) => write!(f, "review_{}", reason),
            MergeBlocker::Qa(status) => write!(f, "qa_{}", status),
            MergeBlocker::NoWorktree => write!(f, "no_worktree"),
        }
    }
}

impl Serialize for MergeBlocker {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
