use crate::log_warn;
use crate::plan::{load_preferred_plan, read_json_doc, DocRead, ImplementationPlan, PlanSubtask, Task, TaskMetadata};
use crate::types::{AutoMergeDecision, MergeBlocker};
use crate::workspace::{ProjectLayout, WorkspaceProbe};

/// Decide whether a task whose run just succeeded may be merged automatically.
///
/// Checks run in order and the first failure wins:
/// 1. review before merge requested (the default) -> `review_required`
/// 2. plan sub-units not all completed -> `subtasks_incomplete`
/// 3. plan review reason other than `completed` -> `review_<reason>`
/// 4. QA sign-off present but not approved -> `qa_<status>`
/// 5. no isolated workspace -> `no_worktree`
///
/// Every call re-reads the on-disk records. An unreadable record is taken at
/// its most conservative value, so corruption can only block a merge.
pub fn decide_auto_merge(
    task: &Task,
    layout: &ProjectLayout,
    probe: &dyn WorkspaceProbe,
) -> AutoMergeDecision {
    let requires_merge_review = requires_review(task, layout);
    if requires_merge_review {
        return AutoMergeDecision::blocked(true, MergeBlocker::ReviewRequired);
    }

    let plan = match load_preferred_plan(layout, &task.id) {
        DocRead::Loaded(plan) => Some(plan),
        DocRead::Missing => None,
        DocRead::Corrupt(e) => {
            log_warn!("[merge] {}: plan unreadable, treating as incomplete: {}", task.id, e);
            return AutoMergeDecision::blocked(false, MergeBlocker::SubtasksIncomplete);
        }
    };

    if !sub_units_complete(plan.as_ref(), &task.subtasks) {
        return AutoMergeDecision::blocked(false, MergeBlocker::SubtasksIncomplete);
    }

    if let Some(plan) = &plan {
        if let Some(reason) = plan.review_reason.as_deref() {
            if reason != "completed" {
                return AutoMergeDecision::blocked(false, MergeBlocker::Review(reason.to_string()));
            }
        }
        if let Some(qa) = &plan.qa_signoff {
            let status = qa.status.as_deref().unwrap_or("unknown");
            if status != "approved" {
                return AutoMergeDecision::blocked(false, MergeBlocker::Qa(status.to_string()));
            }
        }
    }

    if !probe.workspace_exists(layout, &task.id) {
        return AutoMergeDecision::blocked(false, MergeBlocker::NoWorktree);
    }

    AutoMergeDecision::eligible(false)
}

/// Review is skipped only when some source explicitly opts out and no source
/// opts in. Unset everywhere means review; an unreadable snapshot means review.
fn requires_review(task: &Task, layout: &ProjectLayout) -> bool {
    let mut answers = vec![task.metadata.require_review_before_merge];

    for path in [
        layout.metadata_path(&task.id),
        layout.workspace_metadata_path(&task.id),
    ] {
        match read_json_doc::<TaskMetadata>(&path) {
            DocRead::Loaded(meta) => answers.push(meta.require_review_before_merge),
            DocRead::Missing => {}
            DocRead::Corrupt(e) => {
                log_warn!("[merge] {}: metadata unreadable, requiring review: {}", task.id, e);
                return true;
            }
        }
    }

    if answers.contains(&Some(true)) {
        return true;
    }
    !answers.contains(&Some(false))
}

/// Prefer the plan's own phase list; fall back to the task's in-memory
/// subtasks. No sub-units anywhere means completion cannot be shown.
fn sub_units_complete(plan: Option<&ImplementationPlan>, fallback: &[PlanSubtask]) -> bool {
    if let Some(plan) = plan.filter(|p| p.has_sub_units()) {
        return plan.sub_units().all(PlanSubtask::is_completed);
    }
    !fallback.is_empty() && fallback.iter().all(PlanSubtask::is_completed)
}
