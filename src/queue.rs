use std::collections::HashSet;

use crate::config::FailurePolicy;
use crate::error::AutostartError;
use crate::types::{QueueState, QueueStatus, ScheduleGroup, ScheduleMode, TaskOutcome};
use crate::{log_debug, log_info, log_warn};

/// Fire-and-forget trigger for one task. Completion arrives later as a signal.
pub type StartTaskFn = Box<dyn FnMut(&str) + Send>;

/// Receives every new queue state. The persistence and status-propagation hook.
pub type StateChangeFn = Box<dyn FnMut(&QueueState) + Send>;

/// Drives one batch through its schedule groups.
///
/// The queue is passive: it advances only when constructed, resumed, or told
/// that a task reached a terminal state. Within one call, every state mutation
/// is reported through `on_state_change` before any `start_task` call is made,
/// so a caller that persists in the hook never starts a task the stored state
/// does not account for.
pub struct AutostartQueue {
    state: QueueState,
    /// Tasks started by this instance and not yet settled. Not persisted: after
    /// a restart the pending tasks of the current group are started again.
    started: HashSet<String>,
    policy: FailurePolicy,
    start_task: StartTaskFn,
    on_state_change: StateChangeFn,
}

impl std::fmt::Debug for AutostartQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutostartQueue")
            .field("state", &self.state)
            .field("started", &self.started)
            .field("policy", &self.policy)
            .finish()
    }
}

impl AutostartQueue {
    /// Begin a new queue at the first group and start advancing immediately.
    pub fn start(
        groups: Vec<ScheduleGroup>,
        start_task: StartTaskFn,
        on_state_change: StateChangeFn,
    ) -> Self {
        Self::start_with_policy(groups, FailurePolicy::default(), start_task, on_state_change)
    }

    pub fn start_with_policy(
        groups: Vec<ScheduleGroup>,
        policy: FailurePolicy,
        start_task: StartTaskFn,
        on_state_change: StateChangeFn,
    ) -> Self {
        let mut queue = Self {
            state: QueueState::new(groups),
            started: HashSet::new(),
            policy,
            start_task,
            on_state_change,
        };
        log_info!(
            "[queue] Starting autostart queue ({} groups)",
            queue.state.groups.len()
        );
        // Creation is itself a transition and must reach storage first.
        queue.advance(true);
        queue
    }

    /// Rehydrate a queue from persisted state.
    ///
    /// The saved groups win; `groups` is only used when the saved state has
    /// none. A running queue resumes at its cursor without restarting tasks
    /// already recorded as completed. A paused or completed queue is left as is.
    pub fn resume_from(
        saved: QueueState,
        groups: Vec<ScheduleGroup>,
        start_task: StartTaskFn,
        on_state_change: StateChangeFn,
    ) -> Result<Self, AutostartError> {
        Self::resume_from_with_policy(
            saved,
            groups,
            FailurePolicy::default(),
            start_task,
            on_state_change,
        )
    }

    pub fn resume_from_with_policy(
        mut saved: QueueState,
        groups: Vec<ScheduleGroup>,
        policy: FailurePolicy,
        start_task: StartTaskFn,
        on_state_change: StateChangeFn,
    ) -> Result<Self, AutostartError> {
        if saved.groups.is_empty() && !saved.is_completed() {
            if groups.is_empty() {
                return Err(AutostartError::NoSavedQueue);
            }
            saved.groups = groups;
        }

        let repaired = saved.normalize();
        let mut queue = Self {
            state: saved,
            started: HashSet::new(),
            policy,
            start_task,
            on_state_change,
        };
        log_info!(
            "[queue] Resuming autostart queue: {} at group {}/{} ({} tasks completed)",
            queue.state.status,
            (queue.state.cursor + 1).min(queue.state.groups.len()),
            queue.state.groups.len(),
            queue.state.completed_task_ids.len()
        );
        if queue.state.status == QueueStatus::Running {
            queue.advance(repaired);
        } else if repaired {
            queue.emit();
        }
        Ok(queue)
    }

    /// Pause the queue. In-flight tasks keep running and their completions are
    /// still recorded, but nothing new starts until `resume`.
    pub fn pause(&mut self, triggering_task_id: Option<&str>) {
        if self.state.mark_paused(triggering_task_id) {
            log_info!(
                "[queue] Paused{}",
                triggering_task_id
                    .map(|id| format!(" by {}", id))
                    .unwrap_or_default()
            );
            self.emit();
        }
    }

    /// Resume a paused queue and advance once, picking up completions recorded
    /// while paused. No-op when running or completed.
    pub fn resume(&mut self) {
        if self.state.mark_running() {
            log_info!("[queue] Resumed");
            self.advance(true);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused()
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    pub fn state(&self) -> &QueueState {
        &self.state
    }

    /// True if `task_id` belongs to any group of this queue.
    pub fn owns_task(&self, task_id: &str) -> bool {
        self.state.groups.iter().any(|g| g.contains(task_id))
    }

    /// Advancement entry point: a watched task reached a terminal state.
    ///
    /// Signals for tasks outside the current group are ignored: earlier groups
    /// are already settled, and later groups have not been started.
    pub fn on_task_terminal(&mut self, task_id: &str, outcome: TaskOutcome) {
        if self.state.is_completed() {
            return;
        }
        let in_current_group = self
            .state
            .current_group()
            .is_some_and(|g| g.contains(task_id));
        if !in_current_group {
            log_debug!(
                "[queue] Ignoring {:?} for {}: not in current group",
                outcome,
                task_id
            );
            return;
        }
        if self.state.is_task_settled(task_id) {
            log_debug!("[queue] Ignoring {:?} for {}: already settled", outcome, task_id);
            return;
        }

        self.started.remove(task_id);

        match outcome {
            TaskOutcome::Succeeded => {
                if !self.state.record_completed(task_id) {
                    return;
                }
                log_info!("[queue] {} completed", task_id);
                if self.state.status == QueueStatus::Running {
                    self.advance(true);
                } else {
                    self.emit();
                }
            }
            TaskOutcome::Failed => match self.policy {
                FailurePolicy::Pause => {
                    if self.state.mark_paused(Some(task_id)) {
                        log_warn!("[queue] {} failed, pausing queue", task_id);
                        self.emit();
                    }
                }
                FailurePolicy::Continue => {
                    if !self.state.record_failed(task_id) {
                        return;
                    }
                    log_warn!("[queue] {} failed, continuing", task_id);
                    if self.state.status == QueueStatus::Running {
                        self.advance(true);
                    } else {
                        self.emit();
                    }
                }
            },
        }
    }

    /// Move the cursor past settled groups, then start what the current group needs.
    ///
    /// `changed` carries mutations made by the caller so the hook fires once
    /// with the final state.
    fn advance(&mut self, mut changed: bool) {
        let mut to_start = Vec::new();

        while self.state.status == QueueStatus::Running {
            let Some(mode) = self.state.current_group().map(|g| g.mode) else {
                self.state.status = QueueStatus::Completed;
                self.state.touch();
                changed = true;
                log_info!(
                    "[queue] All {} groups done, queue completed",
                    self.state.groups.len()
                );
                break;
            };

            let pending = self.state.pending_in_current_group();
            if pending.is_empty() {
                self.state.cursor += 1;
                self.state.touch();
                changed = true;
                continue;
            }

            match mode {
                ScheduleMode::Sequential => {
                    if !self.started.contains(&pending[0]) {
                        to_start.push(pending[0].clone());
                    }
                }
                ScheduleMode::Parallel => {
                    to_start.extend(pending.into_iter().filter(|id| !self.started.contains(id)));
                }
            }
            break;
        }

        if changed {
            self.emit();
        }

        for task_id in to_start {
            log_info!(
                "[queue] Starting {} (group {}/{})",
                task_id,
                self.state.cursor + 1,
                self.state.groups.len()
            );
            self.started.insert(task_id.clone());
            (self.start_task)(&task_id);
        }
    }

    fn emit(&mut self) {
        (self.on_state_change)(&self.state);
    }
}

/// Start a brand-new queue with the default failure policy.
pub fn start_queue(
    groups: Vec<ScheduleGroup>,
    start_task: StartTaskFn,
    on_state_change: StateChangeFn,
) -> AutostartQueue {
    AutostartQueue::start(groups, start_task, on_state_change)
}

/// Rehydrate a persisted queue with the default failure policy.
pub fn resume_queue(
    saved: QueueState,
    groups: Vec<ScheduleGroup>,
    start_task: StartTaskFn,
    on_state_change: StateChangeFn,
) -> Result<AutostartQueue, AutostartError> {
    AutostartQueue::resume_from(saved, groups, start_task, on_state_change)
}
