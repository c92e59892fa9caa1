use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::FailurePolicy;
use crate::error::AutostartError;
use crate::launcher::{MergeTrigger, TaskLauncher};
use crate::merge::decide_auto_merge;
use crate::plan::Task;
use crate::queue::{AutostartQueue, StartTaskFn, StateChangeFn};
use crate::queue_store::QueueStore;
use crate::registry::QueueRegistry;
use crate::status::StatusStore;
use crate::types::{
    QueueState, QueueStatus, ReviewReason, ScheduleGroup, TaskOutcome, TaskSignal, TaskStatus,
};
use crate::workspace::{ProjectLayout, WorkspaceProbe};
use crate::{log_debug, log_info, log_warn};

// --- Command enum ---

pub enum QueueCommand {
    StartBatch {
        batch_id: String,
        groups: Vec<ScheduleGroup>,
        reply: oneshot::Sender<Result<(), AutostartError>>,
    },
    ResumeBatch {
        batch_id: String,
        unpause: bool,
        reply: oneshot::Sender<Result<bool, AutostartError>>,
    },
    Signal {
        signal: TaskSignal,
        reply: Option<oneshot::Sender<Vec<String>>>,
    },
    Pause {
        batch_id: String,
        task_id: Option<String>,
        reply: oneshot::Sender<Result<(), AutostartError>>,
    },
    Resume {
        batch_id: String,
        reply: oneshot::Sender<Result<(), AutostartError>>,
    },
    GetState {
        batch_id: String,
        reply: oneshot::Sender<Option<QueueState>>,
    },
    LiveBatches {
        reply: oneshot::Sender<Vec<String>>,
    },
}

// --- DispatcherHandle ---

/// Cloneable sender side of the dispatcher. Every terminal signal and every
/// queue operation goes through this one channel, so queue steps never interleave
/// and commands are handled in the order they were sent.
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::UnboundedSender<QueueCommand>,
}

impl DispatcherHandle {
    async fn send_command<T>(
        &self,
        command: QueueCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, AutostartError> {
        self.sender
            .send(command)
            .map_err(|_| AutostartError::DispatcherClosed)?;
        rx.await.map_err(|_| AutostartError::DispatcherClosed)
    }

    pub async fn start_batch(
        &self,
        batch_id: &str,
        groups: Vec<ScheduleGroup>,
    ) -> Result<(), AutostartError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            QueueCommand::StartBatch {
                batch_id: batch_id.to_string(),
                groups,
                reply,
            },
            rx,
        )
        .await?
    }

    /// Re-attach to a saved batch. Returns true if a queue was loaded, false if
    /// one was already live in this dispatcher. With `unpause`, a paused queue
    /// is resumed once attached.
    pub async fn resume_batch(
        &self,
        batch_id: &str,
        unpause: bool,
    ) -> Result<bool, AutostartError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            QueueCommand::ResumeBatch {
                batch_id: batch_id.to_string(),
                unpause,
                reply,
            },
            rx,
        )
        .await?
    }

    /// Deliver a terminal signal and wait until it has been applied.
    /// Returns the batches that scheduled the task.
    pub async fn signal(&self, signal: TaskSignal) -> Result<Vec<String>, AutostartError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            QueueCommand::Signal {
                signal,
                reply: Some(reply),
            },
            rx,
        )
        .await
    }

    /// Deliver a terminal signal without waiting. Usable from non-async callbacks.
    pub fn notify(&self, signal: TaskSignal) {
        let command = QueueCommand::Signal {
            signal,
            reply: None,
        };
        if self.sender.send(command).is_err() {
            log_warn!("Dropped task signal: dispatcher shut down");
        }
    }

    pub async fn pause(&self, batch_id: &str, task_id: Option<&str>) -> Result<(), AutostartError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            QueueCommand::Pause {
                batch_id: batch_id.to_string(),
                task_id: task_id.map(str::to_string),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn resume(&self, batch_id: &str) -> Result<(), AutostartError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            QueueCommand::Resume {
                batch_id: batch_id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn get_state(&self, batch_id: &str) -> Result<Option<QueueState>, AutostartError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            QueueCommand::GetState {
                batch_id: batch_id.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn live_batches(&self) -> Result<Vec<String>, AutostartError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(QueueCommand::LiveBatches { reply }, rx)
            .await
    }
}

// --- Context ---

/// Everything the dispatcher needs from the outside world.
pub struct DispatcherContext {
    pub layout: ProjectLayout,
    pub failure_policy: FailurePolicy,
    pub auto_merge: bool,
    pub launcher: Arc<dyn TaskLauncher>,
    pub merge: Arc<dyn MergeTrigger>,
    pub probe: Arc<dyn WorkspaceProbe>,
}

// --- Pure helpers ---

/// Status the batch task itself shows while its queue is in `status`.
pub fn batch_status_for(status: QueueStatus) -> (TaskStatus, Option<ReviewReason>) {
    match status {
        QueueStatus::Running => (TaskStatus::InProgress, None),
        QueueStatus::Paused => (TaskStatus::HumanReview, Some(ReviewReason::Stopped)),
        QueueStatus::Completed => (TaskStatus::Done, None),
    }
}

/// Status a task's record gets when its run ends.
pub fn task_status_for(outcome: TaskOutcome) -> (TaskStatus, ReviewReason) {
    match outcome {
        TaskOutcome::Succeeded => (TaskStatus::HumanReview, ReviewReason::Completed),
        TaskOutcome::Failed => (TaskStatus::HumanReview, ReviewReason::Errors),
    }
}

/// State-change hook for one batch: persist the queue, then propagate the
/// batch task's own status whenever the queue status changes.
///
/// Write failures are logged; the in-memory queue stays authoritative and the
/// next transition writes again.
pub fn persisting_hook(
    batch_id: &str,
    queue_store: QueueStore,
    status_store: StatusStore,
) -> StateChangeFn {
    let batch_id = batch_id.to_string();
    let mut last_status: Option<QueueStatus> = None;
    Box::new(move |state: &QueueState| {
        if let Err(e) = queue_store.save(&batch_id, state) {
            log_warn!("[dispatch] Failed to persist queue for {}: {}", batch_id, e);
        }
        if last_status != Some(state.status) {
            last_status = Some(state.status);
            let (status, reason) = batch_status_for(state.status);
            status_store.persist_status(&batch_id, status, reason);
        }
    })
}

fn launcher_fn(launcher: Arc<dyn TaskLauncher>) -> StartTaskFn {
    Box::new(move |task_id: &str| launcher.start_task(task_id))
}

// --- Actor implementation ---

struct DispatcherState {
    ctx: DispatcherContext,
    registry: QueueRegistry,
    queue_store: QueueStore,
    status_store: StatusStore,
}

impl DispatcherState {
    fn new(ctx: DispatcherContext) -> Self {
        let queue_store = QueueStore::new(ctx.layout.clone());
        let status_store = StatusStore::new(ctx.layout.clone());
        Self {
            ctx,
            registry: QueueRegistry::new(),
            queue_store,
            status_store,
        }
    }

    fn hook(&self, batch_id: &str) -> StateChangeFn {
        persisting_hook(batch_id, self.queue_store.clone(), self.status_store.clone())
    }
}

fn handle_start_batch(
    state: &mut DispatcherState,
    batch_id: &str,
    groups: Vec<ScheduleGroup>,
) -> Result<(), AutostartError> {
    if state.registry.contains(batch_id) {
        return Err(AutostartError::QueueAlreadyLive(batch_id.to_string()));
    }
    if let Some(saved) = state.queue_store.load(batch_id)? {
        if !saved.is_completed() {
            return Err(AutostartError::QueueExists(batch_id.to_string()));
        }
    }

    let queue = AutostartQueue::start_with_policy(
        groups,
        state.ctx.failure_policy,
        launcher_fn(Arc::clone(&state.ctx.launcher)),
        state.hook(batch_id),
    );
    state.registry.insert(batch_id, queue)
}

fn handle_resume_batch(
    state: &mut DispatcherState,
    batch_id: &str,
    unpause: bool,
) -> Result<bool, AutostartError> {
    let queue_store = state.queue_store.clone();
    let policy = state.ctx.failure_policy;
    let start = launcher_fn(Arc::clone(&state.ctx.launcher));
    let hook = state.hook(batch_id);
    let loaded = state.registry.attach_or_resume(batch_id, || {
        let saved = queue_store.load_for_resume(batch_id)?;
        AutostartQueue::resume_from_with_policy(saved, Vec::new(), policy, start, hook)
    })?;

    // A completed queue is never registered.
    if unpause && state.registry.contains(batch_id) {
        state.registry.resume(batch_id)?;
    }
    Ok(loaded)
}

fn handle_signal(state: &mut DispatcherState, signal: &TaskSignal) -> Vec<String> {
    let (status, reason) = task_status_for(signal.outcome);
    state
        .status_store
        .persist_status(&signal.task_id, status, Some(reason));

    if signal.outcome == TaskOutcome::Succeeded {
        consider_auto_merge(state, &signal.task_id);
    }

    state.registry.dispatch(signal)
}

fn consider_auto_merge(state: &DispatcherState, task_id: &str) {
    let layout = &state.ctx.layout;
    let task = Task::load(layout, task_id);
    let decision = decide_auto_merge(&task, layout, state.ctx.probe.as_ref());

    if decision.eligible {
        if state.ctx.auto_merge {
            log_info!("[dispatch] {} eligible for auto-merge, requesting merge", task_id);
            state.ctx.merge.request_merge(task_id);
        } else {
            log_info!("[dispatch] {} eligible for auto-merge (disabled in config)", task_id);
        }
        return;
    }

    let reason = decision.reason_code().unwrap_or_default();
    if decision.requires_merge_review {
        log_info!("[dispatch] {} needs review before merge", task_id);
    } else {
        log_debug!("[dispatch] {} not auto-merged: {}", task_id, reason);
    }
}

async fn run_dispatcher(
    mut rx: mpsc::UnboundedReceiver<QueueCommand>,
    mut state: DispatcherState,
    cancel: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = rx.recv() => match command {
                Some(c) => c,
                None => break,
            },
        };

        match command {
            QueueCommand::StartBatch {
                batch_id,
                groups,
                reply,
            } => {
                let result = handle_start_batch(&mut state, &batch_id, groups);
                let _ = reply.send(result);
            }
            QueueCommand::ResumeBatch {
                batch_id,
                unpause,
                reply,
            } => {
                let result = handle_resume_batch(&mut state, &batch_id, unpause);
                let _ = reply.send(result);
            }
            QueueCommand::Signal { signal, reply } => {
                let owners = handle_signal(&mut state, &signal);
                if let Some(reply) = reply {
                    let _ = reply.send(owners);
                }
            }
            QueueCommand::Pause {
                batch_id,
                task_id,
                reply,
            } => {
                let result = state.registry.pause(&batch_id, task_id.as_deref());
                let _ = reply.send(result);
            }
            QueueCommand::Resume { batch_id, reply } => {
                let result = state.registry.resume(&batch_id);
                let _ = reply.send(result);
            }
            QueueCommand::GetState { batch_id, reply } => {
                let current = match state.registry.state(&batch_id) {
                    Some(s) => Some(s.clone()),
                    None => state.queue_store.load(&batch_id).unwrap_or_else(|e| {
                        log_warn!("[dispatch] {}", e);
                        None
                    }),
                };
                let _ = reply.send(current);
            }
            QueueCommand::LiveBatches { reply } => {
                let _ = reply.send(state.registry.batch_ids());
            }
        }
    }
    log_debug!(
        "[dispatch] Dispatcher stopped with {} live queue(s)",
        state.registry.len()
    );
}

// --- Spawn ---

/// Create the command channel without starting the actor, so collaborators
/// (a launcher reporting exits, for one) can hold a handle before it runs.
pub fn channel() -> (DispatcherHandle, mpsc::UnboundedReceiver<QueueCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DispatcherHandle { sender: tx }, rx)
}

pub fn spawn_with_receiver(
    rx: mpsc::UnboundedReceiver<QueueCommand>,
    ctx: DispatcherContext,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_dispatcher(rx, DispatcherState::new(ctx), cancel))
}

pub fn spawn_dispatcher(
    ctx: DispatcherContext,
    cancel: CancellationToken,
) -> (DispatcherHandle, tokio::task::JoinHandle<()>) {
    let (handle, rx) = channel();
    let task_handle = spawn_with_receiver(rx, ctx, cancel);
    (handle, task_handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_status_tracks_queue_status() {
        assert_eq!(
            batch_status_for(QueueStatus::Running),
            (TaskStatus::InProgress, None)
        );
        assert_eq!(
            batch_status_for(QueueStatus::Paused),
            (TaskStatus::HumanReview, Some(ReviewReason::Stopped))
        );
        assert_eq!(
            batch_status_for(QueueStatus::Completed),
            (TaskStatus::Done, None)
        );
    }

    #[test]
    fn failed_runs_land_in_review_with_errors() {
        assert_eq!(
            task_status_for(TaskOutcome::Failed),
            (TaskStatus::HumanReview, ReviewReason::Errors)
        );
    }
}
