use std::collections::HashMap;

use crate::error::AutostartError;
use crate::queue::AutostartQueue;
use crate::types::{QueueState, TaskSignal};
use crate::{log_debug, log_info};

/// Live queues keyed by batch id.
///
/// Owned by the orchestration layer and passed to whatever needs to look up an
/// in-flight queue. Holds at most one queue per batch.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    queues: HashMap<String, AutostartQueue>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue for `batch_id`. Refuses a second live queue for the same batch.
    pub fn insert(&mut self, batch_id: &str, queue: AutostartQueue) -> Result<(), AutostartError> {
        if self.queues.contains_key(batch_id) {
            return Err(AutostartError::QueueAlreadyLive(batch_id.to_string()));
        }
        if queue.is_completed() {
            log_debug!("[registry] {} is already completed, not registering", batch_id);
            return Ok(());
        }
        self.queues.insert(batch_id.to_string(), queue);
        Ok(())
    }

    /// Re-attach to `batch_id`: if a queue is already live this is a no-op and
    /// `make` is never called. Returns true when a new queue was registered.
    pub fn attach_or_resume<F>(&mut self, batch_id: &str, make: F) -> Result<bool, AutostartError>
    where
        F: FnOnce() -> Result<AutostartQueue, AutostartError>,
    {
        if self.queues.contains_key(batch_id) {
            log_debug!("[registry] {} already live, re-attaching", batch_id);
            return Ok(false);
        }
        let queue = make()?;
        let live = !queue.is_completed();
        self.insert(batch_id, queue)?;
        Ok(live)
    }

    pub fn contains(&self, batch_id: &str) -> bool {
        self.queues.contains_key(batch_id)
    }

    pub fn get(&self, batch_id: &str) -> Option<&AutostartQueue> {
        self.queues.get(batch_id)
    }

    pub fn state(&self, batch_id: &str) -> Option<&QueueState> {
        self.queues.get(batch_id).map(|q| q.state())
    }

    pub fn batch_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.queues.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn pause(&mut self, batch_id: &str, triggering_task_id: Option<&str>) -> Result<(), AutostartError> {
        let queue = self
            .queues
            .get_mut(batch_id)
            .ok_or_else(|| AutostartError::QueueNotFound(batch_id.to_string()))?;
        queue.pause(triggering_task_id);
        Ok(())
    }

    pub fn resume(&mut self, batch_id: &str) -> Result<(), AutostartError> {
        let queue = self
            .queues
            .get_mut(batch_id)
            .ok_or_else(|| AutostartError::QueueNotFound(batch_id.to_string()))?;
        queue.resume();
        self.prune_completed();
        Ok(())
    }

    /// Route a terminal signal to every queue that owns the task, then drop
    /// queues that completed. Returns the ids of the batches that owned it.
    pub fn dispatch(&mut self, signal: &TaskSignal) -> Vec<String> {
        let mut owners = Vec::new();
        for (batch_id, queue) in self.queues.iter_mut() {
            if queue.owns_task(&signal.task_id) {
                queue.on_task_terminal(&signal.task_id, signal.outcome);
                owners.push(batch_id.clone());
            }
        }
        if owners.is_empty() {
            log_debug!(
                "[registry] {} is not scheduled by any live queue",
                signal.task_id
            );
        }
        owners.sort();
        self.prune_completed();
        owners
    }

    /// Drop completed queues. Their final state has already gone through the
    /// state-change hook. Returns the removed batch ids.
    pub fn prune_completed(&mut self) -> Vec<String> {
        let done: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, q)| q.is_completed())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &done {
            self.queues.remove(id);
            log_info!("[registry] Batch {} completed, releasing queue", id);
        }
        done
    }
}
