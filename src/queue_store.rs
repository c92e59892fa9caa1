use std::fs;

use crate::error::AutostartError;
use crate::plan::write_json_atomic;
use crate::types::QueueState;
use crate::workspace::ProjectLayout;

/// Durable home of each batch's `QueueState`, one JSON document per batch.
#[derive(Clone, Debug)]
pub struct QueueStore {
    layout: ProjectLayout,
}

impl QueueStore {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }

    /// Load the saved queue for `batch_id`. A missing file is `Ok(None)`;
    /// an unreadable or unparseable one is an error.
    pub fn load(&self, batch_id: &str) -> Result<Option<QueueState>, AutostartError> {
        let path = self.layout.queue_state_path(batch_id);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AutostartError::Storage(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let state = serde_json::from_str(&contents)
            .map_err(|source| AutostartError::CorruptState { path, source })?;
        Ok(Some(state))
    }

    /// Load the saved queue or fail with the user-facing "nothing to resume" error.
    pub fn load_for_resume(&self, batch_id: &str) -> Result<QueueState, AutostartError> {
        match self.load(batch_id)? {
            Some(state) if !state.groups.is_empty() || state.is_completed() => Ok(state),
            _ => Err(AutostartError::NoSavedQueue),
        }
    }

    pub fn save(&self, batch_id: &str, state: &QueueState) -> Result<(), String> {
        write_json_atomic(&self.layout.queue_state_path(batch_id), state)
    }

    /// Delete a batch's saved queue. Missing files are fine.
    pub fn remove(&self, batch_id: &str) -> Result<(), String> {
        let path = self.layout.queue_state_path(batch_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(format!("Failed to remove {}: {}", path.display(), e)),
        }
    }
}
