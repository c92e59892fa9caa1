use std::path::PathBuf;

/// Errors surfaced to callers of the autostart core.
///
/// Categories:
/// - User: the caller can fix it by acting (resume the right batch, stop the other process)
/// - Fatal: the on-disk state cannot be trusted, stop driving the batch
/// - Transient: storage or channel trouble, retrying later may succeed
///
/// Task failures are never errors; they pause the queue.
#[derive(Debug, thiserror::Error)]
pub enum AutostartError {
    // User
    #[error("no saved import queue found to resume")]
    NoSavedQueue,

    #[error("Autostart queue for batch {0} is already live")]
    QueueAlreadyLive(String),

    #[error("Batch {0} already has an unfinished saved queue; resume it instead")]
    QueueExists(String),

    #[error("No live autostart queue for batch {0}")]
    QueueNotFound(String),

    #[error("{0}")]
    LockHeld(String),

    // Fatal
    #[error("Corrupt autostart queue state at {}: {source}", path.display())]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // Transient
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Queue dispatcher shut down")]
    DispatcherClosed,
}

impl AutostartError {
    /// Returns true if the caller can resolve the error without touching the state files.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            AutostartError::NoSavedQueue
                | AutostartError::QueueAlreadyLive(_)
                | AutostartError::QueueExists(_)
                | AutostartError::QueueNotFound(_)
                | AutostartError::LockHeld(_)
        )
    }

    /// Returns true if the persisted queue cannot be driven any further.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AutostartError::CorruptState { .. })
    }
}

/// Lets `?` lift `AutostartError` into the `Result<T, String>` file helpers.
impl From<AutostartError> for String {
    fn from(err: AutostartError) -> String {
        err.to_string()
    }
}
