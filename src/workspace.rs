use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::ProjectConfig;

pub const PLAN_FILE: &str = "implementation_plan.json";
pub const METADATA_FILE: &str = "task_metadata.json";
pub const QUEUE_FILE: &str = "autostart_queue.json";

/// Resolves where a project's task records, workspaces and queue files live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
    specs_dir: PathBuf,
    worktrees_dir: PathBuf,
    runtime_dir: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: &Path, project: &ProjectConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            specs_dir: PathBuf::from(&project.specs_dir),
            worktrees_dir: PathBuf::from(&project.worktrees_dir),
            runtime_dir: PathBuf::from(&project.runtime_dir),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.root.join(&self.runtime_dir)
    }

    /// `<root>/<specs_dir>/<task_id>`
    pub fn primary_task_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(&self.specs_dir).join(task_id)
    }

    /// `<root>/<worktrees_dir>/<task_id>`
    pub fn workspace_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(&self.worktrees_dir).join(task_id)
    }

    /// The task's record directory as checked out inside its isolated workspace.
    pub fn workspace_task_dir(&self, task_id: &str) -> PathBuf {
        self.workspace_dir(task_id)
            .join(&self.specs_dir)
            .join(task_id)
    }

    pub fn primary_plan_path(&self, task_id: &str) -> PathBuf {
        self.primary_task_dir(task_id).join(PLAN_FILE)
    }

    pub fn workspace_plan_path(&self, task_id: &str) -> PathBuf {
        self.workspace_task_dir(task_id).join(PLAN_FILE)
    }

    pub fn metadata_path(&self, task_id: &str) -> PathBuf {
        self.primary_task_dir(task_id).join(METADATA_FILE)
    }

    pub fn workspace_metadata_path(&self, task_id: &str) -> PathBuf {
        self.workspace_task_dir(task_id).join(METADATA_FILE)
    }

    /// Queue state is stored alongside the batch task's own record.
    pub fn queue_state_path(&self, batch_id: &str) -> PathBuf {
        self.primary_task_dir(batch_id).join(QUEUE_FILE)
    }
}

/// Existence check for a task's isolated workspace.
pub trait WorkspaceProbe: Send + Sync {
    fn workspace_exists(&self, layout: &ProjectLayout, task_id: &str) -> bool;
}

/// Treats a workspace as present when its directory carries a `.git` entry,
/// which is what `git worktree add` leaves behind.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsWorkspaceProbe;

impl WorkspaceProbe for FsWorkspaceProbe {
    fn workspace_exists(&self, layout: &ProjectLayout, task_id: &str) -> bool {
        layout.workspace_dir(task_id).join(".git").exists()
    }
}

/// Fixed answer set, for tests and for callers that track workspaces elsewhere.
#[derive(Debug, Default, Clone)]
pub struct StaticWorkspaceProbe {
    present: HashSet<String>,
}

impl StaticWorkspaceProbe {
    pub fn new<I, S>(task_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            present: task_ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl WorkspaceProbe for StaticWorkspaceProbe {
    fn workspace_exists(&self, _layout: &ProjectLayout, task_id: &str) -> bool {
        self.present.contains(task_id)
    }
}
