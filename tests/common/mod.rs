#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tempfile::TempDir;

use plan_autostart::config::ProjectConfig;
use plan_autostart::queue::{StartTaskFn, StateChangeFn};
use plan_autostart::types::{QueueState, ScheduleGroup, ScheduleMode, TaskRef};
use plan_autostart::workspace::ProjectLayout;

/// Creates a `TaskRef` titled `"Task {id}"`.
pub fn make_task(id: &str) -> TaskRef {
    TaskRef::new(id, &format!("Task {}", id))
}

/// A sequential group of `make_task` tasks.
pub fn seq(ids: &[&str]) -> ScheduleGroup {
    ScheduleGroup {
        tasks: ids.iter().map(|id| make_task(id)).collect(),
        mode: ScheduleMode::Sequential,
    }
}

/// A parallel group of `make_task` tasks.
pub fn par(ids: &[&str]) -> ScheduleGroup {
    ScheduleGroup {
        tasks: ids.iter().map(|id| make_task(id)).collect(),
        mode: ScheduleMode::Parallel,
    }
}

/// One observable effect of a queue, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Started(String),
    State(QueueState),
}

/// Captures `start_task` and `on_state_change` calls into one ordered log.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_fn(&self) -> StartTaskFn {
        let events = Arc::clone(&self.events);
        Box::new(move |id: &str| events.lock().unwrap().push(Event::Started(id.to_string())))
    }

    pub fn state_fn(&self) -> StateChangeFn {
        let events = Arc::clone(&self.events);
        Box::new(move |state: &QueueState| events.lock().unwrap().push(Event::State(state.clone())))
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Started(id) => Some(id),
                Event::State(_) => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<QueueState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::State(s) => Some(s),
                Event::Started(_) => None,
            })
            .collect()
    }

    pub fn last_state(&self) -> Option<QueueState> {
        self.states().pop()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

/// Creates a temp project root with the default layout.
pub fn setup_project() -> (TempDir, ProjectLayout) {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path(), &ProjectConfig::default());
    (dir, layout)
}

fn write_json(path: &Path, value: &Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

pub fn write_plan(layout: &ProjectLayout, task_id: &str, plan: Value) {
    write_json(&layout.primary_plan_path(task_id), &plan);
}

pub fn write_workspace_plan(layout: &ProjectLayout, task_id: &str, plan: Value) {
    write_json(&layout.workspace_plan_path(task_id), &plan);
}

pub fn write_metadata(layout: &ProjectLayout, task_id: &str, metadata: Value) {
    write_json(&layout.metadata_path(task_id), &metadata);
}

pub fn write_workspace_metadata(layout: &ProjectLayout, task_id: &str, metadata: Value) {
    write_json(&layout.workspace_metadata_path(task_id), &metadata);
}

/// Creates the task's workspace directory with a `.git` marker.
pub fn make_worktree(layout: &ProjectLayout, task_id: &str) {
    let dir = layout.workspace_dir(task_id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(".git"), "gitdir: ../../.git/worktrees/x\n").unwrap();
}

pub fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}
