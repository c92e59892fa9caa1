use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;

use plan_autostart::config::{self, AutostartConfig, CONFIG_FILE};
use plan_autostart::dispatcher::{self, DispatcherContext, DispatcherHandle};
use plan_autostart::launcher::{
    install_signal_handlers, is_shutdown_requested, kill_all_children, CommandLauncher,
    CommandMergeTrigger, LogOnlyLauncher, LogOnlyMerge, MergeTrigger, TaskLauncher,
};
use plan_autostart::lock;
use plan_autostart::log::LogLevel;
use plan_autostart::merge::decide_auto_merge;
use plan_autostart::plan::Task;
use plan_autostart::queue_store::QueueStore;
use plan_autostart::schedule::{build_schedule, default_schedule};
use plan_autostart::status::StatusStore;
use plan_autostart::types::{
    parse_review_reason, parse_task_status, QueueState, RawScheduleGroup, ScheduleGroup, TaskRef,
    TaskSignal,
};
use plan_autostart::workspace::{FsWorkspaceProbe, ProjectLayout};
use plan_autostart::{log_error, log_info, log_warn};

const SHUTDOWN_POLL_INTERVAL_MS: u64 = 100;
const LIVE_POLL_INTERVAL_MS: u64 = 250;

#[derive(Parser)]
#[command(name = "plan-autostart", about = "Autostart scheduler for imported task batches")]
struct Cli {
    /// Project root directory (defaults to current directory)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Log verbosity level (error, warn, info, debug)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the record directories and a starter autostart.toml
    Init,
    /// Resolve a plan's declared schedule against created tasks and print the groups
    Schedule {
        /// JSON file with `schedule` (declared groups) and `created` (tasks), or "-" for stdin
        input: PathBuf,
    },
    /// Start a new autostart queue for a batch and drive it to completion
    Start {
        /// Batch task id that owns the queue
        #[arg(long)]
        batch: String,
        /// JSON file with `schedule` and `created`, or "-" for stdin
        #[arg(long)]
        input: PathBuf,
        /// Read task signals and control lines as JSON from stdin
        #[arg(long)]
        stdin_signals: bool,
    },
    /// Resume a batch's saved autostart queue and drive it to completion
    Resume {
        #[arg(long)]
        batch: String,
        #[arg(long)]
        stdin_signals: bool,
    },
    /// Pause a batch's saved queue while no process is driving it
    Pause {
        #[arg(long)]
        batch: String,
    },
    /// Show a batch's saved queue
    Status {
        #[arg(long)]
        batch: String,
    },
    /// Print the auto-merge decision for a task as JSON
    DecideMerge {
        task_id: String,
    },
    /// Write a task's status to its primary record and workspace copy
    SetStatus {
        task_id: String,
        /// backlog, in_progress, ai_review, human_review, or done
        status: String,
        /// completed, errors, qa_rejected, plan_review, or stopped
        #[arg(long)]
        reason: Option<String>,
    },
}

/// Input accepted by `schedule` and `start`.
#[derive(Deserialize)]
struct ScheduleInput {
    #[serde(default)]
    schedule: Vec<RawScheduleGroup>,
    created: Vec<TaskRef>,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum ControlCommand {
    Pause,
    Resume,
}

/// One line on stdin while driving a batch.
#[derive(Deserialize)]
#[serde(untagged)]
enum StdinLine {
    Signal(TaskSignal),
    Control { command: ControlCommand },
}

enum Drive {
    Start(Vec<ScheduleGroup>),
    Resume,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.log_level.parse::<LogLevel>() {
        Ok(level) => plan_autostart::log::set_log_level(level),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    let root = &cli.root;

    let result = match cli.command {
        Commands::Init => handle_init(root),
        Commands::Schedule { input } => handle_schedule(&input),
        Commands::Start {
            batch,
            input,
            stdin_signals,
        } => match read_schedule_input(&input) {
            Ok(groups) => handle_drive(root, &batch, Drive::Start(groups), stdin_signals).await,
            Err(e) => Err(e),
        },
        Commands::Resume {
            batch,
            stdin_signals,
        } => handle_drive(root, &batch, Drive::Resume, stdin_signals).await,
        Commands::Pause { batch } => handle_pause(root, &batch),
        Commands::Status { batch } => handle_status(root, &batch),
        Commands::DecideMerge { task_id } => handle_decide_merge(root, &task_id),
        Commands::SetStatus {
            task_id,
            status,
            reason,
        } => handle_set_status(root, &task_id, &status, reason.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_layout(root: &Path) -> Result<(AutostartConfig, ProjectLayout), String> {
    let config = config::load_config(root)?;
    let layout = ProjectLayout::new(root, &config.project);
    Ok((config, layout))
}

fn read_input(path: &Path) -> Result<String, String> {
    if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())
            .map_err(|e| format!("Failed to read stdin: {}", e))
    } else {
        fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))
    }
}

fn read_schedule_input(path: &Path) -> Result<Vec<ScheduleGroup>, String> {
    let contents = read_input(path)?;
    let input: ScheduleInput = serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse schedule input: {}", e))?;

    let groups = if input.schedule.is_empty() {
        default_schedule(&input.created)
    } else {
        build_schedule(&input.schedule, &input.created)
    };
    if groups.is_empty() {
        return Err("Schedule resolved to no tasks".to_string());
    }
    Ok(groups)
}

fn handle_init(root: &Path) -> Result<(), String> {
    let config = AutostartConfig::default();
    let project = &config.project;
    for dir in [&project.specs_dir, &project.worktrees_dir, &project.runtime_dir] {
        let dir_path = root.join(dir);
        fs::create_dir_all(&dir_path)
            .map_err(|e| format!("Failed to create {}: {}", dir_path.display(), e))?;
    }

    let config_path = root.join(CONFIG_FILE);
    if !config_path.exists() {
        fs::write(&config_path, config::default_config_toml())
            .map_err(|e| format!("Failed to write {}: {}", config_path.display(), e))?;
    }

    // Lock and PID files are per machine.
    let gitignore_path = root.join(".gitignore");
    let gitignore_entry = format!("{}/locks/", project.runtime_dir);
    let existing = if gitignore_path.exists() {
        fs::read_to_string(&gitignore_path)
            .map_err(|e| format!("Failed to read .gitignore: {}", e))?
    } else {
        String::new()
    };
    if !existing.lines().any(|line| line.trim() == gitignore_entry) {
        let mut contents = existing;
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(&gitignore_entry);
        contents.push('\n');
        fs::write(&gitignore_path, contents)
            .map_err(|e| format!("Failed to write .gitignore: {}", e))?;
    }

    println!("Initialized plan-autostart in {}", root.display());
    println!(
        "  Created: {}/, {}/, {}/",
        project.specs_dir, project.worktrees_dir, project.runtime_dir
    );
    println!("  Created: {}", CONFIG_FILE);
    println!("  Updated: .gitignore");
    Ok(())
}

fn handle_schedule(input: &Path) -> Result<(), String> {
    let groups = read_schedule_input(input)?;
    let json = serde_json::to_string_pretty(&groups)
        .map_err(|e| format!("Failed to serialize schedule: {}", e))?;
    println!("{}", json);
    Ok(())
}

async fn handle_drive(
    root: &Path,
    batch_id: &str,
    drive: Drive,
    stdin_signals: bool,
) -> Result<(), String> {
    install_signal_handlers()?;

    let (config, layout) = load_layout(root)?;
    log_info!("[pre] Acquiring lock for batch {}...", batch_id);
    let _lock = lock::try_acquire_batch(&layout.runtime_dir(), batch_id)?;

    log_info!(
        "[config] on_failure={:?}, auto_merge={}, launcher={}",
        config.queue.on_failure,
        config.merge.auto_merge,
        config.launcher.command.as_deref().unwrap_or("-")
    );

    let cancel = CancellationToken::new();
    let (handle, rx) = dispatcher::channel();

    let launcher: Arc<dyn TaskLauncher> = match CommandLauncher::from_config(&config.launcher) {
        Some(l) => Arc::new(l.reporting_exits_to(handle.clone())),
        None => {
            if !stdin_signals {
                log_warn!("[config] No launcher command and no --stdin-signals: tasks will never report back");
            }
            Arc::new(LogOnlyLauncher)
        }
    };
    let merge: Arc<dyn MergeTrigger> =
        match CommandMergeTrigger::from_config(&config.merge.command_config()) {
            Some(m) => Arc::new(m),
            None => Arc::new(LogOnlyMerge),
        };

    let ctx = DispatcherContext {
        layout,
        failure_policy: config.queue.on_failure,
        auto_merge: config.merge.auto_merge,
        launcher,
        merge,
        probe: Arc::new(FsWorkspaceProbe),
    };
    let dispatcher_task = dispatcher::spawn_with_receiver(rx, ctx, cancel.clone());

    let drive_result = match drive {
        Drive::Start(groups) => handle.start_batch(batch_id, groups).await,
        Drive::Resume => handle.resume_batch(batch_id, true).await.map(|_| ()),
    };
    if let Err(e) = drive_result {
        cancel.cancel();
        let _ = dispatcher_task.await;
        return Err(e.to_string());
    }

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        loop {
            if is_shutdown_requested() {
                cancel_clone.cancel();
                break;
            }
            tokio::time::sleep(Duration::from_millis(SHUTDOWN_POLL_INTERVAL_MS)).await;
        }
    });

    if stdin_signals {
        tokio::spawn(read_stdin_lines(handle.clone(), batch_id.to_string(), cancel.clone()));
    }

    let mut last_status = None;
    loop {
        if cancel.is_cancelled() {
            log_warn!("Shutdown requested, stopping with batch {} unfinished", batch_id);
            break;
        }
        match handle.get_state(batch_id).await {
            Ok(Some(state)) => {
                if last_status != Some(state.status) {
                    last_status = Some(state.status);
                    log_queue_state(batch_id, &state);
                }
                if state.is_completed() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                log_error!("{}", e);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(LIVE_POLL_INTERVAL_MS)).await;
    }

    cancel.cancel();
    kill_all_children();
    if let Err(err) = dispatcher_task.await {
        log_warn!("Dispatcher task panicked: {:?}", err);
    }
    Ok(())
}

async fn read_stdin_lines(handle: DispatcherHandle, batch_id: String, cancel: CancellationToken) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log_warn!("[stdin] Read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let result = match serde_json::from_str::<StdinLine>(&line) {
            Ok(StdinLine::Signal(signal)) => handle.signal(signal).await.map(|_| ()),
            Ok(StdinLine::Control {
                command: ControlCommand::Pause,
            }) => handle.pause(&batch_id, None).await,
            Ok(StdinLine::Control {
                command: ControlCommand::Resume,
            }) => handle.resume(&batch_id).await,
            Err(e) => {
                log_warn!("[stdin] Ignoring unparseable line: {}", e);
                continue;
            }
        };
        if let Err(e) = result {
            log_warn!("[stdin] {}", e);
        }
    }
}

fn log_queue_state(batch_id: &str, state: &QueueState) {
    log_info!(
        "[{}] {} at group {}/{}, {} task(s) completed",
        batch_id,
        state.status,
        (state.cursor + 1).min(state.groups.len()),
        state.groups.len(),
        state.completed_task_ids.len()
    );
    if let Some(task_id) = &state.paused_by_task_id {
        log_info!("[{}] Paused by failure of {}", batch_id, task_id);
    }
}

fn handle_pause(root: &Path, batch_id: &str) -> Result<(), String> {
    let (_, layout) = load_layout(root)?;
    let _lock = lock::try_acquire_batch(&layout.runtime_dir(), batch_id)?;

    let store = QueueStore::new(layout.clone());
    let mut state = store.load_for_resume(batch_id)?;
    if !state.mark_paused(None) {
        println!("Batch {} is already {}", batch_id, state.status);
        return Ok(());
    }
    store.save(batch_id, &state)?;

    let (status, reason) = dispatcher::batch_status_for(state.status);
    StatusStore::new(layout).persist_status(batch_id, status, reason);
    println!("Paused batch {}", batch_id);
    Ok(())
}

fn handle_status(root: &Path, batch_id: &str) -> Result<(), String> {
    let (_, layout) = load_layout(root)?;
    let store = QueueStore::new(layout.clone());
    let Some(state) = store.load(batch_id)? else {
        println!("No saved queue for batch {}.", batch_id);
        return Ok(());
    };

    println!(
        "Batch {}: {} (group {}/{}, updated {})",
        batch_id,
        state.status,
        (state.cursor + 1).min(state.groups.len()),
        state.groups.len(),
        state.updated_at.to_rfc3339()
    );
    if let Some(task_id) = &state.paused_by_task_id {
        println!("Paused by: {}", task_id);
    }

    println!("{:<6} {:<11} {:<24} {:<10} TITLE", "GROUP", "MODE", "TASK", "STATE");
    println!("{}", "-".repeat(72));
    for (index, group) in state.groups.iter().enumerate() {
        for task in &group.tasks {
            let task_state = if state.is_task_completed(&task.id) {
                "done"
            } else if state.failed_task_ids.contains(&task.id) {
                "failed"
            } else if index == state.cursor {
                "current"
            } else {
                "waiting"
            };
            println!(
                "{:<6} {:<11} {:<24} {:<10} {}",
                index + 1,
                format!("{:?}", group.mode).to_lowercase(),
                task.id,
                task_state,
                task.title
            );
        }
    }

    if let Some(record) = StatusStore::new(layout).read_status(batch_id) {
        println!(
            "\nBatch task status: {} ({})",
            record.status.as_deref().unwrap_or("-"),
            record.review_reason.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn handle_decide_merge(root: &Path, task_id: &str) -> Result<(), String> {
    let (_, layout) = load_layout(root)?;
    let task = Task::load(&layout, task_id);
    let decision = decide_auto_merge(&task, &layout, &FsWorkspaceProbe);
    let json = serde_json::to_string_pretty(&decision)
        .map_err(|e| format!("Failed to serialize decision: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn handle_set_status(
    root: &Path,
    task_id: &str,
    status: &str,
    reason: Option<&str>,
) -> Result<(), String> {
    let status = parse_task_status(status)?;
    let reason = reason.map(parse_review_reason).transpose()?;
    let (_, layout) = load_layout(root)?;

    let report = StatusStore::new(layout).persist_status(task_id, status, reason);
    println!(
        "{}: {} (primary: {:?}, workspace: {:?})",
        task_id, status, report.primary, report.workspace
    );
    if !report.is_complete() {
        return Err(format!("Status for {} was only partially written", task_id));
    }
    Ok(())
}
