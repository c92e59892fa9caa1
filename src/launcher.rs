use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use nix::unistd::Pid;

use crate::config::CommandConfig;
use crate::dispatcher::DispatcherHandle;
use crate::types::TaskSignal;
use crate::{log_debug, log_error, log_info, log_warn};

/// Maximum time to wait for launched process groups after SIGTERM before SIGKILL.
const SIGTERM_GRACE_PERIOD_SECONDS: u64 = 5;

const KILL_POLL_INTERVAL_MS: u64 = 100;

const TASK_ID_PLACEHOLDER: &str = "{task_id}";

// --- Collaborator seams ---

/// Starts a task in the execution engine. Fire-and-forget: completion is
/// reported later through the dispatcher's signal channel.
pub trait TaskLauncher: Send + Sync {
    fn start_task(&self, task_id: &str);
}

/// Asks the workspace service to fold a task's isolated workspace back into the main line.
pub trait MergeTrigger: Send + Sync {
    fn request_merge(&self, task_id: &str);
}

// --- Shutdown ---

fn shutdown_flag() -> &'static Arc<AtomicBool> {
    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    FLAG.get_or_init(|| Arc::new(AtomicBool::new(false)))
}

pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Install SIGTERM/SIGINT handlers that set the shutdown flag. Safe to call twice.
pub fn install_signal_handlers() -> Result<(), String> {
    let flag = Arc::clone(shutdown_flag());
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))
        .map_err(|e| format!("Failed to register SIGTERM handler: {}", e))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, flag)
        .map_err(|e| format!("Failed to register SIGINT handler: {}", e))?;
    Ok(())
}

// --- Launched process registry ---

fn process_registry() -> &'static Mutex<HashSet<Pid>> {
    static REGISTRY: OnceLock<Mutex<HashSet<Pid>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

fn register_child(pgid: Pid) {
    if let Ok(mut registry) = process_registry().lock() {
        registry.insert(pgid);
    }
}

fn unregister_child(pgid: Pid) {
    if let Ok(mut registry) = process_registry().lock() {
        registry.remove(&pgid);
    }
}

/// Terminate every task process group this process launched.
///
/// A restarted process re-starts the pending tasks of the current group, so
/// launched runs must not outlive the process that launched them.
pub fn kill_all_children() {
    use nix::sys::signal::{killpg, Signal};

    let pgids: Vec<Pid> = {
        let Ok(registry) = process_registry().lock() else {
            return;
        };
        registry.iter().copied().collect()
    };

    if pgids.is_empty() {
        return;
    }

    log_info!("Stopping {} launched task process(es)...", pgids.len());
    for &pgid in &pgids {
        let _ = killpg(pgid, Signal::SIGTERM);
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(SIGTERM_GRACE_PERIOD_SECONDS);
    let poll_interval = Duration::from_millis(KILL_POLL_INTERVAL_MS);
    while std::time::Instant::now() < deadline {
        let all_gone = pgids
            .iter()
            .all(|&pgid| matches!(killpg(pgid, None), Err(nix::errno::Errno::ESRCH)));
        if all_gone {
            break;
        }
        std::thread::sleep(poll_interval);
    }

    for &pgid in &pgids {
        let _ = killpg(pgid, Signal::SIGKILL);
    }

    if let Ok(mut registry) = process_registry().lock() {
        registry.clear();
    }
}

// --- Command-backed collaborators ---

/// Replace `{task_id}` in every argument.
pub fn expand_args(args: &[String], task_id: &str) -> Vec<String> {
    args.iter()
        .map(|a| a.replace(TASK_ID_PLACEHOLDER, task_id))
        .collect()
}

/// Spawn `program` in its own process group. `on_exit(success)` runs on the
/// current tokio runtime once the child exits.
fn spawn_detached<F>(program: &str, args: Vec<String>, label: String, on_exit: F) -> Result<(), String>
where
    F: FnOnce(bool) + Send + 'static,
{
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|_| format!("[{}] cannot launch outside a tokio runtime", label))?;

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(&args);
    // stdin MUST be null: the child sits in a background process group and a
    // terminal read would stop it with SIGTTIN.
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::inherit());
    cmd.stderr(std::process::Stdio::inherit());

    // SAFETY: pre_exec runs between fork() and exec() where only async-signal-safe
    // functions are permitted. setpgid is async-signal-safe per POSIX.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                .map_err(std::io::Error::other)?;
            Ok(())
        });
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| format!("[{}] failed to spawn {}: {}", label, program, e))?;
    let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));
    if let Some(pgid) = pgid {
        register_child(pgid);
    }
    log_debug!("[{}] spawned {} (pid={:?})", label, program, child.id());

    runtime.spawn(async move {
        let success = match child.wait().await {
            Ok(status) => {
                log_debug!("[{}] exited (status={:?})", label, status.code());
                status.success()
            }
            Err(e) => {
                log_warn!("[{}] failed waiting for process: {}", label, e);
                false
            }
        };
        if let Some(pgid) = pgid {
            unregister_child(pgid);
        }
        on_exit(success);
    });
    Ok(())
}

/// Starts tasks by running a configured program.
///
/// With a dispatcher attached, the program's exit is reported as the task's
/// terminal signal (exit 0 = succeeded). Without one, completion must arrive
/// through some other channel.
pub struct CommandLauncher {
    program: String,
    args: Vec<String>,
    exits: Option<DispatcherHandle>,
}

impl CommandLauncher {
    pub fn new(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
            exits: None,
        }
    }

    pub fn from_config(config: &CommandConfig) -> Option<Self> {
        config
            .command
            .as_deref()
            .map(|program| Self::new(program, config.args.clone()))
    }

    pub fn reporting_exits_to(mut self, handle: DispatcherHandle) -> Self {
        self.exits = Some(handle);
        self
    }
}

impl TaskLauncher for CommandLauncher {
    fn start_task(&self, task_id: &str) {
        let exits = self.exits.clone();
        let id = task_id.to_string();
        let result = spawn_detached(
            &self.program,
            expand_args(&self.args, task_id),
            format!("launch {}", task_id),
            move |success| {
                if let Some(handle) = exits {
                    let signal = if success {
                        TaskSignal::succeeded(&id)
                    } else {
                        TaskSignal::failed(&id)
                    };
                    handle.notify(signal);
                }
            },
        );
        if let Err(e) = result {
            log_error!("{}", e);
            // A launch that never happened is a failed run, not a silent hang.
            if let Some(handle) = &self.exits {
                handle.notify(TaskSignal::failed(task_id));
            }
        }
    }
}

/// Launcher used when no command is configured: logs the request only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyLauncher;

impl TaskLauncher for LogOnlyLauncher {
    fn start_task(&self, task_id: &str) {
        log_info!("[launch] {} ready to start (no launcher command configured)", task_id);
    }
}

pub struct CommandMergeTrigger {
    program: String,
    args: Vec<String>,
}

impl CommandMergeTrigger {
    pub fn from_config(config: &CommandConfig) -> Option<Self> {
        config.command.as_deref().map(|program| Self {
            program: program.to_string(),
            args: config.args.clone(),
        })
    }
}

impl MergeTrigger for CommandMergeTrigger {
    fn request_merge(&self, task_id: &str) {
        let id = task_id.to_string();
        let result = spawn_detached(
            &self.program,
            expand_args(&self.args, task_id),
            format!("merge {}", task_id),
            move |success| {
                if success {
                    log_info!("[merge] {} merged", id);
                } else {
                    log_warn!("[merge] {} merge command failed", id);
                }
            },
        );
        if let Err(e) = result {
            log_error!("{}", e);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyMerge;

impl MergeTrigger for LogOnlyMerge {
    fn request_merge(&self, task_id: &str) {
        log_info!("[merge] {} is eligible for auto-merge (no merge command configured)", task_id);
    }
}

// --- Recording collaborators ---

/// Records every start request in order.
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    started: Mutex<Vec<String>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl TaskLauncher for RecordingLauncher {
    fn start_task(&self, task_id: &str) {
        if let Ok(mut started) = self.started.lock() {
            started.push(task_id.to_string());
        }
    }
}

/// Records every merge request in order.
#[derive(Debug, Default)]
pub struct RecordingMerge {
    requested: Mutex<Vec<String>>,
}

impl RecordingMerge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl MergeTrigger for RecordingMerge {
    fn request_merge(&self, task_id: &str) {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(task_id.to_string());
        }
    }
}
