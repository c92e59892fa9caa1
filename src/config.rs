use std::path::Path;

use serde::Deserialize;

pub const CONFIG_FILE: &str = "autostart.toml";

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AutostartConfig {
    pub project: ProjectConfig,
    pub queue: QueueConfig,
    pub launcher: CommandConfig,
    pub merge: MergeConfig,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ProjectConfig {
    /// Directory holding one record directory per task, relative to the project root.
    pub specs_dir: String,
    /// Directory holding one isolated workspace per task, relative to the project root.
    pub worktrees_dir: String,
    /// Lock files and other per-process state.
    pub runtime_dir: String,
}

/// What a queue does when a scheduled task terminates unsuccessfully.
#[derive(Default, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Pause the whole queue and record the failing task.
    #[default]
    Pause,
    /// Treat the failure as terminal for its group and keep going.
    Continue,
}

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub on_failure: FailurePolicy,
}

/// An external program invoked per task. `{task_id}` in `args` is substituted.
#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CommandConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MergeConfig {
    pub auto_merge: bool,
    pub command: Option<String>,
    pub args: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            specs_dir: ".autostart/specs".to_string(),
            worktrees_dir: ".autostart/worktrees".to_string(),
            runtime_dir: ".autostart".to_string(),
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            auto_merge: true,
            command: None,
            args: Vec::new(),
        }
    }
}

impl MergeConfig {
    pub fn command_config(&self) -> CommandConfig {
        CommandConfig {
            command: self.command.clone(),
            args: self.args.clone(),
        }
    }
}

pub fn validate(config: &AutostartConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let project = &config.project;

    for (name, value) in [
        ("project.specs_dir", &project.specs_dir),
        ("project.worktrees_dir", &project.worktrees_dir),
        ("project.runtime_dir", &project.runtime_dir),
    ] {
        if value.trim().is_empty() {
            errors.push(format!("{} must not be empty", name));
        } else if Path::new(value).is_absolute() {
            errors.push(format!(
                "{} must be relative to the project root, got '{}'",
                name, value
            ));
        }
    }

    if !project.specs_dir.trim().is_empty() && project.specs_dir == project.worktrees_dir {
        errors.push(format!(
            "project.specs_dir and project.worktrees_dir must differ (both '{}')",
            project.specs_dir
        ));
    }

    check_command("launcher", &config.launcher, &mut errors);
    check_command("merge", &config.merge.command_config(), &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_command(section: &str, command: &CommandConfig, errors: &mut Vec<String>) {
    match &command.command {
        Some(program) if program.trim().is_empty() => {
            errors.push(format!("{}.command must not be empty", section));
        }
        None if !command.args.is_empty() => {
            errors.push(format!("{}.args is set but {}.command is missing", section, section));
        }
        _ => {}
    }
}

pub fn load_config(project_root: &Path) -> Result<AutostartConfig, String> {
    let config_path = project_root.join(CONFIG_FILE);

    if !config_path.exists() {
        return Ok(AutostartConfig::default());
    }

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| format!("Failed to read {}: {}", config_path.display(), e))?;

    let config: AutostartConfig = toml::from_str(&contents)
        .map_err(|e| format!("Failed to parse {}: {}", config_path.display(), e))?;

    validate(&config).map_err(|errors| {
        format!(
            "Config validation failed:\n{}",
            errors
                .iter()
                .map(|e| format!("  - {}", e))
                .collect::<Vec<_>>()
                .join("\n")
        )
    })?;

    Ok(config)
}

/// Starter config written by `init`. Every key is commented with its default.
pub fn default_config_toml() -> &'static str {
    r#"[project]
# specs_dir = ".autostart/specs"
# worktrees_dir = ".autostart/worktrees"
# runtime_dir = ".autostart"

[queue]
# What to do when a scheduled task fails: "pause" or "continue"
on_failure = "pause"

[launcher]
# Program started (fire-and-forget) for each scheduled task.
# command = "agent-runner"
# args = ["run", "--task", "{task_id}"]

[merge]
auto_merge = true
# command = "agent-runner"
# args = ["merge", "--task", "{task_id}"]
"#
}
