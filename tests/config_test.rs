use std::fs;

use plan_autostart::config::{
    default_config_toml, load_config, validate, AutostartConfig, FailurePolicy, CONFIG_FILE,
};

#[test]
fn missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(dir.path()).unwrap();

    assert_eq!(config, AutostartConfig::default());
    assert_eq!(config.project.specs_dir, ".autostart/specs");
    assert_eq!(config.queue.on_failure, FailurePolicy::Pause);
    assert!(config.merge.auto_merge);
    assert!(config.launcher.command.is_none());
}

#[test]
fn partial_file_fills_in_defaults() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join(CONFIG_FILE),
        r#"
[queue]
on_failure = "continue"

[launcher]
command = "runner"
args = ["start", "{task_id}"]
"#,
    )
    .unwrap();

    let config = load_config(dir.path()).unwrap();
    assert_eq!(config.queue.on_failure, FailurePolicy::Continue);
    assert_eq!(config.launcher.command.as_deref(), Some("runner"));
    assert_eq!(config.launcher.args, vec!["start", "{task_id}"]);
    assert_eq!(config.project.worktrees_dir, ".autostart/worktrees");
    assert!(config.merge.auto_merge);
}

#[test]
fn starter_config_parses_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(CONFIG_FILE), default_config_toml()).unwrap();
    assert_eq!(load_config(dir.path()).unwrap(), AutostartConfig::default());
}

#[test]
fn unknown_failure_policy_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join(CONFIG_FILE),
        "[queue]\non_failure = \"retry\"\n",
    )
    .unwrap();

    let err = load_config(dir.path()).unwrap_err();
    assert!(err.contains("Failed to parse"), "{}", err);
}

#[test]
fn validation_collects_every_problem() {
    let mut config = AutostartConfig::default();
    config.project.specs_dir = "/abs/specs".to_string();
    config.project.runtime_dir = " ".to_string();
    config.launcher.command = Some("".to_string());
    config.merge.args = vec!["merge".to_string()];

    let errors = validate(&config).unwrap_err();
    assert_eq!(errors.len(), 4, "{:?}", errors);
    assert!(errors.iter().any(|e| e.contains("project.specs_dir must be relative")));
    assert!(errors.iter().any(|e| e.contains("project.runtime_dir must not be empty")));
    assert!(errors.iter().any(|e| e.contains("launcher.command must not be empty")));
    assert!(errors.iter().any(|e| e.contains("merge.args is set but merge.command is missing")));
}

#[test]
fn specs_and_worktrees_must_differ() {
    let mut config = AutostartConfig::default();
    config.project.worktrees_dir = config.project.specs_dir.clone();

    let errors = validate(&config).unwrap_err();
    assert!(errors[0].contains("must differ"));
}

#[test]
fn invalid_file_reports_validation_errors() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join(CONFIG_FILE),
        "[launcher]\nargs = [\"x\"]\n",
    )
    .unwrap();

    let err = load_config(dir.path()).unwrap_err();
    assert!(err.starts_with("Config validation failed:"), "{}", err);
    assert!(err.contains("launcher.args is set"));
}
