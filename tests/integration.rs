use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{Value, json};

use clash::dispatch::{DispatchError, Dispatcher};
use clash::engine::{EngineError, ShellEngine};
use clash::environment::lifecycle::LifecycleError;
use clash::environment::storage::StorageError;
use clash::load_config;

const END_TO_END: &str = r#"
name: end_to_end
commands:
  command1: &command
    workflow: workflow1
    parameters:
      param1: {arg: arg1}
      param2: {arg: arg2}
      param3: {arg: arg3}
    args:
      - name: arg1
      - name: --arg2
        default: arg2_default
      - name: [-a, --arg3]
  nested:
    command2: *command
"#;

/// Blueprint whose workflows write what they receive below `dir`
fn write_blueprint(dir: &Path) {
    let output = dir.join("output.json");
    std::fs::write(
        dir.join("blueprint.yaml"),
        format!(
            r#"
inputs:
  input:
    default: INPUT_VALUE
outputs:
  output:
    value: {{get_input: input}}
workflows:
  workflow1: |
    echo "from workflow1"
    printf '%s' "$CLASH_PARAMETERS" > '{output}'
  task_config: |
    printf '{{"retries": %s, "retry_interval": %s, "thread_pool_size": %s}}' \
      "$CLASH_TASK_RETRIES" "$CLASH_TASK_RETRY_INTERVAL" "$CLASH_TASK_THREAD_POOL_SIZE" > '{output}'
  tool: hello-tool > '{output}'
  edited_tool: edited-tool > '{output}'
  fail: exit 4
"#,
            output = output.display()
        ),
    )
    .unwrap();
}

fn write_config(dir: &Path, content: &str) -> PathBuf {
    write_blueprint(dir);
    let path = dir.join("clash.yaml");
    std::fs::write(&path, content).unwrap();
    path
}

fn dispatcher(dir: &Path, content: &str) -> Dispatcher<ShellEngine> {
    let path = write_config(dir, content);
    Dispatcher::new(load_config(Some(&path)).unwrap(), ShellEngine).unwrap()
}

fn output(dir: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(dir.join("output.json")).unwrap()).unwrap()
}

#[test]
fn test_basic_command() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(dir.path(), END_TO_END);
    dispatcher.run_from(["clash", "init"]).unwrap();
    dispatcher
        .run_from(["clash", "command1", "arg1_value", "-a", "arg3_value"])
        .unwrap();
    assert_eq!(
        output(dir.path()),
        json!({"param1": "arg1_value", "param2": "arg2_default", "param3": "arg3_value"})
    );
}

#[test]
fn test_nested_command() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(dir.path(), END_TO_END);
    dispatcher.run_from(["clash", "init"]).unwrap();
    dispatcher
        .run_from([
            "clash",
            "nested",
            "command2",
            "arg1_value",
            "--arg3",
            "arg3_value",
            "--arg2",
            "arg2_value",
        ])
        .unwrap();
    assert_eq!(
        output(dir.path()),
        json!({"param1": "arg1_value", "param2": "arg2_value", "param3": "arg3_value"})
    );
}

fn task_config(content: &str) -> Value {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(dir.path(), content);
    dispatcher.run_from(["clash", "init"]).unwrap();
    dispatcher.run_from(["clash", "command1"]).unwrap();
    output(dir.path())
}

#[test]
fn test_task_config_default() {
    let config = "commands:\n  command1:\n    workflow: task_config\n";
    assert_eq!(
        task_config(config),
        json!({"retries": 0, "retry_interval": 1, "thread_pool_size": 1})
    );
}

#[test]
fn test_task_config_global() {
    let config = r"
task:
  retries: 4
  retry_interval: 4
  thread_pool_size: 4
commands:
  command1:
    workflow: task_config
";
    assert_eq!(
        task_config(config),
        json!({"retries": 4, "retry_interval": 4, "thread_pool_size": 4})
    );
}

#[test]
fn test_task_config_command() {
    let config = r"
task:
  retries: 4
  retry_interval: 4
  thread_pool_size: 4
commands:
  command1:
    workflow: task_config
    task:
      retries: 3
      retry_interval: 3
      thread_pool_size: 3
";
    assert_eq!(
        task_config(config),
        json!({"retries": 3, "retry_interval": 3, "thread_pool_size": 3})
    );
}

#[test]
fn test_already_initialized() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(dir.path(), END_TO_END);
    dispatcher.run_from(["clash", "init"]).unwrap();
    let first = dispatcher.lifecycle().load().unwrap();

    assert!(matches!(
        dispatcher.run_from(["clash", "init"]),
        Err(DispatchError::Lifecycle(LifecycleError::AlreadyInitialized(_)))
    ));

    dispatcher.run_from(["clash", "init", "--reset"]).unwrap();
    let second = dispatcher.lifecycle().load().unwrap();
    assert_ne!(first.id, second.id);
}

#[test]
fn test_command_before_init() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(dir.path(), END_TO_END);
    assert!(matches!(
        dispatcher.run_from(["clash", "command1", "arg1_value"]),
        Err(DispatchError::Lifecycle(LifecycleError::Storage(
            StorageError::EnvironmentNotFound { .. }
        )))
    ));
    assert!(!dir.path().join("output.json").exists());
}

#[test]
fn test_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(dir.path(), END_TO_END);
    dispatcher
        .run_from(["clash", "init", "--inputs", "input=from_cli"])
        .unwrap();
    let environment = dispatcher.lifecycle().load().unwrap();
    assert_eq!(environment.outputs().unwrap()["output"], json!("from_cli"));
}

#[test]
fn test_configured_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let config = format!("{END_TO_END}\ninputs:\n  input: {{config: name}}\n");
    let dispatcher = dispatcher(dir.path(), &config);
    dispatcher.run_from(["clash", "init"]).unwrap();
    let environment = dispatcher.lifecycle().load().unwrap();
    assert_eq!(environment.outputs().unwrap()["output"], json!("end_to_end"));
}

#[test]
fn test_unknown_input() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(dir.path(), END_TO_END);
    assert!(
        dispatcher
            .run_from(["clash", "init", "--inputs", "unknown=1"])
            .is_err()
    );
    assert!(!dispatcher.lifecycle().is_initialized());
}

#[test]
fn test_failing_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let config = "commands:\n  command1:\n    workflow: fail\n    task:\n      retries: 1\n      retry_interval: 0\n";
    let dispatcher = dispatcher(dir.path(), config);
    dispatcher.run_from(["clash", "init"]).unwrap();
    assert!(matches!(
        dispatcher.run_from(["clash", "command1"]),
        Err(DispatchError::Engine(EngineError::WorkflowFailed {
            attempts: 2,
            code: Some(4),
            ..
        }))
    ));
}

#[cfg(unix)]
#[test]
fn test_resources_on_path() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(dir.path(), "commands:\n  command1:\n    workflow: tool\n");
    let tool = dir.path().join("hello-tool");
    std::fs::write(&tool, "#!/bin/sh\necho '{\"tool\": \"hello\"}'\n").unwrap();
    std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

    dispatcher.run_from(["clash", "init"]).unwrap();
    dispatcher.run_from(["clash", "command1"]).unwrap();
    assert_eq!(output(dir.path()), json!({"tool": "hello"}));
}

#[cfg(unix)]
#[test]
fn test_editable_resources() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(dir.path(), "commands:\n  command1:\n    workflow: edited_tool\n");
    dispatcher.run_from(["clash", "init", "--editable"]).unwrap();

    // Added after init, still found through the linked resources directory
    let tool = dir.path().join("edited-tool");
    std::fs::write(&tool, "#!/bin/sh\necho '{\"tool\": \"edited\"}'\n").unwrap();
    std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

    dispatcher.run_from(["clash", "command1"]).unwrap();
    assert_eq!(output(dir.path()), json!({"tool": "edited"}));
}

fn run_binary(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_clash"))
        .args(args)
        .current_dir(dir)
        .env("CLASH_CONFIG", dir.join("clash.yaml"))
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn test_binary_verbose() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), END_TO_END);

    assert!(run_binary(dir.path(), &["init"]).status.success());

    let quiet = run_binary(dir.path(), &["command1", "arg1_value"]);
    assert!(quiet.status.success());
    assert!(String::from_utf8_lossy(&quiet.stdout).contains("from workflow1"));
    assert!(!String::from_utf8_lossy(&quiet.stderr).contains("Starting 'workflow1'"));

    let verbose = run_binary(dir.path(), &["command1", "arg1_value", "--verbose"]);
    assert!(verbose.status.success());
    assert!(String::from_utf8_lossy(&verbose.stderr).contains("Starting 'workflow1'"));
}

#[test]
fn test_binary_reports_errors() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), END_TO_END);

    let output = run_binary(dir.path(), &["command1", "arg1_value"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error: "));

    let output = run_binary(dir.path(), &["command1"]);
    assert!(!output.status.success());
}

#[test]
fn test_binary_logs_config_search() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), END_TO_END);

    let output = Command::new(env!("CARGO_BIN_EXE_clash"))
        .args(["init", "--log-file", "clash.log"])
        .current_dir(dir.path())
        .env_remove("CLASH_CONFIG")
        .env("RUST_LOG", "debug")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Found config file"));

    let log = std::fs::read_to_string(dir.path().join("clash.log")).unwrap();
    assert!(log.contains("Initialized environment"));
}
