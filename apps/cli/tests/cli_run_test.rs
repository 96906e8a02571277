//! Integration tests for the `cogflow run` and `cogflow validate` commands.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Writes a workflow file into the temp dir and returns its path.
fn write_workflow(temp_dir: &TempDir, content: &str) -> PathBuf {
    let path = temp_dir.path().join("workflow.toml");
    fs::write(&path, content).unwrap();
    path
}

fn cogflow(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("cogflow").unwrap();
    cmd.current_dir(temp_dir.path())
        .env_remove("COGFLOW_MAX_CONCURRENT_ASYNC")
        .env_remove("COGFLOW_DEFAULT_MAX_ITERATIONS")
        .env_remove("COGFLOW_LOG_LEVEL");
    cmd
}

const GREETING: &str = r#"
name = "greeting"

[[steps]]
name = "hello"
command = "echo hello {{target}}"

[[steps]]
name = "shout"
command = "echo '{{hello}}' | tr a-z A-Z"
"#;

#[test]
fn test_run_prints_step_table() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_workflow(&temp_dir, GREETING);

    cogflow(&temp_dir)
        .arg("run")
        .arg(&file)
        .arg("world")
        .assert()
        .success()
        .stdout(predicate::str::contains("cogflow run greeting"))
        .stdout(predicate::str::contains("HELLO WORLD"))
        .stdout(predicate::str::contains("2 completed"));
}

#[test]
fn test_run_json_reports_outputs() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_workflow(&temp_dir, GREETING);

    let output = cogflow(&temp_dir).arg("run").arg(&file).arg("json").arg("--json").output().unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["workflow"], "greeting");
    assert_eq!(report["target"], "json");
    assert_eq!(report["outputs"]["hello"], "hello json");
    assert_eq!(report["outputs"]["shout"], "HELLO JSON");
    assert_eq!(report["steps"][1]["status"], "completed");
}

#[test]
fn test_fail_if_aborts_with_step_name() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_workflow(
        &temp_dir,
        r#"
name = "checks"

[[steps]]
name = "lint"
command = "echo 'error: unused variable'"
fail_if = "^error"

[[steps]]
name = "never"
command = "echo unreachable"
"#,
    );

    cogflow(&temp_dir)
        .arg("run")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed at step 'lint'"))
        .stdout(predicate::str::contains("unreachable").not());
}

#[test]
fn test_skip_if_empty_marks_step_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_workflow(
        &temp_dir,
        r#"
name = "optional"

[[steps]]
name = "gemfile"
command = "cat Gemfile 2>/dev/null"
allow_failure = true
skip_if_empty = true

[[steps]]
name = "summary"
command = "echo 'gems:{{gemfile?}}'"
"#,
    );

    let output = cogflow(&temp_dir).arg("run").arg(&file).arg("--json").output().unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["steps"][0]["status"], "skipped");
    assert_eq!(report["outputs"]["summary"], "gems:");
}

#[test]
fn test_repeat_breaks_on_pattern() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_workflow(
        &temp_dir,
        r#"
name = "counter"

[[steps]]
name = "loop"
repeat = "count"
max_iterations = 10
initial_state = "0"

[[steps]]
name = "report"
command = "echo final={{loop}}"

[[scopes.count.steps]]
name = "next"
command = "echo $(( {{state}} + 1 ))"
break_if = "^3$"

[scopes.count.outputs]
state = "{{next}}"
output = "{{next}}"
"#,
    );

    let output = cogflow(&temp_dir).arg("run").arg(&file).arg("--json").output().unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["outputs"]["loop"]["iterations"], 3);
    assert_eq!(report["outputs"]["loop"]["broke"], true);
    assert_eq!(report["outputs"]["loop"]["final_state"], 2);
    assert_eq!(report["outputs"]["loop"]["outputs"], serde_json::json!([1, 2]));
    assert_eq!(report["outputs"]["report"], "final=2");
}

#[test]
fn test_max_iterations_from_config_file() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("cogflow.toml"), "default_max_iterations = 2\n").unwrap();
    let file = write_workflow(
        &temp_dir,
        r#"
name = "bounded"

[[steps]]
name = "loop"
repeat = "tick"

[[scopes.tick.steps]]
name = "now"
command = "echo {{iteration}}"

[scopes.tick.outputs]
output = "{{now}}"
"#,
    );

    let output = cogflow(&temp_dir)
        .arg("--config")
        .arg(temp_dir.path().join("cogflow.toml"))
        .arg("run")
        .arg(&file)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["outputs"]["loop"]["outputs"], serde_json::json!([0, 1]));
    assert_eq!(report["outputs"]["loop"]["final_state"], serde_json::Value::Null);
}

#[test]
fn test_chat_step_uses_mock_model() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_workflow(
        &temp_dir,
        r#"
name = "chatty"

[[steps]]
name = "ask"
chat = "Summarize {{target}}"
"#,
    );

    let output = cogflow(&temp_dir).arg("run").arg(&file).arg("README").arg("--json").output().unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["outputs"]["ask"], "mock: Summarize README");
    assert_eq!(report["steps"][0]["kind"], "chat");
}

#[test]
fn test_validate_valid_file() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_workflow(&temp_dir, GREETING);

    cogflow(&temp_dir)
        .arg("validate")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("greeting"))
        .stdout(predicate::str::contains("Steps:  2"))
        .stdout(predicate::str::contains("Reads:  hello"));
}

#[test]
fn test_validate_reports_unknown_scope() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_workflow(
        &temp_dir,
        r#"
name = "broken"

[[steps]]
repeat = "missing"
"#,
    );

    let output = cogflow(&temp_dir).arg("validate").arg(&file).arg("--json").output().unwrap();
    assert!(!output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["valid"], false);
    assert!(result["error"].as_str().unwrap().contains("missing"));
}

#[test]
fn test_validate_rejects_step_without_action() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_workflow(&temp_dir, "name = \"empty\"\n\n[[steps]]\nname = \"idle\"\n");

    cogflow(&temp_dir)
        .arg("validate")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("exactly one of command, chat, agent or repeat"));
}

#[test]
fn test_template_reading_breaking_background_step_stops_repeat() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_workflow(
        &temp_dir,
        r#"
name = "watcher"

[[steps]]
name = "loop"
repeat = "watch"
max_iterations = 5

[[scopes.watch.steps]]
name = "check"
command = "echo {{iteration}}"
background = true
break_if = "^1$"

[[scopes.watch.steps]]
name = "report"
command = "echo seen {{check}}"

[scopes.watch.outputs]
output = "{{report}}"
"#,
    );

    let output = cogflow(&temp_dir).arg("run").arg(&file).arg("--json").output().unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["outputs"]["loop"]["iterations"], 2);
    assert_eq!(report["outputs"]["loop"]["broke"], true);
    assert_eq!(report["outputs"]["loop"]["outputs"], serde_json::json!(["seen 0"]));
}
