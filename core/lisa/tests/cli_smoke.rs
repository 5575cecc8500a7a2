//! Smoke tests for the lisa binary that never need a tmux server.

use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

fn lisa(state: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lisa"))
        .args(args)
        .env("LISA_STATE_DIR", state)
        .env("LISA_TMUX_SOCKET", state.join("lisa-tmux-smoke.sock"))
        .env("LISA_CMD_TIMEOUT_SECONDS", "5")
        .env_remove("LISA_SESSION")
        .env_remove("LISA_PROJECT_HASH")
        .env_remove("LISA_RUN_ID")
        .output()
        .expect("Failed to run lisa")
}

fn json(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().last().unwrap_or_default();
    serde_json::from_str(line).unwrap_or_else(|err| panic!("not JSON ({}): {}", err, stdout))
}

fn error_code(output: &Output) -> String {
    json(output)["errorCode"].as_str().unwrap_or_default().to_string()
}

#[test]
fn test_version_json() {
    let state = TempDir::new().unwrap();
    let output = lisa(state.path(), &["version", "--json"]);
    assert!(output.status.success());
    let value = json(&output);
    assert_eq!(value["name"], "lisa");
    assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_help_routes_exit_zero() {
    let state = TempDir::new().unwrap();
    for args in [
        vec!["--help"],
        vec!["help", "session"],
        vec!["session", "spawn", "--help"],
        vec!["session", "monitor", "-h"],
    ] {
        let output = lisa(state.path(), &args);
        assert!(output.status.success(), "{:?}", args);
        assert!(!output.stdout.is_empty(), "{:?}", args);
    }
}

#[test]
fn test_unknown_flag_is_rejected_in_json() {
    let state = TempDir::new().unwrap();
    let output = lisa(state.path(), &["session", "status", "--bogus", "--json"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(error_code(&output), "unknown_flag");
}

#[test]
fn test_missing_flag_value_and_required_flag() {
    let state = TempDir::new().unwrap();
    let output = lisa(state.path(), &["session", "status", "--json", "--session"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(error_code(&output), "missing_flag_value");

    let output = lisa(state.path(), &["session", "status", "--json"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(error_code(&output), "missing_required_flag");
}

#[test]
fn test_invalid_enum_values_have_their_own_codes() {
    let state = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let root = project.path().to_str().unwrap();
    let cases = [
        (vec!["--agent", "gemini"], "invalid_agent"),
        (vec!["--mode", "batch"], "invalid_mode"),
        (vec!["--nested-policy", "maybe"], "invalid_nested_policy"),
        (vec!["--nesting-intent", "deep"], "invalid_nesting_intent"),
    ];
    for (extra, code) in cases {
        let mut args = vec!["session", "spawn", "--dry-run", "--json", "--project-root", root];
        args.extend(extra);
        let output = lisa(state.path(), &args);
        assert_eq!(output.status.code(), Some(1), "{}", code);
        assert_eq!(error_code(&output), code);
    }
}

#[test]
fn test_dry_run_spawn_prints_the_wrapped_command() {
    let state = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let output = lisa(
        state.path(),
        &[
            "session",
            "spawn",
            "--agent",
            "codex",
            "--mode",
            "exec",
            "--prompt",
            "fix the build",
            "--session",
            "lisa-dry",
            "--project-root",
            project.path().to_str().unwrap(),
            "--dry-run",
            "--json",
        ],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let value = json(&output);
    assert_eq!(value["dryRun"], true);
    assert_eq!(value["session"], "lisa-dry");
    let command = value["command"].as_str().unwrap();
    assert!(command.contains("codex exec 'fix the build' --full-auto"));
    assert!(command.contains("__LISA_EXEC_DONE__"));
}

#[test]
fn test_build_cmd_for_claude() {
    let state = TempDir::new().unwrap();
    let output = lisa(
        state.path(),
        &["agent", "build-cmd", "--agent", "claude", "--prompt", "hello", "--json"],
    );
    assert!(output.status.success());
    let value = json(&output);
    assert_eq!(
        value["command"],
        "claude --dangerously-skip-permissions 'hello'"
    );
    assert_eq!(value["nesting"]["bypass"], false);
}

#[test]
fn test_invalid_session_name() {
    let state = TempDir::new().unwrap();
    let output = lisa(state.path(), &["session", "status", "--session", "worker", "--json"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(error_code(&output), "invalid_session_name");
}

#[test]
fn test_monitor_rejects_bad_predicates_before_polling() {
    let state = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let root = project.path().to_str().unwrap();
    let cases = [
        (vec!["--until-state", "sleeping"], "invalid_state"),
        (vec!["--until-jsonpath", "state==x"], "invalid_jsonpath"),
        (vec!["--expect", "everything"], "invalid_expectation"),
    ];
    for (extra, code) in cases {
        let mut args = vec![
            "session",
            "monitor",
            "--session",
            "lisa-none",
            "--project-root",
            root,
            "--json",
        ];
        args.extend(extra);
        let output = lisa(state.path(), &args);
        assert_eq!(output.status.code(), Some(1), "{}", code);
        assert_eq!(error_code(&output), code);
    }
}

#[test]
fn test_hook_finish_without_environment() {
    let state = TempDir::new().unwrap();
    let output = lisa(state.path(), &["session", "hook", "finish", "--json"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(error_code(&output), "missing_required_flag");
}

#[test]
fn test_hook_finish_writes_sentinel() {
    let state = TempDir::new().unwrap();
    let output = lisa(
        state.path(),
        &[
            "session",
            "hook",
            "finish",
            "--session",
            "lisa-hooked",
            "--project-hash",
            "0123abcd",
            "--run-id",
            "run-1",
            "--exit-code",
            "3",
            "--json",
        ],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stdout));
    let value = json(&output);
    assert_eq!(value["exitCode"], 3);
    let sentinel = value["sentinel"].as_str().unwrap();
    assert_eq!(std::fs::read_to_string(sentinel).unwrap(), "run-1:3\n");
}

#[test]
fn test_status_text_mode_error_goes_to_stderr() {
    let state = TempDir::new().unwrap();
    let output = lisa(state.path(), &["session", "status", "--session", "nope"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("lisa-"));
}
