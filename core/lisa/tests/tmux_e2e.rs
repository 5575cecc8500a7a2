//! End-to-end runs against a real tmux server.
//!
//! Skipped unless `tmux` is on PATH and the agent's gate is set
//! (`LISA_E2E_CODEX=1` or `LISA_E2E_CLAUDE=1`). Each test gets its own
//! state directory and socket, and kills its server on the way out.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

const CODEX: &str = "LISA_E2E_CODEX";
const CLAUDE: &str = "LISA_E2E_CLAUDE";

struct Sandbox {
    state: TempDir,
    project: TempDir,
}

impl Sandbox {
    fn new(gate: &str) -> Option<Self> {
        let enabled = std::env::var(gate).map(|v| v == "1").unwrap_or(false);
        let tmux = Command::new("tmux").arg("-V").output().map(|o| o.status.success());
        if !enabled || !matches!(tmux, Ok(true)) {
            eprintln!("skipping: set {}=1 with tmux installed", gate);
            return None;
        }
        Some(Self {
            state: tempfile::Builder::new().prefix("lisa-e2e").tempdir().unwrap(),
            project: TempDir::new().unwrap(),
        })
    }

    fn socket(&self) -> PathBuf {
        self.state.path().join("lisa-tmux-e2e.sock")
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_lisa"))
            .args(args)
            .arg("--project-root")
            .arg(self.project.path())
            .arg("--json")
            .env("LISA_STATE_DIR", self.state.path())
            .env("LISA_TMUX_SOCKET", self.socket())
            .env_remove("LISA_SESSION")
            .env_remove("LISA_PROJECT_HASH")
            .env_remove("LISA_RUN_ID")
            .output()
            .expect("Failed to run lisa")
    }

    fn spawn(&self, session: &str, agent: &str, mode: &str, command: &str) -> Value {
        let output = self.run(&[
            "session", "spawn", "--session", session, "--agent", agent, "--mode", mode,
            "--command", command,
        ]);
        assert!(output.status.success(), "spawn failed: {}", stdout(&output));
        last_json(&output)
    }

    fn send_text(&self, session: &str, text: &str) {
        let output = self.run(&["session", "send", "--session", session, "--text", text, "--enter"]);
        assert!(output.status.success(), "send failed: {}", stdout(&output));
    }

    fn raw_capture(&self, session: &str) -> String {
        let output = self.run(&["session", "capture", "--session", session, "--raw", "--lines", "200"]);
        assert!(output.status.success(), "capture failed: {}", stdout(&output));
        last_json(&output)["output"].as_str().unwrap_or_default().to_string()
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        let _ = Command::new("tmux")
            .arg("-S")
            .arg(self.socket())
            .arg("kill-server")
            .output();
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn last_json(output: &Output) -> Value {
    let text = stdout(output);
    let line = text.lines().last().unwrap_or_default();
    serde_json::from_str(line).unwrap_or_else(|err| panic!("not JSON ({}): {}", err, text))
}

fn marker(label: &str) -> String {
    format!("{}-{}", label, std::process::id())
}

fn assert_exists(path: &Path) {
    assert!(path.exists(), "{} missing", path.display());
}

#[test]
fn test_exec_success() {
    let Some(sandbox) = Sandbox::new(CODEX) else { return };
    let spawned = sandbox.spawn("lisa-e2e-ok", "codex", "exec", "echo E2E_EXEC_OK");
    assert_exists(Path::new(spawned["artifactDir"].as_str().unwrap()));

    let output = sandbox.run(&[
        "session", "monitor", "--session", "lisa-e2e-ok", "--poll-interval", "1",
        "--max-polls", "30", "--stop-on-waiting", "false",
    ]);
    let payload = last_json(&output);
    assert_eq!(output.status.code(), Some(0), "{}", payload);
    assert_eq!(payload["finalState"], "completed");
    assert_eq!(payload["exitReason"], "completed");

    let capture = sandbox.raw_capture("lisa-e2e-ok");
    assert!(capture.contains("E2E_EXEC_OK"));
    assert!(capture.contains("__LISA_EXEC_DONE__:0"));
}

#[test]
fn test_exec_failure() {
    let Some(sandbox) = Sandbox::new(CODEX) else { return };
    let spawned = sandbox.spawn("lisa-e2e-fail", "codex", "exec", "bash -lc 'echo X; exit 7'");
    let run_id = spawned["runId"].as_str().unwrap().to_string();

    let output = sandbox.run(&[
        "session", "monitor", "--session", "lisa-e2e-fail", "--poll-interval", "1",
        "--max-polls", "30", "--stop-on-waiting", "false",
    ]);
    let payload = last_json(&output);
    assert_eq!(output.status.code(), Some(2), "{}", payload);
    assert_eq!(payload["finalState"], "crashed");
    assert_eq!(payload["exitReason"], "crashed");

    let capture = sandbox.raw_capture("lisa-e2e-fail");
    assert!(capture.contains("__LISA_EXEC_DONE__:7"));
    assert!(capture.contains(&format!("__LISA_SESSION_DONE__:{}:7", run_id)));
}

#[test]
fn test_monitor_timeout() {
    let Some(sandbox) = Sandbox::new(CLAUDE) else { return };
    sandbox.spawn("lisa-e2e-slow", "claude", "interactive", "sleep 10");

    let output = sandbox.run(&[
        "session", "monitor", "--session", "lisa-e2e-slow", "--poll-interval", "1",
        "--max-polls", "2",
    ]);
    let payload = last_json(&output);
    assert_ne!(output.status.code(), Some(0), "{}", payload);
    assert_eq!(payload["finalState"], "timeout");
    let reason = payload["exitReason"].as_str().unwrap();
    assert!(
        reason == "max_polls_exceeded" || reason == "degraded_max_polls_exceeded",
        "{}",
        reason
    );
}

#[test]
fn test_waiting_input_stop() {
    let Some(sandbox) = Sandbox::new(CODEX) else { return };
    sandbox.spawn("lisa-e2e-cat", "codex", "interactive", "cat");

    let output = sandbox.run(&[
        "session", "monitor", "--session", "lisa-e2e-cat", "--poll-interval", "1",
        "--max-polls", "12", "--stop-on-waiting", "true",
    ]);
    let payload = last_json(&output);
    assert_eq!(output.status.code(), Some(0), "{}", payload);
    assert_eq!(payload["finalState"], "waiting_input");
    assert_eq!(payload["exitReason"], "waiting_input");
}

#[test]
fn test_marker_follow_up_in_one_session() {
    let Some(sandbox) = Sandbox::new(CODEX) else { return };
    sandbox.spawn("lisa-e2e-echo", "codex", "interactive", "cat");

    let first = marker("FIRST-MARKER");
    let second = marker("SECOND-MARKER");
    for text in [&first, &second] {
        sandbox.send_text("lisa-e2e-echo", text);
        let output = sandbox.run(&[
            "session", "monitor", "--session", "lisa-e2e-echo", "--poll-interval", "1",
            "--max-polls", "12", "--until-marker", text,
        ]);
        let payload = last_json(&output);
        assert_eq!(output.status.code(), Some(0), "{}", payload);
        assert_eq!(payload["exitReason"], "marker_found");
    }

    let capture = sandbox.raw_capture("lisa-e2e-echo");
    assert!(capture.contains(&first));
    assert!(capture.contains(&second));

    let output = sandbox.run(&["session", "kill", "--session", "lisa-e2e-echo"]);
    assert!(output.status.success(), "{}", stdout(&output));
}
