//! The only module that shells out to tmux.
//!
//! Every call binds an explicit socket with `-S`; ambient tmux defaults are
//! never used. Everything else in the crate talks to [`Multiplexer`], so tests
//! swap in a fake.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::process::{find_in_path, run_command, CommandOutput, ProcessError};

/// Texts up to this many bytes go through `send-keys -l`; longer ones are pasted.
pub const SEND_KEYS_MAX_BYTES: usize = 512;

const TMUX_BIN: &str = "tmux";

#[derive(Debug, Error)]
pub enum TmuxError {
    #[error("tmux server unreachable on {socket}: {details}")]
    Unreachable { socket: PathBuf, details: String },

    #[error("tmux {command} failed (exit {code:?}): {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("environment variable {0} is not set in the session")]
    EnvNotSet(String),

    #[error("failed to stage paste buffer: {0}")]
    Buffer(#[source] std::io::Error),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl TmuxError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, TmuxError::Unreachable { .. })
    }
}

/// Parameters for a detached session.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub name: String,
    pub cwd: PathBuf,
    pub width: u16,
    pub height: u16,
    pub env: Vec<(String, String)>,
    /// Typed into the pane's shell once the session is up.
    pub initial_command: Option<String>,
}

/// `#{pane_dead}`, `#{pane_dead_status}`, `#{pane_pid}`, `#{pane_current_command}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaneInfo {
    pub dead: bool,
    pub dead_status: Option<i32>,
    pub pid: u32,
    pub current_command: String,
}

impl PaneInfo {
    pub fn status(&self) -> &'static str {
        if !self.dead && self.pid != 0 {
            "alive"
        } else {
            "dead"
        }
    }
}

pub trait Multiplexer: Send + Sync {
    fn new_session(&self, socket: &Path, spec: &NewSession) -> Result<(), TmuxError>;
    /// Types `text`; long texts go through a paste buffer.
    fn send_text(&self, socket: &Path, session: &str, text: &str, enter: bool)
        -> Result<(), TmuxError>;
    fn send_keys(&self, socket: &Path, session: &str, keys: &[String], enter: bool)
        -> Result<(), TmuxError>;
    /// Scrollback plus visible pane, newline-joined.
    fn capture_pane(&self, socket: &Path, session: &str, max_lines: usize)
        -> Result<String, TmuxError>;
    fn show_environment(&self, socket: &Path, session: &str, key: &str)
        -> Result<String, TmuxError>;
    fn pane_info(&self, socket: &Path, session: &str) -> Result<PaneInfo, TmuxError>;
    fn has_session(&self, socket: &Path, session: &str) -> Result<bool, TmuxError>;
    fn kill_session(&self, socket: &Path, session: &str) -> Result<(), TmuxError>;
    fn list_sessions(&self, socket: &Path) -> Result<Vec<String>, TmuxError>;
    fn list_clients(&self, socket: &Path) -> Result<Vec<String>, TmuxError>;
    fn kill_server(&self, socket: &Path) -> Result<(), TmuxError>;

    /// Checked before a real spawn; `Err` carries a human-readable reason.
    fn preflight(&self) -> Result<(), String> {
        Ok(())
    }

    /// `"alive"` iff the pane process is neither marked dead nor zero-pid.
    fn pane_status(&self, socket: &Path, session: &str) -> Result<&'static str, TmuxError> {
        self.pane_info(socket, session).map(|info| info.status())
    }
}

/// tmux CLI backed implementation.
#[derive(Debug, Clone)]
pub struct TmuxCli {
    timeout: Duration,
}

impl TmuxCli {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn run(&self, socket: &Path, args: &[String]) -> Result<CommandOutput, TmuxError> {
        let mut full = vec!["-S".to_string(), socket.to_string_lossy().to_string()];
        full.extend(args.iter().cloned());
        tracing::debug!(socket = %socket.display(), command = ?args.first(), "tmux");
        Ok(run_command(TMUX_BIN, &full, self.timeout)?)
    }

    fn run_checked(&self, socket: &Path, args: &[String]) -> Result<CommandOutput, TmuxError> {
        let output = self.run(socket, args)?;
        if output.success() {
            return Ok(output);
        }
        Err(classify_failure(socket, args, &output))
    }
}

fn classify_failure(socket: &Path, args: &[String], output: &CommandOutput) -> TmuxError {
    let stderr = output.stderr.trim().to_string();
    if is_unreachable_message(&stderr) {
        return TmuxError::Unreachable {
            socket: socket.to_path_buf(),
            details: stderr,
        };
    }
    TmuxError::Failed {
        command: args.first().cloned().unwrap_or_default(),
        code: output.code(),
        stderr,
    }
}

pub fn is_unreachable_message(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no server running")
        || lower.contains("error connecting to")
        || lower.contains("connection refused")
        || lower.contains("no such file or directory")
}

fn session_target(session: &str) -> String {
    format!("={}", session)
}

fn pane_target(session: &str) -> String {
    format!("={}:", session)
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}

impl Multiplexer for TmuxCli {
    fn preflight(&self) -> Result<(), String> {
        find_in_path(TMUX_BIN)
            .map(|_| ())
            .ok_or_else(|| format!("{} not found on PATH", TMUX_BIN))
    }

    fn new_session(&self, socket: &Path, spec: &NewSession) -> Result<(), TmuxError> {
        let mut args = strings(&["new-session", "-d", "-s"]);
        args.push(spec.name.clone());
        args.extend(strings(&["-x"]));
        args.push(spec.width.to_string());
        args.push("-y".to_string());
        args.push(spec.height.to_string());
        args.push("-c".to_string());
        args.push(spec.cwd.to_string_lossy().to_string());
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        self.run_checked(socket, &args)?;

        if let Some(command) = spec.initial_command.as_deref() {
            self.send_text(socket, &spec.name, command, true)?;
        }
        Ok(())
    }

    fn send_text(
        &self,
        socket: &Path,
        session: &str,
        text: &str,
        enter: bool,
    ) -> Result<(), TmuxError> {
        let target = pane_target(session);
        if text.len() <= SEND_KEYS_MAX_BYTES {
            if !text.is_empty() {
                let mut args = strings(&["send-keys", "-t"]);
                args.push(target.clone());
                args.extend(strings(&["-l", "--"]));
                args.push(text.to_string());
                self.run_checked(socket, &args)?;
            }
        } else {
            self.paste(socket, &target, text)?;
        }

        if enter {
            self.run_checked(socket, &strings(&["send-keys", "-t", &target, "C-m"]))?;
        }
        Ok(())
    }

    fn send_keys(
        &self,
        socket: &Path,
        session: &str,
        keys: &[String],
        enter: bool,
    ) -> Result<(), TmuxError> {
        let target = pane_target(session);
        let mut args = strings(&["send-keys", "-t", &target]);
        args.extend(keys.iter().cloned());
        if enter {
            args.push("C-m".to_string());
        }
        self.run_checked(socket, &args)?;
        Ok(())
    }

    fn capture_pane(
        &self,
        socket: &Path,
        session: &str,
        max_lines: usize,
    ) -> Result<String, TmuxError> {
        let target = pane_target(session);
        let start = format!("-{}", max_lines);
        let output = self.run_checked(
            socket,
            &strings(&["capture-pane", "-p", "-J", "-e", "-S", &start, "-t", &target]),
        )?;
        Ok(output.stdout)
    }

    fn show_environment(
        &self,
        socket: &Path,
        session: &str,
        key: &str,
    ) -> Result<String, TmuxError> {
        let target = session_target(session);
        let scoped = self.run(socket, &strings(&["show-environment", "-t", &target, key]))?;
        let output = if scoped.success() {
            scoped
        } else {
            self.run_checked(socket, &strings(&["show-environment", "-g", key]))?
        };
        parse_environment_line(&output.stdout, key)
            .ok_or_else(|| TmuxError::EnvNotSet(key.to_string()))
    }

    fn pane_info(&self, socket: &Path, session: &str) -> Result<PaneInfo, TmuxError> {
        let target = pane_target(session);
        let output = self.run_checked(
            socket,
            &strings(&[
                "display-message",
                "-p",
                "-t",
                &target,
                "#{pane_dead}\t#{pane_dead_status}\t#{pane_pid}\t#{pane_current_command}",
            ]),
        )?;
        Ok(parse_pane_info(&output.stdout))
    }

    fn has_session(&self, socket: &Path, session: &str) -> Result<bool, TmuxError> {
        let target = session_target(session);
        let output = self.run(socket, &strings(&["has-session", "-t", &target]))?;
        if output.success() {
            return Ok(true);
        }
        match classify_failure(socket, &strings(&["has-session"]), &output) {
            TmuxError::Unreachable { .. } => Ok(false),
            TmuxError::Failed { ref stderr, .. } if stderr.contains("can't find session") => {
                Ok(false)
            }
            other => Err(other),
        }
    }

    fn kill_session(&self, socket: &Path, session: &str) -> Result<(), TmuxError> {
        let target = session_target(session);
        self.run_checked(socket, &strings(&["kill-session", "-t", &target]))?;
        Ok(())
    }

    fn list_sessions(&self, socket: &Path) -> Result<Vec<String>, TmuxError> {
        let output = self.run_checked(socket, &strings(&["list-sessions", "-F", "#{session_name}"]))?;
        Ok(non_empty_lines(&output.stdout))
    }

    fn list_clients(&self, socket: &Path) -> Result<Vec<String>, TmuxError> {
        let output = self.run_checked(socket, &strings(&["list-clients", "-F", "#{client_tty}"]))?;
        Ok(non_empty_lines(&output.stdout))
    }

    fn kill_server(&self, socket: &Path) -> Result<(), TmuxError> {
        self.run_checked(socket, &strings(&["kill-server"]))?;
        Ok(())
    }
}

impl TmuxCli {
    /// load-buffer → paste-buffer → delete-buffer, staged through a 0600 temp file.
    fn paste(&self, socket: &Path, target: &str, text: &str) -> Result<(), TmuxError> {
        use std::os::unix::fs::PermissionsExt;

        let buffer = format!("lisa-{}", ulid::Ulid::new().to_string().to_lowercase());
        let mut staging = tempfile::Builder::new()
            .prefix(&format!("{}-", buffer))
            .suffix(".txt")
            .tempfile()
            .map_err(TmuxError::Buffer)?;
        staging
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(TmuxError::Buffer)?;
        staging.write_all(text.as_bytes()).map_err(TmuxError::Buffer)?;
        staging.flush().map_err(TmuxError::Buffer)?;

        let staging_arg = staging.path().to_string_lossy().to_string();
        let result = self
            .run_checked(socket, &strings(&["load-buffer", "-b", &buffer, &staging_arg]))
            .and_then(|_| {
                self.run_checked(socket, &strings(&["paste-buffer", "-b", &buffer, "-t", target]))
            });
        let _ = self.run(socket, &strings(&["delete-buffer", "-b", &buffer]));
        // `staging` is removed on drop.
        result.map(|_| ())
    }
}

fn non_empty_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_environment_line(raw: &str, key: &str) -> Option<String> {
    raw.lines().find_map(|line| {
        let line = line.trim_end();
        let (name, value) = line.split_once('=')?;
        (name == key).then(|| value.to_string())
    })
}

fn parse_pane_info(raw: &str) -> PaneInfo {
    let line = raw.lines().next().unwrap_or_default();
    let mut parts = line.split('\t');
    let dead = parts.next().map(str::trim) == Some("1");
    let dead_status = parts.next().and_then(|value| value.trim().parse().ok());
    let pid = parts
        .next()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0);
    let current_command = parts.next().unwrap_or_default().trim().to_string();
    PaneInfo {
        dead,
        dead_status,
        pid,
        current_command,
    }
}
