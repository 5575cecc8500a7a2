//! Process primitives: bounded external command execution and process-table
//! inspection.
//!
//! Every external binary lisa touches (tmux, ps) goes through [`run_command`],
//! which enforces a hard timeout. On expiry the child is killed and the error
//! message contains `command timed out`.

use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command timed out after {secs}s: {program}")]
    TimedOut { program: String, secs: u64 },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// Runs `program args…` to completion or until `timeout` elapses.
///
/// stdout/stderr are drained on helper threads so a chatty child cannot
/// deadlock on a full pipe while we wait.
pub fn run_command<I, S>(program: &str, args: I, timeout: Duration) -> Result<CommandOutput, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(program, secs = timeout.as_secs(), "External command timed out");
                return Err(ProcessError::TimedOut {
                    program: program.to_string(),
                    secs: timeout.as_secs(),
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(source) => {
                let _ = child.kill();
                return Err(ProcessError::Wait {
                    program: program.to_string(),
                    source,
                });
            }
        }
    };

    Ok(CommandOutput {
        status,
        stdout: join_reader(stdout_reader),
        stderr: join_reader(stderr_reader),
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        String::from_utf8_lossy(&buffer).to_string()
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Locates an executable on `PATH`.
pub fn find_in_path(binary: &str) -> Option<PathBuf> {
    if binary.contains('/') {
        let path = PathBuf::from(binary);
        return is_executable(&path).then_some(path);
    }
    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

pub fn current_uid() -> u32 {
    // SAFETY: getuid() has no failure modes.
    #[allow(unsafe_code)]
    unsafe {
        libc::getuid()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Process Table
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub ppid: u32,
    pub cpu: f32,
    pub command: String,
}

/// Snapshot source for the process table. Swapped for a fake in tests.
pub trait ProcessTable: Send + Sync {
    fn list(&self) -> Result<Vec<ProcessEntry>, String>;
}

/// `ps axo pid=,ppid=,pcpu=,command=` backed table.
#[derive(Debug, Clone)]
pub struct PsProcessTable {
    timeout: Duration,
}

impl PsProcessTable {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ProcessTable for PsProcessTable {
    fn list(&self) -> Result<Vec<ProcessEntry>, String> {
        let output = run_command("ps", ["axo", "pid=,ppid=,pcpu=,command="], self.timeout)
            .map_err(|err| err.to_string())?;
        if !output.success() {
            return Err(format!(
                "ps exited with {:?}: {}",
                output.code(),
                output.stderr.trim()
            ));
        }
        Ok(parse_ps_output(&output.stdout))
    }
}

pub fn parse_ps_output(raw: &str) -> Vec<ProcessEntry> {
    raw.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid = parts.next()?.parse().ok()?;
            let ppid = parts.next()?.parse().ok()?;
            let cpu = parts.next()?.replace(',', ".").parse().ok()?;
            let command = parts.collect::<Vec<_>>().join(" ");
            if command.is_empty() {
                return None;
            }
            Some(ProcessEntry {
                pid,
                ppid,
                cpu,
                command,
            })
        })
        .collect()
}

/// Returns `root` and every descendant of it, breadth-first.
pub fn subtree(entries: &[ProcessEntry], root: u32) -> Vec<&ProcessEntry> {
    let mut result = Vec::new();
    let mut frontier = vec![root];
    let mut seen = std::collections::HashSet::new();

    while let Some(pid) = frontier.pop() {
        if !seen.insert(pid) {
            continue;
        }
        if let Some(entry) = entries.iter().find(|entry| entry.pid == pid) {
            result.push(entry);
        }
        frontier.extend(
            entries
                .iter()
                .filter(|entry| entry.ppid == pid && entry.pid != pid)
                .map(|entry| entry.pid),
        );
    }

    result
}
