//! Shared fakes for lisa-core integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use lisa_core::engine::Backends;
use lisa_core::monitor::{Clock, Sleeper};
use lisa_core::process::{ProcessEntry, ProcessTable};
use lisa_core::tmux::{Multiplexer, NewSession, PaneInfo, TmuxError};
use lisa_core::{LisaConfig, SessionEngine, StorageConfig};
use tempfile::TempDir;

#[derive(Debug, Clone, Default)]
pub struct FakePane {
    pub output: String,
    pub dead: bool,
    pub dead_status: Option<i32>,
    pub pid: u32,
    pub command: String,
    pub env: Vec<(String, String)>,
    pub typed: Vec<String>,
}

/// In-memory tmux: sessions keyed by socket and name.
#[derive(Default)]
pub struct FakeMux {
    pub panes: Mutex<BTreeMap<(PathBuf, String), FakePane>>,
    pub clients: Mutex<HashMap<PathBuf, usize>>,
    /// Sockets that answer list-sessions but fail with a non-unreachable error.
    pub broken: Mutex<BTreeSet<PathBuf>>,
    /// Sockets whose has-session probe fails with a non-unreachable error.
    pub failing_probes: Mutex<BTreeSet<PathBuf>>,
    pub killed_servers: Mutex<Vec<PathBuf>>,
}

fn unreachable(socket: &Path) -> TmuxError {
    TmuxError::Unreachable {
        socket: socket.to_path_buf(),
        details: "no server running".to_string(),
    }
}

impl FakeMux {
    pub fn add_pane(&self, socket: &Path, name: &str, pane: FakePane) {
        self.panes
            .lock()
            .unwrap()
            .insert((socket.to_path_buf(), name.to_string()), pane);
    }

    pub fn update(&self, socket: &Path, name: &str, f: impl FnOnce(&mut FakePane)) {
        let mut panes = self.panes.lock().unwrap();
        if let Some(pane) = panes.get_mut(&(socket.to_path_buf(), name.to_string())) {
            f(pane);
        }
    }

    pub fn pane(&self, socket: &Path, name: &str) -> Option<FakePane> {
        self.panes
            .lock()
            .unwrap()
            .get(&(socket.to_path_buf(), name.to_string()))
            .cloned()
    }

    pub fn set_clients(&self, socket: &Path, clients: usize) {
        self.clients.lock().unwrap().insert(socket.to_path_buf(), clients);
    }

    fn server_up(&self, socket: &Path) -> bool {
        self.panes.lock().unwrap().keys().any(|(s, _)| s == socket)
            || self.clients.lock().unwrap().contains_key(socket)
    }

    fn with_pane<T>(
        &self,
        socket: &Path,
        session: &str,
        f: impl FnOnce(&mut FakePane) -> T,
    ) -> Result<T, TmuxError> {
        let mut panes = self.panes.lock().unwrap();
        match panes.get_mut(&(socket.to_path_buf(), session.to_string())) {
            Some(pane) => Ok(f(pane)),
            None => Err(TmuxError::Failed {
                command: "fake".to_string(),
                code: Some(1),
                stderr: format!("can't find session: {}", session),
            }),
        }
    }
}

impl Multiplexer for FakeMux {
    fn new_session(&self, socket: &Path, spec: &NewSession) -> Result<(), TmuxError> {
        let pane = FakePane {
            pid: 4242,
            command: "bash".to_string(),
            env: spec.env.clone(),
            typed: spec.initial_command.clone().into_iter().collect(),
            ..Default::default()
        };
        self.add_pane(socket, &spec.name, pane);
        Ok(())
    }

    fn send_text(&self, socket: &Path, session: &str, text: &str, _enter: bool) -> Result<(), TmuxError> {
        self.with_pane(socket, session, |pane| pane.typed.push(text.to_string()))
    }

    fn send_keys(&self, socket: &Path, session: &str, keys: &[String], _enter: bool) -> Result<(), TmuxError> {
        self.with_pane(socket, session, |pane| pane.typed.extend(keys.iter().cloned()))
    }

    fn capture_pane(&self, socket: &Path, session: &str, _max_lines: usize) -> Result<String, TmuxError> {
        self.with_pane(socket, session, |pane| pane.output.clone())
    }

    fn show_environment(&self, socket: &Path, session: &str, key: &str) -> Result<String, TmuxError> {
        self.with_pane(socket, session, |pane| {
            pane.env
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        })?
        .ok_or_else(|| TmuxError::EnvNotSet(key.to_string()))
    }

    fn pane_info(&self, socket: &Path, session: &str) -> Result<PaneInfo, TmuxError> {
        self.with_pane(socket, session, |pane| PaneInfo {
            dead: pane.dead,
            dead_status: pane.dead_status,
            pid: pane.pid,
            current_command: pane.command.clone(),
        })
    }

    fn has_session(&self, socket: &Path, session: &str) -> Result<bool, TmuxError> {
        if self.failing_probes.lock().unwrap().contains(socket) {
            return Err(TmuxError::Failed {
                command: "has-session".to_string(),
                code: Some(1),
                stderr: "server exited unexpectedly".to_string(),
            });
        }
        Ok(self
            .panes
            .lock()
            .unwrap()
            .contains_key(&(socket.to_path_buf(), session.to_string())))
    }

    fn kill_session(&self, socket: &Path, session: &str) -> Result<(), TmuxError> {
        self.panes
            .lock()
            .unwrap()
            .remove(&(socket.to_path_buf(), session.to_string()));
        Ok(())
    }

    fn list_sessions(&self, socket: &Path) -> Result<Vec<String>, TmuxError> {
        if self.broken.lock().unwrap().contains(socket) {
            return Err(TmuxError::Failed {
                command: "list-sessions".to_string(),
                code: Some(1),
                stderr: "protocol version mismatch".to_string(),
            });
        }
        if !self.server_up(socket) {
            return Err(unreachable(socket));
        }
        Ok(self
            .panes
            .lock()
            .unwrap()
            .keys()
            .filter(|(s, _)| s == socket)
            .map(|(_, name)| name.clone())
            .collect())
    }

    fn list_clients(&self, socket: &Path) -> Result<Vec<String>, TmuxError> {
        if !self.server_up(socket) {
            return Err(unreachable(socket));
        }
        let count = self.clients.lock().unwrap().get(socket).copied().unwrap_or(0);
        Ok((0..count).map(|i| format!("/dev/ttys00{}", i)).collect())
    }

    fn kill_server(&self, socket: &Path) -> Result<(), TmuxError> {
        self.panes.lock().unwrap().retain(|(s, _), _| s != socket);
        self.clients.lock().unwrap().remove(socket);
        self.killed_servers.lock().unwrap().push(socket.to_path_buf());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeProcesses {
    pub entries: Mutex<Vec<ProcessEntry>>,
}

impl FakeProcesses {
    pub fn set(&self, entries: Vec<ProcessEntry>) {
        *self.entries.lock().unwrap() = entries;
    }
}

impl ProcessTable for FakeProcesses {
    fn list(&self) -> Result<Vec<ProcessEntry>, String> {
        Ok(self.entries.lock().unwrap().clone())
    }
}

pub fn process(pid: u32, ppid: u32, cpu: f32, command: &str) -> ProcessEntry {
    ProcessEntry {
        pid,
        ppid,
        cpu,
        command: command.to_string(),
    }
}

pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 2, 14, 10, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

type SleepHook = Box<dyn FnMut(usize) + Send>;

/// Advances the fake clock instead of sleeping, then runs an optional script
/// step with the number of sleeps so far.
pub struct ScriptedSleeper {
    clock: Arc<FakeClock>,
    sleeps: Mutex<usize>,
    hook: Mutex<Option<SleepHook>>,
}

impl ScriptedSleeper {
    pub fn new(clock: Arc<FakeClock>) -> Self {
        Self {
            clock,
            sleeps: Mutex::new(0),
            hook: Mutex::new(None),
        }
    }

    pub fn on_sleep(&self, hook: impl FnMut(usize) + Send + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn sleeps(&self) -> usize {
        *self.sleeps.lock().unwrap()
    }
}

impl Sleeper for ScriptedSleeper {
    fn sleep(&self, duration: Duration) {
        self.clock.advance(duration);
        let count = {
            let mut sleeps = self.sleeps.lock().unwrap();
            *sleeps += 1;
            *sleeps
        };
        if let Some(hook) = self.hook.lock().unwrap().as_mut() {
            hook(count);
        }
    }
}

/// An engine wired to fakes, with its own state dir, project and socket.
pub struct Harness {
    pub state: TempDir,
    pub project: TempDir,
    pub socket: PathBuf,
    pub mux: Arc<FakeMux>,
    pub processes: Arc<FakeProcesses>,
    pub clock: Arc<FakeClock>,
    pub sleeper: Arc<ScriptedSleeper>,
    pub engine: SessionEngine,
}

impl Harness {
    pub fn new() -> Self {
        let state = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let socket = state.path().join("lisa-tmux-test.sock");
        let mux = Arc::new(FakeMux::default());
        let processes = Arc::new(FakeProcesses::default());
        let clock = Arc::new(FakeClock::new());
        let sleeper = Arc::new(ScriptedSleeper::new(clock.clone()));

        let config = LisaConfig {
            state_dir: Some(state.path().to_path_buf()),
            tmux_socket: Some(socket.clone()),
            ..LisaConfig::default()
        };
        let storage = StorageConfig::with_root(state.path().to_path_buf())
            .with_socket_override(Some(socket.clone()));
        let backends = Backends {
            mux: mux.clone(),
            processes: processes.clone(),
            sleeper: sleeper.clone(),
            clock: clock.clone(),
        };
        let engine = SessionEngine::with_backends(config, storage, backends);

        Self {
            state,
            project,
            socket,
            mux,
            processes,
            clock,
            sleeper,
            engine,
        }
    }

    pub fn project_root(&self) -> Option<&Path> {
        Some(self.project.path())
    }
}

pub const CLAUDE_IDLE_SCREEN: &str = "\
⏺ Done. I added the tests and they pass.

╭──────────────────────────────────────────╮
│ >                                        │
╰──────────────────────────────────────────╯
  ? for shortcuts
";
