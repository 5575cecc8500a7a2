//! Orchestrated session commands.
//!
//! [`SessionEngine`] composes the artifact store, tmux adapter, collectors,
//! classifier, monitor and reaper into the operations the CLI exposes. All
//! side-effecting collaborators live in [`Backends`] so tests can run the
//! full flow against fakes.
//!
//! ## Persistence Rules
//!
//! - Spawn clears the previous run's state and sentinels before writing new
//!   metadata; the event log is kept as history.
//! - Every classifying command (status, explain, monitor, handoff) persists
//!   state and appends an event, but only for sessions that have metadata or
//!   exist in tmux. Probing a typo never creates artifact directories.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs_err as fs;
use tracing::{debug, info, warn};

use lisa_protocol::{
    BinaryCheck, BuildCmdPayload, CapturePayload, CleanupSummary, DoctorPayload, EventType,
    ExplainPayload, HandoffPayload, HookPayload, KillPayload, ListEntry, ListPayload,
    MonitorPayload, PollRecord, SendPayload, SessionMode, SessionState, Signals, SpawnPayload,
    StatusPayload, TreeNode, TreePayload, SESSION_PREFIX,
};

use crate::classifier::{classify, ClassifyInput};
use crate::command::{assemble, CommandRequest};
use crate::config::{
    LisaConfig, ENV_AGENT, ENV_DONE_FILE, ENV_MODE, ENV_PROJECT_HASH, ENV_RUN_ID, ENV_SESSION,
};
use crate::error::{LisaError, Result};
use crate::monitor::{
    run_monitor, Clock, MonitorOptions, PollOutcome, RealSleeper, SessionPoller, Sleeper,
    SystemClock,
};
use crate::process::{find_in_path, ProcessTable, PsProcessTable};
use crate::reaper::{self, SocketDiscovery};
use crate::session::{
    self, append_event, load_meta, load_state, new_event, read_events_tail,
    remove_session_files, save_meta, save_state, write_output_file, write_sentinel,
    SessionMeta, SessionStateRecord, Sentinel,
};
use crate::signals::{collect, filter_output, CollectContext};
use crate::storage::{ProjectIdentity, SessionPaths, StorageConfig};
use crate::tmux::{Multiplexer, NewSession, TmuxCli};

pub const DEFAULT_WIDTH: u16 = 220;
pub const DEFAULT_HEIGHT: u16 = 60;
pub const DEFAULT_EVENT_TAIL: usize = 20;
/// Output lines included in a handoff.
pub const HANDOFF_OUTPUT_LINES: usize = 40;

/// Effectful collaborators of the engine.
#[derive(Clone)]
pub struct Backends {
    pub mux: Arc<dyn Multiplexer>,
    pub processes: Arc<dyn ProcessTable>,
    pub sleeper: Arc<dyn Sleeper>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    pub fn system(config: &LisaConfig) -> Self {
        Self {
            mux: Arc::new(TmuxCli::new(config.command_timeout)),
            processes: Arc::new(PsProcessTable::new(config.command_timeout)),
            sleeper: Arc::new(RealSleeper),
            clock: Arc::new(SystemClock),
        }
    }
}

/// A session name bound to its project, artifacts and socket.
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub name: String,
    pub project: ProjectIdentity,
    pub paths: SessionPaths,
    pub socket: PathBuf,
    pub meta: Option<SessionMeta>,
}

impl ResolvedSession {
    fn mode(&self) -> SessionMode {
        self.meta
            .as_ref()
            .map(|meta| meta.mode)
            .unwrap_or(SessionMode::Interactive)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub strip_noise: bool,
    pub waiting_requires_turn_complete: bool,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            strip_noise: true,
            waiting_requires_turn_complete: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub session: Option<String>,
    pub project_root: Option<PathBuf>,
    pub command: CommandRequest,
    pub width: u16,
    pub height: u16,
    pub cleanup_all_hashes: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub session: String,
    pub project_root: Option<PathBuf>,
    pub text: Option<String>,
    pub keys: Vec<String>,
    pub enter: bool,
}

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub session: String,
    pub project_root: Option<PathBuf>,
    pub lines: Option<usize>,
    /// Skip escape/noise filtering.
    pub raw: bool,
    pub save: bool,
}

/// Values a finish hook reads from its pane environment.
#[derive(Debug, Clone, Default)]
pub struct HookRequest {
    pub session: Option<String>,
    pub project_hash: Option<String>,
    pub run_id: Option<String>,
    pub exit_code: i32,
}

pub fn validate_session_name(name: &str) -> Result<()> {
    let invalid = || LisaError::InvalidSessionName {
        name: name.to_string(),
        prefix: SESSION_PREFIX,
    };
    let rest = name.strip_prefix(SESSION_PREFIX).ok_or_else(invalid)?;
    if rest.is_empty()
        || name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == ':' || c == '.')
    {
        return Err(invalid());
    }
    Ok(())
}

fn generate_session_name(agent: &str) -> String {
    let id = ulid::Ulid::new().to_string().to_lowercase();
    format!("{}{}-{}", SESSION_PREFIX, agent, &id[id.len() - 8..])
}

fn new_run_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}

fn resolve_project(root: Option<&Path>) -> Result<ProjectIdentity> {
    match root {
        Some(root) => ProjectIdentity::resolve(root),
        None => {
            let cwd = std::env::current_dir()
                .map_err(|err| LisaError::io("reading current directory", err))?;
            ProjectIdentity::resolve(&cwd)
        }
    }
}

pub struct SessionEngine {
    config: LisaConfig,
    storage: StorageConfig,
    backends: Backends,
}

impl SessionEngine {
    pub fn new(config: LisaConfig) -> Result<Self> {
        let storage = StorageConfig::from_config(&config)?;
        let backends = Backends::system(&config);
        Ok(Self::with_backends(config, storage, backends))
    }

    pub fn with_backends(config: LisaConfig, storage: StorageConfig, backends: Backends) -> Self {
        Self {
            config,
            storage,
            backends,
        }
    }

    pub fn config(&self) -> &LisaConfig {
        &self.config
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    fn mux(&self) -> &dyn Multiplexer {
        self.backends.mux.as_ref()
    }

    fn now_secs(&self) -> i64 {
        self.backends.clock.now().timestamp()
    }

    fn socket_for(&self, project_hash: &str, meta: Option<&SessionMeta>) -> PathBuf {
        match meta {
            Some(meta) if !self.storage.has_socket_override() => PathBuf::from(&meta.socket),
            _ => self.storage.socket_path(project_hash),
        }
    }

    pub fn resolve(&self, name: &str, project_root: Option<&Path>) -> Result<ResolvedSession> {
        validate_session_name(name)?;
        let project = resolve_project(project_root)?;
        let paths = self.storage.session_paths(&project.hash, name);
        let meta = load_meta(&paths)?;
        let socket = self.socket_for(&project.hash, meta.as_ref());
        Ok(ResolvedSession {
            name: name.to_string(),
            project,
            paths,
            socket,
            meta,
        })
    }

    fn append(&self, paths: &SessionPaths, event: &lisa_protocol::EventRecord) {
        if let Err(err) = append_event(paths, event, self.config.events) {
            warn!(session = %event.session, error = %err, "Failed to append event");
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Spawn & Input
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn build_command(&self, request: &CommandRequest) -> Result<BuildCmdPayload> {
        let assembled = assemble(request)?;
        Ok(BuildCmdPayload {
            agent: request.agent,
            mode: request.mode,
            command: assembled.command,
            nesting: assembled.nesting,
        })
    }

    pub fn spawn(&self, request: &SpawnRequest) -> Result<SpawnPayload> {
        let agent = request.command.agent;
        let mode = request.command.mode;
        let name = match &request.session {
            Some(name) => name.clone(),
            None => generate_session_name(agent.as_str()),
        };
        validate_session_name(&name)?;
        let project = resolve_project(request.project_root.as_deref())?;
        let assembled = assemble(&request.command)?;
        let paths = self.storage.session_paths(&project.hash, &name);
        let socket = self.storage.socket_path(&project.hash);

        let mut payload = SpawnPayload {
            session: name.clone(),
            agent,
            mode,
            project_root: project.root.to_string_lossy().to_string(),
            project_hash: project.hash.clone(),
            socket: socket.to_string_lossy().to_string(),
            run_id: None,
            command: assembled.command.clone(),
            dry_run: request.dry_run,
            artifact_dir: paths.dir().to_string_lossy().to_string(),
            nesting: assembled.nesting.clone(),
            cleaned_hashes: Vec::new(),
        };
        if request.dry_run {
            return Ok(payload);
        }

        self.mux().preflight().map_err(LisaError::PreflightFailed)?;
        if self.mux().has_session(&socket, &name)? {
            return Err(LisaError::SessionExists(name));
        }

        if request.cleanup_all_hashes {
            payload.cleaned_hashes = self.clean_other_hashes(&name, &project.hash);
        }
        remove_session_files(&paths)?;

        let run_id = new_run_id();
        let meta = SessionMeta {
            session: name.clone(),
            agent,
            mode,
            project_root: payload.project_root.clone(),
            project_hash: project.hash.clone(),
            socket: payload.socket.clone(),
            spawned_at: self.backends.clock.now(),
            run_id: run_id.clone(),
            start_command: assembled.command.clone(),
            parent_session: request.command.parent_session.clone(),
        };
        save_meta(&paths, &meta)?;

        let spec = NewSession {
            name: name.clone(),
            cwd: project.root.clone(),
            width: request.width,
            height: request.height,
            env: vec![
                (ENV_MODE.to_string(), mode.as_str().to_string()),
                (ENV_AGENT.to_string(), agent.as_str().to_string()),
                (ENV_PROJECT_HASH.to_string(), project.hash.clone()),
                (ENV_RUN_ID.to_string(), run_id.clone()),
                (ENV_DONE_FILE.to_string(), paths.done().to_string_lossy().to_string()),
                (ENV_SESSION.to_string(), name.clone()),
            ],
            initial_command: Some(assembled.command.clone()),
        };
        if let Err(err) = self.mux().new_session(&socket, &spec) {
            let _ = remove_session_files(&paths);
            return Err(LisaError::MultiplexerSpawnFailed {
                session: name,
                details: err.to_string(),
            });
        }

        self.append(
            &paths,
            &new_event(
                EventType::Spawn,
                &name,
                Some(SessionState::JustStarted),
                "spawned",
                "spawn",
                0,
                Signals {
                    session_exists: true,
                    ..Default::default()
                },
            ),
        );
        info!(session = %name, agent = %agent, mode = %mode, run_id = %run_id, "Spawned session");

        payload.run_id = Some(run_id);
        Ok(payload)
    }

    /// Kills `name` under every known project hash except `keep_hash`.
    fn clean_other_hashes(&self, name: &str, keep_hash: &str) -> Vec<String> {
        let mut cleaned = Vec::new();
        for hash in self.storage.known_project_hashes() {
            if hash == keep_hash {
                continue;
            }
            let paths = self.storage.session_paths(&hash, name);
            if !paths.dir().exists() {
                continue;
            }
            let meta = load_meta(&paths).ok().flatten();
            let socket = self.socket_for(&hash, meta.as_ref());
            if let Ok(true) = self.mux().has_session(&socket, name) {
                if let Err(err) = self.mux().kill_session(&socket, name) {
                    warn!(session = %name, hash = %hash, error = %err, "Failed to kill stale session");
                }
            }
            match remove_session_files(&paths) {
                Ok(_) => cleaned.push(hash),
                Err(err) => warn!(session = %name, hash = %hash, error = %err, "Failed to clean artifacts"),
            }
        }
        cleaned
    }

    pub fn send(&self, request: &SendRequest) -> Result<SendPayload> {
        let target = self.resolve(&request.session, request.project_root.as_deref())?;
        if request.text.is_none() && request.keys.is_empty() {
            return Err(LisaError::MissingRequiredFlag("--text or --keys".to_string()));
        }
        if !self.mux().has_session(&target.socket, &target.name)? {
            return Err(LisaError::SessionNotFound(target.name));
        }

        let mut bytes = 0;
        if let Some(text) = &request.text {
            let enter = request.enter && request.keys.is_empty();
            self.mux().send_text(&target.socket, &target.name, text, enter)?;
            bytes = text.len();
        }
        if !request.keys.is_empty() {
            self.mux()
                .send_keys(&target.socket, &target.name, &request.keys, request.enter)?;
        }
        debug!(session = %target.name, bytes, keys = request.keys.len(), "Sent input");

        Ok(SendPayload {
            session: target.name,
            sent: true,
            bytes,
            keys: request.keys.clone(),
            enter: request.enter,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Classification
    // ═══════════════════════════════════════════════════════════════════════════

    /// Collects, classifies, appends an event and persists state.
    pub fn poll_once(&self, target: &ResolvedSession, options: PollOptions, index: Option<u64>) -> PollOutcome {
        let prior = load_state(&target.paths);
        let now = self.now_secs();
        let observation = collect(&CollectContext {
            mux: self.mux(),
            processes: self.backends.processes.as_ref(),
            socket: &target.socket,
            session: &target.name,
            paths: &target.paths,
            meta: target.meta.as_ref(),
            prior: prior.as_ref(),
            capture_lines: self.config.capture_lines,
            strip_noise: options.strip_noise,
            now,
        });
        let classification = classify(&ClassifyInput {
            mode: target.mode(),
            signals: &observation.signals,
            prior: prior.as_ref(),
            thresholds: self.config.thresholds,
            waiting_requires_turn_complete: options.waiting_requires_turn_complete,
        });

        let previous = prior.clone().unwrap_or_default();
        let poll_count = previous.poll_count + 1;
        let poll = index.unwrap_or(poll_count);
        let signals = observation.signals;

        if target.meta.is_some() || signals.session_exists {
            let event_type = if previous.last_state == Some(classification.state) {
                EventType::Snapshot
            } else {
                EventType::Transition
            };
            self.append(
                &target.paths,
                &new_event(
                    event_type,
                    &target.name,
                    Some(classification.state),
                    signals.pane_status.as_deref().unwrap_or("missing"),
                    &classification.reason,
                    poll,
                    signals.clone(),
                ),
            );

            let record = SessionStateRecord {
                last_hash: signals.output_hash.clone().or(previous.last_hash),
                last_change_at: observation.last_change_at.or(previous.last_change_at),
                poll_count,
                last_state: Some(classification.state),
                last_reason: Some(classification.reason.clone()),
                exit_code: classification.exit_code,
                agent_pid: signals.agent_pid,
                agent_cpu: signals.agent_cpu,
                marker_hits: signals.marker_hits.clone(),
                updated_at: Some(self.backends.clock.now()),
            };
            if let Err(err) = save_state(&target.paths, &record) {
                warn!(session = %target.name, error = %err, "Failed to persist state");
            }
        }

        debug!(
            session = %target.name,
            poll,
            state = %classification.state,
            reason = %classification.reason,
            "Classified"
        );

        PollOutcome {
            record: PollRecord {
                session: target.name.clone(),
                poll,
                state: classification.state,
                reason: classification.reason,
                next_action: classification.next_action.to_string(),
                signals,
            },
            raw_output: observation.raw_output,
            exit_code: classification.exit_code,
        }
    }

    fn status_of(&self, target: &ResolvedSession, options: PollOptions) -> StatusPayload {
        let outcome = self.poll_once(target, options, None);
        StatusPayload {
            session: target.name.clone(),
            state: outcome.record.state,
            reason: outcome.record.reason,
            next_action: outcome.record.next_action,
            exit_code: outcome.exit_code,
            poll: outcome.record.poll,
            run_id: target.meta.as_ref().map(|meta| meta.run_id.clone()),
            signals: outcome.record.signals,
        }
    }

    pub fn status(&self, session: &str, project_root: Option<&Path>, options: PollOptions) -> Result<StatusPayload> {
        let target = self.resolve(session, project_root)?;
        Ok(self.status_of(&target, options))
    }

    pub fn explain(
        &self,
        session: &str,
        project_root: Option<&Path>,
        options: PollOptions,
        events: usize,
    ) -> Result<ExplainPayload> {
        let target = self.resolve(session, project_root)?;
        let status = self.status_of(&target, options);
        let tail = read_events_tail(&target.paths, events)?;
        Ok(ExplainPayload {
            status,
            events: tail.events,
            dropped_lines: tail.dropped_lines,
            artifact_dir: target.paths.dir().to_string_lossy().to_string(),
        })
    }

    pub fn capture(&self, request: &CaptureRequest) -> Result<CapturePayload> {
        let target = self.resolve(&request.session, request.project_root.as_deref())?;
        if !self.mux().has_session(&target.socket, &target.name)? {
            return Err(LisaError::SessionNotFound(target.name));
        }
        let lines = request.lines.unwrap_or(self.config.capture_lines);
        let raw = self.mux().capture_pane(&target.socket, &target.name, lines)?;
        let output = if request.raw {
            raw.clone()
        } else {
            filter_output(&raw, true)
        };
        let output_file = if request.save {
            Some(write_output_file(&target.paths, &raw)?.to_string_lossy().to_string())
        } else {
            None
        };
        Ok(CapturePayload {
            session: target.name,
            lines: output.lines().count(),
            output,
            output_file,
        })
    }

    pub fn monitor(
        &self,
        session: &str,
        project_root: Option<&Path>,
        options: &MonitorOptions,
        poll_options: PollOptions,
        on_poll: &mut dyn FnMut(&PollRecord),
    ) -> Result<MonitorPayload> {
        let target = self.resolve(session, project_root)?;
        info!(
            session = %target.name,
            max_polls = options.max_polls,
            interval_ms = options.poll_interval.as_millis() as u64,
            "Monitoring session"
        );
        let mut poller = EnginePoller {
            engine: self,
            target,
            options: poll_options,
        };
        run_monitor(&mut poller, options, self.backends.sleeper.as_ref(), on_poll)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Teardown
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn kill(&self, session: &str, project_root: Option<&Path>, cleanup_all_hashes: bool) -> Result<KillPayload> {
        let target = self.resolve(session, project_root)?;
        let live = self.mux().has_session(&target.socket, &target.name)?;
        let had_artifacts = target.paths.dir().exists();
        if !live && !had_artifacts && !cleanup_all_hashes {
            return Err(LisaError::SessionNotFound(target.name));
        }

        let mut output_file = None;
        if live {
            match self
                .mux()
                .capture_pane(&target.socket, &target.name, self.config.capture_lines)
            {
                Ok(raw) => match write_output_file(&target.paths, &raw) {
                    Ok(path) => output_file = Some(path.to_string_lossy().to_string()),
                    Err(err) => warn!(session = %target.name, error = %err, "Failed to save output tail"),
                },
                Err(err) => warn!(session = %target.name, error = %err, "Failed to capture before kill"),
            }
            self.mux().kill_session(&target.socket, &target.name)?;
        }

        let removed_artifacts = remove_session_files(&target.paths)?;
        if live || had_artifacts {
            self.append(
                &target.paths,
                &new_event(EventType::Kill, &target.name, None, "killed", "kill", 0, Signals::default()),
            );
        }
        let cleaned_hashes = if cleanup_all_hashes {
            self.clean_other_hashes(&target.name, &target.project.hash)
        } else {
            Vec::new()
        };
        info!(session = %target.name, live, cleaned = cleaned_hashes.len(), "Killed session");

        Ok(KillPayload {
            session: target.name,
            killed: live,
            removed_artifacts,
            output_file,
            cleaned_hashes,
        })
    }

    pub fn cleanup(&self, discovery: &dyn SocketDiscovery, dry_run: bool) -> CleanupSummary {
        reaper::cleanup(self.mux(), discovery, dry_run)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Inventory
    // ═══════════════════════════════════════════════════════════════════════════

    /// Metadata of every session with artifacts, keyed by (name, socket).
    fn known_sessions(&self) -> BTreeMap<(String, String), (SessionMeta, Option<SessionStateRecord>)> {
        let mut known = BTreeMap::new();
        for hash in self.storage.known_project_hashes() {
            for paths in self.storage.session_dirs(&hash) {
                if let Ok(Some(meta)) = load_meta(&paths) {
                    let socket = self.socket_for(&hash, Some(&meta)).to_string_lossy().to_string();
                    known.insert((meta.session.clone(), socket), (meta, load_state(&paths)));
                }
            }
        }
        known
    }

    pub fn list(&self, project_root: Option<&Path>, discovery: Option<&dyn SocketDiscovery>) -> Result<ListPayload> {
        let project = resolve_project(project_root)?;
        let mut sockets = BTreeSet::new();
        sockets.insert(self.storage.socket_path(&project.hash));
        if let Some(discovery) = discovery {
            sockets.extend(discovery.candidates());
        }

        let known = self.known_sessions();
        let mut payload = ListPayload {
            sessions: Vec::new(),
            errors: Vec::new(),
        };
        for socket in sockets {
            let names = match self.mux().list_sessions(&socket) {
                Ok(names) => names,
                Err(err) if err.is_unreachable() => continue,
                Err(err) => {
                    payload.errors.push(format!("{}: {}", socket.display(), err));
                    continue;
                }
            };
            let socket_text = socket.to_string_lossy().to_string();
            for name in names.into_iter().filter(|name| name.starts_with(SESSION_PREFIX)) {
                let found = known.get(&(name.clone(), socket_text.clone()));
                payload.sessions.push(ListEntry {
                    session: name,
                    socket: socket_text.clone(),
                    agent: found.map(|(meta, _)| meta.agent),
                    mode: found.map(|(meta, _)| meta.mode),
                    state: found.and_then(|(_, state)| state.as_ref()?.last_state),
                    parent_session: found.and_then(|(meta, _)| meta.parent_session.clone()),
                });
            }
        }
        Ok(payload)
    }

    pub fn tree(&self, project_root: Option<&Path>) -> Result<TreePayload> {
        let project = resolve_project(project_root)?;
        let mut nodes: BTreeMap<String, (Option<SessionState>, bool, Option<String>)> = BTreeMap::new();
        for paths in self.storage.session_dirs(&project.hash) {
            let Ok(Some(meta)) = load_meta(&paths) else {
                continue;
            };
            let socket = self.socket_for(&project.hash, Some(&meta));
            let live = self.mux().has_session(&socket, &meta.session).unwrap_or(false);
            let state = load_state(&paths).and_then(|state| state.last_state);
            nodes.insert(meta.session.clone(), (state, live, meta.parent_session.clone()));
        }
        Ok(TreePayload {
            project_hash: project.hash,
            roots: build_tree(&nodes),
        })
    }

    pub fn handoff(
        &self,
        session: &str,
        project_root: Option<&Path>,
        options: PollOptions,
        events: usize,
    ) -> Result<HandoffPayload> {
        let target = self.resolve(session, project_root)?;
        let status = self.status_of(&target, options);
        let recent_events = read_events_tail(&target.paths, events)?.events;

        let output = if status.signals.session_exists {
            self.mux()
                .capture_pane(&target.socket, &target.name, self.config.capture_lines)
                .unwrap_or_default()
        } else {
            fs::read_to_string(target.paths.output()).unwrap_or_default()
        };
        let output_tail = session::sentinel::output_tail(&output, HANDOFF_OUTPUT_LINES);
        let suggestion = handoff_suggestion(&target.name, status.state, status.exit_code);
        let meta = target.meta.as_ref();

        Ok(HandoffPayload {
            session: target.name.clone(),
            agent: meta.map(|meta| meta.agent),
            mode: meta.map(|meta| meta.mode),
            run_id: meta.map(|meta| meta.run_id.clone()),
            project_root: meta.map(|meta| meta.project_root.clone()),
            start_command: meta.map(|meta| meta.start_command.clone()),
            state: status.state,
            reason: status.reason,
            next_action: status.next_action,
            recent_events,
            output_tail,
            suggestion,
        })
    }

    /// Records an agent's finish hook. Values come from the pane environment.
    pub fn hook_finish(&self, request: &HookRequest) -> Result<HookPayload> {
        let session = request
            .session
            .clone()
            .ok_or_else(|| LisaError::MissingRequiredFlag(ENV_SESSION.to_string()))?;
        validate_session_name(&session)?;
        let project_hash = request
            .project_hash
            .clone()
            .ok_or_else(|| LisaError::MissingRequiredFlag(ENV_PROJECT_HASH.to_string()))?;
        let run_id = request
            .run_id
            .clone()
            .ok_or_else(|| LisaError::MissingRequiredFlag(ENV_RUN_ID.to_string()))?;

        let paths = self.storage.session_paths(&project_hash, &session);
        let sentinel = Sentinel {
            run_id: run_id.clone(),
            exit_code: request.exit_code,
        };
        write_sentinel(&paths.hook(), &sentinel)?;
        self.append(
            &paths,
            &new_event(
                EventType::Hook,
                &session,
                None,
                "hook",
                &format!("finish_hook:{}", request.exit_code),
                0,
                Signals {
                    hook_sentinel_code: Some(request.exit_code),
                    ..Default::default()
                },
            ),
        );
        info!(session = %session, exit_code = request.exit_code, "Recorded finish hook");

        Ok(HookPayload {
            session,
            run_id,
            exit_code: request.exit_code,
            sentinel: paths.hook().to_string_lossy().to_string(),
        })
    }

    pub fn doctor(&self, project_root: Option<&Path>) -> DoctorPayload {
        let binaries: Vec<BinaryCheck> = ["tmux", "claude", "codex"]
            .into_iter()
            .map(|name| {
                let path = find_in_path(name);
                BinaryCheck {
                    name: name.to_string(),
                    found: path.is_some(),
                    path: path.map(|p| p.to_string_lossy().to_string()),
                }
            })
            .collect();
        let socket = resolve_project(project_root)
            .map(|project| self.storage.socket_path(&project.hash).to_string_lossy().to_string())
            .unwrap_or_default();
        DoctorPayload {
            ok: binaries.first().map(|check| check.found).unwrap_or(false),
            binaries,
            state_dir: self.storage.root().to_string_lossy().to_string(),
            socket,
        }
    }
}

struct EnginePoller<'a> {
    engine: &'a SessionEngine,
    target: ResolvedSession,
    options: PollOptions,
}

impl SessionPoller for EnginePoller<'_> {
    fn session(&self) -> &str {
        &self.target.name
    }

    fn session_exists(&mut self) -> bool {
        self.engine
            .mux()
            .has_session(&self.target.socket, &self.target.name)
            .unwrap_or(false)
    }

    fn poll(&mut self, index: u64) -> PollOutcome {
        self.engine.poll_once(&self.target, self.options, Some(index))
    }

    fn record_timeout(&mut self, index: u64, reason: &str, signals: &Signals) {
        if self.target.meta.is_none() && !signals.session_exists {
            return;
        }
        self.engine.append(
            &self.target.paths,
            &new_event(
                EventType::Transition,
                &self.target.name,
                Some(SessionState::Timeout),
                signals.pane_status.as_deref().unwrap_or("missing"),
                reason,
                index,
                signals.clone(),
            ),
        );
    }
}

fn handoff_suggestion(session: &str, state: SessionState, exit_code: Option<i32>) -> String {
    match state {
        SessionState::WaitingInput => format!(
            "The agent is waiting for input. Reply with `lisa session send --session {} --text \"...\" --enter`.",
            session
        ),
        SessionState::Completed => format!(
            "The work finished. Review the output tail, then run `lisa session kill --session {}`.",
            session
        ),
        SessionState::Crashed => format!(
            "The agent exited with code {}. Inspect the output tail before respawning.",
            exit_code.map(|code| code.to_string()).unwrap_or_else(|| "unknown".to_string())
        ),
        SessionState::JustStarted | SessionState::InProgress => format!(
            "Still working. Continue with `lisa session monitor --session {}`.",
            session
        ),
        SessionState::NotFound => "The session is gone. Spawn a new one to continue.".to_string(),
        SessionState::Degraded | SessionState::Timeout => format!(
            "The state is uncertain. Run `lisa session explain --session {}` for the raw signals.",
            session
        ),
    }
}

/// Nests sessions under their `parentSession`; orphans and cycles become roots.
fn build_tree(nodes: &BTreeMap<String, (Option<SessionState>, bool, Option<String>)>) -> Vec<TreeNode> {
    let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut roots = Vec::new();
    for (name, (_, _, parent)) in nodes {
        match parent.as_deref().filter(|parent| nodes.contains_key(*parent) && *parent != name.as_str()) {
            Some(parent) => children.entry(parent).or_default().push(name),
            None => roots.push(name.as_str()),
        }
    }

    fn build<'a>(
        name: &'a str,
        nodes: &BTreeMap<String, (Option<SessionState>, bool, Option<String>)>,
        children: &BTreeMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
    ) -> Option<TreeNode> {
        if !visited.insert(name) {
            return None;
        }
        let (state, live, _) = nodes.get(name)?;
        let kids = children
            .get(name)
            .map(|kids| {
                kids.iter()
                    .filter_map(|kid| build(kid, nodes, children, visited))
                    .collect()
            })
            .unwrap_or_default();
        Some(TreeNode {
            session: name.to_string(),
            state: *state,
            live: *live,
            children: kids,
        })
    }

    let mut visited = HashSet::new();
    let mut tree: Vec<TreeNode> = roots
        .into_iter()
        .filter_map(|root| build(root, nodes, &children, &mut visited))
        .collect();
    for name in nodes.keys() {
        if !visited.contains(name.as_str()) {
            tree.extend(build(name, nodes, &children, &mut visited));
        }
    }
    tree
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_names_need_the_prefix() {
        assert!(validate_session_name("lisa-worker-1").is_ok());
        assert!(validate_session_name("lisa/x/*").is_err());
        for name in ["worker", "lisa-", "lisa-a b", "lisa-a:b", "lisa-a.b"] {
            assert_eq!(
                validate_session_name(name).unwrap_err().code(),
                "invalid_session_name",
                "{name}"
            );
        }
    }

    #[test]
    fn generated_names_are_valid() {
        let name = generate_session_name("codex");
        assert!(name.starts_with("lisa-codex-"));
        validate_session_name(&name).unwrap();
    }

    #[test]
    fn tree_nests_children_and_survives_cycles() {
        let mut nodes = BTreeMap::new();
        nodes.insert("lisa-root".to_string(), (Some(SessionState::InProgress), true, None));
        nodes.insert(
            "lisa-child".to_string(),
            (Some(SessionState::Completed), false, Some("lisa-root".to_string())),
        );
        nodes.insert(
            "lisa-orphan".to_string(),
            (None, false, Some("lisa-gone".to_string())),
        );
        nodes.insert("lisa-x".to_string(), (None, false, Some("lisa-y".to_string())));
        nodes.insert("lisa-y".to_string(), (None, false, Some("lisa-x".to_string())));

        let tree = build_tree(&nodes);
        let names: Vec<&str> = tree.iter().map(|node| node.session.as_str()).collect();
        assert!(names.contains(&"lisa-root"));
        assert!(names.contains(&"lisa-orphan"));
        let root = tree.iter().find(|node| node.session == "lisa-root").unwrap();
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].session, "lisa-child");

        let total: usize = tree.iter().map(|node| 1 + node.children.len()).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn suggestions_follow_the_state() {
        assert!(handoff_suggestion("lisa-a", SessionState::WaitingInput, None).contains("session send"));
        assert!(handoff_suggestion("lisa-a", SessionState::Crashed, Some(7)).contains("code 7"));
    }
}
