//! Wire types shared by the lisa CLI and lisa-core.
//!
//! Everything here is what ends up on disk (event log lines) or on stdout
//! (command payloads), so field names are camelCase and stable. The core owns
//! the semantics; this crate only pins the shapes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix every supervised session name must carry.
pub const SESSION_PREFIX: &str = "lisa-";

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
/// Reserved for monitor runs that observed `crashed` or ran out of polls.
pub const EXIT_MONITOR_FAILURE: i32 = 2;

// ═══════════════════════════════════════════════════════════════════════════════
// Lifecycle
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    JustStarted,
    InProgress,
    WaitingInput,
    Completed,
    Crashed,
    NotFound,
    Degraded,
    /// Overlaid by the monitor when its poll budget runs out; never classified.
    Timeout,
}

impl SessionState {
    pub const ALL: [SessionState; 8] = [
        SessionState::JustStarted,
        SessionState::InProgress,
        SessionState::WaitingInput,
        SessionState::Completed,
        SessionState::Crashed,
        SessionState::NotFound,
        SessionState::Degraded,
        SessionState::Timeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::JustStarted => "just_started",
            SessionState::InProgress => "in_progress",
            SessionState::WaitingInput => "waiting_input",
            SessionState::Completed => "completed",
            SessionState::Crashed => "crashed",
            SessionState::NotFound => "not_found",
            SessionState::Degraded => "degraded",
            SessionState::Timeout => "timeout",
        }
    }

    /// States that end a monitor run on their own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Crashed | SessionState::NotFound
        )
    }

    /// States that, once classified, stick for the rest of the run.
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Crashed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let needle = value.trim().to_ascii_lowercase();
        SessionState::ALL
            .into_iter()
            .find(|state| state.as_str() == needle)
            .ok_or_else(|| format!("unknown session state: {}", value))
    }
}

/// Why a monitor run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Completed,
    Crashed,
    NotFound,
    WaitingInput,
    MarkerFound,
    StateMatched,
    JsonpathMatched,
    MaxPollsExceeded,
    DegradedMaxPollsExceeded,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Completed => "completed",
            ExitReason::Crashed => "crashed",
            ExitReason::NotFound => "not_found",
            ExitReason::WaitingInput => "waiting_input",
            ExitReason::MarkerFound => "marker_found",
            ExitReason::StateMatched => "state_matched",
            ExitReason::JsonpathMatched => "jsonpath_matched",
            ExitReason::MaxPollsExceeded => "max_polls_exceeded",
            ExitReason::DegradedMaxPollsExceeded => "degraded_max_polls_exceeded",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Claude,
    Codex,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Codex => "codex",
        }
    }

    /// Executable name looked up on PATH and in the pane's process tree.
    pub fn binary(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Interactive,
    Exec,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Interactive => "interactive",
            SessionMode::Exec => "exec",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Signals & Events
// ═══════════════════════════════════════════════════════════════════════════════

/// One poll's worth of observations, as fed to the classifier.
///
/// Collector failures land in the `*_error` fields instead of aborting the poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Signals {
    pub session_exists: bool,
    pub pane_status: Option<String>,
    pub pane_pid: Option<u32>,
    pub pane_command: Option<String>,
    pub pane_dead_status: Option<i32>,
    pub pane_error: Option<String>,
    pub output_hash: Option<String>,
    pub output_changed: bool,
    pub output_empty: bool,
    pub idle_seconds: u64,
    pub last_output_change_at: Option<i64>,
    pub capture_error: Option<String>,
    pub agent_pid: Option<u32>,
    pub agent_cpu: Option<f32>,
    pub agent_scan_error: Option<String>,
    pub input_box: bool,
    pub waiting_for_input: bool,
    pub turn_complete: bool,
    pub exec_marker_code: Option<i32>,
    pub session_marker_code: Option<i32>,
    pub done_sentinel_code: Option<i32>,
    pub done_sentinel_ignored: bool,
    pub hook_sentinel_code: Option<i32>,
    pub marker_hits: Vec<String>,
    pub age_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Spawn,
    Snapshot,
    Transition,
    Kill,
    Hook,
}

/// One line of `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// RFC 3339 with nanoseconds.
    pub at: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub session: String,
    pub state: Option<SessionState>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub poll: u64,
    #[serde(default)]
    pub signals: Signals,
}

impl EventRecord {
    /// Parsed `at`, or `None` when the line carries a malformed timestamp.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.at)
            .ok()
            .map(|at| at.with_timezone(&Utc))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub error_code: String,
    pub error: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            error_code: code.to_string(),
            error: message.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Command Payloads
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestingReport {
    pub detected: bool,
    pub parent_session: Option<String>,
    pub bypass: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnPayload {
    pub session: String,
    pub agent: AgentKind,
    pub mode: SessionMode,
    pub project_root: String,
    pub project_hash: String,
    pub socket: String,
    pub run_id: Option<String>,
    pub command: String,
    pub dry_run: bool,
    pub artifact_dir: String,
    pub nesting: NestingReport,
    pub cleaned_hashes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPayload {
    pub session: String,
    pub sent: bool,
    pub bytes: usize,
    pub keys: Vec<String>,
    pub enter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub session: String,
    pub state: SessionState,
    pub reason: String,
    pub next_action: String,
    pub exit_code: Option<i32>,
    pub poll: u64,
    pub run_id: Option<String>,
    pub signals: Signals,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainPayload {
    pub status: StatusPayload,
    pub events: Vec<EventRecord>,
    pub dropped_lines: usize,
    pub artifact_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturePayload {
    pub session: String,
    pub lines: usize,
    pub output: String,
    pub output_file: Option<String>,
}

/// Per-poll record, used for `--stream-json` and `--until-jsonpath`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRecord {
    pub session: String,
    pub poll: u64,
    pub state: SessionState,
    pub reason: String,
    pub next_action: String,
    pub signals: Signals,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorPayload {
    pub session: String,
    pub final_state: SessionState,
    pub exit_reason: ExitReason,
    pub exit_code: i32,
    pub polls: u64,
    pub last_reason: String,
    pub next_action: String,
    pub agent_exit_code: Option<i32>,
    pub matched_marker: Option<String>,
    pub expectation_failed: bool,
    pub signals: Signals,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorMinPayload {
    pub session: String,
    pub final_state: SessionState,
    pub exit_reason: ExitReason,
    pub polls: u64,
}

impl From<&MonitorPayload> for MonitorMinPayload {
    fn from(payload: &MonitorPayload) -> Self {
        Self {
            session: payload.session.clone(),
            final_state: payload.final_state,
            exit_reason: payload.exit_reason,
            polls: payload.polls,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillPayload {
    pub session: String,
    pub killed: bool,
    pub removed_artifacts: Vec<String>,
    pub output_file: Option<String>,
    pub cleaned_hashes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEntry {
    pub session: String,
    pub socket: String,
    pub agent: Option<AgentKind>,
    pub mode: Option<SessionMode>,
    pub state: Option<SessionState>,
    pub parent_session: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPayload {
    pub sessions: Vec<ListEntry>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub session: String,
    pub state: Option<SessionState>,
    pub live: bool,
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreePayload {
    pub project_hash: String,
    pub roots: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffPayload {
    pub session: String,
    pub agent: Option<AgentKind>,
    pub mode: Option<SessionMode>,
    pub run_id: Option<String>,
    pub project_root: Option<String>,
    pub start_command: Option<String>,
    pub state: SessionState,
    pub reason: String,
    pub next_action: String,
    pub recent_events: Vec<EventRecord>,
    pub output_tail: Vec<String>,
    pub suggestion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookPayload {
    pub session: String,
    pub run_id: String,
    pub exit_code: i32,
    pub sentinel: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub dry_run: bool,
    pub scanned: usize,
    pub removed: usize,
    pub killed: usize,
    pub would_remove: usize,
    pub would_kill: usize,
    pub kept_active: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryCheck {
    pub name: String,
    pub found: bool,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorPayload {
    pub ok: bool,
    pub binaries: Vec<BinaryCheck>,
    pub state_dir: String,
    pub socket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildCmdPayload {
    pub agent: AgentKind,
    pub mode: SessionMode,
    pub command: String,
    pub nesting: NestingReport,
}
