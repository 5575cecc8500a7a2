//! Error types for lisa-core operations.
//!
//! Every variant maps to a stable snake_case code that the CLI prints as
//! `errorCode` in JSON mode.

use std::path::PathBuf;

use lisa_protocol::ErrorInfo;

use crate::process::ProcessError;
use crate::tmux::TmuxError;

#[derive(Debug, thiserror::Error)]
pub enum LisaError {
    // ─────────────────────────────────────────────────────────────────────
    // Input Validation
    // ─────────────────────────────────────────────────────────────────────
    #[error("session name must start with '{prefix}': {name}")]
    InvalidSessionName { name: String, prefix: &'static str },

    #[error("invalid agent: {0}")]
    InvalidAgent(String),

    #[error("invalid mode: {0}")]
    InvalidMode(String),

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("invalid model configuration: {0}")]
    InvalidModelConfiguration(String),

    #[error("invalid nested policy: {0}")]
    InvalidNestedPolicy(String),

    #[error("invalid nesting intent: {0}")]
    InvalidNestingIntent(String),

    #[error("invalid project root {path}: {reason}")]
    InvalidProjectRoot { path: PathBuf, reason: String },

    #[error("missing required flag: {0}")]
    MissingRequiredFlag(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid JSONPath expression: {0}")]
    InvalidJsonPath(String),

    #[error("invalid expectation: {0} (expected any, terminal or marker)")]
    InvalidExpectation(String),

    // ─────────────────────────────────────────────────────────────────────
    // Session Lifecycle
    // ─────────────────────────────────────────────────────────────────────
    #[error("failed to start tmux session {session}: {details}")]
    MultiplexerSpawnFailed { session: String, details: String },

    #[error("session already exists: {0}")]
    SessionExists(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session preflight failed: {0}")]
    PreflightFailed(String),

    #[error("monitor expectation failed: {0}")]
    ExpectationFailed(String),

    // ─────────────────────────────────────────────────────────────────────
    // Cleanup
    // ─────────────────────────────────────────────────────────────────────
    #[error("failed to probe socket {socket}: {details}")]
    CleanupProbeFailed { socket: PathBuf, details: String },

    #[error("cleanup finished with {0} socket error(s)")]
    CleanupSocketErrors(usize),

    // ─────────────────────────────────────────────────────────────────────
    // Infrastructure
    // ─────────────────────────────────────────────────────────────────────
    #[error(transparent)]
    Multiplexer(#[from] TmuxError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("state directory unavailable: {0}")]
    StateDirUnavailable(String),
}

impl LisaError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        LisaError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        LisaError::Json {
            context: context.into(),
            source,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            LisaError::InvalidSessionName { .. } => "invalid_session_name",
            LisaError::InvalidAgent(_) => "invalid_agent",
            LisaError::InvalidMode(_) => "invalid_mode",
            LisaError::InvalidModel(_) => "invalid_model",
            LisaError::InvalidModelConfiguration(_) => "invalid_model_configuration",
            LisaError::InvalidNestedPolicy(_) => "invalid_nested_policy",
            LisaError::InvalidNestingIntent(_) => "invalid_nesting_intent",
            LisaError::InvalidProjectRoot { .. } => "invalid_project_root",
            LisaError::MissingRequiredFlag(_) => "missing_required_flag",
            LisaError::InvalidState(_) => "invalid_state",
            LisaError::InvalidJsonPath(_) => "invalid_jsonpath",
            LisaError::InvalidExpectation(_) => "invalid_expectation",
            LisaError::MultiplexerSpawnFailed { .. } => "multiplexer_spawn_failed",
            LisaError::SessionExists(_) => "session_exists",
            LisaError::SessionNotFound(_) => "session_not_found",
            LisaError::PreflightFailed(_) => "session_preflight_failed",
            LisaError::ExpectationFailed(_) => "monitor_expectation_failed",
            LisaError::CleanupProbeFailed { .. } => "cleanup_probe_failed",
            LisaError::CleanupSocketErrors(_) => "cleanup_socket_errors",
            LisaError::Multiplexer(_) => "multiplexer_error",
            LisaError::Process(_) => "process_error",
            LisaError::Io { .. } => "io_error",
            LisaError::Json { .. } => "json_error",
            LisaError::StateDirUnavailable(_) => "state_dir_unavailable",
        }
    }

    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.code(), self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LisaError>;
