//! On-disk records for one supervised session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lisa_protocol::{AgentKind, SessionMode, SessionState};

/// Written once by spawn, removed by kill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub session: String,
    pub agent: AgentKind,
    pub mode: SessionMode,
    pub project_root: String,
    pub project_hash: String,
    pub socket: String,
    pub spawned_at: DateTime<Utc>,
    /// Fresh per spawn; sentinels carrying another run id are ignored.
    pub run_id: String,
    pub start_command: String,
    #[serde(default)]
    pub parent_session: Option<String>,
}

/// Mutable classifier memory, rewritten after every poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionStateRecord {
    pub last_hash: Option<String>,
    /// Unix seconds of the last pane-output change.
    pub last_change_at: Option<i64>,
    pub poll_count: u64,
    pub last_state: Option<SessionState>,
    pub last_reason: Option<String>,
    /// Exit code that accompanied a `completed`/`crashed` verdict.
    pub exit_code: Option<i32>,
    pub agent_pid: Option<u32>,
    pub agent_cpu: Option<f32>,
    pub marker_hits: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionStateRecord {
    /// The verdict that can no longer change, if one was reached.
    pub fn finished(&self) -> Option<(SessionState, Option<i32>)> {
        self.last_state
            .filter(SessionState::is_finished)
            .map(|state| (state, self.exit_code))
    }
}
