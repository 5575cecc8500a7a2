//! Signal collection: one poll's observations of a session.
//!
//! Collectors never fail the poll. Whatever cannot be observed is recorded in
//! the matching `*_error` field of [`Signals`] and left for the classifier to
//! weigh.

pub mod markers;
pub mod output;
pub mod process_scan;
pub mod prompt;

use std::path::Path;

use lisa_protocol::{SessionMode, Signals};

use crate::process::ProcessTable;
use crate::session::{SessionMeta, SessionStateRecord};
use crate::storage::SessionPaths;
use crate::tmux::Multiplexer;

pub use markers::{check_sentinel, scan_markers, MarkerScan, SentinelCheck};
pub use output::{filter_output, hash_output, idle_clock, IdleClock};
pub use process_scan::{is_shell, scan_agent, AgentScan};
pub use prompt::{detect_prompt, PromptSignals};

/// Everything a poll needs to observe one session.
pub struct CollectContext<'a> {
    pub mux: &'a dyn Multiplexer,
    pub processes: &'a dyn ProcessTable,
    pub socket: &'a Path,
    pub session: &'a str,
    pub paths: &'a SessionPaths,
    pub meta: Option<&'a SessionMeta>,
    pub prior: Option<&'a SessionStateRecord>,
    pub capture_lines: usize,
    pub strip_noise: bool,
    /// Unix seconds.
    pub now: i64,
}

/// Signals plus the raw material the caller persists or matches against.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub signals: Signals,
    pub raw_output: String,
    pub filtered_output: String,
    pub last_change_at: Option<i64>,
}

pub fn collect(ctx: &CollectContext<'_>) -> Observation {
    let mut obs = Observation::default();
    let run_id = ctx.meta.map(|meta| meta.run_id.as_str());
    let spawned_at = ctx.meta.map(|meta| meta.spawned_at.timestamp()).unwrap_or(ctx.now);
    let mode = ctx.meta.map(|meta| meta.mode);
    let signals = &mut obs.signals;

    if ctx.meta.is_some() {
        signals.age_seconds = Some((ctx.now - spawned_at).max(0) as u64);
    }

    let done = check_sentinel(&ctx.paths.done(), run_id);
    signals.done_sentinel_code = done.code;
    signals.done_sentinel_ignored = done.ignored;
    signals.hook_sentinel_code = check_sentinel(&ctx.paths.hook(), run_id).code;

    match ctx.mux.has_session(ctx.socket, ctx.session) {
        Ok(true) => signals.session_exists = true,
        Ok(false) => return obs,
        Err(err) => {
            signals.pane_error = Some(err.to_string());
            return obs;
        }
    }

    match ctx.mux.pane_info(ctx.socket, ctx.session) {
        Ok(info) => {
            signals.pane_status = Some(info.status().to_string());
            signals.pane_pid = (info.pid != 0).then_some(info.pid);
            signals.pane_command = Some(info.current_command.clone()).filter(|c| !c.is_empty());
            signals.pane_dead_status = info.dead.then_some(info.dead_status).flatten();
        }
        Err(err) => signals.pane_error = Some(err.to_string()),
    }

    match ctx.mux.capture_pane(ctx.socket, ctx.session, ctx.capture_lines) {
        Ok(raw) => obs.raw_output = raw,
        Err(err) => signals.capture_error = Some(err.to_string()),
    }

    // A failed capture keeps the previous hash so the idle clock is not reset.
    if signals.capture_error.is_none() {
        obs.filtered_output = filter_output(&obs.raw_output, ctx.strip_noise);
        let hash = hash_output(&obs.filtered_output);
        let clock = idle_clock(&hash, ctx.prior, spawned_at, ctx.now);
        signals.output_hash = Some(hash);
        signals.output_changed = clock.changed;
        signals.output_empty = obs.filtered_output.trim().is_empty();
        signals.idle_seconds = clock.idle_seconds;
        signals.last_output_change_at = Some(clock.last_change_at);
        obs.last_change_at = Some(clock.last_change_at);
    } else {
        let last_change = ctx.prior.and_then(|prior| prior.last_change_at).unwrap_or(spawned_at);
        signals.output_hash = ctx.prior.and_then(|prior| prior.last_hash.clone());
        signals.idle_seconds = (ctx.now - last_change).max(0) as u64;
        signals.last_output_change_at = Some(last_change);
        obs.last_change_at = Some(last_change);
    }

    let markers = scan_markers(
        &obs.filtered_output,
        run_id,
        mode == Some(SessionMode::Exec),
    );
    signals.exec_marker_code = markers.exec_code;
    signals.session_marker_code = markers.session_code;
    signals.marker_hits = markers.hits;

    let prompt = detect_prompt(&obs.filtered_output);
    signals.input_box = prompt.input_box;
    signals.waiting_for_input = prompt.waiting_for_input();
    signals.turn_complete = prompt.turn_complete;

    if let (Some(pid), Some(meta)) = (signals.pane_pid, ctx.meta) {
        let scan = scan_agent(ctx.processes, pid, meta.agent);
        signals.agent_pid = scan.pid;
        signals.agent_cpu = scan.cpu;
        signals.agent_scan_error = scan.error;
    }

    obs
}
