//! Maps one poll's [`Signals`] to a lifecycle state.
//!
//! Pure: no I/O, no clock. Rules are applied top-down and the first rule that
//! holds wins.
//!
//! | Order | Rule | State |
//! |-------|------|-------|
//! | 1 | previous verdict was completed/crashed | same verdict |
//! | 2 | tmux has no such session | `not_found` |
//! | 3 | exec / session done marker on the pane | `completed` or `crashed` |
//! | 4 | done sentinel for this run | `completed` or `crashed` |
//! | 5 | finish-hook sentinel for this run | `completed` or `crashed` |
//! | 6 | pane process exited | `completed` or `crashed` |
//! | 7 | nothing on screen yet, or inside the grace window | `just_started` |
//! | 8 | busy agent, or pane changed within the idle window | `in_progress` |
//! | 9 | interactive and idle with a prompt / agent / foreground program | `waiting_input` |
//! | 10 | exec and idle | `in_progress` until the marker shows |
//! | 11 | nothing positive and idle past the stuck threshold | `degraded` |
//!
//! Rule 9 includes any non-shell foreground program that has been silent for
//! the idle window (`cat`, a REPL, a pager). From outside the pane a silent
//! `sleep 600` looks the same, so it is reported as `foreground_idle` too;
//! `--waiting-requires-turn-complete` is the way to demand more evidence.

use lisa_protocol::{SessionMode, SessionState, Signals};

use crate::config::Thresholds;
use crate::session::SessionStateRecord;
use crate::signals::is_shell;

#[derive(Debug, Clone, Copy)]
pub struct ClassifyInput<'a> {
    pub mode: SessionMode,
    pub signals: &'a Signals,
    pub prior: Option<&'a SessionStateRecord>,
    pub thresholds: Thresholds,
    /// Hold back `waiting_input` until a finished assistant turn is visible.
    pub waiting_requires_turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub state: SessionState,
    pub reason: String,
    pub next_action: &'static str,
    pub exit_code: Option<i32>,
}

impl Classification {
    fn new(state: SessionState, reason: &str) -> Self {
        Self {
            state,
            reason: reason.to_string(),
            next_action: next_action(state),
            exit_code: None,
        }
    }

    fn finished(code: i32, source: &str) -> Self {
        let (state, suffix) = if code == 0 {
            (SessionState::Completed, "")
        } else {
            (SessionState::Crashed, "_nonzero")
        };
        Self {
            exit_code: Some(code),
            ..Self::new(state, &format!("{}{}", source, suffix))
        }
    }
}

/// What a caller should do next for a session in `state`.
pub fn next_action(state: SessionState) -> &'static str {
    match state {
        SessionState::JustStarted | SessionState::InProgress => "wait",
        SessionState::WaitingInput => "send_input",
        SessionState::Completed => "capture_output",
        SessionState::Crashed => "inspect_output",
        SessionState::NotFound => "spawn",
        SessionState::Degraded => "explain",
        SessionState::Timeout => "monitor_again",
    }
}

pub fn classify(input: &ClassifyInput<'_>) -> Classification {
    let signals = input.signals;
    let thresholds = &input.thresholds;

    if let Some((state, code)) = input.prior.and_then(SessionStateRecord::finished) {
        let reason = input
            .prior
            .and_then(|prior| prior.last_reason.clone())
            .unwrap_or_else(|| state.as_str().to_string());
        return Classification {
            exit_code: code,
            ..Classification::new(state, &reason)
        };
    }

    if !signals.session_exists {
        return match &signals.pane_error {
            Some(_) => Classification::new(SessionState::Degraded, "multiplexer_error"),
            None => Classification::new(SessionState::NotFound, "session_missing"),
        };
    }

    // The wrapper prints the exec marker before the session marker, so the
    // exec marker is the first in scan order whenever both are present.
    if let Some(code) = signals.exec_marker_code {
        return Classification::finished(code, "exec_done_marker");
    }
    if let Some(code) = signals.session_marker_code {
        return Classification::finished(code, "session_done_marker");
    }
    if let Some(code) = signals.done_sentinel_code {
        return Classification::finished(code, "done_sentinel");
    }
    if let Some(code) = signals.hook_sentinel_code {
        return Classification::finished(code, "finish_hook");
    }

    if signals.pane_status.as_deref() == Some("dead") {
        return match signals.pane_dead_status {
            Some(code) if code != 0 => Classification::finished(code, "pane_exited"),
            _ => Classification {
                exit_code: Some(0),
                ..Classification::new(SessionState::Completed, "pane_exited")
            },
        };
    }

    let age = signals.age_seconds.unwrap_or(u64::MAX);
    if signals.output_empty && signals.capture_error.is_none() {
        return Classification::new(SessionState::JustStarted, "no_output");
    }
    if age < thresholds.grace_secs {
        return Classification::new(SessionState::JustStarted, "grace_window");
    }

    if signals
        .agent_cpu
        .map(|cpu| cpu > thresholds.cpu_active)
        .unwrap_or(false)
    {
        return Classification::new(SessionState::InProgress, "agent_cpu_active");
    }
    if signals.output_changed {
        return Classification::new(SessionState::InProgress, "output_changed");
    }
    if signals.idle_seconds < thresholds.idle_secs {
        return Classification::new(SessionState::InProgress, "output_recent");
    }

    let stuck = signals.idle_seconds >= thresholds.stuck_secs;
    match input.mode {
        SessionMode::Interactive => classify_idle_interactive(input, stuck),
        SessionMode::Exec if signals.agent_scan_error.is_some() && stuck => {
            Classification::new(SessionState::Degraded, "agent_scan_error_stuck")
        }
        SessionMode::Exec => Classification::new(SessionState::InProgress, "exec_pending_marker"),
    }
}

/// Idle interactive pane. Evidence of a reader, strongest first: the agent's
/// input box, a prompt line, a live agent process, any non-shell foreground
/// program.
fn classify_idle_interactive(input: &ClassifyInput<'_>, stuck: bool) -> Classification {
    let signals = input.signals;
    let foreground = signals.pane_command.as_deref().unwrap_or_default();
    let foreground_program = !foreground.is_empty() && !is_shell(foreground);

    let reason = if signals.input_box {
        Some("input_box")
    } else if signals.waiting_for_input {
        Some("prompt_visible")
    } else if signals.agent_pid.is_some() {
        Some("agent_idle")
    } else if foreground_program {
        Some("foreground_idle")
    } else {
        None
    };

    match reason {
        Some(_) if input.waiting_requires_turn_complete && !signals.turn_complete => {
            Classification::new(SessionState::InProgress, "awaiting_turn_complete")
        }
        Some(reason) => Classification::new(SessionState::WaitingInput, reason),
        None if signals.agent_scan_error.is_some() && stuck => {
            Classification::new(SessionState::Degraded, "agent_scan_error_stuck")
        }
        None if signals.agent_scan_error.is_some() => {
            Classification::new(SessionState::InProgress, "agent_scan_error")
        }
        None => Classification::new(SessionState::Degraded, "agent_exited_to_shell"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alive() -> Signals {
        Signals {
            session_exists: true,
            pane_status: Some("alive".to_string()),
            pane_pid: Some(100),
            pane_command: Some("zsh".to_string()),
            output_hash: Some("abcd1234".to_string()),
            age_seconds: Some(60),
            ..Default::default()
        }
    }

    fn run(mode: SessionMode, signals: &Signals, prior: Option<&SessionStateRecord>) -> Classification {
        classify(&ClassifyInput {
            mode,
            signals,
            prior,
            thresholds: Thresholds::default(),
            waiting_requires_turn_complete: false,
        })
    }

    #[test]
    fn missing_session_is_not_found() {
        let result = run(SessionMode::Exec, &Signals::default(), None);
        assert_eq!(result.state, SessionState::NotFound);
        assert_eq!(result.next_action, "spawn");
    }

    #[test]
    fn exec_marker_decides_completion() {
        let mut signals = alive();
        signals.exec_marker_code = Some(0);
        let result = run(SessionMode::Exec, &signals, None);
        assert_eq!(result.state, SessionState::Completed);
        assert_eq!(result.exit_code, Some(0));

        signals.exec_marker_code = Some(7);
        signals.done_sentinel_code = Some(0);
        let result = run(SessionMode::Exec, &signals, None);
        assert_eq!(result.state, SessionState::Crashed);
        assert_eq!(result.exit_code, Some(7));
        assert_eq!(result.reason, "exec_done_marker_nonzero");
    }

    #[test]
    fn sentinel_precedence_is_done_then_hook() {
        let mut signals = alive();
        signals.hook_sentinel_code = Some(0);
        assert_eq!(run(SessionMode::Interactive, &signals, None).reason, "finish_hook");

        signals.done_sentinel_code = Some(3);
        let result = run(SessionMode::Interactive, &signals, None);
        assert_eq!(result.state, SessionState::Crashed);
        assert_eq!(result.reason, "done_sentinel_nonzero");
    }

    #[test]
    fn finished_verdicts_are_sticky() {
        let prior = SessionStateRecord {
            last_state: Some(SessionState::Crashed),
            last_reason: Some("exec_done_marker_nonzero".to_string()),
            exit_code: Some(7),
            ..Default::default()
        };
        for signals in [alive(), Signals::default()] {
            let result = run(SessionMode::Exec, &signals, Some(&prior));
            assert_eq!(result.state, SessionState::Crashed);
            assert_eq!(result.exit_code, Some(7));
        }
    }

    #[test]
    fn dead_pane_reports_its_exit_status() {
        let mut signals = alive();
        signals.pane_status = Some("dead".to_string());
        signals.pane_dead_status = Some(1);
        assert_eq!(run(SessionMode::Interactive, &signals, None).state, SessionState::Crashed);

        signals.pane_dead_status = Some(0);
        let result = run(SessionMode::Interactive, &signals, None);
        assert_eq!(result.state, SessionState::Completed);
        assert_eq!(result.reason, "pane_exited");
    }

    #[test]
    fn empty_or_young_panes_are_just_started() {
        let mut signals = alive();
        signals.output_empty = true;
        assert_eq!(run(SessionMode::Exec, &signals, None).state, SessionState::JustStarted);

        let mut signals = alive();
        signals.age_seconds = Some(1);
        signals.idle_seconds = 1;
        assert_eq!(run(SessionMode::Exec, &signals, None).reason, "grace_window");
    }

    #[test]
    fn activity_means_in_progress() {
        let mut signals = alive();
        signals.output_changed = true;
        signals.idle_seconds = 30;
        signals.input_box = true;
        assert_eq!(run(SessionMode::Interactive, &signals, None).state, SessionState::InProgress);

        let mut signals = alive();
        signals.idle_seconds = 30;
        signals.agent_pid = Some(101);
        signals.agent_cpu = Some(42.0);
        assert_eq!(run(SessionMode::Interactive, &signals, None).reason, "agent_cpu_active");
    }

    #[test]
    fn idle_prompt_is_waiting_input_only_past_the_threshold() {
        let mut signals = alive();
        signals.input_box = true;
        signals.waiting_for_input = true;
        signals.idle_seconds = 2;
        assert_eq!(run(SessionMode::Interactive, &signals, None).state, SessionState::InProgress);

        signals.idle_seconds = 5;
        let result = run(SessionMode::Interactive, &signals, None);
        assert_eq!(result.state, SessionState::WaitingInput);
        assert_eq!(result.next_action, "send_input");
    }

    #[test]
    fn idle_foreground_program_is_waiting_input() {
        let mut signals = alive();
        signals.pane_command = Some("cat".to_string());
        signals.idle_seconds = 5;
        assert_eq!(run(SessionMode::Interactive, &signals, None).reason, "foreground_idle");
    }

    #[test]
    fn any_silent_foreground_program_counts_unless_gated() {
        let mut signals = alive();
        signals.pane_command = Some("sleep".to_string());
        signals.idle_seconds = 5;
        let result = run(SessionMode::Interactive, &signals, None);
        assert_eq!(result.state, SessionState::WaitingInput);
        assert_eq!(result.reason, "foreground_idle");

        let gated = classify(&ClassifyInput {
            mode: SessionMode::Interactive,
            signals: &signals,
            prior: None,
            thresholds: Thresholds::default(),
            waiting_requires_turn_complete: true,
        });
        assert_eq!(gated.state, SessionState::InProgress);
        assert_eq!(gated.reason, "awaiting_turn_complete");

        signals.pane_command = Some("zsh".to_string());
        assert_eq!(
            run(SessionMode::Interactive, &signals, None).reason,
            "agent_exited_to_shell"
        );
    }

    #[test]
    fn turn_complete_gate_holds_back_waiting_input() {
        let mut signals = alive();
        signals.input_box = true;
        signals.idle_seconds = 10;
        let gated = |signals: &Signals| {
            classify(&ClassifyInput {
                mode: SessionMode::Interactive,
                signals,
                prior: None,
                thresholds: Thresholds::default(),
                waiting_requires_turn_complete: true,
            })
        };
        assert_eq!(gated(&signals).reason, "awaiting_turn_complete");
        signals.turn_complete = true;
        assert_eq!(gated(&signals).state, SessionState::WaitingInput);
    }

    #[test]
    fn shell_without_agent_is_degraded() {
        let mut signals = alive();
        signals.idle_seconds = 10;
        let result = run(SessionMode::Interactive, &signals, None);
        assert_eq!(result.state, SessionState::Degraded);
        assert_eq!(result.reason, "agent_exited_to_shell");
    }

    #[test]
    fn scan_errors_degrade_only_when_stuck() {
        let mut signals = alive();
        signals.agent_scan_error = Some("command timed out after 30s: ps".to_string());
        signals.idle_seconds = 10;
        assert_eq!(run(SessionMode::Exec, &signals, None).state, SessionState::InProgress);
        assert_eq!(run(SessionMode::Interactive, &signals, None).state, SessionState::InProgress);

        signals.idle_seconds = 500;
        assert_eq!(run(SessionMode::Exec, &signals, None).state, SessionState::Degraded);
        assert_eq!(run(SessionMode::Interactive, &signals, None).reason, "agent_scan_error_stuck");
    }

    #[test]
    fn idle_exec_waits_for_its_marker() {
        let mut signals = alive();
        signals.idle_seconds = 60;
        assert_eq!(run(SessionMode::Exec, &signals, None).reason, "exec_pending_marker");
    }
}
