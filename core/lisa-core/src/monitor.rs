//! Polling driver: classify until a predicate fires or the budget runs out.
//!
//! Per poll the predicates are checked in a fixed order:
//!
//! 1. `--until-marker` (substring of the raw pane)
//! 2. `--until-jsonpath` (against `{state, reason, poll, signals}`)
//! 3. `--until-state`
//! 4. `--stop-on-waiting` while `waiting_input`
//! 5. a terminal state (`not_found` only once the session has been seen)
//!
//! When the budget is exhausted the last classification is overlaid with
//! `timeout`.

use std::str::FromStr;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use lisa_protocol::{
    ExitReason, MonitorPayload, PollRecord, SessionState, Signals, EXIT_FAILURE,
    EXIT_MONITOR_FAILURE, EXIT_OK,
};

use crate::classifier::next_action;
use crate::error::{LisaError, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_POLLS: u64 = 120;

// ═══════════════════════════════════════════════════════════════════════════════
// Seams
// ═══════════════════════════════════════════════════════════════════════════════

/// Abstracts the pause between polls so tests run instantly.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RealSleeper;

impl Sleeper for RealSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Wall-clock source; tests drive it together with their [`Sleeper`].
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// One poll's classification plus what the predicates need beyond it.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub record: PollRecord,
    pub raw_output: String,
    pub exit_code: Option<i32>,
}

/// Collects, classifies and persists one poll of a single session.
pub trait SessionPoller {
    fn session(&self) -> &str;
    fn session_exists(&mut self) -> bool;
    fn poll(&mut self, index: u64) -> PollOutcome;
    /// Records the synthetic `timeout` verdict as the run's last event.
    fn record_timeout(&mut self, index: u64, reason: &str, signals: &Signals);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Predicates
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expectation {
    #[default]
    Any,
    Terminal,
    Marker,
}

impl FromStr for Expectation {
    type Err = LisaError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(Expectation::Any),
            "terminal" => Ok(Expectation::Terminal),
            "marker" => Ok(Expectation::Marker),
            _ => Err(LisaError::InvalidExpectation(value.to_string())),
        }
    }
}

impl Expectation {
    fn holds(&self, payload: &MonitorPayload) -> bool {
        match self {
            Expectation::Any => true,
            Expectation::Terminal => payload.final_state.is_terminal(),
            Expectation::Marker => payload.exit_reason == ExitReason::MarkerFound,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum JsonPathTest {
    Truthy,
    Equals(String),
    NotEquals(String),
}

/// `$.a.b`, `$.a.b==value` or `$.a.b!=value`. Numeric segments index arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPathPredicate {
    segments: Vec<String>,
    test: JsonPathTest,
}

impl FromStr for JsonPathPredicate {
    type Err = LisaError;

    fn from_str(expr: &str) -> Result<Self> {
        let invalid = || LisaError::InvalidJsonPath(expr.to_string());
        let trimmed = expr.trim();

        let (path, test) = if let Some((path, value)) = trimmed.split_once("!=") {
            (path, JsonPathTest::NotEquals(unquote(value)))
        } else if let Some((path, value)) = trimmed.split_once("==") {
            (path, JsonPathTest::Equals(unquote(value)))
        } else {
            (trimmed, JsonPathTest::Truthy)
        };

        let rest = path.trim().strip_prefix("$.").ok_or_else(invalid)?;
        let segments: Vec<String> = rest.split('.').map(|s| s.trim().to_string()).collect();
        if segments.iter().any(String::is_empty) {
            return Err(invalid());
        }
        Ok(Self { segments, test })
    }
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl JsonPathPredicate {
    fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(root, |node, segment| match node {
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => node.get(segment),
        })
    }

    pub fn matches(&self, root: &Value) -> bool {
        let found = self.resolve(root);
        match &self.test {
            JsonPathTest::Truthy => found.map(is_truthy).unwrap_or(false),
            JsonPathTest::Equals(expected) => found.map(|v| scalar_text(v) == *expected).unwrap_or(false),
            JsonPathTest::NotEquals(expected) => found.map(|v| scalar_text(v) != *expected).unwrap_or(true),
        }
    }

    /// The document a poll is matched against.
    pub fn document(record: &PollRecord) -> Value {
        serde_json::json!({
            "state": record.state,
            "reason": record.reason,
            "poll": record.poll,
            "signals": record.signals,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Loop
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub poll_interval: Duration,
    pub max_polls: u64,
    pub stop_on_waiting: bool,
    pub until_marker: Option<String>,
    pub until_state: Option<SessionState>,
    pub until_jsonpath: Option<JsonPathPredicate>,
    pub expect: Expectation,
    pub fail_not_found: bool,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
            stop_on_waiting: true,
            until_marker: None,
            until_state: None,
            until_jsonpath: None,
            expect: Expectation::Any,
            fail_not_found: false,
        }
    }
}

/// Exit code for a finished run, before expectations are applied.
pub fn exit_code_for(final_state: SessionState, reason: ExitReason) -> i32 {
    if matches!(final_state, SessionState::Crashed | SessionState::Timeout) {
        return EXIT_MONITOR_FAILURE;
    }
    match reason {
        ExitReason::Completed
        | ExitReason::WaitingInput
        | ExitReason::MarkerFound
        | ExitReason::StateMatched
        | ExitReason::JsonpathMatched => EXIT_OK,
        _ => EXIT_FAILURE,
    }
}

fn stop_reason(
    options: &MonitorOptions,
    outcome: &PollOutcome,
    session_seen: bool,
) -> Option<(ExitReason, Option<String>)> {
    let record = &outcome.record;

    if let Some(marker) = options.until_marker.as_deref() {
        if !marker.is_empty() && outcome.raw_output.contains(marker) {
            return Some((ExitReason::MarkerFound, Some(marker.to_string())));
        }
    }
    if let Some(predicate) = &options.until_jsonpath {
        if predicate.matches(&JsonPathPredicate::document(record)) {
            return Some((ExitReason::JsonpathMatched, None));
        }
    }
    if options.until_state == Some(record.state) {
        return Some((ExitReason::StateMatched, None));
    }
    if options.stop_on_waiting && record.state == SessionState::WaitingInput {
        return Some((ExitReason::WaitingInput, None));
    }
    match record.state {
        SessionState::Completed => Some((ExitReason::Completed, None)),
        SessionState::Crashed => Some((ExitReason::Crashed, None)),
        SessionState::NotFound if session_seen => Some((ExitReason::NotFound, None)),
        _ => None,
    }
}

fn payload(
    outcome: &PollOutcome,
    final_state: SessionState,
    exit_reason: ExitReason,
    polls: u64,
    matched_marker: Option<String>,
    expect: Expectation,
) -> MonitorPayload {
    let record = &outcome.record;
    let mut payload = MonitorPayload {
        session: record.session.clone(),
        final_state,
        exit_reason,
        exit_code: exit_code_for(final_state, exit_reason),
        polls,
        last_reason: record.reason.clone(),
        next_action: next_action(final_state).to_string(),
        agent_exit_code: outcome.exit_code,
        matched_marker,
        expectation_failed: false,
        signals: record.signals.clone(),
    };
    if !expect.holds(&payload) {
        payload.expectation_failed = true;
        if payload.exit_code != EXIT_MONITOR_FAILURE {
            payload.exit_code = EXIT_FAILURE;
        }
    }
    payload
}

/// Runs the loop. `on_poll` sees every record as it is produced.
pub fn run_monitor(
    poller: &mut dyn SessionPoller,
    options: &MonitorOptions,
    sleeper: &dyn Sleeper,
    on_poll: &mut dyn FnMut(&PollRecord),
) -> Result<MonitorPayload> {
    let existed_at_start = poller.session_exists();
    if !existed_at_start && options.fail_not_found {
        return Err(LisaError::SessionNotFound(poller.session().to_string()));
    }

    let max_polls = options.max_polls.max(1);
    let mut session_seen = existed_at_start;
    let mut last: Option<PollOutcome> = None;

    for index in 1..=max_polls {
        let outcome = poller.poll(index);
        on_poll(&outcome.record);
        session_seen |= outcome.record.signals.session_exists;

        if let Some((reason, marker)) = stop_reason(options, &outcome, session_seen) {
            tracing::info!(
                session = %outcome.record.session,
                state = %outcome.record.state,
                exit_reason = %reason,
                polls = index,
                "Monitor stopped"
            );
            return Ok(payload(&outcome, outcome.record.state, reason, index, marker, options.expect));
        }

        last = Some(outcome);
        if index < max_polls {
            sleeper.sleep(options.poll_interval);
        }
    }

    // At least one poll always runs.
    let Some(last) = last else {
        return Err(LisaError::SessionNotFound(poller.session().to_string()));
    };
    let reason = if last.record.state == SessionState::Degraded {
        ExitReason::DegradedMaxPollsExceeded
    } else {
        ExitReason::MaxPollsExceeded
    };
    poller.record_timeout(max_polls, reason.as_str(), &last.record.signals);
    tracing::info!(session = %last.record.session, exit_reason = %reason, "Monitor timed out");
    Ok(payload(&last, SessionState::Timeout, reason, max_polls, None, options.expect))
}
