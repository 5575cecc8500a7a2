//! Runtime configuration read from `LISA_*` environment variables.
//!
//! Every knob has a safe default; malformed values are logged and ignored.
//! Tests build a [`LisaConfig`] directly or through [`LisaConfig::from_lookup`].

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const ENV_STATE_DIR: &str = "LISA_STATE_DIR";
pub const ENV_TMUX_SOCKET: &str = "LISA_TMUX_SOCKET";
pub const ENV_CMD_TIMEOUT: &str = "LISA_CMD_TIMEOUT_SECONDS";
pub const ENV_EVENTS_MAX_BYTES: &str = "LISA_EVENTS_MAX_BYTES";
pub const ENV_EVENTS_MAX_LINES: &str = "LISA_EVENTS_MAX_LINES";
pub const ENV_GRACE: &str = "LISA_GRACE_SECONDS";
pub const ENV_IDLE_THRESHOLD: &str = "LISA_IDLE_THRESHOLD_SECONDS";
pub const ENV_STUCK_THRESHOLD: &str = "LISA_STUCK_THRESHOLD_SECONDS";
pub const ENV_CPU_ACTIVE: &str = "LISA_CPU_ACTIVE_THRESHOLD";
pub const ENV_CAPTURE_LINES: &str = "LISA_CAPTURE_LINES";

// Injected into every pane at spawn.
pub const ENV_MODE: &str = "LISA_MODE";
pub const ENV_AGENT: &str = "LISA_AGENT";
pub const ENV_PROJECT_HASH: &str = "LISA_PROJECT_HASH";
pub const ENV_RUN_ID: &str = "LISA_RUN_ID";
pub const ENV_DONE_FILE: &str = "LISA_DONE_FILE";
pub const ENV_SESSION: &str = "LISA_SESSION";

pub const DEFAULT_CMD_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_EVENTS_MAX_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_EVENTS_MAX_LINES: usize = 2000;
pub const DEFAULT_GRACE_SECS: u64 = 3;
pub const DEFAULT_IDLE_THRESHOLD_SECS: u64 = 4;
pub const DEFAULT_STUCK_THRESHOLD_SECS: u64 = 180;
pub const DEFAULT_CPU_ACTIVE_THRESHOLD: f32 = 5.0;
pub const DEFAULT_CAPTURE_LINES: usize = 200;

/// Caps applied to `events.jsonl` after every append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLogLimits {
    pub max_bytes: u64,
    pub max_lines: usize,
}

impl Default for EventLogLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_EVENTS_MAX_BYTES,
            max_lines: DEFAULT_EVENTS_MAX_LINES,
        }
    }
}

/// Windows the classifier uses to tell busy, idle and stuck apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub grace_secs: u64,
    pub idle_secs: u64,
    pub stuck_secs: u64,
    pub cpu_active: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            grace_secs: DEFAULT_GRACE_SECS,
            idle_secs: DEFAULT_IDLE_THRESHOLD_SECS,
            stuck_secs: DEFAULT_STUCK_THRESHOLD_SECS,
            cpu_active: DEFAULT_CPU_ACTIVE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LisaConfig {
    pub state_dir: Option<PathBuf>,
    pub tmux_socket: Option<PathBuf>,
    pub command_timeout: Duration,
    pub events: EventLogLimits,
    pub thresholds: Thresholds,
    pub capture_lines: usize,
}

impl Default for LisaConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            tmux_socket: None,
            command_timeout: Duration::from_secs(DEFAULT_CMD_TIMEOUT_SECS),
            events: EventLogLimits::default(),
            thresholds: Thresholds::default(),
            capture_lines: DEFAULT_CAPTURE_LINES,
        }
    }
}

impl LisaConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            state_dir: non_empty(ENV_STATE_DIR).map(PathBuf::from),
            tmux_socket: non_empty(ENV_TMUX_SOCKET).map(PathBuf::from),
            command_timeout: Duration::from_secs(parse_positive(
                &lookup,
                ENV_CMD_TIMEOUT,
                DEFAULT_CMD_TIMEOUT_SECS,
            )),
            events: EventLogLimits {
                max_bytes: parse_positive(&lookup, ENV_EVENTS_MAX_BYTES, defaults.events.max_bytes),
                max_lines: parse_positive(&lookup, ENV_EVENTS_MAX_LINES, defaults.events.max_lines),
            },
            thresholds: Thresholds {
                grace_secs: parse_or(&lookup, ENV_GRACE, defaults.thresholds.grace_secs),
                idle_secs: parse_or(&lookup, ENV_IDLE_THRESHOLD, defaults.thresholds.idle_secs),
                stuck_secs: parse_or(&lookup, ENV_STUCK_THRESHOLD, defaults.thresholds.stuck_secs),
                cpu_active: parse_or(&lookup, ENV_CPU_ACTIVE, defaults.thresholds.cpu_active),
            },
            capture_lines: parse_positive(&lookup, ENV_CAPTURE_LINES, defaults.capture_lines),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy,
{
    match lookup(key) {
        None => default,
        Some(raw) if raw.trim().is_empty() => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Ignoring malformed environment value");
                default
            }
        },
    }
}

fn parse_positive<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + PartialOrd + Default,
{
    let value = parse_or(lookup, key, default);
    if value > T::default() {
        value
    } else {
        warn!(key, "Ignoring non-positive environment value");
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = LisaConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.events, EventLogLimits::default());
        assert_eq!(config.thresholds, Thresholds::default());
        assert!(config.tmux_socket.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = LisaConfig::from_lookup(lookup_from(&[
            (ENV_CMD_TIMEOUT, "5"),
            (ENV_EVENTS_MAX_BYTES, "4096"),
            (ENV_EVENTS_MAX_LINES, "10"),
            (ENV_TMUX_SOCKET, "/tmp/lisa-custom.sock"),
            (ENV_CPU_ACTIVE, "12.5"),
        ]));
        assert_eq!(config.command_timeout, Duration::from_secs(5));
        assert_eq!(config.events.max_bytes, 4096);
        assert_eq!(config.events.max_lines, 10);
        assert_eq!(
            config.tmux_socket,
            Some(PathBuf::from("/tmp/lisa-custom.sock"))
        );
        assert_eq!(config.thresholds.cpu_active, 12.5);
    }

    #[test]
    fn malformed_and_zero_values_fall_back() {
        let config = LisaConfig::from_lookup(lookup_from(&[
            (ENV_CMD_TIMEOUT, "soon"),
            (ENV_EVENTS_MAX_LINES, "0"),
        ]));
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.events.max_lines, DEFAULT_EVENTS_MAX_LINES);
    }
}
