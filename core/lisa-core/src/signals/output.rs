//! Pane output filtering, hashing and the idle clock.

use crate::patterns::{RE_ANSI, RE_STARTUP_NOISE};
use crate::session::SessionStateRecord;
use crate::storage::short_hash;

/// Strips escape sequences and trailing blank lines; drops shell/login
/// banners when `strip_noise` is set.
pub fn filter_output(raw: &str, strip_noise: bool) -> String {
    let mut lines: Vec<String> = raw
        .lines()
        .map(|line| RE_ANSI.replace_all(line, "").trim_end().to_string())
        .filter(|line| !(strip_noise && RE_STARTUP_NOISE.is_match(line.trim_start())))
        .collect();
    while lines.last().map(|line| line.is_empty()).unwrap_or(false) {
        lines.pop();
    }
    lines.join("\n")
}

pub fn hash_output(filtered: &str) -> String {
    short_hash(filtered)
}

/// When the pane last changed, and how long ago that was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleClock {
    pub changed: bool,
    pub last_change_at: i64,
    pub idle_seconds: u64,
}

/// Compares `hash` with the previous poll.
///
/// Without a previous hash the clock starts at `spawned_at` and the poll does
/// not count as a change, so a pane that has been quiet since spawn can still
/// reach the idle threshold on the first observation.
pub fn idle_clock(
    hash: &str,
    prior: Option<&SessionStateRecord>,
    spawned_at: i64,
    now: i64,
) -> IdleClock {
    let previous = prior.and_then(|state| state.last_hash.as_deref().map(|h| (h, state.last_change_at)));
    let (changed, last_change_at) = match previous {
        None => (false, spawned_at.min(now)),
        Some((previous_hash, last_change)) if previous_hash == hash => {
            (false, last_change.unwrap_or(spawned_at).min(now))
        }
        Some(_) => (true, now),
    };
    IdleClock {
        changed,
        last_change_at,
        idle_seconds: (now - last_change_at).max(0) as u64,
    }
}
