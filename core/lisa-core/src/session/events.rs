//! Append-only, bounded `events.jsonl`.
//!
//! Appenders serialize on an advisory `fs2` lock over `events.lock` and write
//! each line with a single `write_all` on an `O_APPEND` handle. When the log
//! exceeds either cap the tail that fits both is rewritten through
//! temp + rename, still under the lock.
//!
//! Readers take no lock. They tolerate a torn or foreign line by dropping it
//! and counting it in `dropped_lines`.

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;

use chrono::{SecondsFormat, Utc};
use fs2::FileExt;
use fs_err as fs;
use tracing::debug;

use lisa_protocol::{EventRecord, EventType, SessionState, Signals};

use crate::config::EventLogLimits;
use crate::error::{LisaError, Result};
use crate::storage::SessionPaths;

use super::store::{atomic_write, ensure_private_dir};

/// Most-recent valid events plus the count of unparseable lines skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTail {
    pub events: Vec<EventRecord>,
    pub dropped_lines: usize,
}

/// RFC 3339 with nanoseconds, UTC.
pub fn event_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn new_event(
    event_type: EventType,
    session: &str,
    state: Option<SessionState>,
    status: &str,
    reason: &str,
    poll: u64,
    signals: Signals,
) -> EventRecord {
    EventRecord {
        at: event_timestamp(),
        event_type,
        session: session.to_string(),
        state,
        status: status.to_string(),
        reason: reason.to_string(),
        poll,
        signals,
    }
}

pub fn append_event(paths: &SessionPaths, record: &EventRecord, limits: EventLogLimits) -> Result<()> {
    ensure_private_dir(paths.dir())?;

    let mut line = serde_json::to_vec(record)
        .map_err(|err| LisaError::json("serializing event", err))?;
    line.push(b'\n');

    let lock_path = paths.events_lock();
    let lock = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(&lock_path)
        .map_err(|err| LisaError::io(format!("opening {}", lock_path.display()), err))?;
    FileExt::lock_exclusive(&lock)
        .map_err(|err| LisaError::io(format!("locking {}", lock_path.display()), err))?;

    let events_path = paths.events();
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .mode(0o600)
            .open(&events_path)
            .map_err(|err| LisaError::io(format!("opening {}", events_path.display()), err))?;
        file.write_all(&line)
            .map_err(|err| LisaError::io(format!("appending to {}", events_path.display()), err))?;
        file.sync_data()
            .map_err(|err| LisaError::io(format!("syncing {}", events_path.display()), err))?;
    }

    let result = trim_to_limits(paths, limits);
    // Lock is released when `lock` drops.
    drop(lock);
    result
}

fn trim_to_limits(paths: &SessionPaths, limits: EventLogLimits) -> Result<()> {
    let events_path = paths.events();
    let content = fs::read(&events_path)
        .map_err(|err| LisaError::io(format!("reading {}", events_path.display()), err))?;
    let line_count = content.iter().filter(|&&byte| byte == b'\n').count();
    if content.len() as u64 <= limits.max_bytes && line_count <= limits.max_lines {
        return Ok(());
    }

    let kept = tail_within_limits(&content, limits);
    debug!(
        path = %events_path.display(),
        before = content.len(),
        after = kept.len(),
        "Trimming event log"
    );
    atomic_write(&events_path, kept)
}

/// Largest suffix of whole lines that fits both caps.
fn tail_within_limits(content: &[u8], limits: EventLogLimits) -> &[u8] {
    let body = content.strip_suffix(b"\n").unwrap_or(content);
    let mut start = content.len();
    let mut lines = 0usize;

    for (index, _) in body.iter().enumerate().rev().filter(|&(_, &byte)| byte == b'\n') {
        let candidate = index + 1;
        if lines + 1 > limits.max_lines || (content.len() - candidate) as u64 > limits.max_bytes {
            return &content[start..];
        }
        start = candidate;
        lines += 1;
    }

    // The first line of the file is the only one left to consider.
    if lines < limits.max_lines && content.len() as u64 <= limits.max_bytes {
        start = 0;
    }
    &content[start..]
}

/// Up to `limit` most-recent events, oldest first.
pub fn read_events_tail(paths: &SessionPaths, limit: usize) -> Result<EventTail> {
    let events_path = paths.events();
    let content = match fs::read_to_string(&events_path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(EventTail::default()),
        Err(err) => {
            return Err(LisaError::io(format!("reading {}", events_path.display()), err));
        }
    };

    let mut tail = EventTail::default();
    for line in content.lines().filter(|line| !line.trim().is_empty()) {
        match serde_json::from_str::<EventRecord>(line) {
            Ok(event) => tail.events.push(event),
            Err(_) => tail.dropped_lines += 1,
        }
    }
    if tail.events.len() > limit {
        tail.events.drain(..tail.events.len() - limit);
    }
    Ok(tail)
}
