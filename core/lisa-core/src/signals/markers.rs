//! Completion markers on the pane and sentinel files on disk.

use std::path::Path;

use crate::patterns::{RE_EXEC_DONE, RE_SESSION_DONE};
use crate::session::read_sentinel;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerScan {
    /// First `__LISA_EXEC_DONE__` code in scan order.
    pub exec_code: Option<i32>,
    /// First `__LISA_SESSION_DONE__` code whose run id matches.
    pub session_code: Option<i32>,
    /// Marker lines as they appeared, first occurrence of each.
    pub hits: Vec<String>,
}

/// Scans `output` top to bottom. Session markers from another run are skipped.
pub fn scan_markers(output: &str, run_id: Option<&str>, recognise_session_marker: bool) -> MarkerScan {
    let mut scan = MarkerScan::default();
    for line in output.lines() {
        if let Some(caps) = RE_EXEC_DONE.captures(line) {
            if let Ok(code) = caps[1].parse() {
                scan.exec_code.get_or_insert(code);
                push_unique(&mut scan.hits, line.trim());
            }
            continue;
        }
        if !recognise_session_marker {
            continue;
        }
        if let Some(caps) = RE_SESSION_DONE.captures(line) {
            if run_id != Some(&caps[1]) {
                continue;
            }
            if let Ok(code) = caps[2].parse() {
                scan.session_code.get_or_insert(code);
                push_unique(&mut scan.hits, line.trim());
            }
        }
    }
    scan
}

fn push_unique(hits: &mut Vec<String>, line: &str) {
    if !hits.iter().any(|hit| hit == line) {
        hits.push(line.to_string());
    }
}

/// Outcome of reading one sentinel file against the expected run id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SentinelCheck {
    pub code: Option<i32>,
    /// Present but written by another run.
    pub ignored: bool,
}

pub fn check_sentinel(path: &Path, run_id: Option<&str>) -> SentinelCheck {
    match (read_sentinel(path), run_id) {
        (None, _) => SentinelCheck::default(),
        (Some(sentinel), Some(expected)) if sentinel.run_id == expected => SentinelCheck {
            code: Some(sentinel.exit_code),
            ignored: false,
        },
        (Some(_), _) => SentinelCheck {
            code: None,
            ignored: true,
        },
    }
}
