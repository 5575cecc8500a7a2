//! Residue reaper: reclaims tmux sockets left by dead or detached servers.
//!
//! For every candidate socket:
//!
//! ```text
//! list-sessions ──unreachable──▶ remove socket file
//!       │
//!   reachable ──▶ list-clients ──clients > 0──▶ keep (active)
//!                      │
//!                 no clients ──▶ kill-server ──▶ re-probe ──unreachable──▶ remove
//! ```
//!
//! Dry runs only count what they would do.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs_err as fs;
use tracing::{info, warn};

use lisa_protocol::CleanupSummary;

use crate::process::current_uid;
#[cfg(not(target_os = "linux"))]
use crate::process::run_command;
use crate::storage::SOCKET_PREFIX;
use crate::tmux::{Multiplexer, TmuxError};

/// Basename prefix shared by every socket lisa creates.
const LISA_SOCKET_MARKER: &str = "lisa-";

/// Finds candidate sockets. Swapped for a fixed list in tests.
pub trait SocketDiscovery {
    fn candidates(&self) -> Vec<PathBuf>;
}

/// Globs the usual socket directories and scans the process table.
#[derive(Debug, Clone)]
pub struct SystemSocketDiscovery {
    pub include_tmux_default: bool,
    pub timeout: Duration,
}

impl SystemSocketDiscovery {
    pub fn new(include_tmux_default: bool, timeout: Duration) -> Self {
        Self {
            include_tmux_default,
            timeout,
        }
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![PathBuf::from("/tmp")];
        if let Some(tmpdir) = std::env::var_os("TMPDIR").map(PathBuf::from) {
            dirs.push(tmpdir);
        }
        if self.include_tmux_default {
            dirs.push(PathBuf::from(format!("/tmp/tmux-{}", current_uid())));
        }
        dirs
    }

    fn accepts(&self, path: &Path) -> bool {
        if is_lisa_socket_name(path) {
            return true;
        }
        self.include_tmux_default && is_tmux_default_socket(path)
    }
}

impl SocketDiscovery for SystemSocketDiscovery {
    fn candidates(&self) -> Vec<PathBuf> {
        let mut found = BTreeSet::new();
        for dir in self.search_dirs() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.filter_map(|entry| entry.ok()) {
                let path = entry.path();
                if is_socket(&path) && self.accepts(&path) {
                    found.insert(path);
                }
            }
        }
        for path in socket_paths_from_process_table(self.timeout) {
            if self.accepts(&path) {
                found.insert(path);
            }
        }
        found.into_iter().collect()
    }
}

fn is_socket(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_socket())
        .unwrap_or(false)
}

pub fn is_lisa_socket_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(LISA_SOCKET_MARKER) || name.starts_with(SOCKET_PREFIX))
        .unwrap_or(false)
}

fn is_tmux_default_socket(path: &Path) -> bool {
    path.parent()
        .and_then(|dir| dir.file_name())
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with("tmux-"))
        .unwrap_or(false)
}

/// `-S <path>` (or `-S<path>`) arguments of running tmux processes.
pub fn socket_paths_from_argv(argvs: &[Vec<String>]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for argv in argvs {
        let Some(program) = argv.first() else {
            continue;
        };
        let is_tmux = Path::new(program)
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name == "tmux" || name.starts_with("tmux:"))
            .unwrap_or(false);
        if !is_tmux {
            continue;
        }
        let mut args = argv.iter().skip(1);
        while let Some(arg) = args.next() {
            if arg == "-S" {
                if let Some(path) = args.next() {
                    paths.push(PathBuf::from(path));
                }
            } else if let Some(path) = arg.strip_prefix("-S").filter(|p| p.starts_with('/')) {
                paths.push(PathBuf::from(path));
            }
        }
    }
    paths
}

#[cfg(target_os = "linux")]
fn socket_paths_from_process_table(_timeout: Duration) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    let argvs: Vec<Vec<String>> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| name.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false)
        })
        .filter_map(|entry| std::fs::read(entry.path().join("cmdline")).ok())
        .map(|raw| {
            raw.split(|&byte| byte == 0)
                .filter(|arg| !arg.is_empty())
                .map(|arg| String::from_utf8_lossy(arg).to_string())
                .collect()
        })
        .collect();
    socket_paths_from_argv(&argvs)
}

#[cfg(not(target_os = "linux"))]
fn socket_paths_from_process_table(timeout: Duration) -> Vec<PathBuf> {
    match run_command("ps", ["axo", "command="], timeout) {
        Ok(output) if output.success() => {
            let argvs: Vec<Vec<String>> = output
                .stdout
                .lines()
                .map(|line| line.split_whitespace().map(str::to_string).collect())
                .collect();
            socket_paths_from_argv(&argvs)
        }
        Ok(output) => {
            warn!(stderr = %output.stderr.trim(), "ps failed during socket discovery");
            Vec::new()
        }
        Err(err) => {
            warn!(error = %err, "ps failed during socket discovery");
            Vec::new()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sweep
// ═══════════════════════════════════════════════════════════════════════════════

enum Probe {
    Unreachable,
    Reachable { clients: usize },
}

fn probe(mux: &dyn Multiplexer, socket: &Path) -> Result<Probe, String> {
    match mux.list_sessions(socket) {
        Err(TmuxError::Unreachable { .. }) => return Ok(Probe::Unreachable),
        Err(err) => return Err(format!("cleanup_probe_failed: {}: {}", socket.display(), err)),
        Ok(_) => {}
    }
    match mux.list_clients(socket) {
        Ok(clients) => Ok(Probe::Reachable {
            clients: clients.len(),
        }),
        Err(TmuxError::Unreachable { .. }) => Ok(Probe::Unreachable),
        Err(err) => Err(format!("cleanup_probe_failed: {}: {}", socket.display(), err)),
    }
}

fn remove_socket(socket: &Path) -> Result<(), String> {
    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(format!("{}: {}", socket.display(), err)),
    }
}

pub fn cleanup(
    mux: &dyn Multiplexer,
    discovery: &dyn SocketDiscovery,
    dry_run: bool,
) -> CleanupSummary {
    let candidates: BTreeSet<PathBuf> = discovery.candidates().into_iter().collect();
    let mut summary = CleanupSummary {
        dry_run,
        scanned: candidates.len(),
        ..Default::default()
    };

    for socket in &candidates {
        match probe(mux, socket) {
            Err(err) => summary.errors.push(err),
            Ok(Probe::Unreachable) if dry_run => summary.would_remove += 1,
            Ok(Probe::Unreachable) => match remove_socket(socket) {
                Ok(()) => {
                    info!(socket = %socket.display(), "Removed stale socket");
                    summary.removed += 1;
                }
                Err(err) => summary.errors.push(err),
            },
            Ok(Probe::Reachable { clients }) if clients > 0 => summary.kept_active += 1,
            Ok(Probe::Reachable { .. }) if dry_run => {
                summary.would_kill += 1;
                summary.would_remove += 1;
            }
            Ok(Probe::Reachable { .. }) => reap_detached(mux, socket, &mut summary),
        }
    }

    if !summary.errors.is_empty() {
        warn!(errors = summary.errors.len(), "Cleanup finished with socket errors");
    }
    summary
}

fn reap_detached(mux: &dyn Multiplexer, socket: &Path, summary: &mut CleanupSummary) {
    if let Err(err) = mux.kill_server(socket) {
        if !err.is_unreachable() {
            summary.errors.push(format!("{}: kill-server failed: {}", socket.display(), err));
            return;
        }
    }
    summary.killed += 1;
    info!(socket = %socket.display(), "Killed detached tmux server");

    match probe(mux, socket) {
        Ok(Probe::Unreachable) => match remove_socket(socket) {
            Ok(()) => summary.removed += 1,
            Err(err) => summary.errors.push(err),
        },
        Ok(Probe::Reachable { .. }) => summary
            .errors
            .push(format!("{}: still reachable after kill-server", socket.display())),
        Err(err) => summary.errors.push(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn tmux_socket_arguments_are_extracted() {
        let paths = socket_paths_from_argv(&[
            argv("/usr/bin/tmux -S /tmp/lisa-tmux-501-deadbeef.sock new-session -d"),
            argv("tmux -S/tmp/lisa-other.sock attach"),
            argv("vim -S /tmp/session.vim"),
            argv("tmux new-session"),
        ]);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/tmp/lisa-tmux-501-deadbeef.sock"),
                PathBuf::from("/tmp/lisa-other.sock"),
            ]
        );
    }

    #[test]
    fn only_lisa_names_are_candidates_by_default() {
        let discovery = SystemSocketDiscovery::new(false, Duration::from_secs(1));
        assert!(discovery.accepts(Path::new("/tmp/lisa-tmux-501-deadbeef.sock")));
        assert!(!discovery.accepts(Path::new("/tmp/tmux-501/default")));

        let discovery = SystemSocketDiscovery::new(true, Duration::from_secs(1));
        assert!(discovery.accepts(Path::new("/tmp/tmux-501/default")));
        assert!(!discovery.accepts(Path::new("/tmp/other.sock")));
    }
}
