//! Residue reaper behaviour against a fake tmux.

mod common;

use std::path::{Path, PathBuf};

use common::{FakeMux, FakePane};
use lisa_core::reaper::{cleanup, SocketDiscovery};
use tempfile::TempDir;

struct FixedSockets(Vec<PathBuf>);

impl SocketDiscovery for FixedSockets {
    fn candidates(&self) -> Vec<PathBuf> {
        self.0.clone()
    }
}

struct Residue {
    _dir: TempDir,
    stale: PathBuf,
    detached: PathBuf,
    attached: PathBuf,
    mux: FakeMux,
}

fn touch(path: &Path) {
    std::fs::write(path, b"").unwrap();
}

/// One dead socket, one detached server and one server with a client.
fn residue() -> Residue {
    let dir = TempDir::new().unwrap();
    let stale = dir.path().join("lisa-tmux-0-aaaaaaaa.sock");
    let detached = dir.path().join("lisa-tmux-0-bbbbbbbb.sock");
    let attached = dir.path().join("lisa-tmux-0-cccccccc.sock");
    for socket in [&stale, &detached, &attached] {
        touch(socket);
    }

    let mux = FakeMux::default();
    mux.add_pane(&detached, "lisa-old", FakePane::default());
    mux.add_pane(&attached, "lisa-live", FakePane::default());
    mux.set_clients(&attached, 1);

    Residue {
        _dir: dir,
        stale,
        detached,
        attached,
        mux,
    }
}

#[test]
fn test_cleanup_reaps_stale_and_detached_servers() {
    let residue = residue();
    let discovery = FixedSockets(vec![
        residue.stale.clone(),
        residue.detached.clone(),
        residue.attached.clone(),
    ]);

    let summary = cleanup(&residue.mux, &discovery, false);
    assert!(!summary.dry_run);
    assert_eq!(summary.scanned, 3);
    assert_eq!(summary.removed, 2);
    assert_eq!(summary.killed, 1);
    assert_eq!(summary.kept_active, 1);
    assert!(summary.errors.is_empty(), "{:?}", summary.errors);

    assert!(!residue.stale.exists());
    assert!(!residue.detached.exists());
    assert!(residue.attached.exists());
    assert_eq!(*residue.mux.killed_servers.lock().unwrap(), vec![residue.detached.clone()]);
}

#[test]
fn test_dry_run_only_counts() {
    let residue = residue();
    let discovery = FixedSockets(vec![
        residue.stale.clone(),
        residue.detached.clone(),
        residue.attached.clone(),
    ]);

    let summary = cleanup(&residue.mux, &discovery, true);
    assert!(summary.dry_run);
    assert_eq!(summary.scanned, 3);
    assert_eq!(summary.would_remove, 2);
    assert_eq!(summary.would_kill, 1);
    assert_eq!(summary.kept_active, 1);
    assert_eq!(summary.removed, 0);
    assert_eq!(summary.killed, 0);

    for socket in [&residue.stale, &residue.detached, &residue.attached] {
        assert!(socket.exists());
    }
    assert!(residue.mux.killed_servers.lock().unwrap().is_empty());
}

#[test]
fn test_probe_failures_are_reported_and_skipped() {
    let residue = residue();
    residue.mux.broken.lock().unwrap().insert(residue.detached.clone());
    let discovery = FixedSockets(vec![residue.stale.clone(), residue.detached.clone()]);

    let summary = cleanup(&residue.mux, &discovery, false);
    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.killed, 0);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].starts_with("cleanup_probe_failed"));
    assert!(residue.detached.exists());
}

#[test]
fn test_duplicate_candidates_are_scanned_once() {
    let residue = residue();
    let discovery = FixedSockets(vec![residue.stale.clone(), residue.stale.clone()]);

    let summary = cleanup(&residue.mux, &discovery, true);
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.would_remove, 1);
}
