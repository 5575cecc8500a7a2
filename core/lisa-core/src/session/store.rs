//! Durable metadata and mutable state for one session.
//!
//! # Atomic Writes
//!
//! Every file is written to a uniquely named temp file in the same directory
//! and renamed into place, so a concurrent reader sees either the old or the
//! new content and concurrent writers never share a staging file. Files are
//! created `0600` and directories `0700`.
//!
//! # Defensive Loading
//!
//! State is rewritten on every poll; an empty or corrupt `state.json` loads
//! as a fresh record (logged) rather than failing the poll. Metadata is
//! authoritative, so a corrupt `meta.json` is an error.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use fs_err as fs;
use serde::Serialize;
use tracing::warn;

use crate::error::{LisaError, Result};
use crate::storage::SessionPaths;

use super::types::{SessionMeta, SessionStateRecord};

const FILE_MODE: u32 = 0o600;
const DIR_MODE: u32 = 0o700;
/// Staging files start with a dot so directory scans skip them.
const STAGING_PREFIX: &str = ".lisa-";

/// Creates `dir` and its parents, tightening the leaf to owner-only.
pub fn ensure_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|err| LisaError::io(format!("creating {}", dir.display()), err))?;
    fs::set_permissions(dir, std::fs::Permissions::from_mode(DIR_MODE))
        .map_err(|err| LisaError::io(format!("restricting {}", dir.display()), err))?;
    Ok(())
}

/// `<path>.tmp`, where the exec wrapper stages the done sentinel before its `mv`.
pub(crate) fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes `contents` to `path` through a uniquely named sibling temp file,
/// mode `0600`. Concurrent writers each persist their own temp file; the last
/// rename wins.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        LisaError::io(
            format!("writing {}", path.display()),
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent directory"),
        )
    })?;
    ensure_private_dir(parent)?;
    let context = || format!("writing {}", path.display());

    let mut temp = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|err| LisaError::io(context(), err))?;
    temp.as_file()
        .set_permissions(std::fs::Permissions::from_mode(FILE_MODE))
        .map_err(|err| LisaError::io(context(), err))?;
    temp.write_all(contents)
        .map_err(|err| LisaError::io(context(), err))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| LisaError::io(context(), err))?;

    temp.persist(path)
        .map_err(|err| LisaError::io(format!("replacing {}", path.display()), err.error))?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut content = serde_json::to_vec_pretty(value)
        .map_err(|err| LisaError::json(format!("serializing {}", path.display()), err))?;
    content.push(b'\n');
    atomic_write(path, &content)
}

pub fn save_meta(paths: &SessionPaths, meta: &SessionMeta) -> Result<()> {
    write_json(&paths.meta(), meta)
}

/// `Ok(None)` when the session was never spawned (or was killed).
pub fn load_meta(paths: &SessionPaths) -> Result<Option<SessionMeta>> {
    let path = paths.meta();
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(LisaError::io(format!("reading {}", path.display()), err)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|err| LisaError::json(format!("parsing {}", path.display()), err))
}

pub fn save_state(paths: &SessionPaths, state: &SessionStateRecord) -> Result<()> {
    write_json(&paths.state(), state)
}

/// Returns the stored record, or `None` if no poll has been persisted yet.
pub fn load_state(paths: &SessionPaths) -> Option<SessionStateRecord> {
    let path = paths.state();
    let content = fs::read_to_string(&path).ok()?;
    if content.trim().is_empty() {
        warn!(path = %path.display(), "Empty state file, starting fresh");
        return None;
    }
    match serde_json::from_str(&content) {
        Ok(state) => Some(state),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Corrupt state file, starting fresh");
            None
        }
    }
}

/// Removes metadata, state and sentinels. Returns what was removed.
///
/// The event log and output tail stay behind for post-mortems; the directory
/// itself is removed only when it ends up empty.
pub fn remove_session_files(paths: &SessionPaths) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for path in [
        paths.meta(),
        paths.state(),
        paths.done(),
        paths.hook(),
        tmp_sibling(&paths.done()),
    ] {
        match fs::remove_file(&path) {
            Ok(()) => removed.push(path.to_string_lossy().to_string()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(LisaError::io(format!("removing {}", path.display()), err));
            }
        }
    }
    // Non-empty directories are expected here.
    let _ = std::fs::remove_dir(paths.dir());
    Ok(removed)
}
