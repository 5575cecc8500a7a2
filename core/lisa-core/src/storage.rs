//! Storage layout and path derivation for lisa artifacts.
//!
//! All per-session files live under
//! `<state-dir>/<projectHash>/<sessionHash>/`, where both hashes are 8-hex
//! prefixes of an MD5 digest. The raw session name never becomes a path
//! segment, so names like `lisa/x/*` cannot escape their directory.
//!
//! ## Design Principles
//!
//! - **Single source of truth**: every artifact path is derived here
//! - **Testable**: [`StorageConfig::with_root`] points everything at a temp dir

use std::path::{Path, PathBuf};

use fs_err as fs;

use crate::config::LisaConfig;
use crate::error::{LisaError, Result};
use crate::process::current_uid;

const SOCKET_DIR: &str = "/tmp";
pub const SOCKET_PREFIX: &str = "lisa-tmux-";
pub const SOCKET_SUFFIX: &str = ".sock";

/// 8 hex digits of the MD5 of `value`.
pub fn short_hash(value: &str) -> String {
    let digest = format!("{:x}", md5::compute(value.as_bytes()));
    digest[..8].to_string()
}

/// Canonical absolute project root plus its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectIdentity {
    pub root: PathBuf,
    pub hash: String,
}

impl ProjectIdentity {
    /// Resolves symlinks and relative segments so that equivalent paths share a hash.
    pub fn resolve(path: &Path) -> Result<Self> {
        let root = fs::canonicalize(path).map_err(|err| LisaError::InvalidProjectRoot {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        if !root.is_dir() {
            return Err(LisaError::InvalidProjectRoot {
                path: path.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        let hash = short_hash(&root.to_string_lossy());
        Ok(Self { root, hash })
    }
}

/// Central configuration for artifact locations.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
    socket_override: Option<PathBuf>,
}

impl StorageConfig {
    /// `LISA_STATE_DIR`, else `$XDG_STATE_HOME/lisa`, else `~/.local/state/lisa`.
    pub fn from_config(config: &LisaConfig) -> Result<Self> {
        let root = match &config.state_dir {
            Some(dir) => dir.clone(),
            None => dirs::state_dir()
                .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("state")))
                .map(|dir| dir.join("lisa"))
                .ok_or_else(|| {
                    LisaError::StateDirUnavailable("home directory not found".to_string())
                })?,
        };
        Ok(Self {
            root,
            socket_override: config.tmux_socket.clone(),
        })
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            socket_override: None,
        }
    }

    pub fn with_socket_override(mut self, socket: Option<PathBuf>) -> Self {
        self.socket_override = socket;
        self
    }

    pub fn has_socket_override(&self) -> bool {
        self.socket_override.is_some()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn project_dir(&self, project_hash: &str) -> PathBuf {
        self.root.join(project_hash)
    }

    pub fn session_paths(&self, project_hash: &str, session: &str) -> SessionPaths {
        SessionPaths::new(self.project_dir(project_hash).join(short_hash(session)))
    }

    /// Socket for a project: the explicit override, else
    /// `/tmp/lisa-tmux-<uid>-<projectHash>.sock`.
    pub fn socket_path(&self, project_hash: &str) -> PathBuf {
        if let Some(socket) = &self.socket_override {
            return socket.clone();
        }
        derived_socket_path(project_hash)
    }

    /// Every project hash that has an artifact directory.
    pub fn known_project_hashes(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut hashes: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| is_short_hash(name))
            .collect();
        hashes.sort();
        hashes
    }

    /// Session directories under one project, in name order of their hash.
    pub fn session_dirs(&self, project_hash: &str) -> Vec<SessionPaths> {
        let Ok(entries) = fs::read_dir(self.project_dir(project_hash)) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(is_short_hash)
                    .unwrap_or(false)
            })
            .collect();
        dirs.sort();
        dirs.into_iter().map(SessionPaths::new).collect()
    }
}

pub fn derived_socket_path(project_hash: &str) -> PathBuf {
    PathBuf::from(SOCKET_DIR).join(format!(
        "{}{}-{}{}",
        SOCKET_PREFIX,
        current_uid(),
        project_hash,
        SOCKET_SUFFIX
    ))
}

fn is_short_hash(name: &str) -> bool {
    name.len() == 8 && name.chars().all(|c| c.is_ascii_hexdigit())
}

/// Artifact paths of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    dir: PathBuf,
}

impl SessionPaths {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn meta(&self) -> PathBuf {
        self.dir.join("meta.json")
    }

    pub fn state(&self) -> PathBuf {
        self.dir.join("state.json")
    }

    pub fn events(&self) -> PathBuf {
        self.dir.join("events.jsonl")
    }

    pub fn events_lock(&self) -> PathBuf {
        self.dir.join("events.lock")
    }

    pub fn done(&self) -> PathBuf {
        self.dir.join("done")
    }

    pub fn hook(&self) -> PathBuf {
        self.dir.join("hook")
    }

    pub fn output(&self) -> PathBuf {
        self.dir.join("out.txt")
    }
}
