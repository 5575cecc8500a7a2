//! Agent detection inside the pane's process subtree.

use std::path::Path;

use lisa_protocol::AgentKind;

use crate::process::{subtree, ProcessTable};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentScan {
    pub pid: Option<u32>,
    pub cpu: Option<f32>,
    pub error: Option<String>,
}

const SHELLS: &[&str] = &["sh", "bash", "zsh", "fish", "dash", "ksh", "tcsh", "csh", "nu"];

/// Login shells show up as `-zsh`.
pub fn is_shell(command: &str) -> bool {
    let name = basename(command.trim().trim_start_matches('-'));
    SHELLS.contains(&name)
}

fn basename(token: &str) -> &str {
    Path::new(token)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(token)
}

/// Matches `claude …` as well as interpreter launches like `node /…/claude …`.
pub fn matches_agent(command: &str, binary: &str) -> bool {
    command
        .split_whitespace()
        .take(2)
        .any(|token| basename(token) == binary)
}

/// Busiest matching process below `pane_pid`; table errors end up in `error`.
pub fn scan_agent(table: &dyn ProcessTable, pane_pid: u32, agent: AgentKind) -> AgentScan {
    let entries = match table.list() {
        Ok(entries) => entries,
        Err(error) => {
            return AgentScan {
                error: Some(error),
                ..Default::default()
            }
        }
    };

    subtree(&entries, pane_pid)
        .into_iter()
        .filter(|entry| matches_agent(&entry.command, agent.binary()))
        .max_by(|a, b| a.cpu.total_cmp(&b.cpu))
        .map(|entry| AgentScan {
            pid: Some(entry.pid),
            cpu: Some(entry.cpu),
            error: None,
        })
        .unwrap_or_default()
}
