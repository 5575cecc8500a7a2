//! Done/hook sentinels and the saved output tail.
//!
//! Sentinels hold `"<runId>:<exitCode>\n"`. The exec wrapper and the finish
//! hook write them through a tmp + rename so a reader never sees half a line.

use std::path::{Path, PathBuf};

use fs_err as fs;

use crate::error::Result;
use crate::patterns::RE_ANSI;
use crate::storage::SessionPaths;

use super::store::atomic_write;

/// Lines kept by [`write_output_file`].
pub const OUTPUT_TAIL_LINES: usize = 260;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel {
    pub run_id: String,
    pub exit_code: i32,
}

impl Sentinel {
    pub fn parse(content: &str) -> Option<Self> {
        let (run_id, code) = content.trim().rsplit_once(':')?;
        let run_id = run_id.trim();
        if run_id.is_empty() {
            return None;
        }
        Some(Self {
            run_id: run_id.to_string(),
            exit_code: code.trim().parse().ok()?,
        })
    }

    pub fn render(&self) -> String {
        format!("{}:{}\n", self.run_id, self.exit_code)
    }
}

/// `None` when the file is absent or unparseable.
pub fn read_sentinel(path: &Path) -> Option<Sentinel> {
    fs::read_to_string(path)
        .ok()
        .and_then(|content| Sentinel::parse(&content))
}

pub fn write_sentinel(path: &Path, sentinel: &Sentinel) -> Result<()> {
    atomic_write(path, sentinel.render().as_bytes())
}

/// Last [`OUTPUT_TAIL_LINES`] non-empty lines of `output`, escapes stripped.
pub fn output_tail(output: &str, max_lines: usize) -> Vec<String> {
    let lines: Vec<String> = output
        .lines()
        .map(|line| RE_ANSI.replace_all(line, "").trim_end().to_string())
        .filter(|line| !line.trim().is_empty())
        .collect();
    let skip = lines.len().saturating_sub(max_lines);
    lines.into_iter().skip(skip).collect()
}

/// Saves the pane tail to `out.txt` and returns its path.
pub fn write_output_file(paths: &SessionPaths, output: &str) -> Result<PathBuf> {
    let mut content = output_tail(output, OUTPUT_TAIL_LINES).join("\n");
    content.push('\n');
    let path = paths.output();
    atomic_write(&path, content.as_bytes())?;
    Ok(path)
}
