//! Compiled regex patterns for scraping pane output.
//!
//! Compiled once on first use. Update these when the wrapper's marker format
//! or the agents' terminal UI changes.

use once_cell::sync::Lazy;
use regex::Regex;

pub const EXEC_DONE_PREFIX: &str = "__LISA_EXEC_DONE__";
pub const SESSION_DONE_PREFIX: &str = "__LISA_SESSION_DONE__";

// ═══════════════════════════════════════════════════════════════════════════════
// Completion Markers
// ═══════════════════════════════════════════════════════════════════════════════

/// `__LISA_EXEC_DONE__:<code>` alone on a line. The wrapper's own source text
/// (`…:%s`) never matches, so an echoed command line is not a false hit.
pub static RE_EXEC_DONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*__LISA_EXEC_DONE__:(-?\d+)\s*$").unwrap());

/// `__LISA_SESSION_DONE__:<runId>:<code>` alone on a line.
pub static RE_SESSION_DONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*__LISA_SESSION_DONE__:([0-9A-Za-z_-]+):(-?\d+)\s*$").unwrap());

// ═══════════════════════════════════════════════════════════════════════════════
// Terminal Noise
// ═══════════════════════════════════════════════════════════════════════════════

/// CSI / OSC escape sequences left in by `capture-pane -e`.
pub static RE_ANSI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(\x07|\x1b\\)|\x1b[@-Z\\-_]").unwrap()
});

/// Lines shells and login managers print before anything interesting happens.
pub static RE_STARTUP_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(last login:|the default interactive shell is now zsh|to update your account to use zsh|for more details, please visit https://support\.apple\.com|restored session:|saving session\.\.\.|bash: warning: setlocale|-bash: warning: setlocale|warning: setlocale)",
    )
    .unwrap()
});

// ═══════════════════════════════════════════════════════════════════════════════
// Prompt Detection
// ═══════════════════════════════════════════════════════════════════════════════

/// Input-box rows drawn with box characters, e.g. `│ > ` or `│ >  hello  │`.
pub static RE_INPUT_BOX_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[│┃|]\s*[>›❯]\s?(.*?)\s*[│┃|]?\s*$").unwrap());

/// Top or bottom border of an input box.
pub static RE_BOX_BORDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[╭╰┌└][─━]{8,}[╮╯┐┘]\s*$").unwrap());

/// Full-width horizontal rule some agent UIs draw above and below the input line.
pub static RE_HORIZONTAL_RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[─━]{8,}\s*$").unwrap());

/// Bare prompt line without a box, e.g. codex's `›` or a REPL `> `.
pub static RE_BARE_PROMPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[>›❯▌]\s*$").unwrap());

/// Assistant message bullets that precede a finished turn.
pub static RE_TURN_BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(⏺|●|•)\s+\S").unwrap());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_marker_requires_its_own_line() {
        assert!(RE_EXEC_DONE.is_match("__LISA_EXEC_DONE__:0"));
        assert!(RE_EXEC_DONE.is_match("  __LISA_EXEC_DONE__:7  "));
        assert!(!RE_EXEC_DONE.is_match("printf '__LISA_EXEC_DONE__:%s' \"$ec\""));
    }

    #[test]
    fn session_marker_extracts_run_id_and_code() {
        let caps = RE_SESSION_DONE
            .captures("__LISA_SESSION_DONE__:01HZX3:7")
            .expect("match");
        assert_eq!(&caps[1], "01HZX3");
        assert_eq!(&caps[2], "7");
    }

    #[test]
    fn ansi_sequences_are_matched() {
        let stripped = RE_ANSI.replace_all("\x1b[1;32mok\x1b[0m \x1b]0;title\x07done", "");
        assert_eq!(stripped, "ok done");
    }

    #[test]
    fn input_box_row_captures_content() {
        let caps = RE_INPUT_BOX_ROW.captures("│ > write tests   │").expect("match");
        assert_eq!(&caps[1], "write tests");
        let empty = RE_INPUT_BOX_ROW.captures("│ >                │").expect("match");
        assert_eq!(&empty[1], "");
    }
}
