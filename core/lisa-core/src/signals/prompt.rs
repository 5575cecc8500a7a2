//! Input-box and turn-complete detection for interactive agents.
//!
//! Heuristic by nature: the agents draw their prompt with box characters or
//! horizontal rules, and finished assistant turns start with a bullet. Only
//! the bottom of the pane is inspected for the prompt itself.

use crate::patterns::{RE_BARE_PROMPT, RE_BOX_BORDER, RE_HORIZONTAL_RULE, RE_INPUT_BOX_ROW, RE_TURN_BULLET};

/// How many trailing non-empty lines may hold the active prompt.
const PROMPT_WINDOW: usize = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromptSignals {
    pub input_box: bool,
    pub input_box_empty: bool,
    pub bare_prompt: bool,
    /// An assistant bullet precedes an empty input box.
    pub turn_complete: bool,
}

impl PromptSignals {
    pub fn waiting_for_input(&self) -> bool {
        self.input_box || self.bare_prompt
    }
}

fn placeholder_only(content: &str) -> bool {
    let content = content.trim();
    content.is_empty() || content.starts_with("Try \"")
}

/// Content of a `> …` line drawn between two horizontal rules.
fn ruled_prompt_content<'a>(lines: &[&'a str], index: usize) -> Option<&'a str> {
    let line = lines[index].trim_start();
    let content = line
        .strip_prefix('>')
        .or_else(|| line.strip_prefix('›'))
        .or_else(|| line.strip_prefix('❯'))?;
    let above = index.checked_sub(1).map(|i| lines[i])?;
    let below = lines.get(index + 1)?;
    (RE_HORIZONTAL_RULE.is_match(above) && RE_HORIZONTAL_RULE.is_match(below)).then_some(content)
}

pub fn detect_prompt(filtered: &str) -> PromptSignals {
    let lines: Vec<&str> = filtered.lines().filter(|line| !line.trim().is_empty()).collect();
    let window_start = lines.len().saturating_sub(PROMPT_WINDOW);

    let mut signals = PromptSignals::default();
    let mut box_row: Option<usize> = None;

    for index in (window_start..lines.len()).rev() {
        let line = lines[index];
        let boxed = RE_INPUT_BOX_ROW
            .captures(line)
            .filter(|_| {
                index
                    .checked_sub(1)
                    .map(|above| RE_BOX_BORDER.is_match(lines[above]))
                    .unwrap_or(false)
            })
            .map(|caps| caps.get(1).map(|m| m.as_str()).unwrap_or_default());
        if let Some(content) = boxed.or_else(|| ruled_prompt_content(&lines, index)) {
            signals.input_box = true;
            signals.input_box_empty = placeholder_only(content);
            box_row = Some(index);
            break;
        }
    }

    signals.bare_prompt = lines
        .last()
        .map(|line| RE_BARE_PROMPT.is_match(line))
        .unwrap_or(false);

    if let Some(row) = box_row {
        signals.turn_complete =
            signals.input_box_empty && lines[..row].iter().any(|line| RE_TURN_BULLET.is_match(line));
    }
    signals
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOXED_IDLE: &str = "\
⏺ Done. I added the tests and they pass.

╭──────────────────────────────────────────╮
│ >                                        │
╰──────────────────────────────────────────╯
  ? for shortcuts
";

    #[test]
    fn boxed_empty_prompt_after_bullet_is_turn_complete() {
        let signals = detect_prompt(BOXED_IDLE);
        assert!(signals.input_box);
        assert!(signals.input_box_empty);
        assert!(signals.turn_complete);
        assert!(signals.waiting_for_input());
    }

    #[test]
    fn typed_text_in_box_is_not_turn_complete() {
        let pane = BOXED_IDLE.replacen("│ > ", "│ > half typed ", 1);
        let signals = detect_prompt(&pane);
        assert!(signals.input_box);
        assert!(!signals.input_box_empty);
        assert!(!signals.turn_complete);
    }

    #[test]
    fn ruled_prompt_is_detected() {
        let pane = "● All set.\n────────────────────────\n> Try \"fix lint errors\"\n────────────────────────\n";
        let signals = detect_prompt(pane);
        assert!(signals.input_box);
        assert!(signals.turn_complete);
    }

    #[test]
    fn box_without_bullet_is_waiting_but_not_complete() {
        let pane = "Welcome!\n╭──────────────────╮\n│ >                │\n╰──────────────────╯\n";
        let signals = detect_prompt(pane);
        assert!(signals.input_box);
        assert!(!signals.turn_complete);
    }

    #[test]
    fn bare_prompt_and_plain_output() {
        assert!(detect_prompt("codex ready\n›\n").bare_prompt);
        let plain = detect_prompt("$ cargo build\n   Compiling lisa\n");
        assert_eq!(plain, PromptSignals::default());
        assert!(!plain.waiting_for_input());
    }
}
