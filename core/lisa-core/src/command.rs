//! Agent start-command assembly and the exec wrapper.
//!
//! The only shell quoting lisa performs is [`quote`]: wrap in single quotes
//! and turn every `'` into `'"'"'`.
//!
//! ## Exec Wrapper
//!
//! Exec-mode commands are wrapped so the pane always ends with
//! `__LISA_EXEC_DONE__:<code>` on its own line, followed by
//! `__LISA_SESSION_DONE__:<runId>:<code>`, and the done sentinel is written
//! when `LISA_DONE_FILE` is set. The caller's `errexit` setting is saved and
//! restored around the command.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use lisa_protocol::{AgentKind, NestingReport, SessionMode};

use crate::error::{LisaError, Result};
use crate::patterns::EXEC_DONE_PREFIX;

pub const SKIP_PERMISSIONS_FLAG: &str = "--dangerously-skip-permissions";
pub const FULL_AUTO_FLAG: &str = "--full-auto";
pub const BYPASS_SANDBOX_FLAG: &str = "--dangerously-bypass-approvals-and-sandbox";

/// Short model names accepted in place of the canonical identifier.
const MODEL_ALIASES: &[(&str, &str)] = &[("codex-spark", "gpt-5.3-codex-spark")];

/// Substrings that suggest the agent will itself drive nested lisa sessions.
const NESTING_HINTS: &[&str] = &[
    "lisa session spawn",
    "lisa session monitor",
    "lisa session send",
    "lisa spawn",
    "nested lisa",
    "nested session",
    "child session",
    "spawn a sub-agent",
];

static RE_MODEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:/-]*$").unwrap());

// ═══════════════════════════════════════════════════════════════════════════════
// Policies
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NestedPolicy {
    /// Follow `NestingIntent`, falling back to the prompt heuristic.
    #[default]
    Auto,
    Force,
    Off,
}

impl FromStr for NestedPolicy {
    type Err = LisaError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(NestedPolicy::Auto),
            "force" => Ok(NestedPolicy::Force),
            "off" => Ok(NestedPolicy::Off),
            _ => Err(LisaError::InvalidNestedPolicy(value.to_string())),
        }
    }
}

impl fmt::Display for NestedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NestedPolicy::Auto => "auto",
            NestedPolicy::Force => "force",
            NestedPolicy::Off => "off",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NestingIntent {
    #[default]
    Auto,
    Nested,
    Flat,
}

impl FromStr for NestingIntent {
    type Err = LisaError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(NestingIntent::Auto),
            "nested" => Ok(NestingIntent::Nested),
            "flat" => Ok(NestingIntent::Flat),
            _ => Err(LisaError::InvalidNestingIntent(value.to_string())),
        }
    }
}

impl fmt::Display for NestingIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NestingIntent::Auto => "auto",
            NestingIntent::Nested => "nested",
            NestingIntent::Flat => "flat",
        })
    }
}

pub fn parse_agent(value: &str) -> Result<AgentKind> {
    match value.trim().to_ascii_lowercase().as_str() {
        "claude" => Ok(AgentKind::Claude),
        "codex" => Ok(AgentKind::Codex),
        _ => Err(LisaError::InvalidAgent(value.to_string())),
    }
}

pub fn parse_mode(value: &str) -> Result<SessionMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "interactive" => Ok(SessionMode::Interactive),
        "exec" => Ok(SessionMode::Exec),
        _ => Err(LisaError::InvalidMode(value.to_string())),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Quoting & Wrapping
// ═══════════════════════════════════════════════════════════════════════════════

pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

/// Wraps `command` so its exit code is observable on the pane. Idempotent.
pub fn wrap_exec(command: &str) -> String {
    if command.contains(EXEC_DONE_PREFIX) {
        return command.to_string();
    }
    format!(
        concat!(
            "__lisa_errexit=0; case $- in *e*) __lisa_errexit=1;; esac; set +e; ",
            "{cmd}; __lisa_ec=$?; ",
            r#"printf '\n{prefix}:%s\n' "$__lisa_ec"; "#,
            r#"printf '__LISA_SESSION_DONE__:%s:%s\n' "$LISA_RUN_ID" "$__lisa_ec"; "#,
            r#"if [ -n "$LISA_DONE_FILE" ]; then printf '%s:%s\n' "$LISA_RUN_ID" "$__lisa_ec" > "$LISA_DONE_FILE.tmp" && mv "$LISA_DONE_FILE.tmp" "$LISA_DONE_FILE"; fi; "#,
            r#"[ "$__lisa_errexit" = 1 ] && set -e"#
        ),
        cmd = command,
        prefix = EXEC_DONE_PREFIX,
    )
}

/// Drops quoted spans so hints inside literals never count.
///
/// Quotes are word-bounded on both sides: a span opens at a quote not preceded
/// by an alphanumeric and closes at the first matching quote not followed by
/// one, so apostrophes inside words ("don't", "user's") neither open nor close
/// a span. A quote with no valid closer is kept as plain text.
fn strip_quoted_spans(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let is_word = |index: usize| chars.get(index).map(|c| c.is_alphanumeric()).unwrap_or(false);
    let mut result = String::with_capacity(text.len());
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        let opens = (ch == '\'' || ch == '"') && (index == 0 || !is_word(index - 1));
        let closer = if opens {
            (index + 1..chars.len()).find(|&end| chars[end] == ch && !is_word(end + 1))
        } else {
            None
        };
        match closer {
            Some(end) => index = end + 1,
            None => {
                result.push(ch);
                index += 1;
            }
        }
    }
    result
}

/// True when the prompt, outside quoted literals, mentions nested lisa use.
pub fn prompt_mentions_nesting(prompt: &str) -> bool {
    let visible = strip_quoted_spans(prompt).to_lowercase();
    let visible = visible.split_whitespace().collect::<Vec<_>>().join(" ");
    NESTING_HINTS.iter().any(|hint| visible.contains(hint))
}

pub fn normalize_model(model: &str) -> Result<String> {
    let trimmed = model.trim();
    if !RE_MODEL.is_match(trimmed) {
        return Err(LisaError::InvalidModel(model.to_string()));
    }
    Ok(MODEL_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(trimmed))
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| trimmed.to_string()))
}

fn args_set_model(agent_args: &str) -> bool {
    agent_args
        .split_whitespace()
        .any(|token| token == "--model" || token.starts_with("--model=") || token == "-m")
}

// ═══════════════════════════════════════════════════════════════════════════════
// Assembly
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub agent: AgentKind,
    pub mode: SessionMode,
    pub prompt: Option<String>,
    /// Replaces the agent invocation entirely.
    pub raw_command: Option<String>,
    pub agent_args: Option<String>,
    pub model: Option<String>,
    pub skip_permissions: bool,
    pub nested_policy: NestedPolicy,
    pub nesting_intent: NestingIntent,
    /// Run the heuristic for the report even when it cannot change the command.
    pub detect_nested: bool,
    /// `LISA_SESSION` of the enclosing pane, if any.
    pub parent_session: Option<String>,
}

impl CommandRequest {
    pub fn new(agent: AgentKind, mode: SessionMode) -> Self {
        Self {
            agent,
            mode,
            prompt: None,
            raw_command: None,
            agent_args: None,
            model: None,
            skip_permissions: true,
            nested_policy: NestedPolicy::Auto,
            nesting_intent: NestingIntent::Auto,
            detect_nested: false,
            parent_session: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssembledCommand {
    pub command: String,
    pub nesting: NestingReport,
    /// `--model` was given but had nothing to apply to.
    pub model_ignored: bool,
}

fn resolve_nesting(request: &CommandRequest) -> NestingReport {
    let prompt = request.prompt.as_deref().unwrap_or_default();
    let heuristic = || prompt_mentions_nesting(prompt);

    let (bypass, reason) = match (request.nested_policy, request.nesting_intent) {
        (NestedPolicy::Off, _) => (false, "policy_off"),
        (NestedPolicy::Force, _) => (true, "policy_force"),
        (NestedPolicy::Auto, NestingIntent::Nested) => (true, "intent_nested"),
        (NestedPolicy::Auto, NestingIntent::Flat) => (false, "intent_flat"),
        (NestedPolicy::Auto, NestingIntent::Auto) if heuristic() => (true, "prompt_hint"),
        (NestedPolicy::Auto, NestingIntent::Auto) => (false, "no_hint"),
    };

    let detected = match (request.nested_policy, request.nesting_intent) {
        (NestedPolicy::Auto, NestingIntent::Auto) => bypass,
        _ if request.detect_nested => heuristic(),
        _ => false,
    };

    NestingReport {
        detected,
        parent_session: request.parent_session.clone(),
        bypass,
        reason: reason.to_string(),
    }
}

/// Builds the pane start command for `request`.
pub fn assemble(request: &CommandRequest) -> Result<AssembledCommand> {
    let nesting = resolve_nesting(request);

    if let Some(raw) = request.raw_command.as_deref().map(str::trim) {
        if raw.is_empty() {
            return Err(LisaError::MissingRequiredFlag("--command".to_string()));
        }
        let model_ignored = request.model.is_some();
        if model_ignored {
            tracing::warn!("Ignoring --model because --command replaces the agent invocation");
        }
        let command = match request.mode {
            SessionMode::Exec => wrap_exec(raw),
            SessionMode::Interactive => raw.to_string(),
        };
        return Ok(AssembledCommand {
            command,
            nesting,
            model_ignored,
        });
    }

    let agent_args = request
        .agent_args
        .as_deref()
        .map(str::trim)
        .filter(|args| !args.is_empty());
    let prompt = request.prompt.as_deref().filter(|p| !p.trim().is_empty());

    let model = match (&request.model, request.agent) {
        (Some(model), AgentKind::Codex) => {
            if agent_args.map(args_set_model).unwrap_or(false) {
                return Err(LisaError::InvalidModelConfiguration(
                    "--model conflicts with a --model inside --agent-args".to_string(),
                ));
            }
            Some(normalize_model(model)?)
        }
        _ => None,
    };
    let model_ignored = request.model.is_some() && model.is_none();
    if model_ignored {
        tracing::warn!(agent = %request.agent, "Ignoring --model for an agent without model selection");
    }

    let mut parts: Vec<String> = vec![request.agent.binary().to_string()];
    match (request.agent, request.mode) {
        (AgentKind::Claude, SessionMode::Interactive) => {
            parts.extend(agent_args.map(str::to_string));
            if request.skip_permissions {
                parts.push(SKIP_PERMISSIONS_FLAG.to_string());
            }
            parts.extend(prompt.map(quote));
        }
        (AgentKind::Claude, SessionMode::Exec) => {
            let prompt = prompt.ok_or_else(|| LisaError::MissingRequiredFlag("--prompt".to_string()))?;
            parts.push("-p".to_string());
            parts.push(quote(prompt));
            parts.extend(agent_args.map(str::to_string));
            if request.skip_permissions {
                parts.push(SKIP_PERMISSIONS_FLAG.to_string());
            }
        }
        (AgentKind::Codex, SessionMode::Interactive) => {
            parts.extend(agent_args.map(str::to_string));
            if nesting.bypass {
                parts.push(BYPASS_SANDBOX_FLAG.to_string());
            }
            if let Some(model) = &model {
                parts.push("--model".to_string());
                parts.push(quote(model));
            }
            parts.extend(prompt.map(quote));
        }
        (AgentKind::Codex, SessionMode::Exec) => {
            let prompt = prompt.ok_or_else(|| LisaError::MissingRequiredFlag("--prompt".to_string()))?;
            parts.push("exec".to_string());
            parts.push(quote(prompt));
            parts.push(if nesting.bypass { BYPASS_SANDBOX_FLAG } else { FULL_AUTO_FLAG }.to_string());
            parts.extend(agent_args.map(str::to_string));
            if let Some(model) = &model {
                parts.push("--model".to_string());
                parts.push(quote(model));
            }
        }
    }

    let command = parts.join(" ");
    let command = match request.mode {
        SessionMode::Exec => wrap_exec(&command),
        SessionMode::Interactive => command,
    };
    Ok(AssembledCommand {
        command,
        nesting,
        model_ignored,
    })
}
