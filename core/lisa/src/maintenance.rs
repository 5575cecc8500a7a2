//! Top-level commands outside the session lifecycle.

use std::path::Path;
use std::process::ExitCode;

use lisa_core::reaper::SystemSocketDiscovery;
use lisa_core::SessionEngine;
use serde::Serialize;

use crate::output::Output;
use crate::session::command_request;
use crate::CommandArgs;

#[derive(Serialize)]
struct VersionPayload {
    name: &'static str,
    version: &'static str,
}

pub fn version(out: &Output) -> ExitCode {
    let payload = VersionPayload {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    };
    out.emit(&payload, || format!("lisa {}", payload.version))
}

pub fn doctor(engine: &SessionEngine, out: &Output, project_root: Option<&Path>) -> ExitCode {
    let payload = engine.doctor(project_root);
    let text = || {
        let mut lines: Vec<String> = payload
            .binaries
            .iter()
            .map(|check| match &check.path {
                Some(path) => format!("ok       {:<7} {}", check.name, path),
                None => format!("missing  {}", check.name),
            })
            .collect();
        lines.push(format!("state    {}", payload.state_dir));
        lines.push(format!("socket   {}", payload.socket));
        lines.join("\n")
    };
    if payload.ok {
        out.emit(&payload, text)
    } else {
        out.emit_failed(
            &payload,
            text,
            "session_preflight_failed",
            "tmux not found on PATH".to_string(),
        )
    }
}

pub fn cleanup(
    engine: &SessionEngine,
    out: &Output,
    dry_run: bool,
    include_tmux_default: bool,
) -> ExitCode {
    let discovery = SystemSocketDiscovery::new(include_tmux_default, engine.config().command_timeout);
    let summary = engine.cleanup(&discovery, dry_run);
    let text = || {
        let mut line = if summary.dry_run {
            format!(
                "scanned {}, would remove {}, would kill {}, kept active {}",
                summary.scanned, summary.would_remove, summary.would_kill, summary.kept_active
            )
        } else {
            format!(
                "scanned {}, removed {}, killed {}, kept active {}",
                summary.scanned, summary.removed, summary.killed, summary.kept_active
            )
        };
        for error in &summary.errors {
            line.push_str(&format!("\n  {}", error));
        }
        line
    };

    if summary.errors.is_empty() {
        out.emit(&summary, text)
    } else {
        let err = lisa_core::LisaError::CleanupSocketErrors(summary.errors.len());
        out.emit_failed(&summary, text, err.code(), err.to_string())
    }
}

pub fn build_cmd(engine: &SessionEngine, out: &Output, args: &CommandArgs) -> ExitCode {
    let result = command_request(args).and_then(|request| engine.build_command(&request));
    match result {
        Ok(payload) => out.emit(&payload, || payload.command.clone()),
        Err(err) => out.fail(&err),
    }
}
