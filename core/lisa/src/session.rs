//! `lisa session ...` handlers: flag parsing into engine requests, rendering.

use std::process::ExitCode;
use std::time::Duration;

use lisa_core::command::{parse_agent, parse_mode, CommandRequest};
use lisa_core::config::{ENV_PROJECT_HASH, ENV_RUN_ID, ENV_SESSION};
use lisa_core::engine::{CaptureRequest, HookRequest, PollOptions, SendRequest, SpawnRequest};
use lisa_core::monitor::{Expectation, JsonPathPredicate, MonitorOptions};
use lisa_core::reaper::SystemSocketDiscovery;
use lisa_core::{LisaError, Result, SessionEngine};
use lisa_protocol::{
    MonitorMinPayload, MonitorPayload, PollRecord, SessionState, StatusPayload, TreeNode,
};

use crate::output::{exit_code, to_json_line, Output};
use crate::{
    CaptureArgs, ClassifyArgs, CommandArgs, ExplainArgs, HandoffArgs, HookCommand, KillArgs,
    ListArgs, MonitorArgs, SendArgs, SessionCommand, SpawnArgs, StatusArgs,
};

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Builds the command-assembly request. Runs before any side effect so bad
/// values fail with their own error codes.
pub(crate) fn command_request(args: &CommandArgs) -> Result<CommandRequest> {
    let mut request = CommandRequest::new(parse_agent(&args.agent)?, parse_mode(&args.mode)?);
    request.prompt = args.prompt.clone();
    request.raw_command = args.command.clone();
    request.agent_args = args.agent_args.clone();
    request.model = args.model.clone();
    request.skip_permissions = !args.no_dangerously_skip_permissions;
    request.nested_policy = args.nested_policy.parse()?;
    request.nesting_intent = args.nesting_intent.parse()?;
    request.detect_nested = args.detect_nested;
    request.parent_session = env_non_empty(ENV_SESSION);
    Ok(request)
}

fn poll_options(args: &ClassifyArgs) -> PollOptions {
    PollOptions {
        strip_noise: !args.keep_noise,
        waiting_requires_turn_complete: args.waiting_requires_turn_complete,
    }
}

pub fn run(engine: &SessionEngine, out: &Output, command: SessionCommand) -> ExitCode {
    let result = match command {
        SessionCommand::Spawn(args) => spawn(engine, out, &args),
        SessionCommand::Send(args) => send(engine, out, args),
        SessionCommand::Status(args) => status(engine, out, &args),
        SessionCommand::Explain(args) => explain(engine, out, &args),
        SessionCommand::Capture(args) => capture(engine, out, args),
        SessionCommand::Monitor(args) => monitor(engine, out, &args),
        SessionCommand::Kill(args) => kill(engine, out, &args),
        SessionCommand::List(args) => list(engine, out, &args),
        SessionCommand::Tree(args) => engine
            .tree(args.project_root.as_deref())
            .map(|payload| out.emit(&payload, || render_tree(&payload.roots))),
        SessionCommand::Handoff(args) => handoff(engine, out, &args),
        SessionCommand::Hook {
            command: HookCommand::Finish {
                exit_code,
                session,
                project_hash,
                run_id,
            },
        } => {
            let request = HookRequest {
                session: session.or_else(|| env_non_empty(ENV_SESSION)),
                project_hash: project_hash.or_else(|| env_non_empty(ENV_PROJECT_HASH)),
                run_id: run_id.or_else(|| env_non_empty(ENV_RUN_ID)),
                exit_code,
            };
            engine.hook_finish(&request).map(|payload| {
                out.emit(&payload, || {
                    format!("{} finished with {}", payload.session, payload.exit_code)
                })
            })
        }
    };
    result.unwrap_or_else(|err| out.fail(&err))
}

fn spawn(engine: &SessionEngine, out: &Output, args: &SpawnArgs) -> Result<ExitCode> {
    let request = SpawnRequest {
        session: args.session.clone(),
        project_root: args.project.project_root.clone(),
        command: command_request(&args.command)?,
        width: args.width,
        height: args.height,
        cleanup_all_hashes: args.cleanup_all_hashes,
        dry_run: args.dry_run,
    };
    let payload = engine.spawn(&request)?;
    Ok(out.emit(&payload, || {
        if payload.dry_run {
            payload.command.clone()
        } else {
            format!(
                "{} ({} {}) run {}",
                payload.session,
                payload.agent,
                payload.mode,
                payload.run_id.as_deref().unwrap_or("-")
            )
        }
    }))
}

fn send(engine: &SessionEngine, out: &Output, args: SendArgs) -> Result<ExitCode> {
    let request = SendRequest {
        session: args.target.session,
        project_root: args.target.project.project_root,
        text: args.text,
        keys: args.keys,
        enter: args.enter,
    };
    let payload = engine.send(&request)?;
    Ok(out.emit(&payload, || format!("sent to {}", payload.session)))
}

fn status_line(status: &StatusPayload) -> String {
    let mut line = format!("{} {} ({})", status.state, status.reason, status.next_action);
    if let Some(code) = status.exit_code {
        line.push_str(&format!(" exit={}", code));
    }
    line
}

fn status(engine: &SessionEngine, out: &Output, args: &StatusArgs) -> Result<ExitCode> {
    let payload = engine.status(
        &args.target.session,
        args.target.project.project_root.as_deref(),
        poll_options(&args.classify),
    )?;
    Ok(out.emit(&payload, || status_line(&payload)))
}

fn explain(engine: &SessionEngine, out: &Output, args: &ExplainArgs) -> Result<ExitCode> {
    let payload = engine.explain(
        &args.target.session,
        args.target.project.project_root.as_deref(),
        poll_options(&args.classify),
        args.events,
    )?;
    Ok(out.emit(&payload, || {
        let mut lines = vec![status_line(&payload.status)];
        lines.push(serde_json::to_string_pretty(&payload.status.signals).unwrap_or_default());
        for event in &payload.events {
            lines.push(format!(
                "{} {:?} {} {}",
                event.at,
                event.event_type,
                event.state.map(|state| state.as_str()).unwrap_or("-"),
                event.reason
            ));
        }
        if payload.dropped_lines > 0 {
            lines.push(format!("({} malformed event lines skipped)", payload.dropped_lines));
        }
        lines.join("\n")
    }))
}

fn capture(engine: &SessionEngine, out: &Output, args: CaptureArgs) -> Result<ExitCode> {
    let request = CaptureRequest {
        session: args.target.session,
        project_root: args.target.project.project_root,
        lines: args.lines,
        raw: args.raw,
        save: args.save,
    };
    let payload = engine.capture(&request)?;
    Ok(out.emit(&payload, || payload.output.clone()))
}

fn monitor_options(args: &MonitorArgs) -> Result<MonitorOptions> {
    let until_state = args
        .until_state
        .as_deref()
        .map(|value| value.parse::<SessionState>().map_err(LisaError::InvalidState))
        .transpose()?;
    let until_jsonpath = args.until_jsonpath.as_deref().map(str::parse::<JsonPathPredicate>).transpose()?;
    Ok(MonitorOptions {
        poll_interval: Duration::from_secs(args.poll_interval),
        max_polls: args.max_polls,
        stop_on_waiting: args.stop_on_waiting,
        until_marker: args.until_marker.clone().filter(|marker| !marker.is_empty()),
        until_state,
        until_jsonpath,
        expect: args.expect.parse::<Expectation>()?,
        fail_not_found: args.fail_not_found,
    })
}

fn poll_line(record: &PollRecord) -> String {
    format!(
        "poll {} {} {} ({})",
        record.poll, record.state, record.reason, record.next_action
    )
}

fn monitor(engine: &SessionEngine, out: &Output, args: &MonitorArgs) -> Result<ExitCode> {
    let options = monitor_options(args)?;
    let stream = args.stream_json;
    let verbose = args.verbose;
    let mut on_poll = |record: &PollRecord| {
        if stream {
            println!("{}", to_json_line(record));
        }
        if verbose {
            eprintln!("{}", poll_line(record));
        }
    };

    let payload = engine.monitor(
        &args.target.session,
        args.target.project.project_root.as_deref(),
        &options,
        poll_options(&args.classify),
        &mut on_poll,
    )?;

    if args.json_min {
        println!("{}", to_json_line(&MonitorMinPayload::from(&payload)));
        return Ok(exit_code(payload.exit_code));
    }
    if stream {
        println!("{}", to_json_line(&payload));
        return Ok(exit_code(payload.exit_code));
    }
    Ok(out.emit_with_code(&payload, || monitor_text(&payload), payload.exit_code))
}

fn monitor_text(payload: &MonitorPayload) -> String {
    let mut line = format!(
        "{} {} after {} polls ({})",
        payload.final_state, payload.exit_reason, payload.polls, payload.last_reason
    );
    if let Some(code) = payload.agent_exit_code {
        line.push_str(&format!(" exit={}", code));
    }
    if payload.expectation_failed {
        line.push_str(" expectation failed");
    }
    line
}

fn kill(engine: &SessionEngine, out: &Output, args: &KillArgs) -> Result<ExitCode> {
    let payload = engine.kill(
        &args.target.session,
        args.target.project.project_root.as_deref(),
        args.cleanup_all_hashes,
    )?;
    Ok(out.emit(&payload, || {
        if payload.killed {
            format!("killed {}", payload.session)
        } else {
            format!("removed artifacts of {}", payload.session)
        }
    }))
}

fn list(engine: &SessionEngine, out: &Output, args: &ListArgs) -> Result<ExitCode> {
    let discovery = args
        .all_sockets
        .then(|| SystemSocketDiscovery::new(false, engine.config().command_timeout));
    let payload = engine.list(
        args.project.project_root.as_deref(),
        discovery
            .as_ref()
            .map(|discovery| discovery as &dyn lisa_core::reaper::SocketDiscovery),
    )?;
    Ok(out.emit(&payload, || {
        payload
            .sessions
            .iter()
            .map(|entry| {
                format!(
                    "{:<32} {:<7} {:<12} {}",
                    entry.session,
                    entry.agent.map(|agent| agent.as_str()).unwrap_or("-"),
                    entry.mode.map(|mode| mode.as_str()).unwrap_or("-"),
                    entry.state.map(|state| state.as_str()).unwrap_or("-"),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }))
}

fn render_tree(roots: &[TreeNode]) -> String {
    fn walk(node: &TreeNode, depth: usize, lines: &mut Vec<String>) {
        lines.push(format!(
            "{}{} {}{}",
            "  ".repeat(depth),
            node.session,
            node.state.map(|state| state.as_str()).unwrap_or("-"),
            if node.live { "" } else { " (gone)" }
        ));
        for child in &node.children {
            walk(child, depth + 1, lines);
        }
    }
    let mut lines = Vec::new();
    for root in roots {
        walk(root, 0, &mut lines);
    }
    lines.join("\n")
}

fn handoff(engine: &SessionEngine, out: &Output, args: &HandoffArgs) -> Result<ExitCode> {
    let payload = engine.handoff(
        &args.target.session,
        args.target.project.project_root.as_deref(),
        poll_options(&args.classify),
        args.events,
    )?;
    Ok(out.emit(&payload, || {
        let mut lines = vec![
            format!("session: {}", payload.session),
            format!("state:   {} ({})", payload.state, payload.reason),
        ];
        if let Some(command) = &payload.start_command {
            lines.push(format!("command: {}", command));
        }
        lines.push(format!("next:    {}", payload.suggestion));
        if !payload.output_tail.is_empty() {
            lines.push(String::new());
            lines.extend(payload.output_tail.iter().cloned());
        }
        lines.join("\n")
    }))
}
