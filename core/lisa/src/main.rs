//! lisa: headless supervisor for coding-agent CLIs running in tmux.
//!
//! Spawns `claude` / `codex` in detached tmux sessions, classifies what they
//! are doing from the outside, and cleans up what they leave behind.
//!
//! ## Subcommands
//!
//! - `session spawn|send|status|explain|capture|monitor|kill|list|tree|handoff`
//! - `session hook finish`: called from inside the pane by an agent's stop hook
//! - `agent build-cmd`: print the start command without spawning
//! - `doctor`, `cleanup`, `version`
//!
//! Every command accepts `--json`; stdout then carries exactly one JSON
//! document (or one per line for `--stream-json`), and failures print
//! `{"errorCode": ..., "error": ...}`.

mod logging;
mod maintenance;
mod output;
mod session;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};
use lisa_core::{LisaConfig, SessionEngine};

use crate::output::Output;

#[derive(Parser)]
#[command(name = "lisa")]
#[command(about = "Supervise coding-agent CLIs running in detached tmux sessions")]
#[command(version)]
struct Cli {
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that tmux and the agent CLIs are installed
    Doctor {
        #[arg(long, value_name = "PATH")]
        project_root: Option<PathBuf>,
    },

    /// Remove sockets left behind by dead or detached tmux servers
    Cleanup {
        /// Report what would happen without killing or removing anything
        #[arg(long)]
        dry_run: bool,

        /// Also consider tmux's default sockets (/tmp/tmux-<uid>/*)
        #[arg(long)]
        include_tmux_default: bool,
    },

    /// Print the lisa version
    Version,

    /// Manage supervised sessions
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Agent command helpers
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Start an agent in a new detached session
    Spawn(SpawnArgs),

    /// Type text or keys into a session
    Send(SendArgs),

    /// Classify a session once
    Status(StatusArgs),

    /// Classify a session and show every signal plus recent events
    Explain(ExplainArgs),

    /// Print the session's pane
    Capture(CaptureArgs),

    /// Poll a session until it finishes, waits for input or a predicate fires
    Monitor(MonitorArgs),

    /// Kill a session and remove its artifacts
    Kill(KillArgs),

    /// List lisa sessions on the project socket
    List(ListArgs),

    /// Show sessions grouped by parent
    Tree(ProjectArgs),

    /// Summarise a session for another agent or a human
    Handoff(HandoffArgs),

    /// Hooks run from inside the pane
    Hook {
        #[command(subcommand)]
        command: HookCommand,
    },
}

#[derive(Subcommand)]
enum AgentCommand {
    /// Print the assembled start command without spawning
    BuildCmd(CommandArgs),
}

#[derive(Subcommand)]
enum HookCommand {
    /// Record that the agent finished (reads LISA_SESSION, LISA_PROJECT_HASH, LISA_RUN_ID)
    Finish {
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        exit_code: i32,

        /// Overrides LISA_SESSION
        #[arg(long)]
        session: Option<String>,

        /// Overrides LISA_PROJECT_HASH
        #[arg(long)]
        project_hash: Option<String>,

        /// Overrides LISA_RUN_ID
        #[arg(long)]
        run_id: Option<String>,
    },
}

#[derive(Args, Clone)]
struct ProjectArgs {
    /// Project root (defaults to the current directory)
    #[arg(long, value_name = "PATH")]
    project_root: Option<PathBuf>,
}

#[derive(Args, Clone)]
struct SessionArgs {
    #[arg(long, value_name = "lisa-NAME")]
    session: String,

    #[command(flatten)]
    project: ProjectArgs,
}

/// Flags shared by `session spawn` and `agent build-cmd`.
#[derive(Args, Clone)]
struct CommandArgs {
    /// claude or codex
    #[arg(long, default_value = "claude")]
    agent: String,

    /// interactive or exec
    #[arg(long, default_value = "interactive")]
    mode: String,

    #[arg(long)]
    prompt: Option<String>,

    /// Run this shell command instead of the agent CLI
    #[arg(long)]
    command: Option<String>,

    /// Extra arguments appended verbatim to the agent invocation
    #[arg(long, allow_hyphen_values = true)]
    agent_args: Option<String>,

    #[arg(long)]
    model: Option<String>,

    /// Do not pass --dangerously-skip-permissions to claude
    #[arg(long)]
    no_dangerously_skip_permissions: bool,

    /// auto, force or off
    #[arg(long, default_value = "auto")]
    nested_policy: String,

    /// auto, nested or flat
    #[arg(long, default_value = "auto")]
    nesting_intent: String,

    /// Report whether the prompt looks like it will spawn nested sessions
    #[arg(long)]
    detect_nested: bool,
}

#[derive(Args)]
struct SpawnArgs {
    #[command(flatten)]
    command: CommandArgs,

    /// Session name; generated when omitted
    #[arg(long, value_name = "lisa-NAME")]
    session: Option<String>,

    #[command(flatten)]
    project: ProjectArgs,

    #[arg(long, default_value_t = lisa_core::engine::DEFAULT_WIDTH)]
    width: u16,

    #[arg(long, default_value_t = lisa_core::engine::DEFAULT_HEIGHT)]
    height: u16,

    /// Kill and remove same-named sessions under other project hashes first
    #[arg(long)]
    cleanup_all_hashes: bool,

    /// Print what would be spawned and stop
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct SendArgs {
    #[command(flatten)]
    target: SessionArgs,

    #[arg(long, allow_hyphen_values = true)]
    text: Option<String>,

    /// tmux key names, e.g. `--keys Escape --keys C-c`
    #[arg(long, num_args = 1..)]
    keys: Vec<String>,

    /// Press Enter after sending
    #[arg(long)]
    enter: bool,
}

#[derive(Args, Clone)]
struct ClassifyArgs {
    /// Keep shell banners when hashing pane output
    #[arg(long)]
    keep_noise: bool,

    /// Report waiting_input only after a finished assistant turn
    #[arg(long, default_value_t = false, action = ArgAction::Set, value_name = "true|false")]
    waiting_requires_turn_complete: bool,
}

#[derive(Args)]
struct StatusArgs {
    #[command(flatten)]
    target: SessionArgs,

    #[command(flatten)]
    classify: ClassifyArgs,
}

#[derive(Args)]
struct ExplainArgs {
    #[command(flatten)]
    target: SessionArgs,

    #[command(flatten)]
    classify: ClassifyArgs,

    /// Number of recent events to include
    #[arg(long, default_value_t = lisa_core::engine::DEFAULT_EVENT_TAIL)]
    events: usize,
}

#[derive(Args)]
struct CaptureArgs {
    #[command(flatten)]
    target: SessionArgs,

    /// Scrollback lines to capture
    #[arg(long)]
    lines: Option<usize>,

    /// Keep escape sequences and shell banners
    #[arg(long)]
    raw: bool,

    /// Also write the output tail to the session's out.txt
    #[arg(long)]
    save: bool,
}

#[derive(Args)]
struct MonitorArgs {
    #[command(flatten)]
    target: SessionArgs,

    #[command(flatten)]
    classify: ClassifyArgs,

    /// Seconds between polls
    #[arg(long, default_value_t = 2)]
    poll_interval: u64,

    #[arg(long, default_value_t = lisa_core::monitor::DEFAULT_MAX_POLLS)]
    max_polls: u64,

    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "true|false")]
    stop_on_waiting: bool,

    /// Stop once the raw pane contains this text
    #[arg(long)]
    until_marker: Option<String>,

    /// Stop once the session reaches this state
    #[arg(long)]
    until_state: Option<String>,

    /// Stop once `$.path`, `$.path==value` or `$.path!=value` holds
    #[arg(long)]
    until_jsonpath: Option<String>,

    /// any, terminal or marker
    #[arg(long, default_value = "any")]
    expect: String,

    /// Fail immediately when the session does not exist
    #[arg(long)]
    fail_not_found: bool,

    /// Print only the final state, exit reason and poll count
    #[arg(long, conflicts_with = "stream_json")]
    json_min: bool,

    /// Print every poll as a JSON line, then the final payload
    #[arg(long)]
    stream_json: bool,

    /// Mirror every poll to stderr
    #[arg(long)]
    verbose: bool,
}

#[derive(Args)]
struct KillArgs {
    #[command(flatten)]
    target: SessionArgs,

    /// Also kill same-named sessions under other project hashes
    #[arg(long)]
    cleanup_all_hashes: bool,
}

#[derive(Args)]
struct ListArgs {
    #[command(flatten)]
    project: ProjectArgs,

    /// Query every discovered lisa socket, not just the project's
    #[arg(long)]
    all_sockets: bool,
}

#[derive(Args)]
struct HandoffArgs {
    #[command(flatten)]
    target: SessionArgs,

    #[command(flatten)]
    classify: ClassifyArgs,

    /// Number of recent events to include
    #[arg(long, default_value_t = lisa_core::engine::DEFAULT_EVENT_TAIL)]
    events: usize,
}

fn main() -> ExitCode {
    let raw_args: Vec<String> = std::env::args().collect();
    let cli = match Cli::try_parse_from(&raw_args) {
        Ok(cli) => cli,
        Err(err) => return output::parse_failure(err, &raw_args),
    };
    let out = Output::new(cli.json);

    if let Commands::Version = cli.command {
        return maintenance::version(&out);
    }

    let config = LisaConfig::from_env();
    let engine = match SessionEngine::new(config) {
        Ok(engine) => engine,
        Err(err) => return out.fail(&err),
    };
    let _logging_guard = logging::init(&engine.storage().logs_dir());
    tracing::debug!(args = ?raw_args, "lisa invoked");

    match cli.command {
        Commands::Version => maintenance::version(&out),
        Commands::Doctor { project_root } => maintenance::doctor(&engine, &out, project_root.as_deref()),
        Commands::Cleanup {
            dry_run,
            include_tmux_default,
        } => maintenance::cleanup(&engine, &out, dry_run, include_tmux_default),
        Commands::Agent {
            command: AgentCommand::BuildCmd(args),
        } => maintenance::build_cmd(&engine, &out, &args),
        Commands::Session { command } => session::run(&engine, &out, command),
    }
}
