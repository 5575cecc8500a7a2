//! Log setup: a daily-rolled file under `<state-dir>/logs`, never stdout.
//!
//! `LISA_LOG` takes `EnvFilter` directives (default `info`);
//! `LISA_DEBUG_LOG=1` forces `debug`.

use std::env;
use std::path::Path;

use fs_err as fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

const ENV_LOG: &str = "LISA_LOG";
const ENV_DEBUG_LOG: &str = "LISA_DEBUG_LOG";

/// Keeps the non-blocking writer flushing until dropped at process exit.
pub struct LoggingGuard {
    _guard: Option<WorkerGuard>,
}

fn debug_enabled() -> bool {
    env::var(ENV_DEBUG_LOG)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

fn filter() -> EnvFilter {
    if debug_enabled() {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init(logs_dir: &Path) -> LoggingGuard {
    if fs::create_dir_all(logs_dir).is_err() {
        return LoggingGuard { _guard: None };
    }
    let appender = match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("lisa")
        .filename_suffix("log")
        .build(logs_dir)
    {
        Ok(appender) => appender,
        Err(_) => return LoggingGuard { _guard: None },
    };

    let (writer, guard) = tracing_appender::non_blocking(appender);
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .is_ok();

    LoggingGuard {
        _guard: installed.then_some(guard),
    }
}
