//! Rendering of payloads and errors to stdout/stderr.
//!
//! JSON mode prints one document per command on stdout. Text mode prints a
//! short human line on stdout and errors on stderr.

use std::process::ExitCode;

use clap::error::ErrorKind;
use lisa_core::LisaError;
use lisa_protocol::{ErrorInfo, EXIT_FAILURE, EXIT_OK};
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

/// A payload that also failed, e.g. a cleanup with socket errors.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Failed<'a, T: Serialize> {
    #[serde(flatten)]
    payload: &'a T,
    error_code: &'a str,
    error: String,
}

/// Codes outside `0..=255` collapse to 1.
fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

pub fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(exit_byte(code))
}

pub fn to_json_line<T: Serialize>(payload: &T) -> String {
    serde_json::to_string(payload).unwrap_or_else(|err| {
        format!(
            r#"{{"errorCode":"json_error","error":"{}"}}"#,
            err.to_string().replace('"', "'")
        )
    })
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Prints `payload` as JSON, or `text()` in text mode, and exits 0.
    pub fn emit<T: Serialize>(&self, payload: &T, text: impl FnOnce() -> String) -> ExitCode {
        self.emit_with_code(payload, text, EXIT_OK)
    }

    pub fn emit_with_code<T: Serialize>(
        &self,
        payload: &T,
        text: impl FnOnce() -> String,
        code: i32,
    ) -> ExitCode {
        if self.json {
            println!("{}", to_json_line(payload));
        } else {
            let text = text();
            if !text.is_empty() {
                println!("{}", text);
            }
        }
        exit_code(code)
    }

    /// Prints `payload` with an attached error code and exits 1.
    pub fn emit_failed<T: Serialize>(
        &self,
        payload: &T,
        text: impl FnOnce() -> String,
        error_code: &str,
        error: String,
    ) -> ExitCode {
        if self.json {
            let failed = Failed {
                payload,
                error_code,
                error,
            };
            println!("{}", to_json_line(&failed));
        } else {
            println!("{}", text());
            eprintln!("error: {}", error);
        }
        exit_code(EXIT_FAILURE)
    }

    pub fn fail(&self, err: &LisaError) -> ExitCode {
        tracing::warn!(error_code = err.code(), error = %err, "Command failed");
        self.fail_info(&err.to_info())
    }

    pub fn fail_info(&self, info: &ErrorInfo) -> ExitCode {
        if self.json {
            println!("{}", to_json_line(info));
        } else {
            eprintln!("error: {}", info.error);
        }
        exit_code(EXIT_FAILURE)
    }
}

/// Error code for a clap parse failure.
fn parse_error_code(err: &clap::Error) -> &'static str {
    match err.kind() {
        ErrorKind::UnknownArgument | ErrorKind::InvalidSubcommand => "unknown_flag",
        ErrorKind::MissingRequiredArgument | ErrorKind::MissingSubcommand => {
            "missing_required_flag"
        }
        ErrorKind::InvalidValue if err.to_string().contains("a value is required") => {
            "missing_flag_value"
        }
        ErrorKind::NoEquals => "missing_flag_value",
        ErrorKind::ArgumentConflict => "conflicting_flags",
        _ => "invalid_flag_value",
    }
}

/// Handles `try_parse` failures; help and version requests exit 0.
pub fn parse_failure(err: clap::Error, raw_args: &[String]) -> ExitCode {
    match err.kind() {
        ErrorKind::DisplayHelp
        | ErrorKind::DisplayVersion
        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
            let _ = err.print();
            return if err.kind() == ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand {
                exit_code(EXIT_FAILURE)
            } else {
                exit_code(EXIT_OK)
            };
        }
        _ => {}
    }

    let json = raw_args.iter().skip(1).any(|arg| arg == "--json");
    if json {
        let message = err
            .to_string()
            .lines()
            .next()
            .unwrap_or_default()
            .trim_start_matches("error: ")
            .to_string();
        Output::new(true).fail_info(&ErrorInfo::new(parse_error_code(&err), message))
    } else {
        let _ = err.print();
        exit_code(EXIT_FAILURE)
    }
}
