use std::env;

use atty::Stream;
use color_eyre::owo_colors::OwoColorize;
use color_eyre::Result;
use serde::Serialize;
use serde_json::{json, Value};
use skiff_core::{classify, ErrorKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}

impl CommandStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::UserError => 1,
            Self::Failure => 2,
        }
    }
}

#[derive(Debug)]
pub struct CommandOutcome {
    pub status: CommandStatus,
    pub message: String,
    pub details: Value,
}

impl CommandOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            details,
        }
    }

    /// Map a service error to a user error or failure by its category.
    pub fn from_error(err: &anyhow::Error) -> Self {
        let kind = classify(err);
        let status = if kind.is_user_error() {
            CommandStatus::UserError
        } else {
            CommandStatus::Failure
        };
        Self {
            status,
            message: format!("{err:#}"),
            details: json!({ "kind": kind, "http_status": kind.http_status() }),
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        serde_json::from_value(self.details.get("kind")?.clone()).ok()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OutputOptions {
    pub quiet: bool,
    pub json: bool,
    pub no_color: bool,
}

/// Print the outcome and return the process exit code.
///
/// Successful commands print their response body; failures print one status
/// line on stderr. `--json` wraps either in a `{status, message, details}`
/// envelope on stdout.
pub fn emit_output(opts: &OutputOptions, outcome: &CommandOutcome) -> Result<i32> {
    let code = outcome.status.exit_code();
    if opts.json {
        let payload = json!({
            "status": outcome.status,
            "message": outcome.message,
            "details": outcome.details,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }
    match outcome.status {
        CommandStatus::Ok => {
            if !opts.quiet {
                println!("{}", serde_json::to_string_pretty(&outcome.details)?);
            }
        }
        status => {
            let style = Style::new(opts.no_color, atty::is(Stream::Stderr));
            eprintln!("{}", style.status(status, &outcome.message));
        }
    }
    Ok(code)
}

struct Style {
    enabled: bool,
}

impl Style {
    fn new(force_no_color: bool, is_tty: bool) -> Self {
        let env_no_color = env::var_os("NO_COLOR").is_some();
        Self {
            enabled: !(force_no_color || env_no_color) && is_tty,
        }
    }

    fn status(&self, status: CommandStatus, text: &str) -> String {
        let symbol = match status {
            CommandStatus::Ok => "✔",
            CommandStatus::UserError => "✗",
            CommandStatus::Failure => "✖",
        };
        let line = format!("{symbol} {text}");
        if !self.enabled {
            return line;
        }
        match status {
            CommandStatus::Ok => line.green().bold().to_string(),
            CommandStatus::UserError => line.yellow().bold().to_string(),
            CommandStatus::Failure => line.red().bold().to_string(),
        }
    }
}
