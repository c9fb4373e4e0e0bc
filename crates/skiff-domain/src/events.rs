use std::fmt;

use serde::{Deserialize, Serialize};
use time::{macros::format_description, OffsetDateTime};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    Status,
}

impl LogStream {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Status => "status",
        }
    }
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of execution output, as served by the events endpoint and stored
/// in `log.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub stream: LogStream,
    pub message: String,
    pub time: String,
}

/// Build an event; `time` defaults to the current UTC instant.
pub fn format_log_event(
    stream: LogStream,
    message: impl Into<String>,
    time: Option<String>,
) -> LogEvent {
    LogEvent {
        stream,
        message: message.into(),
        time: time.unwrap_or_else(|| event_timestamp(OffsetDateTime::now_utc())),
    }
}

/// Fixed-width timestamp (microsecond precision, no offset) so that event and
/// ctime strings order lexicographically.
pub fn event_timestamp(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]"
    ))
    .unwrap_or_else(|_| at.unix_timestamp().to_string())
}
