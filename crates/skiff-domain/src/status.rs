use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Lifecycle state of an execution. Never persisted; see [`derive_status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Queued,
    Started,
    Complete,
    Error,
}

impl ExecutionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed view over an execution's `metadata.json`.
///
/// Every field defaults so partially written or legacy metadata still parses;
/// keys this struct does not know about are kept in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Uuid>,
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub step: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_exit_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_final_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExecutionMetadata {
    pub fn from_map(map: Map<String, Value>) -> serde_json::Result<Self> {
        serde_json::from_value(Value::Object(map))
    }

    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        derive_status(self)
    }
}

/// Status as a pure function of metadata. Precedence, first match wins:
///
/// 1. `error_message` recorded
/// 2. recorded container state carries an error indicator
/// 3. recorded exit code (`0` is complete, anything else an error)
/// 4. a container was booted
/// 5. nothing yet
pub fn derive_status(metadata: &ExecutionMetadata) -> ExecutionStatus {
    if metadata.error_message.is_some() {
        return ExecutionStatus::Error;
    }
    if metadata
        .container_final_state
        .as_ref()
        .is_some_and(state_reports_error)
    {
        return ExecutionStatus::Error;
    }
    if let Some(code) = metadata.container_exit_code {
        return if code == 0 {
            ExecutionStatus::Complete
        } else {
            ExecutionStatus::Error
        };
    }
    if metadata.container_id.is_some() {
        return ExecutionStatus::Started;
    }
    ExecutionStatus::Queued
}

// Container runtimes report failures outside the exit code as a non-empty
// `Error` string or an OOM kill flag.
fn state_reports_error(state: &Value) -> bool {
    let runtime_error = state
        .get("Error")
        .and_then(Value::as_str)
        .is_some_and(|message| !message.trim().is_empty());
    let oom_killed = state
        .get("OOMKilled")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    runtime_error || oom_killed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status_of(value: Value) -> ExecutionStatus {
        let Value::Object(map) = value else {
            panic!("metadata must be an object");
        };
        ExecutionMetadata::from_map(map).expect("metadata").status()
    }

    #[test]
    fn precedence_table() {
        assert_eq!(status_of(json!({})), ExecutionStatus::Queued);
        assert_eq!(
            status_of(json!({"container_id": "c1"})),
            ExecutionStatus::Started
        );
        assert_eq!(
            status_of(json!({"container_id": "c1", "container_exit_code": 0})),
            ExecutionStatus::Complete
        );
        assert_eq!(
            status_of(json!({"container_id": "c1", "container_exit_code": 137})),
            ExecutionStatus::Error
        );
        assert_eq!(
            status_of(json!({
                "container_id": "c1",
                "container_exit_code": 0,
                "error_message": "boom",
            })),
            ExecutionStatus::Error
        );
    }

    #[test]
    fn final_state_error_beats_clean_exit() {
        assert_eq!(
            status_of(json!({
                "container_id": "c1",
                "container_exit_code": 0,
                "container_final_state": {"Status": "exited", "Error": "mount failed"},
            })),
            ExecutionStatus::Error
        );
        assert_eq!(
            status_of(json!({
                "container_id": "c1",
                "container_exit_code": 0,
                "container_final_state": {"Status": "exited", "Error": "", "OOMKilled": false},
            })),
            ExecutionStatus::Complete
        );
        assert_eq!(
            status_of(json!({
                "container_id": "c1",
                "container_final_state": {"Status": "dead", "OOMKilled": true},
            })),
            ExecutionStatus::Error
        );
    }

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let Value::Object(map) = json!({"id": "x", "custom": {"a": 1}}) else {
            unreachable!()
        };
        let metadata = ExecutionMetadata::from_map(map).expect("metadata");
        assert_eq!(metadata.extra.get("custom"), Some(&json!({"a": 1})));
        let back = serde_json::to_value(&metadata).expect("serialize");
        assert_eq!(back["custom"], json!({"a": 1}));
        assert!(back.get("container_id").is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(ExecutionStatus::Complete.is_terminal());
        assert!(ExecutionStatus::Error.is_terminal());
        assert!(!ExecutionStatus::Started.is_terminal());
        assert!(!ExecutionStatus::Queued.is_terminal());
    }
}
