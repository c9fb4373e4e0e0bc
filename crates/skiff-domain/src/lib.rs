#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

//! Pure data model shared by the skiff core and CLI: identifiers, build
//! manifests, execution status and log events.

pub mod events;
pub mod id;
pub mod manifest;
pub mod output;
pub mod status;

pub use events::{event_timestamp, format_log_event, LogEvent, LogStream};
pub use id::{new_execution_id, sanitize_id, shard};
pub use manifest::{
    BuildConfig, EnvironmentVariable, ManifestError, Parameter, ParameterType, Step,
    MANIFEST_FILENAME,
};
pub use output::output_id;
pub use status::{derive_status, ExecutionMetadata, ExecutionStatus};
