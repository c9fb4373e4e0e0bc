#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]

//! Commit storage, execution lifecycle, container runtime and output catalog
//! of the skiff job runner.

pub mod api;
pub mod auth;
pub mod consts;
mod context;
mod error;
pub mod lifecycle;
pub mod models;
pub mod runtime;
mod settings;
pub mod store;
mod worker;

#[cfg(test)]
mod testing;

pub use auth::AuthError;
pub use context::Context;
pub use error::{classify, ErrorKind, UnsupportedRequest};
pub use lifecycle::{
    check_container_status, get_logs, start_and_record, start_execution, ExecutionError,
};
pub use models::{Commit, Execution, ExecutionCreationData, Output, OUTPUT_CACHE_TABLE};
pub use runtime::{BootError, ContainerRuntime, DockerCli};
pub use settings::Settings;
pub use store::{EntityError, EntityStore, KeyValueCache, Model};
pub use worker::StartPool;
