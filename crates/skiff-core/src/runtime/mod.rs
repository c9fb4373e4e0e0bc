//! Container runtime adapter: boots execution containers, reports their state
//! and collects their logs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serde_json::Value;

mod docker;
mod logs;
pub mod process;

pub use docker::DockerCli;
pub use logs::{get_container_logs, parse_container_logs};

/// The requested image is neither available locally nor pullable.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("could not pull image {image}: {detail}")]
pub struct BootError {
    pub image: String,
    pub detail: String,
}

/// Control-plane operations on a local container engine.
///
/// Calls block until the engine answers; implementations impose no timeout.
pub trait ContainerRuntime: Send + Sync {
    /// Resolve (or pull) the image, create the container, inject tarballs,
    /// start it and return its reloaded state. Only an image that cannot be
    /// obtained is reported as [`BootError`]; every other failure propagates
    /// as-is.
    fn boot_container(&self, request: &BootRequest) -> Result<ContainerInfo>;

    fn inspect_container(&self, container: &str) -> Result<ContainerInfo>;

    /// Raw stdout and stderr of the container, one timestamped line each.
    fn container_logs(&self, container: &str) -> Result<ContainerLogs>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountKind {
    Bind,
    Volume,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
    pub kind: MountKind,
}

impl Mount {
    pub fn bind(source: impl Into<String>, target: impl Into<String>, read_only: bool) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only,
            kind: MountKind::Bind,
        }
    }

    pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: name.into(),
            target: target.into(),
            read_only: false,
            kind: MountKind::Volume,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootRequest {
    pub command: Vec<String>,
    pub container_name: String,
    pub environment_variables: BTreeMap<String, String>,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub tarball_files: Vec<PathBuf>,
    /// Directory inside the container the tarballs are extracted into.
    pub tarball_root: String,
    /// `user[:group]` to own the extracted files.
    pub chown_stanza: Option<String>,
    pub mounts: Vec<Mount>,
}

/// A container as reported by the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    /// The engine's state object (`Status`, `ExitCode`, `Error`, ...).
    pub state: Value,
}

impl ContainerInfo {
    /// Build from one element of `container inspect` output.
    pub fn from_inspect(value: &Value) -> Result<Self> {
        let id = value
            .get("Id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("container inspect output has no Id"))?;
        let name = value
            .get("Name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim_start_matches('/');
        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            state: value.get("State").cloned().unwrap_or(Value::Null),
        })
    }

    #[must_use]
    pub fn status(&self) -> &str {
        self.state
            .get("Status")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// The container has stopped for good.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.status(), "exited" | "dead")
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<i64> {
        self.state.get("ExitCode").and_then(Value::as_i64)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerLogs {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}
