use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use skiff_domain::{new_execution_id, ExecutionMetadata, ExecutionStatus, LogStream};
use tracing::info;
use uuid::Uuid;
use walkdir::WalkDir;

use super::output::Output;
use crate::store::{Entity, EntityStore, Model};

const LOG_EVENTS_FILENAME: &str = "log.json";

/// Fields a client supplies to create an execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCreationData {
    pub commit: String,
    pub project: Uuid,
    pub environment: Uuid,
    pub step: String,
    pub image: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
}

/// One run of a build step inside a container.
#[derive(Debug)]
pub struct Execution(Entity);

impl Model for Execution {
    const KIND: &'static str = "execution";
    const SHARD_LEN: usize = 8;

    fn from_entity(entity: Entity) -> Self {
        Self(entity)
    }

    fn entity(&self) -> &Entity {
        &self.0
    }
}

impl Execution {
    /// Persist a new queued execution under a fresh time-ordered id.
    ///
    /// `counter` is one more than the executions currently on disk; concurrent
    /// creations may share a value.
    pub fn create(store: &EntityStore<Self>, data: &ExecutionCreationData) -> Result<Self> {
        let id = new_execution_id();
        let counter = store.count() + 1;
        let Value::Object(mut fields) = serde_json::to_value(data)? else {
            return Err(anyhow!("execution creation data did not serialize to an object"));
        };
        fields.insert("counter".into(), Value::from(counter));
        let execution = store.create_with_metadata(&id, fields)?;
        info!(execution = %id, commit = %data.commit, step = %data.step, counter, "execution created");
        Ok(execution)
    }

    pub fn typed_metadata(&self) -> Result<ExecutionMetadata> {
        ExecutionMetadata::from_map(self.metadata()?)
            .with_context(|| format!("metadata of execution {} is malformed", self.id()))
    }

    pub fn status(&self) -> Result<ExecutionStatus> {
        Ok(self.typed_metadata()?.status())
    }

    #[must_use]
    pub fn container_name(&self) -> String {
        format!("skiff-{}", self.id())
    }

    #[must_use]
    pub fn outputs_path(&self) -> PathBuf {
        self.0.path().join("outputs")
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.0.path().join("config")
    }

    #[must_use]
    pub fn inputs_path(&self) -> PathBuf {
        self.0.path().join("inputs")
    }

    /// Raw log capture of one container stream (`stdout.log`, `stderr.log`).
    #[must_use]
    pub fn log_path(&self, stream: LogStream) -> PathBuf {
        self.0.path().join(format!("{stream}.log"))
    }

    /// Parsed, merged log events captured once the container finished.
    #[must_use]
    pub fn log_events_path(&self) -> PathBuf {
        self.0.path().join(LOG_EVENTS_FILENAME)
    }

    /// Regular files under `outputs/`, discovered lazily on each call.
    pub fn iterate_outputs(&self) -> impl Iterator<Item = Output> {
        let outputs = self.outputs_path();
        let data_root = self.0.data_root().to_path_buf();
        let execution_id = self.id().to_string();
        WalkDir::new(&outputs)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(move |entry| {
                let name = relative_slash_path(entry.path(), &outputs)?;
                let path = relative_slash_path(entry.path(), &data_root)?;
                Some(Output::new(&data_root, &execution_id, name, path))
            })
    }
}

fn relative_slash_path(path: &Path, base: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy())
        .collect::<Vec<_>>();
    Some(parts.join("/"))
}
