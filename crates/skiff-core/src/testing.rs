//! In-memory container runtime for unit tests.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{bail, Result};
use serde_json::{json, Value};

use crate::runtime::{BootError, BootRequest, ContainerInfo, ContainerLogs, ContainerRuntime};
use crate::store::EntityStore;
use crate::{Commit, Context, Settings};

pub(crate) const CONTAINER_ID: &str = "c0ffee";

#[derive(Debug, Default)]
pub(crate) struct FakeRuntime {
    pub(crate) boots: Mutex<Vec<BootRequest>>,
    pub(crate) inspections: AtomicUsize,
    pub(crate) log_reads: AtomicUsize,
    pub(crate) unpullable: bool,
    state: Mutex<Value>,
    logs: Mutex<ContainerLogs>,
}

impl FakeRuntime {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(json!({"Status": "running"})),
            ..Self::default()
        })
    }

    pub(crate) fn unpullable() -> Arc<Self> {
        Arc::new(Self {
            unpullable: true,
            ..Self::default()
        })
    }

    pub(crate) fn set_state(&self, state: Value) {
        *self.state.lock().expect("state") = state;
    }

    pub(crate) fn set_logs(&self, stdout: &str, stderr: &str) {
        *self.logs.lock().expect("logs") = ContainerLogs {
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        };
    }

    pub(crate) fn boot_count(&self) -> usize {
        self.boots.lock().expect("boots").len()
    }

    fn info(&self) -> ContainerInfo {
        ContainerInfo {
            id: CONTAINER_ID.into(),
            name: "skiff".into(),
            state: self.state.lock().expect("state").clone(),
        }
    }
}

impl ContainerRuntime for FakeRuntime {
    fn boot_container(&self, request: &BootRequest) -> Result<ContainerInfo> {
        if self.unpullable {
            return Err(BootError {
                image: request.image.clone(),
                detail: "manifest unknown".into(),
            }
            .into());
        }
        self.boots.lock().expect("boots").push(request.clone());
        Ok(self.info())
    }

    fn inspect_container(&self, container: &str) -> Result<ContainerInfo> {
        self.inspections.fetch_add(1, Ordering::SeqCst);
        if container != CONTAINER_ID {
            bail!("no such container: {container}");
        }
        Ok(self.info())
    }

    fn container_logs(&self, _container: &str) -> Result<ContainerLogs> {
        self.log_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.logs.lock().expect("logs").clone())
    }
}

pub(crate) fn context(data_root: &Path, runtime: Arc<FakeRuntime>) -> Context {
    Context::new(Settings::new(data_root), runtime)
}

/// Store the standard test commit and return its id.
pub(crate) fn seed_commit(data_root: &Path) -> Result<String> {
    let bytes = crate::models::fixtures::tarball("skiff.yaml", crate::models::fixtures::MANIFEST, true);
    let commit = Commit::create(&EntityStore::new(data_root), bytes.as_slice(), "seed")?;
    Ok(crate::store::Model::id(&commit).to_string())
}
