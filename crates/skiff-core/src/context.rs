use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::models::{Commit, Execution, OUTPUT_CACHE_TABLE};
use crate::runtime::ContainerRuntime;
use crate::settings::Settings;
use crate::store::{EntityStore, KeyValueCache};

/// Everything a request needs: settings and the container runtime.
///
/// Built once at startup and shared (`Arc<Context>`) with worker threads.
#[derive(Clone)]
pub struct Context {
    settings: Settings,
    runtime: Arc<dyn ContainerRuntime>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(settings: Settings, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { settings, runtime }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn data_path(&self) -> &Path {
        self.settings.data_path()
    }

    #[must_use]
    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    #[must_use]
    pub fn commits(&self) -> EntityStore<Commit> {
        EntityStore::new(self.data_path())
    }

    #[must_use]
    pub fn executions(&self) -> EntityStore<Execution> {
        EntityStore::new(self.data_path())
    }

    pub fn output_cache(&self) -> Result<KeyValueCache> {
        KeyValueCache::open(self.settings.cache_db_path(), OUTPUT_CACHE_TABLE)
    }
}
