use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::store::CACHE_DB_FILENAME;

/// Process-wide settings, loaded once at startup by the embedding binary and
/// handed to [`crate::Context`]. The core never reads configuration sources.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub data_path: PathBuf,
    /// Host path → container path, mounted read-write into every execution.
    #[serde(default)]
    pub mounts: BTreeMap<String, String>,
    /// Host path → container path, mounted read-only into every execution.
    #[serde(default)]
    pub read_only_mounts: BTreeMap<String, String>,
    /// Username → password. Empty disables authentication.
    #[serde(default)]
    pub auth: BTreeMap<String, String>,
    #[serde(default)]
    pub token_secret: Option<String>,
    /// Container CLI (`docker`, `podman` or a path). Detected when unset.
    #[serde(default)]
    pub container_program: Option<PathBuf>,
}

impl Settings {
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    #[must_use]
    pub fn auth_enabled(&self) -> bool {
        !self.auth.is_empty()
    }

    #[must_use]
    pub fn cache_db_path(&self) -> PathBuf {
        self.data_path.join(CACHE_DB_FILENAME)
    }
}
