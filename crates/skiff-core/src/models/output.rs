use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use skiff_domain::{event_timestamp, output_id};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::store::KeyValueCache;

/// Cache table mapping output ids to [`CachedOutput`] records.
pub const OUTPUT_CACHE_TABLE: &str = "outputs";

/// What the output cache stores per id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedOutput {
    pub execution_id: String,
    pub name: String,
    pub path: String,
    pub size: u64,
    pub ctime: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct FileStat {
    size: u64,
    ctime: String,
}

/// A file produced by an execution.
///
/// `name` is relative to the execution's `outputs/` directory and `path` to
/// the data root, both with forward slashes. Size and timestamp come from the
/// first `stat` and are kept for the lifetime of the value.
#[derive(Debug)]
pub struct Output {
    execution_id: String,
    name: String,
    path: String,
    disk_path: PathBuf,
    stat: OnceLock<FileStat>,
}

impl Output {
    pub fn new(data_root: &Path, execution_id: &str, name: String, path: String) -> Self {
        let disk_path = data_root.join(&path);
        Self {
            execution_id: execution_id.to_string(),
            name,
            path,
            disk_path,
            stat: OnceLock::new(),
        }
    }

    /// Reverse lookup of a cached output. Returns the record as cached, even
    /// if the file has changed since.
    pub fn from_cache(id: &str, cache: &KeyValueCache, data_root: &Path) -> Result<Option<Self>> {
        let Some(record) = cache.get::<CachedOutput>(id)? else {
            return Ok(None);
        };
        let output = Self::new(data_root, &record.execution_id, record.name, record.path);
        let _ = output.stat.set(FileStat {
            size: record.size,
            ctime: record.ctime,
        });
        Ok(Some(output))
    }

    #[must_use]
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn disk_path(&self) -> &Path {
        &self.disk_path
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.stat()?.size)
    }

    pub fn ctime(&self) -> Result<String> {
        Ok(self.stat()?.ctime.clone())
    }

    pub fn id(&self) -> Result<Uuid> {
        Ok(output_id(&self.execution_id, &self.name, self.size()?))
    }

    /// Server-relative download location.
    #[must_use]
    pub fn download_url(&self) -> String {
        format!("/data/{}", self.path.trim_start_matches('/'))
    }

    pub fn as_api_response(&self) -> Result<Value> {
        let ctime = self.ctime()?;
        Ok(json!({
            "id": self.id()?,
            "size": self.size()?,
            "ctime": ctime,
            "file_ctime": ctime,
            "file_mtime": ctime,
            "name": self.name,
            "purged": false,
            "output_execution": {"id": self.execution_id},
        }))
    }

    pub fn to_cached(&self) -> Result<CachedOutput> {
        Ok(CachedOutput {
            execution_id: self.execution_id.clone(),
            name: self.name.clone(),
            path: self.path.clone(),
            size: self.size()?,
            ctime: self.ctime()?,
        })
    }

    /// Record this output under its id.
    pub fn cache(&self, cache: &KeyValueCache) -> Result<()> {
        cache.set(self.id()?, &self.to_cached()?)
    }

    fn stat(&self) -> Result<&FileStat> {
        if let Some(stat) = self.stat.get() {
            return Ok(stat);
        }
        let metadata = fs::metadata(&self.disk_path)
            .with_context(|| format!("failed to stat {}", self.disk_path.display()))?;
        let changed = metadata.created().or_else(|_| metadata.modified())?;
        let stat = FileStat {
            size: metadata.len(),
            ctime: event_timestamp(OffsetDateTime::from(changed)),
        };
        Ok(self.stat.get_or_init(|| stat))
    }
}
