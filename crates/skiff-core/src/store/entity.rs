use std::{
    fmt,
    fs,
    io::Write,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use skiff_domain::{event_timestamp, sanitize_id, shard};
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tracing::debug;
use walkdir::WalkDir;

pub(crate) const METADATA_FILENAME: &str = "metadata.json";

/// Errors surfaced by entity persistence.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EntityError {
    #[error("{kind} with id {id:?} does not exist")]
    DoesNotExist { kind: &'static str, id: String },
    #[error("{kind} with id {id:?} already exists")]
    AlreadyExists { kind: &'static str, id: String },
    #[error("{kind} id {raw:?} is empty once sanitized")]
    InvalidId { kind: &'static str, raw: String },
    #[error("metadata of {kind} {id:?} is not a JSON object")]
    MalformedMetadata { kind: &'static str, id: String },
}

/// A directory under `data_root/<kind>/<shard>/<id>` owning a `metadata.json`.
///
/// Metadata is read lazily and cached until the next write through this
/// handle. Callers always receive their own copy of the map.
pub struct Entity {
    kind: &'static str,
    id: String,
    data_root: PathBuf,
    path: PathBuf,
    metadata_path: PathBuf,
    cached: Mutex<Option<Map<String, Value>>>,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Entity {
    pub(crate) fn new(data_root: &Path, kind: &'static str, shard_len: usize, raw_id: &str) -> Self {
        let id = sanitize_id(raw_id);
        let path = data_root.join(kind).join(shard(&id, shard_len)).join(&id);
        let metadata_path = path.join(METADATA_FILENAME);
        Self {
            kind,
            id,
            data_root: data_root.to_path_buf(),
            path,
            metadata_path,
            cached: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Root of the data directory this entity lives under.
    #[must_use]
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    /// Directory and `metadata.json` are both present.
    #[must_use]
    pub fn base_exists(&self) -> bool {
        !self.id.is_empty() && self.path.is_dir() && self.metadata_path.is_file()
    }

    pub fn metadata(&self) -> Result<Map<String, Value>> {
        let mut cached = self.cache();
        if let Some(metadata) = cached.as_ref() {
            return Ok(metadata.clone());
        }
        let raw = fs::read(&self.metadata_path).with_context(|| {
            format!("failed to read metadata at {}", self.metadata_path.display())
        })?;
        let value: Value = serde_json::from_slice(&raw).with_context(|| {
            format!("failed to decode metadata at {}", self.metadata_path.display())
        })?;
        let Value::Object(metadata) = value else {
            return Err(EntityError::MalformedMetadata {
                kind: self.kind,
                id: self.id.clone(),
            }
            .into());
        };
        *cached = Some(metadata.clone());
        Ok(metadata)
    }

    /// Replace the whole metadata document.
    pub fn write_metadata(&self, metadata: &Map<String, Value>) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(metadata)
            .with_context(|| format!("failed to encode metadata for {} {}", self.kind, self.id))?;
        let mut cached = self.cache();
        write_atomic(&self.metadata_path, &encoded)?;
        *cached = None;
        debug!(kind = self.kind, id = %self.id, "metadata written");
        Ok(())
    }

    /// Shallow-merge `updates` over the current metadata and write the result.
    ///
    /// The read and the write are separate steps: a concurrent updater of the
    /// same id (in another handle or process) can interleave, and the last
    /// write wins.
    pub fn update_metadata(&self, updates: Map<String, Value>) -> Result<Map<String, Value>> {
        let mut merged = self.metadata()?;
        merged.extend(updates);
        self.write_metadata(&merged)?;
        Ok(merged)
    }

    fn cache(&self) -> MutexGuard<'_, Option<Map<String, Value>>> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A kind of entity persisted through an [`EntityStore`].
pub trait Model: Sized {
    const KIND: &'static str;
    /// Characters of the id used as the intermediate shard directory.
    const SHARD_LEN: usize = 4;

    fn from_entity(entity: Entity) -> Self;

    fn entity(&self) -> &Entity;

    fn exists(&self) -> bool {
        self.entity().base_exists()
    }

    fn id(&self) -> &str {
        self.entity().id()
    }

    fn metadata(&self) -> Result<Map<String, Value>> {
        self.entity().metadata()
    }
}

/// Filesystem-backed collection of one entity kind.
pub struct EntityStore<M> {
    data_root: PathBuf,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for EntityStore<M> {
    fn clone(&self) -> Self {
        Self {
            data_root: self.data_root.clone(),
            _model: PhantomData,
        }
    }
}

impl<M> fmt::Debug for EntityStore<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("data_root", &self.data_root)
            .finish()
    }
}

impl<M: Model> EntityStore<M> {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            _model: PhantomData,
        }
    }

    #[must_use]
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    #[must_use]
    pub fn kind_root(&self) -> PathBuf {
        self.data_root.join(M::KIND)
    }

    /// Handle for `id` without checking that it exists.
    pub fn handle(&self, id: &str) -> M {
        M::from_entity(Entity::new(&self.data_root, M::KIND, M::SHARD_LEN, id))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.handle(id).exists()
    }

    pub fn load(&self, id: &str) -> Result<M, EntityError> {
        let model = self.handle(id);
        if model.exists() {
            Ok(model)
        } else {
            Err(EntityError::DoesNotExist {
                kind: M::KIND,
                id: id.to_string(),
            })
        }
    }

    /// Ids of every directory under the kind root that owns a metadata file.
    ///
    /// Lazy; each call walks the tree again.
    pub fn iterate_ids(&self) -> impl Iterator<Item = String> {
        WalkDir::new(self.kind_root())
            .min_depth(1)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == METADATA_FILENAME)
            .filter_map(|entry| {
                entry
                    .path()
                    .parent()
                    .and_then(Path::file_name)
                    .map(|name| name.to_string_lossy().into_owned())
            })
    }

    pub fn iterate_instances(&self) -> impl Iterator<Item = M> {
        let data_root = self.data_root.clone();
        self.iterate_ids()
            .map(move |id| M::from_entity(Entity::new(&data_root, M::KIND, M::SHARD_LEN, &id)))
    }

    /// Number of entities on disk. Creations racing with the walk may or may
    /// not be counted.
    pub fn count(&self) -> usize {
        self.iterate_ids().count()
    }

    /// Create the entity directory and write `{id, ctime, ..data}`.
    pub fn create_with_metadata(&self, id: &str, data: Map<String, Value>) -> Result<M> {
        let model = self.handle(id);
        let entity = model.entity();
        if entity.id().is_empty() {
            return Err(EntityError::InvalidId {
                kind: M::KIND,
                raw: id.to_string(),
            }
            .into());
        }
        if model.exists() {
            return Err(EntityError::AlreadyExists {
                kind: M::KIND,
                id: entity.id().to_string(),
            }
            .into());
        }
        fs::create_dir_all(entity.path())
            .with_context(|| format!("failed to create {}", entity.path().display()))?;
        let mut metadata = Map::new();
        metadata.insert("id".into(), Value::String(entity.id().to_string()));
        metadata.insert(
            "ctime".into(),
            Value::String(event_timestamp(OffsetDateTime::now_utc())),
        );
        metadata.extend(data);
        entity.write_metadata(&metadata)?;
        debug!(kind = M::KIND, id = %entity.id(), "entity created");
        Ok(model)
    }
}

/// Write `bytes` to a sibling temp file and rename it over `path`, so readers
/// never observe a partially written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", path.display()))?;
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to flush temp file for {}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to move temp file to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[derive(Debug)]
    struct Widget(Entity);

    impl Model for Widget {
        const KIND: &'static str = "widget";

        fn from_entity(entity: Entity) -> Self {
            Self(entity)
        }

        fn entity(&self) -> &Entity {
            &self.0
        }
    }

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn create_then_load_returns_id_ctime_and_data() -> Result<()> {
        let temp = tempdir()?;
        let store = EntityStore::<Widget>::new(temp.path());
        store.create_with_metadata("~ABCDEF12", data(json!({"size": 3, "tags": ["a"]})))?;

        let loaded = store.load("~abcdef12")?;
        let metadata = loaded.metadata()?;
        assert_eq!(metadata["id"], "~abcdef12");
        assert!(metadata["ctime"].as_str().is_some_and(|s| !s.is_empty()));
        assert_eq!(metadata["size"], 3);
        assert_eq!(metadata["tags"], json!(["a"]));
        assert_eq!(metadata.len(), 4);
        assert_eq!(
            loaded.entity().path(),
            temp.path().join("widget").join("abcd").join("~abcdef12")
        );
        Ok(())
    }

    #[test]
    fn missing_entities_do_not_exist() {
        let temp = tempdir().expect("tempdir");
        let store = EntityStore::<Widget>::new(temp.path());
        assert!(!store.exists("nope"));
        assert_eq!(
            store.load("nope").expect_err("missing"),
            EntityError::DoesNotExist {
                kind: "widget",
                id: "nope".into()
            }
        );

        // A directory without metadata is not an entity.
        fs::create_dir_all(store.handle("half").entity().path()).expect("mkdir");
        assert!(!store.exists("half"));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn creating_twice_fails() -> Result<()> {
        let temp = tempdir()?;
        let store = EntityStore::<Widget>::new(temp.path());
        store.create_with_metadata("w1", Map::new())?;
        let err = store
            .create_with_metadata("W1", Map::new())
            .err()
            .expect("duplicate");
        assert!(matches!(
            err.downcast_ref::<EntityError>(),
            Some(EntityError::AlreadyExists { .. })
        ));
        let err = store
            .create_with_metadata("../..", Map::new())
            .err()
            .expect("invalid");
        assert!(matches!(
            err.downcast_ref::<EntityError>(),
            Some(EntityError::InvalidId { .. })
        ));
        Ok(())
    }

    #[test]
    fn iteration_and_count_follow_the_filesystem() -> Result<()> {
        let temp = tempdir()?;
        let store = EntityStore::<Widget>::new(temp.path());
        assert_eq!(store.count(), 0);
        for id in ["alpha", "beta", "gamma"] {
            store.create_with_metadata(id, Map::new())?;
        }
        let mut ids: Vec<_> = store.iterate_ids().collect();
        ids.sort();
        assert_eq!(ids, ["alpha", "beta", "gamma"]);
        assert_eq!(store.count(), 3);
        // Restartable: a second walk sees the same set.
        assert_eq!(store.iterate_instances().count(), 3);
        Ok(())
    }

    #[test]
    fn metadata_reads_are_copies_and_writes_invalidate() -> Result<()> {
        let temp = tempdir()?;
        let store = EntityStore::<Widget>::new(temp.path());
        let widget = store.create_with_metadata("w", data(json!({"a": 1})))?;

        let mut copy = widget.metadata()?;
        copy.insert("a".into(), json!(999));
        assert_eq!(widget.metadata()?["a"], 1);

        let merged = widget.entity().update_metadata(data(json!({"b": 2})))?;
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
        assert_eq!(widget.metadata()?["b"], 2);

        let mut replacement = Map::new();
        replacement.insert("only".into(), json!(true));
        widget.entity().write_metadata(&replacement)?;
        assert_eq!(widget.metadata()?, replacement);
        // Another handle reads the same document from disk.
        assert_eq!(store.load("w")?.metadata()?, replacement);
        Ok(())
    }

    #[test]
    fn malformed_metadata_is_reported() -> Result<()> {
        let temp = tempdir()?;
        let store = EntityStore::<Widget>::new(temp.path());
        let widget = store.create_with_metadata("w", Map::new())?;
        fs::write(widget.entity().metadata_path(), b"[1, 2]")?;
        let fresh = store.load("w")?;
        let err = fresh.metadata().expect_err("array metadata");
        assert!(matches!(
            err.downcast_ref::<EntityError>(),
            Some(EntityError::MalformedMetadata { .. })
        ));
        fs::write(widget.entity().metadata_path(), b"{not json")?;
        assert!(store.load("w")?.metadata().is_err());
        Ok(())
    }
}
