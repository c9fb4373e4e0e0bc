use std::{
    fs::{self, File},
    io::{BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use skiff_domain::{id::CONTENT_ID_MARKER, BuildConfig, MANIFEST_FILENAME};
use tar::Archive;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::store::{write_atomic, Entity, EntityStore, Model};

const TARBALL_FILENAME: &str = "tarball";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// An uploaded code bundle, identified by the SHA-256 of its bytes.
#[derive(Debug)]
pub struct Commit(Entity);

impl Model for Commit {
    const KIND: &'static str = "commit";

    fn from_entity(entity: Entity) -> Self {
        Self(entity)
    }

    fn entity(&self) -> &Entity {
        &self.0
    }

    fn exists(&self) -> bool {
        self.0.base_exists() && self.tarball_path().is_file()
    }
}

impl Commit {
    /// Store the tarball read from `reader` and extract its build manifest.
    ///
    /// Uploading bytes that are already stored returns the existing commit
    /// untouched, after retrying the manifest extraction if it never
    /// completed.
    pub fn create(store: &EntityStore<Self>, reader: impl Read, description: &str) -> Result<Self> {
        let data_root = store.data_root();
        fs::create_dir_all(data_root)
            .with_context(|| format!("failed to create {}", data_root.display()))?;
        let (upload, sha256, size) = spool_upload(data_root, reader)?;
        let identifier = format!("{CONTENT_ID_MARKER}{sha256}");

        let existing = store.handle(&identifier);
        if existing.exists() {
            // An earlier upload may have stopped before its manifest landed.
            if !existing.manifest_path().is_file() {
                extract_manifest(&existing.tarball_path(), &existing.manifest_path())?;
            }
            debug!(commit = %identifier, "commit already stored");
            return Ok(existing);
        }

        let mut data = Map::new();
        data.insert("size".into(), json!(size));
        data.insert("identifier".into(), Value::String(identifier.clone()));
        data.insert("description".into(), Value::String(description.to_string()));
        let commit = store.create_with_metadata(&identifier, data)?;
        upload
            .persist(commit.tarball_path())
            .map_err(|err| err.error)
            .with_context(|| format!("failed to store tarball for {identifier}"))?;
        extract_manifest(&commit.tarball_path(), &commit.manifest_path())?;
        info!(commit = %identifier, size, "commit created");
        Ok(commit)
    }

    #[must_use]
    pub fn tarball_path(&self) -> PathBuf {
        self.0.path().join(TARBALL_FILENAME)
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.0.path().join(MANIFEST_FILENAME)
    }

    pub fn load_config(&self) -> Result<BuildConfig> {
        let path = self.manifest_path();
        let source = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        BuildConfig::parse(&source)
            .with_context(|| format!("failed to parse {}", path.display()))
    }
}

fn spool_upload(dir: &Path, mut reader: impl Read) -> Result<(NamedTempFile, String, u64)> {
    let mut tmp = tempfile::Builder::new()
        .prefix("upload-")
        .tempfile_in(dir)
        .with_context(|| format!("failed to create upload file in {}", dir.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; 64 * 1024];
    let mut size = 0_u64;
    loop {
        let read = reader.read(&mut buffer).context("failed to read upload")?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        tmp.write_all(&buffer[..read])
            .context("failed to spool upload")?;
        size += read as u64;
    }
    tmp.flush().context("failed to spool upload")?;
    Ok((tmp, hex::encode(hasher.finalize()), size))
}

fn extract_manifest(tarball: &Path, dest: &Path) -> Result<()> {
    let mut file = File::open(tarball)
        .with_context(|| format!("failed to open tarball {}", tarball.display()))?;
    let mut magic = [0_u8; 2];
    let gzipped = file.read_exact(&mut magic).is_ok() && magic == GZIP_MAGIC;
    file.seek(SeekFrom::Start(0))?;
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    let contents = read_manifest_member(reader)
        .with_context(|| format!("failed to read {MANIFEST_FILENAME} from {}", tarball.display()))?;
    write_atomic(dest, &contents)
}

fn read_manifest_member(reader: impl Read) -> Result<Vec<u8>> {
    let mut archive = Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let is_manifest =
            entry.path()?.to_string_lossy().trim_start_matches("./") == MANIFEST_FILENAME;
        if is_manifest {
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            return Ok(contents);
        }
    }
    bail!("no {MANIFEST_FILENAME} in archive")
}
