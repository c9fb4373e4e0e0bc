use std::{
    collections::{BTreeMap, HashMap},
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use skiff_core::Settings;
use tracing::{debug, info};

pub const DATA_PATH_ENV: &str = "SKIFF_DATA_PATH";
pub const CONFIG_FILE_ENV: &str = "SKIFF_CONFIG";
pub const TOKEN_SECRET_ENV: &str = "SKIFF_TOKEN_SECRET";
pub const CONTAINER_PROGRAM_ENV: &str = "SKIFF_CONTAINER_PROGRAM";

const DEFAULT_DATA_PATH: &str = "./data";
const TOKEN_SECRET_FILENAME: &str = "token_secret.json";

#[derive(Debug, Clone)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    #[cfg(test)]
    pub fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Optional YAML file named by `SKIFF_CONFIG`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    data_path: Option<PathBuf>,
    #[serde(default)]
    mounts: BTreeMap<String, String>,
    #[serde(default)]
    read_only_mounts: BTreeMap<String, String>,
    #[serde(default)]
    auth: BTreeMap<String, String>,
    token_secret: Option<String>,
    container_program: Option<PathBuf>,
}

#[derive(Serialize, Deserialize)]
struct StoredSecret {
    secret: String,
}

/// Resolve settings: command-line override, then environment, then the YAML
/// file, then defaults.
pub fn load_settings(snapshot: &EnvSnapshot, data_path_override: Option<&Path>) -> Result<Settings> {
    let file = match snapshot.var(CONFIG_FILE_ENV) {
        Some(path) => read_file_config(Path::new(path))?,
        None => FileConfig::default(),
    };
    let data_path = data_path_override
        .map(Path::to_path_buf)
        .or_else(|| snapshot.var(DATA_PATH_ENV).map(PathBuf::from))
        .or(file.data_path)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH));

    let mut settings = Settings::new(data_path);
    settings.mounts = file.mounts;
    settings.read_only_mounts = file.read_only_mounts;
    settings.auth = file.auth;
    settings.token_secret = snapshot
        .var(TOKEN_SECRET_ENV)
        .map(ToOwned::to_owned)
        .or(file.token_secret);
    settings.container_program = snapshot
        .var(CONTAINER_PROGRAM_ENV)
        .map(PathBuf::from)
        .or(file.container_program);
    Ok(settings)
}

/// Create the data root and make sure a token secret exists, persisting a
/// random one on first use.
pub fn initialize(settings: &mut Settings) -> Result<()> {
    let root = settings.data_path().to_path_buf();
    fs::create_dir_all(&root)
        .with_context(|| format!("failed to create data root {}", root.display()))?;
    if settings.token_secret.is_none() {
        settings.token_secret = Some(load_or_create_secret(&root.join(TOKEN_SECRET_FILENAME))?);
    }
    Ok(())
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    debug!(path = %path.display(), "config file loaded");
    Ok(config)
}

fn load_or_create_secret(path: &Path) -> Result<String> {
    if path.is_file() {
        let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let stored: StoredSecret = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to decode {}", path.display()))?;
        return Ok(stored.secret);
    }
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let secret = hex::encode(bytes);
    let encoded = serde_json::to_vec_pretty(&StoredSecret {
        secret: secret.clone(),
    })?;
    fs::write(path, encoded).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "generated token secret");
    Ok(secret)
}
