use crate::credential::HashCost;
use crate::key_protector::{
    FileKeySource, KeyProtector, KeyringKeySource, LocalKeyProtector, ProtectionScope,
};
use crate::paths;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SCOPE_ENV: &str = "GATEKEEPER_SCOPE";
pub const KEY_BACKEND_ENV: &str = "GATEKEEPER_KEY_BACKEND";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyBackend {
    File,
    Keyring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub snapshot_path: PathBuf,
    pub key_dir: PathBuf,
    #[serde(default = "default_scope")]
    pub scope: ProtectionScope,
    #[serde(default = "default_key_backend")]
    pub key_backend: KeyBackend,
    #[serde(default)]
    pub hash_cost: HashCost,
}

impl StoreConfig {
    /// Snapshot and keys under `dir`, machine-wide scope, file keys.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            snapshot_path: dir.join("config.json"),
            key_dir: dir.join("keys"),
            scope: default_scope(),
            key_backend: default_key_backend(),
            hash_cost: HashCost::default(),
        }
    }

    /// Defaults from [`paths`], then `GATEKEEPER_SCOPE` / `GATEKEEPER_KEY_BACKEND`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            snapshot_path: paths::snapshot_path()?,
            key_dir: paths::key_dir()?,
            scope: default_scope(),
            key_backend: default_key_backend(),
            hash_cost: HashCost::default(),
        };
        if let Ok(scope) = std::env::var(SCOPE_ENV) {
            config.scope = parse_scope(&scope)?;
        }
        if let Ok(backend) = std::env::var(KEY_BACKEND_ENV) {
            config.key_backend = match backend.trim().to_ascii_lowercase().as_str() {
                "file" => KeyBackend::File,
                "keyring" => KeyBackend::Keyring,
                other => return Err(anyhow!("unknown key backend: {other}")),
            };
        }
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn key_protector(&self) -> Arc<dyn KeyProtector> {
        let files = FileKeySource::in_dir(&self.key_dir);
        match self.key_backend {
            KeyBackend::File => Arc::new(LocalKeyProtector::new(files)),
            KeyBackend::Keyring => Arc::new(LocalKeyProtector::new(KeyringKeySource::new(files))),
        }
    }
}

pub fn parse_scope(value: &str) -> Result<ProtectionScope> {
    match value.trim().to_ascii_lowercase().as_str() {
        "machine" | "machine_wide" | "machinewide" => Ok(ProtectionScope::MachineWide),
        "identity" | "identity_scoped" | "identityscoped" => Ok(ProtectionScope::IdentityScoped),
        other => Err(anyhow!("unknown protection scope: {other}")),
    }
}

fn default_scope() -> ProtectionScope {
    ProtectionScope::MachineWide
}

fn default_key_backend() -> KeyBackend {
    KeyBackend::File
}
