//! On-disk snapshot record and its atomic persistence.

use crate::access_guard::AccessGuard;
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

pub const SCHEMA_VERSION: u32 = 1;

const STAGING_SUFFIX: &str = ".staging";
const STAGING_RAND_LEN: usize = 8;
/// Staging files younger than this may belong to a save still in progress.
pub const STAGING_GRACE: Duration = Duration::from_secs(300);

/// `integrity_digest_hex` covers the plaintext domains and credential JSON
/// concatenated without a separator. `saved_at` is informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub encrypted_domains_blob: String,
    pub encrypted_credential_blob: String,
    pub integrity_digest_hex: String,
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl PersistedSnapshot {
    /// `Ok(None)` when no snapshot exists yet.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };
        let snapshot: PersistedSnapshot = serde_json::from_slice(&bytes)?;
        if snapshot.schema_version != SCHEMA_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: snapshot.schema_version,
                expected: SCHEMA_VERSION,
            });
        }
        Ok(Some(snapshot))
    }

    /// Write to a protected staging file beside `path`, then rename it over
    /// the previous snapshot. Readers see either the old file or the new one.
    pub fn write_atomic(&self, path: &Path, guard: &dyn AccessGuard) -> Result<()> {
        let dir = parent_dir(path);
        fs::create_dir_all(&dir)?;
        guard.protect_directory(&dir)?;

        let json = serde_json::to_vec_pretty(self)?;
        let prefix = staging_prefix(path)?;
        let mut staging = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(STAGING_SUFFIX)
            .rand_bytes(STAGING_RAND_LEN)
            .tempfile_in(&dir)?;
        guard.protect_file(staging.path())?;
        staging.write_all(&json)?;
        staging.as_file().sync_all()?;
        staging
            .persist(path)
            .map_err(|e| StoreError::Io(e.error))?;
        // the new snapshot is in place from here on
        sync_after_rename(&dir);
        Ok(())
    }
}

/// Remove staging files of `path` left behind by a crash mid-save.
pub fn cleanup_staging(path: &Path) {
    cleanup_stale_staging(path, STAGING_GRACE);
}

/// Remove staging files of `path` last modified at least `grace` ago.
/// Staging files of other snapshots in the same directory are left alone.
pub fn cleanup_stale_staging(path: &Path, grace: Duration) {
    let Ok(prefix) = staging_prefix(path) else {
        return;
    };
    let Ok(entries) = fs::read_dir(parent_dir(path)) else {
        return;
    };
    let now = SystemTime::now();
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !is_staging_name(&name.to_string_lossy(), &prefix) {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(|modified| now.duration_since(modified).unwrap_or_default());
        match age {
            Ok(age) if age >= grace => {
                warn!(path = %entry.path().display(), "removing orphaned snapshot staging file");
                let _ = fs::remove_file(entry.path());
            }
            _ => {}
        }
    }
}

/// `.<file name>.` for `/dir/<file name>`.
fn staging_prefix(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .ok_or_else(|| StoreError::input("snapshot path has no file name"))?;
    Ok(format!(".{}.", name.to_string_lossy()))
}

/// `<prefix><random><suffix>`, where the random part is exactly what
/// `write_atomic` generates, so `a.json.bak` never matches `a.json`.
fn is_staging_name(name: &str, prefix: &str) -> bool {
    let Some(rest) = name.strip_prefix(prefix) else {
        return false;
    };
    let Some(random) = rest.strip_suffix(STAGING_SUFFIX) else {
        return false;
    };
    random.len() == STAGING_RAND_LEN && random.chars().all(|c| c.is_ascii_alphanumeric())
}

fn sync_after_rename(dir: &Path) {
    if let Err(e) = fsync_dir(dir) {
        warn!(path = %dir.display(), "snapshot replaced but directory sync failed: {e}");
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn fsync_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = fs::OpenOptions::new().read(true).open(path)?;
        dir.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
