//! Encrypted, tamper-evident configuration store.
//!
//! The store owns the live allow-list and administrator credential behind a
//! reader/writer lock and hands out value copies only. Persistence encrypts
//! the canonical JSON of each record independently and stores a SHA-256
//! digest over the two plaintexts; loading decrypts both, checks the digest,
//! and only then replaces the live state. Any failure while loading leaves
//! the store in its secure defaults: no allowed domains, no credential.

use crate::access_guard::{AccessGuard, PosixAccessGuard};
use crate::config::StoreConfig;
use crate::credential::{CredentialHasher, CredentialRecord};
use crate::digest::IntegrityDigest;
use crate::domain_set::DomainSet;
use crate::error::{BlobKind, ErrorKind, Result, StoreError};
use crate::key_protector::{KeyProtector, ProtectionScope};
use crate::snapshot::{cleanup_staging, PersistedSnapshot, SCHEMA_VERSION};
use chrono::Utc;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Result of a load. Loading never fails; it falls back to secure defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Verified,
    SecureDefaults { kind: ErrorKind, diagnostic: String },
}

impl LoadOutcome {
    fn defaults(err: &StoreError) -> Self {
        LoadOutcome::SecureDefaults {
            kind: err.kind(),
            diagnostic: err.to_string(),
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, LoadOutcome::Verified)
    }

    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            LoadOutcome::Verified => None,
            LoadOutcome::SecureDefaults { diagnostic, .. } => Some(diagnostic),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    domains: DomainSet,
    credential: CredentialRecord,
}

pub struct SecureConfigStore {
    path: PathBuf,
    scope: ProtectionScope,
    protector: Arc<dyn KeyProtector>,
    guard: Arc<dyn AccessGuard>,
    hasher: CredentialHasher,
    state: RwLock<StoreState>,
    initial_load: LoadOutcome,
}

impl SecureConfigStore {
    /// Create a store over `path` and immediately load it.
    pub fn open(
        path: impl Into<PathBuf>,
        scope: ProtectionScope,
        protector: Arc<dyn KeyProtector>,
        guard: Arc<dyn AccessGuard>,
        hasher: CredentialHasher,
    ) -> Self {
        let path = path.into();
        cleanup_staging(&path);
        let mut store = Self {
            path,
            scope,
            protector,
            guard,
            hasher,
            state: RwLock::new(StoreState::default()),
            initial_load: LoadOutcome::Verified,
        };
        store.initial_load = store.load();
        store
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::open(
            config.snapshot_path.clone(),
            config.scope,
            config.key_protector(),
            Arc::new(PosixAccessGuard::default()),
            CredentialHasher::new(config.hash_cost),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scope(&self) -> ProtectionScope {
        self.scope
    }

    /// Outcome of the load performed by [`SecureConfigStore::open`].
    pub fn initial_load(&self) -> &LoadOutcome {
        &self.initial_load
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    /// Persist the current state. On error neither the live state nor the
    /// previous snapshot is touched, and the error describes what failed.
    pub fn save(&self) -> Result<()> {
        let state = self.state.write();
        match self.persist(&state) {
            Ok(()) => {
                info!(
                    path = %self.path.display(),
                    domains = state.domains.count(),
                    password_set = state.credential.is_set(),
                    "configuration saved"
                );
                Ok(())
            }
            Err(err) => {
                warn!(path = %self.path.display(), kind = ?err.kind(), "configuration save failed: {err}");
                Err(err)
            }
        }
    }

    /// Replace the live state from disk, or fall back to secure defaults.
    pub fn load(&self) -> LoadOutcome {
        let mut state = self.state.write();
        match self.read_verified() {
            Ok(loaded) => {
                *state = loaded;
                info!(
                    path = %self.path.display(),
                    domains = state.domains.count(),
                    password_set = state.credential.is_set(),
                    "configuration loaded"
                );
                LoadOutcome::Verified
            }
            Err(err) => {
                *state = StoreState::default();
                match err.kind() {
                    ErrorKind::NotFound => {
                        info!(path = %self.path.display(), "no prior configuration; using secure defaults")
                    }
                    ErrorKind::Integrity => warn!(
                        path = %self.path.display(),
                        "integrity check failed; allow-list and credential cleared, delete the file to start over"
                    ),
                    kind => warn!(
                        path = %self.path.display(),
                        kind = ?kind,
                        "configuration rejected, using secure defaults: {err}"
                    ),
                }
                LoadOutcome::defaults(&err)
            }
        }
    }

    pub fn reload(&self) -> LoadOutcome {
        self.load()
    }

    fn persist(&self, state: &StoreState) -> Result<()> {
        let domains_json = Zeroizing::new(state.domains.to_canonical_json()?);
        let credential_json = Zeroizing::new(state.credential.to_canonical_json()?);

        let encrypted_domains_blob = self.protector.encrypt(&domains_json, self.scope)?;
        let encrypted_credential_blob = self.protector.encrypt(&credential_json, self.scope)?;
        let integrity_digest_hex =
            IntegrityDigest::digest_concat(&[domains_json.as_slice(), credential_json.as_slice()])?;

        let snapshot = PersistedSnapshot {
            encrypted_domains_blob,
            encrypted_credential_blob,
            integrity_digest_hex,
            schema_version: SCHEMA_VERSION,
            saved_at: Some(Utc::now()),
        };
        snapshot.write_atomic(&self.path, self.guard.as_ref())
    }

    fn read_verified(&self) -> Result<StoreState> {
        let snapshot = PersistedSnapshot::read(&self.path)?
            .ok_or_else(|| StoreError::NotFound(self.path.display().to_string()))?;

        let domains_json = Zeroizing::new(
            self.protector
                .decrypt(&snapshot.encrypted_domains_blob, self.scope)
                .map_err(|e| e.for_blob(BlobKind::Domains))?,
        );
        let credential_json = Zeroizing::new(
            self.protector
                .decrypt(&snapshot.encrypted_credential_blob, self.scope)
                .map_err(|e| e.for_blob(BlobKind::Credential))?,
        );

        // nothing decrypted is parsed before the digest matches
        if !IntegrityDigest::verify_concat(
            &[domains_json.as_slice(), credential_json.as_slice()],
            &snapshot.integrity_digest_hex,
        ) {
            return Err(StoreError::Integrity);
        }

        Ok(StoreState {
            domains: DomainSet::from_canonical_json(&domains_json)?,
            credential: CredentialRecord::from_canonical_json(&credential_json)?,
        })
    }

    // ── Allow-list ──────────────────────────────────────────────────────────

    pub fn get_whitelist(&self) -> DomainSet {
        self.state.read().domains.clone()
    }

    /// Like [`get_whitelist`](Self::get_whitelist) but gives up after `timeout`
    /// if a writer holds the lock.
    pub fn get_whitelist_timeout(&self, timeout: Duration) -> Result<DomainSet> {
        self.state
            .try_read_for(timeout)
            .map(|state| state.domains.clone())
            .ok_or(StoreError::LockTimeout)
    }

    pub fn is_domain_allowed(&self, domain: &str) -> bool {
        self.state.read().domains.contains(domain)
    }

    pub fn update_whitelist(&self, domains: DomainSet) {
        self.state.write().domains = domains;
    }

    /// Returns `Ok(true)` if the domain was not already present.
    pub fn add_domain(&self, domain: &str) -> Result<bool> {
        if domain.trim().is_empty() {
            return Err(StoreError::input("domain must not be empty"));
        }
        self.state.write().domains.add(domain)
    }

    /// Returns `Ok(true)` if the domain was present.
    pub fn remove_domain(&self, domain: &str) -> Result<bool> {
        if domain.trim().is_empty() {
            return Err(StoreError::input("domain must not be empty"));
        }
        Ok(self.state.write().domains.remove(domain))
    }

    // ── Credential ──────────────────────────────────────────────────────────

    pub fn get_credential_snapshot(&self) -> CredentialRecord {
        self.state.read().credential.clone()
    }

    /// Hashing runs under the writer lock, so this blocks readers for the
    /// full hash cost.
    pub fn set_password(&self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(StoreError::input("password must not be empty"));
        }
        let mut state = self.state.write();
        state.credential = CredentialRecord::from_plaintext(&self.hasher, password)?;
        Ok(())
    }

    pub fn clear_password(&self) {
        self.state.write().credential.clear();
    }

    pub fn verify_password(&self, password: &str) -> bool {
        self.state.read().credential.verify(password)
    }

    pub fn is_password_set(&self) -> bool {
        self.state.read().credential.is_set()
    }
}
