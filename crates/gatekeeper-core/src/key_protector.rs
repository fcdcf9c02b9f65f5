//! Scope-bound encryption of configuration blobs.
//!
//! [`LocalKeyProtector`] seals each blob with XChaCha20-Poly1305 under a
//! 256-bit key-encryption key (KEK) obtained from a [`KeySource`]. The KEK
//! never leaves the protector. Encoded blobs are standard base64 of
//!
//! ```text
//! version (1) | scope tag (1) | nonce (24) | ciphertext + tag
//! ```
//!
//! The scope label is bound in as associated data, so a blob sealed under one
//! scope cannot be opened under the other even if both keys were identical.

use crate::access_guard::{restrict_dir, restrict_file};
use crate::error::{Result, StoreError};
use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit, OsRng, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use keyring::Entry;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zeroize::Zeroizing;

pub const BLOB_VERSION: u8 = 1;
pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 2 + NONCE_LEN;
const AAD_PREFIX: &[u8] = b"gatekeeper-blob-v1:";

const KEYRING_SERVICE: &str = "GatekeeperConfig";
const MACHINE_KEY_FILE: &str = "machine.key";

/// Who may later decrypt a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtectionScope {
    /// Any privileged context on this machine.
    MachineWide,
    /// Only the identity that encrypted the blob.
    IdentityScoped,
}

impl ProtectionScope {
    fn tag(self) -> u8 {
        match self {
            ProtectionScope::MachineWide => 1,
            ProtectionScope::IdentityScoped => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ProtectionScope::MachineWide),
            2 => Some(ProtectionScope::IdentityScoped),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ProtectionScope::MachineWide => "machine",
            ProtectionScope::IdentityScoped => "identity",
        }
    }

    fn aad(self) -> Vec<u8> {
        let mut aad = AAD_PREFIX.to_vec();
        aad.extend_from_slice(self.label().as_bytes());
        aad
    }
}

impl fmt::Display for ProtectionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub trait KeyProtector: Send + Sync {
    /// Encrypt `plaintext` and return a transport-safe text encoding.
    fn encrypt(&self, plaintext: &[u8], scope: ProtectionScope) -> Result<String>;
    fn decrypt(&self, encoded: &str, scope: ProtectionScope) -> Result<Vec<u8>>;
}

/// Supplier of key-encryption keys, one per scope.
pub trait KeySource: Send + Sync {
    /// Return the key for `scope`. When `create` is set a missing key is
    /// generated and stored; otherwise a missing key is a decryption error.
    fn key(&self, scope: ProtectionScope, create: bool) -> Result<Zeroizing<[u8; KEY_LEN]>>;
}

impl<T: KeySource + ?Sized> KeySource for std::sync::Arc<T> {
    fn key(&self, scope: ProtectionScope, create: bool) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        (**self).key(scope, create)
    }
}

// ── File-backed keys ────────────────────────────────────────────────────────

/// Keys stored as raw files under owner-only permissions.
///
/// The machine-wide key lives in `machine_dir`, which should be a directory
/// only privileged accounts can reach. Identity keys live in `identity_dir`,
/// one file per running identity.
pub struct FileKeySource {
    machine_dir: PathBuf,
    identity_dir: PathBuf,
    create_lock: Mutex<()>,
}

impl FileKeySource {
    pub fn new(machine_dir: impl Into<PathBuf>, identity_dir: impl Into<PathBuf>) -> Self {
        Self {
            machine_dir: machine_dir.into(),
            identity_dir: identity_dir.into(),
            create_lock: Mutex::new(()),
        }
    }

    /// Both scopes keyed from the same directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self::new(dir.clone(), dir)
    }

    pub fn key_path(&self, scope: ProtectionScope) -> PathBuf {
        match scope {
            ProtectionScope::MachineWide => self.machine_dir.join(MACHINE_KEY_FILE),
            ProtectionScope::IdentityScoped => self
                .identity_dir
                .join(format!("identity-{}.key", current_identity())),
        }
    }

    fn read_key(path: &Path, scope: ProtectionScope) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let bytes = Zeroizing::new(fs::read(path).map_err(|e| {
            StoreError::Decryption(format!("{scope} key unavailable at {}: {e}", path.display()))
        })?);
        if bytes.len() != KEY_LEN {
            return Err(StoreError::Decryption(format!(
                "key file {} has invalid length",
                path.display()
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&bytes);
        Ok(key)
    }

    fn write_key(path: &Path, key: &[u8; KEY_LEN]) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::input("key path has no parent directory"))?;
        fs::create_dir_all(dir)?;
        restrict_dir(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        restrict_file(tmp.path())?;
        tmp.write_all(key)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

impl KeySource for FileKeySource {
    fn key(&self, scope: ProtectionScope, create: bool) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let path = self.key_path(scope);
        if path.exists() {
            return Self::read_key(&path, scope);
        }
        if !create {
            return Err(StoreError::Decryption(format!(
                "{scope} key unavailable at {}",
                path.display()
            )));
        }
        let _guard = self.create_lock.lock();
        // another thread may have created it while we waited
        if path.exists() {
            return Self::read_key(&path, scope);
        }
        let key = generate_key();
        Self::write_key(&path, &key)?;
        info!(scope = %scope, path = %path.display(), "generated key-encryption key");
        Ok(key)
    }
}

// ── OS keyring ──────────────────────────────────────────────────────────────

/// Identity keys held in the OS keyring of the running user.
///
/// Keyrings are per-user, so machine-wide keys are delegated to a
/// [`FileKeySource`].
pub struct KeyringKeySource {
    machine: FileKeySource,
    create_lock: Mutex<()>,
}

impl KeyringKeySource {
    pub fn new(machine: FileKeySource) -> Self {
        Self {
            machine,
            create_lock: Mutex::new(()),
        }
    }

    fn entry() -> Result<Entry> {
        Entry::new(KEYRING_SERVICE, &format!("kek:identity:{}", current_identity()))
            .map_err(|e| StoreError::Decryption(format!("keyring init: {e}")))
    }

    fn load(entry: &Entry) -> Result<Option<Zeroizing<[u8; KEY_LEN]>>> {
        let encoded = match entry.get_password() {
            Ok(encoded) => Zeroizing::new(encoded),
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(StoreError::Decryption(format!("load key: {e}"))),
        };
        let decoded = Zeroizing::new(
            general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| StoreError::Decryption(format!("decode key: {e}")))?,
        );
        if decoded.len() != KEY_LEN {
            return Err(StoreError::Decryption("keyring key has invalid length".into()));
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&decoded);
        Ok(Some(key))
    }
}

impl KeySource for KeyringKeySource {
    fn key(&self, scope: ProtectionScope, create: bool) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        if scope == ProtectionScope::MachineWide {
            return self.machine.key(scope, create);
        }
        let entry = Self::entry()?;
        if let Some(key) = Self::load(&entry)? {
            return Ok(key);
        }
        if !create {
            return Err(StoreError::Decryption("identity key unavailable in keyring".into()));
        }
        let _guard = self.create_lock.lock();
        if let Some(key) = Self::load(&entry)? {
            return Ok(key);
        }
        let key = generate_key();
        let encoded = Zeroizing::new(general_purpose::STANDARD.encode(key.as_slice()));
        entry
            .set_password(&encoded)
            .map_err(|e| StoreError::Permission {
                path: format!("keyring:{KEYRING_SERVICE}"),
                reason: format!("store key: {e}"),
            })?;
        info!(scope = %scope, "generated key-encryption key in keyring");
        Ok(key)
    }
}

// ── Protector ───────────────────────────────────────────────────────────────

pub struct LocalKeyProtector<S> {
    source: S,
}

impl<S: KeySource> LocalKeyProtector<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: KeySource> KeyProtector for LocalKeyProtector<S> {
    fn encrypt(&self, plaintext: &[u8], scope: ProtectionScope) -> Result<String> {
        if plaintext.is_empty() {
            return Err(StoreError::input("plaintext must not be empty"));
        }
        let key = self.source.key(scope, true)?;
        let nonce = generate_nonce();
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
        let aad = scope.aad();
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| StoreError::Decryption(format!("encrypt: {e}")))?;

        let mut blob = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        blob.push(BLOB_VERSION);
        blob.push(scope.tag());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(blob))
    }

    fn decrypt(&self, encoded: &str, scope: ProtectionScope) -> Result<Vec<u8>> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(StoreError::input("ciphertext must not be empty"));
        }
        let blob = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| StoreError::Format(format!("base64: {e}")))?;
        if blob.len() < HEADER_LEN + TAG_LEN {
            return Err(StoreError::Format("blob too short".into()));
        }
        if blob[0] != BLOB_VERSION {
            return Err(StoreError::Format(format!("unknown blob version {}", blob[0])));
        }
        match ProtectionScope::from_tag(blob[1]) {
            Some(found) if found == scope => {}
            Some(found) => {
                return Err(StoreError::Decryption(format!(
                    "blob was protected under {found} scope, not {scope}"
                )))
            }
            None => return Err(StoreError::Format(format!("unknown scope tag {}", blob[1]))),
        }

        let key = self.source.key(scope, false)?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
        let aad = scope.aad();
        cipher
            .decrypt(
                XNonce::from_slice(&blob[2..HEADER_LEN]),
                Payload {
                    msg: &blob[HEADER_LEN..],
                    aad: &aad,
                },
            )
            .map_err(|_| {
                warn!(scope = %scope, "blob authentication failed");
                StoreError::Decryption("authentication failed (wrong key or tampered blob)".into())
            })
    }
}

fn generate_key() -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(key.as_mut_slice());
    key
}

fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Stable name of the identity this process runs as.
pub fn current_identity() -> String {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail.
        let uid = unsafe { libc::geteuid() };
        format!("uid{uid}")
    }
    #[cfg(not(unix))]
    {
        std::env::var("USERNAME")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "unknown".to_string())
    }
}
