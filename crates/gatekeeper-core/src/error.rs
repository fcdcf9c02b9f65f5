use std::fmt;

// ── Errors ──────────────────────────────────────────────────────────────────

/// Which encrypted record of a snapshot an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Domains,
    Credential,
}

impl fmt::Display for BlobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobKind::Domains => f.write_str("domains"),
            BlobKind::Credential => f.write_str("credential"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    Input(String),
    #[error("malformed ciphertext encoding: {0}")]
    Format(String),
    #[error("decryption failed: {0}")]
    Decryption(String),
    #[error("failed to decrypt {blob} blob: {source}")]
    Blob {
        blob: BlobKind,
        #[source]
        source: Box<StoreError>,
    },
    #[error("integrity check failed")]
    Integrity,
    #[error("failed to deserialize configuration: {0}")]
    Serialization(String),
    #[error("unsupported schema version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("permission restriction failed for {path}: {reason}")]
    Permission { path: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no prior configuration at {0}")]
    NotFound(String),
    #[error("timed out waiting for configuration lock")]
    LockTimeout,
}

/// Coarse classification of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Format,
    Decryption,
    Integrity,
    Serialization,
    Permission,
    Io,
    NotFound,
    LockTimeout,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Input(_) => ErrorKind::Input,
            StoreError::Format(_) => ErrorKind::Format,
            StoreError::Decryption(_) => ErrorKind::Decryption,
            StoreError::Blob { source, .. } => source.kind(),
            StoreError::Integrity => ErrorKind::Integrity,
            StoreError::Serialization(_) | StoreError::UnsupportedVersion { .. } => {
                ErrorKind::Serialization
            }
            StoreError::Permission { .. } => ErrorKind::Permission,
            StoreError::Io(_) => ErrorKind::Io,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::LockTimeout => ErrorKind::LockTimeout,
        }
    }

    pub(crate) fn input(msg: impl Into<String>) -> Self {
        StoreError::Input(msg.into())
    }

    /// Attach the blob a decryption or decoding failure came from.
    pub(crate) fn for_blob(self, blob: BlobKind) -> Self {
        StoreError::Blob {
            blob,
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
