//! Encrypted, tamper-evident configuration store for a privileged service:
//! a normalized domain allow-list and a single administrator credential.

pub mod access_guard;
pub mod config;
pub mod credential;
pub mod digest;
pub mod domain_set;
pub mod error;
pub mod key_protector;
pub mod paths;
pub mod snapshot;
pub mod status;
pub mod store;

pub use access_guard::{AccessGuard, AccessPolicy, PosixAccessGuard};
pub use config::StoreConfig;
pub use credential::{CredentialHasher, CredentialRecord, HashCost};
pub use digest::IntegrityDigest;
pub use domain_set::DomainSet;
pub use error::{ErrorKind, StoreError};
pub use key_protector::{KeyProtector, LocalKeyProtector, ProtectionScope};
pub use store::{LoadOutcome, SecureConfigStore};
