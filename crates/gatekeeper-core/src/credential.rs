//! Administrator credential hashing.
//!
//! Passwords are hashed with Argon2id into PHC strings; the cost parameters
//! and a fresh random salt are embedded in every hash, so verification never
//! needs the original [`HashCost`].

use crate::error::{Result, StoreError};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const HASH_MEMORY_COST: u32 = 65536; // 64MB
pub const HASH_TIME_COST: u32 = 3;
pub const HASH_PARALLELISM: u32 = 4;

/// Argon2 cost parameters. The default costs hundreds of milliseconds per hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: HASH_MEMORY_COST,
            iterations: HASH_TIME_COST,
            parallelism: HASH_PARALLELISM,
        }
    }
}

impl HashCost {
    /// Minimal cost, for tests only.
    pub fn testing() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialHasher {
    cost: HashCost,
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::new(HashCost::default())
    }
}

impl CredentialHasher {
    pub fn new(cost: HashCost) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> HashCost {
        self.cost
    }

    pub fn hash(&self, password: &str) -> Result<String> {
        if password.is_empty() {
            return Err(StoreError::input("password must not be empty"));
        }
        let params = Params::new(
            self.cost.memory_kib,
            self.cost.iterations,
            self.cost.parallelism,
            None,
        )
        .map_err(|e| StoreError::input(format!("argon2 params: {e}")))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let salt = SaltString::generate(&mut OsRng);
        let hash = argon
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| StoreError::input(format!("argon2 hash: {e}")))?;
        Ok(hash.to_string())
    }

    /// Never fails: malformed or foreign hashes simply do not verify.
    pub fn verify(password: &str, hash: &str) -> bool {
        if password.is_empty() || hash.is_empty() {
            return false;
        }
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        if parsed.algorithm != Algorithm::Argon2id.ident() {
            return false;
        }
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

/// The single administrator credential: an opaque hash, or unset.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    hash: Option<String>,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("is_set", &self.is_set())
            .finish()
    }
}

impl CredentialRecord {
    pub fn unset() -> Self {
        Self::default()
    }

    pub fn from_plaintext(hasher: &CredentialHasher, password: &str) -> Result<Self> {
        Ok(Self {
            hash: Some(hasher.hash(password)?),
        })
    }

    /// Rebuild from a stored hash; an empty hash means unset.
    pub fn from_hash(hash: impl Into<String>) -> Self {
        let hash = hash.into();
        if hash.is_empty() {
            Self::unset()
        } else {
            Self { hash: Some(hash) }
        }
    }

    pub fn is_set(&self) -> bool {
        self.hash.is_some()
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    pub fn verify(&self, password: &str) -> bool {
        match &self.hash {
            Some(hash) => CredentialHasher::verify(password, hash),
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.hash = None;
    }

    pub fn to_canonical_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_canonical_json(bytes: &[u8]) -> Result<Self> {
        let record: CredentialRecord = serde_json::from_slice(bytes)?;
        Ok(match record.hash {
            Some(hash) => Self::from_hash(hash),
            None => Self::unset(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> CredentialHasher {
        CredentialHasher::new(HashCost::testing())
    }

    #[test]
    fn hashes_are_salted() {
        let h = hasher();
        let a = h.hash("Secret1!").unwrap();
        let b = h.hash("Secret1!").unwrap();
        assert_ne!(a, b);
        assert!(CredentialHasher::verify("Secret1!", &a));
        assert!(CredentialHasher::verify("Secret1!", &b));
        assert!(!CredentialHasher::verify("wrong", &a));
    }

    #[test]
    fn hash_embeds_cost() {
        let h = hasher().hash("pw").unwrap();
        assert!(h.starts_with("$argon2id$"));
        assert!(h.contains("m=8,t=1,p=1"));
    }

    #[test]
    fn empty_password_rejected() {
        assert!(matches!(hasher().hash(""), Err(StoreError::Input(_))));
    }

    #[test]
    fn verify_never_fails_on_garbage() {
        assert!(!CredentialHasher::verify("pw", ""));
        assert!(!CredentialHasher::verify("pw", "not-a-hash"));
        assert!(!CredentialHasher::verify("pw", "$2b$10$abcdefghijklmnopqrstuv"));
        assert!(!CredentialHasher::verify("", "$argon2id$v=19$m=8,t=1,p=1$AAAA$BBBB"));
    }

    #[test]
    fn invalid_cost_is_input_error() {
        let h = CredentialHasher::new(HashCost {
            memory_kib: 0,
            iterations: 0,
            parallelism: 0,
        });
        assert!(matches!(h.hash("pw"), Err(StoreError::Input(_))));
    }

    #[test]
    fn record_round_trip_and_redaction() {
        let record = CredentialRecord::from_plaintext(&hasher(), "Secret1!").unwrap();
        let json = record.to_canonical_json().unwrap();
        let restored = CredentialRecord::from_canonical_json(&json).unwrap();
        assert!(restored.verify("Secret1!"));
        assert!(!restored.verify("secret1!"));
        assert!(!format!("{record:?}").contains("argon2"));
    }

    #[test]
    fn unset_record() {
        let record = CredentialRecord::from_hash("");
        assert!(!record.is_set());
        assert!(!record.verify("anything"));
        let json = record.to_canonical_json().unwrap();
        assert_eq!(json, br#"{"hash":null}"#);
        let restored = CredentialRecord::from_canonical_json(br#"{"hash":""}"#).unwrap();
        assert!(!restored.is_set());
    }
}
