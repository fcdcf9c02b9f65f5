//! SHA-256 integrity digest over snapshot plaintexts.

use crate::error::{Result, StoreError};
use sha2::{Digest, Sha256};

/// Length of a rendered digest in hex characters.
pub const DIGEST_HEX_LEN: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityDigest;

impl IntegrityDigest {
    pub fn digest(data: &[u8]) -> Result<String> {
        if data.is_empty() {
            return Err(StoreError::input("digest input is empty"));
        }
        Ok(hex::encode(Sha256::digest(data)))
    }

    /// Hash the concatenation of `parts` without any separator.
    pub fn digest_concat(parts: &[&[u8]]) -> Result<String> {
        if parts.iter().all(|p| p.is_empty()) {
            return Err(StoreError::input("digest input is empty"));
        }
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Case-insensitive comparison; any malformed or mismatching input is `false`.
    pub fn verify(data: &[u8], expected_hex: &str) -> bool {
        if data.is_empty() {
            return false;
        }
        Self::verify_bytes(Sha256::digest(data).as_slice(), expected_hex)
    }

    pub fn verify_concat(parts: &[&[u8]], expected_hex: &str) -> bool {
        if parts.iter().all(|p| p.is_empty()) {
            return false;
        }
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Self::verify_bytes(hasher.finalize().as_slice(), expected_hex)
    }

    fn verify_bytes(actual: &[u8], expected_hex: &str) -> bool {
        let expected_hex = expected_hex.trim();
        if expected_hex.len() != DIGEST_HEX_LEN {
            return false;
        }
        // hex::decode accepts both cases
        let Ok(expected) = hex::decode(expected_hex) else {
            return false;
        };
        constant_time_eq(actual, &expected)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
