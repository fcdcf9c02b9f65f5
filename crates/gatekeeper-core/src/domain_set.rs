//! Normalized allow-list of domains.
//!
//! Members are trimmed and lowercased before insertion, so the set never
//! holds two case variants of the same domain and always enumerates in
//! ascending order. Writes are strict (an empty domain is an error) while
//! lookups and removals are permissive.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Trim surrounding whitespace and fold to lowercase.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().to_lowercase()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct DomainSet {
    domains: BTreeSet<String>,
}

impl DomainSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from raw domains, rejecting any that normalize to empty.
    pub fn from_domains<I, S>(domains: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for domain in domains {
            set.add(domain.as_ref())?;
        }
        Ok(set)
    }

    /// Returns `Ok(true)` if the domain was newly inserted.
    pub fn add(&mut self, domain: &str) -> Result<bool> {
        let normalized = normalize_domain(domain);
        if normalized.is_empty() {
            return Err(StoreError::input("domain must not be empty"));
        }
        Ok(self.domains.insert(normalized))
    }

    pub fn remove(&mut self, domain: &str) -> bool {
        let normalized = normalize_domain(domain);
        if normalized.is_empty() {
            return false;
        }
        self.domains.remove(&normalized)
    }

    pub fn contains(&self, domain: &str) -> bool {
        let normalized = normalize_domain(domain);
        !normalized.is_empty() && self.domains.contains(&normalized)
    }

    /// Fresh ascending copy of the members.
    pub fn list(&self) -> Vec<String> {
        self.domains.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn count(&self) -> usize {
        self.domains.len()
    }

    pub fn clear(&mut self) {
        self.domains.clear();
    }

    /// Canonical JSON form: an ascending array of normalized domains.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.domains)?)
    }

    pub fn from_canonical_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl TryFrom<Vec<String>> for DomainSet {
    type Error = StoreError;

    fn try_from(domains: Vec<String>) -> Result<Self> {
        Self::from_domains(domains)
    }
}

impl From<DomainSet> for Vec<String> {
    fn from(set: DomainSet) -> Self {
        set.domains.into_iter().collect()
    }
}
