//! Filesystem permission restriction for persisted configuration.
//!
//! An [`AccessPolicy`] is a list of `{principal, rights}` rules; everyone not
//! named is denied. [`PosixAccessGuard`] maps the policy onto mode bits:
//! rights of the process identity become the owner bits, group and other
//! bits are always cleared, and administrators are served by root's
//! permission bypass. POSIX modes do not inherit from ancestor directories.

use crate::error::{Result, StoreError};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    /// The identity the process runs as.
    ProcessIdentity,
    Administrators,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rights {
    pub read: bool,
    pub write: bool,
    /// Directory traversal / listing.
    pub traverse: bool,
}

impl Rights {
    pub const FULL: Rights = Rights {
        read: true,
        write: true,
        traverse: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRule {
    pub principal: Principal,
    pub rights: Rights,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    rules: Vec<AccessRule>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::privileged()
    }
}

impl AccessPolicy {
    /// Full control for the process identity and administrators, nothing else.
    pub fn privileged() -> Self {
        Self {
            rules: vec![
                AccessRule {
                    principal: Principal::ProcessIdentity,
                    rights: Rights::FULL,
                },
                AccessRule {
                    principal: Principal::Administrators,
                    rights: Rights::FULL,
                },
            ],
        }
    }

    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }

    fn owner_rights(&self) -> Rights {
        self.rules
            .iter()
            .filter(|r| r.principal == Principal::ProcessIdentity)
            .fold(Rights::default(), |acc, r| Rights {
                read: acc.read || r.rights.read,
                write: acc.write || r.rights.write,
                traverse: acc.traverse || r.rights.traverse,
            })
    }

    pub fn file_mode(&self) -> u32 {
        let r = self.owner_rights();
        (if r.read { 0o400 } else { 0 }) | (if r.write { 0o200 } else { 0 })
    }

    pub fn dir_mode(&self) -> u32 {
        let r = self.owner_rights();
        self.file_mode() | (if r.traverse { 0o100 } else { 0 })
    }
}

pub trait AccessGuard: Send + Sync {
    fn protect_file(&self, path: &Path) -> Result<()>;
    fn protect_directory(&self, path: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct PosixAccessGuard {
    policy: AccessPolicy,
}

impl PosixAccessGuard {
    pub fn new(policy: AccessPolicy) -> Self {
        Self { policy }
    }
}

impl AccessGuard for PosixAccessGuard {
    fn protect_file(&self, path: &Path) -> Result<()> {
        set_mode(path, self.policy.file_mode())
    }

    fn protect_directory(&self, path: &Path) -> Result<()> {
        set_mode(path, self.policy.dir_mode())
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        warn!(path = %path.display(), "cannot restrict permissions: {e}");
        StoreError::Permission {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    })?;
    debug!(path = %path.display(), mode = %format!("{mode:o}"), "permissions restricted");
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(path: &Path, _mode: u32) -> Result<()> {
    warn!(path = %path.display(), "mode-bit protection unavailable on this platform");
    Ok(())
}

pub(crate) fn restrict_file(path: &Path) -> Result<()> {
    set_mode(path, AccessPolicy::privileged().file_mode())
}

pub(crate) fn restrict_dir(path: &Path) -> Result<()> {
    set_mode(path, AccessPolicy::privileged().dir_mode())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privileged_policy_modes() {
        let policy = AccessPolicy::privileged();
        assert_eq!(policy.file_mode(), 0o600);
        assert_eq!(policy.dir_mode(), 0o700);
        assert_eq!(policy.rules().len(), 2);
    }

    #[test]
    fn read_only_owner() {
        let policy = AccessPolicy {
            rules: vec![AccessRule {
                principal: Principal::ProcessIdentity,
                rights: Rights {
                    read: true,
                    write: false,
                    traverse: true,
                },
            }],
        };
        assert_eq!(policy.file_mode(), 0o400);
        assert_eq!(policy.dir_mode(), 0o500);
    }

    #[test]
    fn administrators_alone_grant_no_mode_bits() {
        let policy = AccessPolicy {
            rules: vec![AccessRule {
                principal: Principal::Administrators,
                rights: Rights::FULL,
            }],
        };
        assert_eq!(policy.file_mode(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn guard_applies_modes() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.json");
        std::fs::write(&file, b"{}").unwrap();
        let guard = PosixAccessGuard::default();
        guard.protect_file(&file).unwrap();
        guard.protect_directory(dir.path()).unwrap();
        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&file), 0o600);
        assert_eq!(mode(dir.path()), 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn missing_path_is_permission_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PosixAccessGuard::default()
            .protect_file(&dir.path().join("absent"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Permission { .. }));
    }
}
