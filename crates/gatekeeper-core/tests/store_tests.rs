//! End-to-end tests for the persisted configuration store.
//!
//! Tests cover:
//!  1. Save → fresh instance round trip
//!  2. Deny-by-default on first run
//!  3. Single-byte tampering of digest and both ciphertexts
//!  4. Blob swapping between snapshots
//!  5. Structurally invalid and missing-key snapshots
//!  6. Readers racing a writer

use base64::{engine::general_purpose, Engine as _};
use gatekeeper_core::access_guard::PosixAccessGuard;
use gatekeeper_core::credential::{CredentialHasher, HashCost};
use gatekeeper_core::error::ErrorKind;
use gatekeeper_core::key_protector::{FileKeySource, LocalKeyProtector, ProtectionScope};
use gatekeeper_core::snapshot::PersistedSnapshot;
use gatekeeper_core::{DomainSet, LoadOutcome, SecureConfigStore};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

/// Helper: open a store over `<dir>/config.json` with file-backed keys in `<dir>/keys`.
fn open_store(dir: &Path, scope: ProtectionScope) -> SecureConfigStore {
    SecureConfigStore::open(
        dir.join("config.json"),
        scope,
        Arc::new(LocalKeyProtector::new(FileKeySource::in_dir(dir.join("keys")))),
        Arc::new(PosixAccessGuard::default()),
        CredentialHasher::new(HashCost::testing()),
    )
}

/// Helper: persist the reference configuration and return the snapshot path.
fn save_reference(dir: &Path) -> PathBuf {
    let store = open_store(dir, ProtectionScope::MachineWide);
    store.add_domain("Example.com").unwrap();
    store.add_domain("TEST.org").unwrap();
    store.set_password("Secret1!").unwrap();
    store.save().unwrap();
    store.path().to_path_buf()
}

fn read_snapshot(path: &Path) -> PersistedSnapshot {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

fn write_snapshot(path: &Path, snapshot: &PersistedSnapshot) {
    fs::write(path, serde_json::to_vec_pretty(snapshot).unwrap()).unwrap();
}

fn flip_blob_byte(blob: &str, index: usize) -> String {
    let mut raw = general_purpose::STANDARD.decode(blob).unwrap();
    let i = index % raw.len();
    raw[i] ^= 0x01;
    general_purpose::STANDARD.encode(raw)
}

fn assert_secure_defaults(store: &SecureConfigStore) {
    assert!(!store.initial_load().is_verified());
    assert!(!store.initial_load().diagnostic().unwrap_or_default().is_empty());
    assert!(store.get_whitelist().is_empty());
    assert!(!store.is_password_set());
    assert!(!store.verify_password("Secret1!"));
}

// ─── Test 1: Round trip ─────────────────────────────────────────────────────

#[test]
fn test_round_trip_through_new_instance() {
    let dir = tempdir().unwrap();
    save_reference(dir.path());

    let reopened = open_store(dir.path(), ProtectionScope::MachineWide);
    assert_eq!(reopened.initial_load(), &LoadOutcome::Verified);
    assert_eq!(
        reopened.get_whitelist().list(),
        vec!["example.com".to_string(), "test.org".to_string()]
    );
    assert!(reopened.verify_password("Secret1!"));
    assert!(!reopened.verify_password("wrong"));
    assert!(reopened.is_domain_allowed("EXAMPLE.COM"));
}

#[test]
fn test_identity_scope_round_trip() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path(), ProtectionScope::IdentityScoped);
    store
        .update_whitelist(DomainSet::from_domains(["a.example", "b.example"]).unwrap());
    store.save().unwrap();

    let reopened = open_store(dir.path(), ProtectionScope::IdentityScoped);
    assert!(reopened.initial_load().is_verified());
    assert_eq!(reopened.get_whitelist().count(), 2);
    assert!(!reopened.is_password_set());

    // same file read under the other scope is rejected wholesale
    let other = open_store(dir.path(), ProtectionScope::MachineWide);
    match other.initial_load() {
        LoadOutcome::SecureDefaults { kind, diagnostic } => {
            assert_eq!(*kind, ErrorKind::Decryption);
            assert!(diagnostic.contains("domains"));
        }
        outcome => panic!("unexpected {outcome:?}"),
    }
}

#[test]
fn test_snapshot_holds_no_plaintext() {
    let dir = tempdir().unwrap();
    let path = save_reference(dir.path());
    let text = fs::read_to_string(&path).unwrap();
    assert!(!text.contains("example.com"));
    assert!(!text.contains("argon2"));
    assert!(!text.contains("Secret1!"));
    let snapshot = read_snapshot(&path);
    assert_eq!(snapshot.schema_version, 1);
    assert_eq!(snapshot.integrity_digest_hex.len(), 64);
    assert!(snapshot.saved_at.is_some());
}

#[cfg(unix)]
#[test]
fn test_snapshot_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;
    let dir = tempdir().unwrap();
    let path = save_reference(dir.path());
    let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);
}

// ─── Test 2: Deny by default ────────────────────────────────────────────────

#[test]
fn test_missing_file_is_deny_by_default() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path(), ProtectionScope::MachineWide);
    assert!(store.get_whitelist().is_empty());
    assert!(!store.is_password_set());
    match store.initial_load() {
        LoadOutcome::SecureDefaults { kind, .. } => assert_eq!(*kind, ErrorKind::NotFound),
        outcome => panic!("unexpected {outcome:?}"),
    }
}

// ─── Test 3: Tampering ──────────────────────────────────────────────────────

#[test]
fn test_flipped_digest_byte_clears_everything() {
    let dir = tempdir().unwrap();
    let path = save_reference(dir.path());
    let original = read_snapshot(&path);

    for i in [0, 17, 63] {
        let mut snapshot = original.clone();
        let mut bytes = snapshot.integrity_digest_hex.into_bytes();
        bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
        snapshot.integrity_digest_hex = String::from_utf8(bytes).unwrap();
        write_snapshot(&path, &snapshot);

        let store = open_store(dir.path(), ProtectionScope::MachineWide);
        assert_secure_defaults(&store);
        assert_eq!(
            store.initial_load().diagnostic(),
            Some("integrity check failed")
        );
    }
}

#[test]
fn test_uppercase_digest_still_verifies() {
    let dir = tempdir().unwrap();
    let path = save_reference(dir.path());
    let mut snapshot = read_snapshot(&path);
    snapshot.integrity_digest_hex = snapshot.integrity_digest_hex.to_uppercase();
    write_snapshot(&path, &snapshot);
    let store = open_store(dir.path(), ProtectionScope::MachineWide);
    assert!(store.initial_load().is_verified());
}

#[test]
fn test_flipped_ciphertext_byte_clears_everything() {
    let dir = tempdir().unwrap();
    let path = save_reference(dir.path());
    let original = read_snapshot(&path);

    for i in [0, 1, 5, 30, 999] {
        let mut snapshot = original.clone();
        snapshot.encrypted_domains_blob = flip_blob_byte(&snapshot.encrypted_domains_blob, i);
        write_snapshot(&path, &snapshot);
        let store = open_store(dir.path(), ProtectionScope::MachineWide);
        assert_secure_defaults(&store);
        assert!(store.initial_load().diagnostic().unwrap().contains("domains"));

        let mut snapshot = original.clone();
        snapshot.encrypted_credential_blob =
            flip_blob_byte(&snapshot.encrypted_credential_blob, i);
        write_snapshot(&path, &snapshot);
        let store = open_store(dir.path(), ProtectionScope::MachineWide);
        assert_secure_defaults(&store);
        assert!(store.initial_load().diagnostic().unwrap().contains("credential"));
    }
}

#[test]
fn test_garbled_encoding_clears_everything() {
    let dir = tempdir().unwrap();
    let path = save_reference(dir.path());
    let mut snapshot = read_snapshot(&path);
    snapshot.encrypted_credential_blob = "%%%not-base64%%%".into();
    write_snapshot(&path, &snapshot);
    let store = open_store(dir.path(), ProtectionScope::MachineWide);
    assert_secure_defaults(&store);
    match store.initial_load() {
        LoadOutcome::SecureDefaults { kind, .. } => assert_eq!(*kind, ErrorKind::Format),
        outcome => panic!("unexpected {outcome:?}"),
    }
}

// ─── Test 4: Blob swapping ──────────────────────────────────────────────────

#[test]
fn test_swapped_domains_blob_fails_integrity() {
    let dir = tempdir().unwrap();
    let path = save_reference(dir.path());
    let first = read_snapshot(&path);

    let store = open_store(dir.path(), ProtectionScope::MachineWide);
    store.add_domain("evil.example").unwrap();
    store.save().unwrap();
    let second = read_snapshot(&path);

    // valid ciphertext from another save, stale digest
    let mut spliced = first.clone();
    spliced.encrypted_domains_blob = second.encrypted_domains_blob.clone();
    write_snapshot(&path, &spliced);

    let store = open_store(dir.path(), ProtectionScope::MachineWide);
    assert_secure_defaults(&store);
    assert_eq!(
        store.initial_load().diagnostic(),
        Some("integrity check failed")
    );
}

// ─── Test 5: Unreadable snapshots ───────────────────────────────────────────

#[test]
fn test_invalid_structure_falls_back() {
    let dir = tempdir().unwrap();
    let path = save_reference(dir.path());
    fs::write(&path, b"{\"encryptedDomainsBlob\": 42}").unwrap();
    let store = open_store(dir.path(), ProtectionScope::MachineWide);
    assert_secure_defaults(&store);
    assert!(store
        .initial_load()
        .diagnostic()
        .unwrap()
        .starts_with("failed to deserialize"));
}

#[test]
fn test_missing_key_falls_back() {
    let dir = tempdir().unwrap();
    save_reference(dir.path());
    fs::remove_dir_all(dir.path().join("keys")).unwrap();
    let store = open_store(dir.path(), ProtectionScope::MachineWide);
    assert_secure_defaults(&store);
    match store.initial_load() {
        LoadOutcome::SecureDefaults { kind, .. } => assert_eq!(*kind, ErrorKind::Decryption),
        outcome => panic!("unexpected {outcome:?}"),
    }
}

#[test]
fn test_reload_after_corruption_clears_live_state() {
    let dir = tempdir().unwrap();
    let path = save_reference(dir.path());
    let store = open_store(dir.path(), ProtectionScope::MachineWide);
    assert!(store.is_password_set());

    fs::write(&path, b"garbage").unwrap();
    let outcome = store.reload();
    assert!(!outcome.is_verified());
    assert!(store.get_whitelist().is_empty());
    assert!(!store.is_password_set());

    // saving from defaults repairs the file
    store.save().unwrap();
    assert!(store.reload().is_verified());
}

// ─── Test 6: Concurrency ────────────────────────────────────────────────────

#[test]
fn test_readers_never_see_partial_updates() {
    let dir = tempdir().unwrap();
    let store = Arc::new(open_store(dir.path(), ProtectionScope::MachineWide));
    let set_a = DomainSet::from_domains((0..40).map(|i| format!("a{i}.example"))).unwrap();
    let set_b = DomainSet::from_domains((0..25).map(|i| format!("b{i}.example"))).unwrap();
    store.update_whitelist(set_a.clone());

    let writer = {
        let store = store.clone();
        let (set_a, set_b) = (set_a.clone(), set_b.clone());
        thread::spawn(move || {
            for round in 0..10 {
                let next = if round % 2 == 0 { &set_b } else { &set_a };
                store.update_whitelist(next.clone());
                store.save().unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let (set_a, set_b) = (set_a.clone(), set_b.clone());
            thread::spawn(move || {
                for _ in 0..200 {
                    let seen = store.get_whitelist();
                    assert!(seen == set_a || seen == set_b, "observed a mixed allow-list");
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let reopened = open_store(dir.path(), ProtectionScope::MachineWide);
    assert_eq!(reopened.get_whitelist(), set_a);
}
