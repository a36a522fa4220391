//! Persistent storage of the bearer token and principal-kind tag.
//!
//! Both fields are written in a single storage operation, so a reader never
//! observes one without the other. Any read failure is reported as "absent":
//! a broken store leaves the client logged out, never logged in.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::{PortalError, Result};
use crate::principal::PrincipalKind;

/// Storage key holding the opaque bearer token.
pub const TOKEN_KEY: &str = "token";
/// Storage key holding the principal-kind tag (`"donor"` | `"admin"`).
pub const KIND_KEY: &str = "userType";

/// Minimal persistent key/value surface the credential store is built on.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// Write all entries in one operation.
    fn set_all(&self, entries: &[(&str, &str)]) -> Result<()>;
    /// Remove all keys in one operation.
    fn remove_all(&self, keys: &[&str]) -> Result<()>;
}

// ─────────────────────────────────────────────────────────
// Storage backends
// ─────────────────────────────────────────────────────────

/// Process-local storage; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut map = self.entries.lock();
        for (key, value) in entries {
            map.insert((*key).to_string(), (*value).to_string());
        }
        Ok(())
    }

    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        let mut map = self.entries.lock();
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

/// A flat JSON object on disk that survives restarts.
///
/// Writes go to a sibling temp file which is then renamed over the target.
/// All file access is blocking and runs inline on the calling task.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    // Serialises read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<HashMap<String, String>> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.read_map()?.remove(key))
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<()> {
        let _guard = self.lock.lock();
        // A corrupt file is replaced rather than blocking new credentials.
        let mut map = self.read_map().unwrap_or_default();
        for (key, value) in entries {
            map.insert((*key).to_string(), (*value).to_string());
        }
        self.write_map(&map)
    }

    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        let _guard = self.lock.lock();
        let mut map = self.read_map().unwrap_or_default();
        for key in keys {
            map.remove(*key);
        }
        self.write_map(&map)
    }
}

// ─────────────────────────────────────────────────────────
// Credential store
// ─────────────────────────────────────────────────────────

/// A bearer token together with the kind of principal it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub kind: PrincipalKind,
}

#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn KeyValueStorage>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    /// Store backed by process memory only.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    pub fn save(&self, token: &str, kind: PrincipalKind) -> Result<()> {
        if token.is_empty() {
            return Err(PortalError::Storage("refusing to store an empty token".into()));
        }
        self.storage
            .set_all(&[(TOKEN_KEY, token), (KIND_KEY, kind.as_str())])
    }

    /// Read the stored pair; `None` when absent, partial, corrupt or unreadable.
    pub fn load(&self) -> Option<Credentials> {
        let (token, tag) = match (self.storage.get(TOKEN_KEY), self.storage.get(KIND_KEY)) {
            (Ok(token), Ok(tag)) => (token, tag),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Credential storage unavailable, treating as logged out: {e}");
                return None;
            }
        };

        match (token, tag) {
            (None, None) => None,
            (Some(token), Some(tag)) if !token.is_empty() => match PrincipalKind::from_tag(&tag) {
                Some(kind) => Some(Credentials { token, kind }),
                None => {
                    warn!("Discarding credentials with unknown kind tag {tag:?}");
                    self.discard_corrupt();
                    None
                }
            },
            _ => {
                warn!("Discarding incomplete credential pair");
                self.discard_corrupt();
                None
            }
        }
    }

    /// The stored token, if a complete pair is present.
    pub fn token(&self) -> Option<String> {
        self.load().map(|c| c.token)
    }

    pub fn clear(&self) -> Result<()> {
        self.storage.remove_all(&[TOKEN_KEY, KIND_KEY])
    }

    fn discard_corrupt(&self) {
        if let Err(e) = self.clear() {
            debug!("Could not clear corrupt credentials: {e}");
        }
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Storage whose every operation fails, as when the backing medium is gone.
    pub(crate) struct UnavailableStorage;

    impl KeyValueStorage for UnavailableStorage {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(PortalError::Storage("unavailable".into()))
        }

        fn set_all(&self, _entries: &[(&str, &str)]) -> Result<()> {
            Err(PortalError::Storage("unavailable".into()))
        }

        fn remove_all(&self, _keys: &[&str]) -> Result<()> {
            Err(PortalError::Storage("unavailable".into()))
        }
    }

    #[test]
    fn save_then_load() {
        let store = CredentialStore::in_memory();
        store.save("tok-1", PrincipalKind::Admin).unwrap();
        assert_eq!(
            store.load(),
            Some(Credentials {
                token: "tok-1".into(),
                kind: PrincipalKind::Admin,
            })
        );
        assert_eq!(store.token().as_deref(), Some("tok-1"));
    }

    #[test]
    fn clear_removes_both_fields() {
        let storage = Arc::new(MemoryStorage::new());
        let store = CredentialStore::new(storage.clone());
        store.save("tok", PrincipalKind::Donor).unwrap();
        store.clear().unwrap();

        assert_eq!(store.load(), None);
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(storage.get(KIND_KEY).unwrap(), None);
    }

    #[test]
    fn half_written_pair_is_absent_and_discarded() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_all(&[(TOKEN_KEY, "orphan")]).unwrap();
        let store = CredentialStore::new(storage.clone());

        assert_eq!(store.load(), None);
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn unknown_kind_tag_is_absent_and_discarded() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set_all(&[(TOKEN_KEY, "tok"), (KIND_KEY, "superuser")])
            .unwrap();
        let store = CredentialStore::new(storage.clone());

        assert_eq!(store.load(), None);
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(storage.get(KIND_KEY).unwrap(), None);
    }

    #[test]
    fn unavailable_storage_fails_open_to_absent() {
        let store = CredentialStore::new(Arc::new(UnavailableStorage));
        assert_eq!(store.load(), None);
        assert!(store.save("tok", PrincipalKind::Donor).is_err());
    }

    #[test]
    fn file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = CredentialStore::new(Arc::new(FileStorage::new(&path)));
        store.save("persisted", PrincipalKind::Donor).unwrap();
        drop(store);

        let storage = FileStorage::new(&path);
        assert_eq!(storage.path(), path.as_path());
        let reopened = CredentialStore::new(Arc::new(storage));
        let creds = reopened.load().unwrap();
        assert_eq!(creds.token, "persisted");
        assert_eq!(creds.kind, PrincipalKind::Donor);

        reopened.clear().unwrap();
        assert_eq!(
            CredentialStore::new(Arc::new(FileStorage::new(&path))).load(),
            None
        );
    }

    #[test]
    fn corrupt_file_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, b"{not json").unwrap();

        let store = CredentialStore::new(Arc::new(FileStorage::new(&path)));
        assert_eq!(store.load(), None);

        store.save("fresh", PrincipalKind::Admin).unwrap();
        assert_eq!(store.token().as_deref(), Some("fresh"));
    }
}
