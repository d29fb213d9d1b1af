//! Credential storage backends.
//!
//! One slot, one fixed key. Every backend returns exactly what was stored;
//! an empty slot reads as absent.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::{debug, warn};

/// Fixed key of the credential slot. Used as the file name for the file
/// backend and as the account name for the keychain backend.
pub const TOKEN_KEY: &str = "glpi_manutencao_token";

/// Keychain service name
const SERVICE_NAME: &str = "glpi-manutencao";

/// Single-slot storage for the current bearer credential.
///
/// Implementations never fail outward: a storage error reads as "no
/// credential" and writes that fail are logged and dropped.
pub trait TokenStore: Send + Sync {
    /// Stored credential, or `None` when absent or unreadable
    fn get(&self) -> Option<String>;

    /// Replace any stored credential
    fn set(&self, token: &str);

    /// Remove the stored credential, if any
    fn clear(&self);
}

// ============================================================================
// File backend
// ============================================================================

/// Credential persisted as a single file in the cache directory.
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(TOKEN_KEY)
    }

    fn read(path: &Path) -> Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path).context("Failed to read token file")?;
        Ok(non_empty(contents))
    }

    fn write(path: &Path, token: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create token directory")?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600); // rw-------
        }
        let mut file = options.open(path).context("Failed to open token file")?;
        file.write_all(token.as_bytes())
            .context("Failed to write token file")?;

        // mode() only applies when the file is created
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .context("Failed to restrict token file permissions")?;
        }
        Ok(())
    }

    fn remove(path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path).context("Failed to remove token file")?;
        }
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Option<String> {
        match Self::read(&self.path()) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Token file unreadable, treating as logged out");
                None
            }
        }
    }

    fn set(&self, token: &str) {
        if let Err(e) = Self::write(&self.path(), token) {
            warn!(error = %e, "Failed to store token");
        }
    }

    fn clear(&self) {
        if let Err(e) = Self::remove(&self.path()) {
            warn!(error = %e, "Failed to clear token");
        }
    }
}

// ============================================================================
// Keychain backend
// ============================================================================

/// Credential kept in the OS keychain.
///
/// Holds a single entry for its whole life so that every call addresses the
/// same credential.
pub struct KeyringTokenStore {
    entry: Entry,
}

impl KeyringTokenStore {
    pub fn new() -> Result<Self> {
        let entry = Entry::new(SERVICE_NAME, TOKEN_KEY).context("Failed to create keyring entry")?;
        Ok(Self { entry })
    }
}

impl TokenStore for KeyringTokenStore {
    fn get(&self) -> Option<String> {
        match self.entry.get_password() {
            Ok(token) => non_empty(token),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read token from keychain");
                None
            }
        }
    }

    fn set(&self, token: &str) {
        if let Err(e) = self.entry.set_password(token) {
            warn!(error = %e, "Failed to store token in keychain");
        }
    }

    fn clear(&self) {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {}
            Err(e) => warn!(error = %e, "Failed to delete token from keychain"),
        }
    }
}

// ============================================================================
// In-process backends
// ============================================================================

/// Credential held in memory for the life of the process.
#[derive(Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        Self {
            slot: Mutex::new(Some(token.to_string())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<String> {
        match self.slot.lock() {
            Ok(slot) => slot.clone().and_then(non_empty),
            Err(_) => {
                debug!("Token slot poisoned");
                None
            }
        }
    }

    fn set(&self, token: &str) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(token.to_string());
        }
    }

    fn clear(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

/// Store for contexts with no persistent storage. Never holds a credential.
pub struct NoopTokenStore;

impl TokenStore for NoopTokenStore {
    fn get(&self) -> Option<String> {
        None
    }

    fn set(&self, _token: &str) {}

    fn clear(&self) {}
}

fn non_empty(token: String) -> Option<String> {
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_set_then_get() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.get(), None);

        store.set("a.b.c");
        assert_eq!(store.get().as_deref(), Some("a.b.c"));

        // Overwrites wholesale
        store.set("d.e.f");
        assert_eq!(store.get().as_deref(), Some("d.e.f"));
    }

    #[test]
    fn test_memory_store_clear_twice() {
        let store = MemoryTokenStore::with_token("a.b.c");
        store.clear();
        assert_eq!(store.get(), None);
        store.clear();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileTokenStore::new(dir.path().join("nested"));

        assert_eq!(store.get(), None);
        store.set("x.y.z");
        assert_eq!(store.get().as_deref(), Some("x.y.z"));
        assert!(store.path().ends_with(TOKEN_KEY));

        // A fresh handle on the same directory sees the same slot
        let reopened = FileTokenStore::new(dir.path().join("nested"));
        assert_eq!(reopened.get().as_deref(), Some("x.y.z"));
    }

    #[test]
    fn test_file_store_clear_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileTokenStore::new(dir.path().to_path_buf());

        store.clear();
        assert_eq!(store.get(), None);

        store.set("x.y.z");
        store.clear();
        assert_eq!(store.get(), None);
        store.clear();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_file_store_empty_file_reads_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileTokenStore::new(dir.path().to_path_buf());
        std::fs::write(store.path(), "").expect("write");
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_backends_return_value_exactly_as_stored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = FileTokenStore::new(dir.path().to_path_buf());
        let memory = MemoryTokenStore::new();
        let stores: [&dyn TokenStore; 2] = [&file, &memory];

        for store in stores {
            store.set(" a.b.c\n");
            assert_eq!(store.get().as_deref(), Some(" a.b.c\n"));

            store.set("");
            assert_eq!(store.get(), None);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileTokenStore::new(dir.path().to_path_buf());

        store.set("x.y.z");
        let mode = std::fs::metadata(store.path()).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        // Tightened on overwrite too
        std::fs::set_permissions(store.path(), std::fs::Permissions::from_mode(0o644)).expect("chmod");
        store.set("d.e.f");
        let mode = std::fs::metadata(store.path()).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.get().as_deref(), Some("d.e.f"));
    }

    #[test]
    fn test_keyring_store_set_then_get() {
        // In-memory credential backend; the platform keychain is not available in CI
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        let store = KeyringTokenStore::new().expect("keyring entry");

        assert_eq!(store.get(), None);
        store.set("a.b.c");
        assert_eq!(store.get().as_deref(), Some("a.b.c"));

        store.set("d.e.f");
        assert_eq!(store.get().as_deref(), Some("d.e.f"));

        store.clear();
        assert_eq!(store.get(), None);
        store.clear();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_file_store_unreadable_slot_is_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileTokenStore::new(dir.path().to_path_buf());
        // A directory where the token file should be cannot be read as text
        std::fs::create_dir_all(store.path()).expect("mkdir");
        assert_eq!(store.get(), None);
        // Writes fail quietly too
        store.set("x.y.z");
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_noop_store() {
        let store = NoopTokenStore;
        store.set("a.b.c");
        assert_eq!(store.get(), None);
        store.clear();
        assert_eq!(store.get(), None);
    }
}
