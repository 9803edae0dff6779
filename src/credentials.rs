use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, warn};

/// Durable key/value storage for client-side credential material.
///
/// Implementations never fail loudly: a value that cannot be read is absent, and a
/// value that cannot be written is logged and dropped.
pub trait TokenStorage: Send + Sync + Debug {
    fn load(&self, key: &str) -> Option<String>;
    fn store(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: &str) -> Self {
        let storage = Self::new();
        storage.store(key, value);
        storage
    }
}

impl TokenStorage for MemoryStorage {
    fn load(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn store(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }
}

/// Storage backed by a single JSON object file, e.g. `{"admin_token": "..."}`.
/// Survives restarts and is shared by every client pointed at the same path.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> BTreeMap<String, String> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), "ignoring unreadable token file: {e}");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), "failed to read token file: {e}");
                BTreeMap::new()
            }
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) {
        let bytes = match serde_json::to_vec_pretty(entries) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to serialize token file: {e}");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), "failed to create token directory: {e}");
                return;
            }
        }
        if let Err(e) = std::fs::write(&self.path, bytes) {
            warn!(path = %self.path.display(), "failed to write token file: {e}");
        }
    }
}

impl TokenStorage for FileStorage {
    fn load(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_all().remove(key)
    }

    fn store(&self, key: &str, value: &str) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_all();
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries);
    }

    fn remove(&self, key: &str) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_all();
        if entries.remove(key).is_some() {
            self.write_all(&entries);
        }
    }
}

/// Owner of the access token.
///
/// The token is read from storage on first access and cached afterwards; every
/// mutation writes through to storage.
#[derive(Debug)]
pub struct CredentialStore {
    storage: Arc<dyn TokenStorage>,
    key: String,
    // outer None: storage not consulted yet
    cached: RwLock<Option<Option<String>>>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn TokenStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            cached: RwLock::new(None),
        }
    }

    pub fn get_access_token(&self) -> Option<String> {
        if let Some(token) = self.cached.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return token.clone();
        }
        let mut cached = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        cached
            .get_or_insert_with(|| {
                let token = self.storage.load(&self.key);
                debug!(present = token.is_some(), "loaded access token from storage");
                token
            })
            .clone()
    }

    pub fn has_access_token(&self) -> bool {
        self.get_access_token().is_some()
    }

    pub fn set_access_token(&self, token: &str) {
        let mut cached = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        self.storage.store(&self.key, token);
        *cached = Some(Some(token.to_string()));
    }

    pub fn clear_access_token(&self) {
        let mut cached = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        self.storage.remove(&self.key);
        *cached = Some(None);
    }
}
