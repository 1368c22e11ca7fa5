//! Local session persistence
//!
//! The Telegram session has no SDK backing, so it lives in a single local
//! key-value slot and is restored from there on startup. Storage is a thin
//! trait so the manager can run against a file-backed store in the app and
//! an in-memory store in tests.

use super::types::{AuthError, AuthProvider, AuthUser};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Slot holding the JSON-serialized Telegram session
pub const TELEGRAM_SESSION_KEY: &str = "telegram_user";
const PENDING_REDIRECT_KEY: &str = "pending_redirect";

const APP_DIR_NAME: &str = "Parlor";

// Simple obfuscation key - keeps the session file from being casually
// readable, nothing more
const OBFUSCATION_KEY: &[u8] = b"ParlorAuthSlot2025";

/// Redirect markers older than this are ignored on startup
const PENDING_REDIRECT_MAX_AGE_MINUTES: i64 = 10;

/// Synchronous single-slot key-value persistence
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AuthError>;
    fn remove(&self, key: &str) -> Result<(), AuthError>;
}

/// File-backed store: one obfuscated file per key under the app data dir
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new() -> Result<Self, AuthError> {
        let dir = dirs::data_local_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .ok_or_else(|| {
                AuthError::Storage("Could not determine data directory".to_string())
            })?;
        Self::with_dir(dir)
    }

    /// Use an explicit directory instead of the platform data dir.
    pub fn with_dir(dir: PathBuf) -> Result<Self, AuthError> {
        std::fs::create_dir_all(&dir).map_err(|e| {
            AuthError::Storage(format!("Failed to create data directory: {}", e))
        })?;
        debug!("File store initialized at {}", dir.display());
        Ok(Self { dir })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.dat", key))
    }

    /// XOR obfuscation; applying it twice recovers the input
    fn obfuscate(data: &[u8]) -> Vec<u8> {
        data.iter()
            .enumerate()
            .map(|(i, &byte)| byte ^ OBFUSCATION_KEY[i % OBFUSCATION_KEY.len()])
            .collect()
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let encoded = std::fs::read_to_string(&path)
            .map_err(|e| AuthError::Storage(format!("Failed to read {}: {}", key, e)))?;

        // An undecodable slot is treated as absent rather than fatal; the
        // file is removed so the next read starts clean.
        let obfuscated = match BASE64.decode(encoded.trim()) {
            Ok(data) => data,
            Err(e) => {
                warn!("Slot {} is not valid base64 ({}), discarding", key, e);
                let _ = std::fs::remove_file(&path);
                return Ok(None);
            }
        };
        match String::from_utf8(Self::obfuscate(&obfuscated)) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Slot {} is not valid utf-8 ({}), discarding", key, e);
                let _ = std::fs::remove_file(&path);
                Ok(None)
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        let encoded = BASE64.encode(Self::obfuscate(value.as_bytes()));
        std::fs::write(self.key_path(key), encoded)
            .map_err(|e| AuthError::Storage(format!("Failed to write {}: {}", key, e)))
    }

    fn remove(&self, key: &str) -> Result<(), AuthError> {
        let path = self.key_path(key);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| AuthError::Storage(format!("Failed to delete {}: {}", key, e)))?;
        }
        Ok(())
    }
}

/// In-memory store for tests and headless embedders.
///
/// Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MemoryKeyValueStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AuthError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Marker saved just before ceding control to a redirect navigation, so
/// the next startup knows a sign-in may be completing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRedirect {
    pub provider: AuthProvider,
    pub scopes: Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl PendingRedirect {
    pub fn new(provider: AuthProvider, scopes: Vec<String>) -> Self {
        Self {
            provider,
            scopes,
            started_at: Utc::now(),
        }
    }

    /// Whether the marker is too old to still correspond to a live redirect
    pub fn is_stale(&self) -> bool {
        Utc::now() - self.started_at > Duration::minutes(PENDING_REDIRECT_MAX_AGE_MINUTES)
    }
}

/// Typed access to the locally-synthesized session and redirect marker
pub struct SessionStore {
    store: Box<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    /// Load the persisted session, discarding a corrupt slot.
    pub fn load_session(&self) -> Result<Option<AuthUser>, AuthError> {
        let json = match self.store.get(TELEGRAM_SESSION_KEY)? {
            Some(json) => json,
            None => return Ok(None),
        };
        match serde_json::from_str::<AuthUser>(&json) {
            Ok(user) => {
                debug!("Loaded persisted session {}", user.id);
                Ok(Some(user))
            }
            Err(e) => {
                warn!("Discarding corrupt persisted session: {}", e);
                let _ = self.store.remove(TELEGRAM_SESSION_KEY);
                Ok(None)
            }
        }
    }

    pub fn store_session(&self, user: &AuthUser) -> Result<(), AuthError> {
        let json = serde_json::to_string(user)
            .map_err(|e| AuthError::Storage(format!("Failed to serialize session: {}", e)))?;
        self.store.set(TELEGRAM_SESSION_KEY, &json)?;
        info!("Persisted {} session {}", user.provider, user.id);
        Ok(())
    }

    pub fn clear_session(&self) -> Result<(), AuthError> {
        self.store.remove(TELEGRAM_SESSION_KEY)?;
        info!("Cleared persisted session");
        Ok(())
    }

    pub fn save_pending_redirect(&self, pending: &PendingRedirect) -> Result<(), AuthError> {
        let json = serde_json::to_string(pending).map_err(|e| {
            AuthError::Storage(format!("Failed to serialize redirect marker: {}", e))
        })?;
        self.store.set(PENDING_REDIRECT_KEY, &json)?;
        debug!("Saved pending {} redirect marker", pending.provider);
        Ok(())
    }

    /// Load the pending-redirect marker, dropping stale or corrupt entries.
    pub fn load_pending_redirect(&self) -> Result<Option<PendingRedirect>, AuthError> {
        let json = match self.store.get(PENDING_REDIRECT_KEY)? {
            Some(json) => json,
            None => return Ok(None),
        };
        let pending = match serde_json::from_str::<PendingRedirect>(&json) {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Discarding corrupt redirect marker: {}", e);
                let _ = self.store.remove(PENDING_REDIRECT_KEY);
                return Ok(None);
            }
        };
        if pending.is_stale() {
            info!(
                "Ignoring stale {} redirect marker from {}",
                pending.provider, pending.started_at
            );
            let _ = self.store.remove(PENDING_REDIRECT_KEY);
            return Ok(None);
        }
        Ok(Some(pending))
    }

    pub fn clear_pending_redirect(&self) -> Result<(), AuthError> {
        self.store.remove(PENDING_REDIRECT_KEY)
    }
}
