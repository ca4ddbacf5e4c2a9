//! Error-contained JSON key/value store.
//!
//! [`DurableStore`] is the only component that talks to a
//! [`StorageBackend`]. Nothing it exposes returns an error or panics: reads
//! fall back to the caller's default, writes report a `bool`, and every
//! underlying failure is logged here and goes no further.

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::app_response::AppResponse;
use crate::config::CoreConfig;
use crate::local_db_state::AppDbState;
use crate::storage_backend::{MemoryBackend, StorageBackend};

/// Logical collections persisted by the core. Each owns exactly one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    QrHistory,
    OfflineData,
    UserPreferences,
}

impl StoreKey {
    pub fn suffix(self) -> &'static str {
        match self {
            StoreKey::QrHistory => "qr_history",
            StoreKey::OfflineData => "offline_data",
            StoreKey::UserPreferences => "user_preferences",
        }
    }
}

pub struct DurableStore {
    backend: Box<dyn StorageBackend>,
    prefix: String,
}

impl DurableStore {
    pub fn new(backend: Box<dyn StorageBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    /// Volatile store with the default `qrloop_` namespace.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()), CoreConfig::default().key_prefix)
    }

    /// Opens the LMDB store described by `config`, falling back to a volatile
    /// backend when the database cannot be opened.
    pub fn open(config: &CoreConfig) -> Arc<Self> {
        let backend: Box<dyn StorageBackend> =
            match AppDbState::init_with_map_size(config.database_path.clone(), config.map_size) {
                Ok(state) => Box::new(state),
                Err(e) => {
                    warn!(
                        "Local database at {} unavailable ({}); continuing without persistence",
                        config.lmdb_dir(),
                        e
                    );
                    Box::new(MemoryBackend::new())
                }
            };
        info!("Durable store ready with key prefix '{}'", config.key_prefix);
        Arc::new(Self::new(backend, config.key_prefix.clone()))
    }

    pub fn key_for(&self, key: StoreKey) -> String {
        format!("{}{}", self.prefix, key.suffix())
    }

    /// Deserialized value under `key`, or `default` when the key is absent,
    /// the backend fails, or the stored JSON does not parse.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let raw = match self.backend.read(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return default,
            Err(e) => {
                warn!("Error reading from storage for key \"{}\": {}", key, e);
                return default;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("Discarding unreadable value for key \"{}\": {}", key, e);
                default
            }
        }
    }

    /// Like [`get`](Self::get) but reports what went wrong instead of
    /// substituting a default. `Ok(None)` means the key is absent.
    pub fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppResponse> {
        match self.backend.read(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Current value under `key` for a read-modify-write cycle.
    ///
    /// An unparseable value is copied to a quarantine key first so the
    /// caller's rewrite cannot destroy it. `None` means the caller must not
    /// write: the value could not be read, or could not be set aside.
    pub fn load_for_update<T: DeserializeOwned>(&self, key: &str, default: T) -> Option<T> {
        match self.try_get(key) {
            Ok(Some(value)) => Some(value),
            Ok(None) => Some(default),
            Err(AppResponse::SerializationError(e)) => {
                warn!("Unreadable value for key \"{}\": {}", key, e);
                self.quarantine(key).map(|_| default)
            }
            Err(e) => {
                warn!("Error reading from storage for key \"{}\": {}", key, e);
                None
            }
        }
    }

    /// Copies the raw value under `key` to `{key}_quarantine_{millis}` and
    /// returns that key.
    pub fn quarantine(&self, key: &str) -> Option<String> {
        let raw = match self.backend.read(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Error reading key \"{}\" for quarantine: {}", key, e);
                return None;
            }
        };

        let side_key = format!("{}_quarantine_{}", key, Utc::now().timestamp_millis());
        match self.backend.write(&side_key, &raw) {
            Ok(()) => {
                warn!("Moved unreadable value of \"{}\" to \"{}\"", key, side_key);
                Some(side_key)
            }
            Err(e) => {
                warn!("Error quarantining key \"{}\": {}", key, e);
                None
            }
        }
    }

    /// Serializes and writes `value`. On failure the previous value is kept.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!("Error serializing value for key \"{}\": {}", key, e);
                return false;
            }
        };

        match self.backend.write(key, &json) {
            Ok(()) => true,
            Err(e) => {
                warn!("Error writing to storage for key \"{}\": {}", key, e);
                false
            }
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        match self.backend.delete(key) {
            Ok(_) => true,
            Err(e) => {
                warn!("Error removing key \"{}\" from storage: {}", key, e);
                false
            }
        }
    }

    pub fn clear(&self) -> bool {
        match self.backend.clear() {
            Ok(count) => {
                info!("Cleared {} keys from storage", count);
                true
            }
            Err(e) => {
                warn!("Error clearing storage: {}", e);
                false
            }
        }
    }
}
