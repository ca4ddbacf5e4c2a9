//! Raw string storage seam beneath [`DurableStore`](crate::durable_store::DurableStore).
//!
//! Backends report every failure as an [`AppResponse`]; containment into
//! defaults happens one layer up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::app_response::AppResponse;

pub trait StorageBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, AppResponse>;
    fn write(&self, key: &str, value: &str) -> Result<(), AppResponse>;
    /// Returns whether the key existed.
    fn delete(&self, key: &str) -> Result<bool, AppResponse>;
    /// Returns how many keys were removed.
    fn clear(&self) -> Result<usize, AppResponse>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for Arc<B> {
    fn read(&self, key: &str) -> Result<Option<String>, AppResponse> {
        (**self).read(key)
    }

    fn write(&self, key: &str, value: &str) -> Result<(), AppResponse> {
        (**self).write(key, value)
    }

    fn delete(&self, key: &str) -> Result<bool, AppResponse> {
        (**self).delete(key)
    }

    fn clear(&self) -> Result<usize, AppResponse> {
        (**self).clear()
    }
}

/// Volatile backend used when no durable storage can be opened, and for tests.
///
/// `quota_bytes` bounds the sum of key and value lengths; a write that would
/// exceed it fails with [`AppResponse::QuotaExceeded`] and leaves the map as
/// it was.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Simulates storage disabled by the host: every call fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Writes a raw value bypassing quota checks, e.g. to plant corrupted JSON.
    pub fn insert_raw(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
    }

    pub fn keys(&self) -> Vec<String> {
        match self.entries.lock() {
            Ok(entries) => entries.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn check_available(&self) -> Result<(), AppResponse> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppResponse::DatabaseError("Storage is disabled".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, AppResponse> {
        self.entries
            .lock()
            .map_err(|_| AppResponse::DatabaseError("Memory storage lock poisoned".to_string()))
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, AppResponse> {
        self.check_available()?;
        Ok(self.lock()?.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), AppResponse> {
        self.check_available()?;
        let mut entries = self.lock()?;

        if let Some(quota) = self.quota_bytes {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = used + key.len() + value.len();
            if needed > quota {
                return Err(AppResponse::QuotaExceeded(format!(
                    "{needed} bytes exceeds quota of {quota} bytes"
                )));
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, AppResponse> {
        self.check_available()?;
        Ok(self.lock()?.remove(key).is_some())
    }

    fn clear(&self) -> Result<usize, AppResponse> {
        self.check_available()?;
        let mut entries = self.lock()?;
        let count = entries.len();
        entries.clear();
        Ok(count)
    }
}
