//! Bounded, newest-first history of QR records.
//!
//! Order is insertion order, not timestamp order, so records created within
//! the same millisecond keep a stable position. Once the cap is reached the
//! oldest record is evicted on every `add`.

use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::config::MIN_HISTORY_LIMIT;
use crate::durable_store::{DurableStore, StoreKey};
use crate::local_db_model::{generate_id, now_millis, NewQrRecord, QrRecord, Stored, Versioned};

pub struct QrHistoryLedger {
    store: Arc<DurableStore>,
    key: String,
    limit: usize,
    write_lock: Mutex<()>,
}

impl QrHistoryLedger {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self::with_limit(store, MIN_HISTORY_LIMIT)
    }

    pub fn with_limit(store: Arc<DurableStore>, limit: usize) -> Self {
        let key = store.key_for(StoreKey::QrHistory);
        Self {
            store,
            key,
            limit: limit.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Stores a new record at the front of the history and returns it.
    ///
    /// A missing name becomes `"QR Code {n}"`, `n` being the history length
    /// before the insert plus one.
    ///
    /// When the stored history is unreadable and cannot be set aside, the
    /// record is returned without being persisted.
    pub fn add(&self, new_record: NewQrRecord) -> QrRecord {
        let _guard = self.lock();
        let loaded = self.load_for_update();
        let writable = loaded.is_some();
        let mut history = loaded.unwrap_or_default();

        let timestamp = now_millis();
        let mut id = generate_id(timestamp);
        while history.iter().any(|r| r.id == id) {
            id = generate_id(timestamp);
        }

        let name = match new_record.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => format!("QR Code {}", history.len() + 1),
        };

        let record = QrRecord {
            id,
            data: new_record.data,
            options: new_record.options,
            name,
            timestamp,
            scan_count: 0,
        };

        if !writable {
            return record;
        }

        history.insert(0, record.clone());
        if history.len() > self.limit {
            let evicted = history.len() - self.limit;
            history.truncate(self.limit);
            debug!("History cap {} reached, evicted {} record(s)", self.limit, evicted);
        }
        self.persist(&history);
        record
    }

    /// Full history, newest first, read back from storage on every call.
    pub fn get_all(&self) -> Vec<QrRecord> {
        self.load()
    }

    pub fn get(&self, id: &str) -> Option<QrRecord> {
        self.load().into_iter().find(|r| r.id == id)
    }

    /// Drops the record with `id`; unknown ids leave the history unchanged.
    pub fn remove(&self, id: &str) -> Vec<QrRecord> {
        let _guard = self.lock();
        let Some(mut history) = self.load_for_update() else {
            return self.load();
        };
        let before = history.len();
        history.retain(|r| r.id != id);
        if history.len() != before {
            self.persist(&history);
        }
        history
    }

    /// Increments the scan count of `id` in place.
    pub fn record_scan(&self, id: &str) -> Option<QrRecord> {
        let _guard = self.lock();
        let mut history = self.load_for_update()?;
        let record = history.iter_mut().find(|r| r.id == id)?;
        record.scan_count += 1;
        let updated = record.clone();
        self.persist(&history);
        Some(updated)
    }

    pub fn clear(&self) {
        let _guard = self.lock();
        self.persist(&[]);
    }

    fn load(&self) -> Vec<QrRecord> {
        self.store
            .get::<Option<Stored<Vec<QrRecord>>>>(&self.key, None)
            .map(Stored::into_data)
            .unwrap_or_default()
    }

    fn load_for_update(&self) -> Option<Vec<QrRecord>> {
        let stored = self
            .store
            .load_for_update::<Option<Stored<Vec<QrRecord>>>>(&self.key, None);
        if stored.is_none() {
            warn!("QR history left untouched: existing value could not be preserved");
        }
        stored.map(|s| s.map(Stored::into_data).unwrap_or_default())
    }

    fn persist(&self, history: &[QrRecord]) {
        if !self.store.set(&self.key, &Versioned::current(history)) {
            warn!("QR history could not be persisted; previous copy kept");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
