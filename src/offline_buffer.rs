//! Staging area for events that could not be written remotely.
//!
//! Both sub-lists live in one persisted [`OfflineData`] value. Saving never
//! fails from the caller's side; if the write itself fails the store logs it.
//!
//! `mark_synced` matches entries by timestamp. Two entries created in the
//! same millisecond are indistinguishable to it and are marked together;
//! [`OfflineEventBuffer::mark_synced_ids`] addresses single entries instead.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::analytics_model::{AnalyticsEvent, GenerationEvent, OfflineData, PendingEntry, PendingKind};
use crate::durable_store::{DurableStore, StoreKey};
use crate::local_db_model::{generate_id, now_millis, Stored, Versioned};

pub struct OfflineEventBuffer {
    store: Arc<DurableStore>,
    key: String,
    write_lock: Mutex<()>,
}

impl OfflineEventBuffer {
    pub fn new(store: Arc<DurableStore>) -> Self {
        let key = store.key_for(StoreKey::OfflineData);
        Self {
            store,
            key,
            write_lock: Mutex::new(()),
        }
    }

    /// Appends an unsynced generation event; returns the entry stored.
    pub fn save_qr_generation(&self, event: GenerationEvent) -> PendingEntry<GenerationEvent> {
        let entry = Self::pending(event);
        self.modify(|data| data.qr_generations.push(entry.clone()));
        debug!("Buffered QR generation {}", entry.id);
        entry
    }

    /// Appends an unsynced analytics event; returns the entry stored.
    pub fn save_analytics(&self, event: AnalyticsEvent) -> PendingEntry<AnalyticsEvent> {
        let entry = Self::pending(event);
        self.modify(|data| data.analytics.push(entry.clone()));
        debug!("Buffered analytics event {}", entry.id);
        entry
    }

    pub fn get_pending_sync(&self) -> OfflineData {
        self.load()
    }

    /// Flags every entry of `kind` whose timestamp is in `timestamps`.
    pub fn mark_synced(&self, kind: PendingKind, timestamps: &[DateTime<Utc>]) -> usize {
        let wanted: HashSet<&DateTime<Utc>> = timestamps.iter().collect();
        self.mark_where(kind, |timestamp, _| wanted.contains(timestamp))
    }

    /// Flags the entries of `kind` whose id is in `ids`.
    pub fn mark_synced_ids(&self, kind: PendingKind, ids: &[String]) -> usize {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.mark_where(kind, |_, id| wanted.contains(id))
    }

    /// Drops every synced entry; returns how many were removed.
    pub fn clear_synced(&self) -> usize {
        let mut removed = 0;
        let persisted = self.modify(|data| {
            let before = data.qr_generations.len() + data.analytics.len();
            data.qr_generations.retain(|e| !e.synced);
            data.analytics.retain(|e| !e.synced);
            removed = before - (data.qr_generations.len() + data.analytics.len());
        });
        if !persisted {
            return 0;
        }
        if removed > 0 {
            info!("Pruned {} synced offline entries", removed);
        }
        removed
    }

    fn mark_where<F>(&self, kind: PendingKind, matches: F) -> usize
    where
        F: Fn(&DateTime<Utc>, &str) -> bool,
    {
        let mut marked = 0;
        let persisted = self.modify(|data| match kind {
            PendingKind::QrGenerations => {
                for entry in data.qr_generations.iter_mut() {
                    if !entry.synced && matches(&entry.timestamp, &entry.id) {
                        entry.synced = true;
                        marked += 1;
                    }
                }
            }
            PendingKind::Analytics => {
                for entry in data.analytics.iter_mut() {
                    if !entry.synced && matches(&entry.timestamp, &entry.id) {
                        entry.synced = true;
                        marked += 1;
                    }
                }
            }
        });
        if persisted {
            marked
        } else {
            0
        }
    }

    fn pending<T>(event: T) -> PendingEntry<T> {
        let timestamp = now_millis();
        PendingEntry {
            id: generate_id(timestamp),
            event,
            timestamp,
            synced: false,
        }
    }

    /// Applies `change` to the stored buffer. Nothing is written when the
    /// current value can neither be read nor set aside.
    fn modify<F>(&self, change: F) -> bool
    where
        F: FnOnce(&mut OfflineData),
    {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(stored) = self
            .store
            .load_for_update::<Option<Stored<OfflineData>>>(&self.key, None)
        else {
            warn!("Offline buffer left untouched: existing value could not be preserved");
            return false;
        };
        let mut data = Self::decode(stored);
        change(&mut data);
        if !self.store.set(&self.key, &Versioned::current(&data)) {
            warn!("Offline buffer could not be persisted; previous copy kept");
            return false;
        }
        true
    }

    fn load(&self) -> OfflineData {
        Self::decode(self.store.get::<Option<Stored<OfflineData>>>(&self.key, None))
    }

    fn decode(stored: Option<Stored<OfflineData>>) -> OfflineData {
        let mut data = stored.map(Stored::into_data).unwrap_or_default();

        // Entries written before ids existed get one derived from their
        // timestamp and position.
        for (index, entry) in data.qr_generations.iter_mut().enumerate() {
            if entry.id.is_empty() {
                entry.id = legacy_id(entry.timestamp, index);
            }
        }
        for (index, entry) in data.analytics.iter_mut().enumerate() {
            if entry.id.is_empty() {
                entry.id = legacy_id(entry.timestamp, index);
            }
        }
        data
    }
}

fn legacy_id(timestamp: DateTime<Utc>, index: usize) -> String {
    format!("{}-legacy-{}", timestamp.timestamp_millis(), index)
}
