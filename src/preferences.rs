//! Persisted user preferences, merged over defaults on every read.

use std::sync::{Arc, Mutex};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::durable_store::{DurableStore, StoreKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPreferences {
    pub theme: String,
    #[serde(rename = "defaultQRSize")]
    pub default_qr_size: u32,
    pub default_error_correction: String,
    pub show_advanced_by_default: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            theme: "system".to_string(),
            default_qr_size: 300,
            default_error_correction: "M".to_string(),
            show_advanced_by_default: false,
        }
    }
}

/// Partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreferencesPatch {
    pub theme: Option<String>,
    #[serde(rename = "defaultQRSize")]
    pub default_qr_size: Option<u32>,
    pub default_error_correction: Option<String>,
    pub show_advanced_by_default: Option<bool>,
}

impl UserPreferences {
    pub fn merged(mut self, patch: PreferencesPatch) -> Self {
        if let Some(theme) = patch.theme {
            self.theme = theme;
        }
        if let Some(size) = patch.default_qr_size {
            self.default_qr_size = size;
        }
        if let Some(level) = patch.default_error_correction {
            self.default_error_correction = level;
        }
        if let Some(show) = patch.show_advanced_by_default {
            self.show_advanced_by_default = show;
        }
        self
    }
}

pub struct PreferencesStore {
    store: Arc<DurableStore>,
    key: String,
    write_lock: Mutex<()>,
}

impl PreferencesStore {
    pub fn new(store: Arc<DurableStore>) -> Self {
        let key = store.key_for(StoreKey::UserPreferences);
        Self {
            store,
            key,
            write_lock: Mutex::new(()),
        }
    }

    pub fn get(&self) -> UserPreferences {
        self.store.get(&self.key, UserPreferences::default())
    }

    pub fn update(&self, patch: PreferencesPatch) -> UserPreferences {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let updated = self.get().merged(patch);
        if !self.store.set(&self.key, &updated) {
            warn!("Preferences could not be persisted");
        }
        updated
    }
}
