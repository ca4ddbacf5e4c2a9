//! Runtime configuration for the core.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. Values outside their supported range are clamped by
//! [`CoreConfig::validated`] rather than rejected.

use std::path::Path;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::app_response::AppResponse;

pub const MIN_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 100;
pub const MIN_PROBE_TIMEOUT_MS: u64 = 3_000;
pub const MAX_PROBE_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Database name; the LMDB directory is `{database_path}.lmdb`.
    pub database_path: String,
    /// LMDB map size in bytes. Writes beyond it fail as quota exceeded.
    pub map_size: usize,
    /// Namespace prepended to every storage key.
    pub key_prefix: String,
    pub history_limit: usize,
    pub probe_timeout_ms: u64,
    pub default_user_agent: String,
    pub default_page: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: "qrloop".to_string(),
            map_size: 10 * 1024 * 1024,
            key_prefix: "qrloop_".to_string(),
            history_limit: MIN_HISTORY_LIMIT,
            probe_timeout_ms: 5_000,
            default_user_agent: "unknown".to_string(),
            default_page: "/".to_string(),
        }
    }
}

impl CoreConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, AppResponse> {
        let config: CoreConfig = toml::from_str(raw)?;
        Ok(config.validated())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AppResponse> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Clamps out-of-range values into their supported ranges.
    pub fn validated(mut self) -> Self {
        let limit = self.history_limit.clamp(MIN_HISTORY_LIMIT, MAX_HISTORY_LIMIT);
        if limit != self.history_limit {
            warn!(
                "history_limit {} out of range, using {}",
                self.history_limit, limit
            );
            self.history_limit = limit;
        }

        let timeout = self
            .probe_timeout_ms
            .clamp(MIN_PROBE_TIMEOUT_MS, MAX_PROBE_TIMEOUT_MS);
        if timeout != self.probe_timeout_ms {
            warn!(
                "probe_timeout_ms {} out of range, using {}",
                self.probe_timeout_ms, timeout
            );
            self.probe_timeout_ms = timeout;
        }

        if self.default_user_agent.is_empty() {
            self.default_user_agent = "unknown".to_string();
        }
        if self.default_page.is_empty() {
            self.default_page = "/".to_string();
        }
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn lmdb_dir(&self) -> String {
        format!("{}.lmdb", self.database_path)
    }
}
