//! LMDB-backed raw string storage.
//!
//! [`AppDbState`] owns one LMDB environment with a single unnamed database.
//! Every write runs in its own read-write transaction; a failed `put` aborts
//! the transaction so the previously committed value stays untouched.

use std::path::Path;

use lmdb::{Cursor, Database, DatabaseFlags, Environment, Transaction, WriteFlags};
use log::{debug, info, warn};

use crate::app_response::AppResponse;
use crate::storage_backend::StorageBackend;

pub const DEFAULT_MAP_SIZE: usize = 10 * 1024 * 1024;

pub struct AppDbState {
    env: Environment,
    db: Database,
    path: String,
}

impl AppDbState {
    /// Opens (or creates) `{name}.lmdb` with the default map size.
    pub fn init(name: String) -> Result<Self, AppResponse> {
        Self::init_with_map_size(name, DEFAULT_MAP_SIZE)
    }

    pub fn init_with_map_size(name: String, map_size: usize) -> Result<Self, AppResponse> {
        if name.trim().is_empty() {
            return Err(AppResponse::BadRequest("Database name cannot be empty".to_string()));
        }

        let path = format!("{name}.lmdb");
        std::fs::create_dir_all(&path)?;

        let env = Environment::new()
            .set_max_dbs(1)
            .set_map_size(map_size)
            .open(Path::new(&path))?;
        let db = env.create_db(None, DatabaseFlags::empty())?;

        info!("LMDB environment opened at {}", path);
        Ok(Self { env, db, path })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<String>, AppResponse> {
        let txn = self.env.begin_ro_txn()?;
        let value = match txn.get(self.db, &id) {
            Ok(bytes) => Some(String::from_utf8(bytes.to_vec()).map_err(|e| {
                AppResponse::SerializationError(format!("Invalid UTF-8 stored under '{id}': {e}"))
            })?),
            Err(lmdb::Error::NotFound) => None,
            Err(e) => return Err(AppResponse::from(e)),
        };
        txn.abort();
        Ok(value)
    }

    pub fn put(&self, id: &str, value: &str) -> Result<(), AppResponse> {
        let mut txn = self.env.begin_rw_txn()?;
        if let Err(e) = txn.put(self.db, &id, &value, WriteFlags::empty()) {
            warn!("Write of '{}' rejected by LMDB: {}", id, e);
            txn.abort();
            return Err(AppResponse::from(e));
        }
        txn.commit()?;
        debug!("Stored {} bytes under '{}'", value.len(), id);
        Ok(())
    }

    pub fn delete_by_id(&self, id: &str) -> Result<bool, AppResponse> {
        let mut txn = self.env.begin_rw_txn()?;
        match txn.del(self.db, &id, None) {
            Ok(()) => {
                txn.commit()?;
                Ok(true)
            }
            Err(lmdb::Error::NotFound) => {
                txn.abort();
                Ok(false)
            }
            Err(e) => {
                txn.abort();
                Err(AppResponse::from(e))
            }
        }
    }

    /// Removes every key and returns how many were present.
    pub fn clear_all_records(&self) -> Result<usize, AppResponse> {
        let count = self.count()?;
        let mut txn = self.env.begin_rw_txn()?;
        txn.clear_db(self.db)?;
        txn.commit()?;
        info!("Cleared {} records from {}", count, self.path);
        Ok(count)
    }

    pub fn count(&self) -> Result<usize, AppResponse> {
        let txn = self.env.begin_ro_txn()?;
        let count = {
            let mut cursor = txn.open_ro_cursor(self.db)?;
            cursor.iter_start().count()
        };
        txn.abort();
        Ok(count)
    }

    /// Flushes buffers to disk. The environment itself closes on drop.
    pub fn close_database(&mut self) -> Result<(), AppResponse> {
        self.env.sync(true)?;
        info!("LMDB environment at {} synced for close", self.path);
        Ok(())
    }
}

impl StorageBackend for AppDbState {
    fn read(&self, key: &str) -> Result<Option<String>, AppResponse> {
        self.get_by_id(key)
    }

    fn write(&self, key: &str, value: &str) -> Result<(), AppResponse> {
        self.put(key, value)
    }

    fn delete(&self, key: &str) -> Result<bool, AppResponse> {
        self.delete_by_id(key)
    }

    fn clear(&self) -> Result<usize, AppResponse> {
        self.clear_all_records()
    }
}
