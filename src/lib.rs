//! # QRLoop Core
//!
//! Offline-first persistence and analytics buffering for a QR code
//! generator/scanner. Nothing a user does is lost when the hosted backend is
//! unreachable: QR history and pending analytics live in a local LMDB store,
//! and remote writes fall back to that store on any failure.
//!
//! ## Components
//!
//! - [`durable_store::DurableStore`] - error-contained JSON key/value store
//! - [`qr_history::QrHistoryLedger`] - bounded, newest-first QR history
//! - [`offline_buffer::OfflineEventBuffer`] - events waiting for the remote store
//! - [`analytics_gateway::AnalyticsGateway`] - remote tracking with local fallback
//! - [`connectivity::ConnectivityMonitor`] - reachability state and listeners
//! - [`offline_sync::OfflineSync`] - explicit reconciliation of the buffer
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use qrloop_core::config::CoreConfig;
//! use qrloop_core::durable_store::DurableStore;
//! use qrloop_core::local_db_model::NewQrRecord;
//! use qrloop_core::qr_history::QrHistoryLedger;
//!
//! let config = CoreConfig::default();
//! let store = DurableStore::open(&config);
//! let history = QrHistoryLedger::with_limit(Arc::clone(&store), config.history_limit);
//!
//! let record = history.add(NewQrRecord::new("https://example.com", serde_json::json!({})));
//! assert_eq!(record.name, "QR Code 1");
//! ```
//!
//! ## FFI Functions
//!
//! The local components are also exposed through C-compatible functions that
//! answer with a JSON-encoded [`AppResponse`]:
//!
//! - [`create_core`] / [`close_core`] - open and release a core instance
//! - [`history_add`], [`history_get_all`], [`history_remove`],
//!   [`history_record_scan`], [`history_clear`]
//! - [`offline_get_pending_sync`], [`offline_mark_synced`], [`offline_clear_synced`]
//! - [`preferences_get`], [`preferences_update`]
//! - [`free_response`] - release a string returned by any of the above

pub mod analytics_gateway;
pub mod analytics_model;
mod app_response;
pub mod config;
pub mod connectivity;
pub mod durable_store;
pub mod local_db_model;
pub mod local_db_state;
pub mod offline_buffer;
pub mod offline_sync;
pub mod preferences;
pub mod qr_history;
pub mod remote_store;
pub mod storage_backend;
pub mod tracking_worker;

pub use crate::app_response::AppResponse;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::analytics_model::PendingKind;
use crate::config::CoreConfig;
use crate::durable_store::DurableStore;
use crate::local_db_model::NewQrRecord;
use crate::offline_buffer::OfflineEventBuffer;
use crate::preferences::{PreferencesPatch, PreferencesStore};
use crate::qr_history::QrHistoryLedger;

/// Local components behind the C ABI, sharing one [`DurableStore`].
pub struct CoreHandle {
    pub history: QrHistoryLedger,
    pub offline: Arc<OfflineEventBuffer>,
    pub preferences: PreferencesStore,
}

impl CoreHandle {
    pub fn new(config: &CoreConfig) -> Self {
        Self::with_store(DurableStore::open(config), config)
    }

    /// Builds the components over `store`. Out-of-range values in `config`
    /// are clamped the same way as a loaded configuration.
    pub fn with_store(store: Arc<DurableStore>, config: &CoreConfig) -> Self {
        let config = config.clone().validated();
        Self {
            history: QrHistoryLedger::with_limit(Arc::clone(&store), config.history_limit),
            offline: Arc::new(OfflineEventBuffer::new(Arc::clone(&store))),
            preferences: PreferencesStore::new(store),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct MarkSyncedRequest {
    kind: PendingKind,
    timestamps: Vec<DateTime<Utc>>,
}

/// Opens a core instance whose database lives at `{name}.lmdb`.
///
/// # Parameters
///
/// * `name` - A null-terminated C string containing the database name
///
/// # Returns
///
/// Returns a pointer to the [`CoreHandle`] on success, or a null pointer on failure.
/// A database that cannot be opened does not fail the call; the core then
/// runs without persistence. Release the handle with [`close_core`].
///
/// # Safety
///
/// This function is unsafe because it:
/// - Dereferences a raw pointer without validation
/// - Returns a raw pointer that must be released with [`close_core`]
/// - Requires the input string to be valid UTF-8
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use qrloop_core::{close_core, create_core, free_response};
///
/// let name = CString::new("qrloop_data").unwrap();
/// let handle = create_core(name.as_ptr());
///
/// if !handle.is_null() {
///     let result = close_core(handle);
///     free_response(result);
/// }
/// ```
///
/// # Errors
///
/// Returns null pointer if:
/// - Input name pointer is null
/// - Input string contains invalid UTF-8
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn create_core(name: *const c_char) -> *mut CoreHandle {
    if name.is_null() {
        warn!("Null name pointer passed to create_core");
        return std::ptr::null_mut();
    }

    let name_str = match unsafe { CStr::from_ptr(name).to_str() } {
        Ok(s) => s,
        Err(e) => {
            warn!("Invalid UTF-8 in name parameter: {e}");
            return std::ptr::null_mut();
        }
    };

    let config = CoreConfig {
        database_path: name_str.to_string(),
        ..CoreConfig::default()
    };
    info!("Opening core at {}", config.lmdb_dir());
    Box::into_raw(Box::new(CoreHandle::new(&config)))
}

/// Adds a QR record. Expects `{"data": "...", "options": {...}, "name": "..."}`
/// with `options` and `name` optional; answers with the stored record.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn history_add(handle: *mut CoreHandle, json_ptr: *const c_char) -> *const c_char {
    let handle = match handle_ref(handle, "history_add") {
        Ok(h) => h,
        Err(err) => return err,
    };

    let json_str = match c_ptr_to_string(json_ptr, "JSON") {
        Ok(json) => json,
        Err(err) => return err,
    };

    let new_record: NewQrRecord = match serde_json::from_str(&json_str) {
        Ok(r) => r,
        Err(e) => {
            let error = AppResponse::SerializationError(format!("Invalid JSON: {e}"));
            return response_to_c_string(&error);
        }
    };

    json_response(&handle.history.add(new_record))
}

/// Answers with the full history, newest first.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn history_get_all(handle: *mut CoreHandle) -> *const c_char {
    match handle_ref(handle, "history_get_all") {
        Ok(h) => json_response(&h.history.get_all()),
        Err(err) => err,
    }
}

/// Removes the record `id`; answers with the remaining history.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn history_remove(handle: *mut CoreHandle, id: *const c_char) -> *const c_char {
    let handle = match handle_ref(handle, "history_remove") {
        Ok(h) => h,
        Err(err) => return err,
    };

    let id_str = match c_ptr_to_string(id, "id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    json_response(&handle.history.remove(&id_str))
}

/// Increments the scan count of `id`; `NotFound` when no such record exists.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn history_record_scan(handle: *mut CoreHandle, id: *const c_char) -> *const c_char {
    let handle = match handle_ref(handle, "history_record_scan") {
        Ok(h) => h,
        Err(err) => return err,
    };

    let id_str = match c_ptr_to_string(id, "id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    match handle.history.record_scan(&id_str) {
        Some(record) => json_response(&record),
        None => {
            let not_found = AppResponse::NotFound(format!("No record found with id: {id_str}"));
            response_to_c_string(&not_found)
        }
    }
}

/// Empties the history; answers with a success message.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn history_clear(handle: *mut CoreHandle) -> *const c_char {
    match handle_ref(handle, "history_clear") {
        Ok(h) => {
            h.history.clear();
            response_to_c_string(&AppResponse::success("History cleared successfully"))
        }
        Err(err) => err,
    }
}

/// Answers with the whole offline buffer.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn offline_get_pending_sync(handle: *mut CoreHandle) -> *const c_char {
    match handle_ref(handle, "offline_get_pending_sync") {
        Ok(h) => json_response(&h.offline.get_pending_sync()),
        Err(err) => err,
    }
}

/// Expects `{"kind": "qrGenerations" | "analytics", "timestamps": [...]}`;
/// answers with the number of entries marked.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn offline_mark_synced(handle: *mut CoreHandle, json_ptr: *const c_char) -> *const c_char {
    let handle = match handle_ref(handle, "offline_mark_synced") {
        Ok(h) => h,
        Err(err) => return err,
    };

    let json_str = match c_ptr_to_string(json_ptr, "JSON") {
        Ok(json) => json,
        Err(err) => return err,
    };

    let request: MarkSyncedRequest = match serde_json::from_str(&json_str) {
        Ok(r) => r,
        Err(e) => {
            let error = AppResponse::SerializationError(format!("Invalid JSON: {e}"));
            return response_to_c_string(&error);
        }
    };

    let marked = handle.offline.mark_synced(request.kind, &request.timestamps);
    response_to_c_string(&AppResponse::success(marked.to_string()))
}

/// Prunes synced entries; answers with the number removed.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn offline_clear_synced(handle: *mut CoreHandle) -> *const c_char {
    match handle_ref(handle, "offline_clear_synced") {
        Ok(h) => {
            let removed = h.offline.clear_synced();
            response_to_c_string(&AppResponse::success(removed.to_string()))
        }
        Err(err) => err,
    }
}

/// Answers with the stored preferences merged over the defaults.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn preferences_get(handle: *mut CoreHandle) -> *const c_char {
    match handle_ref(handle, "preferences_get") {
        Ok(h) => json_response(&h.preferences.get()),
        Err(err) => err,
    }
}

/// Merges a partial preferences object; answers with the merged result.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn preferences_update(handle: *mut CoreHandle, json_ptr: *const c_char) -> *const c_char {
    let handle = match handle_ref(handle, "preferences_update") {
        Ok(h) => h,
        Err(err) => return err,
    };

    let json_str = match c_ptr_to_string(json_ptr, "JSON") {
        Ok(json) => json,
        Err(err) => return err,
    };

    let patch: PreferencesPatch = match serde_json::from_str(&json_str) {
        Ok(p) => p,
        Err(e) => {
            let error = AppResponse::SerializationError(format!("Invalid JSON: {e}"));
            return response_to_c_string(&error);
        }
    };

    json_response(&handle.preferences.update(patch))
}

/// Releases a string returned by any function of this library.
///
/// # Parameters
///
/// * `ptr` - A response pointer previously returned by this library
///
/// # Safety
///
/// This function is unsafe because it:
/// - Takes back ownership of memory allocated by this library
/// - Must be called at most once per pointer
/// - Must not receive pointers allocated elsewhere
///
/// Null pointers are ignored.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use qrloop_core::{create_core, free_response, history_get_all};
///
/// let name = CString::new("qrloop_data").unwrap();
/// let handle = create_core(name.as_ptr());
///
/// let response = history_get_all(handle);
/// // read the JSON, then hand the string back
/// free_response(response);
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn free_response(ptr: *const c_char) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(ptr as *mut c_char));
    }
}

/// Releases a handle from [`create_core`].
///
/// Dropping the handle closes the LMDB environment.
///
/// # Parameters
///
/// * `handle` - Pointer to the core instance
///
/// # Returns
///
/// Returns a JSON-formatted C string indicating success or failure.
///
/// # Safety
///
/// The handle parameter must be a valid pointer obtained from [`create_core`].
/// It must not be used after this call.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use qrloop_core::{close_core, create_core, free_response};
///
/// let name = CString::new("qrloop_data").unwrap();
/// let handle = create_core(name.as_ptr());
///
/// // before hot restart or application shutdown
/// let result = close_core(handle);
/// free_response(result);
/// ```
///
/// # Errors
///
/// Returns a `BadRequest` response if the handle pointer is null.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn close_core(handle: *mut CoreHandle) -> *const c_char {
    if handle.is_null() {
        let error = AppResponse::BadRequest("Null handle pointer passed to close_core".to_string());
        return response_to_c_string(&error);
    }

    unsafe {
        drop(Box::from_raw(handle));
    }
    response_to_c_string(&AppResponse::success("Core closed successfully"))
}

fn handle_ref<'a>(handle: *mut CoreHandle, caller: &str) -> Result<&'a CoreHandle, *const c_char> {
    match unsafe { handle.as_ref() } {
        Some(h) => Ok(h),
        None => {
            let error = AppResponse::BadRequest(format!("Null handle pointer passed to {caller}"));
            Err(response_to_c_string(&error))
        }
    }
}

/// Wraps `value` as JSON inside an `Ok` response.
fn json_response<T: Serialize>(value: &T) -> *const c_char {
    match serde_json::to_string(value) {
        Ok(json) => response_to_c_string(&AppResponse::Ok(json)),
        Err(e) => {
            let error = AppResponse::SerializationError(format!("Error serializing result: {e}"));
            response_to_c_string(&error)
        }
    }
}

/// Converts an [`AppResponse`] to a C string owned by the caller.
///
/// Returns a null pointer if serialization or C string creation fails.
fn response_to_c_string(response: &AppResponse) -> *const c_char {
    let json = match serde_json::to_string(response) {
        Ok(j) => j,
        Err(e) => {
            warn!("Error serializing response: {e}");
            return std::ptr::null();
        }
    };

    match CString::new(json) {
        Ok(c_str) => c_str.into_raw(),
        Err(e) => {
            warn!("Error creating CString: {e}");
            std::ptr::null()
        }
    }
}

/// Converts a C string pointer to a Rust String.
///
/// * `Ok(String)` - if conversion was successful
/// * `Err(*const c_char)` - error response ready to hand back to the caller
fn c_ptr_to_string(ptr: *const c_char, field_name: &str) -> Result<String, *const c_char> {
    if ptr.is_null() {
        let error = AppResponse::BadRequest(format!("Null {field_name} pointer"));
        return Err(response_to_c_string(&error));
    }

    match unsafe { CStr::from_ptr(ptr).to_str() } {
        Ok(s) => Ok(s.to_string()),
        Err(e) => {
            let error = AppResponse::BadRequest(format!("Invalid UTF-8 in {field_name}: {e}"));
            Err(response_to_c_string(&error))
        }
    }
}
