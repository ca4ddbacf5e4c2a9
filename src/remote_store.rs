//! Contract with the hosted document store, its error taxonomy, and an
//! in-process implementation of that contract.
//!
//! The hosted store itself is out of reach of this crate; everything that
//! talks to it goes through [`RemoteStore`]. [`InMemoryRemoteStore`] backs
//! local development and tests, and can be told to fail every call with a
//! chosen error.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::analytics_model::RemoteDocument;

pub const QR_GENERATIONS: &str = "qr_generations";
pub const QR_SCANS: &str = "qr_scans";
pub const USER_ACTIVITY: &str = "user_activity";
pub const DAILY_STATS: &str = "daily_stats";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteErrorCode {
    PermissionDenied,
    ResourceExhausted,
    Unavailable,
    FailedPrecondition,
    NotFound,
    DeadlineExceeded,
    NotConfigured,
    Unknown,
}

impl RemoteErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteErrorCode::PermissionDenied => "permission-denied",
            RemoteErrorCode::ResourceExhausted => "resource-exhausted",
            RemoteErrorCode::Unavailable => "unavailable",
            RemoteErrorCode::FailedPrecondition => "failed-precondition",
            RemoteErrorCode::NotFound => "not-found",
            RemoteErrorCode::DeadlineExceeded => "deadline-exceeded",
            RemoteErrorCode::NotConfigured => "not-configured",
            RemoteErrorCode::Unknown => "unknown",
        }
    }

    /// Parses a wire code; unrecognised codes map to `Unknown`.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "permission-denied" => RemoteErrorCode::PermissionDenied,
            "resource-exhausted" => RemoteErrorCode::ResourceExhausted,
            "unavailable" => RemoteErrorCode::Unavailable,
            "failed-precondition" => RemoteErrorCode::FailedPrecondition,
            "not-found" => RemoteErrorCode::NotFound,
            "deadline-exceeded" => RemoteErrorCode::DeadlineExceeded,
            "not-configured" => RemoteErrorCode::NotConfigured,
            _ => RemoteErrorCode::Unknown,
        }
    }
}

impl Display for RemoteErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code: RemoteErrorCode,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: RemoteErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_configured() -> Self {
        Self::new(RemoteErrorCode::NotConfigured, "remote store is not configured")
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            RemoteErrorCode::DeadlineExceeded,
            format!("no response within {} ms", after.as_millis()),
        )
    }

    pub fn classify(&self) -> ErrorClass {
        if self.code == RemoteErrorCode::FailedPrecondition
            || self.message.to_ascii_lowercase().contains("blocked")
        {
            return ErrorClass::BlockedByClient;
        }
        match self.code {
            RemoteErrorCode::PermissionDenied => ErrorClass::PermissionDenied,
            RemoteErrorCode::Unavailable
            | RemoteErrorCode::DeadlineExceeded
            | RemoteErrorCode::ResourceExhausted => ErrorClass::ServiceUnavailable,
            RemoteErrorCode::NotConfigured => ErrorClass::NotConfigured,
            _ => ErrorClass::Unknown,
        }
    }
}

/// Remedy-oriented grouping of remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    BlockedByClient,
    PermissionDenied,
    ServiceUnavailable,
    NotConfigured,
    Unknown,
}

impl ErrorClass {
    pub fn description(self) -> &'static str {
        match self {
            ErrorClass::BlockedByClient => "Connection blocked by browser extension or ad blocker",
            ErrorClass::PermissionDenied => "Access denied by remote store security rules",
            ErrorClass::ServiceUnavailable => "Remote store is temporarily unavailable",
            ErrorClass::NotConfigured => "Remote store is not configured",
            ErrorClass::Unknown => "Remote store could not be reached",
        }
    }

    pub fn suggestion(self) -> &'static str {
        match self {
            ErrorClass::BlockedByClient => {
                "Please disable ad blocker for this site or use offline mode"
            }
            ErrorClass::PermissionDenied => {
                "Check the remote store security rules and your account permissions"
            }
            ErrorClass::ServiceUnavailable => {
                "The service is unavailable right now; your data is kept locally until it returns"
            }
            ErrorClass::NotConfigured => "Check your remote store configuration",
            ErrorClass::Unknown => {
                "Check your internet connection and remote store configuration"
            }
        }
    }
}

/// Ordered, optionally bounded query over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub order_by: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
    /// Keep only documents whose timestamp field is at or after the instant.
    pub since: Option<(String, DateTime<Utc>)>,
}

impl Query {
    pub fn collection(name: &str) -> Self {
        Self {
            collection: name.to_string(),
            order_by: None,
            descending: false,
            limit: None,
            since: None,
        }
    }

    pub fn order_by(mut self, field: &str, descending: bool) -> Self {
        self.order_by = Some(field.to_string());
        self.descending = descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn since(mut self, field: &str, at: DateTime<Utc>) -> Self {
        self.since = Some((field.to_string(), at));
        self
    }
}

/// Timestamp format written into remote documents.
pub fn remote_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Creates a document with a store-assigned id and returns the id.
    async fn add_document(&self, collection: &str, data: JsonValue) -> Result<String, RemoteError>;

    /// Adds `delta` to a numeric field of an existing document.
    /// Fails with `not-found` when the document does not exist.
    async fn increment_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), RemoteError>;

    /// Creates or replaces the document `id`.
    async fn set_document(&self, collection: &str, id: &str, data: JsonValue) -> Result<(), RemoteError>;

    async fn query(&self, query: Query) -> Result<Vec<RemoteDocument>, RemoteError>;

    /// Cheap reachability check.
    async fn probe(&self) -> Result<(), RemoteError>;

    async fn enable_network(&self) -> Result<(), RemoteError>;

    async fn disable_network(&self) -> Result<(), RemoteError>;
}

#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    collections: Mutex<HashMap<String, Vec<RemoteDocument>>>,
    failure: Mutex<Option<RemoteError>>,
    probe_delay: Mutex<Option<Duration>>,
    network_disabled: AtomicBool,
    next_id: AtomicU64,
    calls: AtomicUsize,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `error`.
    pub fn fail_with(&self, error: RemoteError) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(error);
        }
    }

    pub fn recover(&self) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = None;
        }
    }

    /// Delays probe responses, e.g. past the monitor's timeout.
    pub fn set_probe_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.probe_delay.lock() {
            *slot = delay;
        }
    }

    /// Number of calls received, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn documents(&self, collection: &str) -> Vec<RemoteDocument> {
        self.collections
            .lock()
            .map(|c| c.get(collection).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<RemoteDocument> {
        self.documents(collection).into_iter().find(|d| d.id == id)
    }

    fn enter(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().ok().and_then(|f| f.clone()) {
            return Err(error);
        }
        if self.network_disabled.load(Ordering::SeqCst) {
            return Err(RemoteError::new(RemoteErrorCode::Unavailable, "network disabled by client"));
        }
        Ok(())
    }

    fn collections(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<RemoteDocument>>>, RemoteError> {
        self.collections
            .lock()
            .map_err(|_| RemoteError::new(RemoteErrorCode::Unknown, "store lock poisoned"))
    }
}

fn field_instant(doc: &RemoteDocument, field: &str) -> Option<DateTime<Utc>> {
    doc.data
        .get(field)
        .and_then(JsonValue::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc))
}

fn order_key(doc: &RemoteDocument, field: &str) -> String {
    match doc.data.get(field) {
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn add_document(&self, collection: &str, data: JsonValue) -> Result<String, RemoteError> {
        self.enter()?;
        let id = format!("doc-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.collections()?
            .entry(collection.to_string())
            .or_default()
            .push(RemoteDocument {
                id: id.clone(),
                data,
            });
        Ok(id)
    }

    async fn increment_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), RemoteError> {
        self.enter()?;
        let mut collections = self.collections()?;
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
            .ok_or_else(|| {
                RemoteError::new(RemoteErrorCode::NotFound, format!("{collection}/{id} does not exist"))
            })?;

        let current = doc.data.get(field).and_then(JsonValue::as_i64).unwrap_or(0);
        if let Some(map) = doc.data.as_object_mut() {
            map.insert(field.to_string(), JsonValue::from(current + delta));
            map.insert(
                "lastUpdated".to_string(),
                JsonValue::from(remote_timestamp(Utc::now())),
            );
        }
        Ok(())
    }

    async fn set_document(&self, collection: &str, id: &str, data: JsonValue) -> Result<(), RemoteError> {
        self.enter()?;
        let mut collections = self.collections()?;
        let docs = collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|d| d.id == id) {
            Some(existing) => existing.data = data,
            None => docs.push(RemoteDocument {
                id: id.to_string(),
                data,
            }),
        }
        Ok(())
    }

    async fn query(&self, query: Query) -> Result<Vec<RemoteDocument>, RemoteError> {
        self.enter()?;
        let mut docs = self
            .collections()?
            .get(&query.collection)
            .cloned()
            .unwrap_or_default();

        if let Some((field, since)) = &query.since {
            docs.retain(|d| field_instant(d, field).is_some_and(|at| at >= *since));
        }
        if let Some(field) = &query.order_by {
            docs.sort_by_key(|d| order_key(d, field));
            if query.descending {
                docs.reverse();
            }
        }
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        let delay = self.probe_delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.enter()
    }

    async fn enable_network(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().ok().and_then(|f| f.clone()) {
            return Err(error);
        }
        self.network_disabled.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn disable_network(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.network_disabled.store(true, Ordering::SeqCst);
        Ok(())
    }
}
