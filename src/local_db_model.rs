//! Persisted data model for the QR history and the schema envelope shared by
//! every stored collection.

use chrono::{DateTime, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const SCHEMA_VERSION: u32 = 1;

/// One generated or scanned QR code kept in the user's history.
///
/// `options` is the styling structure of the renderer and is stored as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub data: String,
    #[serde(default)]
    pub options: JsonValue,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub scan_count: u64,
}

/// Caller-supplied part of a [`QrRecord`]; the ledger fills in the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewQrRecord {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub options: JsonValue,
    #[serde(default)]
    pub name: Option<String>,
}

impl NewQrRecord {
    pub fn new(data: impl Into<String>, options: JsonValue) -> Self {
        Self {
            data: data.into(),
            options,
            name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Schema envelope written around each persisted collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u32,
    pub data: T,
}

impl<T> Versioned<T> {
    pub fn current(data: T) -> Self {
        Self {
            version: SCHEMA_VERSION,
            data,
        }
    }
}

/// What may be found under a collection key: the current envelope, or a
/// payload written before envelopes existed.
///
/// An object carrying both `version` and `data` is always read as an
/// envelope, so a damaged envelope fails to parse instead of being taken
/// for an empty legacy payload.
#[derive(Debug, Clone)]
pub enum Stored<T> {
    Versioned(Versioned<T>),
    Legacy(T),
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Stored<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = JsonValue::deserialize(deserializer)?;
        let is_envelope = raw
            .as_object()
            .is_some_and(|o| o.contains_key("version") && o.contains_key("data"));

        if is_envelope {
            serde_json::from_value(raw)
                .map(Stored::Versioned)
                .map_err(serde::de::Error::custom)
        } else {
            serde_json::from_value(raw)
                .map(Stored::Legacy)
                .map_err(serde::de::Error::custom)
        }
    }
}

impl<T> Stored<T> {
    pub fn into_data(self) -> T {
        match self {
            Stored::Versioned(envelope) => envelope.data,
            Stored::Legacy(data) => data,
        }
    }
}

// Histories written before ids were strings stored them as epoch millis.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, found {other}"
        ))),
    }
}

/// Current time truncated to milliseconds, the resolution events are keyed by.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Locally unique identifier: creation millis plus random suffix.
pub fn generate_id(at: DateTime<Utc>) -> String {
    format!("{}-{:08x}", at.timestamp_millis(), rand::random::<u32>())
}
