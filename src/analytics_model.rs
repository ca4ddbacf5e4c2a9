//! Typed analytics events, the permissive inputs they are normalised from,
//! and the shapes returned by analytics queries.
//!
//! Inputs never fail validation: missing or empty fields are replaced with
//! defaults when an input is normalised into its event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const DEFAULT_QR_TYPE: &str = "text";
pub const DEFAULT_QR_SIZE: u32 = 256;
pub const DEFAULT_ERROR_CORRECTION: &str = "M";
pub const DEFAULT_SCAN_METHOD: &str = "camera";
pub const DEFAULT_ACTION: &str = "unknown";

/// Values substituted for fields an input leaves out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDefaults {
    pub user_agent: String,
    pub page: String,
}

impl Default for EventDefaults {
    fn default() -> Self {
        Self {
            user_agent: "unknown".to_string(),
            page: "/".to_string(),
        }
    }
}

fn or_default(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationInput {
    pub text: Option<String>,
    #[serde(alias = "type")]
    pub qr_type: Option<String>,
    pub size: Option<u32>,
    pub error_correction_level: Option<String>,
    pub user_agent: Option<String>,
}

/// Missing fields take their defaults when read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationEvent {
    pub text: String,
    pub qr_type: String,
    pub size: u32,
    pub error_correction_level: String,
    pub user_agent: String,
}

impl Default for GenerationEvent {
    fn default() -> Self {
        GenerationInput::default().normalize(&EventDefaults::default())
    }
}

impl GenerationInput {
    pub fn normalize(self, defaults: &EventDefaults) -> GenerationEvent {
        GenerationEvent {
            text: self.text.unwrap_or_default(),
            qr_type: or_default(self.qr_type, DEFAULT_QR_TYPE),
            size: self.size.filter(|s| *s > 0).unwrap_or(DEFAULT_QR_SIZE),
            error_correction_level: or_default(self.error_correction_level, DEFAULT_ERROR_CORRECTION),
            user_agent: or_default(self.user_agent, &defaults.user_agent),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanInput {
    #[serde(alias = "content")]
    pub scanned_content: Option<String>,
    #[serde(alias = "method")]
    pub scan_method: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanEvent {
    pub scanned_content: String,
    pub scan_method: String,
    pub user_agent: String,
}

impl Default for ScanEvent {
    fn default() -> Self {
        ScanInput::default().normalize(&EventDefaults::default())
    }
}

impl ScanInput {
    pub fn new(content: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            scanned_content: Some(content.into()),
            scan_method: Some(method.into()),
            user_agent: None,
        }
    }

    pub fn normalize(self, defaults: &EventDefaults) -> ScanEvent {
        ScanEvent {
            scanned_content: self.scanned_content.unwrap_or_default(),
            scan_method: or_default(self.scan_method, DEFAULT_SCAN_METHOD),
            user_agent: or_default(self.user_agent, &defaults.user_agent),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivityInput {
    pub action: Option<String>,
    pub page: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivityEvent {
    pub action: String,
    pub page: String,
    pub user_agent: String,
}

impl Default for ActivityEvent {
    fn default() -> Self {
        ActivityInput::default().normalize(&EventDefaults::default())
    }
}

impl ActivityInput {
    pub fn new(action: impl Into<String>, page: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            page: Some(page.into()),
            user_agent: None,
        }
    }

    pub fn normalize(self, defaults: &EventDefaults) -> ActivityEvent {
        ActivityEvent {
            action: or_default(self.action, DEFAULT_ACTION),
            page: or_default(self.page, &defaults.page),
            user_agent: or_default(self.user_agent, &defaults.user_agent),
        }
    }
}

/// Events staged in the `analytics` list of the offline buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnalyticsEvent {
    Scan(ScanEvent),
    Activity(ActivityEvent),
}

impl AnalyticsEvent {
    pub fn is_scan(&self) -> bool {
        matches!(self, AnalyticsEvent::Scan(_))
    }
}

/// An event waiting in the offline buffer.
///
/// `timestamp` is the key used by `mark_synced`; `id` exists so the
/// reconciliation pass can address a single entry even when two entries
/// share a millisecond.
///
/// Entries are written with the event nested under `event`. Buffers written
/// by earlier clients spread the event fields next to `timestamp` and
/// `synced`; both layouts are read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    rename_all = "camelCase",
    from = "EntryLayout<T>",
    bound(deserialize = "T: Deserialize<'de>")
)]
pub struct PendingEntry<T> {
    pub id: String,
    pub event: T,
    pub timestamp: DateTime<Utc>,
    pub synced: bool,
}

#[derive(Deserialize)]
#[serde(untagged, bound(deserialize = "T: Deserialize<'de>"))]
enum EntryLayout<T> {
    Nested(NestedEntry<T>),
    Flat(FlatEntry<T>),
}

#[derive(Deserialize)]
struct NestedEntry<T> {
    #[serde(default)]
    id: String,
    event: T,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    synced: bool,
}

#[derive(Deserialize)]
struct FlatEntry<T> {
    #[serde(flatten)]
    event: T,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    synced: bool,
}

impl<T> From<EntryLayout<T>> for PendingEntry<T> {
    fn from(layout: EntryLayout<T>) -> Self {
        match layout {
            EntryLayout::Nested(entry) => PendingEntry {
                id: entry.id,
                event: entry.event,
                timestamp: entry.timestamp,
                synced: entry.synced,
            },
            // ids are assigned on load
            EntryLayout::Flat(entry) => PendingEntry {
                id: String::new(),
                event: entry.event,
                timestamp: entry.timestamp,
                synced: entry.synced,
            },
        }
    }
}

/// Which sub-list of the offline buffer an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PendingKind {
    QrGenerations,
    Analytics,
}

/// The whole offline buffer as persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfflineData {
    pub qr_generations: Vec<PendingEntry<GenerationEvent>>,
    pub analytics: Vec<PendingEntry<AnalyticsEvent>>,
}

impl OfflineData {
    pub fn is_empty(&self) -> bool {
        self.qr_generations.is_empty() && self.analytics.is_empty()
    }

    pub fn unsynced_count(&self) -> usize {
        self.qr_generations.iter().filter(|e| !e.synced).count()
            + self.analytics.iter().filter(|e| !e.synced).count()
    }
}

/// Daily aggregate counters kept remotely, one document per local date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatKind {
    Generations,
    Scans,
}

impl StatKind {
    pub fn field(self) -> &'static str {
        match self {
            StatKind::Generations => "generations",
            StatKind::Scans => "scans",
        }
    }
}

/// Window of an analytics query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "7d")]
    Week,
    #[default]
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
}

impl TimeRange {
    /// `"7d"` and `"30d"` are recognised; anything else means 90 days.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "7d" => TimeRange::Week,
            "30d" => TimeRange::Month,
            _ => TimeRange::Quarter,
        }
    }

    pub fn days(self) -> i64 {
        match self {
            TimeRange::Week => 7,
            TimeRange::Month => 30,
            TimeRange::Quarter => 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStat {
    pub id: String,
    pub date: String,
    pub generations: u64,
    pub scans: u64,
}

impl DailyStat {
    pub fn from_document(id: &str, data: &JsonValue) -> Self {
        let count = |field: &str| data.get(field).and_then(JsonValue::as_u64).unwrap_or(0);
        Self {
            id: id.to_string(),
            date: data
                .get("date")
                .and_then(JsonValue::as_str)
                .unwrap_or(id)
                .to_string(),
            generations: count("generations"),
            scans: count("scans"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub total_generations: u64,
    pub total_scans: u64,
    pub avg_generations_per_day: f64,
    pub avg_scans_per_day: f64,
    /// Number of distinct days with activity; a stand-in for active users.
    pub total_users: u64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl AnalyticsSummary {
    pub fn from_daily_stats(daily: &[DailyStat]) -> Self {
        let total_generations: u64 = daily.iter().map(|d| d.generations).sum();
        let total_scans: u64 = daily.iter().map(|d| d.scans).sum();
        let days = daily.len().max(1) as f64;
        Self {
            total_generations,
            total_scans,
            avg_generations_per_day: round2(total_generations as f64 / days),
            avg_scans_per_day: round2(total_scans as f64 / days),
            total_users: daily.len() as u64,
        }
    }

    /// Rough figures derived from whatever sits in the offline buffer,
    /// averaged over a fixed 30-day window.
    pub fn from_offline(data: &OfflineData) -> Self {
        let total_generations = data.qr_generations.len() as u64;
        let total_scans = data.analytics.iter().filter(|e| e.event.is_scan()).count() as u64;

        let mut days: Vec<String> = data
            .qr_generations
            .iter()
            .map(|e| e.timestamp.format("%Y-%m-%d").to_string())
            .chain(
                data.analytics
                    .iter()
                    .map(|e| e.timestamp.format("%Y-%m-%d").to_string()),
            )
            .collect();
        days.sort();
        days.dedup();

        Self {
            total_generations,
            total_scans,
            avg_generations_per_day: round2(total_generations as f64 / 30.0),
            avg_scans_per_day: round2(total_scans as f64 / 30.0),
            total_users: days.len() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Remote,
    Local,
}

/// A remote document as returned by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub data: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub success: bool,
    pub source: DataSource,
    pub daily_stats: Vec<DailyStat>,
    pub recent_generations: Vec<RemoteDocument>,
    pub recent_scans: Vec<RemoteDocument>,
    pub summary: AnalyticsSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
