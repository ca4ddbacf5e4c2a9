//! Remote analytics with local fallback.
//!
//! Every tracking call goes through [`AnalyticsGateway::track`]: normalise the
//! input, try the remote write, and only once that attempt has finished,
//! buffer the event locally if it failed. Nothing here returns an error to
//! the caller; failures come back as a [`TrackResult`] with `success: false`.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::analytics_model::{
    ActivityEvent, ActivityInput, AnalyticsEvent, AnalyticsReport, AnalyticsSummary, DailyStat,
    DataSource, EventDefaults, GenerationEvent, GenerationInput, RemoteDocument, ScanEvent,
    ScanInput, StatKind, TimeRange,
};
use crate::config::CoreConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::offline_buffer::OfflineEventBuffer;
use crate::remote_store::{
    remote_timestamp, ErrorClass, Query, RemoteError, RemoteErrorCode, RemoteStore, DAILY_STATS,
    QR_GENERATIONS, QR_SCANS, USER_ACTIVITY,
};

pub const RECENT_EVENTS_LIMIT: usize = 100;
pub const DEFAULT_ACTIVITY_LIMIT: usize = 50;

/// A unit of tracking work, as submitted by callers or the worker queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum TrackingTask {
    Generation(GenerationInput),
    Scan(ScanInput),
    Activity(ActivityInput),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoredLocation {
    Remote,
    Locally,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackResult {
    pub success: bool,
    pub stored: StoredLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<ErrorClass>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub data: Vec<RemoteDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A normalised event ready to be written somewhere.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PreparedEvent {
    Generation(GenerationEvent),
    Scan(ScanEvent),
    Activity(ActivityEvent),
}

impl PreparedEvent {
    pub(crate) fn from_analytics(event: AnalyticsEvent) -> Self {
        match event {
            AnalyticsEvent::Scan(scan) => PreparedEvent::Scan(scan),
            AnalyticsEvent::Activity(activity) => PreparedEvent::Activity(activity),
        }
    }

    pub(crate) fn collection(&self) -> &'static str {
        match self {
            PreparedEvent::Generation(_) => QR_GENERATIONS,
            PreparedEvent::Scan(_) => QR_SCANS,
            PreparedEvent::Activity(_) => USER_ACTIVITY,
        }
    }

    pub(crate) fn stat(&self) -> Option<StatKind> {
        match self {
            PreparedEvent::Generation(_) => Some(StatKind::Generations),
            PreparedEvent::Scan(_) => Some(StatKind::Scans),
            PreparedEvent::Activity(_) => None,
        }
    }

    /// Remote document shape: the event's fields plus `timestamp` and `type`.
    pub(crate) fn document(&self, at: DateTime<Utc>) -> JsonValue {
        let mut doc = Map::new();
        match self {
            PreparedEvent::Generation(e) => {
                doc.insert("text".into(), e.text.clone().into());
                doc.insert("qrType".into(), e.qr_type.clone().into());
                doc.insert("size".into(), e.size.into());
                doc.insert("errorCorrectionLevel".into(), e.error_correction_level.clone().into());
                doc.insert("userAgent".into(), e.user_agent.clone().into());
                doc.insert("type".into(), "generation".into());
            }
            PreparedEvent::Scan(e) => {
                doc.insert("scannedContent".into(), e.scanned_content.clone().into());
                doc.insert("scanMethod".into(), e.scan_method.clone().into());
                doc.insert("userAgent".into(), e.user_agent.clone().into());
                doc.insert("type".into(), "scan".into());
            }
            PreparedEvent::Activity(e) => {
                doc.insert("action".into(), e.action.clone().into());
                doc.insert("page".into(), e.page.clone().into());
                doc.insert("userAgent".into(), e.user_agent.clone().into());
            }
        }
        doc.insert("timestamp".into(), remote_timestamp(at).into());
        JsonValue::Object(doc)
    }
}

pub struct AnalyticsGateway {
    remote: Option<Arc<dyn RemoteStore>>,
    monitor: Arc<ConnectivityMonitor>,
    buffer: Arc<OfflineEventBuffer>,
    defaults: EventDefaults,
}

impl AnalyticsGateway {
    /// `remote: None` puts the gateway in permanent local-only mode.
    pub fn new(
        remote: Option<Arc<dyn RemoteStore>>,
        monitor: Arc<ConnectivityMonitor>,
        buffer: Arc<OfflineEventBuffer>,
        defaults: EventDefaults,
    ) -> Self {
        if remote.is_none() {
            info!("Analytics gateway running in local-only mode");
        }
        Self {
            remote,
            monitor,
            buffer,
            defaults,
        }
    }

    pub fn from_config(
        remote: Option<Arc<dyn RemoteStore>>,
        monitor: Arc<ConnectivityMonitor>,
        buffer: Arc<OfflineEventBuffer>,
        config: &CoreConfig,
    ) -> Self {
        let defaults = EventDefaults {
            user_agent: config.default_user_agent.clone(),
            page: config.default_page.clone(),
        };
        Self::new(remote, monitor, buffer, defaults)
    }

    pub fn remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        self.remote.as_ref()
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn buffer(&self) -> &Arc<OfflineEventBuffer> {
        &self.buffer
    }

    pub async fn track_qr_generation(&self, input: GenerationInput) -> TrackResult {
        self.track(TrackingTask::Generation(input)).await
    }

    pub async fn track_qr_scan(&self, input: ScanInput) -> TrackResult {
        self.track(TrackingTask::Scan(input)).await
    }

    pub async fn track_user_activity(&self, input: ActivityInput) -> TrackResult {
        self.track(TrackingTask::Activity(input)).await
    }

    /// Attempt-then-fallback, applied identically to every event type.
    pub async fn track(&self, task: TrackingTask) -> TrackResult {
        let event = self.prepare(task);

        let Some(remote) = &self.remote else {
            return self.store_locally(event, RemoteError::not_configured());
        };

        if !self.monitor.is_connected() {
            debug!("Remote store offline, buffering {} event", event.collection());
            let offline = RemoteError::new(RemoteErrorCode::Unavailable, "remote store is offline");
            return self.store_locally(event, offline);
        }

        match remote.add_document(event.collection(), event.document(Utc::now())).await {
            Ok(id) => {
                debug!("Tracked {} event as {}", event.collection(), id);
                if let Some(kind) = event.stat() {
                    self.update_daily_stats(kind, 1).await;
                }
                TrackResult {
                    success: true,
                    stored: StoredLocation::Remote,
                    id: Some(id),
                    error: None,
                    class: None,
                }
            }
            Err(e) => {
                warn!("Error tracking {} event: {}", event.collection(), e);
                self.store_locally(event, e)
            }
        }
    }

    /// Bumps today's counter, creating the day's document when it is missing.
    /// Failures are logged and reported as `false`, never raised.
    pub async fn update_daily_stats(&self, kind: StatKind, delta: i64) -> bool {
        self.update_daily_stats_at(kind, delta, Utc::now()).await
    }

    /// Bumps the counter of the local calendar day containing `at`.
    ///
    /// The day's document is only created when the store reports it missing;
    /// any other failure leaves it as it is.
    pub async fn update_daily_stats_at(&self, kind: StatKind, delta: i64, at: DateTime<Utc>) -> bool {
        let Some(remote) = &self.remote else {
            return false;
        };
        let day = at.with_timezone(&Local).format("%Y-%m-%d").to_string();

        match remote.increment_field(DAILY_STATS, &day, kind.field(), delta).await {
            Ok(()) => true,
            Err(e) if e.code == RemoteErrorCode::NotFound => {
                debug!("Daily stats {} missing, creating it", day);
                let now = remote_timestamp(Utc::now());
                let mut doc = Map::new();
                doc.insert(kind.field().to_string(), delta.into());
                doc.insert("date".into(), day.clone().into());
                doc.insert("createdAt".into(), now.clone().into());
                doc.insert("lastUpdated".into(), now.into());

                match remote.set_document(DAILY_STATS, &day, JsonValue::Object(doc)).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Error creating daily stats {}: {}", day, e);
                        false
                    }
                }
            }
            Err(e) => {
                warn!("Error updating daily stats {}: {}", day, e);
                false
            }
        }
    }

    /// Dashboard data for `range`.
    ///
    /// Without a remote store the figures are approximated from the offline
    /// buffer. A failing remote query degrades to the same approximation with
    /// `success: false` and the error attached.
    pub async fn get_analytics_data(&self, range: TimeRange) -> AnalyticsReport {
        let Some(remote) = &self.remote else {
            return self.local_report(None);
        };

        match self.remote_report(remote.as_ref(), range).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Error getting analytics data: {}", e);
                self.local_report(Some(e.to_string()))
            }
        }
    }

    pub async fn get_user_activity(&self, limit: usize) -> QueryResult {
        let Some(remote) = &self.remote else {
            return QueryResult {
                success: false,
                data: Vec::new(),
                error: Some(RemoteError::not_configured().to_string()),
            };
        };

        let query = Query::collection(USER_ACTIVITY)
            .order_by("timestamp", true)
            .limit(limit);
        match remote.query(query).await {
            Ok(data) => QueryResult {
                success: true,
                data,
                error: None,
            },
            Err(e) => {
                warn!("Error getting user activity: {}", e);
                QueryResult {
                    success: false,
                    data: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn prepare(&self, task: TrackingTask) -> PreparedEvent {
        match task {
            TrackingTask::Generation(input) => PreparedEvent::Generation(input.normalize(&self.defaults)),
            TrackingTask::Scan(input) => PreparedEvent::Scan(input.normalize(&self.defaults)),
            TrackingTask::Activity(input) => PreparedEvent::Activity(input.normalize(&self.defaults)),
        }
    }

    fn store_locally(&self, event: PreparedEvent, cause: RemoteError) -> TrackResult {
        let id = match event {
            PreparedEvent::Generation(e) => self.buffer.save_qr_generation(e).id,
            PreparedEvent::Scan(e) => self.buffer.save_analytics(AnalyticsEvent::Scan(e)).id,
            PreparedEvent::Activity(e) => self.buffer.save_analytics(AnalyticsEvent::Activity(e)).id,
        };
        TrackResult {
            success: false,
            stored: StoredLocation::Locally,
            id: Some(id),
            error: Some(cause.message.clone()),
            class: Some(cause.classify()),
        }
    }

    async fn remote_report(
        &self,
        remote: &dyn RemoteStore,
        range: TimeRange,
    ) -> Result<AnalyticsReport, RemoteError> {
        let start = Utc::now() - ChronoDuration::days(range.days());

        let daily_stats: Vec<DailyStat> = remote
            .query(
                Query::collection(DAILY_STATS)
                    .since("createdAt", start)
                    .order_by("createdAt", true),
            )
            .await?
            .iter()
            .map(|doc| DailyStat::from_document(&doc.id, &doc.data))
            .collect();

        let recent_generations = remote
            .query(
                Query::collection(QR_GENERATIONS)
                    .order_by("timestamp", true)
                    .limit(RECENT_EVENTS_LIMIT),
            )
            .await?;

        let recent_scans = remote
            .query(
                Query::collection(QR_SCANS)
                    .order_by("timestamp", true)
                    .limit(RECENT_EVENTS_LIMIT),
            )
            .await?;

        let summary = AnalyticsSummary::from_daily_stats(&daily_stats);
        Ok(AnalyticsReport {
            success: true,
            source: DataSource::Remote,
            daily_stats,
            recent_generations,
            recent_scans,
            summary,
            error: None,
        })
    }

    fn local_report(&self, error: Option<String>) -> AnalyticsReport {
        let pending = self.buffer.get_pending_sync();
        AnalyticsReport {
            success: error.is_none(),
            source: DataSource::Local,
            daily_stats: Vec::new(),
            recent_generations: Vec::new(),
            recent_scans: Vec::new(),
            summary: AnalyticsSummary::from_offline(&pending),
            error,
        }
    }
}
