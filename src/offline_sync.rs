//! Explicitly invoked reconciliation of the offline buffer.
//!
//! Replays unsynced entries in buffer order, marks the ones the remote store
//! accepted, then prunes everything synced. There is no retry loop: entries
//! that fail stay unsynced for the next pass.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::analytics_gateway::{AnalyticsGateway, PreparedEvent};
use crate::analytics_model::PendingKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Completed,
    /// Some entries were rejected and remain buffered.
    Partial,
    /// No attempt was made: remote store missing or offline.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub pushed: usize,
    pub failed: usize,
    pub pruned: usize,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            status: SyncStatus::Skipped,
            pushed: 0,
            failed: 0,
            pruned: 0,
        }
    }
}

pub struct OfflineSync;

impl OfflineSync {
    pub async fn reconcile(gateway: &AnalyticsGateway) -> SyncReport {
        let Some(remote) = gateway.remote() else {
            return SyncReport::skipped();
        };
        if !gateway.monitor().is_connected() {
            info!("Skipping offline sync: remote store disconnected");
            return SyncReport::skipped();
        }

        let buffer = gateway.buffer();
        let pending = buffer.get_pending_sync();
        let mut report = SyncReport {
            status: SyncStatus::Completed,
            pushed: 0,
            failed: 0,
            pruned: 0,
        };

        let generations = pending
            .qr_generations
            .into_iter()
            .filter(|e| !e.synced)
            .map(|e| (PendingKind::QrGenerations, e.id, e.timestamp, PreparedEvent::Generation(e.event)));
        let analytics = pending
            .analytics
            .into_iter()
            .filter(|e| !e.synced)
            .map(|e| (PendingKind::Analytics, e.id, e.timestamp, PreparedEvent::from_analytics(e.event)));

        let mut synced_generations = Vec::new();
        let mut synced_analytics = Vec::new();

        for (kind, id, timestamp, event) in generations.chain(analytics) {
            match remote.add_document(event.collection(), event.document(timestamp)).await {
                Ok(_) => {
                    if let Some(stat) = event.stat() {
                        gateway.update_daily_stats_at(stat, 1, timestamp).await;
                    }
                    match kind {
                        PendingKind::QrGenerations => synced_generations.push(id),
                        PendingKind::Analytics => synced_analytics.push(id),
                    }
                    report.pushed += 1;
                }
                Err(e) => {
                    warn!("Offline entry {} not synced: {}", id, e);
                    report.failed += 1;
                }
            }
        }

        buffer.mark_synced_ids(PendingKind::QrGenerations, &synced_generations);
        buffer.mark_synced_ids(PendingKind::Analytics, &synced_analytics);
        report.pruned = buffer.clear_synced();

        if report.failed > 0 {
            report.status = SyncStatus::Partial;
        }
        info!(
            "Offline sync finished: {} pushed, {} failed, {} pruned",
            report.pushed, report.failed, report.pruned
        );
        report
    }
}
