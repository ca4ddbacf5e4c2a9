//! Fire-and-forget tracking.
//!
//! Callers hand [`TrackingTask`]s to a [`TrackingHandle`]; a single tokio
//! task drains the queue in submission order through
//! [`AnalyticsGateway::track`]. The worker stops once every handle is dropped.

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;

use crate::analytics_gateway::{AnalyticsGateway, StoredLocation, TrackingTask};

#[derive(Debug, Clone)]
pub struct TrackingHandle {
    sender: UnboundedSender<TrackingTask>,
}

impl TrackingHandle {
    /// Queues `task`; `false` if the worker is no longer running.
    pub fn submit(&self, task: TrackingTask) -> bool {
        self.sender.send(task).is_ok()
    }
}

/// Counts reported by the worker when its queue closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub processed: usize,
    pub stored_remotely: usize,
    pub stored_locally: usize,
}

pub struct TrackingWorker;

impl TrackingWorker {
    /// Must be called from within a tokio runtime.
    pub fn spawn(gateway: Arc<AnalyticsGateway>) -> (TrackingHandle, JoinHandle<WorkerSummary>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<TrackingTask>();

        let join = tokio::spawn(async move {
            let mut summary = WorkerSummary::default();
            while let Some(task) = receiver.recv().await {
                let result = gateway.track(task).await;
                summary.processed += 1;
                match result.stored {
                    StoredLocation::Remote => summary.stored_remotely += 1,
                    StoredLocation::Locally => summary.stored_locally += 1,
                }
                debug!("Tracking task processed: {:?}", result.stored);
            }
            info!(
                "Tracking worker stopped after {} task(s), {} buffered locally",
                summary.processed, summary.stored_locally
            );
            summary
        });

        (TrackingHandle { sender }, join)
    }
}
