//! Single source of truth for whether the remote store is reachable.
//!
//! The monitor is the only writer of [`ConnectivityState`]. Listeners are
//! called synchronously on every transition, repeated values included, and
//! always after the state lock has been released so a listener may read the
//! monitor it is subscribed to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::CoreConfig;
use crate::remote_store::{ErrorClass, RemoteError, RemoteStore};

pub type ListenerId = u64;
type Listener = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    pub connected: bool,
    pub last_error: Option<String>,
    pub last_error_class: Option<ErrorClass>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Default for ConnectivityState {
    /// Optimistically connected until the first probe says otherwise.
    fn default() -> Self {
        Self {
            connected: true,
            last_error: None,
            last_error_class: None,
            last_checked: None,
        }
    }
}

/// What a status indicator shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    /// Not reachable, for a known reason.
    Degraded { reason: String, suggestion: String },
    /// Deliberately offline.
    Offline,
}

/// Outcome of [`ConnectivityMonitor::test_connection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCheck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<ErrorClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

pub struct ConnectivityMonitor {
    remote: Option<Arc<dyn RemoteStore>>,
    probe_timeout: Duration,
    state: Mutex<ConnectivityState>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl ConnectivityMonitor {
    pub fn new(remote: Option<Arc<dyn RemoteStore>>, probe_timeout: Duration) -> Self {
        Self {
            remote,
            probe_timeout,
            state: Mutex::new(ConnectivityState::default()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn from_config(remote: Option<Arc<dyn RemoteStore>>, config: &CoreConfig) -> Self {
        Self::new(remote, config.probe_timeout())
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.lock_state().connected
    }

    pub fn state(&self) -> ConnectivityState {
        self.lock_state().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        let state = self.lock_state();
        if state.connected {
            return ConnectionStatus::Connected;
        }
        match (&state.last_error, state.last_error_class) {
            (Some(reason), class) => ConnectionStatus::Degraded {
                reason: reason.clone(),
                suggestion: class.unwrap_or(ErrorClass::Unknown).suggestion().to_string(),
            },
            (None, _) => ConnectionStatus::Offline,
        }
    }

    /// Subscribes `callback`; it is called once right away with the current value.
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        let listener: Listener = Arc::new(callback);
        self.lock_listeners().push((id, Arc::clone(&listener)));

        let connected = self.is_connected();
        listener(connected);
        id
    }

    /// Returns whether a listener with `id` was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    /// Probes the remote store and broadcasts the resulting state.
    pub async fn test_connection(&self) -> ConnectionCheck {
        let outcome = match &self.remote {
            None => Err(RemoteError::not_configured()),
            Some(remote) => match tokio::time::timeout(self.probe_timeout, remote.probe()).await {
                Ok(result) => result,
                Err(_) => Err(RemoteError::timeout(self.probe_timeout)),
            },
        };

        match outcome {
            Ok(()) => {
                self.transition(true, None);
                ConnectionCheck {
                    success: true,
                    message: Some("Remote store connection successful".to_string()),
                    error: None,
                    class: None,
                    suggestion: None,
                }
            }
            Err(e) => {
                let class = e.classify();
                warn!("Remote store connection issue ({:?}): {}", class, e);
                let error = match class {
                    ErrorClass::BlockedByClient => class.description().to_string(),
                    _ => e.message.clone(),
                };
                self.transition(false, Some((error.clone(), class)));
                ConnectionCheck {
                    success: false,
                    message: None,
                    error: Some(error),
                    class: Some(class),
                    suggestion: Some(class.suggestion().to_string()),
                }
            }
        }
    }

    /// Deliberately stops remote traffic. State is unchanged if the store refuses.
    pub async fn go_offline(&self) -> bool {
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.disable_network().await {
                error!("Error going offline: {}", e);
                return false;
            }
        }
        self.transition(false, None);
        true
    }

    /// Deliberately resumes remote traffic; a refusal leaves the monitor disconnected.
    pub async fn go_online(&self) -> bool {
        let outcome = match &self.remote {
            None => Err(RemoteError::not_configured()),
            Some(remote) => remote.enable_network().await,
        };

        match outcome {
            Ok(()) => {
                self.transition(true, None);
                true
            }
            Err(e) => {
                error!("Error going online: {}", e);
                let class = e.classify();
                self.transition(false, Some((e.message.clone(), class)));
                false
            }
        }
    }

    fn transition(&self, connected: bool, failure: Option<(String, ErrorClass)>) {
        {
            let mut state = self.lock_state();
            if state.connected != connected {
                info!(
                    "Remote store {}",
                    if connected { "connected" } else { "disconnected" }
                );
            }
            state.connected = connected;
            state.last_checked = Some(Utc::now());
            match failure {
                Some((message, class)) => {
                    state.last_error = Some(message);
                    state.last_error_class = Some(class);
                }
                None => {
                    state.last_error = None;
                    state.last_error_class = None;
                }
            }
        }
        self.notify(connected);
    }

    fn notify(&self, connected: bool) {
        let listeners: Vec<Listener> = self
            .lock_listeners()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(connected);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectivityState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<(ListenerId, Listener)>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
