//! Plugin notifications
//!
//! Handles:
//! - Buffering and error lifecycle notifications (`PluginData`)
//! - Manifest, quality and subtitle notifications
//! - Reverse-order synchronous dispatch to registered plugins
//! - Async observers through a broadcast channel
//!
//! A panicking plugin never interrupts playback: the panic is caught, logged
//! and kept as a deferred failure the host may collect later.

use crate::{TransferFormat, WindowType};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error};

/// Lifecycle status carried by plugin data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Started,
    Dismissed,
    Fatal,
    Failover,
}

/// What the notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    Buffering,
    Error,
}

/// Payload of buffering and error notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginData {
    pub status: PluginStatus,
    pub state_type: StateType,
    pub is_buffering_timeout_error: bool,
    pub is_initial_play: Option<bool>,
    pub cdn: Option<String>,
    pub new_cdn: Option<String>,
    /// Epoch milliseconds when the notification was raised
    pub timestamp_ms: u64,
    pub code: Option<i32>,
    pub message: Option<String>,
}

impl PluginData {
    pub fn new(status: PluginStatus, state_type: StateType, timestamp_ms: u64) -> Self {
        Self {
            status,
            state_type,
            is_buffering_timeout_error: false,
            is_initial_play: None,
            cdn: None,
            new_cdn: None,
            timestamp_ms,
            code: None,
            message: None,
        }
    }

    pub fn with_initial_play(mut self, is_initial_play: bool) -> Self {
        self.is_initial_play = Some(is_initial_play);
        self
    }

    pub fn with_error(mut self, code: i32, message: impl Into<String>) -> Self {
        self.code = Some(code);
        self.message = Some(message.into());
        self
    }

    pub fn with_buffering_timeout(mut self, is_buffering_timeout_error: bool) -> Self {
        self.is_buffering_timeout_error = is_buffering_timeout_error;
        self
    }

    pub fn with_cdns(mut self, cdn: Option<String>, new_cdn: Option<String>) -> Self {
        self.cdn = cdn;
        self.new_cdn = new_cdn;
        self
    }
}

/// Notifications delivered to plugins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PluginEvent {
    Error(PluginData),
    FatalError(PluginData),
    ErrorCleared(PluginData),
    ErrorHandled(PluginData),
    Buffering(PluginData),
    BufferingCleared(PluginData),
    PlayerInfoUpdated {
        buffer_length: Option<f64>,
        playback_bitrate: Option<f64>,
    },
    ManifestLoaded {
        url: String,
        transfer_format: TransferFormat,
        window_type: WindowType,
    },
    ManifestParseError {
        code: i32,
        message: String,
    },
    QualityChangedRendered {
        media_type: String,
        /// `None` for the first rendered quality
        old_quality: Option<u32>,
        new_quality: u32,
        bitrate: Option<f64>,
    },
    SubtitlesLoadError {
        status_code: Option<u16>,
        severity: PluginStatus,
        cdn: Option<String>,
    },
    FragmentContentLengthMismatch {
        message: String,
    },
    QuotaExceeded {
        buffer_level: f64,
        time: f64,
    },
}

impl PluginEvent {
    /// Hook name, used in logs
    pub fn name(&self) -> &'static str {
        match self {
            PluginEvent::Error(_) => "on_error",
            PluginEvent::FatalError(_) => "on_fatal_error",
            PluginEvent::ErrorCleared(_) => "on_error_cleared",
            PluginEvent::ErrorHandled(_) => "on_error_handled",
            PluginEvent::Buffering(_) => "on_buffering",
            PluginEvent::BufferingCleared(_) => "on_buffering_cleared",
            PluginEvent::PlayerInfoUpdated { .. } => "on_player_info_updated",
            PluginEvent::ManifestLoaded { .. } => "on_manifest_loaded",
            PluginEvent::ManifestParseError { .. } => "on_manifest_parse_error",
            PluginEvent::QualityChangedRendered { .. } => "on_quality_changed_rendered",
            PluginEvent::SubtitlesLoadError { .. } => "on_subtitles_load_error",
            PluginEvent::FragmentContentLengthMismatch { .. } => {
                "on_fragment_content_length_mismatch"
            }
            PluginEvent::QuotaExceeded { .. } => "on_quota_exceeded",
        }
    }
}

/// A registered observer of plugin notifications
pub trait Plugin: Send + Sync {
    fn on_event(&self, event: &PluginEvent);
}

impl<F> Plugin for F
where
    F: Fn(&PluginEvent) + Send + Sync,
{
    fn on_event(&self, event: &PluginEvent) {
        self(event)
    }
}

/// Handle returned by [`Plugins::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginId(u64);

/// A plugin panic caught during dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredFailure {
    pub hook: &'static str,
    pub message: String,
}

struct PluginsInner {
    plugins: RwLock<Vec<(PluginId, Arc<dyn Plugin>)>>,
    deferred: Mutex<Vec<DeferredFailure>>,
    next_id: AtomicU64,
    tx: broadcast::Sender<PluginEvent>,
}

/// Plugin registry shared by every component of a session
#[derive(Clone)]
pub struct Plugins {
    inner: Arc<PluginsInner>,
}

impl Plugins {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(PluginsInner {
                plugins: RwLock::new(Vec::new()),
                deferred: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                tx,
            }),
        }
    }

    /// Register a plugin; later registrations are notified first
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> PluginId {
        let id = PluginId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, plugin));
        id
    }

    /// Remove one plugin, or every plugin when `id` is `None`
    pub fn unregister(&self, id: Option<PluginId>) {
        let mut plugins = self
            .inner
            .plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match id {
            Some(id) => plugins.retain(|(registered, _)| *registered != id),
            None => plugins.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to every notification asynchronously
    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.inner.tx.subscribe()
    }

    /// Deliver a notification to every plugin, newest first
    pub fn notify(&self, event: PluginEvent) {
        let snapshot: Vec<Arc<dyn Plugin>> = self
            .inner
            .plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, plugin)| Arc::clone(plugin))
            .collect();

        debug!(hook = event.name(), plugins = snapshot.len(), "Plugin notification");

        for plugin in snapshot.iter().rev() {
            let outcome = catch_unwind(AssertUnwindSafe(|| plugin.on_event(&event)));
            if let Err(payload) = outcome {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "plugin panicked".to_string());
                error!(hook = event.name(), %message, "Plugin failed");
                self.inner
                    .deferred
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(DeferredFailure {
                        hook: event.name(),
                        message,
                    });
            }
        }

        // nobody listening is fine
        let _ = self.inner.tx.send(event);
    }

    /// Take the plugin failures caught so far
    pub fn take_deferred_failures(&self) -> Vec<DeferredFailure> {
        std::mem::take(
            &mut *self
                .inner
                .deferred
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl Default for Plugins {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Plugins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugins").field("registered", &self.len()).finish()
    }
}
