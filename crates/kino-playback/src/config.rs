//! Playback configuration
//!
//! One immutable [`PlaybackConfig`] is handed to every component at construction.
//! It replaces ad hoc global override flags: strategy and device selection, the
//! live support tier, sentinel tuning, device workarounds and all timeouts.

use crate::{Error, LiveSupport, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which playback strategy drives the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Adaptive streaming engine over media source extensions
    #[default]
    Mse,
    /// Device media player state machine, optionally live-decorated
    Native,
    /// Thin strategy straight over an HTML5-like element
    Basic,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Mse => write!(f, "msestrategy"),
            StrategyKind::Native => write!(f, "nativestrategy"),
            StrategyKind::Basic => write!(f, "basicstrategy"),
        }
    }
}

/// Device media player family used by the native strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[default]
    Html5,
    Cehtml,
    SamsungMaple,
    SamsungStreaming,
    SamsungStreaming2015,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Html5 => write!(f, "html5"),
            DeviceKind::Cehtml => write!(f, "cehtml"),
            DeviceKind::SamsungMaple => write!(f, "samsungmaple"),
            DeviceKind::SamsungStreaming => write!(f, "samsungstreaming"),
            DeviceKind::SamsungStreaming2015 => write!(f, "samsungstreaming2015"),
        }
    }
}

/// Device and workaround switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceOverrides {
    /// Never arm sentinels
    pub disable_sentinels: bool,
    /// Disable only the "should be seeked" sentinel (html5)
    pub disable_seek_sentinel: bool,
    /// Disable sentinels for UHD live streams
    pub live_uhd_disable_sentinels: bool,
    /// Override the 15s / 30s seek sentinel tolerance
    pub seek_sentinel_tolerance: Option<f64>,
    /// Sentinel tick interval
    pub sentinel_interval_ms: u64,
    /// Corrective attempts per sentinel before the failure event
    pub sentinel_maximum_attempts: u32,
    /// Grace period after a seek before "seek finished" may be reported
    pub restart_timeout_ms: Option<u64>,
    /// Start live playback at the end of the window
    pub force_begin_playback_to_end_of_window: bool,
    /// Signal the live curtain around seeks
    pub show_live_curtain: bool,
    /// Hold a pause requested while exiting a seek until the seek settles
    pub pause_on_exit_seek: bool,
    /// html5: call play before seeking when a deferred seek runs
    pub deferred_playback: bool,
    /// html5: cache the element's seekable range for 250ms
    pub cache_seekable_range: bool,
}

impl Default for DeviceOverrides {
    fn default() -> Self {
        Self {
            disable_sentinels: false,
            disable_seek_sentinel: false,
            live_uhd_disable_sentinels: false,
            seek_sentinel_tolerance: None,
            sentinel_interval_ms: 1100,
            sentinel_maximum_attempts: 2,
            restart_timeout_ms: None,
            force_begin_playback_to_end_of_window: false,
            show_live_curtain: false,
            pause_on_exit_seek: false,
            deferred_playback: false,
            cache_seekable_range: false,
        }
    }
}

/// Timeouts in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Buffering timeout on the first buffering event of a session
    pub initial_buffering_ms: u64,
    /// Buffering timeout afterwards
    pub buffering_ms: u64,
    /// Grace before an error becomes fatal
    pub fatal_error_ms: u64,
    /// Delay before a failed source is reinstated
    pub failover_reset_ms: u64,
    /// Subtitle document request timeout
    pub subtitles_request_ms: u64,
    /// Manifest request timeout
    pub manifest_request_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            initial_buffering_ms: 30_000,
            buffering_ms: 20_000,
            fatal_error_ms: 5_000,
            failover_reset_ms: 120_000,
            subtitles_request_ms: 5_000,
            manifest_request_ms: 10_000,
        }
    }
}

/// Adaptive streaming settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MseSettings {
    /// Seconds kept behind the live edge
    pub live_delay: f64,
    /// Seconds kept clear of the end of the seekable range
    pub seek_duration_padding: f64,
}

impl Default for MseSettings {
    fn default() -> Self {
        Self {
            live_delay: 0.0,
            seek_duration_padding: 1.1,
        }
    }
}

/// Playback configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Strategy driving the engine
    pub strategy: StrategyKind,
    /// Device family for the native strategy
    pub device: DeviceKind,
    /// Declared live support tier
    pub live_support: LiveSupport,
    /// Device and workaround switches
    pub overrides: DeviceOverrides,
    /// Timeouts
    pub timeouts: Timeouts,
    /// Adaptive streaming settings
    pub mse: MseSettings,
}

impl PlaybackConfig {
    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file (JSON)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Live support tier actually offered by the selected strategy
    pub fn effective_live_support(&self) -> LiveSupport {
        match self.strategy {
            StrategyKind::Mse | StrategyKind::Basic => LiveSupport::Seekable,
            StrategyKind::Native => self.live_support,
        }
    }

    /// Reject impossible combinations
    pub fn validate(&self) -> Result<()> {
        if self.overrides.sentinel_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "sentinel_interval_ms must be greater than zero".into(),
            ));
        }
        if self.timeouts.buffering_ms == 0 || self.timeouts.initial_buffering_ms == 0 {
            return Err(Error::InvalidConfig(
                "buffering timeouts must be greater than zero".into(),
            ));
        }
        if self.mse.seek_duration_padding < 0.0 || self.mse.live_delay < 0.0 {
            return Err(Error::InvalidConfig(
                "live_delay and seek_duration_padding must not be negative".into(),
            ));
        }
        if let Some(tolerance) = self.overrides.seek_sentinel_tolerance {
            if tolerance <= 0.0 {
                return Err(Error::InvalidConfig(
                    "seek_sentinel_tolerance must be positive".into(),
                ));
            }
        }
        Ok(())
    }
}
