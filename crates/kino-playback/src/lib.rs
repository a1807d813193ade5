//! Kino Playback - Cross-Device Playback Orchestration for Kino
//!
//! This crate drives media playback on devices with very different engines:
//! - Device media player state machines (HTML5, CE-HTML, Samsung Maple and Streaming)
//! - Live-window decorators for playable, restartable and seekable live support
//! - Playback strategies over a device player, a bare element or an adaptive engine
//! - Ordered CDN sources with failover and timed reinstatement
//! - Manifest window extraction for DASH and HLS
//! - Buffering and fatal error timeouts, plugin notifications
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Kino Playback                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐        ┌──────────────┐                       │
//! │  │   Session    │◄───────┤    Driver    │◄── commands (tokio)   │
//! │  │  (facade)    │        └──────┬───────┘                       │
//! │  └──────┬───────┘               │ manifest loads                │
//! │         │                ┌──────┴───────┐                       │
//! │  ┌──────┴───────┐        │   Manifest   │                       │
//! │  │   Player     │        │    Loader    │                       │
//! │  │  Component   ├──┐     └──────────────┘                       │
//! │  └──────┬───────┘  │                                            │
//! │         │          │     ┌──────────────┐  ┌──────────────┐     │
//! │  ┌──────┴───────┐  └────►│    Media     │  │   Plugins    │     │
//! │  │   Strategy   │        │   Sources    │  │  (Event Bus) │     │
//! │  └──────┬───────┘        └──────────────┘  └──────────────┘     │
//! │         │                                                       │
//! │  ┌──────┴───────┐  ┌──────────────┐                             │
//! │  │ Live Player  ├──► Media Player │  HTML5 / CE-HTML / Samsung   │
//! │  └──────────────┘  └──────────────┘                             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every component below the driver is sans-IO: timers are deadline slots
//! measured against a [`clock::Clock`], and manifest loads are requests the
//! owner runs and hands back.

pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod live;
pub mod manifest;
pub mod media_player;
pub mod media_sources;
pub mod player;
pub mod player_component;
pub mod plugins;
pub mod ready;
pub mod sim;
pub mod strategy;
pub mod time;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
pub use clock::{Clock, ManualClock, Scheduled, SharedClock, SystemClock};
pub use config::{DeviceKind, PlaybackConfig, StrategyKind, Timeouts};
pub use driver::{DriverCommand, SessionDriver, SessionHandle, TokioClock};
pub use manifest::{ManifestData, ManifestLoader, RemoteManifestLoader, TimeData};
pub use media_sources::{MediaSources, SubtitlesSource};
pub use player::{
    MediaDescription, PauseRequest, PlayerSession, SessionEvent, SessionInit, StateChange,
};
pub use plugins::{Plugin, PluginEvent, Plugins};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version once at startup
pub fn init() {
    tracing::info!(version = VERSION, "Kino Playback initialized");
}
