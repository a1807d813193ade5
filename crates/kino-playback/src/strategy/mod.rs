//! Playback strategies
//!
//! Coordinates:
//! - The [`Strategy`] contract the player component drives
//! - Native playback over a (live decorated) device player
//! - Basic playback straight over a media element
//! - Adaptive streaming over an MSE engine ([`DashEngine`])
//!
//! Strategies never call back into their owner. State changes, time updates,
//! errors and failover requests are queued as [`StrategyEvent`]s and drained
//! after every call.

mod basic;
mod mse;
mod native;

pub use self::basic::BasicStrategy;
pub use self::mse::{
    build_source_anchor, engine_error_codes, DashEngine, DashEvent, DvrInfo, MseStrategy,
    TimelineZeroPoint,
};
pub use self::native::NativeStrategy;

use crate::clock::{Scheduled, SharedClock};
use crate::config::{PlaybackConfig, StrategyKind};
use crate::live::wrap_for_live;
use crate::media_player::{create_media_player, DeviceEvent, DeviceHost};
use crate::media_sources::{FailoverParams, MediaSources};
use crate::plugins::Plugins;
use crate::{
    Error, MediaError, MediaKind, MediaState, PauseOptions, PlaybackState, Result, SeekableRange,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What a strategy has to tell its owner
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyEvent {
    State(MediaState),
    TimeUpdate,
    Error(MediaError),
    /// Move to the next source
    ///
    /// With `reload` the strategy is loaded again once the source changed;
    /// `on_failure` is published as an error when failover is refused.
    Failover {
        params: FailoverParams,
        reload: bool,
        on_failure: Option<MediaError>,
    },
    /// Show or hide the curtain covering a live seek
    LiveCurtain { visible: bool },
}

/// Commands the current strategy state allows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transitions {
    pub can_be_paused: bool,
    pub can_be_stopped: bool,
    pub can_begin_seek: bool,
    pub can_resume: bool,
}

impl Transitions {
    pub fn all() -> Self {
        Self {
            can_be_paused: true,
            can_be_stopped: true,
            can_begin_seek: true,
            can_resume: true,
        }
    }

    /// Transitions a device player allows in `state`
    pub fn for_state(state: PlaybackState) -> Self {
        let usable = !matches!(state, PlaybackState::Empty | PlaybackState::Error);
        Self {
            can_be_paused: matches!(state, PlaybackState::Buffering | PlaybackState::Playing),
            can_be_stopped: usable,
            can_begin_seek: usable,
            can_resume: matches!(state, PlaybackState::Paused | PlaybackState::Buffering),
        }
    }
}

/// Events raised by the host engines of a strategy
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// Device or media element event
    Device(DeviceEvent),
    /// Adaptive streaming engine event
    Dash(DashEvent),
}

impl From<DeviceEvent> for HostEvent {
    fn from(event: DeviceEvent) -> Self {
        HostEvent::Device(event)
    }
}

impl From<DashEvent> for HostEvent {
    fn from(event: DashEvent) -> Self {
        HostEvent::Dash(event)
    }
}

/// The playback contract the player component drives
pub trait Strategy: Scheduled + Send {
    fn kind(&self) -> StrategyKind;

    /// Load the current source; `start_time` in seconds, `None` for the live point
    fn load(
        &mut self,
        sources: &MediaSources,
        mime_type: &str,
        start_time: Option<f64>,
    ) -> Result<()>;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self, options: PauseOptions) -> Result<()>;

    fn set_current_time(&mut self, seconds: f64) -> Result<()>;

    fn current_time(&self) -> Option<f64>;

    fn seekable_range(&self) -> Option<SeekableRange>;

    fn duration(&self) -> f64;

    fn is_paused(&self) -> bool;

    fn is_ended(&self) -> bool;

    fn transitions(&self) -> Transitions;

    fn set_playback_rate(&mut self, rate: f64);

    fn playback_rate(&self) -> f64;

    fn set_subtitles(&mut self, enabled: bool);

    fn handle_host_event(&mut self, sources: &MediaSources, event: HostEvent);

    /// Take every event queued since the last drain
    fn drain_events(&mut self) -> Vec<StrategyEvent>;

    /// Release the media so it can be loaded again
    fn reset(&mut self);

    /// Release everything, including timers
    fn tear_down(&mut self);
}

/// Engine a strategy is built over
pub enum StrategyHost {
    Device(DeviceHost),
    Dash(Box<dyn DashEngine>),
}

impl std::fmt::Debug for StrategyHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyHost::Device(host) => f.debug_tuple("Device").field(host).finish(),
            StrategyHost::Dash(_) => f.debug_tuple("Dash").finish(),
        }
    }
}

/// Media facts a strategy is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StrategyMedia {
    pub kind: MediaKind,
    pub is_uhd: bool,
}

/// Build the configured strategy over `host`
///
/// `sources` must be initialised: its window and time correction are read once.
pub fn create_strategy(
    config: &PlaybackConfig,
    host: StrategyHost,
    sources: &MediaSources,
    media: StrategyMedia,
    plugins: Plugins,
    clock: SharedClock,
) -> Result<Box<dyn Strategy>> {
    debug!(strategy = %config.strategy, window_type = %sources.window_type(), "Creating strategy");
    let strategy: Box<dyn Strategy> = match (config.strategy, host) {
        (StrategyKind::Native, StrategyHost::Device(host)) => {
            let player = create_media_player(
                config.device,
                host,
                clock.clone(),
                &config.overrides,
            )?;
            let player = wrap_for_live(
                player,
                config.live_support,
                sources.window_type(),
                sources.time(),
                clock.clone(),
                &config.overrides,
            )?;
            Box::new(NativeStrategy::new(player, sources, media, &config.overrides, clock))
        }
        (StrategyKind::Basic, StrategyHost::Device(DeviceHost::Element(element))) => {
            Box::new(BasicStrategy::new(element, sources, media.kind, clock))
        }
        (StrategyKind::Mse, StrategyHost::Dash(engine)) => Box::new(MseStrategy::new(
            engine,
            sources,
            media.kind,
            config.mse.clone(),
            plugins,
            clock,
        )),
        (kind, host) => {
            return Err(Error::DeviceSetup(format!("{kind} cannot run over {host:?}")));
        }
    };
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_for_state() {
        let playing = Transitions::for_state(PlaybackState::Playing);
        assert!(playing.can_be_paused);
        assert!(!playing.can_resume);

        let buffering = Transitions::for_state(PlaybackState::Buffering);
        assert!(buffering.can_be_paused && buffering.can_resume);

        let empty = Transitions::for_state(PlaybackState::Empty);
        assert!(!empty.can_be_stopped);
        assert!(!empty.can_begin_seek);

        let paused = Transitions::for_state(PlaybackState::Paused);
        assert!(!paused.can_be_paused);
        assert!(paused.can_begin_seek);
    }
}
