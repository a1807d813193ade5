//! Device media players
//!
//! Coordinates:
//! - The uniform [`MediaPlayer`] contract shared by devices and live decorators
//! - A generic state machine ([`DevicePlayer`]) with sentinels and seek tracking
//! - Thin capability providers for each device family
//!
//! A device never calls back into its owner. Everything it has to say is
//! queued as [`MediaPlayerEvent`]s, drained by the owner right after each call.

mod cehtml;
mod core;
mod html5;
mod samsung_maple;
mod samsung_streaming;
mod sentinel;

pub use self::cehtml::{Cehtml, CehtmlEvent, CehtmlObject, CehtmlPlayState};
pub use self::core::{Core, Device, DevicePlayer, DeviceProfile, DeviceReads};
pub use self::html5::{ElementEvent, Html5, VideoElement};
pub use self::samsung_maple::{MapleEvent, MaplePlugin, SamsungMaple};
pub use self::samsung_streaming::{SamsungStreaming, SefArg, SefEvent, SefPlugin, StreamingFirmware};
pub use self::sentinel::{SentinelFlavor, SentinelKind};

use crate::clock::{Scheduled, SharedClock};
use crate::config::{DeviceKind, DeviceOverrides};
use crate::{
    Error, MediaError, MediaType, PauseOptions, PlaybackState, Result, SeekableRange,
};
use serde::{Deserialize, Serialize};

/// Kind of a media player event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaPlayerEventKind {
    Stopped,
    Buffering,
    Playing,
    Paused,
    Complete,
    Error,
    Status,
    SentinelEnterBuffering,
    SentinelExitBuffering,
    SentinelPause,
    SentinelPlay,
    SentinelSeek,
    SentinelComplete,
    SentinelPauseFailure,
    SentinelSeekFailure,
    SeekAttempted,
    SeekFinished,
}

impl MediaPlayerEventKind {
    /// True for events that announce a state transition
    pub fn is_state_change(&self) -> bool {
        matches!(
            self,
            MediaPlayerEventKind::Stopped
                | MediaPlayerEventKind::Buffering
                | MediaPlayerEventKind::Playing
                | MediaPlayerEventKind::Paused
                | MediaPlayerEventKind::Complete
        )
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(
            self,
            MediaPlayerEventKind::SentinelEnterBuffering
                | MediaPlayerEventKind::SentinelExitBuffering
                | MediaPlayerEventKind::SentinelPause
                | MediaPlayerEventKind::SentinelPlay
                | MediaPlayerEventKind::SentinelSeek
                | MediaPlayerEventKind::SentinelComplete
                | MediaPlayerEventKind::SentinelPauseFailure
                | MediaPlayerEventKind::SentinelSeekFailure
        )
    }
}

impl std::fmt::Display for MediaPlayerEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MediaPlayerEventKind::Stopped => "stopped",
            MediaPlayerEventKind::Buffering => "buffering",
            MediaPlayerEventKind::Playing => "playing",
            MediaPlayerEventKind::Paused => "paused",
            MediaPlayerEventKind::Complete => "complete",
            MediaPlayerEventKind::Error => "error",
            MediaPlayerEventKind::Status => "status",
            MediaPlayerEventKind::SentinelEnterBuffering => "sentinel-enter-buffering",
            MediaPlayerEventKind::SentinelExitBuffering => "sentinel-exit-buffering",
            MediaPlayerEventKind::SentinelPause => "sentinel-pause",
            MediaPlayerEventKind::SentinelPlay => "sentinel-play",
            MediaPlayerEventKind::SentinelSeek => "sentinel-seek",
            MediaPlayerEventKind::SentinelComplete => "sentinel-complete",
            MediaPlayerEventKind::SentinelPauseFailure => "sentinel-pause-failure",
            MediaPlayerEventKind::SentinelSeekFailure => "sentinel-seek-failure",
            MediaPlayerEventKind::SeekAttempted => "seek-attempted",
            MediaPlayerEventKind::SeekFinished => "seek-finished",
        };
        write!(f, "{name}")
    }
}

/// Snapshot emitted with every media player event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPlayerEvent {
    pub kind: MediaPlayerEventKind,
    pub state: PlaybackState,
    pub current_time: Option<f64>,
    pub seekable_range: Option<SeekableRange>,
    pub duration: Option<f64>,
    pub url: Option<String>,
    pub mime_type: Option<String>,
    /// Human readable message on error events
    pub message: Option<String>,
    /// Engine error details, when the engine reported any
    pub error: Option<MediaError>,
}

impl MediaPlayerEvent {
    pub fn is(&self, kind: MediaPlayerEventKind) -> bool {
        self.kind == kind
    }
}

/// Options accepted by `initialise_media`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceOptions {
    pub disable_sentinels: bool,
    pub disable_seek_sentinel: bool,
}

/// Media loaded into a player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub media_type: MediaType,
    pub url: String,
    pub mime_type: String,
    pub options: SourceOptions,
}

impl MediaDescriptor {
    pub fn is_live(&self) -> bool {
        self.media_type.is_live()
    }

    pub fn is_hls(&self) -> bool {
        is_hls_mime_type(&self.mime_type)
    }
}

/// True for the HLS playlist mime types
pub fn is_hls_mime_type(mime_type: &str) -> bool {
    let mime = mime_type.to_ascii_lowercase();
    mime == "application/vnd.apple.mpegurl" || mime == "application/x-mpegurl"
}

/// Events raised by a host engine, routed to the player that owns it
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Element(ElementEvent),
    Cehtml(CehtmlEvent),
    Maple(MapleEvent),
    Sef(SefEvent),
}

/// The uniform playback contract
///
/// Invalid (state, command) pairs return [`Error::InvalidCommand`], queue an
/// error event and leave the state untouched.
pub trait MediaPlayer: Scheduled + Send {
    fn initialise_media(
        &mut self,
        media_type: MediaType,
        url: &str,
        mime_type: &str,
        options: SourceOptions,
    ) -> Result<()>;

    fn begin_playback(&mut self) -> Result<()>;

    fn begin_playback_from(&mut self, seconds: f64) -> Result<()>;

    fn play_from(&mut self, seconds: f64) -> Result<()>;

    fn pause(&mut self, options: PauseOptions) -> Result<()>;

    fn resume(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn reset(&mut self) -> Result<()>;

    fn state(&self) -> PlaybackState;

    fn current_time(&self) -> Option<f64>;

    fn seekable_range(&self) -> Option<SeekableRange>;

    fn duration(&self) -> Option<f64>;

    fn source(&self) -> Option<String>;

    fn mime_type(&self) -> Option<String>;

    /// Feed an engine event to the player
    fn handle_device_event(&mut self, event: DeviceEvent);

    /// Take every event queued since the last drain
    fn drain_events(&mut self) -> Vec<MediaPlayerEvent>;

    /// Force the paused state without touching the engine
    fn to_paused(&mut self);

    /// Force the playing state without touching the engine
    fn to_playing(&mut self);

    fn set_playback_rate(&mut self, _rate: f64) {}

    fn playback_rate(&self) -> f64 {
        1.0
    }
}

impl<T: MediaPlayer + ?Sized> MediaPlayer for Box<T> {
    fn initialise_media(
        &mut self,
        media_type: MediaType,
        url: &str,
        mime_type: &str,
        options: SourceOptions,
    ) -> Result<()> {
        (**self).initialise_media(media_type, url, mime_type, options)
    }

    fn begin_playback(&mut self) -> Result<()> {
        (**self).begin_playback()
    }

    fn begin_playback_from(&mut self, seconds: f64) -> Result<()> {
        (**self).begin_playback_from(seconds)
    }

    fn play_from(&mut self, seconds: f64) -> Result<()> {
        (**self).play_from(seconds)
    }

    fn pause(&mut self, options: PauseOptions) -> Result<()> {
        (**self).pause(options)
    }

    fn resume(&mut self) -> Result<()> {
        (**self).resume()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }

    fn state(&self) -> PlaybackState {
        (**self).state()
    }

    fn current_time(&self) -> Option<f64> {
        (**self).current_time()
    }

    fn seekable_range(&self) -> Option<SeekableRange> {
        (**self).seekable_range()
    }

    fn duration(&self) -> Option<f64> {
        (**self).duration()
    }

    fn source(&self) -> Option<String> {
        (**self).source()
    }

    fn mime_type(&self) -> Option<String> {
        (**self).mime_type()
    }

    fn handle_device_event(&mut self, event: DeviceEvent) {
        (**self).handle_device_event(event)
    }

    fn drain_events(&mut self) -> Vec<MediaPlayerEvent> {
        (**self).drain_events()
    }

    fn to_paused(&mut self) {
        (**self).to_paused()
    }

    fn to_playing(&mut self) {
        (**self).to_playing()
    }

    fn set_playback_rate(&mut self, rate: f64) {
        (**self).set_playback_rate(rate)
    }

    fn playback_rate(&self) -> f64 {
        (**self).playback_rate()
    }
}

impl<T: Scheduled + ?Sized> Scheduled for Box<T> {
    fn next_deadline(&self) -> Option<u64> {
        (**self).next_deadline()
    }

    fn poll_timers(&mut self) {
        (**self).poll_timers()
    }

    fn pending_timers(&self) -> usize {
        (**self).pending_timers()
    }
}

/// Host engine handed to [`create_media_player`]
pub enum DeviceHost {
    Element(Box<dyn VideoElement>),
    Cehtml(Box<dyn CehtmlObject>),
    Maple(Box<dyn MaplePlugin>),
    Sef(Box<dyn SefPlugin>),
}

impl DeviceHost {
    fn name(&self) -> &'static str {
        match self {
            DeviceHost::Element(_) => "element",
            DeviceHost::Cehtml(_) => "cehtml",
            DeviceHost::Maple(_) => "maple",
            DeviceHost::Sef(_) => "sef",
        }
    }
}

impl std::fmt::Debug for DeviceHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DeviceHost").field(&self.name()).finish()
    }
}

/// Build the device player for `kind` over a matching host engine
pub fn create_media_player(
    kind: DeviceKind,
    host: DeviceHost,
    clock: SharedClock,
    overrides: &DeviceOverrides,
) -> Result<Box<dyn MediaPlayer>> {
    let player: Box<dyn MediaPlayer> = match (kind, host) {
        (DeviceKind::Html5, DeviceHost::Element(element)) => Box::new(DevicePlayer::new(
            Html5::new(element, clock.clone(), overrides),
            clock,
            overrides.clone(),
        )),
        (DeviceKind::Cehtml, DeviceHost::Cehtml(object)) => Box::new(DevicePlayer::new(
            Cehtml::new(object),
            clock,
            overrides.clone(),
        )),
        (DeviceKind::SamsungMaple, DeviceHost::Maple(plugin)) => Box::new(DevicePlayer::new(
            SamsungMaple::new(plugin),
            clock,
            overrides.clone(),
        )),
        (DeviceKind::SamsungStreaming, DeviceHost::Sef(plugin)) => Box::new(DevicePlayer::new(
            SamsungStreaming::new(plugin, StreamingFirmware::Standard),
            clock,
            overrides.clone(),
        )),
        (DeviceKind::SamsungStreaming2015, DeviceHost::Sef(plugin)) => Box::new(DevicePlayer::new(
            SamsungStreaming::new(plugin, StreamingFirmware::Tizen2015),
            clock,
            overrides.clone(),
        )),
        (kind, host) => {
            return Err(Error::DeviceSetup(format!(
                "{kind} cannot drive a {} host",
                host.name()
            )))
        }
    };
    Ok(player)
}
