//! Core types for Kino Playback

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a device-level media player
///
/// Exactly one state is active per player at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackState {
    Empty,
    Stopped,
    Buffering,
    Playing,
    Paused,
    Complete,
    Error,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Empty => write!(f, "EMPTY"),
            PlaybackState::Stopped => write!(f, "STOPPED"),
            PlaybackState::Buffering => write!(f, "BUFFERING"),
            PlaybackState::Playing => write!(f, "PLAYING"),
            PlaybackState::Paused => write!(f, "PAUSED"),
            PlaybackState::Complete => write!(f, "COMPLETE"),
            PlaybackState::Error => write!(f, "ERROR"),
        }
    }
}

/// Application-facing media state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaState {
    Stopped,
    Paused,
    Playing,
    Waiting,
    Ended,
    FatalError,
}

impl MediaState {
    /// Numeric code exposed to host applications
    pub fn code(&self) -> u8 {
        match self {
            MediaState::Stopped => 0,
            MediaState::Paused => 1,
            MediaState::Playing => 2,
            MediaState::Waiting => 4,
            MediaState::Ended => 5,
            MediaState::FatalError => 6,
        }
    }
}

impl std::fmt::Display for MediaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaState::Stopped => write!(f, "STOPPED"),
            MediaState::Paused => write!(f, "PAUSED"),
            MediaState::Playing => write!(f, "PLAYING"),
            MediaState::Waiting => write!(f, "WAITING"),
            MediaState::Ended => write!(f, "ENDED"),
            MediaState::FatalError => write!(f, "FATAL_ERROR"),
        }
    }
}

/// Commands accepted by a media player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    InitialiseMedia,
    BeginPlayback,
    BeginPlaybackFrom,
    PlayFrom,
    Pause,
    Resume,
    Stop,
    Reset,
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::InitialiseMedia => write!(f, "initialise media"),
            Command::BeginPlayback => write!(f, "begin playback"),
            Command::BeginPlaybackFrom => write!(f, "begin playback from"),
            Command::PlayFrom => write!(f, "play from"),
            Command::Pause => write!(f, "pause"),
            Command::Resume => write!(f, "resume"),
            Command::Stop => write!(f, "stop"),
            Command::Reset => write!(f, "reset"),
        }
    }
}

/// Classification of a stream's time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    #[default]
    Static,
    Growing,
    Sliding,
}

impl WindowType {
    pub fn is_live(&self) -> bool {
        !matches!(self, WindowType::Static)
    }
}

impl std::fmt::Display for WindowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowType::Static => write!(f, "staticWindow"),
            WindowType::Growing => write!(f, "growingWindow"),
            WindowType::Sliding => write!(f, "slidingWindow"),
        }
    }
}

/// Live support tier of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LiveSupport {
    None,
    Playable,
    Restartable,
    #[default]
    Seekable,
}

impl std::fmt::Display for LiveSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiveSupport::None => write!(f, "none"),
            LiveSupport::Playable => write!(f, "playable"),
            LiveSupport::Restartable => write!(f, "restartable"),
            LiveSupport::Seekable => write!(f, "seekable"),
        }
    }
}

/// Kind of media being played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    #[default]
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Media type handed to a device player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaType {
    Audio,
    Video,
    LiveAudio,
    LiveVideo,
}

impl MediaType {
    pub fn is_live(&self) -> bool {
        matches!(self, MediaType::LiveAudio | MediaType::LiveVideo)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, MediaType::Audio | MediaType::LiveAudio)
    }

    /// The live variant of this media type
    pub fn to_live(self) -> Self {
        match self {
            MediaType::Audio | MediaType::LiveAudio => MediaType::LiveAudio,
            MediaType::Video | MediaType::LiveVideo => MediaType::LiveVideo,
        }
    }

    pub fn for_kind(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => MediaType::Audio,
            MediaKind::Video => MediaType::Video,
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaType::Audio => write!(f, "audio"),
            MediaType::Video => write!(f, "video"),
            MediaType::LiveAudio => write!(f, "live-audio"),
            MediaType::LiveVideo => write!(f, "live-video"),
        }
    }
}

/// Streaming transfer format of the active source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferFormat {
    Dash,
    Hls,
}

impl std::fmt::Display for TransferFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferFormat::Dash => write!(f, "dash"),
            TransferFormat::Hls => write!(f, "hls"),
        }
    }
}

/// Currently playable span, in the engine's own clock (seconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct SeekableRange {
    pub start: f64,
    pub end: f64,
}

impl SeekableRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// True for the `{0, 0}` placeholder engines report before metadata
    pub fn is_empty(&self) -> bool {
        self.start == 0.0 && self.end == 0.0
    }

    /// Shift both ends by `offset` seconds
    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
        }
    }
}

/// One candidate source (CDN + URL)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaSourceEntry {
    pub cdn: String,
    pub url: String,
}

impl MediaSourceEntry {
    pub fn new(cdn: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            cdn: cdn.into(),
            url: url.into(),
        }
    }
}

/// Who asked for a pause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseTrigger {
    User,
    App,
    Device,
}

impl PauseTrigger {
    pub fn code(&self) -> u8 {
        match self {
            PauseTrigger::User => 1,
            PauseTrigger::App => 2,
            PauseTrigger::Device => 3,
        }
    }
}

/// Options accepted by pause commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PauseOptions {
    /// Do not schedule an automatic resume for live windows
    pub disable_auto_resume: bool,
    /// Origin of the pause request
    pub trigger: Option<PauseTrigger>,
}

impl PauseOptions {
    pub fn no_auto_resume() -> Self {
        Self {
            disable_auto_resume: true,
            trigger: None,
        }
    }
}

/// A playback error reported by an engine or a strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MediaError {
    pub code: i32,
    pub message: String,
}

impl MediaError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Well known error codes raised by the orchestration layer
pub mod error_codes {
    /// Buffering did not clear within the buffering timeout
    pub const BUFFERING_TIMEOUT: i32 = 8;
    pub const BUFFERING_TIMEOUT_MESSAGE: &str = "bigscreen-player-buffering-timeout-error";
    /// Manifest could not be (re)loaded
    pub const MANIFEST_LOAD: i32 = 9;
    pub const MANIFEST_LOAD_MESSAGE: &str = "bigscreen-player-manifest-error";
    /// Manifest could not be parsed
    pub const MANIFEST_PARSE: i32 = 7;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_live_variant() {
        assert_eq!(MediaType::Video.to_live(), MediaType::LiveVideo);
        assert_eq!(MediaType::Audio.to_live(), MediaType::LiveAudio);
        assert!(MediaType::LiveAudio.is_live());
        assert!(MediaType::LiveAudio.is_audio());
    }

    #[test]
    fn test_seekable_range_placeholder() {
        assert!(SeekableRange::default().is_empty());
        assert!(!SeekableRange::new(0.0, 10.0).is_empty());
        assert_eq!(SeekableRange::new(5.0, 10.0).shifted(-5.0), SeekableRange::new(0.0, 5.0));
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&PlaybackState::Buffering).unwrap();
        assert_eq!(json, "\"BUFFERING\"");
        let state: MediaState = serde_json::from_str("\"FATAL_ERROR\"").unwrap();
        assert_eq!(state, MediaState::FatalError);
        assert_eq!(state.code(), 6);
    }

    #[test]
    fn test_window_type_is_live() {
        assert!(!WindowType::Static.is_live());
        assert!(WindowType::Sliding.is_live());
        assert!(WindowType::Growing.is_live());
    }
}
