//! Samsung SEF streaming player device
//!
//! Handles:
//! - Opening the plugin flavour the source needs (`Player` or `StreamingPlayer`)
//! - Relative jump seeks, deferred until the first time update
//! - Keeping the live HLS playing range fresh without querying the plugin on
//!   every time update
//!
//! Two firmware generations are supported. 2015 firmware has no streaming
//! player flavour and reports the live range as a millisecond `a|b` string.

use super::core::{Core, Device, DeviceProfile, DeviceReads};
use super::DeviceEvent;
use crate::clock::Timeout;
use crate::{PlaybackState, SeekableRange};
use tracing::{debug, warn};

const CURRENT_TIME_TOLERANCE: f64 = 4.0;
const CLAMP_OFFSET_FROM_END_OF_LIVE_RANGE: f64 = 10.0;
const CLAMP_OFFSET_FROM_START_OF_RANGE: f64 = 1.1;
const CLAMP_OFFSET_FROM_END_OF_RANGE: f64 = 1.1;
/// Seconds between live range queries
const RANGE_UPDATE_TOLERANCE: f64 = 8.0;
/// A time this far past the range end is a bogus timestamp
const RANGE_END_TOLERANCE: f64 = 100.0;

/// Argument to a plugin `Execute` call
#[derive(Debug, Clone, PartialEq)]
pub enum SefArg {
    Int(i64),
    Float(f64),
    Str(String),
}

impl std::fmt::Display for SefArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SefArg::Int(value) => write!(f, "{value}"),
            SefArg::Float(value) => write!(f, "{value}"),
            SefArg::Str(value) => write!(f, "{value}"),
        }
    }
}

/// Handle on the host `sefPlayer` plugin
pub trait SefPlugin: Send {
    fn open(&mut self, name: &str, version: &str, id: &str) -> bool;

    fn close(&mut self);

    /// Run a command returning a numeric result
    fn execute(&mut self, command: &str, args: &[SefArg]) -> i64;

    /// Run a command returning a string result
    fn query(&mut self, command: &str) -> String;
}

/// An `OnEvent` callback from the plugin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SefEvent {
    pub code: i32,
    pub param: f64,
}

impl SefEvent {
    pub const CONNECTION_FAILED: i32 = 1;
    pub const AUTHENTICATION_FAILED: i32 = 2;
    pub const STREAM_NOT_FOUND: i32 = 3;
    pub const NETWORK_DISCONNECTED: i32 = 4;
    pub const RENDER_ERROR: i32 = 6;
    pub const RENDERING_COMPLETE: i32 = 8;
    pub const STREAM_INFO_READY: i32 = 9;
    pub const BUFFERING_START: i32 = 11;
    pub const BUFFERING_COMPLETE: i32 = 12;
    pub const BUFFERING_PROGRESS: i32 = 13;
    pub const CURRENT_PLAYBACK_TIME: i32 = 14;

    pub fn new(code: i32) -> Self {
        Self { code, param: 0.0 }
    }

    /// A time update, in milliseconds
    pub fn current_time(millis: f64) -> Self {
        Self {
            code: Self::CURRENT_PLAYBACK_TIME,
            param: millis,
        }
    }
}

/// Firmware generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamingFirmware {
    Standard,
    Tizen2015,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PluginFlavor {
    Player,
    StreamingPlayer,
}

/// Samsung streaming device
pub struct SamsungStreaming {
    plugin: Box<dyn SefPlugin>,
    firmware: StreamingFirmware,
    current_player: Option<PluginFlavor>,
    source: String,
    current_time: Option<f64>,
    range: Option<SeekableRange>,
    current_time_known: bool,
    trying_to_pause: bool,
    /// Blocks live range queries while pending
    updating_time: Timeout,
    last_window_ranged: Option<i64>,
}

impl SamsungStreaming {
    pub fn new(plugin: Box<dyn SefPlugin>, firmware: StreamingFirmware) -> Self {
        Self {
            plugin,
            firmware,
            current_player: None,
            source: String::new(),
            current_time: None,
            range: None,
            current_time_known: false,
            trying_to_pause: false,
            updating_time: Timeout::new(),
            last_window_ranged: None,
        }
    }

    fn updating(&self) -> bool {
        self.updating_time.is_pending()
    }

    fn is_hls_live(core: &Core) -> bool {
        core.is_hls() && core.is_live()
    }

    fn open_plugin(&mut self, flavor: PluginFlavor) {
        if self.current_player.is_some() {
            self.plugin.close();
        }
        match flavor {
            PluginFlavor::Player => self.plugin.open("Player", "1.010", "Player"),
            PluginFlavor::StreamingPlayer => self.plugin.open(
                "StreamingPlayer",
                "1.0",
                "StreamingPlayer",
            ),
        };
        self.current_player = Some(flavor);
    }

    fn close_plugin(&mut self) {
        self.plugin.close();
        self.current_player = None;
    }

    fn init_player(&mut self) -> Result<(), String> {
        let result = self.plugin.execute("InitPlayer", &[SefArg::Str(self.source.clone())]);
        if result == 1 {
            Ok(())
        } else {
            Err(format!("Failed to initialize video: {}", self.source))
        }
    }

    fn stop_player(&mut self) {
        self.plugin.execute("Stop", &[]);
        self.current_time_known = false;
    }

    fn parse_live_range(&self, raw: &str) -> Option<SeekableRange> {
        let (separator, scale) = match self.firmware {
            StreamingFirmware::Standard => ('-', 1.0),
            StreamingFirmware::Tizen2015 => ('|', 1000.0),
        };
        let (start, end) = raw.split_once(separator)?;
        let start = start.trim().parse::<f64>().ok()?;
        let end = end.trim().parse::<f64>().ok()?;
        Some(SeekableRange::new((start / scale).floor(), (end / scale).floor()))
    }

    fn update_range(&mut self, core: &Core) {
        if Self::is_hls_live(core) {
            let command = match self.firmware {
                StreamingFirmware::Standard => "GetPlayingRange",
                StreamingFirmware::Tizen2015 => "GetLiveDuration",
            };
            let raw = self.plugin.query(command);
            match self.parse_live_range(&raw) {
                Some(range) => self.range = Some(range),
                None => warn!(command, %raw, "Unreadable live range"),
            }
            self.updating_time
                .start(core.now(), (RANGE_UPDATE_TOLERANCE * 1000.0) as u64);
        } else {
            let duration = self.plugin.execute("GetDuration", &[]) as f64 / 1000.0;
            self.range = Some(SeekableRange::new(0.0, duration));
        }
    }

    fn refreshes_range_before_clamping(&self, core: &Core) -> bool {
        let refreshable = match self.firmware {
            StreamingFirmware::Standard => {
                self.current_player == Some(PluginFlavor::StreamingPlayer)
            }
            StreamingFirmware::Tizen2015 => Self::is_hls_live(core),
        };
        refreshable && !self.updating()
    }

    fn clamped_for_play_from(&mut self, core: &Core, seconds: f64) -> f64 {
        if self.refreshes_range_before_clamping(core) {
            self.update_range(core);
        }
        core.clamped_time(&*self, seconds)
    }

    fn to_playing(&mut self, core: &mut Core) {
        if Self::is_hls_live(core) && !self.updating() {
            self.update_range(core);
        }
        core.to_playing(&*self);
    }

    fn to_stopped(&mut self, core: &mut Core) {
        self.current_time = Some(0.0);
        self.range = None;
        core.to_stopped(&*self);
    }

    fn try_pause(&mut self, core: &mut Core) {
        let result = self.plugin.execute("Pause", &[]);
        let success = result != 0 && result != -1;
        if success {
            core.to_paused(&*self);
        }
        self.trying_to_pause = !success;
    }

    fn seek_to(&mut self, core: &Core, seconds: f64) -> bool {
        let offset = seconds - self.current_time(core).unwrap_or(0.0);
        let result = if offset > 0.0 {
            self.plugin.execute("JumpForward", &[SefArg::Float(offset)])
        } else {
            self.plugin.execute("JumpBackward", &[SefArg::Float(offset.abs())])
        };
        let success = result == 1;
        if success {
            self.current_time = Some(seconds);
        }
        success
    }

    fn seek_with_failure_transition(&mut self, core: &mut Core, seconds: f64) {
        if !self.seek_to(core, seconds) {
            self.to_playing(core);
        }
    }

    fn deferred_seek(&mut self, core: &mut Core, target: f64) {
        let clamped = self.clamped_for_play_from(core, target);
        if core.is_near_current_time(&*self, clamped) {
            self.to_playing(core);
            core.defer_seek = None;
        } else if self.seek_to(core, clamped) {
            core.defer_seek = None;
        }
    }

    fn is_initial_buffering_finished(&self) -> bool {
        !matches!(self.current_time, None | Some(0.0))
    }

    fn on_finished_buffering(&mut self, core: &mut Core) {
        if core.state() != PlaybackState::Buffering {
            return;
        }
        if !self.is_initial_buffering_finished() {
            if let Some(next) = core.next_seek.take() {
                core.defer_seek = Some(next);
            }
        }
        if core.defer_seek.is_none() {
            if core.post_buffering == PlaybackState::Paused {
                self.try_pause(core);
            } else {
                self.to_playing(core);
            }
        }
    }

    fn is_live_range_outdated(&mut self) -> bool {
        let Some(time) = self.current_time.map(|t| t.floor() as i64) else {
            return false;
        };
        if time % RANGE_UPDATE_TOLERANCE as i64 == 0
            && !self.updating()
            && self.last_window_ranged != Some(time)
        {
            self.last_window_ranged = Some(time);
            true
        } else {
            false
        }
    }

    fn on_current_time(&mut self, core: &mut Core, millis: f64) {
        self.current_time = Some(millis / 1000.0);
        core.on_status(&*self);
        self.current_time_known = true;

        // shift the live window locally instead of asking the plugin
        if core.is_live() && self.is_live_range_outdated() {
            if let Some(range) = self.range.as_mut() {
                *range = range.shifted(RANGE_UPDATE_TOLERANCE);
            }
        }

        if let Some(next) = core.next_seek.take() {
            core.defer_seek = Some(next);
        }
        if let Some(target) = core.defer_seek {
            self.deferred_seek(core, target);
        }
        if self.trying_to_pause {
            self.try_pause(core);
        }
    }

    fn on_playback_time(&mut self, core: &mut Core, millis: f64) {
        if let (Some(range), true) = (self.range, core.is_live()) {
            let seconds = (millis / 1000.0).floor();
            if seconds > range.end + RANGE_END_TOLERANCE {
                debug!(
                    seconds,
                    end = range.end,
                    "Time update far beyond the live range, replaying"
                );
                if matches!(
                    core.state(),
                    PlaybackState::Buffering
                        | PlaybackState::Playing
                        | PlaybackState::Paused
                        | PlaybackState::Complete
                ) {
                    let current = self.current_time.unwrap_or(0.0);
                    core.post_buffering = PlaybackState::Playing;
                    self.play_from(core, current);
                }
                return;
            }
            let in_tolerance = seconds <= range.end + RANGE_UPDATE_TOLERANCE
                && seconds >= range.start - RANGE_UPDATE_TOLERANCE;
            if !in_tolerance {
                self.update_range(core);
            }
        }
        self.on_current_time(core, millis);
    }
}

impl DeviceReads for SamsungStreaming {
    fn current_time(&self, core: &Core) -> Option<f64> {
        if core.state() == PlaybackState::Stopped {
            None
        } else {
            self.current_time
        }
    }

    fn seekable_range(&self, core: &Core) -> Option<SeekableRange> {
        match core.state() {
            PlaybackState::Stopped | PlaybackState::Error => None,
            _ => self.range,
        }
    }

    fn duration(&self, _core: &Core) -> Option<f64> {
        self.range.map(|range| range.end)
    }
}

impl Device for SamsungStreaming {
    fn profile(&self) -> DeviceProfile {
        DeviceProfile {
            name: match self.firmware {
                StreamingFirmware::Standard => "samsungstreaming",
                StreamingFirmware::Tizen2015 => "samsungstreaming2015",
            },
            sentinels: None,
            tracks_seek_finished: false,
            status_poll_ms: None,
            current_time_tolerance: CURRENT_TIME_TOLERANCE,
            clamp_offset_from_end: CLAMP_OFFSET_FROM_END_OF_RANGE,
            live_clamp_offset_from_end: CLAMP_OFFSET_FROM_END_OF_LIVE_RANGE,
        }
    }

    fn open(&mut self, core: &mut Core) -> Result<(), String> {
        let url = core.source().ok_or_else(|| "no media to load".to_string())?.to_string();
        self.current_time = Some(0.0);
        self.range = None;

        self.source = if core.is_hls() {
            match self.firmware {
                StreamingFirmware::Standard => {
                    self.open_plugin(PluginFlavor::StreamingPlayer);
                    if core.is_live() {
                        format!("{url}|HLSSLIDING|COMPONENT=HLS")
                    } else {
                        format!("{url}|COMPONENT=HLS")
                    }
                }
                StreamingFirmware::Tizen2015 => {
                    self.open_plugin(PluginFlavor::Player);
                    format!("{url}|COMPONENT=HLS")
                }
            }
        } else {
            self.open_plugin(PluginFlavor::Player);
            url
        };

        self.init_player()
    }

    fn wipe(&mut self, _core: &mut Core) {
        self.stop_player();
        self.close_plugin();
        self.source.clear();
        self.current_time = None;
        self.range = None;
        self.trying_to_pause = false;
        self.updating_time.cancel();
        self.last_window_ranged = None;
    }

    fn begin_playback(&mut self, core: &mut Core) {
        core.to_buffering(&*self);
        self.plugin.execute("StartPlayback", &[]);
    }

    fn begin_playback_from(&mut self, core: &mut Core, seconds: f64) {
        let seeking_to = core.clamped_time(&*self, seconds);
        // starting right at the beginning of a live range shows the wrong picture
        let start = if seeking_to < CLAMP_OFFSET_FROM_START_OF_RANGE && core.is_live() {
            SefArg::Float(CLAMP_OFFSET_FROM_START_OF_RANGE)
        } else {
            SefArg::Int(seeking_to.floor() as i64)
        };
        self.plugin.execute("StartPlayback", &[start]);
        core.to_buffering(&*self);
    }

    fn play_from(&mut self, core: &mut Core, seconds: f64) {
        let seeking_to = if self.range.is_some() {
            self.clamped_for_play_from(core, seconds)
        } else {
            seconds
        };

        match core.state() {
            PlaybackState::Buffering => core.next_seek = Some(seeking_to),
            PlaybackState::Playing => {
                core.to_buffering(&*self);
                if !self.current_time_known {
                    core.defer_seek = Some(seeking_to);
                } else if core.is_near_current_time(&*self, seeking_to) {
                    self.to_playing(core);
                } else {
                    self.seek_with_failure_transition(core, seeking_to);
                }
            }
            PlaybackState::Paused => {
                core.to_buffering(&*self);
                if !self.current_time_known {
                    core.defer_seek = Some(seeking_to);
                } else if core.is_near_current_time(&*self, seeking_to) {
                    self.plugin.execute("Resume", &[]);
                    self.to_playing(core);
                } else {
                    self.seek_with_failure_transition(core, seeking_to);
                    self.plugin.execute("Resume", &[]);
                }
            }
            PlaybackState::Complete => {
                self.plugin.execute("Stop", &[]);
                if let Err(message) = self.init_player() {
                    core.report_error(&*self, message, None);
                    return;
                }
                self.plugin.execute("StartPlayback", &[SefArg::Float(seeking_to)]);
                core.to_buffering(&*self);
            }
            _ => {}
        }
    }

    fn pause(&mut self, core: &mut Core) {
        if core.state() == PlaybackState::Playing {
            self.try_pause(core);
        }
    }

    fn resume(&mut self, core: &mut Core) {
        match core.state() {
            PlaybackState::Buffering if self.trying_to_pause => {
                self.trying_to_pause = false;
                self.to_playing(core);
            }
            PlaybackState::Paused => {
                self.plugin.execute("Resume", &[]);
                self.to_playing(core);
            }
            _ => {}
        }
    }

    fn stop(&mut self, core: &mut Core) {
        self.stop_player();
        self.to_stopped(core);
    }

    fn handle_event(&mut self, core: &mut Core, event: DeviceEvent) {
        let DeviceEvent::Sef(event) = event else {
            return;
        };
        match event.code {
            SefEvent::STREAM_INFO_READY => self.update_range(core),
            SefEvent::CURRENT_PLAYBACK_TIME => self.on_playback_time(core, event.param),
            SefEvent::BUFFERING_START | SefEvent::BUFFERING_PROGRESS => {
                if core.state() == PlaybackState::Playing {
                    core.to_buffering(&*self);
                }
            }
            SefEvent::BUFFERING_COMPLETE => {
                if !self.updating() {
                    self.update_range(core);
                }
                // the plugin keeps repeating buffering complete after the end
                if core.state() != PlaybackState::Complete {
                    self.on_finished_buffering(core);
                }
            }
            SefEvent::RENDERING_COMPLETE => {
                if core.state() != PlaybackState::Complete {
                    core.to_complete(&*self);
                }
            }
            SefEvent::CONNECTION_FAILED => {
                core.report_error(&*self, "Media element emitted OnConnectionFailed", None)
            }
            SefEvent::NETWORK_DISCONNECTED => {
                core.report_error(&*self, "Media element emitted OnNetworkDisconnected", None)
            }
            SefEvent::AUTHENTICATION_FAILED => {
                core.report_error(&*self, "Media element emitted OnAuthenticationFailed", None)
            }
            SefEvent::RENDER_ERROR => core.report_error(
                &*self,
                "Media element emitted OnRenderError",
                None,
            ),
            SefEvent::STREAM_NOT_FOUND => {
                core.report_error(&*self, "Media element emitted OnStreamNotFound", None)
            }
            code => debug!(code, "Ignoring plugin event"),
        }
    }

    fn enter_playing(&mut self, core: &mut Core) {
        self.to_playing(core);
    }

    fn next_deadline(&self) -> Option<u64> {
        self.updating_time.deadline()
    }

    fn poll_timers(&mut self, core: &mut Core) {
        self.updating_time.fire(core.now());
    }

    fn pending_timers(&self) -> usize {
        usize::from(self.updating_time.is_pending())
    }
}
