//! Generic device state machine
//!
//! [`DevicePlayer`] owns everything the device families have in common: the
//! (state, command) validation table, state transitions with snapshot events,
//! the deferred seek, the post-buffering state, seek-finished tracking, status
//! polling and the sentinel runner. A [`Device`] only issues engine commands
//! and translates engine events.

use super::sentinel::{SentinelFlavor, SentinelState};
use super::{
    DeviceEvent, MediaDescriptor, MediaPlayer, MediaPlayerEvent, MediaPlayerEventKind,
    SourceOptions,
};
use crate::clock::{earliest, Interval, Scheduled, SharedClock, Timeout};
use crate::config::DeviceOverrides;
use crate::{
    Command, Error, MediaError, MediaType, PauseOptions, PlaybackState, Result, SeekableRange,
};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

const SEEK_FINISHED_STATUS_COUNT: u32 = 5;

/// Static capabilities of a device family
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceProfile {
    pub name: &'static str,
    /// Sentinel flavour, `None` for devices without sentinels
    pub sentinels: Option<SentinelFlavor>,
    /// Emit seek-attempted / seek-finished events
    pub tracks_seek_finished: bool,
    /// Poll for status on a fixed period instead of engine time events
    pub status_poll_ms: Option<u64>,
    /// Seeks closer than this to the current time are skipped
    pub current_time_tolerance: f64,
    /// Seeks are clamped this far before the end of the range
    pub clamp_offset_from_end: f64,
    /// Same, for live media
    pub live_clamp_offset_from_end: f64,
}

/// Reads a device answers from its engine
pub trait DeviceReads {
    fn current_time(&self, core: &Core) -> Option<f64>;

    fn seekable_range(&self, core: &Core) -> Option<SeekableRange>;

    fn duration(&self, core: &Core) -> Option<f64>;
}

/// Capability provider for one device family
///
/// Command methods are only called for states the validation table accepts.
/// They issue engine commands and drive the transitions through [`Core`].
pub trait Device: DeviceReads + Send {
    fn profile(&self) -> DeviceProfile;

    /// Load the media held by `core` into the engine
    fn open(&mut self, core: &mut Core) -> std::result::Result<(), String>;

    /// Release the engine and forget the media
    fn wipe(&mut self, core: &mut Core);

    fn begin_playback(&mut self, core: &mut Core);

    fn begin_playback_from(&mut self, core: &mut Core, seconds: f64);

    fn play_from(&mut self, core: &mut Core, seconds: f64);

    fn pause(&mut self, core: &mut Core);

    fn resume(&mut self, core: &mut Core);

    /// Stop from BUFFERING, PLAYING, PAUSED or COMPLETE
    fn stop(&mut self, core: &mut Core);

    fn handle_event(&mut self, core: &mut Core, event: DeviceEvent);

    /// Enter PLAYING on behalf of the owner
    fn enter_playing(&mut self, core: &mut Core) {
        core.to_playing(&*self);
    }

    /// Sentinel correction: put the engine back at `seconds`
    fn sentinel_seek(&mut self, _seconds: f64) {}

    /// Sentinel correction: pause the engine again
    fn sentinel_pause(&mut self) {}

    /// Sentinel: the engine played through buffering without saying so
    fn sentinel_exit_buffering(&mut self, _core: &mut Core) {}

    /// Engine is ready but sitting paused while we wait for it to buffer
    fn is_stalled_paused(&self) -> bool {
        false
    }

    fn set_playback_rate(&mut self, _rate: f64) {}

    fn playback_rate(&self) -> f64 {
        1.0
    }

    fn next_deadline(&self) -> Option<u64> {
        None
    }

    fn poll_timers(&mut self, _core: &mut Core) {}

    fn pending_timers(&self) -> usize {
        0
    }
}

/// Seek-attempted / seek-finished bookkeeping
#[derive(Debug, Default)]
struct SeekTracking {
    count: u32,
    restart: Timeout,
    timeout_happened: bool,
    finished: bool,
}

/// State shared by every device family
#[derive(Debug)]
pub struct Core {
    clock: SharedClock,
    overrides: DeviceOverrides,
    profile: DeviceProfile,
    state: PlaybackState,
    media: Option<MediaDescriptor>,
    /// State to enter once buffering completes
    pub post_buffering: PlaybackState,
    /// Seek waiting for the engine to become seekable
    pub defer_seek: Option<f64>,
    /// Seek requested while a seek was already buffering
    pub next_seek: Option<f64>,
    /// Last seek target, watched by the seek sentinel
    pub sentinel_seek_time: Option<f64>,
    pub(super) sentinels: SentinelState,
    seek_tracking: SeekTracking,
    status_poll: Interval,
    events: VecDeque<MediaPlayerEvent>,
}

impl Core {
    pub fn new(profile: DeviceProfile, clock: SharedClock, overrides: DeviceOverrides) -> Self {
        let sentinels = SentinelState::new(profile.sentinels, &overrides);
        Self {
            clock,
            overrides,
            profile,
            state: PlaybackState::Empty,
            media: None,
            post_buffering: PlaybackState::Playing,
            defer_seek: None,
            next_seek: None,
            sentinel_seek_time: None,
            sentinels,
            seek_tracking: SeekTracking::default(),
            status_poll: Interval::new(),
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn overrides(&self) -> &DeviceOverrides {
        &self.overrides
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn media(&self) -> Option<&MediaDescriptor> {
        self.media.as_ref()
    }

    pub fn media_type(&self) -> Option<MediaType> {
        self.media.as_ref().map(|m| m.media_type)
    }

    pub fn is_live(&self) -> bool {
        self.media.as_ref().is_some_and(|m| m.is_live())
    }

    pub fn is_hls(&self) -> bool {
        self.media.as_ref().is_some_and(|m| m.is_hls())
    }

    pub fn source(&self) -> Option<&str> {
        self.media.as_ref().map(|m| m.url.as_str())
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.media.as_ref().map(|m| m.mime_type.as_str())
    }

    /// Tolerance used by the seek sentinel and seek-finished tracking
    pub fn seek_sentinel_tolerance(&self) -> f64 {
        self.sentinels.tolerance
    }

    /// Trust a reported time of zero until the engine reports a positive one
    pub fn trust_zeroes(&mut self) {
        self.sentinels.trust_zeroes = true;
    }

    pub fn reset_seek_attempts(&mut self) {
        self.sentinels.seek.reset();
    }

    pub fn reset_pause_attempts(&mut self) {
        self.sentinels.pause.reset();
    }

    /// Clamp `seconds` into `range`, keeping clear of the very end
    pub fn clamp_to(&self, seconds: f64, range: Option<SeekableRange>) -> f64 {
        let Some(range) = range else {
            return seconds;
        };
        let offset = if self.is_live() {
            self.profile.live_clamp_offset_from_end
        } else {
            self.profile.clamp_offset_from_end
        };
        let near_to_end = (range.end - offset).max(range.start);
        if seconds < range.start {
            range.start
        } else if seconds > near_to_end {
            near_to_end
        } else {
            seconds
        }
    }

    /// Clamp against the device's current seekable range, logging adjustments
    pub fn clamped_time<R: DeviceReads + ?Sized>(&self, reads: &R, seconds: f64) -> f64 {
        let range = reads.seekable_range(self);
        let clamped = self.clamp_to(seconds, range);
        if clamped != seconds {
            if let Some(range) = range {
                debug!(
                    requested = seconds,
                    clamped,
                    start = range.start,
                    end = range.end,
                    "Seek clamped to seekable range"
                );
            }
        }
        clamped
    }

    /// True when a seek to `seconds` would land within the device tolerance
    pub fn is_near_current_time<R: DeviceReads + ?Sized>(&self, reads: &R, seconds: f64) -> bool {
        let target = self.clamped_time(reads, seconds);
        reads
            .current_time(self)
            .is_some_and(|current| (current - target).abs() <= self.profile.current_time_tolerance)
    }

    pub(super) fn set_media(&mut self, media: MediaDescriptor) {
        let live = media.is_live();
        self.sentinels.configure(media.options, live, &self.overrides);
        self.media = Some(media);
    }

    fn snapshot<R: DeviceReads + ?Sized>(
        &self,
        kind: MediaPlayerEventKind,
        reads: &R,
    ) -> MediaPlayerEvent {
        MediaPlayerEvent {
            kind,
            state: self.state,
            current_time: reads.current_time(self),
            seekable_range: reads.seekable_range(self),
            duration: reads.duration(self),
            url: self.source().map(str::to_string),
            mime_type: self.mime_type().map(str::to_string),
            message: None,
            error: None,
        }
    }

    /// Queue an event carrying the current snapshot
    pub fn emit<R: DeviceReads + ?Sized>(&mut self, kind: MediaPlayerEventKind, reads: &R) {
        let event = self.snapshot(kind, reads);
        self.events.push_back(event);
    }

    /// Queue an error event
    pub fn report_error<R: DeviceReads + ?Sized>(
        &mut self,
        reads: &R,
        message: impl Into<String>,
        error: Option<MediaError>,
    ) {
        let message = message.into();
        warn!(device = self.profile.name, %message, "Media player error");
        let mut event = self.snapshot(MediaPlayerEventKind::Error, reads);
        event.message = Some(message);
        event.error = error;
        self.events.push_back(event);
    }

    fn transition(&mut self, to: PlaybackState) {
        if self.state != to {
            info!(device = self.profile.name, from = %self.state, to = %to, "State transition");
        }
        self.state = to;
    }

    pub fn to_stopped<R: DeviceReads + ?Sized>(&mut self, reads: &R) {
        self.transition(PlaybackState::Stopped);
        self.emit(MediaPlayerEventKind::Stopped, reads);
        self.sentinels.clear();
    }

    pub fn to_buffering<R: DeviceReads + ?Sized>(&mut self, reads: &R) {
        self.transition(PlaybackState::Buffering);
        self.emit(MediaPlayerEventKind::Buffering, reads);
        self.arm_sentinels(reads);
    }

    pub fn to_playing<R: DeviceReads + ?Sized>(&mut self, reads: &R) {
        self.transition(PlaybackState::Playing);
        self.emit(MediaPlayerEventKind::Playing, reads);
        self.arm_sentinels(reads);
    }

    pub fn to_paused<R: DeviceReads + ?Sized>(&mut self, reads: &R) {
        self.transition(PlaybackState::Paused);
        self.emit(MediaPlayerEventKind::Paused, reads);
        self.arm_sentinels(reads);
    }

    pub fn to_complete<R: DeviceReads + ?Sized>(&mut self, reads: &R) {
        self.transition(PlaybackState::Complete);
        self.emit(MediaPlayerEventKind::Complete, reads);
        self.sentinels.clear();
    }

    fn to_error<R: DeviceReads + ?Sized>(&mut self, reads: &R, message: String) {
        self.transition(PlaybackState::Error);
        self.report_error(reads, message, None);
    }

    /// Forget the media and cancel every timer
    fn to_empty(&mut self) {
        self.transition(PlaybackState::Empty);
        self.media = None;
        self.post_buffering = PlaybackState::Playing;
        self.defer_seek = None;
        self.next_seek = None;
        self.sentinel_seek_time = None;
        self.sentinels.clear();
        self.status_poll.cancel();
        self.seek_tracking.restart.cancel();
    }

    fn arm_sentinels<R: DeviceReads + ?Sized>(&mut self, reads: &R) {
        let now = self.now();
        let time = reads.current_time(self);
        let state = self.state;
        self.sentinels.arm(state, now, time);
    }

    /// Reject a command the current state does not accept
    fn reject<R: DeviceReads + ?Sized>(&mut self, reads: &R, command: Command) -> Error {
        let error = Error::invalid(command, self.state);
        self.report_error(reads, error.to_string(), None);
        error
    }

    /// Start tracking a seek: emits seek-attempted on the first load
    fn begin_seek_tracking<R: DeviceReads + ?Sized>(&mut self, reads: &R) {
        if !self.profile.tracks_seek_finished {
            return;
        }
        if self.state == PlaybackState::Empty {
            self.emit(MediaPlayerEventKind::SeekAttempted, reads);
            self.seek_tracking.finished = false;
        }
        self.seek_tracking.count = 0;
        self.seek_tracking.timeout_happened = false;
        match self.overrides.restart_timeout_ms {
            Some(delay) if delay > 0 => {
                let now = self.now();
                self.seek_tracking.restart.start(now, delay);
            }
            _ => self.seek_tracking.timeout_happened = true,
        }
    }

    /// A status report from the engine
    pub fn on_status<R: DeviceReads + ?Sized>(&mut self, reads: &R) {
        if self.state == PlaybackState::Playing {
            self.emit(MediaPlayerEventKind::Status, reads);
        }
        if !self.profile.tracks_seek_finished {
            return;
        }

        let at_starting_point = match self.sentinel_seek_time {
            None => true,
            Some(target) => reads
                .current_time(self)
                .is_some_and(|current| (current - target).abs() <= self.sentinels.tolerance),
        };
        let playing_at_target = self.state == PlaybackState::Playing && at_starting_point;
        let tracking = &mut self.seek_tracking;

        if playing_at_target
            && tracking.count >= SEEK_FINISHED_STATUS_COUNT
            && tracking.timeout_happened
            && !tracking.finished
        {
            tracking.finished = true;
            self.emit(MediaPlayerEventKind::SeekFinished, reads);
        } else if playing_at_target {
            tracking.count += 1;
        } else {
            tracking.count = 0;
        }
    }

    pub(super) fn take_events(&mut self) -> Vec<MediaPlayerEvent> {
        self.events.drain(..).collect()
    }
}

/// Generic device media player
pub struct DevicePlayer<D: Device> {
    pub(super) core: Core,
    pub(super) device: D,
}

impl<D: Device> DevicePlayer<D> {
    pub fn new(device: D, clock: SharedClock, overrides: DeviceOverrides) -> Self {
        let core = Core::new(device.profile(), clock, overrides);
        Self { core, device }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    fn accepts(&self, command: Command) -> bool {
        use PlaybackState::*;
        let state = self.core.state;
        match command {
            Command::InitialiseMedia => state == Empty,
            Command::BeginPlayback | Command::BeginPlaybackFrom => state == Stopped,
            Command::PlayFrom => matches!(state, Buffering | Playing | Paused | Complete),
            Command::Pause | Command::Resume => matches!(state, Buffering | Playing | Paused),
            Command::Stop => matches!(state, Stopped | Buffering | Playing | Paused | Complete),
            Command::Reset => matches!(state, Empty | Stopped | Error),
        }
    }

    fn check(&mut self, command: Command) -> Result<()> {
        if self.accepts(command) {
            debug!(device = self.core.profile.name, %command, state = %self.core.state, "Command");
            Ok(())
        } else {
            Err(self.core.reject(&self.device, command))
        }
    }
}

impl<D: Device> MediaPlayer for DevicePlayer<D> {
    fn initialise_media(
        &mut self,
        media_type: MediaType,
        url: &str,
        mime_type: &str,
        options: SourceOptions,
    ) -> Result<()> {
        self.check(Command::InitialiseMedia)?;
        self.core.set_media(MediaDescriptor {
            media_type,
            url: url.to_string(),
            mime_type: mime_type.to_string(),
            options,
        });
        self.core.begin_seek_tracking(&self.device);

        match self.device.open(&mut self.core) {
            Ok(()) => {
                if let Some(period) = self.core.profile.status_poll_ms {
                    let now = self.core.now();
                    self.core.status_poll.start(now, period);
                }
                self.core.to_stopped(&self.device);
                Ok(())
            }
            Err(message) => {
                self.device.wipe(&mut self.core);
                self.core.to_empty();
                self.core.to_error(&self.device, message.clone());
                Err(Error::DeviceSetup(message))
            }
        }
    }

    fn begin_playback(&mut self) -> Result<()> {
        self.check(Command::BeginPlayback)?;
        self.core.post_buffering = PlaybackState::Playing;
        self.device.begin_playback(&mut self.core);
        Ok(())
    }

    fn begin_playback_from(&mut self, seconds: f64) -> Result<()> {
        self.check(Command::BeginPlaybackFrom)?;
        self.core.post_buffering = PlaybackState::Playing;
        self.device.begin_playback_from(&mut self.core, seconds);
        Ok(())
    }

    fn play_from(&mut self, seconds: f64) -> Result<()> {
        self.check(Command::PlayFrom)?;
        self.core.post_buffering = PlaybackState::Playing;
        self.device.play_from(&mut self.core, seconds);
        Ok(())
    }

    fn pause(&mut self, _options: PauseOptions) -> Result<()> {
        self.check(Command::Pause)?;
        self.core.post_buffering = PlaybackState::Paused;
        self.device.pause(&mut self.core);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.check(Command::Resume)?;
        self.core.post_buffering = PlaybackState::Playing;
        self.device.resume(&mut self.core);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.check(Command::Stop)?;
        if self.core.state != PlaybackState::Stopped {
            self.device.stop(&mut self.core);
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.check(Command::Reset)?;
        if self.core.state != PlaybackState::Empty {
            self.device.wipe(&mut self.core);
            self.core.to_empty();
        }
        Ok(())
    }

    fn state(&self) -> PlaybackState {
        self.core.state
    }

    fn current_time(&self) -> Option<f64> {
        self.device.current_time(&self.core)
    }

    fn seekable_range(&self) -> Option<SeekableRange> {
        self.device.seekable_range(&self.core)
    }

    fn duration(&self) -> Option<f64> {
        self.device.duration(&self.core)
    }

    fn source(&self) -> Option<String> {
        self.core.source().map(str::to_string)
    }

    fn mime_type(&self) -> Option<String> {
        self.core.mime_type().map(str::to_string)
    }

    fn handle_device_event(&mut self, event: DeviceEvent) {
        if matches!(self.core.state, PlaybackState::Empty | PlaybackState::Error) {
            debug!(device = self.core.profile.name, ?event, "Ignoring event without media");
            return;
        }
        self.device.handle_event(&mut self.core, event);
    }

    fn drain_events(&mut self) -> Vec<MediaPlayerEvent> {
        self.core.take_events()
    }

    fn to_paused(&mut self) {
        self.core.to_paused(&self.device);
    }

    fn to_playing(&mut self) {
        self.device.enter_playing(&mut self.core);
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.device.set_playback_rate(rate);
    }

    fn playback_rate(&self) -> f64 {
        self.device.playback_rate()
    }
}

impl<D: Device> Scheduled for DevicePlayer<D> {
    fn next_deadline(&self) -> Option<u64> {
        let core = earliest(
            earliest(self.core.sentinels.deadline(), self.core.status_poll.deadline()),
            self.core.seek_tracking.restart.deadline(),
        );
        earliest(core, self.device.next_deadline())
    }

    fn poll_timers(&mut self) {
        let now = self.core.now();
        if self.core.seek_tracking.restart.fire(now) {
            self.core.seek_tracking.timeout_happened = true;
        }
        if self.core.status_poll.tick(now) {
            self.core.on_status(&self.device);
        }
        if self.core.sentinels.tick(now) {
            self.run_sentinels();
        }
        self.device.poll_timers(&mut self.core);
    }

    fn pending_timers(&self) -> usize {
        self.core.sentinels.pending()
            + usize::from(self.core.status_poll.is_running())
            + usize::from(self.core.seek_tracking.restart.is_pending())
            + self.device.pending_timers()
    }
}

impl<D: Device> std::fmt::Debug for DevicePlayer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevicePlayer")
            .field("device", &self.core.profile.name)
            .field("state", &self.core.state)
            .finish()
    }
}
