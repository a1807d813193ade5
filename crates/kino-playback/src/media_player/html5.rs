//! HTML5 media element device
//!
//! Seeks wait until the element has loaded metadata. The element reports time
//! on `timeupdate`, which drives status and seek-finished tracking.

use super::core::{Core, Device, DeviceProfile, DeviceReads};
use super::sentinel::SentinelFlavor;
use super::DeviceEvent;
use crate::clock::SharedClock;
use crate::config::DeviceOverrides;
use crate::{MediaError, MediaType, PlaybackState, SeekableRange};
use std::sync::Mutex;
use std::sync::PoisonError;

const SEEKABLE_RANGE_CACHE_MS: u64 = 250;

/// Handle on a host `<video>`/`<audio>` element
pub trait VideoElement: Send {
    /// Create the element and start loading `url`
    fn load(&mut self, url: &str, mime_type: &str, media_type: MediaType);

    fn play(&mut self);

    fn pause(&mut self);

    fn set_current_time(&mut self, seconds: f64);

    fn current_time(&self) -> f64;

    /// Media duration, `None` while unknown
    fn duration(&self) -> Option<f64>;

    /// First seekable time range, if any
    fn seekable(&self) -> Option<SeekableRange>;

    fn is_paused(&self) -> bool;

    /// Last error reported by the element
    fn error(&self) -> Option<MediaError>;

    fn set_playback_rate(&mut self, rate: f64);

    fn playback_rate(&self) -> f64;

    /// Drop the source and remove the element
    fn unload(&mut self);
}

/// DOM events raised by a media element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementEvent {
    CanPlay,
    Seeked,
    Seeking,
    Playing,
    Play,
    Pause,
    Waiting,
    Ended,
    TimeUpdate,
    LoadedMetadata,
    Error,
    SourceError,
}

/// HTML5 media element device
pub struct Html5 {
    element: Box<dyn VideoElement>,
    clock: SharedClock,
    loaded: bool,
    ready_to_play_from: bool,
    ignore_next_pause: bool,
    deferred_playback: bool,
    cache_seekable_range: bool,
    cached_range: Mutex<Option<(u64, Option<SeekableRange>)>>,
}

impl Html5 {
    pub fn new(
        element: Box<dyn VideoElement>,
        clock: SharedClock,
        overrides: &DeviceOverrides,
    ) -> Self {
        Self {
            element,
            clock,
            loaded: false,
            ready_to_play_from: false,
            ignore_next_pause: false,
            deferred_playback: overrides.deferred_playback,
            cache_seekable_range: overrides.cache_seekable_range,
            cached_range: Mutex::new(None),
        }
    }

    fn element_seekable_range(&self) -> Option<SeekableRange> {
        if !self.loaded {
            return None;
        }
        if self.ready_to_play_from {
            if let Some(range) = self.element.seekable() {
                return Some(range);
            }
        }
        self.element.duration().map(|end| SeekableRange::new(0.0, end))
    }

    fn cached_seekable_range(&self) -> Option<SeekableRange> {
        let now = self.clock.now_ms();
        let mut cache = self.cached_range.lock().unwrap_or_else(PoisonError::into_inner);
        match *cache {
            Some((cached_at, range)) if now < cached_at + SEEKABLE_RANGE_CACHE_MS => range,
            _ => {
                let range = self.element_seekable_range();
                *cache = Some((now, range));
                range
            }
        }
    }

    fn pause_element(&mut self) {
        self.element.pause();
        self.ignore_next_pause = true;
    }

    fn metadata_loaded(&mut self, core: &mut Core) {
        self.ready_to_play_from = true;
        if core.defer_seek.is_some() {
            self.deferred_play_from(core);
        }
    }

    fn play_from_if_ready(&mut self, core: &mut Core) {
        if self.ready_to_play_from && core.defer_seek.is_some() {
            self.deferred_play_from(core);
        }
    }

    fn deferred_play_from(&mut self, core: &mut Core) {
        let Some(target) = core.defer_seek else {
            return;
        };
        if self.deferred_playback {
            self.element.play();
            self.seek_to(core, target);
        } else {
            self.seek_to(core, target);
            self.element.play();
        }
        if core.post_buffering == PlaybackState::Paused {
            self.pause_element();
        }
        core.defer_seek = None;
    }

    fn seek_to(&mut self, core: &mut Core, seconds: f64) {
        let clamped = core.clamped_time(&*self, seconds);
        self.element.set_current_time(clamped);
        core.sentinel_seek_time = Some(clamped);
    }

    fn exit_buffering(&mut self, core: &mut Core) {
        self.metadata_loaded(core);
        if core.state() != PlaybackState::Buffering {
            return;
        }
        if core.post_buffering == PlaybackState::Paused {
            core.to_paused(&*self);
        } else {
            core.to_playing(&*self);
        }
    }

    fn on_pause(&mut self, core: &mut Core) {
        if self.ignore_next_pause {
            self.ignore_next_pause = false;
            return;
        }
        if core.state() != PlaybackState::Paused {
            core.to_paused(&*self);
        }
    }

    fn gated(core: &Core) -> bool {
        matches!(core.state(), PlaybackState::Stopped | PlaybackState::Error)
    }
}

impl DeviceReads for Html5 {
    fn current_time(&self, core: &Core) -> Option<f64> {
        if Self::gated(core) || !self.loaded {
            return None;
        }
        Some(self.element.current_time())
    }

    fn seekable_range(&self, core: &Core) -> Option<SeekableRange> {
        if Self::gated(core) {
            return None;
        }
        if self.cache_seekable_range {
            self.cached_seekable_range()
        } else {
            self.element_seekable_range()
        }
    }

    fn duration(&self, core: &Core) -> Option<f64> {
        if Self::gated(core) {
            return None;
        }
        if core.is_live() {
            return Some(f64::INFINITY);
        }
        if self.loaded && self.ready_to_play_from {
            self.element.duration()
        } else {
            None
        }
    }
}

impl Device for Html5 {
    fn profile(&self) -> DeviceProfile {
        DeviceProfile {
            name: "html5",
            sentinels: Some(SentinelFlavor::Html5),
            tracks_seek_finished: true,
            status_poll_ms: None,
            current_time_tolerance: 1.0,
            clamp_offset_from_end: 1.1,
            live_clamp_offset_from_end: 1.1,
        }
    }

    fn open(&mut self, core: &mut Core) -> Result<(), String> {
        let media = core.media().ok_or_else(|| "no media to load".to_string())?;
        self.element.load(&media.url, &media.mime_type, media.media_type);
        self.loaded = true;
        self.ready_to_play_from = false;
        Ok(())
    }

    fn wipe(&mut self, _core: &mut Core) {
        if self.loaded {
            self.element.unload();
        }
        self.loaded = false;
        self.ready_to_play_from = false;
        self.ignore_next_pause = false;
        *self.cached_range.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn begin_playback(&mut self, core: &mut Core) {
        core.sentinel_seek_time = None;
        core.trust_zeroes();
        core.to_buffering(&*self);
        self.element.play();
    }

    fn begin_playback_from(&mut self, core: &mut Core, seconds: f64) {
        core.defer_seek = Some(seconds);
        core.reset_seek_attempts();
        core.trust_zeroes();
        core.to_buffering(&*self);
        self.play_from_if_ready(core);
    }

    fn play_from(&mut self, core: &mut Core, seconds: f64) {
        core.defer_seek = Some(seconds);
        core.reset_seek_attempts();

        match core.state() {
            PlaybackState::Paused | PlaybackState::Complete => {
                core.trust_zeroes();
                core.to_buffering(&*self);
                self.play_from_if_ready(core);
            }
            PlaybackState::Buffering => self.play_from_if_ready(core),
            PlaybackState::Playing => {
                core.trust_zeroes();
                core.to_buffering(&*self);
                let target = core.clamped_time(&*self, seconds);
                if core.is_near_current_time(&*self, target) {
                    core.defer_seek = None;
                    core.to_playing(&*self);
                } else {
                    core.defer_seek = Some(target);
                    self.play_from_if_ready(core);
                }
            }
            _ => {}
        }
    }

    fn pause(&mut self, core: &mut Core) {
        match core.state() {
            PlaybackState::Buffering => {
                core.reset_pause_attempts();
                // pausing before metadata would seek back to the start
                if self.ready_to_play_from {
                    self.pause_element();
                }
            }
            PlaybackState::Playing => {
                core.reset_pause_attempts();
                self.pause_element();
                core.to_paused(&*self);
            }
            _ => {}
        }
    }

    fn resume(&mut self, core: &mut Core) {
        match core.state() {
            PlaybackState::Buffering => {
                if self.ready_to_play_from {
                    self.element.play();
                }
            }
            PlaybackState::Paused => {
                self.element.play();
                core.to_playing(&*self);
            }
            _ => {}
        }
    }

    fn stop(&mut self, core: &mut Core) {
        self.pause_element();
        core.to_stopped(&*self);
    }

    fn handle_event(&mut self, core: &mut Core, event: DeviceEvent) {
        let DeviceEvent::Element(event) = event else {
            return;
        };
        match event {
            ElementEvent::CanPlay | ElementEvent::Seeked | ElementEvent::Playing => {
                self.exit_buffering(core)
            }
            ElementEvent::Error => {
                let error = self.element.error();
                let code = error.as_ref().map(|e| e.code).unwrap_or_default();
                core.report_error(&*self, format!("Media element error code: {code}"), error);
            }
            ElementEvent::SourceError => {
                core.report_error(&*self, "Media source element error", None);
            }
            ElementEvent::Ended => core.to_complete(&*self),
            ElementEvent::Waiting => {
                if core.state() == PlaybackState::Playing {
                    core.to_buffering(&*self);
                }
            }
            ElementEvent::TimeUpdate => core.on_status(&*self),
            ElementEvent::LoadedMetadata => self.metadata_loaded(core),
            ElementEvent::Pause => self.on_pause(core),
            ElementEvent::Play | ElementEvent::Seeking => {}
        }
    }

    fn sentinel_seek(&mut self, seconds: f64) {
        self.element.set_current_time(seconds);
    }

    fn sentinel_pause(&mut self) {
        self.pause_element();
    }

    fn sentinel_exit_buffering(&mut self, core: &mut Core) {
        self.exit_buffering(core);
    }

    fn is_stalled_paused(&self) -> bool {
        self.ready_to_play_from && self.element.is_paused()
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.element.set_playback_rate(rate);
    }

    fn playback_rate(&self) -> f64 {
        self.element.playback_rate()
    }
}
