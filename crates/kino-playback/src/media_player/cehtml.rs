//! CE-HTML media object device
//!
//! The object reports positions in milliseconds and signals play state
//! changes. Its range is only known once it has buffered, so seeks requested
//! before that are deferred until the first buffering completes. Status is
//! polled every 500ms.

use super::core::{Core, Device, DeviceProfile, DeviceReads};
use super::sentinel::SentinelFlavor;
use super::DeviceEvent;
use crate::{PlaybackState, SeekableRange};

const DEVICE_UPDATE_PERIOD_MS: u64 = 500;

/// Handle on a host CE-HTML `<object>` player
pub trait CehtmlObject: Send {
    /// Create the object and point it at `url`
    fn load(&mut self, url: &str, mime_type: &str);

    /// 1 plays, 0 pauses
    fn play(&mut self, speed: i32) -> bool;

    fn stop(&mut self);

    fn seek(&mut self, position_ms: f64) -> bool;

    fn play_position_ms(&self) -> f64;

    /// Total media time in milliseconds
    fn play_time_ms(&self) -> f64;

    fn error_code(&self) -> i32;

    fn remove(&mut self);
}

/// CE-HTML `playState` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CehtmlPlayState {
    Stopped,
    Playing,
    Paused,
    Connecting,
    Buffering,
    Finished,
    Error,
}

impl CehtmlPlayState {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(CehtmlPlayState::Stopped),
            1 => Some(CehtmlPlayState::Playing),
            2 => Some(CehtmlPlayState::Paused),
            3 => Some(CehtmlPlayState::Connecting),
            4 => Some(CehtmlPlayState::Buffering),
            5 => Some(CehtmlPlayState::Finished),
            6 => Some(CehtmlPlayState::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CehtmlEvent {
    PlayStateChange(CehtmlPlayState),
}

/// CE-HTML device
pub struct Cehtml {
    object: Box<dyn CehtmlObject>,
    loaded: bool,
    range: Option<SeekableRange>,
}

impl Cehtml {
    pub fn new(object: Box<dyn CehtmlObject>) -> Self {
        Self {
            object,
            loaded: false,
            range: None,
        }
    }

    fn cache_range(&mut self) {
        if self.loaded {
            self.range = Some(SeekableRange::new(0.0, self.object.play_time_ms() / 1000.0));
        }
    }

    fn play_and_set_deferred_seek(&mut self, core: &mut Core, seconds: f64) {
        self.object.play(1);
        if seconds > 0.0 {
            core.defer_seek = Some(seconds);
        }
    }

    fn seek_to(&mut self, core: &mut Core, seconds: f64) -> bool {
        let clamped = core.clamped_time(&*self, seconds);
        core.sentinel_seek_time = Some(clamped);
        self.object.seek(clamped * 1000.0)
    }

    fn on_finished_buffering(&mut self, core: &mut Core) {
        self.cache_range();

        if core.state() != PlaybackState::Buffering {
            return;
        }

        if let Some(target) = core.defer_seek.take() {
            core.to_buffering(&*self);
            self.seek_to(core, target);
        } else if core.post_buffering == PlaybackState::Paused {
            core.to_paused(&*self);
            self.object.play(0);
        } else {
            core.to_playing(&*self);
        }
    }

    fn gated(core: &Core) -> bool {
        matches!(core.state(), PlaybackState::Stopped | PlaybackState::Error)
    }
}

impl DeviceReads for Cehtml {
    fn current_time(&self, core: &Core) -> Option<f64> {
        match core.state() {
            PlaybackState::Stopped | PlaybackState::Error => None,
            PlaybackState::Complete => self.range.map(|range| range.end),
            _ if self.loaded => Some(self.object.play_position_ms() / 1000.0),
            _ => None,
        }
    }

    fn seekable_range(&self, core: &Core) -> Option<SeekableRange> {
        if Self::gated(core) {
            None
        } else {
            self.range
        }
    }

    fn duration(&self, core: &Core) -> Option<f64> {
        if Self::gated(core) {
            None
        } else if core.is_live() {
            Some(f64::INFINITY)
        } else {
            self.range.map(|range| range.end)
        }
    }
}

impl Device for Cehtml {
    fn profile(&self) -> DeviceProfile {
        DeviceProfile {
            name: "cehtml",
            sentinels: Some(SentinelFlavor::Cehtml),
            tracks_seek_finished: true,
            status_poll_ms: Some(DEVICE_UPDATE_PERIOD_MS),
            current_time_tolerance: 0.0,
            clamp_offset_from_end: 1.1,
            live_clamp_offset_from_end: 1.1,
        }
    }

    fn open(&mut self, core: &mut Core) -> Result<(), String> {
        let media = core.media().ok_or_else(|| "no media to load".to_string())?;
        self.object.load(&media.url, &media.mime_type);
        self.loaded = true;
        Ok(())
    }

    fn wipe(&mut self, _core: &mut Core) {
        if self.loaded {
            self.object.remove();
        }
        self.loaded = false;
        self.range = None;
    }

    fn begin_playback(&mut self, core: &mut Core) {
        core.to_buffering(&*self);
        self.object.play(1);
    }

    fn begin_playback_from(&mut self, core: &mut Core, seconds: f64) {
        core.reset_seek_attempts();
        // seeking past zero needs a play first while nothing is loaded
        core.to_buffering(&*self);
        self.play_and_set_deferred_seek(core, seconds);
    }

    fn play_from(&mut self, core: &mut Core, seconds: f64) {
        core.reset_seek_attempts();
        match core.state() {
            PlaybackState::Buffering => core.defer_seek = Some(seconds),
            PlaybackState::Complete => {
                core.to_buffering(&*self);
                self.object.stop();
                self.play_and_set_deferred_seek(core, seconds);
            }
            PlaybackState::Playing => {
                core.to_buffering(&*self);
                if !self.seek_to(core, seconds) {
                    core.to_playing(&*self);
                }
            }
            PlaybackState::Paused => {
                core.to_buffering(&*self);
                self.seek_to(core, seconds);
                self.object.play(1);
            }
            _ => {}
        }
    }

    fn pause(&mut self, core: &mut Core) {
        if core.state() == PlaybackState::Playing {
            self.object.play(0);
            core.to_paused(&*self);
        }
    }

    fn resume(&mut self, core: &mut Core) {
        if core.state() == PlaybackState::Paused {
            self.object.play(1);
            core.to_playing(&*self);
        }
    }

    fn stop(&mut self, core: &mut Core) {
        core.sentinel_seek_time = None;
        self.object.stop();
        core.to_stopped(&*self);
    }

    fn handle_event(&mut self, core: &mut Core, event: DeviceEvent) {
        let DeviceEvent::Cehtml(CehtmlEvent::PlayStateChange(play_state)) = event else {
            return;
        };
        match play_state {
            CehtmlPlayState::Playing => self.on_finished_buffering(core),
            CehtmlPlayState::Buffering => {
                if core.state() == PlaybackState::Playing {
                    core.to_buffering(&*self);
                }
            }
            CehtmlPlayState::Finished => {
                if core.state() != PlaybackState::Complete {
                    core.to_complete(&*self);
                }
            }
            CehtmlPlayState::Error => {
                let code = self.object.error_code();
                core.report_error(&*self, format!("Media element error code: {code}"), None);
            }
            CehtmlPlayState::Stopped | CehtmlPlayState::Paused | CehtmlPlayState::Connecting => {}
        }
    }

    fn sentinel_seek(&mut self, seconds: f64) {
        self.object.seek(seconds * 1000.0);
    }

    fn sentinel_pause(&mut self) {
        self.object.play(0);
    }

    fn sentinel_exit_buffering(&mut self, core: &mut Core) {
        self.on_finished_buffering(core);
    }
}
