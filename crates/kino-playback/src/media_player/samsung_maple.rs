//! Samsung Maple player plugin device
//!
//! The plugin seeks by relative jumps and only once it has reported a time,
//! so seeks requested earlier are deferred to the first time update. Pauses
//! the plugin refuses are retried on every time update.

use super::core::{Core, Device, DeviceProfile, DeviceReads};
use super::DeviceEvent;
use crate::{MediaType, PlaybackState, SeekableRange};

/// Error code returned by 2010 firmware
const SAMSUNG_2010_ERROR_CODE: i32 = -1;

/// Handle on the host Maple `playerPlugin`
pub trait MaplePlugin: Send {
    fn play(&mut self, url: &str) -> i32;

    /// Start playing `url` at `seconds`
    fn resume_play(&mut self, url: &str, seconds: f64) -> i32;

    fn stop(&mut self) -> i32;

    fn pause(&mut self) -> i32;

    fn resume(&mut self) -> i32;

    fn jump_forward(&mut self, seconds: f64) -> i32;

    fn jump_backward(&mut self, seconds: f64) -> i32;

    /// Media duration in milliseconds
    fn duration_ms(&self) -> f64;

    /// Width and height of the screen
    fn screen_size(&self) -> (u32, u32);

    fn set_display_area(&mut self, x: u32, y: u32, width: u32, height: u32);
}

/// Plugin callbacks
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapleEvent {
    RenderError,
    ConnectionFailed,
    NetworkDisconnected,
    StreamNotFound,
    AuthenticationFailed,
    RenderingComplete,
    BufferingStart,
    BufferingComplete,
    StreamInfoReady,
    /// Current play time in milliseconds
    CurrentPlayTime(f64),
    /// The host window was hidden or unloaded
    WindowHide,
}

fn is_success_code(code: i32) -> bool {
    code != 0 && code != SAMSUNG_2010_ERROR_CODE
}

/// Samsung Maple device
pub struct SamsungMaple {
    plugin: Box<dyn MaplePlugin>,
    current_time: Option<f64>,
    range: Option<SeekableRange>,
    current_time_known: bool,
    trying_to_pause: bool,
}

impl SamsungMaple {
    pub fn new(plugin: Box<dyn MaplePlugin>) -> Self {
        Self {
            plugin,
            current_time: None,
            range: None,
            current_time_known: false,
            trying_to_pause: false,
        }
    }

    fn wrapped_source(core: &Core) -> String {
        let source = core.source().unwrap_or_default();
        if core.is_hls() {
            format!("{source}|COMPONENT=HLS")
        } else {
            source.to_string()
        }
    }

    fn set_display_full_screen(&mut self, core: &Core) {
        if core.media_type() == Some(MediaType::Video) {
            let (width, height) = self.plugin.screen_size();
            self.plugin.set_display_area(0, 0, width, height);
        }
    }

    fn stop_player(&mut self) {
        self.plugin.stop();
        self.current_time_known = false;
    }

    fn try_pause(&mut self, core: &mut Core) {
        let success = is_success_code(self.plugin.pause());
        if success {
            core.to_paused(&*self);
        }
        self.trying_to_pause = !success;
    }

    fn jump(&mut self, offset: f64) -> i32 {
        if offset > 0.0 {
            self.plugin.jump_forward(offset)
        } else {
            self.plugin.jump_backward(offset.abs())
        }
    }

    fn seek_to(&mut self, core: &Core, seconds: f64) -> bool {
        let offset = seconds - self.current_time(core).unwrap_or(0.0);
        let success = is_success_code(self.jump(offset));
        if success {
            self.current_time = Some(seconds);
        }
        success
    }

    fn seek_with_failure_transition(&mut self, core: &mut Core, seconds: f64) {
        if !self.seek_to(core, seconds) {
            core.to_playing(&*self);
        }
    }

    fn deferred_seek(&mut self, core: &mut Core, target: f64) {
        let clamped = core.clamped_time(&*self, target);
        if core.is_near_current_time(&*self, clamped) {
            core.to_playing(&*self);
            core.defer_seek = None;
        } else if self.seek_to(core, clamped) {
            core.defer_seek = None;
        }
    }

    fn on_finished_buffering(&mut self, core: &mut Core) {
        if core.state() != PlaybackState::Buffering || core.defer_seek.is_some() {
            return;
        }
        if core.post_buffering == PlaybackState::Paused {
            self.try_pause(core);
        } else {
            core.to_playing(&*self);
        }
    }

    fn on_current_time(&mut self, core: &mut Core, millis: f64) {
        self.current_time = Some(millis / 1000.0);
        core.on_status(&*self);
        self.current_time_known = true;

        if let Some(target) = core.defer_seek {
            self.deferred_seek(core, target);
        }
        if self.trying_to_pause {
            self.try_pause(core);
        }
    }

    fn to_stopped(&mut self, core: &mut Core) {
        self.current_time = Some(0.0);
        self.range = None;
        core.to_stopped(&*self);
    }
}

impl DeviceReads for SamsungMaple {
    fn current_time(&self, core: &Core) -> Option<f64> {
        if core.state() == PlaybackState::Stopped {
            None
        } else {
            self.current_time
        }
    }

    fn seekable_range(&self, _core: &Core) -> Option<SeekableRange> {
        self.range
    }

    fn duration(&self, _core: &Core) -> Option<f64> {
        self.range.map(|range| range.end)
    }
}

impl Device for SamsungMaple {
    fn profile(&self) -> DeviceProfile {
        DeviceProfile {
            name: "samsungmaple",
            sentinels: None,
            tracks_seek_finished: false,
            status_poll_ms: None,
            // seeking by 2.5 seconds is the smallest jump seen to always work
            current_time_tolerance: 2.5,
            clamp_offset_from_end: 1.1,
            live_clamp_offset_from_end: 1.1,
        }
    }

    fn open(&mut self, _core: &mut Core) -> Result<(), String> {
        self.current_time = Some(0.0);
        self.range = None;
        Ok(())
    }

    fn wipe(&mut self, _core: &mut Core) {
        self.stop_player();
        self.current_time = None;
        self.range = None;
        self.trying_to_pause = false;
    }

    fn begin_playback(&mut self, core: &mut Core) {
        core.to_buffering(&*self);
        self.set_display_full_screen(core);
        let source = Self::wrapped_source(core);
        self.plugin.play(&source);
    }

    fn begin_playback_from(&mut self, core: &mut Core, seconds: f64) {
        let seeking_to = core.clamped_time(&*self, seconds);
        self.set_display_full_screen(core);
        let source = Self::wrapped_source(core);
        self.plugin.resume_play(&source, seeking_to);
        core.to_buffering(&*self);
    }

    fn play_from(&mut self, core: &mut Core, seconds: f64) {
        let seeking_to = core.clamped_time(&*self, seconds);

        match core.state() {
            PlaybackState::Buffering => core.defer_seek = Some(seeking_to),
            PlaybackState::Playing => {
                core.to_buffering(&*self);
                if !self.current_time_known {
                    core.defer_seek = Some(seeking_to);
                } else if core.is_near_current_time(&*self, seeking_to) {
                    core.to_playing(&*self);
                } else {
                    self.seek_with_failure_transition(core, seeking_to);
                }
            }
            PlaybackState::Paused => {
                core.to_buffering(&*self);
                if !self.current_time_known {
                    core.defer_seek = Some(seeking_to);
                } else if core.is_near_current_time(&*self, seeking_to) {
                    self.plugin.resume();
                    core.to_playing(&*self);
                } else {
                    self.seek_with_failure_transition(core, seeking_to);
                    self.plugin.resume();
                }
            }
            PlaybackState::Complete => {
                self.plugin.stop();
                self.set_display_full_screen(core);
                let source = Self::wrapped_source(core);
                self.plugin.resume_play(&source, seeking_to);
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
                core.to_playing(&*self);
            }
            PlaybackState::Paused => {
                self.plugin.resume();
                core.to_playing(&*self);
            }
            _ => {}
        }
    }

    fn stop(&mut self, core: &mut Core) {
        self.stop_player();
        self.to_stopped(core);
    }

    fn handle_event(&mut self, core: &mut Core, event: DeviceEvent) {
        let DeviceEvent::Maple(event) = event else {
            return;
        };
        match event {
            MapleEvent::RenderError => core.report_error(
                &*self,
                "Media element emitted OnRenderError",
                None,
            ),
            MapleEvent::ConnectionFailed => {
                core.report_error(&*self, "Media element emitted OnConnectionFailed", None)
            }
            MapleEvent::NetworkDisconnected => {
                core.report_error(&*self, "Media element emitted OnNetworkDisconnected", None)
            }
            MapleEvent::StreamNotFound => {
                core.report_error(&*self, "Media element emitted OnStreamNotFound", None)
            }
            MapleEvent::AuthenticationFailed => {
                core.report_error(&*self, "Media element emitted OnAuthenticationFailed", None)
            }
            MapleEvent::RenderingComplete => core.to_complete(&*self),
            MapleEvent::BufferingStart => {
                if core.state() == PlaybackState::Playing {
                    core.to_buffering(&*self);
                }
            }
            MapleEvent::BufferingComplete => self.on_finished_buffering(core),
            MapleEvent::StreamInfoReady => {
                self.range = Some(SeekableRange::new(0.0, self.plugin.duration_ms() / 1000.0));
            }
            MapleEvent::CurrentPlayTime(millis) => self.on_current_time(core, millis),
            MapleEvent::WindowHide => {
                if core.state() != PlaybackState::Stopped {
                    self.stop(core);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DeviceOverrides;
    use crate::media_player::{DevicePlayer, MediaPlayer, MediaPlayerEventKind, SourceOptions};
    use crate::sim::{MapleHandle, SimMaple};
    use crate::{Error, PauseOptions};

    fn loaded(mime_type: &str) -> (DevicePlayer<SamsungMaple>, MapleHandle) {
        let (plugin, handle) = SimMaple::new();
        let mut player = DevicePlayer::new(
            SamsungMaple::new(Box::new(plugin)),
            ManualClock::shared(0),
            DeviceOverrides::default(),
        );
        player
            .initialise_media(
                MediaType::Video,
                "http://a/stream.m3u8",
                mime_type,
                SourceOptions::default(),
            )
            .unwrap();
        player.drain_events();
        (player, handle)
    }

    fn send(player: &mut DevicePlayer<SamsungMaple>, event: MapleEvent) {
        player.handle_device_event(DeviceEvent::Maple(event));
    }

    #[test]
    fn test_success_codes() {
        assert!(is_success_code(1));
        assert!(!is_success_code(0));
        assert!(!is_success_code(-1));
    }

    #[test]
    fn test_hls_source_is_wrapped() {
        let (mut player, handle) = loaded("application/vnd.apple.mpegurl");
        player.begin_playback().unwrap();
        assert_eq!(
            handle.commands(),
            vec![
                "display 0 0 1280 720".to_string(),
                "play http://a/stream.m3u8|COMPONENT=HLS".to_string()
            ]
        );
        assert_eq!(player.state(), PlaybackState::Buffering);
    }

    #[test]
    fn test_play_from_waits_for_time_update() {
        let (mut player, handle) = loaded("video/mp4");
        player.begin_playback().unwrap();
        send(&mut player, MapleEvent::BufferingComplete);
        assert_eq!(player.state(), PlaybackState::Playing);
        handle.clear_commands();

        player.play_from(60.0).unwrap();
        assert_eq!(player.state(), PlaybackState::Buffering);
        assert!(handle.commands().is_empty());

        send(&mut player, MapleEvent::CurrentPlayTime(10_000.0));
        assert_eq!(handle.commands(), vec!["jump_forward 50".to_string()]);
        assert_eq!(player.current_time(), Some(60.0));

        send(&mut player, MapleEvent::BufferingComplete);
        assert_eq!(player.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_near_play_from_skips_the_jump() {
        let (mut player, handle) = loaded("video/mp4");
        player.begin_playback().unwrap();
        send(&mut player, MapleEvent::BufferingComplete);
        send(&mut player, MapleEvent::CurrentPlayTime(30_000.0));
        handle.clear_commands();
        player.drain_events();

        player.play_from(32.0).unwrap();
        let kinds: Vec<_> = player.drain_events().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![MediaPlayerEventKind::Buffering, MediaPlayerEventKind::Playing]);
        assert!(handle.commands().is_empty());
    }

    #[test]
    fn test_refused_pause_is_retried_on_time_update() {
        let (mut player, handle) = loaded("video/mp4");
        player.begin_playback().unwrap();
        send(&mut player, MapleEvent::BufferingComplete);

        handle.set_pause_result(-1);
        player.pause(PauseOptions::default()).unwrap();
        assert_eq!(player.state(), PlaybackState::Playing);

        handle.set_pause_result(1);
        send(&mut player, MapleEvent::CurrentPlayTime(1_000.0));
        assert_eq!(player.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_stream_info_sets_range() {
        let (mut player, handle) = loaded("video/mp4");
        handle.set_duration_ms(120_000.0);
        player.begin_playback().unwrap();
        send(&mut player, MapleEvent::StreamInfoReady);
        assert_eq!(player.seekable_range(), Some(SeekableRange::new(0.0, 120.0)));
        assert_eq!(player.duration(), Some(120.0));
    }

    #[test]
    fn test_window_hide_stops() {
        let (mut player, handle) = loaded("video/mp4");
        player.begin_playback().unwrap();
        send(&mut player, MapleEvent::WindowHide);
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert_eq!(player.current_time(), None);
        assert_eq!(handle.commands().last().map(String::as_str), Some("stop"));
    }

    #[test]
    fn test_invalid_command_keeps_state() {
        let (mut player, _) = loaded("video/mp4");
        let result = player.pause(PauseOptions::default());
        assert!(matches!(result, Err(Error::InvalidCommand { .. })));
        assert_eq!(player.state(), PlaybackState::Stopped);
        let events = player.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].message.as_deref(),
            Some("Cannot pause while in the 'STOPPED' state")
        );
    }
}
