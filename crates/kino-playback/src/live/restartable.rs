//! Restartable live tier
//!
//! The device cannot report a meaningful live position, so time and range
//! come from a fake clock started when playback begins. Seeking is done by
//! restarting the session, never in place.

use super::AutoResume;
use crate::clock::{earliest, Scheduled, SharedClock};
use crate::manifest::TimeData;
use crate::media_player::{DeviceEvent, MediaPlayer, MediaPlayerEvent, SourceOptions};
use crate::{
    Command, Error, MediaType, PauseOptions, PlaybackState, Result, SeekableRange, WindowType,
};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Media time accumulated only while the player reports PLAYING
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FakeClock {
    last_sample_ms: Option<u64>,
    accumulated: f64,
    running: bool,
    started: bool,
}

impl FakeClock {
    /// Restart the clock at `seconds`, stopped
    pub fn set(&mut self, seconds: f64) {
        self.accumulated = seconds;
        self.started = true;
    }

    /// Fold in the time elapsed since the last sample and record whether
    /// the player is playing from now on
    pub fn sample(&mut self, now_ms: u64, playing: bool) {
        self.accumulated = self.read(now_ms).unwrap_or(self.accumulated);
        self.last_sample_ms = Some(now_ms);
        self.running = playing;
    }

    /// Current media time, `None` before the clock was set
    pub fn read(&self, now_ms: u64) -> Option<f64> {
        if !self.started {
            return None;
        }
        let running = match (self.running, self.last_sample_ms) {
            (true, Some(last)) => now_ms.saturating_sub(last) as f64 / 1000.0,
            _ => 0.0,
        };
        Some(self.accumulated + running)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

/// Live player over a device that can only restart playback
pub struct RestartableLivePlayer {
    inner: Box<dyn MediaPlayer>,
    window_type: WindowType,
    time: TimeData,
    time_correction: f64,
    clock: SharedClock,
    force_begin_playback_to_end_of_window: bool,
    fake_clock: FakeClock,
    start_time_ms: Option<u64>,
    auto_resume: AutoResume,
    events: VecDeque<MediaPlayerEvent>,
}

impl RestartableLivePlayer {
    pub fn new(
        inner: Box<dyn MediaPlayer>,
        window_type: WindowType,
        time: TimeData,
        clock: SharedClock,
        force_begin_playback_to_end_of_window: bool,
    ) -> Self {
        Self {
            inner,
            window_type,
            time_correction: time.time_correction(),
            time,
            clock,
            force_begin_playback_to_end_of_window,
            fake_clock: FakeClock::default(),
            start_time_ms: None,
            auto_resume: AutoResume::new(),
            events: VecDeque::new(),
        }
    }

    fn window_length(&self) -> Option<f64> {
        self.time.window_length_seconds()
    }

    /// Move the wrapped player's events into our queue, rewriting their
    /// time and range with the fake clock
    fn pull(&mut self) {
        for mut event in self.inner.drain_events() {
            let now = self.clock.now_ms();
            self.fake_clock
                .sample(now, event.state == PlaybackState::Playing);
            event.current_time = self.current_time();
            event.seekable_range = self.seekable_range();
            self.auto_resume.observe(&event);
            self.events.push_back(event);
        }
    }
}

impl MediaPlayer for RestartableLivePlayer {
    fn initialise_media(
        &mut self,
        media_type: MediaType,
        url: &str,
        mime_type: &str,
        options: SourceOptions,
    ) -> Result<()> {
        let result = self
            .inner
            .initialise_media(media_type.to_live(), url, mime_type, options);
        self.pull();
        result
    }

    fn begin_playback(&mut self) -> Result<()> {
        self.start_time_ms = Some(self.clock.now_ms());
        if let Some(length) = self.window_length() {
            self.fake_clock.set(length);
        }
        let result = if self.force_begin_playback_to_end_of_window {
            self.inner.begin_playback_from(f64::INFINITY)
        } else {
            self.inner.begin_playback()
        };
        self.pull();
        result
    }

    fn begin_playback_from(&mut self, seconds: f64) -> Result<()> {
        self.start_time_ms = Some(self.clock.now_ms());
        self.fake_clock.set(seconds);
        let result = self.inner.begin_playback_from(seconds);
        self.pull();
        result
    }

    fn play_from(&mut self, _seconds: f64) -> Result<()> {
        Err(Error::Unsupported {
            command: Command::PlayFrom,
            capability: "restartable live streams",
        })
    }

    fn pause(&mut self, options: PauseOptions) -> Result<()> {
        self.pull();
        let result = self.inner.pause(options);
        self.pull();
        result?;
        if !options.disable_auto_resume && self.window_type == WindowType::Sliding {
            let now = self.clock.now_ms();
            self.auto_resume
                .arm(now, self.current_time(), self.seekable_range());
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let result = self.inner.resume();
        self.pull();
        result
    }

    fn stop(&mut self) -> Result<()> {
        let result = self.inner.stop();
        self.pull();
        result
    }

    fn reset(&mut self) -> Result<()> {
        self.auto_resume.cancel();
        let result = self.inner.reset();
        self.pull();
        result
    }

    fn state(&self) -> PlaybackState {
        self.inner.state()
    }

    fn current_time(&self) -> Option<f64> {
        self.fake_clock
            .read(self.clock.now_ms())
            .map(|time| time + self.time_correction)
    }

    fn seekable_range(&self) -> Option<SeekableRange> {
        let length = self.window_length()?;
        let started = self.start_time_ms?;
        let delta = self.clock.now_ms().saturating_sub(started) as f64 / 1000.0;
        let start = if self.window_type == WindowType::Sliding {
            delta
        } else {
            0.0
        };
        Some(SeekableRange::new(
            start + self.time_correction,
            length + delta + self.time_correction,
        ))
    }

    fn duration(&self) -> Option<f64> {
        self.inner.duration()
    }

    fn source(&self) -> Option<String> {
        self.inner.source()
    }

    fn mime_type(&self) -> Option<String> {
        self.inner.mime_type()
    }

    fn handle_device_event(&mut self, event: DeviceEvent) {
        self.inner.handle_device_event(event);
        self.pull();
    }

    fn drain_events(&mut self) -> Vec<MediaPlayerEvent> {
        self.pull();
        self.events.drain(..).collect()
    }

    fn to_paused(&mut self) {
        self.inner.to_paused();
        self.pull();
    }

    fn to_playing(&mut self) {
        self.inner.to_playing();
        self.pull();
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.inner.set_playback_rate(rate);
    }

    fn playback_rate(&self) -> f64 {
        self.inner.playback_rate()
    }
}

impl Scheduled for RestartableLivePlayer {
    fn next_deadline(&self) -> Option<u64> {
        earliest(self.inner.next_deadline(), self.auto_resume.deadline())
    }

    fn poll_timers(&mut self) {
        self.inner.poll_timers();
        self.pull();
        if self.auto_resume.fire(self.clock.now_ms()) {
            debug!("Auto-resuming restartable live stream");
            if let Err(error) = self.inner.resume() {
                warn!(%error, "Auto-resume rejected");
            }
            self.pull();
        }
    }

    fn pending_timers(&self) -> usize {
        self.inner.pending_timers() + usize::from(self.auto_resume.is_pending())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{drive_for, ManualClock};
    use crate::config::DeviceOverrides;
    use crate::media_player::{DevicePlayer, ElementEvent, Html5, MediaPlayerEventKind};
    use crate::sim::{ElementHandle, SimElement};
    use std::sync::Arc;

    fn time_data() -> TimeData {
        TimeData {
            window_start_time: Some(1_000_000.0),
            window_end_time: Some(1_600_000.0),
            presentation_time_offset_seconds: None,
            time_correction_seconds: Some(10.0),
        }
    }

    fn restartable(
        window_type: WindowType,
    ) -> (RestartableLivePlayer, ElementHandle, Arc<ManualClock>) {
        let clock = ManualClock::shared(50_000);
        let (element, handle) = SimElement::new();
        let overrides = DeviceOverrides {
            disable_sentinels: true,
            ..DeviceOverrides::default()
        };
        let device = DevicePlayer::new(
            Html5::new(Box::new(element), clock.clone(), &overrides),
            clock.clone(),
            overrides,
        );
        let mut player = RestartableLivePlayer::new(
            Box::new(device),
            window_type,
            time_data(),
            clock.clone(),
            false,
        );
        player
            .initialise_media(
                MediaType::Video,
                "http://a/live.m3u8",
                "application/vnd.apple.mpegurl",
                SourceOptions::default(),
            )
            .unwrap();
        player.drain_events();
        (player, handle, clock)
    }

    #[test]
    fn test_fake_clock_accumulates_only_while_playing() {
        let mut fake = FakeClock::default();
        assert_eq!(fake.read(0), None);
        fake.set(100.0);
        fake.sample(0, true);
        assert_eq!(fake.read(2_000), Some(102.0));
        fake.sample(2_000, false);
        assert_eq!(fake.read(10_000), Some(102.0));
        fake.sample(10_000, true);
        assert_eq!(fake.read(11_500), Some(103.5));
    }

    #[test]
    fn test_begin_playback_starts_at_window_end() {
        let (mut player, _, clock) = restartable(WindowType::Sliding);
        player.begin_playback().unwrap();
        player.handle_device_event(DeviceEvent::Element(ElementEvent::Playing));
        let events = player.drain_events();
        assert_eq!(events.last().map(|e| e.kind), Some(MediaPlayerEventKind::Playing));
        assert_eq!(events.last().and_then(|e| e.current_time), Some(610.0));

        clock.advance(5_000);
        assert_eq!(player.current_time(), Some(615.0));
        assert_eq!(player.seekable_range(), Some(SeekableRange::new(15.0, 615.0)));
    }

    #[test]
    fn test_growing_range_starts_at_zero() {
        let (mut player, _, clock) = restartable(WindowType::Growing);
        player.begin_playback_from(30.0).unwrap();
        clock.advance(4_000);
        assert_eq!(player.seekable_range(), Some(SeekableRange::new(10.0, 614.0)));
        // still buffering, the fake clock does not run
        assert_eq!(player.current_time(), Some(40.0));
    }

    #[test]
    fn test_play_from_is_unsupported() {
        let (mut player, _, _) = restartable(WindowType::Sliding);
        assert!(matches!(player.play_from(10.0), Err(Error::Unsupported { .. })));
    }

    #[test]
    fn test_sliding_pause_auto_resumes() {
        let (mut player, handle, clock) = restartable(WindowType::Sliding);
        player.begin_playback_from(20.0).unwrap();
        player.handle_device_event(DeviceEvent::Element(ElementEvent::LoadedMetadata));
        player.handle_device_event(DeviceEvent::Element(ElementEvent::Playing));
        player.pause(PauseOptions::default()).unwrap();
        assert_eq!(player.state(), PlaybackState::Paused);
        // time 30 (20 + correction 10), range start 10: resume after 12s
        assert_eq!(player.next_deadline(), Some(62_000));

        drive_for(&mut player, &clock, 12_000);
        assert_eq!(player.state(), PlaybackState::Playing);
        assert_eq!(handle.commands().last().map(String::as_str), Some("play"));
        assert_eq!(player.pending_timers(), 0);
    }
}
