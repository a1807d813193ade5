//! Seekable live tier
//!
//! Seeks and pauses pass straight through. A pause within the auto-resume
//! cushion of the window start is refused by bouncing through PAUSED back to
//! PLAYING; any other pause in a sliding window arms an auto-resume.

use super::{AutoResume, AUTO_RESUME_WINDOW_START_CUSHION_SECONDS};
use crate::clock::{earliest, Scheduled, SharedClock};
use crate::media_player::{DeviceEvent, MediaPlayer, MediaPlayerEvent, SourceOptions};
use crate::{MediaType, PauseOptions, PlaybackState, Result, SeekableRange, WindowType};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Live player over a device that can seek within the window
pub struct SeekableLivePlayer {
    inner: Box<dyn MediaPlayer>,
    window_type: WindowType,
    clock: SharedClock,
    force_begin_playback_to_end_of_window: bool,
    auto_resume: AutoResume,
    events: VecDeque<MediaPlayerEvent>,
}

impl SeekableLivePlayer {
    pub fn new(
        inner: Box<dyn MediaPlayer>,
        window_type: WindowType,
        clock: SharedClock,
        force_begin_playback_to_end_of_window: bool,
    ) -> Self {
        Self {
            inner,
            window_type,
            clock,
            force_begin_playback_to_end_of_window,
            auto_resume: AutoResume::new(),
            events: VecDeque::new(),
        }
    }

    /// Move the wrapped player's events into our queue
    fn pull(&mut self) {
        for event in self.inner.drain_events() {
            self.auto_resume.observe(&event);
            self.events.push_back(event);
        }
    }

    fn seconds_until_start_of_window(&self) -> Option<f64> {
        let time = self.inner.current_time()?;
        let range = self.inner.seekable_range()?;
        Some(time - range.start)
    }
}

impl MediaPlayer for SeekableLivePlayer {
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
        let result = if self.force_begin_playback_to_end_of_window {
            self.inner.begin_playback_from(f64::INFINITY)
        } else {
            self.inner.begin_playback()
        };
        self.pull();
        result
    }

    fn begin_playback_from(&mut self, seconds: f64) -> Result<()> {
        let result = self.inner.begin_playback_from(seconds);
        self.pull();
        result
    }

    fn play_from(&mut self, seconds: f64) -> Result<()> {
        let result = self.inner.play_from(seconds);
        self.pull();
        result
    }

    fn pause(&mut self, options: PauseOptions) -> Result<()> {
        self.pull();
        if options.disable_auto_resume {
            let result = self.inner.pause(options);
            self.pull();
            return result;
        }

        let near_start = self
            .seconds_until_start_of_window()
            .is_some_and(|seconds| seconds <= AUTO_RESUME_WINDOW_START_CUSHION_SECONDS);
        if near_start {
            debug!("Pause refused at the start of the live window");
            self.inner.to_paused();
            self.inner.to_playing();
            self.pull();
            return Ok(());
        }

        let result = self.inner.pause(options);
        self.pull();
        result?;
        if self.window_type == WindowType::Sliding {
            let now = self.clock.now_ms();
            self.auto_resume
                .arm(now, self.inner.current_time(), self.inner.seekable_range());
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
        self.inner.current_time()
    }

    fn seekable_range(&self) -> Option<SeekableRange> {
        self.inner.seekable_range()
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

impl Scheduled for SeekableLivePlayer {
    fn next_deadline(&self) -> Option<u64> {
        earliest(self.inner.next_deadline(), self.auto_resume.deadline())
    }

    fn poll_timers(&mut self) {
        self.inner.poll_timers();
        self.pull();
        if self.auto_resume.fire(self.clock.now_ms()) {
            debug!("Auto-resuming at the start of the live window");
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

    fn playing(
        window_type: WindowType,
        range: SeekableRange,
        time: f64,
    ) -> (SeekableLivePlayer, ElementHandle, Arc<ManualClock>) {
        let clock = ManualClock::shared(0);
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
        let mut player = SeekableLivePlayer::new(
            Box::new(device),
            window_type,
            clock.clone(),
            false,
        );
        player
            .initialise_media(
                MediaType::Video,
                "http://a/live.mpd",
                "application/dash+xml",
                SourceOptions::default(),
            )
            .unwrap();
        handle.set_seekable(Some(range));
        handle.set_current_time(time);
        player.begin_playback().unwrap();
        player.handle_device_event(DeviceEvent::Element(ElementEvent::LoadedMetadata));
        player.handle_device_event(DeviceEvent::Element(ElementEvent::Playing));
        player.drain_events();
        handle.clear_commands();
        (player, handle, clock)
    }

    #[test]
    fn test_media_type_is_forced_live() {
        let (_, handle, _) = playing(WindowType::Sliding, SeekableRange::new(0.0, 600.0), 300.0);
        assert_eq!(handle.media_type(), Some(MediaType::LiveVideo));
    }

    #[test]
    fn test_pause_near_window_start_bounces_back_to_playing() {
        let (mut player, handle, _) = playing(
            WindowType::Sliding,
            SeekableRange::new(95.0, 600.0),
            100.0,
        );
        player.pause(PauseOptions::default()).unwrap();

        let kinds: Vec<_> = player.drain_events().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![MediaPlayerEventKind::Paused, MediaPlayerEventKind::Playing]);
        assert_eq!(player.state(), PlaybackState::Playing);
        assert!(handle.commands().is_empty());
        assert_eq!(player.pending_timers(), 0);
    }

    #[test]
    fn test_sliding_pause_auto_resumes() {
        let (mut player, handle, clock) = playing(
            WindowType::Sliding,
            SeekableRange::new(0.0, 600.0),
            20.0,
        );
        player.pause(PauseOptions::default()).unwrap();
        assert_eq!(player.state(), PlaybackState::Paused);
        assert_eq!(player.next_deadline(), Some(12_000));

        drive_for(&mut player, &clock, 12_000);
        assert_eq!(player.state(), PlaybackState::Playing);
        assert_eq!(handle.commands(), vec!["pause".to_string(), "play".to_string()]);
    }

    #[test]
    fn test_growing_pause_does_not_auto_resume() {
        let (mut player, _, _) = playing(
            WindowType::Growing,
            SeekableRange::new(0.0, 600.0),
            300.0,
        );
        player.pause(PauseOptions::default()).unwrap();
        assert_eq!(player.state(), PlaybackState::Paused);
        assert_eq!(player.pending_timers(), 0);
    }

    #[test]
    fn test_resume_cancels_auto_resume() {
        let (mut player, _, _) = playing(
            WindowType::Sliding,
            SeekableRange::new(0.0, 600.0),
            300.0,
        );
        player.pause(PauseOptions::default()).unwrap();
        assert_eq!(player.pending_timers(), 1);
        player.resume().unwrap();
        assert_eq!(player.pending_timers(), 0);
    }

    #[test]
    fn test_disable_auto_resume_pauses_plainly() {
        let (mut player, _, _) = playing(
            WindowType::Sliding,
            SeekableRange::new(95.0, 600.0),
            100.0,
        );
        player.pause(PauseOptions::no_auto_resume()).unwrap();
        assert_eq!(player.state(), PlaybackState::Paused);
        assert_eq!(player.pending_timers(), 0);
    }
}
