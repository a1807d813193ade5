//! Playable live tier: play and stop only

use crate::clock::Scheduled;
use crate::media_player::{DeviceEvent, MediaPlayer, MediaPlayerEvent, SourceOptions};
use crate::{Command, Error, MediaType, PauseOptions, PlaybackState, Result, SeekableRange};

const CAPABILITY: &str = "playable live streams";

/// Live player that can only start and stop
pub struct PlayableLivePlayer {
    inner: Box<dyn MediaPlayer>,
}

impl PlayableLivePlayer {
    pub fn new(inner: Box<dyn MediaPlayer>) -> Self {
        Self { inner }
    }

    fn unsupported(command: Command) -> Error {
        Error::Unsupported {
            command,
            capability: CAPABILITY,
        }
    }
}

impl MediaPlayer for PlayableLivePlayer {
    fn initialise_media(
        &mut self,
        media_type: MediaType,
        url: &str,
        mime_type: &str,
        options: SourceOptions,
    ) -> Result<()> {
        self.inner
            .initialise_media(media_type.to_live(), url, mime_type, options)
    }

    fn begin_playback(&mut self) -> Result<()> {
        self.inner.begin_playback()
    }

    fn begin_playback_from(&mut self, _seconds: f64) -> Result<()> {
        Err(Self::unsupported(Command::BeginPlaybackFrom))
    }

    fn play_from(&mut self, _seconds: f64) -> Result<()> {
        Err(Self::unsupported(Command::PlayFrom))
    }

    fn pause(&mut self, _options: PauseOptions) -> Result<()> {
        Err(Self::unsupported(Command::Pause))
    }

    fn resume(&mut self) -> Result<()> {
        Err(Self::unsupported(Command::Resume))
    }

    fn stop(&mut self) -> Result<()> {
        self.inner.stop()
    }

    fn reset(&mut self) -> Result<()> {
        self.inner.reset()
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
    }

    fn drain_events(&mut self) -> Vec<MediaPlayerEvent> {
        self.inner.drain_events()
    }

    fn to_paused(&mut self) {
        self.inner.to_paused();
    }

    fn to_playing(&mut self) {
        self.inner.to_playing();
    }
}

impl Scheduled for PlayableLivePlayer {
    fn next_deadline(&self) -> Option<u64> {
        self.inner.next_deadline()
    }

    fn poll_timers(&mut self) {
        self.inner.poll_timers();
    }

    fn pending_timers(&self) -> usize {
        self.inner.pending_timers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DeviceOverrides;
    use crate::media_player::{DevicePlayer, Html5};
    use crate::sim::{ElementHandle, SimElement};

    fn playable() -> (PlayableLivePlayer, ElementHandle) {
        let clock = ManualClock::shared(0);
        let (element, handle) = SimElement::new();
        let overrides = DeviceOverrides::default();
        let device = DevicePlayer::new(
            Html5::new(Box::new(element), clock.clone(), &overrides),
            clock,
            overrides,
        );
        (PlayableLivePlayer::new(Box::new(device)), handle)
    }

    #[test]
    fn test_forces_live_media_type() {
        let (mut player, handle) = playable();
        player
            .initialise_media(
                MediaType::Audio,
                "http://a/live.m3u8",
                "application/vnd.apple.mpegurl",
                SourceOptions::default(),
            )
            .unwrap();
        assert_eq!(handle.media_type(), Some(MediaType::LiveAudio));
        assert_eq!(player.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_seeking_and_pausing_are_unsupported() {
        let (mut player, _) = playable();
        player
            .initialise_media(
                MediaType::Video,
                "http://a/live.mpd",
                "application/dash+xml",
                SourceOptions::default(),
            )
            .unwrap();
        player.begin_playback().unwrap();

        assert!(matches!(
            player.pause(PauseOptions::default()),
            Err(Error::Unsupported { command: Command::Pause, .. })
        ));
        assert!(matches!(player.play_from(10.0), Err(Error::Unsupported { .. })));
        assert_eq!(player.state(), PlaybackState::Buffering);
    }
}
