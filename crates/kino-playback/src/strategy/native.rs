//! Native strategy
//!
//! Drives a device player (already wrapped for the live tier) and maps its
//! events to media states. Device times are shifted by the time correction of
//! the current source.

use super::{HostEvent, Strategy, StrategyEvent, StrategyMedia, Transitions};
use crate::clock::{Scheduled, SharedClock};
use crate::config::{DeviceOverrides, StrategyKind};
use crate::media_player::{MediaPlayer, MediaPlayerEvent, MediaPlayerEventKind, SourceOptions};
use crate::media_sources::MediaSources;
use crate::{
    MediaError, MediaKind, MediaState, MediaType, PauseOptions, Result, SeekableRange, WindowType,
};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

const EVENT_HISTORY_LENGTH: usize = 2;

/// A confirmed seek lands within this many seconds of its target
const EXIT_SEEK_TOLERANCE_SECONDS: f64 = 30.0;

const DASH_MIME_TYPE: &str = "application/dash+xml";

/// One entry of the recent event history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    pub kind: MediaPlayerEventKind,
    pub at_ms: u64,
}

pub struct NativeStrategy {
    player: Box<dyn MediaPlayer>,
    clock: SharedClock,
    window_type: WindowType,
    media_kind: MediaKind,
    time_correction: f64,
    source_options: SourceOptions,
    show_live_curtain: bool,
    force_end_of_window: bool,
    pause_on_exit_seek_override: bool,

    events: Vec<StrategyEvent>,
    history: VecDeque<HistoryEntry>,
    is_ended: bool,
    is_paused: bool,
    duration: f64,
    current_time: Option<f64>,
    has_start_time: bool,

    handle_error_on_exiting_seek: bool,
    delay_pause_on_exit_seek: bool,
    pause_on_exit_seek: bool,
    exiting_seek: bool,
    target_seek_time: f64,
    curtain_shown: bool,
}

impl NativeStrategy {
    pub fn new(
        player: Box<dyn MediaPlayer>,
        sources: &MediaSources,
        media: StrategyMedia,
        overrides: &DeviceOverrides,
        clock: SharedClock,
    ) -> Self {
        let window_type = sources.window_type();
        let source_options = SourceOptions {
            disable_sentinels: media.is_uhd
                && window_type.is_live()
                && overrides.live_uhd_disable_sentinels,
            disable_seek_sentinel: overrides.disable_seek_sentinel,
        };
        Self {
            player,
            clock,
            window_type,
            media_kind: media.kind,
            time_correction: sources.time().time_correction(),
            source_options,
            show_live_curtain: overrides.show_live_curtain,
            force_end_of_window: overrides.force_begin_playback_to_end_of_window,
            pause_on_exit_seek_override: overrides.pause_on_exit_seek,
            events: Vec::new(),
            history: VecDeque::with_capacity(EVENT_HISTORY_LENGTH),
            is_ended: false,
            is_paused: false,
            duration: 0.0,
            current_time: None,
            has_start_time: false,
            handle_error_on_exiting_seek: false,
            delay_pause_on_exit_seek: false,
            pause_on_exit_seek: false,
            exiting_seek: false,
            target_seek_time: 0.0,
            curtain_shown: false,
        }
    }

    /// The two most recent non-status events, newest first
    pub fn event_history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    fn publish(&mut self, state: MediaState) {
        self.events.push(StrategyEvent::State(state));
    }

    /// Handle everything the player queued
    fn pump(&mut self) {
        loop {
            let events = self.player.drain_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                self.handle_player_event(event);
            }
        }
    }

    fn handle_player_event(&mut self, event: MediaPlayerEvent) {
        match event.kind {
            MediaPlayerEventKind::Playing => self.on_playing(&event),
            MediaPlayerEventKind::Paused => {
                self.is_paused = true;
                self.publish(MediaState::Paused);
            }
            MediaPlayerEventKind::Buffering => {
                self.is_ended = false;
                self.publish(MediaState::Waiting);
            }
            MediaPlayerEventKind::SeekAttempted => self.on_seek_attempted(),
            MediaPlayerEventKind::SeekFinished => self.on_seek_finished(),
            MediaPlayerEventKind::Status => self.on_time_update(&event),
            MediaPlayerEventKind::Complete => {
                self.is_paused = true;
                self.is_ended = true;
                self.publish(MediaState::Ended);
            }
            MediaPlayerEventKind::Error => self.on_error(&event),
            other => debug!(event = %other, "Player event"),
        }

        if event.kind != MediaPlayerEventKind::Status {
            if self.history.len() >= EVENT_HISTORY_LENGTH {
                self.history.pop_back();
            }
            self.history.push_front(HistoryEntry {
                kind: event.kind,
                at_ms: self.clock.now_ms(),
            });
        }
    }

    fn on_playing(&mut self, event: &MediaPlayerEvent) {
        self.current_time = event.current_time.map(|time| time - self.time_correction);
        self.is_paused = false;
        self.is_ended = false;
        if self.duration == 0.0 {
            self.duration = event.duration.unwrap_or(0.0);
        }
        self.publish(MediaState::Playing);
    }

    fn on_time_update(&mut self, event: &MediaPlayerEvent) {
        self.is_paused = false;

        // a freshly loaded device reports 0 before it has moved to the requested time
        if let Some(time) = event.current_time.filter(|time| time.trunc() != 0.0) {
            self.current_time = Some(time - self.time_correction);
        }

        // published before the seek check, which may pause
        self.events.push(StrategyEvent::TimeUpdate);

        let workaround_armed = self.handle_error_on_exiting_seek || self.delay_pause_on_exit_seek;
        if workaround_armed && self.exiting_seek {
            let range_start = event.seekable_range.map_or(0.0, |range| range.start);
            self.check_seek_succeeded(range_start, event.current_time.unwrap_or(0.0));
        }
    }

    fn check_seek_succeeded(&mut self, seekable_range_start: f64, current_time: f64) {
        let clamped_target = seekable_range_start.max(self.target_seek_time);
        if (current_time - clamped_target).abs() >= EXIT_SEEK_TOLERANCE_SECONDS {
            return;
        }
        if self.pause_on_exit_seek {
            debug!("Applying pause held while exiting seek");
            if let Err(error) = self.player.pause(PauseOptions::default()) {
                warn!(%error, "Held pause rejected");
            }
            self.pause_on_exit_seek = false;
        }
        self.exiting_seek = false;
    }

    fn on_error(&mut self, event: &MediaPlayerEvent) {
        if self.handle_error_on_exiting_seek && self.exiting_seek {
            self.restart_media_player();
            return;
        }
        let error = event.error.clone().unwrap_or_else(|| {
            MediaError::new(0, event.message.clone().unwrap_or_else(|| "unknown".to_string()))
        });
        self.events.push(StrategyEvent::Error(error));
    }

    /// DASH live streams can fail on exiting a seek once the window start has
    /// overtaken the paused position; start again from the tracked time.
    fn restart_media_player(&mut self) {
        warn!("Restarting player after an error while exiting seek");
        self.exiting_seek = false;
        self.pause_on_exit_seek = false;

        let source = self.player.source().unwrap_or_default();
        let mime_type = self.player.mime_type().unwrap_or_default();
        self.reset_player();

        let start = self.current_time.map_or(0.0, |time| time + self.time_correction);
        let restarted = self
            .player
            .initialise_media(
                MediaType::for_kind(self.media_kind),
                &source,
                &mime_type,
                self.source_options,
            )
            .and_then(|()| self.player.begin_playback_from(start));
        if let Err(error) = restarted {
            warn!(%error, "Restart after exiting seek failed");
        }
    }

    fn on_seek_attempted(&mut self) {
        if !self.show_live_curtain {
            return;
        }
        if self.window_type.is_live() && (self.has_start_time || self.force_end_of_window) {
            self.curtain_shown = true;
            self.events.push(StrategyEvent::LiveCurtain { visible: true });
        }
    }

    fn on_seek_finished(&mut self) {
        if self.show_live_curtain && self.curtain_shown {
            self.curtain_shown = false;
            self.events.push(StrategyEvent::LiveCurtain { visible: false });
        }
    }

    fn setup_exit_seek_workarounds(&mut self, mime_type: &str) {
        self.handle_error_on_exiting_seek =
            self.window_type.is_live() && mime_type == DASH_MIME_TYPE;
        self.delay_pause_on_exit_seek =
            self.handle_error_on_exiting_seek || self.pause_on_exit_seek_override;
    }

    fn reset_player(&mut self) {
        if self.transitions().can_be_stopped {
            if let Err(error) = self.player.stop() {
                debug!(%error, "Stop before reset rejected");
            }
        }
        if let Err(error) = self.player.reset() {
            debug!(%error, "Reset rejected");
        }
    }

    fn after<T>(&mut self, result: Result<T>) -> Result<T> {
        self.pump();
        result
    }
}

impl Strategy for NativeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Native
    }

    fn load(
        &mut self,
        sources: &MediaSources,
        mime_type: &str,
        start_time: Option<f64>,
    ) -> Result<()> {
        self.setup_exit_seek_workarounds(mime_type);
        self.is_paused = false;
        self.has_start_time = start_time.is_some();

        let url = sources.current_source().unwrap_or_default().to_string();
        let media_type = MediaType::for_kind(self.media_kind);
        let result = self
            .player
            .initialise_media(media_type, &url, mime_type, self.source_options)
            .and_then(|()| match start_time {
                Some(start) => {
                    self.current_time = Some(start);
                    self.player.begin_playback_from(start + self.time_correction)
                }
                None if !self.window_type.is_live() => {
                    self.current_time = None;
                    self.player.begin_playback_from(self.time_correction)
                }
                None => self.player.begin_playback(),
            });
        self.after(result)
    }

    fn play(&mut self) -> Result<()> {
        self.is_paused = false;
        let result = if self.delay_pause_on_exit_seek && self.exiting_seek {
            self.pause_on_exit_seek = false;
            Ok(())
        } else if self.is_ended {
            self.player.play_from(0.0)
        } else if self.transitions().can_resume {
            self.player.resume()
        } else {
            let from = self.current_time.unwrap_or(0.0) + self.time_correction;
            self.player.play_from(from)
        };
        self.after(result)
    }

    fn pause(&mut self, options: PauseOptions) -> Result<()> {
        let hold = self.delay_pause_on_exit_seek
            && self.exiting_seek
            && self.transitions().can_be_paused;
        let result = if hold {
            debug!("Holding pause until the seek settles");
            self.pause_on_exit_seek = true;
            Ok(())
        } else {
            self.player.pause(options)
        };
        self.after(result)
    }

    fn set_current_time(&mut self, seconds: f64) -> Result<()> {
        self.is_ended = false;
        self.current_time = Some(seconds);
        let corrected = seconds + self.time_correction;

        if self.handle_error_on_exiting_seek || self.delay_pause_on_exit_seek {
            self.target_seek_time = corrected;
            self.exiting_seek = true;
            self.pause_on_exit_seek = self.is_paused;
        }

        let mut result = self.player.play_from(corrected);
        if result.is_ok() && self.is_paused && !self.delay_pause_on_exit_seek {
            result = self.player.pause(PauseOptions::default());
        }
        self.after(result)
    }

    fn current_time(&self) -> Option<f64> {
        self.current_time
    }

    fn seekable_range(&self) -> Option<SeekableRange> {
        if !self.window_type.is_live() {
            return Some(SeekableRange::new(0.0, self.duration));
        }
        self.player
            .seekable_range()
            .map(|range| range.shifted(-self.time_correction))
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn is_paused(&self) -> bool {
        self.is_paused
    }

    fn is_ended(&self) -> bool {
        self.is_ended
    }

    fn transitions(&self) -> Transitions {
        Transitions::for_state(self.player.state())
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.player.set_playback_rate(rate);
    }

    fn playback_rate(&self) -> f64 {
        self.player.playback_rate()
    }

    fn set_subtitles(&mut self, enabled: bool) {
        debug!(enabled, "Subtitles are rendered outside the device player");
    }

    fn handle_host_event(&mut self, _sources: &MediaSources, event: HostEvent) {
        match event {
            HostEvent::Device(event) => {
                self.player.handle_device_event(event);
                self.pump();
            }
            HostEvent::Dash(event) => debug!(?event, "Ignoring engine event"),
        }
    }

    fn drain_events(&mut self) -> Vec<StrategyEvent> {
        std::mem::take(&mut self.events)
    }

    fn reset(&mut self) {
        self.reset_player();
        self.pump();
    }

    fn tear_down(&mut self) {
        info!("Tearing down native strategy");
        self.reset_player();
        self.player.drain_events();
        self.events.clear();
        self.history.clear();
        self.pause_on_exit_seek = false;
        self.exiting_seek = false;
        self.delay_pause_on_exit_seek = false;
        self.handle_error_on_exiting_seek = false;
        self.curtain_shown = false;
        self.current_time = None;
    }
}

impl Scheduled for NativeStrategy {
    fn next_deadline(&self) -> Option<u64> {
        self.player.next_deadline()
    }

    fn poll_timers(&mut self) {
        self.player.poll_timers();
        self.pump();
    }

    fn pending_timers(&self) -> usize {
        self.player.pending_timers()
    }
}

impl std::fmt::Debug for NativeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeStrategy")
            .field("state", &self.player.state())
            .field("window_type", &self.window_type)
            .field("current_time", &self.current_time)
            .field("exiting_seek", &self.exiting_seek)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::media_player::{DeviceEvent, DevicePlayer, ElementEvent, Html5};
    use crate::media_sources::SourcesConfig;
    use crate::plugins::Plugins;
    use crate::sim::{ElementHandle, SimElement};
    use crate::MediaSourceEntry;
    use std::sync::Arc;

    const MP4: &str = "video/mp4";

    fn setup(
        window_type: WindowType,
    ) -> (NativeStrategy, MediaSources, ElementHandle, Arc<ManualClock>) {
        let clock = ManualClock::shared(0);
        let mut sources = MediaSources::new(Plugins::new(), clock.clone(), 120_000, 5_000);
        sources
            .init(SourcesConfig {
                urls: vec![MediaSourceEntry::new("A", "http://a/video.mp4")],
                window_type,
                live_support: crate::LiveSupport::Playable,
                ..SourcesConfig::default()
            })
            .unwrap();

        let (element, handle) = SimElement::new();
        let overrides = DeviceOverrides::default();
        let player = DevicePlayer::new(
            Html5::new(Box::new(element), clock.clone(), &overrides),
            clock.clone(),
            overrides.clone(),
        );
        let strategy = NativeStrategy::new(
            Box::new(player),
            &sources,
            StrategyMedia::default(),
            &overrides,
            clock.clone(),
        );
        (strategy, sources, handle, clock)
    }

    fn element(strategy: &mut NativeStrategy, sources: &MediaSources, event: ElementEvent) {
        strategy.handle_host_event(sources, HostEvent::Device(DeviceEvent::Element(event)));
    }

    fn states(events: &[StrategyEvent]) -> Vec<MediaState> {
        events
            .iter()
            .filter_map(|event| match event {
                StrategyEvent::State(state) => Some(*state),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_load_begins_playback_and_waits() {
        let (mut strategy, sources, handle, _) = setup(WindowType::Static);
        strategy.load(&sources, MP4, None).unwrap();

        assert_eq!(handle.loaded_url().as_deref(), Some("http://a/video.mp4"));
        assert_eq!(states(&strategy.drain_events()), vec![MediaState::Waiting]);
        assert!(strategy.transitions().can_be_paused);
    }

    #[test]
    fn test_playing_and_ended_map_to_media_states() {
        let (mut strategy, sources, handle, _) = setup(WindowType::Static);
        strategy.load(&sources, MP4, Some(0.0)).unwrap();
        handle.set_duration(100.0);
        handle.set_seekable(Some(SeekableRange::new(0.0, 100.0)));
        element(&mut strategy, &sources, ElementEvent::LoadedMetadata);
        element(&mut strategy, &sources, ElementEvent::Playing);
        strategy.drain_events();

        assert_eq!(strategy.duration(), 100.0);
        assert_eq!(strategy.seekable_range(), Some(SeekableRange::new(0.0, 100.0)));

        element(&mut strategy, &sources, ElementEvent::Ended);
        assert_eq!(states(&strategy.drain_events()), vec![MediaState::Ended]);
        assert!(strategy.is_ended());
        assert!(strategy.is_paused());
        assert_eq!(strategy.event_history().count(), 2);
    }

    #[test]
    fn test_invalid_command_publishes_error() {
        let (mut strategy, _, _, _) = setup(WindowType::Static);
        let result = strategy.pause(PauseOptions::default());
        assert!(result.is_err());
        let events = strategy.drain_events();
        assert!(matches!(events.as_slice(), [StrategyEvent::Error(_)]));
    }

    #[test]
    fn test_tear_down_clears_timers() {
        let (mut strategy, sources, _, _) = setup(WindowType::Static);
        strategy.load(&sources, MP4, Some(10.0)).unwrap();
        element(&mut strategy, &sources, ElementEvent::LoadedMetadata);
        element(&mut strategy, &sources, ElementEvent::Playing);
        strategy.tear_down();
        assert_eq!(strategy.pending_timers(), 0);
        assert!(strategy.drain_events().is_empty());
    }
}
