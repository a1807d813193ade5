//! Basic strategy
//!
//! Plays the current source straight through a media element, without a
//! device player in between. The element autoplays once loaded.

use super::{HostEvent, Strategy, StrategyEvent, Transitions};
use crate::clock::{Scheduled, SharedClock};
use crate::config::StrategyKind;
use crate::live::AutoResume;
use crate::media_player::{DeviceEvent, ElementEvent, VideoElement};
use crate::media_sources::MediaSources;
use crate::{
    MediaError, MediaKind, MediaState, MediaType, PauseOptions, Result, SeekableRange, WindowType,
};
use tracing::{debug, warn};

/// Seeks land at least this far before the end of the range
const CLAMP_OFFSET_SECONDS: f64 = 1.1;

pub struct BasicStrategy {
    element: Box<dyn VideoElement>,
    clock: SharedClock,
    window_type: WindowType,
    media_kind: MediaKind,
    time_correction: f64,
    loaded: bool,
    metadata_loaded: bool,
    is_ended: bool,
    auto_resume: AutoResume,
    events: Vec<StrategyEvent>,
}

impl BasicStrategy {
    pub fn new(
        element: Box<dyn VideoElement>,
        sources: &MediaSources,
        media_kind: MediaKind,
        clock: SharedClock,
    ) -> Self {
        Self {
            element,
            clock,
            window_type: sources.window_type(),
            media_kind,
            time_correction: sources.time().time_correction(),
            loaded: false,
            metadata_loaded: false,
            is_ended: false,
            auto_resume: AutoResume::new(),
            events: Vec::new(),
        }
    }

    fn publish(&mut self, state: MediaState) {
        self.auto_resume.observe_state(state);
        self.events.push(StrategyEvent::State(state));
    }

    fn start_auto_resume(&mut self) {
        let now = self.clock.now_ms();
        self.auto_resume
            .arm(now, self.current_time(), self.seekable_range());
    }

    fn set_start_time(&mut self, start_time: Option<f64>) {
        if let Some(start) = start_time.filter(|start| *start != 0.0) {
            self.element.set_current_time(start + self.time_correction);
        }
    }

    fn on_seeked(&mut self) {
        if self.element.is_paused() {
            if self.window_type == WindowType::Sliding {
                self.start_auto_resume();
            }
            self.publish(MediaState::Paused);
        } else {
            self.publish(MediaState::Playing);
        }
    }

    fn on_error(&mut self) {
        let error = self
            .element
            .error()
            .filter(|error| !error.message.is_empty())
            .unwrap_or_else(|| {
                let code = self.element.error().map_or(0, |error| error.code);
                MediaError::new(code, "unknown")
            });
        warn!(code = error.code, message = %error.message, "Media element error");
        self.events.push(StrategyEvent::Error(error));
    }

    fn clamped_time(&self, seconds: f64, range: SeekableRange) -> f64 {
        seconds.max(range.start).min(range.end - CLAMP_OFFSET_SECONDS)
    }
}

impl Strategy for BasicStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Basic
    }

    fn load(
        &mut self,
        sources: &MediaSources,
        mime_type: &str,
        start_time: Option<f64>,
    ) -> Result<()> {
        let url = sources.current_source().unwrap_or_default();
        let media_type = MediaType::for_kind(self.media_kind);
        debug!(url, reload = self.loaded, "Loading media element");

        self.element.load(url, mime_type, media_type);
        self.loaded = true;
        self.metadata_loaded = false;
        self.is_ended = false;
        self.set_start_time(start_time);
        self.element.play();
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        self.element.play();
        Ok(())
    }

    fn pause(&mut self, options: PauseOptions) -> Result<()> {
        self.element.pause();
        if !options.disable_auto_resume && self.window_type == WindowType::Sliding {
            self.start_auto_resume();
        }
        Ok(())
    }

    fn set_current_time(&mut self, seconds: f64) -> Result<()> {
        // without metadata there is no range to clamp to
        let target = if self.metadata_loaded {
            self.seekable_range()
                .map_or(seconds, |range| self.clamped_time(seconds, range))
        } else {
            seconds
        };
        self.is_ended = false;
        self.element.set_current_time(target + self.time_correction);
        Ok(())
    }

    fn current_time(&self) -> Option<f64> {
        self.loaded
            .then(|| self.element.current_time() - self.time_correction)
    }

    fn seekable_range(&self) -> Option<SeekableRange> {
        let range = self
            .element
            .seekable()
            .filter(|_| self.loaded && self.metadata_loaded)
            .map(|range| range.shifted(-self.time_correction))
            .unwrap_or_else(|| SeekableRange::new(0.0, 0.0));
        Some(range)
    }

    fn duration(&self) -> f64 {
        if self.loaded && self.metadata_loaded {
            self.element.duration().unwrap_or(0.0)
        } else {
            0.0
        }
    }

    fn is_paused(&self) -> bool {
        self.element.is_paused()
    }

    fn is_ended(&self) -> bool {
        self.is_ended
    }

    fn transitions(&self) -> Transitions {
        Transitions::all()
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.element.set_playback_rate(rate);
    }

    fn playback_rate(&self) -> f64 {
        self.element.playback_rate()
    }

    fn set_subtitles(&mut self, enabled: bool) {
        debug!(enabled, "Subtitles are rendered outside the media element");
    }

    fn handle_host_event(&mut self, _sources: &MediaSources, event: HostEvent) {
        let HostEvent::Device(DeviceEvent::Element(event)) = event else {
            debug!(?event, "Ignoring non-element event");
            return;
        };
        if !self.loaded {
            return;
        }
        match event {
            ElementEvent::Playing => {
                self.is_ended = false;
                self.publish(MediaState::Playing);
            }
            ElementEvent::Pause => self.publish(MediaState::Paused),
            ElementEvent::Seeking | ElementEvent::Waiting => self.publish(MediaState::Waiting),
            ElementEvent::Seeked => self.on_seeked(),
            ElementEvent::Ended => {
                self.is_ended = true;
                self.publish(MediaState::Ended);
            }
            ElementEvent::TimeUpdate => self.events.push(StrategyEvent::TimeUpdate),
            ElementEvent::Error | ElementEvent::SourceError => self.on_error(),
            ElementEvent::LoadedMetadata => self.metadata_loaded = true,
            ElementEvent::CanPlay | ElementEvent::Play => {}
        }
    }

    fn drain_events(&mut self) -> Vec<StrategyEvent> {
        std::mem::take(&mut self.events)
    }

    fn reset(&mut self) {}

    fn tear_down(&mut self) {
        if self.loaded {
            self.element.unload();
        }
        self.loaded = false;
        self.metadata_loaded = false;
        self.is_ended = false;
        self.auto_resume.cancel();
        self.events.clear();
        self.time_correction = 0.0;
    }
}

impl Scheduled for BasicStrategy {
    fn next_deadline(&self) -> Option<u64> {
        self.auto_resume.deadline()
    }

    fn poll_timers(&mut self) {
        if self.auto_resume.fire(self.clock.now_ms()) {
            debug!("Auto-resuming at the start of the window");
            self.element.play();
        }
    }

    fn pending_timers(&self) -> usize {
        usize::from(self.auto_resume.is_pending())
    }
}

impl std::fmt::Debug for BasicStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicStrategy")
            .field("window_type", &self.window_type)
            .field("loaded", &self.loaded)
            .field("metadata_loaded", &self.metadata_loaded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{drive_for, ManualClock};
    use crate::media_sources::SourcesConfig;
    use crate::plugins::Plugins;
    use crate::sim::{ElementHandle, SimElement};
    use crate::{LiveSupport, MediaSourceEntry};
    use std::sync::Arc;

    fn setup(
        window_type: WindowType,
    ) -> (BasicStrategy, MediaSources, ElementHandle, Arc<ManualClock>) {
        let clock = ManualClock::shared(0);
        let mut sources = MediaSources::new(Plugins::new(), clock.clone(), 120_000, 5_000);
        sources
            .init(SourcesConfig {
                urls: vec![MediaSourceEntry::new("A", "http://a/video.mp4")],
                window_type,
                live_support: LiveSupport::Playable,
                ..SourcesConfig::default()
            })
            .unwrap();
        let (element, handle) = SimElement::new();
        let strategy = BasicStrategy::new(
            Box::new(element),
            &sources,
            MediaKind::Video,
            clock.clone(),
        );
        (strategy, sources, handle, clock)
    }

    fn element(strategy: &mut BasicStrategy, sources: &MediaSources, event: ElementEvent) {
        strategy.handle_host_event(sources, HostEvent::Device(DeviceEvent::Element(event)));
    }

    #[test]
    fn test_load_sets_start_time_and_autoplays() {
        let (mut strategy, sources, handle, _) = setup(WindowType::Static);
        strategy.load(&sources, "video/mp4", Some(30.0)).unwrap();

        assert_eq!(handle.loaded_url().as_deref(), Some("http://a/video.mp4"));
        assert_eq!(handle.commands(), vec!["seek 30".to_string(), "play".to_string()]);
    }

    #[test]
    fn test_zero_start_time_is_not_seeked() {
        let (mut strategy, sources, handle, _) = setup(WindowType::Static);
        strategy.load(&sources, "video/mp4", Some(0.0)).unwrap();
        assert_eq!(handle.commands(), vec!["play".to_string()]);
    }

    #[test]
    fn test_range_and_duration_need_metadata() {
        let (mut strategy, sources, handle, _) = setup(WindowType::Static);
        strategy.load(&sources, "video/mp4", None).unwrap();
        handle.set_duration(100.0);
        handle.set_seekable(Some(SeekableRange::new(0.0, 100.0)));

        assert_eq!(strategy.seekable_range(), Some(SeekableRange::new(0.0, 0.0)));
        assert_eq!(strategy.duration(), 0.0);

        element(&mut strategy, &sources, ElementEvent::LoadedMetadata);
        assert_eq!(strategy.seekable_range(), Some(SeekableRange::new(0.0, 100.0)));
        assert_eq!(strategy.duration(), 100.0);
    }

    #[test]
    fn test_seek_is_clamped_once_metadata_loaded() {
        let (mut strategy, sources, handle, _) = setup(WindowType::Static);
        strategy.load(&sources, "video/mp4", None).unwrap();
        handle.set_seekable(Some(SeekableRange::new(0.0, 100.0)));
        handle.clear_commands();

        strategy.set_current_time(500.0).unwrap();
        assert_eq!(handle.commands(), vec!["seek 500".to_string()]);

        element(&mut strategy, &sources, ElementEvent::LoadedMetadata);
        handle.clear_commands();
        strategy.set_current_time(500.0).unwrap();
        assert_eq!(handle.commands(), vec!["seek 98.9".to_string()]);
    }

    #[test]
    fn test_element_events_map_to_states() {
        let (mut strategy, sources, handle, _) = setup(WindowType::Static);
        strategy.load(&sources, "video/mp4", None).unwrap();

        element(&mut strategy, &sources, ElementEvent::Waiting);
        element(&mut strategy, &sources, ElementEvent::Playing);
        element(&mut strategy, &sources, ElementEvent::TimeUpdate);
        handle.set_error(Some(MediaError::new(3, "")));
        element(&mut strategy, &sources, ElementEvent::Error);
        element(&mut strategy, &sources, ElementEvent::Ended);

        assert_eq!(
            strategy.drain_events(),
            vec![
                StrategyEvent::State(MediaState::Waiting),
                StrategyEvent::State(MediaState::Playing),
                StrategyEvent::TimeUpdate,
                StrategyEvent::Error(MediaError::new(3, "unknown")),
                StrategyEvent::State(MediaState::Ended),
            ]
        );
        assert!(strategy.is_ended());
    }

    #[test]
    fn test_sliding_pause_auto_resumes() {
        let (mut strategy, sources, handle, clock) = setup(WindowType::Sliding);
        strategy.load(&sources, "video/mp4", None).unwrap();
        handle.set_seekable(Some(SeekableRange::new(0.0, 600.0)));
        handle.set_current_time(20.0);
        element(&mut strategy, &sources, ElementEvent::LoadedMetadata);

        strategy.pause(PauseOptions::default()).unwrap();
        assert_eq!(strategy.next_deadline(), Some(12_000));
        handle.clear_commands();

        drive_for(&mut strategy, &clock, 12_000);
        assert_eq!(handle.commands(), vec!["play".to_string()]);
        assert_eq!(strategy.pending_timers(), 0);
    }

    #[test]
    fn test_auto_resume_cancelled_by_playing() {
        let (mut strategy, sources, handle, _) = setup(WindowType::Sliding);
        strategy.load(&sources, "video/mp4", None).unwrap();
        handle.set_current_time(100.0);

        strategy.pause(PauseOptions::default()).unwrap();
        assert!(strategy.pending_timers() == 1);
        element(&mut strategy, &sources, ElementEvent::Playing);
        assert_eq!(strategy.pending_timers(), 0);
    }

    #[test]
    fn test_pause_without_auto_resume() {
        let (mut strategy, sources, _, _) = setup(WindowType::Sliding);
        strategy.load(&sources, "video/mp4", None).unwrap();
        strategy.pause(PauseOptions::no_auto_resume()).unwrap();
        assert_eq!(strategy.pending_timers(), 0);
    }

    #[test]
    fn test_tear_down_unloads_element() {
        let (mut strategy, sources, handle, _) = setup(WindowType::Static);
        strategy.load(&sources, "video/mp4", None).unwrap();
        strategy.tear_down();
        assert_eq!(handle.loaded_url(), None);
        assert!(handle.commands().contains(&"unload".to_string()));
    }
}
