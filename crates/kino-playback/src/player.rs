//! Player Session - the application facing playback API
//!
//! Coordinates:
//! - Media sources initialisation, waiting on the first manifest when needed
//! - Strategy construction and the player component that owns it
//! - Pause triggers, seeking and end-of-stream tracking
//! - Live window data and epoch/video time conversion
//! - State, time and ready notifications, queued and broadcast

use crate::clock::{Scheduled, SharedClock};
use crate::config::{PlaybackConfig, StrategyKind};
use crate::live;
use crate::manifest::ManifestData;
use crate::media_sources::{
    ManifestRequest, MediaSources, SourcesConfig, SourcesStep, SubtitlesSource,
};
use crate::player_component::{ComponentConfig, PlayerComponent, StateUpdate};
use crate::plugins::Plugins;
use crate::ready::ReadyHelper;
use crate::strategy::{create_strategy, HostEvent, StrategyHost, StrategyMedia};
use crate::time::convert_to_seekable_video_time;
use crate::types::*;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};

/// Distance from the live edge still counted as the end of the stream
pub const END_OF_STREAM_TOLERANCE_SECONDS: f64 = 10.0;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The media a session plays
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaDescription {
    pub kind: MediaKind,
    pub mime_type: String,
    /// Candidate sources, preferred first
    pub urls: Vec<MediaSourceEntry>,
    pub captions: Vec<SubtitlesSource>,
    pub is_uhd: bool,
}

/// Everything [`PlayerSession::init`] needs besides the engine
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionInit {
    pub media: MediaDescription,
    pub window_type: WindowType,
    /// Seconds for static windows, epoch milliseconds for live windows
    pub initial_playback_time: Option<f64>,
    /// Server time, epoch milliseconds
    pub server_date: Option<f64>,
    pub subtitles_enabled: bool,
}

/// Pause request from the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseRequest {
    /// False when the application paused on its own behalf
    pub user_pause: bool,
    pub disable_auto_resume: bool,
}

impl Default for PauseRequest {
    fn default() -> Self {
        Self {
            user_pause: true,
            disable_auto_resume: false,
        }
    }
}

/// A state change as the application sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub state: MediaState,
    /// Who paused, for PAUSED
    pub trigger: Option<PauseTrigger>,
    /// Whether the wait follows a seek, for WAITING
    pub is_seeking: Option<bool>,
    pub end_of_stream: bool,
    /// For FATAL_ERROR
    pub is_buffering_timeout_error: Option<bool>,
    pub error: Option<MediaError>,
}

/// Notifications of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChange(StateChange),
    TimeUpdate {
        current_time: Option<f64>,
        end_of_stream: bool,
    },
    /// First meaningful state or time
    Ready,
    /// Initialisation gave up
    InitFailed { code: String, message: String },
}

/// Window of a live session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveWindowData {
    pub window_start_time: Option<f64>,
    pub window_end_time: Option<f64>,
    pub initial_playback_time: Option<f64>,
    pub server_date: Option<f64>,
}

struct PendingInit {
    sources: MediaSources,
    host: StrategyHost,
    init: SessionInit,
}

enum Phase {
    Idle,
    Initialising(Box<PendingInit>),
    Active(Box<PlayerComponent>),
    Failed,
    TornDown,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Initialising(_) => "initialising",
            Phase::Active(_) => "active",
            Phase::Failed => "failed",
            Phase::TornDown => "torn_down",
        }
    }
}

/// Player session managing a single playback
pub struct PlayerSession {
    /// Unique session ID
    id: SessionId,
    config: PlaybackConfig,
    clock: SharedClock,
    plugins: Plugins,
    phase: Phase,
    window_type: WindowType,
    initial_playback_time: Option<f64>,
    server_date: Option<f64>,
    end_of_stream: bool,
    is_seeking: bool,
    pause_trigger: Option<PauseTrigger>,
    subtitles_enabled: bool,
    subtitles_available: bool,
    ready: Option<ReadyHelper>,
    events: VecDeque<SessionEvent>,
    events_tx: broadcast::Sender<SessionEvent>,
    manifest_requests: VecDeque<ManifestRequest>,
}

impl PlayerSession {
    /// Create an idle session
    pub fn new(config: PlaybackConfig, clock: SharedClock, plugins: Plugins) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id: SessionId::new(),
            config,
            clock,
            plugins,
            phase: Phase::Idle,
            window_type: WindowType::Static,
            initial_playback_time: None,
            server_date: None,
            end_of_stream: false,
            is_seeking: false,
            pause_trigger: None,
            subtitles_enabled: false,
            subtitles_available: false,
            ready: None,
            events: VecDeque::new(),
            events_tx,
            manifest_requests: VecDeque::new(),
        }
    }

    /// Get session ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn plugins(&self) -> &Plugins {
        &self.plugins
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events_tx.clone()
    }

    /// Start a session over `host`
    ///
    /// Live windows may first need their manifest: the session then waits for
    /// [`complete_manifest_load`](PlayerSession::complete_manifest_load).
    #[instrument(skip(self, init, host), fields(session = %self.id))]
    pub fn init(&mut self, init: SessionInit, host: StrategyHost) -> Result<()> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(Error::InvalidConfig(format!(
                "Session cannot be initialised while {}",
                self.phase.name()
            )));
        }
        self.config.validate()?;

        self.window_type = init.window_type;
        self.initial_playback_time = init.initial_playback_time;
        self.server_date = init.server_date;
        self.subtitles_enabled = init.subtitles_enabled;
        self.subtitles_available = !init.media.captions.is_empty();

        let timeouts = &self.config.timeouts;
        let mut sources = MediaSources::new(
            self.plugins.clone(),
            self.clock.clone(),
            timeouts.failover_reset_ms,
            timeouts.subtitles_request_ms,
        );
        let step = sources.init(SourcesConfig {
            urls: init.media.urls.clone(),
            captions: init.media.captions.clone(),
            window_type: init.window_type,
            live_support: self.config.effective_live_support(),
            initial_wallclock_time: init.server_date,
        })?;
        info!(
            window_type = %init.window_type,
            strategy = %self.config.strategy,
            "Initialising session"
        );

        self.advance_init(step, PendingInit { sources, host, init })
    }

    /// Hand back the outcome of a manifest load taken from [`take_manifest_requests`]
    ///
    /// [`take_manifest_requests`]: PlayerSession::take_manifest_requests
    #[instrument(skip(self, result), fields(session = %self.id))]
    pub fn complete_manifest_load(&mut self, generation: u64, result: Result<ManifestData>) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Initialising(mut pending) => {
                let step = pending.sources.complete_load(generation, result);
                if let Err(init_error) = self.advance_init(step, *pending) {
                    error!(error = %init_error, "Session initialisation failed");
                }
            }
            Phase::Active(mut component) => {
                component.complete_manifest_load(generation, result);
                self.phase = Phase::Active(component);
                self.collect();
            }
            phase => {
                debug!(generation, phase = phase.name(), "Ignoring manifest load");
                self.phase = phase;
            }
        }
    }

    /// Take every manifest load the session needs run
    pub fn take_manifest_requests(&mut self) -> Vec<ManifestRequest> {
        self.manifest_requests.drain(..).collect()
    }

    /// Take every event raised since the last call
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    /// Feed an engine or device event
    pub fn handle_host_event(&mut self, event: impl Into<HostEvent>) {
        if let Phase::Active(component) = &mut self.phase {
            component.handle_host_event(event.into());
            self.collect();
        }
    }

    #[instrument(skip(self), fields(session = %self.id))]
    pub fn play(&mut self) -> Result<()> {
        let result = self.component_mut()?.play();
        self.collect();
        result
    }

    #[instrument(skip(self), fields(session = %self.id))]
    pub fn pause(&mut self, request: PauseRequest) -> Result<()> {
        let trigger = if request.user_pause {
            PauseTrigger::User
        } else {
            PauseTrigger::App
        };
        let options = PauseOptions {
            disable_auto_resume: request.disable_auto_resume,
            trigger: Some(trigger),
        };
        let result = self.component_mut()?.pause(options);
        self.pause_trigger = Some(trigger);
        self.collect();
        result
    }

    /// Seek to `seconds`
    #[instrument(skip(self), fields(session = %self.id))]
    pub fn set_current_time(&mut self, seconds: f64) -> Result<()> {
        self.component_mut()?;
        self.is_seeking = true;
        let result = self.component_mut()?.set_current_time(seconds);
        self.collect();

        let range_end = self.seekable_range().map(|range| range.end);
        self.end_of_stream = self.window_type.is_live()
            && range_end.is_some_and(|end| (end - seconds).abs() < END_OF_STREAM_TOLERANCE_SECONDS);
        result
    }

    pub fn set_playback_rate(&mut self, rate: f64) -> Result<()> {
        self.component_mut()?.set_playback_rate(rate);
        Ok(())
    }

    pub fn playback_rate(&self) -> Option<f64> {
        self.component().map(|component| component.playback_rate())
    }

    pub fn current_time(&self) -> Option<f64> {
        self.component().and_then(|component| component.current_time())
    }

    pub fn seekable_range(&self) -> Option<SeekableRange> {
        self.component().and_then(|component| component.seekable_range())
    }

    pub fn duration(&self) -> Option<f64> {
        self.component().map(|component| component.duration())
    }

    pub fn is_paused(&self) -> bool {
        self.component().is_some_and(|component| component.is_paused())
    }

    pub fn is_ended(&self) -> bool {
        self.component().is_some_and(|component| component.is_ended())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.as_ref().is_some_and(ReadyHelper::is_ready)
    }

    pub fn is_initialised(&self) -> bool {
        matches!(self.phase, Phase::Active(_))
    }

    pub fn window_type(&self) -> WindowType {
        self.window_type
    }

    pub fn current_cdn(&self) -> Option<&str> {
        self.component().and_then(|component| component.sources().current_cdn())
    }

    pub fn is_live_curtain_visible(&self) -> bool {
        self.component().is_some_and(|component| component.is_live_curtain_visible())
    }

    /// True when a live session plays within the end-of-stream tolerance of the edge
    pub fn is_playing_at_live_edge(&self) -> bool {
        if !self.window_type.is_live() {
            return false;
        }
        match (self.current_time(), self.seekable_range()) {
            (Some(time), Some(range)) => (range.end - time).abs() < END_OF_STREAM_TOLERANCE_SECONDS,
            _ => false,
        }
    }

    /// Window of a live session, `None` for static content
    pub fn live_window_data(&self) -> Option<LiveWindowData> {
        if !self.window_type.is_live() {
            return None;
        }
        Some(LiveWindowData {
            window_start_time: self.window_start_time(),
            window_end_time: self.window_end_time(),
            initial_playback_time: self.initial_playback_time,
            server_date: self.server_date,
        })
    }

    /// Epoch milliseconds of a video time, when the window start is known
    pub fn convert_video_time_seconds_to_epoch_ms(&self, seconds: f64) -> Option<f64> {
        self.window_start_time().map(|start| start + seconds * 1000.0)
    }

    /// Whole video seconds of an epoch time, when the window start is known
    pub fn convert_epoch_ms_to_video_time_seconds(&self, epoch_ms: f64) -> Option<f64> {
        self.window_start_time()
            .map(|start| ((epoch_ms - start) / 1000.0).floor())
    }

    pub fn can_seek(&self) -> bool {
        if !self.window_type.is_live() {
            return true;
        }
        live::can_seek(
            self.window_start_time(),
            self.window_end_time(),
            self.config.effective_live_support(),
            self.strategy_kind(),
            self.seekable_range(),
        )
    }

    pub fn can_pause(&self) -> bool {
        if !self.window_type.is_live() {
            return true;
        }
        live::can_pause(
            self.window_start_time(),
            self.window_end_time(),
            self.config.effective_live_support(),
        )
    }

    pub fn set_subtitles_enabled(&mut self, enabled: bool) {
        self.subtitles_enabled = enabled;
        if !self.subtitles_available {
            return;
        }
        if let Phase::Active(component) = &mut self.phase {
            component.set_subtitles(enabled);
        }
    }

    pub fn is_subtitles_enabled(&self) -> bool {
        self.subtitles_enabled
    }

    pub fn is_subtitles_available(&self) -> bool {
        self.subtitles_available
    }

    /// Report a subtitles load failure; false once no subtitles source is left
    pub fn report_subtitles_error(&mut self, status_code: Option<u16>) -> bool {
        let has_alternative = match &mut self.phase {
            Phase::Active(component) => component.failover_subtitles(status_code),
            _ => false,
        };
        if !has_alternative {
            self.subtitles_available = false;
        }
        has_alternative
    }

    /// Release the session; nothing is published afterwards
    #[instrument(skip(self), fields(session = %self.id))]
    pub fn tear_down(&mut self) {
        if let Phase::Active(component) = &mut self.phase {
            component.tear_down();
        }
        info!("Session torn down");
        self.phase = Phase::TornDown;
        self.ready = None;
        self.pause_trigger = None;
        self.is_seeking = false;
        self.manifest_requests.clear();
    }

    fn component(&self) -> Option<&PlayerComponent> {
        match &self.phase {
            Phase::Active(component) => Some(component),
            _ => None,
        }
    }

    fn component_mut(&mut self) -> Result<&mut PlayerComponent> {
        match &mut self.phase {
            Phase::Active(component) => Ok(component),
            Phase::TornDown => Err(Error::TornDown),
            _ => Err(Error::NotInitialised),
        }
    }

    fn strategy_kind(&self) -> StrategyKind {
        self.component()
            .map_or(self.config.strategy, PlayerComponent::strategy_kind)
    }

    fn window_start_time(&self) -> Option<f64> {
        self.component().and_then(PlayerComponent::window_start_time)
    }

    fn window_end_time(&self) -> Option<f64> {
        self.component().and_then(PlayerComponent::window_end_time)
    }

    fn advance_init(&mut self, step: SourcesStep, pending: PendingInit) -> Result<()> {
        match step {
            SourcesStep::Ready(_) => self.start(pending),
            SourcesStep::Load(request) => {
                debug!(url = %request.url, generation = request.generation, "Waiting for manifest");
                self.manifest_requests.push_back(request);
                self.phase = Phase::Initialising(Box::new(pending));
                Ok(())
            }
            SourcesStep::Stale => {
                self.phase = Phase::Initialising(Box::new(pending));
                Ok(())
            }
            SourcesStep::Failed { .. } => {
                self.fail_init(Error::ManifestFetch("no source left to load".into()));
                Err(Error::NoSources)
            }
        }
    }

    fn start(&mut self, pending: PendingInit) -> Result<()> {
        let PendingInit { sources, host, init } = pending;
        let live = self.window_type.is_live();
        let window_start = sources.time().window_start_time;
        let initial = if live {
            init.initial_playback_time
                .and_then(|epoch_ms| {
                    window_start.map(|start| convert_to_seekable_video_time(epoch_ms, start))
                })
        } else {
            init.initial_playback_time
        };
        self.end_of_stream = live && init.initial_playback_time.is_none();

        let media = StrategyMedia {
            kind: init.media.kind,
            is_uhd: init.media.is_uhd,
        };
        let strategy = match create_strategy(
            &self.config,
            host,
            &sources,
            media,
            self.plugins.clone(),
            self.clock.clone(),
        ) {
            Ok(strategy) => strategy,
            Err(setup_error) => {
                let message = setup_error.to_string();
                self.fail_init(setup_error);
                return Err(Error::DeviceSetup(message));
            }
        };

        let live_support = self.config.effective_live_support();
        let mut component = PlayerComponent::new(
            strategy,
            sources,
            self.plugins.clone(),
            self.clock.clone(),
            ComponentConfig {
                mime_type: init.media.mime_type,
                live_support,
                timeouts: self.config.timeouts.clone(),
            },
        );
        if self.subtitles_available {
            component.set_subtitles(self.subtitles_enabled);
        }
        self.ready = Some(ReadyHelper::new(initial, self.window_type, live_support));

        let result = component.load(initial);
        self.phase = Phase::Active(Box::new(component));
        info!(?initial, end_of_stream = self.end_of_stream, "Session started");
        self.collect();
        result
    }

    fn fail_init(&mut self, init_error: Error) {
        error!(error = %init_error, "Session could not start");
        self.phase = Phase::Failed;
        self.emit(SessionEvent::InitFailed {
            code: init_error.error_code().to_string(),
            message: init_error.to_string(),
        });
    }

    fn collect(&mut self) {
        let Phase::Active(component) = &mut self.phase else {
            return;
        };
        let updates = component.take_updates();
        self.manifest_requests.extend(component.take_manifest_requests());
        for update in updates {
            self.on_state_update(update);
        }
    }

    fn on_state_update(&mut self, update: StateUpdate) {
        if update.time_update {
            self.emit(SessionEvent::TimeUpdate {
                current_time: update.current_time,
                end_of_stream: self.end_of_stream,
            });
        } else if let Some(state) = update.state {
            let mut change = StateChange {
                state,
                trigger: None,
                is_seeking: None,
                end_of_stream: false,
                is_buffering_timeout_error: None,
                error: None,
            };
            match state {
                MediaState::Paused => {
                    self.end_of_stream = false;
                    let trigger = self.pause_trigger.take().unwrap_or(PauseTrigger::Device);
                    change.trigger = Some(trigger);
                }
                MediaState::Waiting => {
                    change.is_seeking = Some(self.is_seeking);
                    self.is_seeking = false;
                }
                MediaState::FatalError => {
                    change.is_buffering_timeout_error = Some(update.is_buffering_timeout_error);
                    change.error = update.error.clone();
                }
                _ => {}
            }
            change.end_of_stream = self.end_of_stream;
            self.emit(SessionEvent::StateChange(change));
        }

        let became_ready = self.ready.as_mut().is_some_and(|ready| ready.observe(&update));
        if became_ready {
            info!("Session ready");
            self.emit(SessionEvent::Ready);
        }
    }

    fn emit(&mut self, event: SessionEvent) {
        if self.events_tx.receiver_count() > 0 {
            // lagging receivers are told by the channel itself
            let _ = self.events_tx.send(event.clone());
        }
        self.events.push_back(event);
    }
}

impl Scheduled for PlayerSession {
    fn next_deadline(&self) -> Option<u64> {
        self.component().and_then(|component| component.next_deadline())
    }

    fn poll_timers(&mut self) {
        if let Phase::Active(component) = &mut self.phase {
            component.poll_timers();
            self.collect();
        }
    }

    fn pending_timers(&self) -> usize {
        self.component().map_or(0, |component| component.pending_timers())
    }
}

impl std::fmt::Debug for PlayerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerSession")
            .field("id", &self.id)
            .field("phase", &self.phase.name())
            .field("window_type", &self.window_type)
            .field("end_of_stream", &self.end_of_stream)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::manifest::TimeData;
    use crate::media_player::{DeviceEvent, DeviceHost, ElementEvent};
    use crate::sim::{ElementHandle, SimElement};

    fn basic_config() -> PlaybackConfig {
        PlaybackConfig {
            strategy: StrategyKind::Basic,
            ..PlaybackConfig::default()
        }
    }

    fn media(urls: &[&str]) -> MediaDescription {
        MediaDescription {
            kind: MediaKind::Video,
            mime_type: "video/mp4".into(),
            urls: urls
                .iter()
                .enumerate()
                .map(|(index, url)| MediaSourceEntry::new(format!("cdn{index}"), *url))
                .collect(),
            captions: Vec::new(),
            is_uhd: false,
        }
    }

    fn session(init: SessionInit) -> (PlayerSession, ElementHandle) {
        let clock = ManualClock::shared(0);
        let mut session = PlayerSession::new(basic_config(), clock, Plugins::new());
        let (element, handle) = SimElement::new();
        session
            .init(init, StrategyHost::Device(DeviceHost::Element(Box::new(element))))
            .unwrap();
        (session, handle)
    }

    fn static_session() -> (PlayerSession, ElementHandle) {
        session(SessionInit {
            media: media(&["http://a/video.mp4"]),
            ..SessionInit::default()
        })
    }

    fn live_init(initial_playback_time: Option<f64>) -> SessionInit {
        SessionInit {
            media: media(&["http://a/live.m3u8"]),
            window_type: WindowType::Sliding,
            initial_playback_time,
            ..SessionInit::default()
        }
    }

    fn live_manifest() -> ManifestData {
        ManifestData::new(
            TimeData {
                window_start_time: Some(1_000_000.0),
                window_end_time: Some(8_200_000.0),
                ..TimeData::default()
            },
            TransferFormat::Hls,
        )
    }

    fn state_changes(session: &mut PlayerSession) -> Vec<StateChange> {
        session
            .take_events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::StateChange(change) => Some(change),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_static_session_plays_and_becomes_ready() {
        let (mut session, handle) = static_session();
        assert!(session.is_initialised());
        assert_eq!(handle.loaded_url().as_deref(), Some("http://a/video.mp4"));

        session.handle_host_event(DeviceEvent::Element(ElementEvent::Playing));
        let events = session.take_events();
        assert!(matches!(
            &events[0],
            SessionEvent::StateChange(change)
                if change.state == MediaState::Playing && !change.end_of_stream
        ));
        assert_eq!(events[1], SessionEvent::Ready);
        assert!(session.is_ready());
    }

    #[test]
    fn test_pause_triggers() {
        let (mut session, handle) = static_session();
        session
            .pause(PauseRequest {
                user_pause: false,
                disable_auto_resume: false,
            })
            .unwrap();
        assert!(handle.is_paused());
        session.handle_host_event(DeviceEvent::Element(ElementEvent::Pause));
        session.handle_host_event(DeviceEvent::Element(ElementEvent::Pause));

        let triggers: Vec<_> = state_changes(&mut session)
            .into_iter()
            .map(|change| change.trigger)
            .collect();
        assert_eq!(triggers, vec![Some(PauseTrigger::App), Some(PauseTrigger::Device)]);
        assert_eq!(PauseTrigger::App.code(), 2);
    }

    #[test]
    fn test_waiting_after_seek_is_flagged() {
        let (mut session, handle) = static_session();
        session.set_current_time(10.0).unwrap();
        assert_eq!(handle.current_time(), 10.0);

        session.handle_host_event(DeviceEvent::Element(ElementEvent::Waiting));
        session.handle_host_event(DeviceEvent::Element(ElementEvent::Waiting));
        let seeking: Vec<_> = state_changes(&mut session)
            .into_iter()
            .map(|change| change.is_seeking)
            .collect();
        assert_eq!(seeking, vec![Some(true), Some(false)]);
    }

    #[test]
    fn test_live_session_waits_for_manifest() {
        let (mut session, handle) = session(live_init(Some(1_060_000.0)));
        assert!(!session.is_initialised());
        assert!(handle.loaded_url().is_none());

        let requests = session.take_manifest_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "http://a/live.m3u8");

        session.complete_manifest_load(requests[0].generation, Ok(live_manifest()));
        assert!(session.is_initialised());
        assert_eq!(handle.commands(), vec!["seek 60".to_string(), "play".to_string()]);
    }

    #[test]
    fn test_live_window_data_and_conversions() {
        let (mut session, _) = session(live_init(None));
        let requests = session.take_manifest_requests();
        session.complete_manifest_load(requests[0].generation, Ok(live_manifest()));

        let data = session.live_window_data().unwrap();
        assert_eq!(data.window_start_time, Some(1_000_000.0));
        assert_eq!(data.window_end_time, Some(8_200_000.0));
        assert_eq!(session.convert_epoch_ms_to_video_time_seconds(1_030_500.0), Some(30.0));
        assert_eq!(session.convert_video_time_seconds_to_epoch_ms(10.0), Some(1_010_000.0));
        assert!(session.can_seek());
        assert!(session.can_pause());
    }

    #[test]
    fn test_live_edge_and_end_of_stream() {
        let (mut session, handle) = session(live_init(None));
        let requests = session.take_manifest_requests();
        session.complete_manifest_load(requests[0].generation, Ok(live_manifest()));

        handle.set_seekable(Some(SeekableRange::new(0.0, 600.0)));
        handle.set_current_time(595.0);
        session.handle_host_event(DeviceEvent::Element(ElementEvent::LoadedMetadata));
        assert!(session.is_playing_at_live_edge());

        session.handle_host_event(DeviceEvent::Element(ElementEvent::Playing));
        assert!(state_changes(&mut session)[0].end_of_stream);

        session.set_current_time(100.0).unwrap();
        session.handle_host_event(DeviceEvent::Element(ElementEvent::Playing));
        assert!(!state_changes(&mut session)[0].end_of_stream);
        assert!(!session.is_playing_at_live_edge());
    }

    #[test]
    fn test_manifest_failure_fails_init() {
        let (mut session, _) = session(live_init(None));
        let requests = session.take_manifest_requests();
        session.complete_manifest_load(
            requests[0].generation,
            Err(Error::ManifestFetch("404".into())),
        );

        assert!(matches!(
            session.take_events().last(),
            Some(SessionEvent::InitFailed { code, .. }) if code == "MANIFEST_FETCH"
        ));
        assert!(matches!(session.play(), Err(Error::NotInitialised)));
    }

    #[test]
    fn test_static_session_can_always_seek() {
        let (session, _) = static_session();
        assert!(session.can_seek());
        assert!(session.can_pause());
        assert!(session.live_window_data().is_none());
        assert_eq!(session.convert_video_time_seconds_to_epoch_ms(10.0), None);
    }

    #[test]
    fn test_commands_before_init_are_rejected() {
        let mut session = PlayerSession::new(
            basic_config(),
            ManualClock::shared(0),
            Plugins::new(),
        );
        assert!(matches!(session.play(), Err(Error::NotInitialised)));
        assert_eq!(session.current_time(), None);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let (mut session, _) = static_session();
        let mut events = session.subscribe();
        session.handle_host_event(DeviceEvent::Element(ElementEvent::Waiting));

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            SessionEvent::StateChange(change) if change.state == MediaState::Waiting
        ));
    }

    #[test]
    fn test_tear_down_releases_everything() {
        let (mut session, handle) = static_session();
        session.handle_host_event(DeviceEvent::Element(ElementEvent::Waiting));
        assert_eq!(session.pending_timers(), 1);
        session.take_events();

        session.tear_down();
        assert_eq!(session.pending_timers(), 0);
        assert!(handle.loaded_url().is_none());
        assert!(matches!(session.play(), Err(Error::TornDown)));

        session.handle_host_event(DeviceEvent::Element(ElementEvent::Playing));
        assert!(session.take_events().is_empty());
    }

    #[test]
    fn test_session_event_serialization() {
        let json = serde_json::to_value(SessionEvent::TimeUpdate {
            current_time: Some(1.5),
            end_of_stream: false,
        })
        .unwrap();
        assert_eq!(json["event"], "time_update");
        assert_eq!(json["current_time"], 1.5);
    }
}
