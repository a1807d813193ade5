//! Player component - owns the strategy of one playback session
//!
//! Coordinates:
//! - Strategy events into application facing state updates
//! - Buffering and fatal error timeouts
//! - CDN failover, tearing the media down and loading it again at the
//!   tracked position on the new source
//! - Restarting native HLS live streams that cannot seek in place
//!
//! Like the strategies, the component never performs IO: state updates and
//! manifest loads are queued for the owner to take.

use crate::clock::{Scheduled, SharedClock, Timeout};
use crate::config::{StrategyKind, Timeouts};
use crate::manifest::ManifestData;
use crate::media_sources::{FailoverParams, LoadPurpose, ManifestRequest, MediaSources, SourcesStep};
use crate::plugins::{PluginData, PluginEvent, PluginStatus, Plugins, StateType};
use crate::strategy::{HostEvent, Strategy, StrategyEvent};
use crate::{
    error_codes, Error, LiveSupport, MediaError, MediaState, PauseOptions, Result, SeekableRange,
    TransferFormat, WindowType,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, error, info, instrument, warn};

/// A restart closer than this to the live edge starts at the live point
const LIVE_EDGE_RESTART_MARGIN_SECONDS: f64 = 30.0;

/// Snapshot published to the host application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// `None` for time updates
    pub state: Option<MediaState>,
    pub current_time: Option<f64>,
    pub seekable_range: Option<SeekableRange>,
    pub duration: f64,
    pub time_update: bool,
    pub is_buffering_timeout_error: bool,
    pub error: Option<MediaError>,
}

/// Settings the component needs besides its collaborators
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentConfig {
    pub mime_type: String,
    pub live_support: LiveSupport,
    pub timeouts: Timeouts,
}

/// Work to resume once the media sources are ready again
#[derive(Debug, Clone, PartialEq)]
enum FollowUp {
    /// Failover asked for by the strategy itself
    StrategyFailover {
        reload: bool,
        on_failure: Option<MediaError>,
    },
    /// Failover after a buffering timeout or a fatal error
    CdnFailover {
        time: Option<f64>,
        old_window_start: Option<f64>,
        error: MediaError,
        buffering_timeout: bool,
    },
    /// Live restart at `time` after a manifest refresh
    Restart {
        time: f64,
        original_window_start: Option<f64>,
    },
}

pub struct PlayerComponent {
    strategy: Box<dyn Strategy>,
    sources: MediaSources,
    plugins: Plugins,
    clock: SharedClock,
    config: ComponentConfig,
    is_initial_play: bool,
    fatal_error: bool,
    fatal_error_cause: Option<MediaError>,
    buffering_timeout: Timeout,
    fatal_error_timeout: Timeout,
    pending: Option<FollowUp>,
    live_curtain_visible: bool,
    updates: VecDeque<StateUpdate>,
    manifest_requests: VecDeque<ManifestRequest>,
    torn_down: bool,
}

impl PlayerComponent {
    /// Take ownership of an initialised `sources` and the strategy built over them
    pub fn new(
        strategy: Box<dyn Strategy>,
        sources: MediaSources,
        plugins: Plugins,
        clock: SharedClock,
        config: ComponentConfig,
    ) -> Self {
        Self {
            strategy,
            sources,
            plugins,
            clock,
            config,
            is_initial_play: true,
            fatal_error: false,
            fatal_error_cause: None,
            buffering_timeout: Timeout::new(),
            fatal_error_timeout: Timeout::new(),
            pending: None,
            live_curtain_visible: false,
            updates: VecDeque::new(),
            manifest_requests: VecDeque::new(),
            torn_down: false,
        }
    }

    /// Load the current source; `None` starts at the live point
    #[instrument(skip(self))]
    pub fn load(&mut self, start_time: Option<f64>) -> Result<()> {
        self.ensure_active()?;
        self.load_media(start_time, false);
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn play(&mut self) -> Result<()> {
        self.ensure_active()?;
        let result = self.strategy.play();
        self.pump();
        result
    }

    /// Pause if the strategy allows it; growing windows never auto-resume
    #[instrument(skip(self))]
    pub fn pause(&mut self, options: PauseOptions) -> Result<()> {
        self.ensure_active()?;
        self.pause_media(options)
    }

    /// Seek if the strategy allows it
    #[instrument(skip(self))]
    pub fn set_current_time(&mut self, seconds: f64) -> Result<()> {
        self.ensure_active()?;
        if !self.strategy.transitions().can_begin_seek {
            debug!("Seek ignored in the current state");
            return Ok(());
        }
        if self.is_native_hls_restartable() {
            self.restart_at(seconds);
            return Ok(());
        }
        let result = self.strategy.set_current_time(seconds);
        self.pump();
        result
    }

    pub fn set_playback_rate(&mut self, rate: f64) {
        self.strategy.set_playback_rate(rate);
    }

    pub fn playback_rate(&self) -> f64 {
        self.strategy.playback_rate()
    }

    pub fn set_subtitles(&mut self, enabled: bool) {
        self.strategy.set_subtitles(enabled);
    }

    pub fn is_paused(&self) -> bool {
        self.strategy.is_paused()
    }

    pub fn is_ended(&self) -> bool {
        self.strategy.is_ended()
    }

    pub fn current_time(&self) -> Option<f64> {
        self.strategy.current_time()
    }

    pub fn seekable_range(&self) -> Option<SeekableRange> {
        self.strategy.seekable_range()
    }

    pub fn duration(&self) -> f64 {
        self.strategy.duration()
    }

    pub fn window_type(&self) -> WindowType {
        self.sources.window_type()
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Epoch milliseconds of the start of the live window
    pub fn window_start_time(&self) -> Option<f64> {
        self.sources.time().window_start_time
    }

    /// Epoch milliseconds of the end of the live window
    pub fn window_end_time(&self) -> Option<f64> {
        self.sources.time().window_end_time
    }

    pub fn is_live_curtain_visible(&self) -> bool {
        self.live_curtain_visible
    }

    pub fn sources(&self) -> &MediaSources {
        &self.sources
    }

    /// Move subtitles to their next source; false when none is left
    pub fn failover_subtitles(&mut self, status_code: Option<u16>) -> bool {
        self.sources.failover_subtitles(status_code)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Feed an engine or device event to the strategy
    #[instrument(skip(self))]
    pub fn handle_host_event(&mut self, event: HostEvent) {
        if self.torn_down {
            debug!("Ignoring event after tear down");
            return;
        }
        self.strategy.handle_host_event(&self.sources, event);
        self.pump();
    }

    /// Hand back the outcome of a manifest load taken from [`take_manifest_requests`]
    ///
    /// [`take_manifest_requests`]: PlayerComponent::take_manifest_requests
    #[instrument(skip(self, result))]
    pub fn complete_manifest_load(&mut self, generation: u64, result: Result<ManifestData>) {
        if self.torn_down {
            debug!(generation, "Ignoring manifest load after tear down");
            return;
        }
        let step = self.sources.complete_load(generation, result);
        if step == SourcesStep::Stale {
            return;
        }
        match self.pending.take() {
            Some(follow_up) => self.handle_step(step, follow_up),
            None => debug!(?step, "Manifest load completed with nothing waiting"),
        }
    }

    /// Take every state update published since the last call
    pub fn take_updates(&mut self) -> Vec<StateUpdate> {
        self.updates.drain(..).collect()
    }

    /// Take every manifest load the component needs run
    pub fn take_manifest_requests(&mut self) -> Vec<ManifestRequest> {
        self.manifest_requests.drain(..).collect()
    }

    /// Release the strategy, the sources and every timer
    #[instrument(skip(self))]
    pub fn tear_down(&mut self) {
        if self.torn_down {
            return;
        }
        info!("Tearing down player component");
        self.clear_timeouts();
        self.strategy.tear_down();
        self.sources.tear_down();
        self.pending = None;
        self.manifest_requests.clear();
        self.live_curtain_visible = false;
        self.torn_down = true;
    }

    fn ensure_active(&self) -> Result<()> {
        if self.torn_down {
            Err(Error::TornDown)
        } else {
            Ok(())
        }
    }

    fn is_native_hls_restartable(&self) -> bool {
        self.strategy.kind() == StrategyKind::Native
            && self.sources.transfer_format() == Some(TransferFormat::Hls)
            && self.config.live_support == LiveSupport::Restartable
            && self.sources.window_type().is_live()
    }

    fn pause_media(&mut self, options: PauseOptions) -> Result<()> {
        if !self.strategy.transitions().can_be_paused {
            debug!("Pause ignored in the current state");
            return Ok(());
        }
        let options = PauseOptions {
            disable_auto_resume: self.sources.window_type() == WindowType::Growing
                || options.disable_auto_resume,
            trigger: options.trigger,
        };
        let result = self.strategy.pause(options);
        self.pump();
        result
    }

    fn load_media(&mut self, start_time: Option<f64>, then_pause: bool) {
        debug!(?start_time, then_pause, "Loading media");
        if let Err(error) = self.strategy.load(&self.sources, &self.config.mime_type, start_time) {
            warn!(%error, "Strategy rejected load");
        }
        self.pump();
        if then_pause {
            if let Err(error) = self.pause_media(PauseOptions::default()) {
                warn!(%error, "Pause after load rejected");
            }
        }
    }

    fn tear_down_media_element(&mut self) {
        self.clear_timeouts();
        self.strategy.reset();
        // whatever the released media still had to say is stale now
        self.strategy.drain_events();
    }

    fn restart_at(&mut self, seconds: f64) {
        info!(seconds, "Restarting live stream from a refreshed manifest");
        let follow_up = FollowUp::Restart {
            time: seconds,
            original_window_start: self.window_start_time(),
        };
        let step = self.sources.refresh(LoadPurpose::Refresh);
        self.handle_step(step, follow_up);
    }

    fn pump(&mut self) {
        loop {
            let events = self.strategy.drain_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                if self.torn_down {
                    return;
                }
                self.handle_strategy_event(event);
            }
        }
    }

    fn handle_strategy_event(&mut self, event: StrategyEvent) {
        match event {
            StrategyEvent::State(MediaState::Playing) => self.on_playing(),
            StrategyEvent::State(MediaState::Paused) => self.on_paused(),
            StrategyEvent::State(MediaState::Waiting) => self.on_buffering(),
            StrategyEvent::State(MediaState::Ended) => self.on_ended(),
            StrategyEvent::State(state) => self.publish(Some(state)),
            StrategyEvent::TimeUpdate => self.publish_time_update(),
            StrategyEvent::Error(media_error) => self.on_error(media_error),
            StrategyEvent::Failover {
                params,
                reload,
                on_failure,
            } => {
                let step = self.sources.failover(&params, LoadPurpose::Failover);
                self.handle_step(step, FollowUp::StrategyFailover { reload, on_failure });
            }
            StrategyEvent::LiveCurtain { visible } => {
                debug!(visible, "Live curtain");
                self.live_curtain_visible = visible;
            }
        }
    }

    fn on_playing(&mut self) {
        self.clear_timeouts();
        self.publish(Some(MediaState::Playing));
        self.is_initial_play = false;
    }

    fn on_paused(&mut self) {
        self.publish(Some(MediaState::Paused));
        self.clear_timeouts();
    }

    fn on_buffering(&mut self) {
        self.publish(Some(MediaState::Waiting));
        self.start_buffering_timeout();
        self.error_cleared();
        self.buffering_raised();
    }

    fn on_ended(&mut self) {
        self.clear_timeouts();
        self.publish(Some(MediaState::Ended));
    }

    fn on_error(&mut self, media_error: MediaError) {
        self.buffering_cleared();
        self.raise_error(media_error);
    }

    fn start_buffering_timeout(&mut self) {
        let delay = if self.is_initial_play {
            self.config.timeouts.initial_buffering_ms
        } else {
            self.config.timeouts.buffering_ms
        };
        debug!(delay, "Buffering timeout started");
        self.buffering_timeout.start(self.clock.now_ms(), delay);
    }

    fn raise_error(&mut self, media_error: MediaError) {
        warn!(code = media_error.code, message = %media_error.message, "Playback error raised");
        self.buffering_timeout.cancel();
        self.publish(Some(MediaState::Waiting));
        let data = PluginData::new(PluginStatus::Started, StateType::Error, self.clock.now_ms())
            .with_buffering_timeout(false)
            .with_error(media_error.code, media_error.message.clone());
        self.plugins.notify(PluginEvent::Error(data));

        if !self.fatal_error_timeout.is_pending() && !self.fatal_error {
            self.fatal_error_cause = Some(media_error);
            self.fatal_error_timeout
                .start(self.clock.now_ms(), self.config.timeouts.fatal_error_ms);
        }
    }

    fn on_buffering_timeout(&mut self) {
        warn!("Buffering did not clear in time");
        self.buffering_cleared();
        self.attempt_cdn_failover(MediaError::new(
            error_codes::BUFFERING_TIMEOUT,
            error_codes::BUFFERING_TIMEOUT_MESSAGE,
        ));
    }

    fn on_fatal_error_timeout(&mut self) {
        self.fatal_error = true;
        let media_error = self.fatal_error_cause.take().unwrap_or_default();
        warn!(code = media_error.code, "Error was not recovered in time");
        self.attempt_cdn_failover(media_error);
    }

    fn attempt_cdn_failover(&mut self, media_error: MediaError) {
        let time = self.current_time();
        let buffering_timeout = media_error.code == error_codes::BUFFERING_TIMEOUT;
        let params = FailoverParams::new(buffering_timeout)
            .with_position(time, Some(self.duration()))
            .with_error(media_error.code, media_error.message.clone());
        let follow_up = FollowUp::CdnFailover {
            time,
            old_window_start: self.window_start_time(),
            error: media_error,
            buffering_timeout,
        };
        let step = self.sources.failover(&params, LoadPurpose::Failover);
        self.handle_step(step, follow_up);
    }

    fn handle_step(&mut self, step: SourcesStep, follow_up: FollowUp) {
        match step {
            SourcesStep::Ready(purpose) => {
                debug!(%purpose, "Media sources ready");
                self.resume(follow_up);
            }
            SourcesStep::Failed { purpose, .. } => {
                debug!(%purpose, "Media sources gave up");
                self.abandon(follow_up);
            }
            SourcesStep::Load(request) => {
                if let Some(previous) = self.pending.replace(follow_up) {
                    warn!(?previous, "Pending source work superseded");
                }
                self.manifest_requests.push_back(request);
            }
            SourcesStep::Stale => debug!("Ignoring stale media sources step"),
        }
    }

    fn resume(&mut self, follow_up: FollowUp) {
        match follow_up {
            FollowUp::StrategyFailover { reload, .. } => {
                if reload {
                    if let Err(error) = self.strategy.load(
                        &self.sources,
                        &self.config.mime_type,
                        None,
                    ) {
                        warn!(%error, "Strategy rejected reload");
                    }
                    self.pump();
                }
            }
            FollowUp::CdnFailover {
                time, old_window_start, ..
            } => {
                let then_pause = self.is_paused();
                let offset = window_offset_seconds(old_window_start, self.window_start_time());
                let failover_time = time.map(|time| time - offset);
                info!(
                    ?failover_time,
                    cdn = ?self.sources.current_cdn(),
                    "Reloading media after failover"
                );
                self.tear_down_media_element();
                self.load_media(failover_time, then_pause);
            }
            FollowUp::Restart {
                time,
                original_window_start,
            } => {
                let offset = window_offset_seconds(original_window_start, self.window_start_time());
                let range = self.seekable_range().unwrap_or_default();
                let mut seek_to = Some(time - offset);
                let mut then_pause = self.is_paused();
                self.tear_down_media_element();
                let restart_limit = range.end - range.start - LIVE_EDGE_RESTART_MARGIN_SECONDS;
                if seek_to.is_some_and(|seek_to| seek_to > restart_limit) {
                    seek_to = None;
                    then_pause = false;
                }
                self.load_media(seek_to, then_pause);
            }
        }
    }

    fn abandon(&mut self, follow_up: FollowUp) {
        match follow_up {
            FollowUp::StrategyFailover { on_failure, .. } => {
                if let Some(media_error) = on_failure {
                    self.on_error(media_error);
                }
            }
            FollowUp::CdnFailover {
                error: media_error,
                buffering_timeout,
                ..
            } => self.bubble_fatal_error(buffering_timeout, media_error),
            FollowUp::Restart { .. } => {
                self.tear_down_media_element();
                self.bubble_fatal_error(
                    false,
                    MediaError::new(error_codes::MANIFEST_LOAD, error_codes::MANIFEST_LOAD_MESSAGE),
                );
            }
        }
    }

    fn bubble_fatal_error(&mut self, buffering_timeout: bool, media_error: MediaError) {
        error!(
            code = media_error.code,
            message = %media_error.message,
            buffering_timeout,
            "Fatal playback error"
        );
        let data = PluginData::new(PluginStatus::Fatal, StateType::Error, self.clock.now_ms())
            .with_buffering_timeout(buffering_timeout)
            .with_error(media_error.code, media_error.message.clone());
        self.plugins.notify(PluginEvent::FatalError(data));

        let mut update = self.snapshot(Some(MediaState::FatalError));
        update.is_buffering_timeout_error = buffering_timeout;
        let reportable = media_error.code > -1 && !media_error.message.is_empty();
        update.error = reportable.then_some(media_error);
        self.push_update(update);
    }

    fn clear_timeouts(&mut self) {
        self.buffering_timeout.cancel();
        self.fatal_error_timeout.cancel();
        self.fatal_error = false;
        self.fatal_error_cause = None;
        self.buffering_cleared();
        self.error_cleared();
    }

    fn buffering_raised(&self) {
        let data = PluginData::new(PluginStatus::Started, StateType::Buffering, self.clock.now_ms())
            .with_initial_play(self.is_initial_play);
        self.plugins.notify(PluginEvent::Buffering(data));
    }

    fn buffering_cleared(&self) {
        let data = PluginData::new(
            PluginStatus::Dismissed,
            StateType::Buffering,
            self.clock.now_ms(),
        )
            .with_initial_play(self.is_initial_play);
        self.plugins.notify(PluginEvent::BufferingCleared(data));
    }

    fn error_cleared(&self) {
        let data = PluginData::new(PluginStatus::Dismissed, StateType::Error, self.clock.now_ms());
        self.plugins.notify(PluginEvent::ErrorCleared(data));
    }

    fn snapshot(&self, state: Option<MediaState>) -> StateUpdate {
        StateUpdate {
            state,
            current_time: self.current_time(),
            seekable_range: self.seekable_range(),
            duration: self.duration(),
            time_update: false,
            is_buffering_timeout_error: false,
            error: None,
        }
    }

    fn publish(&mut self, state: Option<MediaState>) {
        let update = self.snapshot(state);
        self.push_update(update);
    }

    fn publish_time_update(&mut self) {
        let mut update = self.snapshot(None);
        update.time_update = true;
        self.push_update(update);
    }

    fn push_update(&mut self, update: StateUpdate) {
        if let Some(state) = update.state {
            info!(%state, "Media state update");
        }
        self.updates.push_back(update);
    }
}

/// Seconds the live window moved between two manifest loads
fn window_offset_seconds(old_start: Option<f64>, new_start: Option<f64>) -> f64 {
    match (old_start, new_start) {
        (Some(old), Some(new)) => (new - old) / 1000.0,
        _ => 0.0,
    }
}

impl Scheduled for PlayerComponent {
    fn next_deadline(&self) -> Option<u64> {
        [
            self.buffering_timeout.deadline(),
            self.fatal_error_timeout.deadline(),
            self.strategy.next_deadline(),
            self.sources.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn poll_timers(&mut self) {
        if self.torn_down {
            return;
        }
        let now = self.clock.now_ms();
        self.sources.poll_timers();
        self.strategy.poll_timers();
        self.pump();

        if self.buffering_timeout.fire(now) {
            self.on_buffering_timeout();
        }
        if self.fatal_error_timeout.fire(now) {
            self.on_fatal_error_timeout();
        }
    }

    fn pending_timers(&self) -> usize {
        usize::from(self.buffering_timeout.is_pending())
            + usize::from(self.fatal_error_timeout.is_pending())
            + self.strategy.pending_timers()
            + self.sources.pending_timers()
    }
}

impl std::fmt::Debug for PlayerComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerComponent")
            .field("strategy", &self.strategy.kind())
            .field("sources", &self.sources)
            .field("is_initial_play", &self.is_initial_play)
            .field("fatal_error", &self.fatal_error)
            .field("pending", &self.pending)
            .field("torn_down", &self.torn_down)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{drive_for, ManualClock};
    use crate::manifest::TimeData;
    use crate::media_player::{DeviceEvent, ElementEvent};
    use crate::media_sources::SourcesConfig;
    use crate::strategy::Transitions;
    use crate::MediaSourceEntry;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct Recorded {
        calls: Vec<String>,
        paused: bool,
        time: Option<f64>,
        range: Option<SeekableRange>,
    }

    /// Strategy double answering element events with fixed strategy events
    struct RecordingStrategy {
        kind: StrategyKind,
        state: Arc<Mutex<Recorded>>,
        events: Vec<StrategyEvent>,
    }

    impl Scheduled for RecordingStrategy {
        fn next_deadline(&self) -> Option<u64> {
            None
        }

        fn poll_timers(&mut self) {}

        fn pending_timers(&self) -> usize {
            0
        }
    }

    impl Strategy for RecordingStrategy {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        fn load(
            &mut self,
            sources: &MediaSources,
            _mime_type: &str,
            start_time: Option<f64>,
        ) -> Result<()> {
            let url = sources.current_source().unwrap_or_default();
            self.state.lock().unwrap().calls.push(format!("load {url} {start_time:?}"));
            Ok(())
        }

        fn play(&mut self) -> Result<()> {
            self.state.lock().unwrap().calls.push("play".into());
            Ok(())
        }

        fn pause(&mut self, options: PauseOptions) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.paused = true;
            state.calls.push(format!("pause {}", options.disable_auto_resume));
            Ok(())
        }

        fn set_current_time(&mut self, seconds: f64) -> Result<()> {
            self.state.lock().unwrap().calls.push(format!("seek {seconds}"));
            Ok(())
        }

        fn current_time(&self) -> Option<f64> {
            self.state.lock().unwrap().time
        }

        fn seekable_range(&self) -> Option<SeekableRange> {
            self.state.lock().unwrap().range
        }

        fn duration(&self) -> f64 {
            100.0
        }

        fn is_paused(&self) -> bool {
            self.state.lock().unwrap().paused
        }

        fn is_ended(&self) -> bool {
            false
        }

        fn transitions(&self) -> Transitions {
            Transitions::all()
        }

        fn set_playback_rate(&mut self, _rate: f64) {}

        fn playback_rate(&self) -> f64 {
            1.0
        }

        fn set_subtitles(&mut self, _enabled: bool) {}

        fn handle_host_event(&mut self, _sources: &MediaSources, event: HostEvent) {
            let HostEvent::Device(DeviceEvent::Element(event)) = event else {
                return;
            };
            let mapped = match event {
                ElementEvent::Playing => StrategyEvent::State(MediaState::Playing),
                ElementEvent::Pause => StrategyEvent::State(MediaState::Paused),
                ElementEvent::Waiting => StrategyEvent::State(MediaState::Waiting),
                ElementEvent::Ended => StrategyEvent::State(MediaState::Ended),
                ElementEvent::TimeUpdate => StrategyEvent::TimeUpdate,
                ElementEvent::Error => StrategyEvent::Error(MediaError::new(3, "decode")),
                _ => return,
            };
            self.events.push(mapped);
        }

        fn drain_events(&mut self) -> Vec<StrategyEvent> {
            std::mem::take(&mut self.events)
        }

        fn reset(&mut self) {
            self.state.lock().unwrap().calls.push("reset".into());
        }

        fn tear_down(&mut self) {
            self.state.lock().unwrap().calls.push("tear_down".into());
        }
    }

    struct Setup {
        component: PlayerComponent,
        recorded: Arc<Mutex<Recorded>>,
        clock: Arc<ManualClock>,
        plugin_events: Arc<Mutex<Vec<PluginEvent>>>,
    }

    impl Setup {
        fn element(&mut self, event: ElementEvent) {
            self.component
                .handle_host_event(HostEvent::Device(DeviceEvent::Element(event)));
        }

        fn calls(&self) -> Vec<String> {
            self.recorded.lock().unwrap().calls.clone()
        }

        fn states(&mut self) -> Vec<MediaState> {
            self.component
                .take_updates()
                .into_iter()
                .filter_map(|update| update.state)
                .collect()
        }
    }

    fn setup_with(
        urls: &[&str],
        window_type: WindowType,
        kind: StrategyKind,
        live_support: LiveSupport,
        manifest: Option<ManifestData>,
    ) -> Setup {
        let clock = ManualClock::shared(0);
        let plugins = Plugins::new();
        let plugin_events = Arc::new(Mutex::new(Vec::new()));
        let sink = plugin_events.clone();
        plugins.register(Arc::new(move |event: &PluginEvent| {
            sink.lock().unwrap().push(event.clone());
        }));

        let mut sources = MediaSources::new(plugins.clone(), clock.clone(), 120_000, 5_000);
        let step = sources
            .init(SourcesConfig {
                urls: urls
                    .iter()
                    .enumerate()
                    .map(|(index, url)| MediaSourceEntry::new(format!("cdn{index}"), *url))
                    .collect(),
                window_type,
                live_support,
                ..SourcesConfig::default()
            })
            .unwrap();
        if let (SourcesStep::Load(request), Some(data)) = (step, manifest) {
            sources.complete_load(request.generation, Ok(data));
        }

        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let strategy = RecordingStrategy {
            kind,
            state: recorded.clone(),
            events: Vec::new(),
        };
        let mut component = PlayerComponent::new(
            Box::new(strategy),
            sources,
            plugins,
            clock.clone(),
            ComponentConfig {
                mime_type: "video/mp4".into(),
                live_support,
                timeouts: Timeouts::default(),
            },
        );
        component.load(Some(0.0)).unwrap();
        Setup {
            component,
            recorded,
            clock,
            plugin_events,
        }
    }

    fn setup(urls: &[&str]) -> Setup {
        setup_with(urls, WindowType::Static, StrategyKind::Mse, LiveSupport::Seekable, None)
    }

    #[test]
    fn test_state_events_are_published() {
        let mut s = setup(&["http://a/video.mp4"]);
        s.element(ElementEvent::Waiting);
        s.element(ElementEvent::Playing);
        s.element(ElementEvent::Pause);
        s.element(ElementEvent::Ended);
        assert_eq!(
            s.states(),
            vec![
                MediaState::Waiting,
                MediaState::Playing,
                MediaState::Paused,
                MediaState::Ended
            ]
        );
    }

    #[test]
    fn test_time_update_carries_no_state() {
        let mut s = setup(&["http://a/video.mp4"]);
        s.recorded.lock().unwrap().time = Some(12.0);
        s.element(ElementEvent::TimeUpdate);

        let updates = s.component.take_updates();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].time_update);
        assert_eq!(updates[0].state, None);
        assert_eq!(updates[0].current_time, Some(12.0));
        assert_eq!(updates[0].duration, 100.0);
    }

    #[test]
    fn test_initial_buffering_timeout_fails_over() {
        let mut s = setup(&["http://a/video.mp4", "http://b/video.mp4"]);
        s.recorded.lock().unwrap().time = Some(42.0);
        s.element(ElementEvent::Waiting);
        assert_eq!(s.component.next_deadline(), Some(30_000));

        let clock = s.clock.clone();
        drive_for(&mut s.component, &clock, 30_000);

        assert_eq!(s.component.sources().current_cdn(), Some("cdn1"));
        assert_eq!(
            s.calls(),
            vec![
                "load http://a/video.mp4 Some(0.0)".to_string(),
                "reset".to_string(),
                "load http://b/video.mp4 Some(42.0)".to_string(),
            ]
        );
        let handled = s
            .plugin_events
            .lock()
            .unwrap()
            .iter()
            .any(|event| {
                matches!(event, PluginEvent::ErrorHandled(data) if data.is_buffering_timeout_error)
            });
        assert!(handled);
    }

    #[test]
    fn test_later_buffering_uses_shorter_timeout() {
        let mut s = setup(&["http://a/video.mp4"]);
        s.element(ElementEvent::Waiting);
        s.element(ElementEvent::Playing);
        assert_eq!(s.component.next_deadline(), None);

        s.clock.set(1_000);
        s.element(ElementEvent::Waiting);
        assert_eq!(s.component.next_deadline(), Some(21_000));
    }

    #[test]
    fn test_buffering_timeout_without_alternative_is_fatal() {
        let mut s = setup(&["http://a/video.mp4"]);
        s.element(ElementEvent::Waiting);
        s.component.take_updates();

        let clock = s.clock.clone();
        drive_for(&mut s.component, &clock, 30_000);

        let updates = s.component.take_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].state, Some(MediaState::FatalError));
        assert!(updates[0].is_buffering_timeout_error);
        assert_eq!(updates[0].error.as_ref().map(|error| error.code), Some(8));
        assert_eq!(s.component.pending_timers(), 0);
    }

    #[test]
    fn test_error_becomes_fatal_after_grace_period() {
        let mut s = setup(&["http://a/video.mp4"]);
        s.element(ElementEvent::Error);
        assert_eq!(s.states(), vec![MediaState::Waiting]);
        assert_eq!(s.component.next_deadline(), Some(5_000));

        // a second error does not restart the grace period
        s.clock.set(2_000);
        s.element(ElementEvent::Error);
        assert_eq!(s.component.next_deadline(), Some(5_000));

        let clock = s.clock.clone();
        drive_for(&mut s.component, &clock, 3_000);
        let updates = s.component.take_updates();
        let fatal = updates.last().unwrap();
        assert_eq!(fatal.state, Some(MediaState::FatalError));
        assert!(!fatal.is_buffering_timeout_error);
        assert_eq!(fatal.error, Some(MediaError::new(3, "decode")));
    }

    #[test]
    fn test_playing_clears_pending_error() {
        let mut s = setup(&["http://a/video.mp4"]);
        s.element(ElementEvent::Error);
        s.element(ElementEvent::Playing);
        assert_eq!(s.component.pending_timers(), 0);

        let clock = s.clock.clone();
        drive_for(&mut s.component, &clock, 10_000);
        assert!(!s.states().contains(&MediaState::FatalError));
    }

    #[test]
    fn test_error_raises_plugin_notifications() {
        let mut s = setup(&["http://a/video.mp4"]);
        s.element(ElementEvent::Error);
        let events = s.plugin_events.lock().unwrap().clone();
        let names: Vec<_> = events.iter().map(PluginEvent::name).collect();
        assert_eq!(names, vec!["on_buffering_cleared", "on_error"]);
    }

    #[test]
    fn test_strategy_failover_reloads() {
        let mut s = setup(&["http://a/video.mp4", "http://b/video.mp4"]);
        let params = FailoverParams::new(false).with_error(25, "manifest");
        s.component.handle_strategy_event(StrategyEvent::Failover {
            params,
            reload: true,
            on_failure: Some(MediaError::new(25, "manifest")),
        });
        assert_eq!(s.calls().last().map(String::as_str), Some("load http://b/video.mp4 None"));
    }

    #[test]
    fn test_refused_strategy_failover_reports_error() {
        let mut s = setup(&["http://a/video.mp4"]);
        s.component.handle_strategy_event(StrategyEvent::Failover {
            params: FailoverParams::new(false),
            reload: true,
            on_failure: Some(MediaError::new(25, "manifest")),
        });
        assert_eq!(s.states(), vec![MediaState::Waiting]);
        assert_eq!(s.component.next_deadline(), Some(5_000));
    }

    #[test]
    fn test_growing_window_pause_disables_auto_resume() {
        let mut s = setup_with(
            &["http://a/live.mpd"],
            WindowType::Growing,
            StrategyKind::Mse,
            LiveSupport::Seekable,
            Some(ManifestData::new(TimeData::default(), TransferFormat::Dash)),
        );
        s.component.pause(PauseOptions::default()).unwrap();
        assert_eq!(s.calls().last().map(String::as_str), Some("pause true"));
    }

    fn hls_live(window_start: f64) -> ManifestData {
        ManifestData::new(
            TimeData {
                window_start_time: Some(window_start),
                window_end_time: Some(window_start + 3_600_000.0),
                ..TimeData::default()
            },
            TransferFormat::Hls,
        )
    }

    #[test]
    fn test_native_hls_restartable_seek_restarts_from_refreshed_manifest() {
        let mut s = setup_with(
            &["http://a/live.m3u8"],
            WindowType::Sliding,
            StrategyKind::Native,
            LiveSupport::Restartable,
            Some(hls_live(1_000_000.0)),
        );
        s.recorded.lock().unwrap().range = Some(SeekableRange::new(0.0, 3_600.0));

        s.component.set_current_time(100.0).unwrap();
        let requests = s.component.take_manifest_requests();
        assert_eq!(requests.len(), 1);
        assert!(!s.calls().iter().any(|call| call.starts_with("seek")));

        // the window moved on by ten seconds meanwhile
        s.component
            .complete_manifest_load(requests[0].generation, Ok(hls_live(1_010_000.0)));
        assert_eq!(
            s.calls(),
            vec![
                "load http://a/live.m3u8 Some(0.0)",
                "reset",
                "load http://a/live.m3u8 Some(90.0)",
            ]
        );
    }

    #[test]
    fn test_restart_near_live_edge_starts_at_live_point() {
        let mut s = setup_with(
            &["http://a/live.m3u8"],
            WindowType::Sliding,
            StrategyKind::Native,
            LiveSupport::Restartable,
            Some(hls_live(1_000_000.0)),
        );
        s.recorded.lock().unwrap().range = Some(SeekableRange::new(0.0, 3_600.0));
        s.recorded.lock().unwrap().paused = true;

        s.component.set_current_time(3_590.0).unwrap();
        let requests = s.component.take_manifest_requests();
        s.component
            .complete_manifest_load(requests[0].generation, Ok(hls_live(1_000_000.0)));
        assert_eq!(s.calls().last().map(String::as_str), Some("load http://a/live.m3u8 None"));
    }

    #[test]
    fn test_failed_restart_is_fatal() {
        let mut s = setup_with(
            &["http://a/live.m3u8"],
            WindowType::Sliding,
            StrategyKind::Native,
            LiveSupport::Restartable,
            Some(hls_live(1_000_000.0)),
        );
        s.component.set_current_time(100.0).unwrap();
        let requests = s.component.take_manifest_requests();
        s.component.complete_manifest_load(
            requests[0].generation,
            Err(Error::ManifestFetch("503".into())),
        );

        let updates = s.component.take_updates();
        let fatal = updates.last().unwrap();
        assert_eq!(fatal.state, Some(MediaState::FatalError));
        assert_eq!(fatal.error.as_ref().map(|error| error.code), Some(error_codes::MANIFEST_LOAD));
    }

    #[test]
    fn test_tear_down_stops_everything() {
        let mut s = setup(&["http://a/video.mp4", "http://b/video.mp4"]);
        s.element(ElementEvent::Waiting);
        s.element(ElementEvent::Error);
        s.component.take_updates();

        s.component.tear_down();
        assert_eq!(s.component.pending_timers(), 0);
        assert!(matches!(s.component.play(), Err(Error::TornDown)));

        s.element(ElementEvent::Playing);
        assert!(s.component.take_updates().is_empty());
        assert_eq!(s.calls().last().map(String::as_str), Some("tear_down"));
    }
}
