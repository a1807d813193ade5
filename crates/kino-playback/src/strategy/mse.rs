//! Adaptive streaming strategy
//!
//! Drives an MSE engine ([`DashEngine`]) over a media element. The engine
//! owns segment fetching and ABR; this strategy maps its events to media
//! states, turns manifest download errors and base url switches into CDN
//! failover requests, and keeps track of the time a reload should resume at.

use super::{HostEvent, Strategy, StrategyEvent, Transitions};
use crate::clock::{Scheduled, SharedClock};
use crate::config::{MseSettings, StrategyKind};
use crate::live::AutoResume;
use crate::media_player::{DeviceEvent, ElementEvent};
use crate::media_sources::{FailoverParams, MediaSources};
use crate::plugins::{PluginEvent, Plugins};
use crate::time::calculate_sliding_window_seek_offset;
use crate::{
    MediaError, MediaKind, MediaState, PauseOptions, PauseTrigger, Result, SeekableRange,
    TransferFormat, WindowType,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

/// Error codes raised by the engine
pub mod engine_error_codes {
    pub const DOWNLOAD_MANIFEST: i32 = 25;
    pub const DOWNLOAD_CONTENT: i32 = 27;
    pub const DOWNLOAD_INIT_SEGMENT: i32 = 28;
    pub const UNSUPPORTED_CODEC: i32 = 30;
}

/// Current DVR window reported by the engine, in MPD time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DvrInfo {
    pub time: f64,
    pub range: SeekableRange,
}

/// Timeline a source anchor is measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineZeroPoint {
    /// Since the start of the first period
    Mpd,
    /// Since the start of the seekable window
    Video,
    /// Availability timeline, POSIX seconds
    Wallclock,
}

/// Events raised by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum DashEvent {
    Error(MediaError),
    ManifestLoaded {
        duration: Option<f64>,
    },
    ManifestValidityChanged {
        new_duration: Option<f64>,
    },
    /// Outcome of [`DashEngine::refresh_manifest`]
    ManifestRefreshed {
        duration: Option<f64>,
    },
    StreamInitialised,
    QualityChangeRendered {
        media_type: String,
        old_quality: Option<u32>,
        new_quality: u32,
    },
    /// The engine switched to another base url
    BaseUrlSelected {
        url: String,
        service_location: String,
    },
    BufferLevel {
        media_kind: MediaKind,
        level: f64,
    },
    FragmentContentLengthMismatch {
        response_url: String,
        media_type: String,
        header_length: u64,
        body_length: u64,
    },
    QuotaExceeded {
        critical_buffer_level: f64,
        time: f64,
    },
    GapJump {
        seek_time: f64,
        duration: f64,
    },
}

/// The MSE engine contract
pub trait DashEngine: Send {
    fn initialise(&mut self, media_kind: MediaKind);

    /// Start loading `url`, which may carry a `#t=` anchor
    fn attach_source(&mut self, url: &str);

    fn play(&mut self);

    fn pause(&mut self);

    fn seek(&mut self, seconds: f64);

    fn is_ready(&self) -> bool;

    fn is_paused(&self) -> bool;

    fn duration(&self) -> f64;

    fn dvr_info(&self) -> Option<DvrInfo>;

    fn dvr_window_size(&self) -> f64;

    /// Time reported by the media element
    fn element_current_time(&self) -> Option<f64>;

    /// Reload the manifest; answered with [`DashEvent::ManifestRefreshed`]
    fn refresh_manifest(&mut self);

    fn set_playback_rate(&mut self, rate: f64);

    fn playback_rate(&self) -> f64;

    fn enable_text(&mut self, enabled: bool);

    /// Bitrate of the representation playing for `media_kind`, kbps
    fn current_bitrate_kbps(&self, media_kind: MediaKind) -> Option<f64>;

    /// Bitrate of a quality index of `media_type`, kbps
    fn bitrate_for_quality(&self, media_type: &str, quality: u32) -> Option<f64>;

    fn reset(&mut self);
}

/// Fragment appended to a source url to start playback at `seconds`
///
/// Empty when there is nothing to anchor: no time, a non-finite time, or the
/// start of a static stream. Video time of a live window is measured from
/// `initial_start_seconds` and never anchors at zero.
pub fn build_source_anchor(
    seconds: Option<f64>,
    zero_point: TimelineZeroPoint,
    window_type: WindowType,
    initial_start_seconds: f64,
) -> String {
    let Some(seconds) = seconds.filter(|seconds| seconds.is_finite()) else {
        return String::new();
    };
    let whole = seconds.trunc() as i64;
    let live_offset = || initial_start_seconds as i64 + if whole == 0 { 1 } else { whole };

    match (zero_point, window_type) {
        (TimelineZeroPoint::Mpd, _) => format!("#t={whole}"),
        (TimelineZeroPoint::Wallclock, _) => format!("#t=posix:{whole}"),
        (TimelineZeroPoint::Video, WindowType::Sliding) => format!("#t={}", live_offset()),
        (TimelineZeroPoint::Video, WindowType::Growing) => format!("#t=posix:{}", live_offset()),
        (TimelineZeroPoint::Video, WindowType::Static) if whole == 0 => String::new(),
        (TimelineZeroPoint::Video, WindowType::Static) => format!("#t={whole}"),
    }
}

pub struct MseStrategy {
    engine: Box<dyn DashEngine>,
    clock: SharedClock,
    plugins: Plugins,
    settings: MseSettings,
    window_type: WindowType,
    media_kind: MediaKind,
    time_correction: f64,
    initial_start_seconds: f64,

    initialised: bool,
    failover_time: Option<f64>,
    failover_zero_point: TimelineZeroPoint,
    refresh_failover_time: Option<f64>,
    sliding_window_paused_at: u64,
    is_ended: bool,
    is_seeking: bool,
    published_seek_event: bool,
    last_error: Option<MediaError>,
    /// Seek targets waiting on manifest refreshes, oldest first
    refreshes: VecDeque<Option<f64>>,
    buffer_length: Option<f64>,
    playback_bitrate: Option<f64>,
    auto_resume: AutoResume,
    events: Vec<StrategyEvent>,
}

impl MseStrategy {
    pub fn new(
        engine: Box<dyn DashEngine>,
        sources: &MediaSources,
        media_kind: MediaKind,
        settings: MseSettings,
        plugins: Plugins,
        clock: SharedClock,
    ) -> Self {
        let time = sources.time();
        Self {
            engine,
            clock,
            plugins,
            settings,
            window_type: sources.window_type(),
            media_kind,
            time_correction: time.time_correction(),
            initial_start_seconds: time.window_start_time.map_or(0.0, |start| start / 1000.0),
            initialised: false,
            failover_time: None,
            failover_zero_point: TimelineZeroPoint::Video,
            refresh_failover_time: None,
            sliding_window_paused_at: 0,
            is_ended: false,
            is_seeking: false,
            published_seek_event: false,
            last_error: None,
            refreshes: VecDeque::new(),
            buffer_length: None,
            playback_bitrate: None,
            auto_resume: AutoResume::new(),
            events: Vec::new(),
        }
    }

    /// Time and timeline a reload would resume at
    pub fn failover_time(&self) -> (Option<f64>, TimelineZeroPoint) {
        (self.failover_time, self.failover_zero_point)
    }

    fn publish(&mut self, state: MediaState) {
        self.auto_resume.observe_state(state);
        self.events.push(StrategyEvent::State(state));
    }

    fn attach(&mut self, url: &str, seconds: Option<f64>, zero_point: TimelineZeroPoint) {
        let anchor = build_source_anchor(
            seconds,
            zero_point,
            self.window_type,
            self.initial_start_seconds,
        );
        let source = format!("{url}{anchor}");
        info!(source, "Attaching source");
        self.engine.attach_source(&source);
    }

    fn start_auto_resume(&mut self) {
        let now = self.clock.now_ms();
        self.auto_resume
            .arm(now, self.current_time(), self.seekable_range());
    }

    fn clamped_time(&self, seconds: f64, range: SeekableRange) -> f64 {
        let (start, end) = match self.window_type {
            WindowType::Sliding => (0.0, self.engine.dvr_window_size()),
            _ => (range.start, range.end),
        };
        let correction = match self.window_type {
            WindowType::Static => self.settings.seek_duration_padding,
            _ => self.settings.live_delay.max(self.settings.seek_duration_padding),
        };
        seconds.max(start).min(end - correction)
    }

    fn seek_offset(&mut self, seconds: f64) -> f64 {
        let range = self.seekable_range().unwrap_or_default();
        if self.window_type != WindowType::Sliding {
            return self.clamped_time(seconds, range);
        }
        let dvr_start = self.engine.dvr_info().map_or(0.0, |dvr| dvr.range.start);
        let offset = calculate_sliding_window_seek_offset(
            seconds,
            dvr_start,
            self.time_correction,
            self.sliding_window_paused_at,
            self.clock.now_ms(),
        );
        self.sliding_window_paused_at = 0;
        self.clamped_time(offset, range)
    }

    fn on_buffering(&mut self) {
        self.is_ended = false;
        if !self.is_seeking || !self.published_seek_event {
            self.publish(MediaState::Waiting);
            self.published_seek_event = true;
        }
    }

    fn on_seeked(&mut self) {
        self.is_seeking = false;
        if self.is_paused() {
            if self.window_type == WindowType::Sliding {
                self.start_auto_resume();
            }
            self.publish(MediaState::Paused);
        } else {
            self.publish(MediaState::Playing);
        }
    }

    fn on_time_update(&mut self) {
        let mpd_time = match self.window_type {
            WindowType::Sliding => self.engine.dvr_info().map(|dvr| dvr.time),
            _ => self.engine.element_current_time(),
        };
        // a freshly attached element reports 0 before it reaches the anchor
        if let Some(time) = mpd_time.filter(|time| time.is_finite() && time.trunc() > 0.0) {
            self.failover_time = Some(time);
            self.failover_zero_point = TimelineZeroPoint::Mpd;
        }
        self.events.push(StrategyEvent::TimeUpdate);
    }

    fn handle_element_event(&mut self, event: ElementEvent) {
        match event {
            ElementEvent::Playing => {
                self.is_ended = false;
                self.publish(MediaState::Playing);
            }
            ElementEvent::Pause => self.publish(MediaState::Paused),
            ElementEvent::Seeking | ElementEvent::Waiting => self.on_buffering(),
            ElementEvent::Seeked => self.on_seeked(),
            ElementEvent::Ended => {
                self.is_ended = true;
                self.publish(MediaState::Ended);
            }
            ElementEvent::TimeUpdate => self.on_time_update(),
            ElementEvent::Error | ElementEvent::SourceError => {
                debug!(?event, "Element errors are reported by the engine")
            }
            ElementEvent::LoadedMetadata | ElementEvent::CanPlay | ElementEvent::Play => {
                debug!(?event, "Media element event")
            }
        }
    }

    fn on_engine_error(&mut self, sources: &MediaSources, media_error: MediaError) {
        error!(code = media_error.code, message = %media_error.message, "Engine error");
        self.last_error = Some(media_error.clone());

        match media_error.code {
            engine_error_codes::DOWNLOAD_CONTENT | engine_error_codes::DOWNLOAD_INIT_SEGMENT
                if sources.available_sources().len() > 1 =>
            {
                debug!("Fragment download error left to the engine's base url failover");
            }
            engine_error_codes::DOWNLOAD_MANIFEST => {
                let params = FailoverParams::new(false)
                    .with_position(self.current_time(), Some(self.duration()))
                    .with_error(media_error.code, media_error.message.clone());
                self.events.push(StrategyEvent::Failover {
                    params,
                    reload: true,
                    on_failure: Some(media_error),
                });
            }
            code => {
                // audio alone may keep playing over an unsupported video codec
                if code == engine_error_codes::UNSUPPORTED_CODEC {
                    self.engine.reset();
                }
                self.events.push(StrategyEvent::Error(media_error));
            }
        }
    }

    fn on_base_url_selected(&mut self, url: &str, service_location: String) {
        info!(url, "Base url selected");
        let mut params = FailoverParams::new(false).with_service_location(service_location);
        if let Some(last_error) = self.last_error.take() {
            params = params.with_error(last_error.code, last_error.message);
        }
        self.events.push(StrategyEvent::Failover {
            params,
            reload: false,
            on_failure: None,
        });
    }

    fn on_manifest_refreshed(&mut self, duration: Option<f64>) {
        info!(?duration, "Manifest refreshed");
        let Some(Some(seek_to)) = self.refreshes.pop_front() else {
            return;
        };
        match duration.filter(|duration| !duration.is_nan()) {
            None => self.engine.seek(seek_to),
            Some(duration) => {
                let start = self.seekable_range().map_or(0.0, |range| range.start);
                let clamped = self.clamped_time(seek_to, SeekableRange::new(start, duration));
                info!(clamped, "Stream ended. Clamping seek point to end of stream");
                self.engine.seek(clamped);
            }
        }
    }

    fn current_playback_bitrate(&self) -> Option<f64> {
        let audio = self.engine.current_bitrate_kbps(MediaKind::Audio);
        match self.media_kind {
            MediaKind::Audio => audio,
            MediaKind::Video => match (self.engine.current_bitrate_kbps(MediaKind::Video), audio) {
                (Some(video), Some(audio)) => Some(video + audio),
                (video, audio) => video.or(audio),
            },
        }
    }

    fn emit_player_info(&mut self) {
        self.playback_bitrate = self.current_playback_bitrate();
        self.plugins.notify(PluginEvent::PlayerInfoUpdated {
            buffer_length: self.buffer_length,
            playback_bitrate: self.playback_bitrate,
        });
    }

    fn on_quality_change_rendered(
        &mut self,
        media_type: String,
        old_quality: Option<u32>,
        new_quality: u32,
    ) {
        let bitrate = self.engine.bitrate_for_quality(&media_type, new_quality);
        let from = match old_quality {
            Some(old) => {
                let old_bitrate = self.engine.bitrate_for_quality(&media_type, old);
                format!("{old} ({} kbps)", old_bitrate.map_or("--".to_string(), |b| b.to_string()))
            }
            None => "Start".to_string(),
        };
        let to = format!(
            "{new_quality} ({} kbps)",
            bitrate.map_or("--".to_string(), |b| b.to_string())
        );
        info!("{media_type} ABR Change Rendered From Representation {from} To {to}");

        self.emit_player_info();
        self.plugins.notify(PluginEvent::QualityChangedRendered {
            media_type,
            old_quality,
            new_quality,
            bitrate,
        });
    }

    fn handle_engine_event(&mut self, sources: &MediaSources, event: DashEvent) {
        match event {
            DashEvent::Error(media_error) => self.on_engine_error(sources, media_error),
            DashEvent::ManifestLoaded { duration } => {
                info!(?duration, "Manifest loaded");
                self.plugins.notify(PluginEvent::ManifestLoaded {
                    url: sources.current_source().unwrap_or_default().to_string(),
                    transfer_format: TransferFormat::Dash,
                    window_type: self.window_type,
                });
            }
            DashEvent::ManifestValidityChanged { new_duration } => {
                info!(?new_duration, "Manifest validity changed");
                if self.window_type == WindowType::Growing {
                    self.refreshes.push_back(None);
                    self.engine.refresh_manifest();
                }
            }
            DashEvent::ManifestRefreshed { duration } => self.on_manifest_refreshed(duration),
            DashEvent::StreamInitialised => self.emit_player_info(),
            DashEvent::QualityChangeRendered {
                media_type,
                old_quality,
                new_quality,
            } => self.on_quality_change_rendered(media_type, old_quality, new_quality),
            DashEvent::BaseUrlSelected { url, service_location } => {
                self.on_base_url_selected(&url, service_location)
            }
            DashEvent::BufferLevel { media_kind, level } => {
                if media_kind == self.media_kind {
                    self.buffer_length = Some(level);
                    self.plugins.notify(PluginEvent::PlayerInfoUpdated {
                        buffer_length: self.buffer_length,
                        playback_bitrate: self.playback_bitrate,
                    });
                }
            }
            DashEvent::FragmentContentLengthMismatch {
                response_url,
                media_type,
                header_length,
                body_length,
            } => {
                let message = format!(
                    "Fragment Content Length Mismatch: {response_url} ({media_type}). \
                    Header Length {header_length}. Body Length {body_length}"
                );
                warn!("{message}");
                self.plugins
                    .notify(PluginEvent::FragmentContentLengthMismatch { message });
            }
            DashEvent::QuotaExceeded {
                critical_buffer_level,
                time,
            } => {
                // the critical level is recorded after the buffer was cut to 80%
                let buffer_level = critical_buffer_level * 1.25;
                warn!(buffer_level, time, "Quota exceeded");
                self.plugins
                    .notify(PluginEvent::QuotaExceeded { buffer_level, time });
            }
            DashEvent::GapJump { seek_time, duration } => {
                debug!(from = seek_time - duration, to = seek_time, "Gap jumped");
            }
        }
    }
}

impl Strategy for MseStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Mse
    }

    fn load(
        &mut self,
        sources: &MediaSources,
        _mime_type: &str,
        start_time: Option<f64>,
    ) -> Result<()> {
        let url = sources.current_source().unwrap_or_default().to_string();
        if self.initialised {
            let resume_at = self.refresh_failover_time.or(self.failover_time);
            self.attach(&url, resume_at, self.failover_zero_point);
        } else {
            self.failover_time = start_time;
            self.engine.initialise(self.media_kind);
            self.initialised = true;
            self.attach(&url, start_time, TimelineZeroPoint::Video);
        }
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        self.engine.play();
        Ok(())
    }

    fn pause(&mut self, options: PauseOptions) -> Result<()> {
        let sliding = self.window_type == WindowType::Sliding;
        if sliding && options.trigger == Some(PauseTrigger::App) {
            self.sliding_window_paused_at = self.clock.now_ms();
        }
        self.engine.pause();
        if sliding && !options.disable_auto_resume {
            self.start_auto_resume();
        }
        Ok(())
    }

    fn set_current_time(&mut self, seconds: f64) -> Result<()> {
        self.published_seek_event = false;
        self.is_seeking = true;

        let range = self.seekable_range().unwrap_or_default();
        let seek_to = self.clamped_time(seconds, range);
        let current = self.current_time().unwrap_or(0.0);
        if self.window_type == WindowType::Growing && seek_to > current {
            debug!(seek_to, "Refreshing manifest before seeking");
            self.refresh_failover_time = Some(seek_to);
            self.refreshes.push_back(Some(seek_to));
            self.engine.refresh_manifest();
        } else {
            let offset = self.seek_offset(seconds);
            self.engine.seek(offset);
        }
        Ok(())
    }

    fn current_time(&self) -> Option<f64> {
        self.initialised
            .then(|| self.engine.element_current_time().unwrap_or(0.0) - self.time_correction)
    }

    fn seekable_range(&self) -> Option<SeekableRange> {
        if self.engine.is_ready() && self.window_type.is_live() {
            if let Some(dvr) = self.engine.dvr_info() {
                return Some(SeekableRange::new(
                    dvr.range.start - self.time_correction,
                    dvr.range.end - self.time_correction - self.settings.live_delay,
                ));
            }
        }
        Some(SeekableRange::new(0.0, self.duration()))
    }

    fn duration(&self) -> f64 {
        if self.engine.is_ready() {
            self.engine.duration()
        } else {
            0.0
        }
    }

    fn is_paused(&self) -> bool {
        self.engine.is_ready() && self.engine.is_paused()
    }

    fn is_ended(&self) -> bool {
        self.is_ended
    }

    fn transitions(&self) -> Transitions {
        Transitions::all()
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.engine.set_playback_rate(rate);
    }

    fn playback_rate(&self) -> f64 {
        self.engine.playback_rate()
    }

    fn set_subtitles(&mut self, enabled: bool) {
        self.engine.enable_text(enabled);
    }

    fn handle_host_event(&mut self, sources: &MediaSources, event: HostEvent) {
        if !self.initialised {
            debug!(?event, "Ignoring event before load");
            return;
        }
        match event {
            HostEvent::Device(DeviceEvent::Element(event)) => self.handle_element_event(event),
            HostEvent::Device(event) => debug!(?event, "Ignoring device event"),
            HostEvent::Dash(event) => self.handle_engine_event(sources, event),
        }
    }

    fn drain_events(&mut self) -> Vec<StrategyEvent> {
        std::mem::take(&mut self.events)
    }

    fn reset(&mut self) {}

    fn tear_down(&mut self) {
        info!("Tearing down MSE strategy");
        self.engine.reset();
        self.initialised = false;
        self.last_error = None;
        self.failover_time = None;
        self.failover_zero_point = TimelineZeroPoint::Video;
        self.refresh_failover_time = None;
        self.is_ended = false;
        self.is_seeking = false;
        self.refreshes.clear();
        self.buffer_length = None;
        self.playback_bitrate = None;
        self.auto_resume.cancel();
        self.events.clear();
    }
}

impl Scheduled for MseStrategy {
    fn next_deadline(&self) -> Option<u64> {
        self.auto_resume.deadline()
    }

    fn poll_timers(&mut self) {
        if self.auto_resume.fire(self.clock.now_ms()) {
            debug!("Auto-resuming at the start of the window");
            self.engine.play();
        }
    }

    fn pending_timers(&self) -> usize {
        usize::from(self.auto_resume.is_pending())
    }
}

impl std::fmt::Debug for MseStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MseStrategy")
            .field("window_type", &self.window_type)
            .field("initialised", &self.initialised)
            .field("failover_time", &self.failover_time)
            .field("failover_zero_point", &self.failover_zero_point)
            .finish()
    }
}
