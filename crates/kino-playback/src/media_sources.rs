//! Media sources and CDN failover
//!
//! Handles:
//! - The ordered source list, whose front entry is always the current source
//! - Deciding whether a failure qualifies for failover, and rotating the list
//! - Reinstating failed sources after the failover reset time
//! - Manifest (re)loads for live windows, guarded by a generation counter
//! - Independent subtitle source failover
//!
//! Manifest loads are requested, not performed: [`SourcesStep::Load`] asks the
//! owner to run the load and hand the outcome back to
//! [`MediaSources::complete_load`]. Only the newest request is honoured.

use crate::clock::{Scheduled, SharedClock};
use crate::manifest::{LoadOptions, ManifestData, TimeData};
use crate::plugins::{PluginData, PluginEvent, PluginStatus, Plugins, StateType};
use crate::{error_codes, Error, LiveSupport, MediaSourceEntry, Result, TransferFormat, WindowType};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

/// Static content this close to its end is not failed over
const ABOUT_TO_END_SECONDS: f64 = 5.0;

/// One candidate subtitles source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitlesSource {
    pub cdn: String,
    pub url: String,
    /// Segment length in seconds for segmented subtitles
    pub segment_length: Option<f64>,
}

impl SubtitlesSource {
    pub fn new(cdn: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            cdn: cdn.into(),
            url: url.into(),
            segment_length: None,
        }
    }
}

/// Everything [`MediaSources::init`] needs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub urls: Vec<MediaSourceEntry>,
    pub captions: Vec<SubtitlesSource>,
    pub window_type: WindowType,
    pub live_support: LiveSupport,
    /// Server time supplied by the host, epoch milliseconds
    pub initial_wallclock_time: Option<f64>,
}

/// Details of the failure a failover is asked for
///
/// `is_buffering_timeout_error` must be provided for the request to be valid.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FailoverParams {
    pub is_buffering_timeout_error: Option<bool>,
    /// Location the engine reports it is playing from
    pub service_location: Option<String>,
    pub current_time: Option<f64>,
    pub duration: Option<f64>,
    pub code: Option<i32>,
    pub message: Option<String>,
}

impl FailoverParams {
    pub fn new(is_buffering_timeout_error: bool) -> Self {
        Self {
            is_buffering_timeout_error: Some(is_buffering_timeout_error),
            ..Self::default()
        }
    }

    pub fn with_service_location(mut self, location: impl Into<String>) -> Self {
        self.service_location = Some(location.into());
        self
    }

    pub fn with_position(mut self, current_time: Option<f64>, duration: Option<f64>) -> Self {
        self.current_time = current_time;
        self.duration = duration;
        self
    }

    pub fn with_error(mut self, code: i32, message: impl Into<String>) -> Self {
        self.code = Some(code);
        self.message = Some(message.into());
        self
    }

    fn is_about_to_end(&self) -> bool {
        match (self.current_time, self.duration) {
            (Some(time), Some(duration)) if duration != 0.0 && !duration.is_nan() => {
                time > duration - ABOUT_TO_END_SECONDS
            }
            _ => false,
        }
    }
}

/// Why sources were (re)loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPurpose {
    Init,
    Failover,
    Refresh,
}

impl std::fmt::Display for LoadPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadPurpose::Init => write!(f, "init"),
            LoadPurpose::Failover => write!(f, "failover"),
            LoadPurpose::Refresh => write!(f, "refresh"),
        }
    }
}

/// A manifest load the owner must run
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRequest {
    pub generation: u64,
    pub url: String,
    pub options: LoadOptions,
    /// Purpose of an earlier request this one replaced
    pub superseded: Option<LoadPurpose>,
}

/// Outcome of a media sources operation
#[derive(Debug, Clone, PartialEq)]
pub enum SourcesStep {
    /// The current source is ready for `purpose`
    Ready(LoadPurpose),
    /// Run this manifest load and pass the result to `complete_load`
    Load(ManifestRequest),
    /// Failover was refused; `manifest_error` when a manifest load started it
    Failed {
        purpose: LoadPurpose,
        manifest_error: bool,
    },
    /// The completion belonged to a superseded load
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingLoad {
    generation: u64,
    purpose: LoadPurpose,
}

/// Ordered CDN sources of one playback session
pub struct MediaSources {
    plugins: Plugins,
    clock: SharedClock,
    failover_reset_ms: u64,
    subtitles_request_ms: u64,
    sources: VecDeque<MediaSourceEntry>,
    failed_over: VecDeque<MediaSourceEntry>,
    reinstatements: VecDeque<u64>,
    subtitles: VecDeque<SubtitlesSource>,
    window_type: WindowType,
    live_support: LiveSupport,
    time: TimeData,
    transfer_format: Option<TransferFormat>,
    generation: u64,
    pending: Option<PendingLoad>,
}

impl MediaSources {
    pub fn new(
        plugins: Plugins,
        clock: SharedClock,
        failover_reset_ms: u64,
        subtitles_request_ms: u64,
    ) -> Self {
        Self {
            plugins,
            clock,
            failover_reset_ms,
            subtitles_request_ms,
            sources: VecDeque::new(),
            failed_over: VecDeque::new(),
            reinstatements: VecDeque::new(),
            subtitles: VecDeque::new(),
            window_type: WindowType::Static,
            live_support: LiveSupport::Seekable,
            time: TimeData::default(),
            transfer_format: None,
            generation: 0,
            pending: None,
        }
    }

    /// Take the session's sources; loads the manifest when the window needs it
    pub fn init(&mut self, config: SourcesConfig) -> Result<SourcesStep> {
        if config.urls.is_empty() {
            return Err(Error::NoSources);
        }

        self.window_type = config.window_type;
        self.live_support = config.live_support;
        self.sources = config.urls.into();
        self.subtitles = config.captions.into();
        debug!(
            cdns = ?self.available_cdns(),
            window_type = %self.window_type,
            "Media sources initialised"
        );

        if !self.needs_manifest() {
            return Ok(SourcesStep::Ready(LoadPurpose::Init));
        }
        Ok(SourcesStep::Load(
            self.begin_load(LoadPurpose::Init, config.initial_wallclock_time),
        ))
    }

    /// Move to the next source if `params` qualify for failover
    pub fn failover(&mut self, params: &FailoverParams, purpose: LoadPurpose) -> SourcesStep {
        self.failover_with(params, purpose, false)
    }

    /// Reload the manifest of the current source
    pub fn refresh(&mut self, purpose: LoadPurpose) -> SourcesStep {
        SourcesStep::Load(self.begin_load(purpose, None))
    }

    /// Hand back the outcome of a requested manifest load
    pub fn complete_load(&mut self, generation: u64, result: Result<ManifestData>) -> SourcesStep {
        let pending = match self.pending {
            Some(pending) if pending.generation == generation => pending,
            _ => {
                debug!(generation, "Discarding stale manifest load");
                return SourcesStep::Stale;
            }
        };
        self.pending = None;

        match result {
            Ok(data) => {
                if let Some(parse_error) = data.parse_error {
                    error!(
                        code = parse_error.code,
                        message = %parse_error.message,
                        "Manifest parse error"
                    );
                    self.plugins.notify(PluginEvent::ManifestParseError {
                        code: parse_error.code,
                        message: parse_error.message,
                    });
                }
                self.time = data.time;
                self.transfer_format = Some(data.transfer_format);
                info!(
                    transfer_format = %data.transfer_format,
                    "Loaded manifest. {}",
                    data.time.describe()
                );
                SourcesStep::Ready(pending.purpose)
            }
            Err(load_error) => {
                error!(error = %load_error, "Failed to load manifest");
                let params = FailoverParams::new(false)
                    .with_error(error_codes::MANIFEST_LOAD, error_codes::MANIFEST_LOAD_MESSAGE);
                self.failover_with(&params, pending.purpose, true)
            }
        }
    }

    /// Move to the next subtitles source
    ///
    /// Returns false, after a fatal notification, when none is left.
    pub fn failover_subtitles(&mut self, status_code: Option<u16>) -> bool {
        let has_alternative = self.subtitles.len() > 1;
        let severity = if has_alternative {
            PluginStatus::Failover
        } else {
            PluginStatus::Fatal
        };
        self.plugins.notify(PluginEvent::SubtitlesLoadError {
            status_code,
            severity,
            cdn: self.current_subtitles_cdn().map(str::to_string),
        });

        if has_alternative {
            self.subtitles.pop_front();
            debug!(cdns = ?self.available_subtitles_cdns(), "Subtitles failed over");
        } else {
            warn!("No subtitles source left");
        }
        has_alternative
    }

    pub fn current_source(&self) -> Option<&str> {
        self.sources.front().map(|source| source.url.as_str())
    }

    pub fn current_cdn(&self) -> Option<&str> {
        self.sources.front().map(|source| source.cdn.as_str())
    }

    pub fn current_subtitles_source(&self) -> Option<&str> {
        self.subtitles.front().map(|source| source.url.as_str())
    }

    pub fn current_subtitles_cdn(&self) -> Option<&str> {
        self.subtitles.front().map(|source| source.cdn.as_str())
    }

    pub fn current_subtitles_segment_length(&self) -> Option<f64> {
        self.subtitles.front().and_then(|source| source.segment_length)
    }

    pub fn subtitles_request_timeout_ms(&self) -> u64 {
        self.subtitles_request_ms
    }

    pub fn failover_reset_time_ms(&self) -> u64 {
        self.failover_reset_ms
    }

    pub fn available_sources(&self) -> Vec<&str> {
        self.sources.iter().map(|source| source.url.as_str()).collect()
    }

    pub fn available_cdns(&self) -> Vec<&str> {
        self.sources.iter().map(|source| source.cdn.as_str()).collect()
    }

    pub fn failed_over_cdns(&self) -> Vec<&str> {
        self.failed_over.iter().map(|source| source.cdn.as_str()).collect()
    }

    pub fn available_subtitles_cdns(&self) -> Vec<&str> {
        self.subtitles.iter().map(|source| source.cdn.as_str()).collect()
    }

    pub fn time(&self) -> TimeData {
        self.time
    }

    pub fn transfer_format(&self) -> Option<TransferFormat> {
        self.transfer_format
    }

    pub fn window_type(&self) -> WindowType {
        self.window_type
    }

    pub fn live_support(&self) -> LiveSupport {
        self.live_support
    }

    /// True while a requested manifest load has not completed
    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether the current source needs its manifest (re)loaded
    pub fn needs_manifest(&self) -> bool {
        let start_time_is_accurate = matches!(
            self.live_support,
            LiveSupport::Restartable | LiveSupport::Seekable
        );
        let reloadable = matches!(self.transfer_format, None | Some(TransferFormat::Hls));
        reloadable
            && (self.window_type.is_live() || self.has_segmented_subtitles())
            && start_time_is_accurate
    }

    /// Drop every source and cancel reinstatements
    pub fn tear_down(&mut self) {
        self.sources.clear();
        self.failed_over.clear();
        self.reinstatements.clear();
        self.subtitles.clear();
        self.window_type = WindowType::Static;
        self.live_support = LiveSupport::Seekable;
        self.time = TimeData::default();
        self.transfer_format = None;
        self.pending = None;
    }

    fn has_segmented_subtitles(&self) -> bool {
        self.current_subtitles_source()
            .is_some_and(|url| find_segment_template(url).is_some())
    }

    fn begin_load(
        &mut self,
        purpose: LoadPurpose,
        initial_wallclock_time: Option<f64>,
    ) -> ManifestRequest {
        self.generation += 1;
        let superseded = self
            .pending
            .replace(PendingLoad {
                generation: self.generation,
                purpose,
            })
            .map(|pending| pending.purpose);
        if let Some(previous) = superseded {
            warn!(%previous, %purpose, "Manifest load superseded");
        }

        ManifestRequest {
            generation: self.generation,
            url: self.current_source().unwrap_or_default().to_string(),
            options: LoadOptions {
                window_type: self.window_type,
                initial_wallclock_time,
            },
            superseded,
        }
    }

    fn failover_with(
        &mut self,
        params: &FailoverParams,
        purpose: LoadPurpose,
        manifest_error: bool,
    ) -> SourcesStep {
        if !self.should_failover(params) {
            debug!(%purpose, "Failover refused");
            return SourcesStep::Failed {
                purpose,
                manifest_error,
            };
        }

        self.emit_cdn_failover(params);
        self.update_cdns(params.service_location.as_deref());
        warn!(
            cdn = ?self.current_cdn(),
            cdns = ?self.available_cdns(),
            "Failed over to next source"
        );

        if self.needs_manifest() {
            SourcesStep::Load(self.begin_load(purpose, None))
        } else {
            SourcesStep::Ready(purpose)
        }
    }

    fn should_failover(&self, params: &FailoverParams) -> bool {
        // the engine reports the source already playing on the first attempt
        let current = self.current_source().unwrap_or_default();
        if params
            .service_location
            .as_deref()
            .is_some_and(|location| hosts_match(location, current))
        {
            return false;
        }

        let info_valid = params.is_buffering_timeout_error.is_some();
        if !info_valid {
            error!("Failover info is not valid");
        }

        let window_allows = match self.window_type {
            WindowType::Static => !params.is_about_to_end(),
            WindowType::Growing | WindowType::Sliding => true,
        };

        info_valid && self.has_sources_to_failover_to() && window_allows
    }

    fn has_sources_to_failover_to(&self) -> bool {
        self.sources.len() > 1
    }

    fn emit_cdn_failover(&self, params: &FailoverParams) {
        let mut data = PluginData::new(
            PluginStatus::Failover,
            StateType::Error,
            self.clock.now_ms(),
        )
            .with_buffering_timeout(params.is_buffering_timeout_error.unwrap_or(false))
            .with_cdns(
                self.sources.front().map(|source| source.cdn.clone()),
                self.sources.get(1).map(|source| source.cdn.clone()),
            );
        data.code = params.code;
        data.message = params.message.clone();
        self.plugins.notify(PluginEvent::ErrorHandled(data));
    }

    fn update_cdns(&mut self, service_location: Option<&str>) {
        if !self.has_sources_to_failover_to() {
            return;
        }
        if let Some(failed) = self.sources.pop_front() {
            self.failed_over.push_back(failed);
            self.reinstatements
                .push_back(self.clock.now_ms().saturating_add(self.failover_reset_ms));
        }
        if let Some(location) = service_location {
            let wanted = strip_query_and_hash(location);
            let index = self
                .sources
                .iter()
                .position(|source| strip_query_and_hash(&source.url) == wanted)
                .unwrap_or(0);
            if let Some(source) = self.sources.remove(index) {
                self.sources.push_front(source);
            }
        }
    }
}

impl Scheduled for MediaSources {
    fn next_deadline(&self) -> Option<u64> {
        self.reinstatements.front().copied()
    }

    fn poll_timers(&mut self) {
        let now = self.clock.now_ms();
        while self.reinstatements.front().is_some_and(|deadline| *deadline <= now) {
            self.reinstatements.pop_front();
            if self.sources.is_empty() {
                continue;
            }
            if let Some(source) = self.failed_over.pop_front() {
                info!(cdn = %source.cdn, "Source added back in to available CDNs");
                self.sources.push_back(source);
            }
        }
    }

    fn pending_timers(&self) -> usize {
        self.reinstatements.len()
    }
}

impl std::fmt::Debug for MediaSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSources")
            .field("sources", &self.sources)
            .field("failed_over", &self.failed_over)
            .field("window_type", &self.window_type)
            .field("transfer_format", &self.transfer_format)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Url without its query string and fragment
pub fn strip_query_and_hash(url: &str) -> &str {
    url.split(['#', '?']).next().unwrap_or(url)
}

/// Host and explicit port of an absolute url
fn authority_of(url: &str) -> Option<(String, Option<u16>)> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_string();
    Some((host, parsed.port()))
}

/// Whether two urls point at the same host
///
/// The scheme is ignored. Falls back to comparing the whole urls when
/// either has no host.
pub fn hosts_match(first: &str, second: &str) -> bool {
    let first = strip_query_and_hash(first);
    let second = strip_query_and_hash(second);
    match (authority_of(first), authority_of(second)) {
        (Some(a), Some(b)) => a == b,
        _ => first == second,
    }
}

/// Last `$Token$` of a segmented subtitles url template
pub fn find_segment_template(url: &str) -> Option<&str> {
    let mut found = None;
    let mut rest = url;
    let mut offset = 0;
    while let Some(start) = rest.find('$') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('$') else { break };
        let token = &after[..end];
        let absolute = offset + start;
        if !token.is_empty() && token.chars().all(|c| c.is_ascii_alphabetic()) {
            found = Some(&url[absolute..absolute + end + 2]);
            offset = absolute + end + 2;
            rest = &url[offset..];
        } else {
            offset = absolute + 1;
            rest = &url[offset..];
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{drive_for, ManualClock};
    use std::sync::{Arc, Mutex};

    fn sources(urls: &[(&str, &str)]) -> Vec<MediaSourceEntry> {
        urls.iter().map(|(cdn, url)| MediaSourceEntry::new(*cdn, *url)).collect()
    }

    fn two_sources() -> Vec<MediaSourceEntry> {
        sources(&[("A", "http://a/x"), ("B", "http://b/x")])
    }

    fn media_sources() -> (MediaSources, Arc<ManualClock>, Arc<Mutex<Vec<PluginEvent>>>) {
        let clock = ManualClock::shared(0);
        let plugins = Plugins::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let log = events.clone();
        plugins.register(Arc::new(move |event: &PluginEvent| {
            log.lock().unwrap().push(event.clone());
        }));
        (MediaSources::new(plugins, clock.clone(), 120_000, 5_000), clock, events)
    }

    fn config(urls: Vec<MediaSourceEntry>, window_type: WindowType) -> SourcesConfig {
        SourcesConfig {
            urls,
            window_type,
            ..SourcesConfig::default()
        }
    }

    fn live_manifest(transfer_format: TransferFormat) -> ManifestData {
        ManifestData::new(
            TimeData {
                window_start_time: Some(0.0),
                window_end_time: Some(600_000.0),
                ..TimeData::default()
            },
            transfer_format,
        )
    }

    fn request(step: SourcesStep) -> ManifestRequest {
        match step {
            SourcesStep::Load(request) => request,
            other => panic!("expected a manifest load, got {other:?}"),
        }
    }

    #[test]
    fn test_init_requires_sources() {
        let (mut media, _, _) = media_sources();
        let result = media.init(config(Vec::new(), WindowType::Static));
        assert!(matches!(result, Err(Error::NoSources)));
    }

    #[test]
    fn test_static_init_is_ready_without_manifest() {
        let (mut media, _, _) = media_sources();
        let step = media.init(config(two_sources(), WindowType::Static)).unwrap();
        assert_eq!(step, SourcesStep::Ready(LoadPurpose::Init));
        assert_eq!(media.current_source(), Some("http://a/x"));
    }

    #[test]
    fn test_live_init_loads_manifest() {
        let (mut media, _, _) = media_sources();
        let mut init = config(two_sources(), WindowType::Sliding);
        init.initial_wallclock_time = Some(1_000.0);

        let request = request(media.init(init).unwrap());
        assert_eq!(request.url, "http://a/x");
        assert_eq!(request.options.window_type, WindowType::Sliding);
        assert_eq!(request.options.initial_wallclock_time, Some(1_000.0));
        assert!(media.is_loading());

        let step = media.complete_load(request.generation, Ok(live_manifest(TransferFormat::Dash)));
        assert_eq!(step, SourcesStep::Ready(LoadPurpose::Init));
        assert_eq!(media.time().window_length_seconds(), Some(600.0));
        assert_eq!(media.transfer_format(), Some(TransferFormat::Dash));
        assert!(!media.needs_manifest());
    }

    #[test]
    fn test_playable_live_skips_manifest() {
        let (mut media, _, _) = media_sources();
        let mut init = config(two_sources(), WindowType::Sliding);
        init.live_support = LiveSupport::Playable;
        assert_eq!(media.init(init).unwrap(), SourcesStep::Ready(LoadPurpose::Init));
    }

    #[test]
    fn test_failover_from_current_host_is_refused() {
        let (mut media, _, events) = media_sources();
        media.init(config(two_sources(), WindowType::Static)).unwrap();

        let params = FailoverParams::new(false).with_service_location("http://a/x");
        let step = media.failover(&params, LoadPurpose::Failover);

        assert_eq!(
            step,
            SourcesStep::Failed {
                purpose: LoadPurpose::Failover,
                manifest_error: false
            }
        );
        assert_eq!(media.available_cdns(), vec!["A", "B"]);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failover_rotates_and_reinstates() {
        let (mut media, clock, events) = media_sources();
        media.init(config(two_sources(), WindowType::Static)).unwrap();

        let params = FailoverParams::new(false)
            .with_service_location("http://elsewhere/x")
            .with_error(8, "timeout");
        let step = media.failover(&params, LoadPurpose::Failover);

        assert_eq!(step, SourcesStep::Ready(LoadPurpose::Failover));
        assert_eq!(media.available_cdns(), vec!["B"]);
        assert_eq!(media.failed_over_cdns(), vec!["A"]);
        assert_eq!(media.next_deadline(), Some(120_000));

        match &events.lock().unwrap()[0] {
            PluginEvent::ErrorHandled(data) => {
                assert_eq!(data.status, PluginStatus::Failover);
                assert_eq!(data.cdn.as_deref(), Some("A"));
                assert_eq!(data.new_cdn.as_deref(), Some("B"));
                assert_eq!(data.code, Some(8));
            }
            other => panic!("unexpected plugin event {other:?}"),
        }

        drive_for(&mut media, &clock, 120_000);
        assert_eq!(media.available_cdns(), vec!["B", "A"]);
        assert!(media.failed_over_cdns().is_empty());
        assert_eq!(media.pending_timers(), 0);
    }

    #[test]
    fn test_failover_without_service_location() {
        let (mut media, _, _) = media_sources();
        media.init(config(two_sources(), WindowType::Sliding)).ok();
        media.transfer_format = Some(TransferFormat::Dash);

        let step = media.failover(&FailoverParams::new(true), LoadPurpose::Failover);
        assert_eq!(step, SourcesStep::Ready(LoadPurpose::Failover));
        assert_eq!(media.current_cdn(), Some("B"));
    }

    #[test]
    fn test_failover_moves_service_location_to_front() {
        let (mut media, _, _) = media_sources();
        let urls = sources(&[("A", "http://a/x"), ("B", "http://b/x"), ("C", "http://c/x")]);
        media.init(config(urls, WindowType::Static)).unwrap();

        let params = FailoverParams::new(false).with_service_location("http://c/x?token=1");
        media.failover(&params, LoadPurpose::Failover);
        assert_eq!(media.available_cdns(), vec!["C", "B"]);
        assert_eq!(media.failed_over_cdns(), vec!["A"]);
    }

    #[test]
    fn test_invalid_failover_info_is_refused() {
        let (mut media, _, _) = media_sources();
        media.init(config(two_sources(), WindowType::Static)).unwrap();
        let step = media.failover(&FailoverParams::default(), LoadPurpose::Failover);
        assert!(matches!(step, SourcesStep::Failed { .. }));
        assert_eq!(media.available_cdns(), vec!["A", "B"]);
    }

    #[test]
    fn test_static_content_about_to_end_is_not_failed_over() {
        let (mut media, _, _) = media_sources();
        media.init(config(two_sources(), WindowType::Static)).unwrap();
        let params = FailoverParams::new(true).with_position(Some(96.0), Some(100.0));
        assert!(matches!(
            media.failover(&params, LoadPurpose::Failover),
            SourcesStep::Failed { .. }
        ));

        let params = FailoverParams::new(true).with_position(Some(94.0), Some(100.0));
        assert_eq!(
            media.failover(&params, LoadPurpose::Failover),
            SourcesStep::Ready(LoadPurpose::Failover)
        );
    }

    #[test]
    fn test_single_source_cannot_fail_over() {
        let (mut media, _, _) = media_sources();
        media.init(config(sources(&[("A", "http://a/x")]), WindowType::Static)).unwrap();
        assert!(matches!(
            media.failover(&FailoverParams::new(false), LoadPurpose::Failover),
            SourcesStep::Failed { .. }
        ));
    }

    #[test]
    fn test_manifest_load_error_fails_over_and_reloads() {
        let (mut media, _, events) = media_sources();
        let first = request(media.init(config(two_sources(), WindowType::Sliding)).unwrap());

        let not_found = Err(Error::ManifestFetch("404".into()));
        let second = request(media.complete_load(first.generation, not_found));
        assert_eq!(second.url, "http://b/x");
        assert_eq!(second.superseded, None);

        match &events.lock().unwrap()[0] {
            PluginEvent::ErrorHandled(data) => {
                assert_eq!(data.code, Some(error_codes::MANIFEST_LOAD));
                assert!(!data.is_buffering_timeout_error);
            }
            other => panic!("unexpected plugin event {other:?}"),
        }

        let step = media.complete_load(second.generation, Ok(live_manifest(TransferFormat::Hls)));
        assert_eq!(step, SourcesStep::Ready(LoadPurpose::Init));
    }

    #[test]
    fn test_manifest_load_error_without_alternative() {
        let (mut media, _, _) = media_sources();
        let init = config(sources(&[("A", "http://a/x")]), WindowType::Growing);
        let first = request(media.init(init).unwrap());

        let step = media.complete_load(first.generation, Err(Error::ManifestFetch("404".into())));
        assert_eq!(
            step,
            SourcesStep::Failed {
                purpose: LoadPurpose::Init,
                manifest_error: true
            }
        );
    }

    #[test]
    fn test_stale_load_is_discarded() {
        let (mut media, _, _) = media_sources();
        let first = request(media.init(config(two_sources(), WindowType::Sliding)).unwrap());
        let second = request(media.refresh(LoadPurpose::Refresh));
        assert_eq!(second.superseded, Some(LoadPurpose::Init));

        assert_eq!(
            media.complete_load(first.generation, Ok(live_manifest(TransferFormat::Hls))),
            SourcesStep::Stale
        );
        assert_eq!(media.time(), TimeData::default());
        assert_eq!(
            media.complete_load(second.generation, Ok(live_manifest(TransferFormat::Hls))),
            SourcesStep::Ready(LoadPurpose::Refresh)
        );
    }

    #[test]
    fn test_parse_error_notifies_plugins() {
        let (mut media, _, events) = media_sources();
        let first = request(media.init(config(two_sources(), WindowType::Sliding)).unwrap());
        let data = ManifestData::unparsed(TransferFormat::Dash, "manifest-dash-timing-error");

        assert_eq!(
            media.complete_load(first.generation, Ok(data)),
            SourcesStep::Ready(LoadPurpose::Init)
        );
        assert_eq!(
            events.lock().unwrap()[0],
            PluginEvent::ManifestParseError {
                code: 7,
                message: "manifest-dash-timing-error".into()
            }
        );
        assert_eq!(media.time(), TimeData::default());
    }

    #[test]
    fn test_hls_failover_reloads_manifest() {
        let (mut media, _, _) = media_sources();
        let first = request(media.init(config(two_sources(), WindowType::Sliding)).unwrap());
        media.complete_load(first.generation, Ok(live_manifest(TransferFormat::Hls)));

        let step = media.failover(&FailoverParams::new(false), LoadPurpose::Failover);
        assert_eq!(request(step).url, "http://b/x");
    }

    #[test]
    fn test_segmented_subtitles_need_manifest() {
        let (mut media, _, _) = media_sources();
        let mut init = config(two_sources(), WindowType::Static);
        init.captions = vec![SubtitlesSource::new("A", "http://a/subs/$Number$.xml")];
        assert!(matches!(media.init(init).unwrap(), SourcesStep::Load(_)));
    }

    #[test]
    fn test_subtitles_failover() {
        let (mut media, _, events) = media_sources();
        let mut init = config(two_sources(), WindowType::Static);
        init.captions = vec![
            SubtitlesSource::new("A", "http://a/subs.xml"),
            SubtitlesSource::new("B", "http://b/subs.xml"),
        ];
        media.init(init).unwrap();

        assert!(media.failover_subtitles(Some(404)));
        assert_eq!(media.current_subtitles_cdn(), Some("B"));
        assert!(!media.failover_subtitles(Some(500)));
        assert_eq!(media.current_subtitles_cdn(), Some("B"));

        let severities: Vec<_> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                PluginEvent::SubtitlesLoadError { severity, .. } => Some(*severity),
                _ => None,
            })
            .collect();
        assert_eq!(severities, vec![PluginStatus::Failover, PluginStatus::Fatal]);
    }

    #[test]
    fn test_tear_down_clears_reinstatements() {
        let (mut media, _, _) = media_sources();
        media.init(config(two_sources(), WindowType::Static)).unwrap();
        media.failover(&FailoverParams::new(false), LoadPurpose::Failover);
        assert_eq!(media.pending_timers(), 1);
        media.tear_down();
        assert_eq!(media.pending_timers(), 0);
        assert_eq!(media.current_source(), None);
    }

    #[test]
    fn test_hosts_match() {
        assert!(hosts_match("http://a/x", "https://a/y?z"));
        assert!(!hosts_match("http://a/x", "http://b/x"));
        assert!(hosts_match("a/x#frag", "a/x"));
        assert!(!hosts_match("a/x", "http://a/x"));
        assert!(hosts_match("http://CDN.example.com/x", "http://cdn.example.com/y"));
        assert!(!hosts_match("http://a:8080/x", "http://a/x"));
        assert!(hosts_match("http://a:80/x", "http://a/x"));
    }

    #[test]
    fn test_find_segment_template() {
        assert_eq!(
            find_segment_template("http://a/$RepresentationID$/$Number$.m4s"),
            Some("$Number$")
        );
        assert_eq!(find_segment_template("http://a/subs.xml"), None);
        assert_eq!(find_segment_template("http://a/$1$/x"), None);
    }
}
