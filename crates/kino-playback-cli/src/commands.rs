//! CLI command implementations

use crate::output::{format_epoch_ms, print_rows, yes_no, OutputFormat};
use anyhow::{bail, Context};
use console::style;
use kino_playback::clock::drive_for;
use kino_playback::live;
use kino_playback::manifest::{classify_url, LoadOptions};
use kino_playback::media_player::{DeviceEvent, DeviceHost, ElementEvent};
use kino_playback::sim::{ElementHandle, SimElement};
use kino_playback::strategy::StrategyHost;
use kino_playback::time::convert_to_video_time;
use kino_playback::{
    Clock, DeviceKind, LiveSupport, ManifestData, ManifestLoader, ManualClock, MediaDescription,
    MediaKind, MediaSourceEntry, PauseRequest, PlaybackConfig, PlayerSession, Plugins,
    RemoteManifestLoader, SessionEvent, StrategyKind, TimeData, TransferFormat, WindowType,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabled::Tabled;
use tracing::{debug, info};

const LIVE_SUPPORT_TIERS: [LiveSupport; 4] = [
    LiveSupport::None,
    LiveSupport::Playable,
    LiveSupport::Restartable,
    LiveSupport::Seekable,
];

const STRATEGIES: [StrategyKind; 3] =
    [StrategyKind::Mse, StrategyKind::Native, StrategyKind::Basic];

fn parse_snake_case<T: DeserializeOwned>(value: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
        .map_err(|e| e.to_string())
}

pub fn parse_window_type(value: &str) -> Result<WindowType, String> {
    parse_snake_case(value)
}

pub fn parse_strategy(value: &str) -> Result<StrategyKind, String> {
    parse_snake_case(value)
}

fn display_bool(value: &bool) -> String {
    yes_no(*value)
}

#[derive(Debug, Serialize, Tabled)]
struct CapabilityRow {
    live_support: LiveSupport,
    strategy: StrategyKind,
    #[tabled(display_with = "display_bool")]
    can_seek: bool,
    #[tabled(display_with = "display_bool")]
    can_pause: bool,
}

fn capability_rows(start_ms: Option<f64>, end_ms: Option<f64>) -> Vec<CapabilityRow> {
    let mut rows = Vec::new();
    for live_support in LIVE_SUPPORT_TIERS {
        for strategy in STRATEGIES {
            let config = PlaybackConfig {
                strategy,
                live_support,
                ..PlaybackConfig::default()
            };
            let effective = config.effective_live_support();
            rows.push(CapabilityRow {
                live_support,
                strategy,
                can_seek: live::can_seek(start_ms, end_ms, effective, strategy, None),
                can_pause: live::can_pause(start_ms, end_ms, effective),
            });
        }
    }
    rows
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    url: String,
    transfer_format: TransferFormat,
    window_type: WindowType,
    time: TimeData,
    window_length_seconds: Option<f64>,
    parse_error: Option<String>,
}

/// Load a manifest and report its window
pub async fn probe(
    manifest_url: &str,
    window_type: WindowType,
    timeout_ms: u64,
    format: OutputFormat,
) -> anyhow::Result<()> {
    info!(manifest_url, %window_type, "Probing manifest");

    let loader = RemoteManifestLoader::http(Duration::from_millis(timeout_ms))?;
    let options = LoadOptions {
        window_type,
        initial_wallclock_time: None,
    };
    let data = loader
        .load(manifest_url, options)
        .await
        .with_context(|| format!("Failed to load {manifest_url}"))?;

    let report = ProbeReport {
        url: manifest_url.to_string(),
        transfer_format: data.transfer_format,
        window_type,
        time: data.time,
        window_length_seconds: data.time.window_length_seconds(),
        parse_error: data.parse_error.map(|error| format!("{} ({})", error.message, error.code)),
    };

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{} {}", style("Manifest:").bold(), report.url);
    println!("  Transfer format: {}", report.transfer_format);
    println!("  Window type: {}", report.window_type);
    println!("  Window start: {}", format_epoch_ms(report.time.window_start_time));
    println!("  Window end: {}", format_epoch_ms(report.time.window_end_time));
    if let Some(length) = report.window_length_seconds {
        println!("  Window length: {length:.0}s");
    }
    if let Some(error) = &report.parse_error {
        println!("  {} {error}", style("Parse error:").red().bold());
    }

    if window_type.is_live() {
        println!();
        print_rows(
            &capability_rows(report.time.window_start_time, report.time.window_end_time),
            format,
        )?;
    }
    Ok(())
}

/// Capability table for a live window given in epoch milliseconds
pub fn window(
    start_ms: f64,
    end_ms: f64,
    at_ms: Option<f64>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if end_ms < start_ms {
        bail!("window end {end_ms} is before its start {start_ms}");
    }
    if format != OutputFormat::Json {
        println!(
            "{} {} to {} ({:.0}s)",
            style("Window:").bold(),
            format_epoch_ms(Some(start_ms)),
            format_epoch_ms(Some(end_ms)),
            (end_ms - start_ms) / 1000.0
        );
        if let Some(at) = at_ms {
            println!(
                "  {} is video time {}s",
                format_epoch_ms(Some(at)),
                convert_to_video_time(at, start_ms)
            );
        }
    }
    print_rows(&capability_rows(Some(start_ms), Some(end_ms)), format)
}

/// Inputs of a scripted simulation
#[derive(Debug)]
pub struct SimulateOptions {
    pub urls: Vec<String>,
    pub config: Option<PathBuf>,
    pub strategy: Option<StrategyKind>,
    pub window_type: WindowType,
    pub window: (Option<f64>, Option<f64>),
    pub start: Option<f64>,
    pub script: String,
}

#[derive(Debug, Serialize, Tabled)]
struct TimelineRow {
    at_ms: u64,
    step: String,
    event: String,
}

enum Step {
    Advance(u64),
    Element(ElementEvent),
    Play,
    Pause,
    Seek(f64),
    SetTime(f64),
}

fn parse_step(step: &str) -> anyhow::Result<Step> {
    if let Some(delta) = step.strip_prefix('+') {
        return Ok(Step::Advance(delta.parse().with_context(|| format!("bad delay in '{step}'"))?));
    }
    if let Some((name, value)) = step.split_once(':') {
        let value: f64 = value.parse().with_context(|| format!("bad number in '{step}'"))?;
        return match name {
            "seek" => Ok(Step::Seek(value)),
            "time" => Ok(Step::SetTime(value)),
            other => bail!("unknown step '{other}'"),
        };
    }
    let event = match step {
        "play" => return Ok(Step::Play),
        "pause" => return Ok(Step::Pause),
        "metadata" => ElementEvent::LoadedMetadata,
        "canplay" => ElementEvent::CanPlay,
        "playing" => ElementEvent::Playing,
        "waiting" => ElementEvent::Waiting,
        "seeking" => ElementEvent::Seeking,
        "seeked" => ElementEvent::Seeked,
        "paused" => ElementEvent::Pause,
        "ended" => ElementEvent::Ended,
        "timeupdate" => ElementEvent::TimeUpdate,
        "error" => ElementEvent::Error,
        other => bail!("unknown step '{other}'"),
    };
    Ok(Step::Element(event))
}

fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::StateChange(change) => {
            let mut text = change.state.to_string();
            if let Some(trigger) = change.trigger {
                text.push_str(&format!(" trigger={trigger:?}"));
            }
            if let Some(seeking) = change.is_seeking {
                text.push_str(&format!(" seeking={seeking}"));
            }
            if let Some(error) = &change.error {
                text.push_str(&format!(" error={} ({})", error.message, error.code));
            }
            if change.end_of_stream {
                text.push_str(" end_of_stream");
            }
            text
        }
        SessionEvent::TimeUpdate { current_time, .. } => format!("time {current_time:?}"),
        SessionEvent::Ready => "ready".to_string(),
        SessionEvent::InitFailed { code, message } => format!("init failed {code}: {message}"),
    }
}

struct Simulation {
    session: PlayerSession,
    element: ElementHandle,
    clock: Arc<ManualClock>,
    manifest: Option<ManifestData>,
    rows: Vec<TimelineRow>,
}

impl Simulation {
    fn record(&mut self, step: &str) {
        self.answer_manifest_requests();
        let at_ms = self.clock.now_ms();
        for event in self.session.take_events() {
            self.rows.push(TimelineRow {
                at_ms,
                step: step.to_string(),
                event: describe(&event),
            });
        }
    }

    fn answer_manifest_requests(&mut self) {
        for request in self.session.take_manifest_requests() {
            debug!(
                url = %request.url,
                generation = request.generation,
                "Answering manifest request"
            );
            let result = self
                .manifest
                .clone()
                .ok_or_else(|| kino_playback::Error::ManifestFetch(request.url.clone()));
            self.session.complete_manifest_load(request.generation, result);
        }
    }

    fn run_step(&mut self, step: Step) -> kino_playback::Result<()> {
        match step {
            Step::Advance(delta) => drive_for(&mut self.session, &self.clock, delta),
            Step::Element(event) => self.session.handle_host_event(DeviceEvent::Element(event)),
            Step::Play => self.session.play()?,
            Step::Pause => self.session.pause(PauseRequest::default())?,
            Step::Seek(seconds) => self.session.set_current_time(seconds)?,
            Step::SetTime(seconds) => self.element.set_current_time(seconds),
        }
        Ok(())
    }
}

fn load_config(options: &SimulateOptions) -> anyhow::Result<PlaybackConfig> {
    let mut config = match &options.config {
        Some(path) => PlaybackConfig::from_file(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?,
        None => PlaybackConfig {
            strategy: StrategyKind::Basic,
            ..PlaybackConfig::default()
        },
    };
    if let Some(strategy) = options.strategy {
        config.strategy = strategy;
    }
    match config.strategy {
        StrategyKind::Basic => {}
        StrategyKind::Native if config.device == DeviceKind::Html5 => {}
        StrategyKind::Native => bail!(
            "simulation drives an HTML5 element, not a {} device",
            config.device
        ),
        StrategyKind::Mse => bail!("simulation supports the basic and native strategies"),
    }
    Ok(config)
}

fn synthetic_manifest(options: &SimulateOptions) -> anyhow::Result<Option<ManifestData>> {
    let (Some(start), Some(end)) = options.window else {
        return Ok(None);
    };
    let url = options.urls.first().map(String::as_str).unwrap_or_default();
    let transfer_format = classify_url(url)?;
    let time = TimeData {
        window_start_time: Some(start),
        window_end_time: Some(end),
        ..TimeData::default()
    };
    Ok(Some(ManifestData::new(time, transfer_format)))
}

/// Run a scripted session and print its timeline
pub fn simulate(options: SimulateOptions, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(&options)?;
    let steps = options
        .script
        .split(',')
        .map(str::trim)
        .filter(|step| !step.is_empty())
        .map(|step| parse_step(step).map(|parsed| (step.to_string(), parsed)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let start_ms = options.window.1.map_or(0, |end| end.max(0.0) as u64);
    let clock = ManualClock::shared(start_ms);
    let mut session = PlayerSession::new(config, clock.clone(), Plugins::new());
    let (element, handle) = SimElement::new();

    let media = MediaDescription {
        kind: MediaKind::Video,
        mime_type: "video/mp4".to_string(),
        urls: options
            .urls
            .iter()
            .enumerate()
            .map(|(index, url)| MediaSourceEntry::new(format!("cdn{index}"), url.clone()))
            .collect(),
        captions: Vec::new(),
        is_uhd: false,
    };
    let init = kino_playback::SessionInit {
        media,
        window_type: options.window_type,
        initial_playback_time: options.start,
        server_date: None,
        subtitles_enabled: false,
    };
    info!(steps = steps.len(), window_type = %options.window_type, "Starting simulation");

    let manifest = synthetic_manifest(&options)?;
    let init_result = session.init(
        init,
        StrategyHost::Device(DeviceHost::Element(Box::new(element))),
    );
    let mut simulation = Simulation {
        session,
        element: handle,
        clock,
        manifest,
        rows: Vec::new(),
    };
    simulation.record("init");
    if let Err(error) = init_result {
        print_rows(&simulation.rows, format)?;
        return Err(error).context("Session could not start");
    }

    for (name, step) in steps {
        if let Err(error) = simulation.run_step(step) {
            simulation.rows.push(TimelineRow {
                at_ms: simulation.clock.now_ms(),
                step: name.clone(),
                event: format!("rejected: {error}"),
            });
        }
        simulation.record(&name);
    }

    print_rows(&simulation.rows, format)?;
    if format != OutputFormat::Json {
        let session = &simulation.session;
        println!(
            "{} current time {:?}, cdn {}, ready {}",
            style("Final:").bold(),
            session.current_time(),
            session.current_cdn().unwrap_or("-"),
            yes_no(session.is_ready())
        );
    }
    simulation.session.tear_down();
    Ok(())
}
