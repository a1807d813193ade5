//! Integration tests for Kino Playback

use kino_playback::clock::drive_for;
use kino_playback::live;
use kino_playback::media_player::{DeviceEvent, DeviceHost, ElementEvent};
use kino_playback::sim::{ElementHandle, SimElement, SimUrlLoader};
use kino_playback::strategy::StrategyHost;
use kino_playback::time::{convert_to_seekable_video_time, convert_to_video_time};
use kino_playback::{
    DeviceKind, LiveSupport, ManifestLoader, ManualClock, MediaDescription, MediaKind,
    MediaSourceEntry, MediaState, PauseRequest, PauseTrigger, PlaybackConfig, PlayerSession,
    PluginEvent, Plugins, RemoteManifestLoader, Scheduled, SessionEvent, SessionInit, StateChange,
    StrategyKind, TransferFormat, WindowType,
};
use std::sync::{Arc, Mutex};

fn media(urls: &[(&str, &str)]) -> MediaDescription {
    MediaDescription {
        kind: MediaKind::Video,
        mime_type: "video/mp4".into(),
        urls: urls
            .iter()
            .map(|(cdn, url)| MediaSourceEntry::new(*cdn, *url))
            .collect(),
        captions: Vec::new(),
        is_uhd: false,
    }
}

fn start_session(
    config: PlaybackConfig,
    init: SessionInit,
    plugins: Plugins,
) -> (PlayerSession, ElementHandle, Arc<ManualClock>) {
    let clock = ManualClock::shared(0);
    let mut session = PlayerSession::new(config, clock.clone(), plugins);
    let (element, handle) = SimElement::new();
    session
        .init(init, StrategyHost::Device(DeviceHost::Element(Box::new(element))))
        .unwrap();
    (session, handle, clock)
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

fn element(session: &mut PlayerSession, event: ElementEvent) {
    session.handle_host_event(DeviceEvent::Element(event));
}

// =============================================================================
// Failover Tests
// =============================================================================

#[test]
fn test_buffering_timeout_fails_over_to_next_cdn() {
    let plugins = Plugins::new();
    let hooks = Arc::new(Mutex::new(Vec::new()));
    let recorded = hooks.clone();
    plugins.register(Arc::new(move |event: &PluginEvent| {
        recorded.lock().unwrap().push(event.name());
    }));

    let config = PlaybackConfig {
        strategy: StrategyKind::Basic,
        ..PlaybackConfig::default()
    };
    let init = SessionInit {
        media: media(&[("cdn-a", "http://a/video.mp4"), ("cdn-b", "http://b/video.mp4")]),
        ..SessionInit::default()
    };
    let (mut session, handle, clock) = start_session(config, init, plugins);

    handle.set_current_time(42.0);
    element(&mut session, ElementEvent::Waiting);
    handle.clear_commands();

    drive_for(&mut session, &clock, 30_000);

    assert_eq!(handle.loaded_url().as_deref(), Some("http://b/video.mp4"));
    assert_eq!(handle.commands(), vec!["seek 42".to_string(), "play".to_string()]);
    assert_eq!(session.current_cdn(), Some("cdn-b"));

    let hooks = hooks.lock().unwrap();
    assert!(hooks.contains(&"on_buffering"));
    assert!(hooks.contains(&"on_error_handled"));
    assert!(!hooks.contains(&"on_fatal_error"));
}

#[test]
fn test_single_source_buffering_timeout_is_fatal() {
    let config = PlaybackConfig {
        strategy: StrategyKind::Basic,
        ..PlaybackConfig::default()
    };
    let init = SessionInit {
        media: media(&[("cdn-a", "http://a/video.mp4")]),
        ..SessionInit::default()
    };
    let (mut session, _handle, clock) = start_session(config, init, Plugins::new());
    element(&mut session, ElementEvent::Waiting);
    session.take_events();

    drive_for(&mut session, &clock, 30_000);

    let changes = state_changes(&mut session);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].state, MediaState::FatalError);
    assert_eq!(changes[0].is_buffering_timeout_error, Some(true));
    assert_eq!(changes[0].error.as_ref().map(|error| error.code), Some(8));
    assert_eq!(session.pending_timers(), 0);
}

// =============================================================================
// Native Strategy Tests
// =============================================================================

#[test]
fn test_native_html5_session_states() {
    let config = PlaybackConfig {
        strategy: StrategyKind::Native,
        device: DeviceKind::Html5,
        ..PlaybackConfig::default()
    };
    let init = SessionInit {
        media: media(&[("cdn-a", "http://a/video.mp4")]),
        ..SessionInit::default()
    };
    let (mut session, handle, _clock) = start_session(config, init, Plugins::new());
    assert_eq!(handle.loaded_url().as_deref(), Some("http://a/video.mp4"));

    element(&mut session, ElementEvent::LoadedMetadata);
    element(&mut session, ElementEvent::Playing);
    session.pause(PauseRequest::default()).unwrap();

    let changes = state_changes(&mut session);
    let states: Vec<_> = changes.iter().map(|change| change.state).collect();
    assert_eq!(states, vec![MediaState::Waiting, MediaState::Playing, MediaState::Paused]);
    assert_eq!(changes[2].trigger, Some(PauseTrigger::User));
    assert!(session.is_paused());
}

#[test]
fn test_mismatched_device_host_fails_init() {
    let config = PlaybackConfig {
        strategy: StrategyKind::Native,
        device: DeviceKind::SamsungMaple,
        ..PlaybackConfig::default()
    };
    let mut session = PlayerSession::new(config, ManualClock::shared(0), Plugins::new());
    let (element, _) = SimElement::new();
    let init = SessionInit {
        media: media(&[("cdn-a", "http://a/video.mp4")]),
        ..SessionInit::default()
    };

    let result = session.init(init, StrategyHost::Device(DeviceHost::Element(Box::new(element))));
    assert!(result.is_err());
    assert!(matches!(
        session.take_events().as_slice(),
        [SessionEvent::InitFailed { .. }]
    ));
}

// =============================================================================
// Manifest Tests
// =============================================================================

#[test]
fn test_remote_loader_feeds_live_session() {
    let urls = SimUrlLoader::new()
        .with("http://a/ch/master.m3u8", "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1000\nvideo.m3u8\n")
        .with(
            "http://a/ch/video.m3u8",
            "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-PROGRAM-DATE-TIME:1970-01-01T00:01:40Z\n\
            #EXTINF:4.0,\ns1.ts\n#EXTINF:4.0,\ns2.ts\n",
        );
    let loader = RemoteManifestLoader::new(urls);

    let config = PlaybackConfig {
        strategy: StrategyKind::Basic,
        ..PlaybackConfig::default()
    };
    let init = SessionInit {
        media: media(&[("cdn-a", "http://a/ch/master.m3u8")]),
        window_type: WindowType::Sliding,
        initial_playback_time: Some(104_000.0),
        ..SessionInit::default()
    };
    let (mut session, handle, _clock) = start_session(config, init, Plugins::new());

    let requests = session.take_manifest_requests();
    assert_eq!(requests.len(), 1);
    let result = tokio_test::block_on(loader.load(&requests[0].url, requests[0].options));
    assert_eq!(result.as_ref().map(|data| data.transfer_format).ok(), Some(TransferFormat::Hls));
    session.complete_manifest_load(requests[0].generation, result);

    assert!(session.is_initialised());
    assert_eq!(handle.commands(), vec!["seek 4".to_string(), "play".to_string()]);
    let window = session.live_window_data().unwrap();
    assert_eq!(window.window_start_time, Some(100_000.0));
    assert_eq!(window.window_end_time, Some(108_000.0));
    // an eight second window is too short to seek or pause in
    assert!(!session.can_seek());
    assert!(!session.can_pause());
}

// =============================================================================
// Live Window Tests
// =============================================================================

#[test]
fn test_time_conversions() {
    assert_eq!(convert_to_video_time(1_061_500.0, 1_000_000.0), 61.0);
    assert_eq!(convert_to_seekable_video_time(1_000_000.0, 1_000_000.0), 0.1);
    assert_eq!(convert_to_seekable_video_time(999_000.0, 1_000_000.0), 0.1);
}

#[test]
fn test_live_capabilities() {
    let start = Some(0.0);
    let long = Some(7_200_000.0);
    let short = Some(200_000.0);

    assert!(live::can_seek(start, long, LiveSupport::Seekable, StrategyKind::Native, None));
    assert!(!live::can_seek(start, short, LiveSupport::Seekable, StrategyKind::Native, None));
    assert!(!live::can_seek(start, long, LiveSupport::Playable, StrategyKind::Native, None));
    assert!(live::can_pause(start, long, LiveSupport::Restartable));
    assert!(!live::can_pause(start, long, LiveSupport::Playable));
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
fn test_config_from_json() {
    let config = PlaybackConfig::from_json(
        r#"{"strategy": "native", "device": "cehtml", "live_support": "restartable"}"#,
    )
    .unwrap();
    assert_eq!(config.strategy, StrategyKind::Native);
    assert_eq!(config.device, DeviceKind::Cehtml);
    assert_eq!(config.effective_live_support(), LiveSupport::Restartable);
    assert_eq!(config.timeouts.initial_buffering_ms, 30_000);

    let basic = PlaybackConfig {
        strategy: StrategyKind::Basic,
        live_support: LiveSupport::None,
        ..PlaybackConfig::default()
    };
    assert_eq!(basic.effective_live_support(), LiveSupport::Seekable);
}

#[test]
fn test_invalid_config_is_rejected() {
    let result = PlaybackConfig::from_json(r#"{"timeouts": {"buffering_ms": 0}}"#);
    assert!(result.is_err());
}
