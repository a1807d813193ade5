//! Simulated host engines
//!
//! In-memory stand-ins for the engines a device player drives. Each engine is
//! paired with a cloneable handle sharing its state, so a test or a scripted
//! simulation can move time, change what the engine reports, and read back
//! the commands the player issued.
//!
//! The engines never raise events on their own: the caller feeds the
//! matching [`DeviceEvent`](crate::media_player::DeviceEvent)s to the player.

use crate::manifest::UrlLoader;
use crate::media_player::{CehtmlObject, MaplePlugin, SefArg, SefPlugin, VideoElement};
use crate::strategy::{DashEngine, DvrInfo};
use crate::{Error, MediaError, MediaKind, MediaType, Result, SeekableRange};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// HTML5 element
// ============================================================================

#[derive(Debug)]
struct ElementState {
    url: Option<String>,
    mime_type: Option<String>,
    media_type: Option<MediaType>,
    current_time: f64,
    duration: Option<f64>,
    seekable: Option<SeekableRange>,
    paused: bool,
    error: Option<MediaError>,
    playback_rate: f64,
    commands: Vec<String>,
}

impl Default for ElementState {
    fn default() -> Self {
        Self {
            url: None,
            mime_type: None,
            media_type: None,
            current_time: 0.0,
            duration: None,
            seekable: None,
            paused: true,
            error: None,
            playback_rate: 1.0,
            commands: Vec::new(),
        }
    }
}

/// Simulated `<video>` element
#[derive(Debug)]
pub struct SimElement {
    state: Arc<Mutex<ElementState>>,
}

/// Control side of a [`SimElement`]
#[derive(Debug, Clone)]
pub struct ElementHandle {
    state: Arc<Mutex<ElementState>>,
}

impl SimElement {
    pub fn new() -> (Self, ElementHandle) {
        let state = Arc::new(Mutex::new(ElementState::default()));
        (
            Self { state: state.clone() },
            ElementHandle { state },
        )
    }
}

impl VideoElement for SimElement {
    fn load(&mut self, url: &str, mime_type: &str, media_type: MediaType) {
        let mut state = lock(&self.state);
        state.url = Some(url.to_string());
        state.mime_type = Some(mime_type.to_string());
        state.media_type = Some(media_type);
        state.paused = true;
    }

    fn play(&mut self) {
        let mut state = lock(&self.state);
        state.paused = false;
        state.commands.push("play".to_string());
    }

    fn pause(&mut self) {
        let mut state = lock(&self.state);
        state.paused = true;
        state.commands.push("pause".to_string());
    }

    fn set_current_time(&mut self, seconds: f64) {
        let mut state = lock(&self.state);
        state.current_time = seconds;
        state.commands.push(format!("seek {seconds}"));
    }

    fn current_time(&self) -> f64 {
        lock(&self.state).current_time
    }

    fn duration(&self) -> Option<f64> {
        lock(&self.state).duration
    }

    fn seekable(&self) -> Option<SeekableRange> {
        lock(&self.state).seekable
    }

    fn is_paused(&self) -> bool {
        lock(&self.state).paused
    }

    fn error(&self) -> Option<MediaError> {
        lock(&self.state).error.clone()
    }

    fn set_playback_rate(&mut self, rate: f64) {
        lock(&self.state).playback_rate = rate;
    }

    fn playback_rate(&self) -> f64 {
        lock(&self.state).playback_rate
    }

    fn unload(&mut self) {
        let mut state = lock(&self.state);
        state.url = None;
        state.commands.push("unload".to_string());
    }
}

impl ElementHandle {
    pub fn set_current_time(&self, seconds: f64) {
        lock(&self.state).current_time = seconds;
    }

    pub fn advance(&self, seconds: f64) {
        lock(&self.state).current_time += seconds;
    }

    pub fn current_time(&self) -> f64 {
        lock(&self.state).current_time
    }

    pub fn set_duration(&self, seconds: f64) {
        lock(&self.state).duration = Some(seconds);
    }

    pub fn set_seekable(&self, range: Option<SeekableRange>) {
        lock(&self.state).seekable = range;
    }

    pub fn set_error(&self, error: Option<MediaError>) {
        lock(&self.state).error = error;
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.state).paused
    }

    pub fn loaded_url(&self) -> Option<String> {
        lock(&self.state).url.clone()
    }

    pub fn media_type(&self) -> Option<MediaType> {
        lock(&self.state).media_type
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    pub fn clear_commands(&self) {
        lock(&self.state).commands.clear();
    }
}

// ============================================================================
// CE-HTML object
// ============================================================================

#[derive(Debug, Default)]
struct CehtmlState {
    url: Option<String>,
    play_position_ms: f64,
    play_time_ms: f64,
    error_code: i32,
    commands: Vec<String>,
}

/// Simulated CE-HTML media object
#[derive(Debug)]
pub struct SimCehtml {
    state: Arc<Mutex<CehtmlState>>,
}

/// Control side of a [`SimCehtml`]
#[derive(Debug, Clone)]
pub struct CehtmlHandle {
    state: Arc<Mutex<CehtmlState>>,
}

impl SimCehtml {
    pub fn new() -> (Self, CehtmlHandle) {
        let state = Arc::new(Mutex::new(CehtmlState::default()));
        (
            Self { state: state.clone() },
            CehtmlHandle { state },
        )
    }
}

impl CehtmlObject for SimCehtml {
    fn load(&mut self, url: &str, _mime_type: &str) {
        lock(&self.state).url = Some(url.to_string());
    }

    fn play(&mut self, speed: i32) -> bool {
        lock(&self.state).commands.push(format!("play {speed}"));
        true
    }

    fn stop(&mut self) {
        lock(&self.state).commands.push("stop".to_string());
    }

    fn seek(&mut self, position_ms: f64) -> bool {
        let mut state = lock(&self.state);
        state.play_position_ms = position_ms;
        state.commands.push(format!("seek {position_ms}"));
        true
    }

    fn play_position_ms(&self) -> f64 {
        lock(&self.state).play_position_ms
    }

    fn play_time_ms(&self) -> f64 {
        lock(&self.state).play_time_ms
    }

    fn error_code(&self) -> i32 {
        lock(&self.state).error_code
    }

    fn remove(&mut self) {
        let mut state = lock(&self.state);
        state.url = None;
        state.commands.push("remove".to_string());
    }
}

impl CehtmlHandle {
    pub fn set_play_position_ms(&self, position_ms: f64) {
        lock(&self.state).play_position_ms = position_ms;
    }

    pub fn advance_position_ms(&self, delta_ms: f64) {
        lock(&self.state).play_position_ms += delta_ms;
    }

    pub fn set_play_time_ms(&self, play_time_ms: f64) {
        lock(&self.state).play_time_ms = play_time_ms;
    }

    pub fn set_error_code(&self, code: i32) {
        lock(&self.state).error_code = code;
    }

    pub fn loaded_url(&self) -> Option<String> {
        lock(&self.state).url.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    pub fn clear_commands(&self) {
        lock(&self.state).commands.clear();
    }
}

// ============================================================================
// Samsung Maple plugin
// ============================================================================

#[derive(Debug)]
struct MapleState {
    pause_result: i32,
    jump_result: i32,
    duration_ms: f64,
    screen: (u32, u32),
    commands: Vec<String>,
}

impl Default for MapleState {
    fn default() -> Self {
        Self {
            pause_result: 1,
            jump_result: 1,
            duration_ms: 0.0,
            screen: (1280, 720),
            commands: Vec::new(),
        }
    }
}

/// Simulated Maple player plugin
#[derive(Debug)]
pub struct SimMaple {
    state: Arc<Mutex<MapleState>>,
}

/// Control side of a [`SimMaple`]
#[derive(Debug, Clone)]
pub struct MapleHandle {
    state: Arc<Mutex<MapleState>>,
}

impl SimMaple {
    pub fn new() -> (Self, MapleHandle) {
        let state = Arc::new(Mutex::new(MapleState::default()));
        (
            Self { state: state.clone() },
            MapleHandle { state },
        )
    }

    fn record(&self, command: String) {
        lock(&self.state).commands.push(command);
    }
}

impl MaplePlugin for SimMaple {
    fn play(&mut self, url: &str) -> i32 {
        self.record(format!("play {url}"));
        1
    }

    fn resume_play(&mut self, url: &str, seconds: f64) -> i32 {
        self.record(format!("resume_play {url} {seconds}"));
        1
    }

    fn stop(&mut self) -> i32 {
        self.record("stop".to_string());
        1
    }

    fn pause(&mut self) -> i32 {
        self.record("pause".to_string());
        lock(&self.state).pause_result
    }

    fn resume(&mut self) -> i32 {
        self.record("resume".to_string());
        1
    }

    fn jump_forward(&mut self, seconds: f64) -> i32 {
        self.record(format!("jump_forward {seconds}"));
        lock(&self.state).jump_result
    }

    fn jump_backward(&mut self, seconds: f64) -> i32 {
        self.record(format!("jump_backward {seconds}"));
        lock(&self.state).jump_result
    }

    fn duration_ms(&self) -> f64 {
        lock(&self.state).duration_ms
    }

    fn screen_size(&self) -> (u32, u32) {
        lock(&self.state).screen
    }

    fn set_display_area(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.record(format!("display {x} {y} {width} {height}"));
    }
}

impl MapleHandle {
    pub fn set_pause_result(&self, code: i32) {
        lock(&self.state).pause_result = code;
    }

    pub fn set_jump_result(&self, code: i32) {
        lock(&self.state).jump_result = code;
    }

    pub fn set_duration_ms(&self, duration_ms: f64) {
        lock(&self.state).duration_ms = duration_ms;
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    pub fn clear_commands(&self) {
        lock(&self.state).commands.clear();
    }
}

// ============================================================================
// Samsung SEF plugin
// ============================================================================

#[derive(Debug)]
struct SefState {
    open: Option<String>,
    init_result: i64,
    pause_result: i64,
    jump_result: i64,
    duration_ms: i64,
    live_range: String,
    commands: Vec<String>,
}

impl Default for SefState {
    fn default() -> Self {
        Self {
            open: None,
            init_result: 1,
            pause_result: 1,
            jump_result: 1,
            duration_ms: 0,
            live_range: String::new(),
            commands: Vec::new(),
        }
    }
}

/// Simulated SEF player plugin
#[derive(Debug)]
pub struct SimSef {
    state: Arc<Mutex<SefState>>,
}

/// Control side of a [`SimSef`]
#[derive(Debug, Clone)]
pub struct SefHandle {
    state: Arc<Mutex<SefState>>,
}

impl SimSef {
    pub fn new() -> (Self, SefHandle) {
        let state = Arc::new(Mutex::new(SefState::default()));
        (
            Self { state: state.clone() },
            SefHandle { state },
        )
    }
}

impl SefPlugin for SimSef {
    fn open(&mut self, name: &str, _version: &str, _id: &str) -> bool {
        let mut state = lock(&self.state);
        state.open = Some(name.to_string());
        state.commands.push(format!("open {name}"));
        true
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        state.open = None;
        state.commands.push("close".to_string());
    }

    fn execute(&mut self, command: &str, args: &[SefArg]) -> i64 {
        let mut state = lock(&self.state);
        let mut line = command.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(&arg.to_string());
        }
        state.commands.push(line);

        match command {
            "InitPlayer" => state.init_result,
            "Pause" => state.pause_result,
            "JumpForward" | "JumpBackward" => state.jump_result,
            "GetDuration" => state.duration_ms,
            _ => 1,
        }
    }

    fn query(&mut self, command: &str) -> String {
        let mut state = lock(&self.state);
        state.commands.push(command.to_string());
        state.live_range.clone()
    }
}

impl SefHandle {
    pub fn set_init_result(&self, code: i64) {
        lock(&self.state).init_result = code;
    }

    pub fn set_pause_result(&self, code: i64) {
        lock(&self.state).pause_result = code;
    }

    pub fn set_jump_result(&self, code: i64) {
        lock(&self.state).jump_result = code;
    }

    pub fn set_duration_ms(&self, duration_ms: i64) {
        lock(&self.state).duration_ms = duration_ms;
    }

    /// Range string the plugin reports for live HLS (`a-b` or `a|b`)
    pub fn set_live_range(&self, range: &str) {
        lock(&self.state).live_range = range.to_string();
    }

    pub fn open_plugin(&self) -> Option<String> {
        lock(&self.state).open.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    pub fn clear_commands(&self) {
        lock(&self.state).commands.clear();
    }
}

// ============================================================================
// MSE engine
// ============================================================================

#[derive(Debug)]
struct DashState {
    ready: bool,
    paused: bool,
    duration: f64,
    dvr: Option<DvrInfo>,
    dvr_window_size: f64,
    element_time: Option<f64>,
    playback_rate: f64,
    bitrates: HashMap<MediaKind, f64>,
    quality_bitrates: HashMap<(String, u32), f64>,
    attached: Vec<String>,
    commands: Vec<String>,
}

impl Default for DashState {
    fn default() -> Self {
        Self {
            ready: false,
            paused: true,
            duration: 0.0,
            dvr: None,
            dvr_window_size: 0.0,
            element_time: None,
            playback_rate: 1.0,
            bitrates: HashMap::new(),
            quality_bitrates: HashMap::new(),
            attached: Vec::new(),
            commands: Vec::new(),
        }
    }
}

/// Simulated MSE engine
///
/// Attaching a source autoplays. Manifest refreshes are only recorded: the
/// caller answers them with a `ManifestRefreshed` event.
#[derive(Debug)]
pub struct SimDashEngine {
    state: Arc<Mutex<DashState>>,
}

/// Control side of a [`SimDashEngine`]
#[derive(Debug, Clone)]
pub struct DashHandle {
    state: Arc<Mutex<DashState>>,
}

impl SimDashEngine {
    pub fn new() -> (Self, DashHandle) {
        let state = Arc::new(Mutex::new(DashState::default()));
        (
            Self { state: state.clone() },
            DashHandle { state },
        )
    }
}

impl DashEngine for SimDashEngine {
    fn initialise(&mut self, media_kind: MediaKind) {
        lock(&self.state).commands.push(format!("initialise {media_kind}"));
    }

    fn attach_source(&mut self, url: &str) {
        let mut state = lock(&self.state);
        state.attached.push(url.to_string());
        state.paused = false;
        state.commands.push(format!("attach {url}"));
    }

    fn play(&mut self) {
        let mut state = lock(&self.state);
        state.paused = false;
        state.commands.push("play".to_string());
    }

    fn pause(&mut self) {
        let mut state = lock(&self.state);
        state.paused = true;
        state.commands.push("pause".to_string());
    }

    fn seek(&mut self, seconds: f64) {
        let mut state = lock(&self.state);
        state.element_time = Some(seconds);
        state.commands.push(format!("seek {seconds}"));
    }

    fn is_ready(&self) -> bool {
        lock(&self.state).ready
    }

    fn is_paused(&self) -> bool {
        lock(&self.state).paused
    }

    fn duration(&self) -> f64 {
        lock(&self.state).duration
    }

    fn dvr_info(&self) -> Option<DvrInfo> {
        lock(&self.state).dvr
    }

    fn dvr_window_size(&self) -> f64 {
        lock(&self.state).dvr_window_size
    }

    fn element_current_time(&self) -> Option<f64> {
        lock(&self.state).element_time
    }

    fn refresh_manifest(&mut self) {
        lock(&self.state).commands.push("refresh".to_string());
    }

    fn set_playback_rate(&mut self, rate: f64) {
        lock(&self.state).playback_rate = rate;
    }

    fn playback_rate(&self) -> f64 {
        lock(&self.state).playback_rate
    }

    fn enable_text(&mut self, enabled: bool) {
        lock(&self.state).commands.push(format!("text {enabled}"));
    }

    fn current_bitrate_kbps(&self, media_kind: MediaKind) -> Option<f64> {
        lock(&self.state).bitrates.get(&media_kind).copied()
    }

    fn bitrate_for_quality(&self, media_type: &str, quality: u32) -> Option<f64> {
        lock(&self.state)
            .quality_bitrates
            .get(&(media_type.to_string(), quality))
            .copied()
    }

    fn reset(&mut self) {
        let mut state = lock(&self.state);
        state.ready = false;
        state.paused = true;
        state.element_time = None;
        state.commands.push("reset".to_string());
    }
}

impl DashHandle {
    /// Mark the stream initialised with `duration`
    pub fn set_ready(&self, duration: f64) {
        let mut state = lock(&self.state);
        state.ready = true;
        state.duration = duration;
    }

    pub fn set_dvr(&self, dvr: Option<DvrInfo>) {
        lock(&self.state).dvr = dvr;
    }

    pub fn set_dvr_window_size(&self, seconds: f64) {
        lock(&self.state).dvr_window_size = seconds;
    }

    pub fn set_element_time(&self, seconds: Option<f64>) {
        lock(&self.state).element_time = seconds;
    }

    pub fn advance(&self, seconds: f64) {
        let mut state = lock(&self.state);
        state.element_time = Some(state.element_time.unwrap_or(0.0) + seconds);
        if let Some(dvr) = state.dvr.as_mut() {
            dvr.time += seconds;
        }
    }

    pub fn set_bitrate(&self, media_kind: MediaKind, kbps: f64) {
        lock(&self.state).bitrates.insert(media_kind, kbps);
    }

    pub fn set_quality_bitrate(&self, media_type: &str, quality: u32, kbps: f64) {
        lock(&self.state)
            .quality_bitrates
            .insert((media_type.to_string(), quality), kbps);
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.state).paused
    }

    /// Source urls attached so far, anchors included
    pub fn attached(&self) -> Vec<String> {
        lock(&self.state).attached.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    pub fn clear_commands(&self) {
        lock(&self.state).commands.clear();
    }
}

// ============================================================================
// Url loader
// ============================================================================

/// Canned url responses for manifest loads
///
/// Unknown urls fail the way an unreachable host does.
#[derive(Debug, Default)]
pub struct SimUrlLoader {
    responses: HashMap<String, String>,
    requests: Mutex<Vec<String>>,
}

impl SimUrlLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `body`
    pub fn with(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.responses.insert(url.into(), body.into());
        self
    }

    /// Urls requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl UrlLoader for SimUrlLoader {
    async fn load_text(&self, url: &str) -> Result<String> {
        lock(&self.requests).push(url.to_string());
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| Error::ManifestFetch(format!("{url} is unreachable")))
    }
}
