//! Sentinels
//!
//! Periodic checks that compare what the engine should be doing with what it
//! reports, and nudge it back when the two disagree. The first sentinel that
//! acts ends the tick. Corrective sentinels spend from a bounded attempt
//! budget and report a single failure once it is exhausted.

use super::core::{Device, DevicePlayer};
use super::{MediaPlayerEventKind, SourceOptions};
use crate::clock::Interval;
use crate::config::DeviceOverrides;
use crate::PlaybackState;
use tracing::{debug, warn};

const ON_DEMAND_SEEK_SENTINEL_TOLERANCE: f64 = 15.0;
const LIVE_SEEK_SENTINEL_TOLERANCE: f64 = 30.0;
const TIME_CHANGE_THRESHOLD: f64 = 0.2;
const NEAR_END_SECONDS: f64 = 1.0;

/// Sentinel behaviour family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentinelFlavor {
    /// Time "changed" in either direction, zero times distrusted after a seek
    Html5,
    /// Time "advanced" forwards, zero times never count
    Cehtml,
}

/// One sentinel check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentinelKind {
    EnterBuffering,
    ExitBuffering,
    ShouldBeSeeked,
    ShouldBePaused,
    EndOfMedia,
}

impl SentinelFlavor {
    /// Sentinels armed in `state`, in evaluation order
    pub fn sentinels_for(&self, state: PlaybackState) -> &'static [SentinelKind] {
        use SentinelKind::*;
        match (self, state) {
            (_, PlaybackState::Buffering) => &[ExitBuffering],
            (SentinelFlavor::Html5, PlaybackState::Playing) => {
                &[EndOfMedia, ShouldBeSeeked, EnterBuffering]
            }
            (SentinelFlavor::Cehtml, PlaybackState::Playing) => {
                &[ShouldBeSeeked, EndOfMedia, EnterBuffering]
            }
            (SentinelFlavor::Html5, PlaybackState::Paused) => &[ShouldBeSeeked, ShouldBePaused],
            (SentinelFlavor::Cehtml, PlaybackState::Paused) => &[ShouldBePaused, ShouldBeSeeked],
            _ => &[],
        }
    }
}

/// Bounded corrective attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct AttemptBudget {
    maximum: u32,
    count: u32,
}

/// Outcome of spending one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Attempt {
    /// The budget was exhausted by exactly this attempt
    pub report_failure: bool,
    /// The corrective action should run
    pub act: bool,
}

impl AttemptBudget {
    pub fn new(maximum: u32) -> Self {
        Self { maximum, count: 0 }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn next(&mut self) -> Attempt {
        self.count = self.count.saturating_add(1);
        Attempt {
            report_failure: self.count == self.maximum + 1,
            act: self.count <= self.maximum,
        }
    }
}

#[derive(Debug)]
pub(super) struct SentinelState {
    flavor: Option<SentinelFlavor>,
    disabled: bool,
    disable_seek: bool,
    period_ms: u64,
    interval: Interval,
    armed: &'static [SentinelKind],
    interval_number: u32,
    last_time: Option<f64>,
    time_changed: bool,
    near_end: bool,
    enter_buffering_count: u32,
    pub trust_zeroes: bool,
    pub tolerance: f64,
    pub pause: AttemptBudget,
    pub seek: AttemptBudget,
}

impl SentinelState {
    pub fn new(flavor: Option<SentinelFlavor>, overrides: &DeviceOverrides) -> Self {
        Self {
            flavor,
            disabled: overrides.disable_sentinels,
            disable_seek: overrides.disable_seek_sentinel,
            period_ms: overrides.sentinel_interval_ms,
            interval: Interval::new(),
            armed: &[],
            interval_number: 0,
            last_time: None,
            time_changed: false,
            near_end: false,
            enter_buffering_count: 0,
            trust_zeroes: false,
            tolerance: ON_DEMAND_SEEK_SENTINEL_TOLERANCE,
            pause: AttemptBudget::new(overrides.sentinel_maximum_attempts),
            seek: AttemptBudget::new(overrides.sentinel_maximum_attempts),
        }
    }

    /// Apply per-media switches
    pub fn configure(&mut self, options: SourceOptions, live: bool, overrides: &DeviceOverrides) {
        self.disabled = options.disable_sentinels || overrides.disable_sentinels;
        self.disable_seek = options.disable_seek_sentinel || overrides.disable_seek_sentinel;
        let default_tolerance = if live {
            LIVE_SEEK_SENTINEL_TOLERANCE
        } else {
            ON_DEMAND_SEEK_SENTINEL_TOLERANCE
        };
        self.tolerance = overrides.seek_sentinel_tolerance.unwrap_or(default_tolerance);
    }

    /// Replace the armed set with the one for `state`
    pub fn arm(&mut self, state: PlaybackState, now: u64, current_time: Option<f64>) {
        let Some(flavor) = self.flavor else {
            return;
        };
        if self.disabled {
            return;
        }
        let armed = flavor.sentinels_for(state);
        if armed.is_empty() {
            self.clear();
            return;
        }
        if flavor == SentinelFlavor::Cehtml {
            self.pause.reset();
        }
        self.armed = armed;
        self.interval_number = 0;
        self.last_time = current_time;
        self.interval.start(now, self.period_ms);
    }

    pub fn clear(&mut self) {
        self.interval.cancel();
        self.armed = &[];
    }

    pub fn tick(&mut self, now: u64) -> bool {
        self.interval.tick(now)
    }

    pub fn deadline(&self) -> Option<u64> {
        self.interval.deadline()
    }

    pub fn pending(&self) -> usize {
        usize::from(self.interval.is_running())
    }

    pub fn armed(&self) -> &'static [SentinelKind] {
        self.armed
    }
}

impl<D: Device> DevicePlayer<D> {
    /// One sentinel tick
    pub(super) fn run_sentinels(&mut self) {
        let Some(flavor) = self.core.sentinels.flavor else {
            return;
        };
        let new_time = self.device.current_time(&self.core);
        let duration = self.device.duration(&self.core);

        let sentinels = &mut self.core.sentinels;
        sentinels.interval_number += 1;
        let last_time = sentinels.last_time;
        sentinels.time_changed = match flavor {
            SentinelFlavor::Html5 => match (new_time, last_time) {
                (Some(new), Some(last)) => (new - last).abs() > TIME_CHANGE_THRESHOLD,
                _ => false,
            },
            SentinelFlavor::Cehtml => match (new_time, last_time) {
                (Some(new), Some(last)) if new != 0.0 => new > last + TIME_CHANGE_THRESHOLD,
                _ => false,
            },
        };
        let reference = match new_time {
            Some(time) if time != 0.0 => Some(time),
            _ => last_time,
        };
        sentinels.near_end = match (duration, reference) {
            (Some(duration), Some(time)) => duration - time <= NEAR_END_SECONDS,
            _ => false,
        };
        if flavor == SentinelFlavor::Html5 {
            sentinels.last_time = new_time;
        }

        for kind in sentinels.armed() {
            let acted = match kind {
                SentinelKind::EnterBuffering => self.enter_buffering_sentinel(flavor),
                SentinelKind::ExitBuffering => self.exit_buffering_sentinel(flavor),
                SentinelKind::ShouldBeSeeked => self.should_be_seeked_sentinel(flavor),
                SentinelKind::ShouldBePaused => self.should_be_paused_sentinel(),
                SentinelKind::EndOfMedia => self.end_of_media_sentinel(),
            };

            if flavor == SentinelFlavor::Html5
                && self.device.current_time(&self.core).is_some_and(|t| t > 0.0)
            {
                self.core.sentinels.trust_zeroes = false;
            }

            if acted {
                debug!(sentinel = ?kind, "Sentinel acted");
                break;
            }
        }

        if flavor == SentinelFlavor::Cehtml {
            self.core.sentinels.last_time = new_time;
        }
    }

    fn enter_buffering_sentinel(&mut self, flavor: SentinelFlavor) -> bool {
        let current = self.device.current_time(&self.core);
        let sentinels = &mut self.core.sentinels;
        let mut fire = !sentinels.time_changed && !sentinels.near_end;

        match flavor {
            SentinelFlavor::Html5 => {
                if current == Some(0.0) {
                    fire = sentinels.trust_zeroes && fire;
                }
                if fire {
                    sentinels.enter_buffering_count += 1;
                } else {
                    sentinels.enter_buffering_count = 0;
                }
                // a single stalled tick is not enough
                if sentinels.enter_buffering_count == 1 {
                    fire = false;
                }
            }
            SentinelFlavor::Cehtml => {
                fire = fire && sentinels.interval_number > 1;
            }
        }

        if fire {
            self.core.emit(MediaPlayerEventKind::SentinelEnterBuffering, &self.device);
            self.core.to_buffering(&self.device);
            self.core.sentinels.enter_buffering_count = 0;
        }
        fire
    }

    fn exit_buffering_sentinel(&mut self, flavor: SentinelFlavor) -> bool {
        let stalled = flavor == SentinelFlavor::Html5 && self.device.is_stalled_paused();
        if !(stalled || self.core.sentinels.time_changed) {
            return false;
        }
        self.core.emit(MediaPlayerEventKind::SentinelExitBuffering, &self.device);
        self.device.sentinel_exit_buffering(&mut self.core);
        true
    }

    fn should_be_seeked_sentinel(&mut self, flavor: SentinelFlavor) -> bool {
        let Some(seek_time) = self.core.sentinel_seek_time else {
            return false;
        };
        if flavor == SentinelFlavor::Html5 && self.core.sentinels.disable_seek {
            return false;
        }

        let current = self.device.current_time(&self.core);
        let target = match flavor {
            SentinelFlavor::Html5 => seek_time,
            SentinelFlavor::Cehtml => self.core.clamped_time(&self.device, seek_time),
        };
        let tolerance = self.core.sentinels.tolerance;

        match current {
            Some(current) if (current - target).abs() > tolerance => {
                let attempt = self.core.sentinels.seek.next();
                if attempt.report_failure {
                    warn!(target, current, "Seek sentinel gave up");
                    self.core.emit(MediaPlayerEventKind::SentinelSeekFailure, &self.device);
                }
                if attempt.act {
                    self.device.sentinel_seek(target);
                    self.core.emit(MediaPlayerEventKind::SentinelSeek, &self.device);
                }
                attempt.act
            }
            _ => {
                if self.core.sentinels.interval_number < 3 {
                    self.core.sentinel_seek_time = current;
                } else {
                    self.core.sentinel_seek_time = None;
                }
                false
            }
        }
    }

    fn should_be_paused_sentinel(&mut self) -> bool {
        if !self.core.sentinels.time_changed {
            return false;
        }
        let attempt = self.core.sentinels.pause.next();
        if attempt.report_failure {
            warn!("Pause sentinel gave up");
            self.core.emit(MediaPlayerEventKind::SentinelPauseFailure, &self.device);
        }
        if attempt.act {
            self.device.sentinel_pause();
            self.core.emit(MediaPlayerEventKind::SentinelPause, &self.device);
        }
        attempt.act
    }

    fn end_of_media_sentinel(&mut self) -> bool {
        let sentinels = &self.core.sentinels;
        if sentinels.time_changed || !sentinels.near_end {
            return false;
        }
        self.core.emit(MediaPlayerEventKind::SentinelComplete, &self.device);
        if self.core.state() != PlaybackState::Complete {
            self.core.to_complete(&self.device);
        }
        true
    }
}
