//! Live window decorators
//!
//! Handles:
//! - Wrapping a device player for the declared live support tier
//! - Seek and pause capability of a live window
//! - Auto-resume of a pause held near the start of a sliding window
//!
//! A decorator owns the player it wraps and offers the same [`MediaPlayer`]
//! contract. Events of the wrapped player are pulled into the decorator's own
//! queue after every call, so timers armed by the decorator only observe
//! events raised after they were armed.

mod playable;
mod restartable;
mod seekable;

pub use self::playable::PlayableLivePlayer;
pub use self::restartable::{FakeClock, RestartableLivePlayer};
pub use self::seekable::SeekableLivePlayer;

use crate::clock::{SharedClock, Timeout};
use crate::config::{DeviceOverrides, StrategyKind};
use crate::manifest::TimeData;
use crate::media_player::{MediaPlayer, MediaPlayerEvent, MediaPlayerEventKind};
use crate::{Error, LiveSupport, MediaState, PlaybackState, Result, SeekableRange, WindowType};
use tracing::debug;

/// A pause this close to the start of the window is resumed automatically
pub const AUTO_RESUME_WINDOW_START_CUSHION_SECONDS: f64 = 8.0;

/// Windows shorter than this cannot be seeked or paused
const FOUR_MINUTES_SECONDS: f64 = 240.0;

fn window_is_big_enough_for_seeking(
    window_start_ms: Option<f64>,
    window_end_ms: Option<f64>,
) -> bool {
    match (window_start_ms, window_end_ms) {
        (Some(start), Some(end)) => {
            (end / 1000.0).floor() - (start / 1000.0).floor() > FOUR_MINUTES_SECONDS
        }
        _ => false,
    }
}

fn supports_seeking(live_support: LiveSupport, strategy: StrategyKind) -> bool {
    live_support == LiveSupport::Seekable
        || (live_support == LiveSupport::Restartable && strategy == StrategyKind::Native)
}

fn supports_pause(live_support: LiveSupport) -> bool {
    matches!(live_support, LiveSupport::Seekable | LiveSupport::Restartable)
}

/// Whether a live window may be seeked
pub fn can_seek(
    window_start_ms: Option<f64>,
    window_end_ms: Option<f64>,
    live_support: LiveSupport,
    strategy: StrategyKind,
    seekable_range: Option<SeekableRange>,
) -> bool {
    let finite_range = seekable_range.map_or(true, |range| range.end.is_finite());
    supports_seeking(live_support, strategy)
        && window_is_big_enough_for_seeking(window_start_ms, window_end_ms)
        && finite_range
}

/// Whether a live window may be paused
pub fn can_pause(
    window_start_ms: Option<f64>,
    window_end_ms: Option<f64>,
    live_support: LiveSupport,
) -> bool {
    supports_pause(live_support) && window_is_big_enough_for_seeking(window_start_ms, window_end_ms)
}

/// Seconds until a pause at `current_time` falls off the start of `range`
pub fn auto_resume_delay_seconds(current_time: f64, range: SeekableRange) -> f64 {
    (current_time - range.start - AUTO_RESUME_WINDOW_START_CUSHION_SECONDS).max(0.0)
}

/// `Some(true)` when a state event shows the player left PAUSED
///
/// Status events carry no state change and answer `None`.
pub fn unpaused_event_check(event: &MediaPlayerEvent) -> Option<bool> {
    if event.kind == MediaPlayerEventKind::Status {
        None
    } else {
        Some(event.state != PlaybackState::Paused)
    }
}

/// Resume timer armed by a pause in a sliding window
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoResume {
    timer: Timeout,
}

impl AutoResume {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a resume before `current_time` leaves `range`
    pub fn arm(&mut self, now: u64, current_time: Option<f64>, range: Option<SeekableRange>) {
        let delay = match (current_time, range) {
            (Some(time), Some(range)) => auto_resume_delay_seconds(time, range),
            _ => 0.0,
        };
        debug!(delay, "Auto-resume scheduled");
        self.timer.start(now, (delay * 1000.0).round() as u64);
    }

    /// Cancel the resume when an observed event left PAUSED
    pub fn observe(&mut self, event: &MediaPlayerEvent) {
        if self.timer.is_pending() && unpaused_event_check(event) == Some(true) {
            debug!(state = %event.state, "Auto-resume cancelled");
            self.timer.cancel();
        }
    }

    /// Cancel the resume when a strategy published anything but PAUSED
    pub fn observe_state(&mut self, state: MediaState) {
        if self.timer.is_pending() && state != MediaState::Paused {
            debug!(%state, "Auto-resume cancelled");
            self.timer.cancel();
        }
    }

    pub fn cancel(&mut self) {
        self.timer.cancel();
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_pending()
    }

    pub fn deadline(&self) -> Option<u64> {
        self.timer.deadline()
    }

    /// True once when the resume is due
    pub fn fire(&mut self, now: u64) -> bool {
        self.timer.fire(now)
    }
}

/// Wrap a device player for the live support tier of a live window
///
/// Static windows are returned untouched. A live window with no live
/// support is a configuration error.
pub fn wrap_for_live(
    player: Box<dyn MediaPlayer>,
    live_support: LiveSupport,
    window_type: WindowType,
    time: TimeData,
    clock: SharedClock,
    overrides: &DeviceOverrides,
) -> Result<Box<dyn MediaPlayer>> {
    if !window_type.is_live() {
        return Ok(player);
    }
    let force_end = overrides.force_begin_playback_to_end_of_window;
    debug!(%live_support, %window_type, "Wrapping player for live playback");
    let wrapped: Box<dyn MediaPlayer> = match live_support {
        LiveSupport::None => {
            return Err(Error::InvalidConfig(
                "Cannot create a none live support player".into(),
            ))
        }
        LiveSupport::Playable => Box::new(PlayableLivePlayer::new(player)),
        LiveSupport::Restartable => Box::new(RestartableLivePlayer::new(
            player,
            window_type,
            time,
            clock,
            force_end,
        )),
        LiveSupport::Seekable => Box::new(SeekableLivePlayer::new(
            player,
            window_type,
            clock,
            force_end,
        )),
    };
    Ok(wrapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::media_player::{DevicePlayer, Html5};
    use crate::sim::SimElement;

    fn event(kind: MediaPlayerEventKind, state: PlaybackState) -> MediaPlayerEvent {
        MediaPlayerEvent {
            kind,
            state,
            current_time: None,
            seekable_range: None,
            duration: None,
            url: None,
            mime_type: None,
            message: None,
            error: None,
        }
    }

    #[test]
    fn test_window_must_exceed_four_minutes() {
        let seekable = LiveSupport::Seekable;
        assert!(!can_seek(Some(0.0), Some(240_000.0), seekable, StrategyKind::Mse, None));
        assert!(can_seek(Some(0.0), Some(241_000.0), seekable, StrategyKind::Mse, None));
        assert!(!can_pause(None, Some(600_000.0), LiveSupport::Seekable));
    }

    #[test]
    fn test_restartable_seeks_only_natively() {
        let range = Some(SeekableRange::new(0.0, 600.0));
        let restartable = LiveSupport::Restartable;
        assert!(can_seek(Some(0.0), Some(600_000.0), restartable, StrategyKind::Native, range));
        assert!(!can_seek(Some(0.0), Some(600_000.0), restartable, StrategyKind::Mse, range));
        assert!(can_pause(Some(0.0), Some(600_000.0), LiveSupport::Restartable));
        assert!(!can_pause(Some(0.0), Some(600_000.0), LiveSupport::Playable));
    }

    #[test]
    fn test_infinite_range_cannot_seek() {
        let range = Some(SeekableRange::new(0.0, f64::INFINITY));
        let seekable = LiveSupport::Seekable;
        assert!(!can_seek(Some(0.0), Some(600_000.0), seekable, StrategyKind::Mse, range));
    }

    #[test]
    fn test_auto_resume_delay() {
        assert_eq!(auto_resume_delay_seconds(100.0, SeekableRange::new(95.0, 200.0)), 0.0);
        assert_eq!(auto_resume_delay_seconds(100.0, SeekableRange::new(50.0, 200.0)), 42.0);
    }

    #[test]
    fn test_auto_resume_cancelled_by_unpaused_event() {
        let mut resume = AutoResume::new();
        resume.arm(0, Some(100.0), Some(SeekableRange::new(0.0, 200.0)));
        assert_eq!(resume.deadline(), Some(92_000));

        resume.observe(&event(MediaPlayerEventKind::Status, PlaybackState::Playing));
        resume.observe(&event(MediaPlayerEventKind::Paused, PlaybackState::Paused));
        assert!(resume.is_pending());

        resume.observe(&event(MediaPlayerEventKind::Buffering, PlaybackState::Buffering));
        assert!(!resume.is_pending());
    }

    #[test]
    fn test_none_live_support_is_rejected() {
        let clock = ManualClock::shared(0);
        let (element, _) = SimElement::new();
        let overrides = DeviceOverrides::default();
        let player: Box<dyn MediaPlayer> = Box::new(DevicePlayer::new(
            Html5::new(Box::new(element), clock.clone(), &overrides),
            clock.clone(),
            overrides,
        ));
        let result = wrap_for_live(
            player,
            LiveSupport::None,
            WindowType::Sliding,
            TimeData::default(),
            clock,
            &DeviceOverrides::default(),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
