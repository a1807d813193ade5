//! Detects when a session first has something meaningful to show

use crate::player_component::StateUpdate;
use crate::{LiveSupport, MediaState, SeekableRange, WindowType};

/// Fires once, on the first update showing playback is under way
#[derive(Debug, Clone)]
pub struct ReadyHelper {
    initial_playback_time: Option<f64>,
    window_type: WindowType,
    live_support: LiveSupport,
    ready: bool,
}

impl ReadyHelper {
    pub fn new(
        initial_playback_time: Option<f64>,
        window_type: WindowType,
        live_support: LiveSupport,
    ) -> Self {
        Self {
            initial_playback_time,
            window_type,
            live_support,
            ready: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// True exactly once, for the update that made the session ready
    pub fn observe(&mut self, update: &StateUpdate) -> bool {
        if self.ready {
            return false;
        }
        self.ready = if update.time_update {
            self.is_valid_time(update)
        } else {
            update.state != Some(MediaState::FatalError) && self.is_valid_time(update)
        };
        self.ready
    }

    fn is_valid_time(&self, update: &StateUpdate) -> bool {
        if self.window_type == WindowType::Static {
            return self.is_valid_static_time(update.current_time);
        }
        match update.seekable_range {
            Some(range) => self.is_valid_live_time(update.current_time, range),
            None => false,
        }
    }

    fn is_valid_static_time(&self, current_time: Option<f64>) -> bool {
        let Some(time) = current_time else {
            return false;
        };
        match self.initial_playback_time {
            Some(initial) if initial != 0.0 => time > 0.0,
            _ => time >= 0.0,
        }
    }

    fn is_valid_live_time(&self, current_time: Option<f64>, range: SeekableRange) -> bool {
        if self.live_support == LiveSupport::Playable {
            return current_time.is_some_and(|time| time > 0.0);
        }
        !range.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(
        state: Option<MediaState>,
        current_time: Option<f64>,
        range: Option<SeekableRange>,
    ) -> StateUpdate {
        StateUpdate {
            state,
            current_time,
            seekable_range: range,
            duration: 0.0,
            time_update: state.is_none(),
            is_buffering_timeout_error: false,
            error: None,
        }
    }

    #[test]
    fn test_static_from_start_is_ready_at_zero() {
        let mut helper = ReadyHelper::new(None, WindowType::Static, LiveSupport::Seekable);
        assert!(!helper.observe(&update(Some(MediaState::Waiting), None, None)));
        assert!(helper.observe(&update(Some(MediaState::Playing), Some(0.0), None)));
        assert!(!helper.observe(&update(Some(MediaState::Playing), Some(1.0), None)));
        assert!(helper.is_ready());
    }

    #[test]
    fn test_static_with_start_time_waits_for_positive_time() {
        let mut helper = ReadyHelper::new(Some(30.0), WindowType::Static, LiveSupport::Seekable);
        assert!(!helper.observe(&update(None, Some(0.0), None)));
        assert!(helper.observe(&update(None, Some(30.0), None)));
    }

    #[test]
    fn test_fatal_error_is_never_ready() {
        let mut helper = ReadyHelper::new(None, WindowType::Static, LiveSupport::Seekable);
        assert!(!helper.observe(&update(Some(MediaState::FatalError), Some(5.0), None)));
        assert!(!helper.is_ready());
    }

    #[test]
    fn test_live_needs_non_empty_range() {
        let mut helper = ReadyHelper::new(None, WindowType::Sliding, LiveSupport::Seekable);
        assert!(!helper.observe(&update(Some(MediaState::Waiting), Some(10.0), None)));
        assert!(!helper.observe(&update(None, Some(10.0), Some(SeekableRange::default()))));
        assert!(helper.observe(&update(None, Some(10.0), Some(SeekableRange::new(0.0, 7200.0)))));
    }

    #[test]
    fn test_playable_live_needs_positive_time() {
        let mut helper = ReadyHelper::new(None, WindowType::Growing, LiveSupport::Playable);
        let range = Some(SeekableRange::new(0.0, 7200.0));
        assert!(!helper.observe(&update(None, Some(0.0), range)));
        assert!(helper.observe(&update(None, Some(0.5), range)));
    }
}
