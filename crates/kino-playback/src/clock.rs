//! Clock and timer slots
//!
//! The playback core never sleeps. Components keep their timers as deadline
//! slots measured against a shared [`Clock`], report the earliest deadline they
//! own, and fire whatever is due when polled. A host (the tokio driver, a test,
//! a simulation) decides when to poll.

use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of wall-clock time in epoch milliseconds
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> u64;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// System wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Shared handle starting at `start_ms`
    pub fn shared(start_ms: u64) -> Arc<Self> {
        Arc::new(Self::new(start_ms))
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// One-shot timer slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeout {
    deadline: Option<u64>,
}

impl Timeout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer to fire `delay_ms` after `now`
    pub fn start(&mut self, now: u64, delay_ms: u64) {
        self.deadline = Some(now.saturating_add(delay_ms));
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    /// Disarm and return true if the deadline has passed
    pub fn fire(&mut self, now: u64) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Periodic timer slot
///
/// Fires at most once per poll; a late poll does not replay missed periods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interval {
    next: Option<u64>,
    period_ms: u64,
}

impl Interval {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, now: u64, period_ms: u64) {
        self.period_ms = period_ms.max(1);
        self.next = Some(now.saturating_add(self.period_ms));
    }

    pub fn cancel(&mut self) {
        self.next = None;
    }

    pub fn is_running(&self) -> bool {
        self.next.is_some()
    }

    pub fn deadline(&self) -> Option<u64> {
        self.next
    }

    /// Return true if a tick is due and schedule the following one
    pub fn tick(&mut self, now: u64) -> bool {
        match self.next {
            Some(next) if next <= now => {
                self.next = Some(next.saturating_add(self.period_ms).max(now.saturating_add(1)));
                true
            }
            _ => false,
        }
    }
}

/// Earliest of two optional deadlines
pub fn earliest(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// A component owning timer slots
pub trait Scheduled {
    /// Earliest pending deadline, if any
    fn next_deadline(&self) -> Option<u64>;

    /// Fire every timer due at the clock's current time
    fn poll_timers(&mut self);

    /// Number of armed timer slots
    fn pending_timers(&self) -> usize;
}

/// Fire due timers in deadline order until `until`, then park the clock there
///
/// Each deadline is reached exactly: the clock is set to it before polling, so
/// timers armed while handling one deadline are honoured in the same run.
pub fn drive_until<S: Scheduled + ?Sized>(target: &mut S, clock: &ManualClock, until: u64) {
    while let Some(deadline) = target.next_deadline() {
        if deadline > until {
            break;
        }
        if deadline > clock.now_ms() {
            clock.set(deadline);
        }
        target.poll_timers();
    }
    if until > clock.now_ms() {
        clock.set(until);
    }
}

/// [`drive_until`] relative to the clock's current time
pub fn drive_for<S: Scheduled + ?Sized>(target: &mut S, clock: &ManualClock, delta_ms: u64) {
    let until = clock.now_ms().saturating_add(delta_ms);
    drive_until(target, clock, until);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Ticker {
        interval: Interval,
        timeout: Timeout,
        ticks: u32,
        fired: bool,
        now: u64,
    }

    impl Scheduled for Ticker {
        fn next_deadline(&self) -> Option<u64> {
            earliest(self.interval.deadline(), self.timeout.deadline())
        }

        fn poll_timers(&mut self) {
            if self.interval.tick(self.now) {
                self.ticks += 1;
            }
            if self.timeout.fire(self.now) {
                self.fired = true;
            }
        }

        fn pending_timers(&self) -> usize {
            usize::from(self.interval.is_running()) + usize::from(self.timeout.is_pending())
        }
    }

    #[test]
    fn test_timeout_fires_once() {
        let mut timeout = Timeout::new();
        timeout.start(1_000, 500);
        assert!(!timeout.fire(1_499));
        assert!(timeout.fire(1_500));
        assert!(!timeout.fire(2_000));
        assert!(!timeout.is_pending());
    }

    #[test]
    fn test_interval_reschedules() {
        let mut interval = Interval::new();
        interval.start(0, 1_100);
        assert!(!interval.tick(1_000));
        assert!(interval.tick(1_100));
        assert_eq!(interval.deadline(), Some(2_200));
        interval.cancel();
        assert!(!interval.tick(10_000));
    }

    #[test]
    fn test_drive_until_reaches_each_deadline() {
        let clock = ManualClock::new(0);
        let mut ticker = Ticker::default();
        ticker.interval.start(0, 1_000);
        ticker.timeout.start(0, 2_500);

        // the ticker reads time through `now`, mirror the clock before polling
        struct Synced<'a> {
            ticker: &'a mut Ticker,
            clock: &'a ManualClock,
        }
        impl Scheduled for Synced<'_> {
            fn next_deadline(&self) -> Option<u64> {
                self.ticker.next_deadline()
            }
            fn poll_timers(&mut self) {
                self.ticker.now = self.clock.now_ms();
                self.ticker.poll_timers();
            }
            fn pending_timers(&self) -> usize {
                self.ticker.pending_timers()
            }
        }

        let mut synced = Synced {
            ticker: &mut ticker,
            clock: &clock,
        };
        drive_until(&mut synced, &clock, 3_000);
        assert_eq!(clock.now_ms(), 3_000);
        assert_eq!(ticker.ticks, 3);
        assert!(ticker.fired);
        assert_eq!(ticker.pending_timers(), 1);
    }

    #[test]
    fn test_earliest() {
        assert_eq!(earliest(Some(3), Some(2)), Some(2));
        assert_eq!(earliest(None, Some(2)), Some(2));
        assert_eq!(earliest(None, None), None);
    }
}
