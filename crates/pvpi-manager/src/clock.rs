//! Time source for the control loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;

/// Longest uninterrupted sleep of [`SystemClock`].
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Wall clock and sleeping, behind a seam so the state machine can run on
/// simulated time.
pub trait Clock {
    /// Current local time.
    fn now(&self) -> NaiveDateTime;

    /// Sleep for `duration`, returning early once `stop` is set.
    fn sleep(&mut self, duration: Duration, stop: &AtomicBool);
}

/// The host's local clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn sleep(&mut self, duration: Duration, stop: &AtomicBool) {
        let mut remaining = duration;
        while !remaining.is_zero() && !stop.load(Ordering::SeqCst) {
            let slice = remaining.min(SLEEP_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
    }
}

/// A clock that only moves when slept on.
///
/// Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        ManualClock {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, time: NaiveDateTime) {
        *self.now.lock() = time;
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }

    fn sleep(&mut self, duration: Duration, stop: &AtomicBool) {
        if !stop.load(Ordering::SeqCst) {
            self.advance(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_manual_clock_advances_on_sleep() {
        let start = NaiveDateTime::default();
        let mut clock = ManualClock::new(start);
        let stop = AtomicBool::new(false);
        clock.sleep(Duration::from_secs(90), &stop);
        assert_eq!(clock.now() - start, chrono::Duration::seconds(90));

        stop.store(true, Ordering::SeqCst);
        clock.sleep(Duration::from_secs(90), &stop);
        assert_eq!(clock.now() - start, chrono::Duration::seconds(90));
    }

    #[test]
    fn test_system_clock_sleep_stops_early() {
        let stop = AtomicBool::new(true);
        let started = Instant::now();
        SystemClock.sleep(Duration::from_secs(30), &stop);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
