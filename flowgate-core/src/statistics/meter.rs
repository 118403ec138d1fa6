//! Throughput rate meters.
//!
//! An exponentially-weighted moving average per window, ticked every
//! [`TICK_INTERVAL`] by the pipeline's statistics timer. Updates only bump a
//! delta counter; the tick folds the delta into the rate, so the hot path is
//! a single atomic add.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// Period of the statistics tick that drives every meter.
pub const TICK_INTERVAL: Duration = Duration::from_secs(5);

const TICK_SECONDS: f64 = 5.0;

/// One EWMA at a fixed decay window.
struct Ewma {
    alpha: f64,
    uncounted: AtomicU64,
    /// Events per second; None until the first tick.
    rate: Mutex<Option<f64>>,
}

impl Ewma {
    fn new(window_minutes: f64) -> Self {
        Self {
            alpha: 1.0 - (-TICK_SECONDS / 60.0 / window_minutes).exp(),
            uncounted: AtomicU64::new(0),
            rate: Mutex::new(None),
        }
    }

    fn update(&self, n: u64) {
        self.uncounted.fetch_add(n, Ordering::Relaxed);
    }

    fn tick(&self) {
        let count = self.uncounted.swap(0, Ordering::Relaxed);
        let instant_rate = count as f64 / TICK_SECONDS;
        let mut rate = self.rate.lock();
        *rate = Some(match *rate {
            Some(previous) => previous + self.alpha * (instant_rate - previous),
            None => instant_rate,
        });
    }

    fn rate(&self) -> Option<f64> {
        *self.rate.lock()
    }
}

/// Event counter plus 1/5/15-minute EWMA rates.
pub struct RateMeter {
    count: AtomicU64,
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
}

impl RateMeter {
    /// Create a meter with no recorded events.
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            m1: Ewma::new(1.0),
            m5: Ewma::new(5.0),
            m15: Ewma::new(15.0),
        }
    }

    /// Record one event.
    pub fn mark(&self) {
        self.mark_n(1);
    }

    /// Record `n` events.
    pub fn mark_n(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
        self.m1.update(n);
        self.m5.update(n);
        self.m15.update(n);
    }

    /// Total events recorded.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Fold pending deltas into the rates. Driven by the statistics timer.
    pub(crate) fn tick(&self) {
        self.m1.tick();
        self.m5.tick();
        self.m15.tick();
    }

    /// Events/second over the 1-minute window; None before the first tick.
    pub fn rate1(&self) -> Option<f64> {
        self.m1.rate()
    }

    /// Events/second over the 5-minute window; None before the first tick.
    pub fn rate5(&self) -> Option<f64> {
        self.m5.rate()
    }

    /// Events/second over the 15-minute window; None before the first tick.
    pub fn rate15(&self) -> Option<f64> {
        self.m15.rate()
    }
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}
