//! Execution-time samples.
//!
//! A bounded reservoir over the stream of observed durations. Reservoir
//! sampling keeps the snapshot statistically representative without holding
//! the whole history; percentile, stddev, and variance are computed over a
//! snapshot of the reservoir.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::error::{FlowgateError, Result};

/// Default reservoir capacity.
pub const DEFAULT_SAMPLE_SIZE: usize = 1028;

/// A bounded reservoir of execution durations.
pub struct ExecutionSample {
    size: usize,
    count: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
    reservoir: Mutex<Vec<u64>>,
}

impl ExecutionSample {
    /// Create a sample with the default reservoir capacity.
    pub fn new() -> Self {
        Self::with_size(DEFAULT_SAMPLE_SIZE)
    }

    /// Create a sample with a custom reservoir capacity.
    pub fn with_size(size: usize) -> Self {
        Self {
            size: size.max(1),
            count: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
            reservoir: Mutex::new(Vec::new()),
        }
    }

    /// Record one observed duration.
    pub fn update(&self, duration: Duration) {
        let value = duration.as_nanos().min(u128::from(u64::MAX)) as u64;
        let seen = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        self.min_ns.fetch_min(value, Ordering::Relaxed);
        self.max_ns.fetch_max(value, Ordering::Relaxed);

        let mut reservoir = self.reservoir.lock();
        if reservoir.len() < self.size {
            reservoir.push(value);
        } else {
            let slot = rand::thread_rng().gen_range(0..seen as usize);
            if slot < self.size {
                reservoir[slot] = value;
            }
        }
    }

    /// Total observations recorded (not bounded by the reservoir).
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// The smallest observed duration.
    pub fn min(&self) -> Result<Duration> {
        self.non_empty()?;
        Ok(Duration::from_nanos(self.min_ns.load(Ordering::Relaxed)))
    }

    /// The largest observed duration.
    pub fn max(&self) -> Result<Duration> {
        self.non_empty()?;
        Ok(Duration::from_nanos(self.max_ns.load(Ordering::Relaxed)))
    }

    /// The `percentile` (in `[0, 1]`) of the reservoir snapshot, by sorted
    /// linear interpolation.
    pub fn percentile(&self, percentile: f64) -> Result<Duration> {
        let mut values = self.snapshot();
        if values.is_empty() {
            return Err(self.empty_error());
        }
        values.sort_unstable();

        let position = percentile * (values.len() + 1) as f64;
        let nanos = if position < 1.0 {
            values[0] as f64
        } else if position >= values.len() as f64 {
            values[values.len() - 1] as f64
        } else {
            let lower = values[position as usize - 1] as f64;
            let upper = values[position as usize] as f64;
            lower + (position - position.trunc()) * (upper - lower)
        };

        Ok(Duration::from_nanos(nanos as u64))
    }

    /// Standard deviation of the reservoir snapshot, in nanoseconds.
    pub fn stddev(&self) -> Result<f64> {
        self.variance().map(f64::sqrt)
    }

    /// Variance of the reservoir snapshot, in nanoseconds squared.
    /// Computed in two passes: mean, then mean squared deviation.
    pub fn variance(&self) -> Result<f64> {
        let values = self.snapshot();
        if values.is_empty() {
            return Err(self.empty_error());
        }

        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64;
        let sum_sq = values
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>();
        Ok(sum_sq / values.len() as f64)
    }

    fn snapshot(&self) -> Vec<u64> {
        self.reservoir.lock().clone()
    }

    fn non_empty(&self) -> Result<()> {
        if self.count() == 0 {
            Err(self.empty_error())
        } else {
            Ok(())
        }
    }

    fn empty_error(&self) -> FlowgateError {
        FlowgateError::NoStatisticsInfo {
            scope: "execution-time sample".to_string(),
        }
    }
}

impl Default for ExecutionSample {
    fn default() -> Self {
        Self::new()
    }
}
