//! Timing policy for the periodic client activities: increment cadence, jittered
//! refresh period, failover quiescence, and the queue-depth stall heuristic.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default increment period (ms).
pub const DEFAULT_INCREMENT_PERIOD_MS: u64 = 500;
/// Default refresh jitter window (ms), half-open.
pub const DEFAULT_REFRESH_MIN_MS: u64 = 3_000;
pub const DEFAULT_REFRESH_MAX_MS: u64 = 5_000;
/// Default wait between the two queue drains of a failover (ms).
pub const DEFAULT_QUIESCENCE_MS: u64 = 6_000;
/// Default queue depth above which the dispatch loop is considered stalled.
pub const DEFAULT_STALL_THRESHOLD: usize = 50;

/// Periods of the two activities and the failover quiescence interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Cadence {
    pub increment_period_ms: u64,
    pub refresh_min_ms: u64,
    pub refresh_max_ms: u64,
    pub quiescence_ms: u64,
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            increment_period_ms: DEFAULT_INCREMENT_PERIOD_MS,
            refresh_min_ms: DEFAULT_REFRESH_MIN_MS,
            refresh_max_ms: DEFAULT_REFRESH_MAX_MS,
            quiescence_ms: DEFAULT_QUIESCENCE_MS,
        }
    }
}

impl Cadence {
    pub fn validate(&self) -> Result<(), CadenceError> {
        if self.increment_period_ms == 0 {
            return Err(CadenceError::ZeroIncrementPeriod);
        }
        if self.refresh_min_ms == 0 || self.refresh_min_ms >= self.refresh_max_ms {
            return Err(CadenceError::RefreshWindow {
                min: self.refresh_min_ms,
                max: self.refresh_max_ms,
            });
        }
        Ok(())
    }

    pub fn increment_period(&self) -> Duration {
        Duration::from_millis(self.increment_period_ms)
    }

    /// Next refresh delay, uniform in [refresh_min, refresh_max).
    pub fn refresh_period<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min = Duration::from_millis(self.refresh_min_ms).as_secs_f64();
        let max = Duration::from_millis(self.refresh_max_ms).as_secs_f64();
        if min >= max {
            return Duration::from_secs_f64(min);
        }
        Duration::from_secs_f64(rng.gen_range(min..max))
    }

    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CadenceError {
    #[error("increment period must be positive")]
    ZeroIncrementPeriod,
    #[error("refresh window [{min}, {max}) ms is empty")]
    RefreshWindow { min: u64, max: u64 },
}

/// Queue-depth liveness heuristic. A threshold of 0 disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallDetector {
    threshold: usize,
}

impl StallDetector {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_enabled(&self) -> bool {
        self.threshold > 0
    }

    /// True when `depth` pending items mean the consumer has stalled.
    pub fn is_stalled(&self, depth: usize) -> bool {
        self.is_enabled() && depth > self.threshold
    }
}

impl Default for StallDetector {
    fn default() -> Self {
        Self::new(DEFAULT_STALL_THRESHOLD)
    }
}
