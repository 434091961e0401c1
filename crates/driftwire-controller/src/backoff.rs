//! Restart backoff policy for faulted changefeeds.
//!
//! An explicit exponential state machine rather than a library black box:
//! the randomization factor, the stop sentinel, and reset are all plain
//! functions over `(config, current, floor, started_at)` and testable as
//! such. When errors keep recurring the delays grow from 10 s towards
//! 30 min (10 s, 20 s, 40 s, ...); a random factor spreads restarts so a
//! cluster-wide fault does not thunder on recovery.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Tuning for [`ErrorBackoff`]. The defaults are the production values;
/// tests tighten the budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
    /// Once this much time has passed since the last reset, the policy
    /// stops producing delays and the feed goes terminal.
    pub max_elapsed: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(30 * 60),
            multiplier: 2.0,
            randomization_factor: 0.1,
            max_elapsed: Duration::from_secs(90 * 60),
        }
    }
}

/// Exponential restart backoff with randomization and an elapsed budget.
///
/// Returned delays are non-decreasing between resets and never exceed
/// `max_interval`; the jitter floor is the previously returned delay.
#[derive(Debug)]
pub struct ErrorBackoff {
    config: BackoffConfig,
    /// Base interval the next draw is jittered from.
    current: Duration,
    /// Last delay handed out; draws never go below it.
    floor: Duration,
    started_at: Instant,
    rng: StdRng,
}

impl ErrorBackoff {
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// A backoff with a deterministic jitter stream, for tests.
    #[must_use]
    pub fn with_seed(config: BackoffConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: BackoffConfig, rng: StdRng) -> Self {
        Self {
            current: config.initial_interval,
            floor: Duration::ZERO,
            started_at: Instant::now(),
            config,
            rng,
        }
    }

    /// The configured first delay after a reset.
    #[must_use]
    pub fn initial_interval(&self) -> Duration {
        self.config.initial_interval
    }

    /// Restart the schedule from the initial interval and re-arm the
    /// elapsed budget at `now`.
    pub fn reset(&mut self, now: Instant) {
        self.current = self.config.initial_interval;
        self.floor = Duration::ZERO;
        self.started_at = now;
    }

    /// The next allowed restart delay, or `None` once the elapsed budget
    /// is exhausted.
    pub fn next_backoff(&mut self, now: Instant) -> Option<Duration> {
        if now.duration_since(self.started_at) > self.config.max_elapsed {
            return None;
        }
        let delay = self
            .randomized(self.current)
            .clamp(self.floor, self.config.max_interval);
        self.floor = delay;
        self.current = (self.current.mul_f64(self.config.multiplier)).min(self.config.max_interval);
        Some(delay)
    }

    fn randomized(&mut self, base: Duration) -> Duration {
        let factor = self.config.randomization_factor;
        if factor <= 0.0 {
            return base;
        }
        let spread = self.rng.random_range((1.0 - factor)..=(1.0 + factor));
        base.mul_f64(spread)
    }
}
