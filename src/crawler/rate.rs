//! Rate controller: adaptive pacing of browser interactions
//!
//! Every navigation or click the crawler initiates waits on [`RateController::throttle`]
//! first. The wait is a base delay plus random jitter. The base delay grows
//! multiplicatively on friction (errors, interstitials, empty content) up to a
//! ceiling, and decays back toward the floor after a run of clean interactions.

use crate::config::{RateConfig, RetryConfig};
use rand::Rng;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
struct BackoffState {
    base: Duration,
    clean_streak: u32,
}

/// Cheaply cloneable handle to one backoff state
///
/// Each session owns its own controller. Clones share state, which is how
/// sessions behind the same egress would share backoff.
#[derive(Debug, Clone)]
pub struct RateController {
    floor: Duration,
    ceiling: Duration,
    multiplier: f64,
    jitter: Duration,
    decay_after: u32,
    state: Arc<Mutex<BackoffState>>,
}

impl RateController {
    pub fn new(config: &RateConfig) -> Self {
        let floor = Duration::from_millis(config.floor_ms);
        Self {
            floor,
            ceiling: Duration::from_millis(config.ceiling_ms),
            multiplier: config.multiplier,
            jitter: Duration::from_millis(config.jitter_ms),
            decay_after: config.decay_after.max(1),
            state: Arc::new(Mutex::new(BackoffState {
                base: floor,
                clean_streak: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BackoffState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current base delay, without jitter
    pub fn current_delay(&self) -> Duration {
        self.lock().base
    }

    /// The next wait: base delay plus uniform jitter in `[0, jitter]`
    pub fn next_delay(&self) -> Duration {
        let base = self.current_delay();
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// Waits before a browser interaction
    pub async fn throttle(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "Throttling");
            tokio::time::sleep(delay).await;
        }
    }

    /// Feeds one interaction outcome into the backoff state
    pub fn record_outcome(&self, success: bool) {
        let mut state = self.lock();
        if success {
            state.clean_streak += 1;
            if state.clean_streak >= self.decay_after {
                state.clean_streak = 0;
                state.base = self.scale(state.base, 1.0 / self.multiplier).max(self.floor);
            }
        } else {
            state.clean_streak = 0;
            state.base = self.scale(state.base, self.multiplier).min(self.ceiling);
            debug!(base_ms = state.base.as_millis() as u64, "Backing off");
        }
    }

    fn scale(&self, delay: Duration, factor: f64) -> Duration {
        // A zero floor would otherwise never grow
        let millis = delay.as_millis().max(1) as f64 * factor;
        Duration::from_millis(millis.round().clamp(0.0, u64::MAX as f64) as u64)
    }
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap for later retries
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, config: &RetryConfig) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    pub fn navigation(config: &RetryConfig) -> Self {
        Self::new(config.navigation_attempts, config)
    }

    pub fn login(config: &RetryConfig) -> Self {
        Self::new(config.login_attempts, config)
    }

    pub fn sink(config: &RetryConfig) -> Self {
        Self::new(config.sink_attempts, config)
    }

    /// Exponential backoff delay for the given retry index (1-based)
    pub fn backoff_delay(&self, retry_index: u32) -> Duration {
        let shift = retry_index.saturating_sub(1).min(31);
        let multiplier = 1u32 << shift;
        let base = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        base.min(self.max_delay)
    }

    /// True if another attempt is allowed after `attempt` (1-based) failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
