//! Adaptive request pacing
//!
//! The governor decides how long the scheduler waits before the next page
//! fetch. The wait is the job's delay floor or an adaptive component,
//! whichever is larger:
//!
//! - any failed fetch (non-2xx or error) multiplies the adaptive component by
//!   the backoff factor, capped at the maximum delay
//! - a slow success raises it to at least the observed latency
//! - once the last `latency_window` fetches were all fast successes it decays
//!   halfway toward the floor
//!
//! [`RetryPolicy`] covers the shorter waits between retries of one request.

use crate::config::CrawlerConfig;
use std::collections::VecDeque;
use std::time::Duration;

/// Smallest base the adaptive component grows from when the floor is tiny
const MIN_BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Parameters of the rate governor
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottlePolicy {
    pub floor: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub latency_window: usize,
    pub slow_latency: Duration,
}

impl ThrottlePolicy {
    /// Combines the job's delay floor with the configured crawler settings
    pub fn from_config(floor: Duration, config: &CrawlerConfig) -> Self {
        Self {
            floor,
            max_delay: config.max_delay(),
            backoff_factor: config.backoff_factor,
            latency_window: config.latency_window.max(1),
            slow_latency: config.slow_latency(),
        }
    }
}

/// One fetch attempt as seen by the governor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub latency: Duration,

    /// HTTP status, or `None` when the request never produced a response
    pub status: Option<u16>,
}

impl Observation {
    pub fn new(latency: Duration, status: Option<u16>) -> Self {
        Self { latency, status }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(s) if (200..300).contains(&s))
    }
}

/// Computes inter-page delays from recent fetch behavior
#[derive(Debug, Clone)]
pub struct RateGovernor {
    policy: ThrottlePolicy,
    adaptive: Duration,
    recent: VecDeque<Observation>,
}

impl RateGovernor {
    pub fn new(policy: ThrottlePolicy) -> Self {
        let adaptive = policy.floor.min(policy.max_delay);
        Self {
            recent: VecDeque::with_capacity(policy.latency_window),
            policy,
            adaptive,
        }
    }

    /// Records one fetch attempt
    pub fn observe(&mut self, observation: Observation) {
        if self.recent.len() == self.policy.latency_window {
            self.recent.pop_front();
        }
        self.recent.push_back(observation);

        if !observation.is_success() {
            let base = self.adaptive.max(self.policy.floor).max(MIN_BACKOFF_STEP);
            self.adaptive = base
                .mul_f64(self.policy.backoff_factor)
                .min(self.policy.max_delay);
            tracing::debug!(
                "Fetch failed (status {:?}), adaptive delay now {:?}",
                observation.status,
                self.adaptive
            );
            return;
        }

        if observation.latency > self.policy.slow_latency {
            self.adaptive = self
                .adaptive
                .max(observation.latency)
                .min(self.policy.max_delay);
            tracing::debug!(
                "Slow response ({:?}), adaptive delay now {:?}",
                observation.latency,
                self.adaptive
            );
            return;
        }

        if self.window_is_healthy() && self.adaptive > self.policy.floor {
            let excess = self.adaptive - self.policy.floor;
            self.adaptive = self.policy.floor + excess / 2;
            tracing::trace!("Adaptive delay decayed to {:?}", self.adaptive);
        }
    }

    /// Wait before the next fetch; never below the floor
    pub fn next_delay(&self) -> Duration {
        self.policy.floor.max(self.adaptive)
    }

    fn window_is_healthy(&self) -> bool {
        self.recent.len() == self.policy.latency_window
            && self
                .recent
                .iter()
                .all(|o| o.is_success() && o.latency <= self.policy.slow_latency)
    }
}

/// How hard to back off before a retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,

    /// Anti-bot walls and explicit rate limiting
    Extended,
}

/// Exponential retry schedule for a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_retries,
            base,
            max,
        }
    }

    /// Wait before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32, severity: Severity) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let factor = match severity {
            Severity::Normal => factor,
            Severity::Extended => factor.saturating_mul(4),
        };
        self.base.saturating_mul(factor).min(self.max)
    }
}
