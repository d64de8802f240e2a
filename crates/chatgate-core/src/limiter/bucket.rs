//! Continuous-refill token bucket for a single client.
//!
//! A bucket starts full. Every admission check first adds
//! `elapsed * refill_rate` tokens (clamped to capacity), then spends one
//! token if a whole token is available. Callers pass the current instant in,
//! so the bucket itself never reads a clock.

use std::time::{Duration, Instant};

use chatgate_types::config::RateLimitConfig;
use chatgate_types::error::ConfigError;
use chatgate_types::limiter::Admission;

/// Capacity and refill rate shared by every bucket of one registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketPolicy {
    capacity: u32,
    refill_rate: f64,
}

impl BucketPolicy {
    /// Build a policy. `capacity` must be at least 1 and `refill_rate`
    /// (tokens per second) finite and positive.
    pub fn new(capacity: u32, refill_rate: f64) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::Invalid(
                "bucket capacity must be at least 1".to_string(),
            ));
        }
        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "bucket refill rate must be a positive number, got {refill_rate}"
            )));
        }
        Ok(Self {
            capacity,
            refill_rate,
        })
    }

    pub fn from_config(config: &RateLimitConfig) -> Result<Self, ConfigError> {
        Self::new(config.burst, config.requests_per_second)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}

/// Rate-limit state for one client key.
///
/// Invariant: `0 <= tokens <= capacity` after every method returns.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    policy: BucketPolicy,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket whose refill clock starts at `now`.
    pub fn new(policy: BucketPolicy, now: Instant) -> Self {
        Self {
            policy,
            tokens: f64::from(policy.capacity),
            last_refill: now,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.policy.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.policy.refill_rate
    }

    /// Tokens that would be available at `now`, without mutating the bucket.
    pub fn available(&self, now: Instant) -> f64 {
        self.refilled_tokens(now)
    }

    /// Refill, then spend one token if possible. Returns whether the request
    /// was admitted.
    pub fn try_admit(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Same decision as [`try_admit`](Self::try_admit), reported with the
    /// remaining allowance and, on rejection, how long until a token frees up.
    pub fn admit(&mut self, now: Instant) -> Admission {
        let allowed = self.try_admit(now);
        Admission {
            allowed,
            remaining: self.tokens.floor() as u32,
            limit: self.policy.capacity,
            retry_after: (!allowed).then(|| self.time_until_token()),
        }
    }

    fn refilled_tokens(&self, now: Instant) -> f64 {
        // An instant earlier than `last_refill` yields zero elapsed time.
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * self.policy.refill_rate).min(f64::from(self.policy.capacity))
    }

    fn refill(&mut self, now: Instant) {
        self.tokens = self.refilled_tokens(now);
        self.last_refill = self.last_refill.max(now);
    }

    fn time_until_token(&self) -> Duration {
        let missing = (1.0 - self.tokens).max(0.0);
        Duration::try_from_secs_f64(missing / self.policy.refill_rate).unwrap_or(Duration::MAX)
    }
}
