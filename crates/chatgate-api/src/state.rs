//! Application state: the composition root for the HTTP layer.
//!
//! AppState owns the limiter registry for this process. It is built once at
//! startup and cloned (cheaply, via `Arc`) into every request. Nothing in the
//! request path reaches for a global.

use std::sync::Arc;

use chatgate_core::limiter::{BucketPolicy, LimiterRegistry, SweepSchedule, Sweeper, SweeperHandle};
use chatgate_types::config::ServiceConfig;
use chatgate_types::error::ConfigError;

/// Shared application state handed to handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub registry: Arc<LimiterRegistry>,
}

impl AppState {
    /// Validate the configuration and build a fresh registry on the system clock.
    pub fn init(config: ServiceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = BucketPolicy::from_config(&config.rate_limit)?;
        Ok(Self::with_registry(config, LimiterRegistry::new(policy)))
    }

    /// Wire an externally constructed registry (tests use a manual clock).
    pub fn with_registry(config: ServiceConfig, registry: LimiterRegistry) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
        }
    }

    /// Start the background sweeper if rate limiting and sweeping are enabled.
    pub fn start_sweeper(&self) -> Option<SweeperHandle> {
        if !self.config.rate_limit.enabled {
            return None;
        }
        if self.buckets_never_reclaimed() {
            tracing::warn!(
                "idle sweeping disabled (sweep_interval_secs = 0); per-client buckets are never reclaimed"
            );
            return None;
        }
        let schedule = SweepSchedule::from_config(&self.config.rate_limit)?;
        Some(Sweeper::spawn(Arc::clone(&self.registry), schedule))
    }

    /// True when the limiter tracks clients but nothing ever evicts them.
    pub fn buckets_never_reclaimed(&self) -> bool {
        let rate_limit = &self.config.rate_limit;
        rate_limit.enabled && SweepSchedule::from_config(rate_limit).is_none()
    }
}
