//! Background idle-eviction task.
//!
//! The sweeper is started and stopped explicitly by whoever owns the
//! registry, so tests can leave it off and call
//! [`LimiterRegistry::sweep`] themselves.

use std::sync::Arc;
use std::time::Duration;

use chatgate_types::config::RateLimitConfig;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::registry::LimiterRegistry;

/// Smallest accepted sweep period; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// How often to sweep and what counts as idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSchedule {
    pub interval: Duration,
    pub idle_threshold: Duration,
}

impl SweepSchedule {
    /// `None` when the configuration disables periodic sweeping.
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        config.sweep_interval().map(|interval| Self {
            interval,
            idle_threshold: config.idle_timeout(),
        })
    }
}

/// Spawns the periodic sweep task.
pub struct Sweeper;

impl Sweeper {
    /// Start sweeping `registry` on the current tokio runtime.
    ///
    /// The first pass runs one full `interval` after spawning.
    pub fn spawn(registry: Arc<LimiterRegistry>, schedule: SweepSchedule) -> SweeperHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(registry, schedule, cancel.clone()));
        SweeperHandle { cancel, task }
    }
}

async fn run(registry: Arc<LimiterRegistry>, schedule: SweepSchedule, cancel: CancellationToken) {
    let period = schedule.interval.max(MIN_INTERVAL);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(
        interval_ms = period.as_millis() as u64,
        idle_threshold_secs = schedule.idle_threshold.as_secs(),
        "limiter sweeper started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = registry.sweep(schedule.idle_threshold);
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = registry.len(), "evicted idle clients");
                }
            }
        }
    }

    tracing::debug!("limiter sweeper stopped");
}

/// Handle to a running sweeper. Dropping it leaves the task running until
/// the runtime shuts down; call [`shutdown`](Self::shutdown) to stop it.
#[derive(Debug)]
pub struct SweeperHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Token that stops the sweeper when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the sweeper and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "limiter sweeper did not exit cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use chatgate_types::limiter::ClientKey;

    use super::*;
    use crate::limiter::bucket::BucketPolicy;
    use crate::limiter::clock::ManualClock;

    fn registry() -> (Arc<LimiterRegistry>, ManualClock) {
        let clock = ManualClock::new();
        let registry = LimiterRegistry::with_clock(
            BucketPolicy::new(5, 1.0).unwrap(),
            Arc::new(clock.clone()),
        );
        (Arc::new(registry), clock)
    }

    #[test]
    fn schedule_from_config() {
        let config = RateLimitConfig::default();
        let schedule = SweepSchedule::from_config(&config).unwrap();
        assert_eq!(schedule.interval, Duration::from_secs(60));
        assert_eq!(schedule.idle_threshold, Duration::from_secs(300));

        let disabled = RateLimitConfig {
            sweep_interval_secs: 0,
            ..config
        };
        assert!(SweepSchedule::from_config(&disabled).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_idle_clients_on_schedule() {
        let (registry, clock) = registry();
        let idle = ClientKey::from("192.0.2.1");
        registry.admit(&idle);

        let handle = Sweeper::spawn(
            Arc::clone(&registry),
            SweepSchedule {
                interval: Duration::from_secs(10),
                idle_threshold: Duration::from_secs(60),
            },
        );

        // Not idle yet: the first pass leaves it alone.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(registry.contains(&idle));

        clock.advance(Duration::from_secs(61));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!registry.contains(&idle));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_on_shutdown() {
        let (registry, clock) = registry();
        let handle = Sweeper::spawn(
            Arc::clone(&registry),
            SweepSchedule {
                interval: Duration::from_secs(1),
                idle_threshold: Duration::from_secs(1),
            },
        );
        let token = handle.cancellation_token();
        handle.shutdown().await;
        assert!(token.is_cancelled());

        // Nothing sweeps any more.
        let key = ClientKey::from("192.0.2.2");
        registry.admit(&key);
        clock.advance(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(registry.contains(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_the_token_stops_the_task() {
        let (registry, _clock) = registry();
        let handle = Sweeper::spawn(
            registry,
            SweepSchedule {
                interval: Duration::from_secs(1),
                idle_threshold: Duration::from_secs(1),
            },
        );
        handle.cancellation_token().cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_finished());
    }
}
