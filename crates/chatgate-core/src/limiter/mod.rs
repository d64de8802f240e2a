//! Per-client rate limiting.
//!
//! - [`TokenBucket`] -- continuous-refill bucket deciding admit/reject for one client
//! - [`LimiterRegistry`] -- concurrent key -> bucket map with idle eviction
//! - [`Sweeper`] -- background task that runs [`LimiterRegistry::sweep`] on a schedule
//! - [`Clock`] -- time source, swappable for deterministic tests

pub mod bucket;
pub mod clock;
pub mod registry;
pub mod sweeper;

pub use bucket::{BucketPolicy, TokenBucket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use registry::{LimiterRegistry, SharedBucket};
pub use sweeper::{SweepSchedule, Sweeper, SweeperHandle};
