//! Concurrent client-key -> token-bucket registry with idle eviction.
//!
//! Locking layout:
//! - The key map is a `DashMap` (sharded `RwLock`s). Lookups of existing keys
//!   take a shard read lock; creating a key takes the shard write lock through
//!   the entry API, so check-then-create is one atomic step.
//! - Each bucket sits behind its own `Mutex`. Two keys never contend on
//!   bucket state, even when they hash to the same shard.
//! - `last_seen` is an atomic refreshed while the shard read lock is held.
//!   Eviction re-checks it under the shard write lock, so a key refreshed
//!   after the sweep collected it is left alone.
//!
//! Never hold a `DashMap` guard while locking a bucket or calling back into
//! the registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chatgate_types::limiter::{Admission, ClientKey};
use dashmap::DashMap;

use super::bucket::{BucketPolicy, TokenBucket};
use super::clock::{duration_to_nanos, Clock, SystemClock};

/// A bucket shared between the registry and the requests using it.
pub type SharedBucket = Arc<Mutex<TokenBucket>>;

struct Entry {
    bucket: SharedBucket,
    /// Nanoseconds since the registry epoch.
    last_seen: AtomicU64,
}

impl Entry {
    fn touch(&self, stamp: u64) {
        self.last_seen.fetch_max(stamp, Ordering::Relaxed);
    }

    fn idle_for(&self, now_stamp: u64) -> u64 {
        now_stamp.saturating_sub(self.last_seen.load(Ordering::Relaxed))
    }
}

/// Owns every per-client bucket of one service instance.
///
/// Constructed once by the composition root and handed to whoever needs it
/// (usually behind an `Arc`). Separate instances share nothing, which keeps
/// tests isolated.
pub struct LimiterRegistry {
    entries: DashMap<ClientKey, Entry>,
    policy: BucketPolicy,
    clock: Arc<dyn Clock>,
    epoch: Instant,
}

impl LimiterRegistry {
    /// Registry on the system clock.
    pub fn new(policy: BucketPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: BucketPolicy, clock: Arc<dyn Clock>) -> Self {
        let epoch = clock.now();
        Self {
            entries: DashMap::new(),
            policy,
            clock,
            epoch,
        }
    }

    pub fn policy(&self) -> BucketPolicy {
        self.policy
    }

    /// Admit or reject one request from `key`.
    ///
    /// Looks up (or creates) the key's bucket and spends a token from it.
    /// Always returns a decision; there is no failure mode.
    pub fn admit(&self, key: &ClientKey) -> Admission {
        let now = self.clock.now();
        let bucket = self.get_or_create_at(key, now);
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.admit(now)
    }

    /// Return the bucket for `key`, creating it if this is the first sighting.
    ///
    /// Concurrent first calls for the same key all receive the same bucket.
    pub fn get_or_create(&self, key: &ClientKey) -> SharedBucket {
        self.get_or_create_at(key, self.clock.now())
    }

    fn get_or_create_at(&self, key: &ClientKey, now: Instant) -> SharedBucket {
        let stamp = self.stamp(now);

        if let Some(entry) = self.entries.get(key) {
            entry.touch(stamp);
            return Arc::clone(&entry.bucket);
        }

        let entry = self.entries.entry(key.clone()).or_insert_with(|| {
            tracing::trace!(client = %key, "tracking new client");
            Entry {
                bucket: Arc::new(Mutex::new(TokenBucket::new(self.policy, now))),
                last_seen: AtomicU64::new(stamp),
            }
        });
        entry.touch(stamp);
        Arc::clone(&entry.bucket)
    }

    /// Remove every entry whose last access is more than `idle_threshold` ago.
    ///
    /// Returns how many entries were evicted. Shard locks are taken one at a
    /// time and each removal holds only its own shard's write lock.
    pub fn sweep(&self, idle_threshold: Duration) -> usize {
        let now_stamp = self.stamp(self.clock.now());
        let threshold = duration_to_nanos(idle_threshold);

        let candidates = self.idle_candidates(now_stamp, threshold);
        self.evict_idle(&candidates, now_stamp, threshold)
    }

    fn idle_candidates(&self, now_stamp: u64, threshold: u64) -> Vec<ClientKey> {
        self.entries
            .iter()
            .filter(|entry| entry.value().idle_for(now_stamp) > threshold)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Remove `candidates` that are still idle under their shard's write lock.
    fn evict_idle(&self, candidates: &[ClientKey], now_stamp: u64, threshold: u64) -> usize {
        candidates
            .iter()
            .filter(|key| {
                self.entries
                    .remove_if(*key, |_, entry| entry.idle_for(now_stamp) > threshold)
                    .is_some()
            })
            .count()
    }

    /// Forget a single client. Its next request starts with a full bucket.
    pub fn remove(&self, key: &ClientKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Forget every client. Returns how many entries were dropped.
    ///
    /// Entries inserted while the flush walks the shards may survive it;
    /// the count covers exactly the entries removed.
    pub fn flush(&self) -> usize {
        let mut dropped = 0;
        self.entries.retain(|_, _| {
            dropped += 1;
            false
        });
        dropped
    }

    pub fn contains(&self, key: &ClientKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn stamp(&self, now: Instant) -> u64 {
        duration_to_nanos(now.saturating_duration_since(self.epoch))
    }
}

impl std::fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("policy", &self.policy)
            .field("clients", &self.entries.len())
            .finish()
    }
}
