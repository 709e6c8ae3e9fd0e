//! Per-client token-bucket admission control.
//!
//! Flow Overview:
//! 1) The first request from a key creates a bucket at full capacity.
//! 2) Each request refills the bucket lazily (`elapsed * rate`, capped at
//!    capacity) and spends one token if at least one is available.
//! 3) A background sweeper drops clients idle for longer than
//!    [`IDLE_THRESHOLD`], bounding memory to recently active keys.
//!
//! Locking: the registry lock covers only lookup-or-insert plus the
//! `last_seen` touch. Bucket math runs under the per-client lock, so
//! different keys never wait on each other's arithmetic. The sweeper reads
//! `last_seen` under the registry lock, so a client touched by an in-flight
//! request is never evicted from under it.
//!
//! Scaling: state is process-local. Instances behind a load balancer each
//! enforce their own budget.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const IDLE_THRESHOLD: Duration = Duration::from_secs(3 * 60);

const DEFAULT_RPS: f64 = 2.0;
const DEFAULT_BURST: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    /// Disabled limiters admit everything and never need a client key.
    fn enabled(&self) -> bool;

    fn check(&self, key: &str) -> RateLimitDecision;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LimiterConfig {
    rps: f64,
    burst: u32,
    enabled: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LimiterConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rps: DEFAULT_RPS,
            burst: DEFAULT_BURST,
            enabled: true,
        }
    }

    #[must_use]
    pub const fn with_rps(mut self, rps: f64) -> Self {
        self.rps = rps;
        self
    }

    #[must_use]
    pub const fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub const fn rps(&self) -> f64 {
        self.rps
    }

    #[must_use]
    pub const fn burst(&self) -> u32 {
        self.burst
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }
}

/// Lazily refilled bucket. Invariant: `0 <= tokens <= capacity`.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    #[must_use]
    pub fn new(capacity: u32, refill_per_second: f64, now: Instant) -> Self {
        let capacity = f64::from(capacity);
        Self {
            capacity,
            refill_per_second: refill_per_second.max(0.0),
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        // Callers racing on the per-client lock may arrive with an older instant.
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() * self.refill_per_second).min(self.capacity);
        self.last_refill = now;
    }

    /// Spend one token if available. A refused call costs nothing.
    pub fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub const fn tokens(&self) -> f64 {
        self.tokens
    }
}

#[derive(Debug)]
struct Client {
    bucket: Arc<Mutex<TokenBucket>>,
    last_seen: Instant,
}

/// Registry of per-key buckets shared by every request task and the sweeper.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    config: LimiterConfig,
    clients: Mutex<HashMap<String, Client>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every critical section leaves the data consistent, so a poisoned lock is still usable.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TokenBucketLimiter {
    #[must_use]
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Admission decision for `key` at `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        if !self.config.enabled() {
            return RateLimitDecision::Allowed;
        }

        let bucket = {
            let mut clients = lock(&self.clients);
            if let Some(client) = clients.get_mut(key) {
                client.last_seen = client.last_seen.max(now);
                Arc::clone(&client.bucket)
            } else {
                let bucket = Arc::new(Mutex::new(TokenBucket::new(
                    self.config.burst(),
                    self.config.rps(),
                    now,
                )));
                clients.insert(
                    key.to_string(),
                    Client {
                        bucket: Arc::clone(&bucket),
                        last_seen: now,
                    },
                );
                bucket
            }
        };

        if lock(&bucket).try_take(now) {
            RateLimitDecision::Allowed
        } else {
            RateLimitDecision::Limited
        }
    }

    /// Drop every client idle for longer than [`IDLE_THRESHOLD`] at `now`.
    /// Returns how many were evicted.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut clients = lock(&self.clients);
        let before = clients.len();
        clients.retain(|_, client| now.saturating_duration_since(client.last_seen) <= IDLE_THRESHOLD);
        before - clients.len()
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        lock(&self.clients).len()
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn enabled(&self) -> bool {
        self.config.enabled()
    }

    fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }
}

/// Run the eviction sweep every `every` until the handle is aborted.
pub fn spawn_sweeper(limiter: Arc<TokenBucketLimiter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = limiter.sweep_at(Instant::now());
            if evicted > 0 {
                debug!(
                    evicted,
                    tracked = limiter.tracked_clients(),
                    "rate limiter sweep"
                );
            }
        }
    })
}
