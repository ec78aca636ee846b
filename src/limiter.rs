//! Per-client token-bucket rate limiter.
//!
//! Each client IP gets its own `governor` limiter allowing `burst` requests
//! back to back and refilling at `rps` per second; a request spends one
//! cell. The whole client map sits behind one mutex, taken by the request
//! path for lookup, lazy creation, the last-seen refresh and the check, and
//! by the eviction sweep. Every critical section is O(1) except the sweep,
//! which is O(clients) and runs once per interval.
//!
//! Clients that stay idle longer than `stale_after` are dropped by the sweep
//! (see [`RateLimiter::spawn_eviction`]), so memory is bounded by the number
//! of clients seen in the last few minutes, not since startup.

use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::Quota;
use governor::clock::Clock;
use governor::state::{InMemoryState, NotKeyed};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Upper bound for the sweep interval and the idle threshold.
pub const MAX_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// When `false` every request is allowed and no state is kept.
    pub enabled: bool,
    /// Steady refill rate, in requests per second.
    pub rps: f64,
    /// Bucket capacity: how many requests may arrive back to back.
    pub burst: u32,
    /// How often the eviction sweep runs.
    pub sweep_interval: Duration,
    /// Idle time after which a client is forgotten.
    pub stale_after: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rps: 2.0,
            burst: 4,
            sweep_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(180),
        }
    }
}

impl RateLimitConfig {
    /// The per-client quota these settings describe.
    pub fn quota(&self) -> Result<Quota, LimiterError> {
        check_interval("sweep_interval", self.sweep_interval)?;
        check_interval("stale_after", self.stale_after)?;

        let burst = NonZeroU32::new(self.burst).ok_or(LimiterError::Burst)?;
        let period = if self.rps.is_finite() && self.rps > 0.0 {
            Duration::try_from_secs_f64(1.0 / self.rps).ok()
        } else {
            None
        };
        let quota = period
            .and_then(Quota::with_period)
            .ok_or(LimiterError::Rate(self.rps))?;
        Ok(quota.allow_burst(burst))
    }
}

fn check_interval(name: &'static str, value: Duration) -> Result<(), LimiterError> {
    if value.is_zero() || value > MAX_INTERVAL {
        return Err(LimiterError::Interval { name, value });
    }
    Ok(())
}

/// Settings a limiter cannot be built from.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum LimiterError {
    #[error("rate must be a positive number of requests per second, got {0}")]
    Rate(f64),
    #[error("burst must be at least 1")]
    Burst,
    #[error("{name} must be non-zero and at most {max:?}, got {value:?}", max = MAX_INTERVAL)]
    Interval { name: &'static str, value: Duration },
}

// ── Clock ─────────────────────────────────────────────────────────────────────

/// Reads `tokio::time`, so a paused runtime clock drives refills as well.
#[derive(Clone, Copy, Debug, Default)]
struct TokioClock;

impl Clock for TokioClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        Instant::now().into_std()
    }
}

type Bucket = governor::RateLimiter<
    NotKeyed,
    InMemoryState,
    TokioClock,
    governor::middleware::NoOpMiddleware<std::time::Instant>,
>;

struct ClientRecord {
    bucket: Bucket,
    last_seen: Instant,
}

// ── RateLimiter ───────────────────────────────────────────────────────────────

pub struct RateLimiter {
    config: RateLimitConfig,
    quota: Quota,
    clients: Mutex<HashMap<IpAddr, ClientRecord>>,
}

impl RateLimiter {
    /// Fails on a non-positive or non-finite rate, a zero burst, or an
    /// interval outside `1ns..=MAX_INTERVAL`.
    pub fn new(config: RateLimitConfig) -> Result<Self, LimiterError> {
        let quota = config.quota()?;
        Ok(Self { config, quota, clients: Mutex::new(HashMap::new()) })
    }

    /// A limiter that allows everything. For tests and local development.
    pub fn disabled() -> Self {
        Self {
            config: RateLimitConfig { enabled: false, ..RateLimitConfig::default() },
            quota: Quota::per_second(NonZeroU32::MIN),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig { &self.config }
    pub fn is_enabled(&self) -> bool { self.config.enabled }

    /// Spends one of `client`'s tokens. `false` means the request must be
    /// rejected.
    pub fn allow(&self, client: IpAddr) -> bool {
        if !self.config.enabled {
            return true;
        }

        let now = Instant::now();
        let mut clients = self.clients.lock();
        let record = clients.entry(client).or_insert_with(|| ClientRecord {
            bucket: Bucket::direct_with_clock(self.quota, TokioClock),
            last_seen: now,
        });
        record.last_seen = now;
        record.bucket.check().is_ok()
    }

    /// Drops every client idle for at least `stale_after`. Returns how many
    /// were dropped.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let stale_after = self.config.stale_after;
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|_, record| now.saturating_duration_since(record.last_seen) < stale_after);
        before - clients.len()
    }

    /// Number of clients currently tracked.
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts the periodic eviction sweep on the current tokio runtime.
    ///
    /// The sweep runs every `sweep_interval` until the returned
    /// [`EvictionTask`] is stopped or dropped. Does nothing useful for a
    /// disabled limiter, but is harmless.
    pub fn spawn_eviction(self: &Arc<Self>) -> EvictionTask {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let limiter = Arc::clone(self);
        let every = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let Some(first) = Instant::now().checked_add(every) else {
                tracing::error!(?every, "rate-limit sweep interval out of range, eviction disabled");
                return;
            };
            let mut ticker = tokio::time::interval_at(first, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let evicted = limiter.evict_idle(Instant::now());
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = limiter.len(), "evicted idle rate-limit clients");
                        }
                    }
                }
            }
        });

        EvictionTask { stop: Some(stop_tx), handle: Some(handle) }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("clients", &self.len())
            .finish()
    }
}

// ── EvictionTask ──────────────────────────────────────────────────────────────

/// Handle to a running eviction sweep. Dropping it stops the sweep.
#[derive(Debug)]
pub struct EvictionTask {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl EvictionTask {
    /// Stops the sweep and waits for it to exit.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!("rate-limit eviction task ended abnormally: {e}");
            }
        }
    }

    /// `true` once the sweep task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for EvictionTask {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}
