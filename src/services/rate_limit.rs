//! Fixed-window rate limiter keyed by arbitrary strings.
//!
//! Windows reset at discrete boundaries, so a burst straddling a boundary can
//! reach twice the limit; that imprecision is accepted and documented
//! behavior. The counter map is the only concurrently-mutated shared state in
//! the subsystem; per-key atomicity comes from the map's entry API.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Injected time source so the limiter is testable with a fake clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|_| Utc::now())
    }
}

/// Default per-IP limit: 1000 requests per hour.
pub const IP_LIMIT: u32 = 1000;
/// Default per-user limit: 5000 requests per hour.
pub const USER_LIMIT: u32 = 5000;
/// Default window for the helper entry points.
pub fn default_window() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Clone)]
struct Window {
    started_at: DateTime<Utc>,
    window: Duration,
    count: u32,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

pub struct RateLimiter {
    windows: DashMap<String, Window>,
    clock: Arc<dyn Clock>,
    ip_limit: u32,
    ip_window: Duration,
    user_limit: u32,
    user_window: Duration,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
            ip_limit: IP_LIMIT,
            ip_window: default_window(),
            user_limit: USER_LIMIT,
            user_window: default_window(),
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Limiter with configured per-IP and per-user budgets.
    pub fn with_config(config: &crate::config::RateLimitConfig) -> Self {
        let mut limiter = Self::with_system_clock();
        limiter.ip_limit = config.ip_limit;
        limiter.ip_window = Duration::seconds(config.ip_window_seconds as i64);
        limiter.user_limit = config.user_limit;
        limiter.user_window = Duration::seconds(config.user_window_seconds as i64);
        limiter
    }

    /// Count a request against `key`. Starts a fresh window when none exists
    /// or the previous one has elapsed; otherwise increments until `limit`.
    pub fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision {
        let now = self.clock.now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window {
                started_at: now,
                window,
                count: 0,
            });

        if now >= entry.started_at + entry.window {
            entry.started_at = now;
            entry.window = window;
            entry.count = 0;
        }

        let reset_at = entry.started_at + entry.window;
        if entry.count < limit {
            entry.count += 1;
            RateLimitDecision {
                allowed: true,
                remaining: limit - entry.count,
                reset_at,
            }
        } else {
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at,
            }
        }
    }

    pub fn check_ip(&self, ip: &str) -> RateLimitDecision {
        self.check(&format!("ip:{}", ip), self.ip_limit, self.ip_window)
    }

    pub fn check_user(&self, user_id: &str) -> RateLimitDecision {
        self.check(&format!("user:{}", user_id), self.user_limit, self.user_window)
    }

    pub fn check_api_key(&self, key_digest: &str, limit: u32) -> RateLimitDecision {
        self.check(&format!("apikey:{}", key_digest), limit, default_window())
    }

    /// Drop entries whose window has elapsed, bounding memory growth.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now < w.started_at + w.window);
        before - self.windows.len()
    }

    /// Run `sweep_expired` on an interval until the handle is dropped/aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, every: StdDuration) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let removed = limiter.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired rate-limit windows");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with_clock() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (RateLimiter::new(clock.clone()), clock)
    }

    #[test]
    fn test_allows_up_to_limit_then_denies() {
        let (limiter, _clock) = limiter_with_clock();
        let window = Duration::minutes(1);

        for i in 0..5 {
            let decision = limiter.check("ip:10.0.0.1", 5, window);
            assert!(decision.allowed, "request {} should be allowed", i);
        }
        let decision = limiter.check("ip:10.0.0.1", 5, window);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_window_reset() {
        let (limiter, clock) = limiter_with_clock();
        let window = Duration::minutes(1);

        for _ in 0..5 {
            limiter.check("user:u1", 5, window);
        }
        assert!(!limiter.check("user:u1", 5, window).allowed);

        clock.advance(Duration::seconds(61));
        assert!(limiter.check("user:u1", 5, window).allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = limiter_with_clock();
        let window = Duration::minutes(1);

        for _ in 0..3 {
            limiter.check("ip:a", 3, window);
        }
        assert!(!limiter.check("ip:a", 3, window).allowed);
        assert!(limiter.check("ip:b", 3, window).allowed);
    }

    #[test]
    fn test_remaining_counts_down() {
        let (limiter, _clock) = limiter_with_clock();
        let window = Duration::minutes(1);

        assert_eq!(limiter.check("k", 3, window).remaining, 2);
        assert_eq!(limiter.check("k", 3, window).remaining, 1);
        assert_eq!(limiter.check("k", 3, window).remaining, 0);
        assert!(!limiter.check("k", 3, window).allowed);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (limiter, clock) = limiter_with_clock();

        limiter.check("short", 5, Duration::seconds(30));
        limiter.check("long", 5, Duration::hours(1));

        clock.advance(Duration::seconds(31));
        let removed = limiter.sweep_expired();
        assert_eq!(removed, 1);
    }
}
