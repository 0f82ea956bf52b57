//! Per-user sliding-window rate limiter.
//!
//! Each user keeps the timestamps of their recent accepted requests. A request
//! is limited when the window already holds `max_requests` of them. State lives
//! only in memory and is lost on restart.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shortest period accepted by [`RateLimiter::spawn_sweeper`]
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Sliding-window request counter keyed by Telegram user id.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    requests: Mutex<HashMap<i64, VecDeque<Instant>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Checks the limit for `user_id` now and records the request if accepted.
    pub fn is_limited(&self, user_id: i64) -> bool {
        self.is_limited_at(user_id, Instant::now())
    }

    /// Same as [`RateLimiter::is_limited`] with an explicit clock reading.
    pub fn is_limited_at(&self, user_id: i64, now: Instant) -> bool {
        let mut requests = self.lock();
        let timestamps = requests.entry(user_id).or_default();

        if let Some(cutoff) = now.checked_sub(self.window) {
            while timestamps.front().is_some_and(|t| *t <= cutoff) {
                timestamps.pop_front();
            }
        }

        if timestamps.len() >= self.max_requests {
            warn!(user_id = %user_id, requests = timestamps.len(), "Rate limit exceeded");
            return true;
        }

        timestamps.push_back(now);
        false
    }

    /// Forget users with no request inside `horizon`.
    pub fn sweep(&self, horizon: Duration) -> usize {
        self.sweep_at(horizon, Instant::now())
    }

    pub fn sweep_at(&self, horizon: Duration, now: Instant) -> usize {
        let mut requests = self.lock();
        let before = requests.len();

        match now.checked_sub(horizon) {
            Some(cutoff) => {
                requests.retain(|_, timestamps| timestamps.back().is_some_and(|t| *t > cutoff))
            }
            None => requests.retain(|_, timestamps| !timestamps.is_empty()),
        }

        let removed = before - requests.len();
        if removed > 0 {
            debug!(removed, remaining = requests.len(), "Swept idle rate limiter entries");
        }
        removed
    }

    /// Number of users currently tracked
    pub fn tracked_users(&self) -> usize {
        self.lock().len()
    }

    /// Run [`RateLimiter::sweep`] every `every` on the tokio runtime.
    pub fn spawn_sweeper(limiter: Arc<Self>, every: Duration, horizon: Duration) -> JoinHandle<()> {
        let every = if every < MIN_SWEEP_INTERVAL {
            warn!(every_ms = every.as_millis() as u64, "Sweep interval too short, using the minimum");
            MIN_SWEEP_INTERVAL
        } else {
            every
        };
        info!(every_secs = every.as_secs(), horizon_secs = horizon.as_secs(), "Starting rate limiter sweeper");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                limiter.sweep(horizon);
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, VecDeque<Instant>>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_request_over_cap() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();

        for i in 0..3 {
            assert!(!limiter.is_limited_at(1, start + Duration::from_secs(i)));
        }
        assert!(limiter.is_limited_at(1, start + Duration::from_secs(5)));
    }

    #[test]
    fn test_accepts_again_after_oldest_leaves_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();

        assert!(!limiter.is_limited_at(7, start));
        assert!(!limiter.is_limited_at(7, start + Duration::from_secs(4)));
        assert!(limiter.is_limited_at(7, start + Duration::from_secs(9)));
        // Oldest timestamp is exactly one window old
        assert!(!limiter.is_limited_at(7, start + Duration::from_secs(10)));
        assert!(limiter.is_limited_at(7, start + Duration::from_secs(11)));
    }

    #[test]
    fn test_rejected_requests_are_not_recorded() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        let start = Instant::now();

        assert!(!limiter.is_limited_at(3, start));
        for i in 1..10 {
            assert!(limiter.is_limited_at(3, start + Duration::from_secs(i)));
        }
        assert!(!limiter.is_limited_at(3, start + Duration::from_secs(10)));
    }

    #[test]
    fn test_users_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(!limiter.is_limited_at(1, now));
        assert!(limiter.is_limited_at(1, now));
        assert!(!limiter.is_limited_at(2, now));
    }

    #[test]
    fn test_sweep_drops_idle_users() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let start = Instant::now();

        limiter.is_limited_at(1, start);
        limiter.is_limited_at(2, start + Duration::from_secs(3600));
        assert_eq!(limiter.tracked_users(), 2);

        let removed = limiter.sweep_at(Duration::from_secs(1800), start + Duration::from_secs(3700));
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_users(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_survives_zero_interval() {
        let limiter = Arc::new(RateLimiter::new(5, Duration::from_secs(60)));
        let handle = RateLimiter::spawn_sweeper(limiter, Duration::ZERO, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
