//! In-memory sliding-window rate limiter, keyed by bucket + client key.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch seconds at which the window frees a slot.
    pub reset: i64,
}

impl Decision {
    pub fn retry_after_seconds(&self) -> i64 {
        (self.reset - chrono::Utc::now().timestamp()).max(1)
    }
}

pub struct RateLimiter {
    max_requests: u32,
    window_seconds: u64,
    buckets: Mutex<HashMap<String, VecDeque<f64>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_seconds: u64) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window_seconds: window_seconds.max(1),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Consume one slot for `key` in `bucket`, or deny without consuming.
    pub fn acquire(&self, bucket: &str, key: &str) -> Decision {
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        let window = self.window_seconds as f64;

        let mut buckets = self.buckets.lock().unwrap();
        let q = buckets.entry(format!("{bucket}:{key}")).or_default();
        while q.front().is_some_and(|t| now - t > window) {
            q.pop_front();
        }

        if q.len() >= self.max_requests as usize {
            let reset = q.front().map(|t| t + window).unwrap_or(now + window);
            return Decision {
                allowed: false,
                limit: self.max_requests,
                remaining: 0,
                reset: reset.ceil() as i64,
            };
        }

        q.push_back(now);
        Decision {
            allowed: true,
            limit: self.max_requests,
            remaining: self.max_requests - q.len() as u32,
            reset: (now + window).ceil() as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_denies() {
        let limiter = RateLimiter::new(2, 60);
        let d1 = limiter.acquire("gen", "k");
        let d2 = limiter.acquire("gen", "k");
        let d3 = limiter.acquire("gen", "k");
        assert!(d1.allowed && d2.allowed);
        assert_eq!(d1.remaining, 1);
        assert_eq!(d2.remaining, 0);
        assert!(!d3.allowed);
        assert_eq!(d3.remaining, 0);
        assert!(d3.reset >= chrono::Utc::now().timestamp());
        assert!(d3.retry_after_seconds() >= 1);
    }

    #[test]
    fn keys_and_buckets_are_independent() {
        let limiter = RateLimiter::new(1, 60);
        assert!(limiter.acquire("gen", "a").allowed);
        assert!(limiter.acquire("gen", "b").allowed);
        assert!(limiter.acquire("fill", "a").allowed);
        assert!(!limiter.acquire("gen", "a").allowed);
    }

    #[test]
    fn denial_does_not_consume_a_slot() {
        let limiter = RateLimiter::new(1, 60);
        assert!(limiter.acquire("gen", "k").allowed);
        for _ in 0..5 {
            assert!(!limiter.acquire("gen", "k").allowed);
        }
        // Still exactly one stored timestamp.
        let buckets = limiter.buckets.lock().unwrap();
        assert_eq!(buckets.get("gen:k").unwrap().len(), 1);
    }
}
