//! Per-provider cool-off after rate-limit or overload responses.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct BackoffState {
    delay_s: f64,
    until: Instant,
}

/// Tracks which providers are cooling off and for how long. Delays grow by
/// 1.5x per consecutive trigger, bounded by `[initial, max]`, and reset once
/// a provider has been quiet past its deadline.
#[derive(Debug)]
pub struct BackoffRegistry {
    initial_s: f64,
    max_s: f64,
    states: Mutex<HashMap<String, BackoffState>>,
}

impl BackoffRegistry {
    pub fn new(initial_s: f64, max_s: f64) -> Self {
        Self {
            initial_s,
            max_s: max_s.max(initial_s),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Record a rate-limit/overload signal for `key` with multiplicative
    /// growth. Returns the delay applied.
    pub fn record(&self, key: &str) -> Duration {
        let mut states = self.states.lock().unwrap();
        let now = Instant::now();
        let delay_s = match states.get(key) {
            // Still (or recently) backing off: grow the delay.
            Some(prev) if now < prev.until + Duration::from_secs_f64(prev.delay_s) => {
                (prev.delay_s * 1.5).clamp(self.initial_s, self.max_s)
            }
            _ => self.initial_s,
        };
        let delay = Duration::from_secs_f64(delay_s);
        states.insert(
            key.to_string(),
            BackoffState {
                delay_s,
                until: now + delay,
            },
        );
        tracing::warn!(provider = key, delay_s, "Provider backing off");
        delay
    }

    /// Record a fixed-duration backoff (used for the reviewer).
    pub fn record_fixed(&self, key: &str, delay_s: f64) {
        let mut states = self.states.lock().unwrap();
        states.insert(
            key.to_string(),
            BackoffState {
                delay_s,
                until: Instant::now() + Duration::from_secs_f64(delay_s),
            },
        );
    }

    /// True while `key` is inside its cool-off window.
    pub fn active(&self, key: &str) -> bool {
        let states = self.states.lock().unwrap();
        states
            .get(key)
            .map(|s| Instant::now() < s.until)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_record_uses_initial_delay() {
        let reg = BackoffRegistry::new(2.0, 60.0);
        assert!(!reg.active("openrouter"));
        let d = reg.record("openrouter");
        assert_eq!(d, Duration::from_secs_f64(2.0));
        assert!(reg.active("openrouter"));
        assert!(!reg.active("groq"));
    }

    #[test]
    fn consecutive_records_grow_by_half() {
        let reg = BackoffRegistry::new(2.0, 60.0);
        reg.record("gemini");
        let d2 = reg.record("gemini");
        assert_eq!(d2, Duration::from_secs_f64(3.0));
        let d3 = reg.record("gemini");
        assert_eq!(d3, Duration::from_secs_f64(4.5));
    }

    #[test]
    fn growth_is_capped_at_max() {
        let reg = BackoffRegistry::new(50.0, 60.0);
        reg.record("p");
        let d = reg.record("p");
        assert_eq!(d, Duration::from_secs_f64(60.0));
        let d = reg.record("p");
        assert_eq!(d, Duration::from_secs_f64(60.0));
    }

    #[test]
    fn fixed_backoff_sets_window() {
        let reg = BackoffRegistry::new(1.0, 10.0);
        reg.record_fixed("reviewer", 30.0);
        assert!(reg.active("reviewer"));
    }
}
