//! In-process sliding-window rate limiter.
//!
//! Fallback path for when the durable store is absent or erroring; the
//! durable window lives in `store::window_admit`. Both enforce the same
//! bound: at most `max_calls` admissions per `window_secs` interval.

use std::collections::HashMap;
use std::sync::Mutex;

pub struct MemoryWindow {
    buckets: Mutex<HashMap<String, Vec<f64>>>,
}

impl MemoryWindow {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Evict expired timestamps, then admit and record the call if the
    /// bucket has room. The whole read-evict-write sequence holds the lock.
    pub fn admit(&self, bucket: &str, max_calls: u32, window_secs: u64, now: f64) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        let calls = buckets.entry(bucket.to_string()).or_default();
        calls.retain(|t| now - t < window_secs as f64);
        if calls.len() >= max_calls as usize {
            return false;
        }
        calls.push(now);
        true
    }
}

impl Default for MemoryWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_cap() {
        let window = MemoryWindow::new();
        let now = 1000.0;
        for _ in 0..3 {
            assert!(window.admit("web_search", 3, 60, now));
        }
        assert!(!window.admit("web_search", 3, 60, now));
    }

    #[test]
    fn rejected_call_does_not_consume_a_slot() {
        let window = MemoryWindow::new();
        let now = 1000.0;
        for _ in 0..3 {
            assert!(window.admit("b", 3, 60, now));
        }
        for _ in 0..5 {
            assert!(!window.admit("b", 3, 60, now + 1.0));
        }
        // Only the three admitted entries expire; admission resumes after.
        assert!(window.admit("b", 3, 60, now + 61.0));
    }

    #[test]
    fn window_slides() {
        let window = MemoryWindow::new();
        assert!(window.admit("b", 2, 60, 0.0));
        assert!(window.admit("b", 2, 60, 30.0));
        assert!(!window.admit("b", 2, 60, 59.0));
        // First entry is now older than the window.
        assert!(window.admit("b", 2, 60, 61.0));
    }

    #[test]
    fn buckets_are_independent() {
        let window = MemoryWindow::new();
        assert!(window.admit("a", 1, 60, 0.0));
        assert!(!window.admit("a", 1, 60, 1.0));
        assert!(window.admit("b", 1, 60, 1.0));
    }

    #[test]
    fn no_interval_exceeds_the_cap() {
        // Admissions at arbitrary times: any 60s interval holds at most 3.
        let window = MemoryWindow::new();
        let mut admitted: Vec<f64> = Vec::new();
        let mut t = 0.0;
        for _ in 0..200 {
            if window.admit("b", 3, 60, t) {
                admitted.push(t);
            }
            t += 7.0;
        }
        for &start in &admitted {
            let in_window = admitted
                .iter()
                .filter(|&&a| a >= start && a < start + 60.0)
                .count();
            assert!(in_window <= 3, "interval starting at {start} admitted {in_window}");
        }
    }
}
