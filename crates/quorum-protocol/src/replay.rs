use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use quorum_models::message::SecurityBlock;

/// Seen-nonce cache backed by moka.
///
/// Rejects a signature whose nonce was already accepted inside the window, and
/// any signature whose signing time lies outside the window. Entries are
/// evicted after the window elapses, which bounds memory.
pub struct ReplayGuard {
    seen: Cache<String, ()>,
    window: Duration,
}

impl ReplayGuard {
    pub fn new(window: Duration, max_capacity: u64) -> Self {
        Self {
            seen: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(window)
                .build(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Accept the block once. A second call with the same nonce returns false.
    pub fn check_and_record(&self, security: &SecurityBlock, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(security.timestamp);
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::MAX);
        if age > window || -age > window {
            return false;
        }

        self.seen
            .entry(security.nonce.clone())
            .or_insert(())
            .is_fresh()
    }

    pub fn entry_count(&self) -> u64 {
        self.seen.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(nonce: &str, at: DateTime<Utc>) -> SecurityBlock {
        SecurityBlock {
            signature: "00".to_string(),
            nonce: nonce.to_string(),
            timestamp: at,
        }
    }

    #[test]
    fn first_use_accepted_second_rejected() {
        let guard = ReplayGuard::new(Duration::from_secs(60), 100);
        let now = Utc::now();
        assert!(guard.check_and_record(&block("n1", now), now));
        assert!(!guard.check_and_record(&block("n1", now), now));
        assert!(guard.check_and_record(&block("n2", now), now));
    }

    #[test]
    fn stale_signature_rejected() {
        let guard = ReplayGuard::new(Duration::from_secs(60), 100);
        let now = Utc::now();
        let old = now - chrono::Duration::seconds(61);
        assert!(!guard.check_and_record(&block("n1", old), now));
    }

    #[test]
    fn future_signature_rejected() {
        let guard = ReplayGuard::new(Duration::from_secs(60), 100);
        let now = Utc::now();
        let ahead = now + chrono::Duration::seconds(120);
        assert!(!guard.check_and_record(&block("n1", ahead), now));
    }

    #[test]
    fn nonce_forgotten_after_window() {
        let guard = ReplayGuard::new(Duration::from_millis(50), 100);
        let now = Utc::now();
        assert!(guard.check_and_record(&block("n1", now), now));

        std::thread::sleep(Duration::from_millis(200));

        // Still rejected on age grounds when checked against the original time window...
        let later = Utc::now();
        assert!(!guard.check_and_record(&block("n1", now), later));
        // ...but the cache itself no longer remembers the nonce.
        assert!(guard.check_and_record(&block("n1", later), later));
    }
}
