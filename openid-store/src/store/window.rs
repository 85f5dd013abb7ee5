//! The nonce acceptance window

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Duration;
use openid_core::nonce::default_skew;

/// Tolerated clock drift, shared by every nonce check of one store
#[derive(Debug)]
pub struct SkewWindow {
    secs: AtomicI64,
}

impl SkewWindow {
    pub fn new(skew: Duration) -> Self {
        Self {
            secs: AtomicI64::new(skew.num_seconds().abs()),
        }
    }

    pub fn get(&self) -> Duration {
        Duration::seconds(self.secs.load(Ordering::Relaxed))
    }

    pub fn set(&self, skew: Duration) {
        self.secs.store(skew.num_seconds().abs(), Ordering::Relaxed);
    }

    /// Whether a nonce issued at `timestamp` may still be used at `now`
    pub fn accepts(&self, timestamp: i64, now: i64) -> bool {
        now.abs_diff(timestamp) <= self.secs.load(Ordering::Relaxed).unsigned_abs()
    }

    /// Nonces older than this can no longer be accepted and may be forgotten
    pub fn cutoff(&self, now: i64) -> i64 {
        now.saturating_sub(self.secs.load(Ordering::Relaxed))
    }
}

impl Default for SkewWindow {
    fn default() -> Self {
        Self::new(default_skew())
    }
}
