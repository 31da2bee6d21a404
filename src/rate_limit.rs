//! Fixed-window rate limiting behind a small capability trait.
//!
//! The table is bounded: expired windows are purged before a new key is
//! admitted, and when the table is still full the key with the oldest
//! window is evicted.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::StorefrontError;

#[async_trait]
pub trait RateLimit: Send + Sync {
    /// Counts one request for `key`; `RateLimited` once the window is used up.
    async fn check(&self, key: &str) -> Result<(), StorefrontError>;
}

#[derive(Clone, Copy, Debug)]
struct Window {
    started: Instant,
    count: u32,
}

pub struct BoundedRateLimiter {
    max_requests: u32,
    window: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, Window>>,
}

impl BoundedRateLimiter {
    pub fn new(max_requests: u32, window: Duration, capacity: usize) -> Self {
        Self { max_requests, window, capacity: capacity.max(1), entries: Mutex::new(HashMap::new()) }
    }

    pub async fn tracked_keys(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub(crate) async fn check_at(&self, key: &str, now: Instant) -> Result<(), StorefrontError> {
        let mut entries = self.entries.lock().await;

        if !entries.contains_key(key) && entries.len() >= self.capacity {
            let window = self.window;
            entries.retain(|_, w| now.saturating_duration_since(w.started) < window);
            if entries.len() >= self.capacity {
                let oldest = entries.iter().min_by_key(|(_, w)| w.started).map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    debug!(evicted = %oldest, "rate limiter full, evicting oldest window");
                    entries.remove(&oldest);
                }
            }
        }

        let entry = entries.entry(key.to_string()).or_insert(Window { started: now, count: 0 });
        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = Window { started: now, count: 0 };
        }
        if entry.count >= self.max_requests {
            let elapsed = now.saturating_duration_since(entry.started);
            let retry_after_secs = self.window.saturating_sub(elapsed).as_secs().max(1);
            return Err(StorefrontError::RateLimited { retry_after_secs });
        }
        entry.count += 1;
        Ok(())
    }
}

#[async_trait]
impl RateLimit for BoundedRateLimiter {
    async fn check(&self, key: &str) -> Result<(), StorefrontError> {
        self.check_at(key, Instant::now()).await
    }
}
