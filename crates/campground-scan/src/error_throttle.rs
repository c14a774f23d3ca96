use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

/// Limits error notifications to one per distinct message per cooldown window.
pub struct ErrorThrottle {
    cooldown: Duration,
    last_notified: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl ErrorThrottle {
    /// Create a throttle with an empty history
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_notified: Mutex::new(HashMap::new()),
        }
    }

    fn eligible(&self, last: Option<&DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last {
            Some(last) => now - *last > self.cooldown,
            None => true,
        }
    }

    /// Whether `message` may be notified now
    pub async fn should_notify(&self, message: &str) -> bool {
        self.should_notify_at(message, Utc::now()).await
    }

    /// [`ErrorThrottle::should_notify`] evaluated at `now`
    pub async fn should_notify_at(&self, message: &str, now: DateTime<Utc>) -> bool {
        let last_notified = self.last_notified.lock().await;
        self.eligible(last_notified.get(message), now)
    }

    /// Record that `message` was notified now
    pub async fn record_notified(&self, message: &str) {
        self.record_notified_at(message, Utc::now()).await
    }

    /// [`ErrorThrottle::record_notified`] stamped with `now`
    pub async fn record_notified_at(&self, message: &str, now: DateTime<Utc>) {
        self.last_notified
            .lock()
            .await
            .insert(message.to_string(), now);
    }

    /// Check and record in one step.
    ///
    /// Concurrent searches failing with the same message get a single `true`.
    pub async fn claim(&self, message: &str) -> bool {
        self.claim_at(message, Utc::now()).await
    }

    /// [`ErrorThrottle::claim`] evaluated at `now`
    pub async fn claim_at(&self, message: &str, now: DateTime<Utc>) -> bool {
        let mut last_notified = self.last_notified.lock().await;
        if !self.eligible(last_notified.get(message), now) {
            return false;
        }
        last_notified.insert(message.to_string(), now);
        true
    }
}
