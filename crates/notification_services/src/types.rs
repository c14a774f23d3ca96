use async_trait::async_trait;
use serde::Serialize;

/// Priority of campsite availability alerts.
pub const PRIORITY_HIT: i32 = 1;

/// Priority of error reports.
pub const PRIORITY_ERROR: i32 = -1;

/// Types for notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Request to the push service could not be sent.
    #[error("Notification request failed: {0}")]
    Http(String),

    /// The push service answered with an error.
    #[error("Notification rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status returned
        status: u16,
        /// Response body
        body: String,
    },

    /// Push credentials are not configured.
    #[error("Pushover credentials are not configured")]
    MissingCredentials,
}

/// One outgoing notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Short headline
    pub title: String,
    /// Body text, may be empty
    pub message: String,
    /// Link opened from the notification
    pub url: Option<String>,
    /// Positive for availability, negative for errors
    pub priority: i32,
}

impl Notification {
    /// Build a notification from borrowed parts.
    pub fn new(title: &str, message: &str, url: Option<&str>, priority: i32) -> Self {
        Self {
            title: title.to_string(),
            message: message.to_string(),
            url: url.map(str::to_string),
            priority,
        }
    }
}

/// Delivers notifications. Callers treat delivery as best effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver (or log) a single notification.
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError>;
}
