use crate::types::*;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";

/// Sends notifications through the Pushover messages API.
#[derive(Debug, Clone)]
pub struct PushoverNotifier {
    client: Client,
    api_url: String,
    user_key: String,
    app_token: String,
}

#[derive(Debug, Deserialize)]
struct PushoverResponse {
    status: i32,
    #[serde(default)]
    errors: Vec<String>,
}

impl PushoverNotifier {
    /// Creates a notifier for the given user (or group) key and application token.
    pub fn new(user_key: String, app_token: String) -> Result<Self, NotificationError> {
        if user_key.is_empty() || app_token.is_empty() {
            return Err(NotificationError::MissingCredentials);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        Ok(Self {
            client,
            api_url: PUSHOVER_API_URL.to_string(),
            user_key,
            app_token,
        })
    }

    /// Creates a notifier from `PUSHOVER_USER` and `PUSHOVER_TOKEN`.
    pub fn from_env() -> Result<Self, NotificationError> {
        let user_key =
            std::env::var("PUSHOVER_USER").map_err(|_| NotificationError::MissingCredentials)?;
        let app_token =
            std::env::var("PUSHOVER_TOKEN").map_err(|_| NotificationError::MissingCredentials)?;
        Self::new(user_key, app_token)
    }

    /// Form fields for one message. Pushover rejects an empty message, so the
    /// title stands in for it.
    fn form_fields(&self, notification: &Notification) -> Vec<(&'static str, String)> {
        let message = if notification.message.is_empty() {
            notification.title.clone()
        } else {
            notification.message.clone()
        };

        let mut fields = vec![
            ("token", self.app_token.clone()),
            ("user", self.user_key.clone()),
            ("title", notification.title.clone()),
            ("message", message),
            ("priority", notification.priority.to_string()),
        ];
        if let Some(url) = &notification.url {
            fields.push(("url", url.clone()));
        }
        fields
    }
}

#[async_trait]
impl Notifier for PushoverNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError> {
        log::info!("📨 Sending push notification: {}", notification.title);

        let response = self
            .client
            .post(&self.api_url)
            .form(&self.form_fields(notification))
            .send()
            .await
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        let parsed: Option<PushoverResponse> = serde_json::from_str(&body).ok();
        match parsed {
            Some(reply) if status.is_success() && reply.status == 1 => Ok(()),
            Some(reply) if !reply.errors.is_empty() => Err(NotificationError::Rejected {
                status: status.as_u16(),
                body: reply.errors.join("; "),
            }),
            _ => Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError> {
        log::info!(
            "🔔 {} {} {}",
            notification.title,
            notification.message,
            notification.url.as_deref().unwrap_or("")
        );
        Ok(())
    }
}
