use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, info, warn};

use crate::session_manager::SessionRegistry;
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::types::{Credential, Origin, WafError};

/// Caller-supplied request settings.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            body: None,
        }
    }
}

/// HTTP client that rides on the per-origin WAF session.
///
/// Each request carries the fixed user agent, the caller's headers and the
/// session cookies. A challenged response triggers one invalidate + re-solve +
/// retry; a second challenge fails the call with [`WafError::StillChallenged`].
pub struct GuardedClient {
    transport: Arc<dyn Transport>,
    sessions: Arc<SessionRegistry>,
    user_agent: String,
}

impl GuardedClient {
    /// Create a client over `transport`, taking credentials from `sessions`
    pub fn new(
        transport: Arc<dyn Transport>,
        sessions: Arc<SessionRegistry>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            sessions,
            user_agent: user_agent.into(),
        }
    }

    /// Session registry backing this client
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Issue a request, recovering once from a challenge page.
    pub async fn request(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse, WafError> {
        let origin = Origin::from_url(url)?;
        let session = self.sessions.session(&origin).await;

        let credential = session.credential().await?;
        let response = self.send_with(url, options, &credential).await?;

        if !looks_like_challenge(&response) {
            return Ok(response);
        }

        info!("[WAF] Challenge detected on {}, re-solving...", url);
        session.invalidate_stale(&credential).await;
        let fresh = session.credential().await?;

        let retry = self.send_with(url, options, &fresh).await?;

        if looks_like_challenge(&retry) {
            warn!("[WAF] Still challenged after re-solve for {}", url);
            return Err(WafError::StillChallenged {
                url: url.to_string(),
            });
        }

        Ok(retry)
    }

    /// GET `url` with default options
    pub async fn get(&self, url: &str) -> Result<HttpResponse, WafError> {
        self.request(url, &RequestOptions::default()).await
    }

    async fn send_with(
        &self,
        url: &str,
        options: &RequestOptions,
        credential: &Credential,
    ) -> Result<HttpResponse, WafError> {
        let mut headers = Vec::with_capacity(options.headers.len() + 2);
        headers.push(("User-Agent".to_string(), self.user_agent.clone()));
        headers.extend(
            options
                .headers
                .iter()
                .filter(|(name, _)| !name.eq_ignore_ascii_case("cookie"))
                .cloned(),
        );

        let cookie = credential.cookie_header();
        if !cookie.is_empty() {
            headers.push(("Cookie".to_string(), cookie));
        }

        debug!("{} {}", options.method, url);

        let response = self
            .transport
            .send(HttpRequest {
                method: options.method.clone(),
                url: url.to_string(),
                headers,
                body: options.body.clone(),
            })
            .await?;

        Ok(response)
    }
}

/// A 403, or HTML where the API should answer with JSON, means the WAF
/// interstitial was served instead of the resource.
pub fn looks_like_challenge(response: &HttpResponse) -> bool {
    if response.status == 403 {
        return true;
    }

    response
        .content_type
        .as_deref()
        .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
        .unwrap_or(false)
}
