use std::path::Path;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::Cookie as CdpCookie;
use futures_util::StreamExt;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::types::{Cookie, Credential, Origin, SessionConfig, SolveError};

/// Obtains a fresh credential for an origin by passing its challenge.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Run the challenge for `origin` and return the cookies it produced.
    async fn solve(&self, origin: &Origin) -> Result<Credential, SolveError>;
}

/// Solves challenges with a disposable headless Chrome instance.
///
/// Every call launches its own browser with a throwaway profile directory,
/// so concurrent solves for different origins never share state.
pub struct ChromeSolver {
    config: SessionConfig,
}

impl ChromeSolver {
    /// Create a solver using the browser settings in `config`
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    fn build_browser_config(&self, profile_dir: &Path) -> Result<BrowserConfig, SolveError> {
        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile_dir)
            .request_timeout(self.config.navigation_timeout)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg(format!("--user-agent={}", self.config.user_agent));

        if !self.config.headless {
            builder = builder.with_head();
        }

        builder.build().map_err(SolveError::Launch)
    }

    /// Navigate to the root page, let the challenge script run and read cookies back.
    async fn drive(&self, browser: &Browser, origin: &Origin) -> Result<Vec<Cookie>, SolveError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SolveError::Navigation(e.to_string()))?;

        let target = origin.root_url();
        debug!("Navigating to {}", target);

        timeout(self.config.navigation_timeout, page.goto(target.as_str()))
            .await
            .map_err(|_| SolveError::Timeout(self.config.navigation_timeout.as_secs()))?
            .map_err(|e| SolveError::Navigation(e.to_string()))?;

        sleep(self.config.settle_delay).await;

        let cookies = page
            .get_cookies()
            .await
            .map_err(|e| SolveError::Cookies(e.to_string()))?;

        Ok(cookies.into_iter().map(Cookie::from).collect())
    }
}

#[async_trait]
impl ChallengeSolver for ChromeSolver {
    async fn solve(&self, origin: &Origin) -> Result<Credential, SolveError> {
        info!("[WAF] Solving challenge for {} ...", origin);

        let profile_dir = tempfile::Builder::new()
            .prefix("waf-session-")
            .tempdir()
            .map_err(|e| SolveError::Launch(format!("failed to create profile dir: {}", e)))?;

        let browser_config = self.build_browser_config(profile_dir.path())?;

        let (mut browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| SolveError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let outcome = self.drive(&browser, origin).await;

        // Teardown runs whatever the outcome was.
        if let Err(e) = browser.close().await {
            debug!("Browser close for {} failed: {}", origin, e);
        }
        if let Err(e) = browser.wait().await {
            debug!("Waiting for browser exit for {} failed: {}", origin, e);
        }
        handler_task.abort();
        drop(profile_dir);

        match outcome {
            Ok(cookies) => {
                let credential = Credential::new(origin.clone(), cookies);
                if credential.cookies.is_empty() {
                    warn!("[WAF] Challenge for {} finished without setting cookies", origin);
                }
                info!(
                    "[WAF] Challenge solved. Got {} cookies: {}",
                    credential.cookies.len(),
                    credential.cookie_names()
                );
                Ok(credential)
            }
            Err(e) => {
                error!("[WAF] Failed to solve challenge for {}: {}", origin, e);
                Err(e)
            }
        }
    }
}

impl From<CdpCookie> for Cookie {
    fn from(c: CdpCookie) -> Self {
        let expires = if c.session || c.expires < 0.0 {
            None
        } else {
            Some(c.expires as i64)
        };

        Self {
            name: c.name,
            value: c.value,
            domain: c.domain,
            path: c.path,
            expires,
        }
    }
}
