use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Browser user agent sent by both the solver and the guarded client.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Scheme + host (+ port) of a target site; the unit of session scoping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Origin(String);

impl Origin {
    /// Extract the origin of an absolute `http(s)` URL.
    pub fn from_url(url: &str) -> Result<Self, WafError> {
        let parsed =
            Url::parse(url).map_err(|e| WafError::InvalidUrl(format!("{}: {}", url, e)))?;

        let origin = parsed.origin();
        if !origin.is_tuple() {
            return Err(WafError::InvalidUrl(format!("{} has no origin", url)));
        }

        Ok(Self(origin.ascii_serialization()))
    }

    /// The origin as `scheme://host[:port]`, without a trailing slash.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Root page of the site, which is where the challenge gets solved.
    pub fn root_url(&self) -> String {
        format!("{}/", self.0)
    }

    /// Filesystem-safe identifier: every non-alphanumeric character becomes `_`.
    pub fn storage_key(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single cookie captured from the browser context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
    /// Expiry as unix seconds; `None` for session cookies.
    #[serde(default)]
    pub expires: Option<i64>,
}

/// The full cookie set produced by one completed solve.
///
/// A credential is only ever constructed from a finished solve (or a persisted
/// copy of one), so holders never observe a partially written cookie set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub origin: Origin,
    pub cookies: Vec<Cookie>,
    pub solved_at: DateTime<Utc>,
}

impl Credential {
    /// Build a credential stamped with the current time.
    pub fn new(origin: Origin, cookies: Vec<Cookie>) -> Self {
        Self {
            origin,
            cookies,
            solved_at: Utc::now(),
        }
    }

    /// Serialize as a `Cookie` request header value, preserving cookie order.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Comma separated cookie names, for logging without leaking values.
    pub fn cookie_names(&self) -> String {
        self.cookies
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Settings shared by the solver, the session managers and the transport.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// User agent for the browser and for API requests
    pub user_agent: String,

    /// Upper bound on the challenge page navigation (default: 60 seconds)
    pub navigation_timeout: Duration,

    /// Time given to the challenge script to commit its cookies (default: 5 seconds)
    pub settle_delay: Duration,

    /// Run the browser without a window
    pub headless: bool,

    /// Directory for persisted credentials; `None` disables persistence
    pub persistence_dir: Option<PathBuf>,

    /// Timeout for plain API requests (default: 30 seconds)
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            navigation_timeout: Duration::from_secs(60),
            settle_delay: Duration::from_secs(5),
            headless: true,
            persistence_dir: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Failure of the browser-automation step.
///
/// Cloneable because a single solve outcome is handed to every caller that was
/// waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolveError {
    /// Browser could not be configured or started
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// Page could not be opened or navigated
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// Navigation exceeded the configured bound
    #[error("navigation timed out after {0}s")]
    Timeout(u64),

    /// Cookies could not be read back from the browser
    #[error("failed to read cookies: {0}")]
    Cookies(String),
}

/// Lower-level transport failure (DNS, connect, timeout, reset).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self(e.to_string())
    }
}

/// Errors surfaced by the guarded client.
#[derive(Debug, thiserror::Error)]
pub enum WafError {
    /// Solving the challenge failed
    #[error("[WAF] Failed to solve challenge: {0}")]
    Solve(#[from] SolveError),

    /// The retry after a fresh solve was challenged again
    #[error("[WAF] Still getting challenge after re-solve for {url}")]
    StillChallenged {
        /// Request URL
        url: String,
    },

    /// Transport failure, passed through untouched
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// URL could not be parsed or has no origin
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Response body did not match the expected shape
    #[error("failed to decode response from {url}: {message}")]
    Decode {
        /// Request URL
        url: String,
        /// Decoder message
        message: String,
    },
}

/// Errors from credential persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem error
    #[error("credential file io error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be (de)serialized
    #[error("credential file format error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_from_url() {
        let origin = Origin::from_url("https://camping.bcparks.ca/api/availability/map?mapId=1")
            .unwrap();
        assert_eq!(origin.as_str(), "https://camping.bcparks.ca");
        assert_eq!(origin.root_url(), "https://camping.bcparks.ca/");

        let with_port = Origin::from_url("http://127.0.0.1:8080/x").unwrap();
        assert_eq!(with_port.as_str(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_origin_rejects_relative_and_opaque() {
        assert!(matches!(
            Origin::from_url("api/availability/map"),
            Err(WafError::InvalidUrl(_))
        ));
        assert!(matches!(
            Origin::from_url("data:text/plain,hello"),
            Err(WafError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_storage_key_is_filesystem_safe() {
        let origin = Origin::from_url("https://reservation.pc.gc.ca/").unwrap();
        assert_eq!(origin.storage_key(), "https___reservation_pc_gc_ca");
    }

    #[test]
    fn test_cookie_header_keeps_order() {
        let origin = Origin::from_url("https://example.org").unwrap();
        let credential = Credential::new(
            origin,
            vec![
                Cookie {
                    name: "aws-waf-token".into(),
                    value: "abc".into(),
                    domain: "example.org".into(),
                    path: "/".into(),
                    expires: None,
                },
                Cookie {
                    name: "session".into(),
                    value: "42".into(),
                    domain: "example.org".into(),
                    path: "/".into(),
                    expires: Some(1_900_000_000),
                },
            ],
        );

        assert_eq!(credential.cookie_header(), "aws-waf-token=abc; session=42");
        assert_eq!(credential.cookie_names(), "aws-waf-token, session");
    }
}
