//! # WAF Session
//!
//! Session acquisition and challenge recovery for reservation platforms that sit
//! behind a JavaScript bot-detection interstitial. A headless browser solves the
//! challenge once per origin, the resulting cookies are cached and persisted, and
//! requests that come back challenged are transparently re-solved and retried once.

/// Client that attaches session cookies and recovers from challenge pages.
mod client;
pub use client::*;

/// Headless browser challenge solving.
mod solver;
pub use solver::*;

/// Per-origin credential cache with single-flight solving.
mod session_manager;
pub use session_manager::*;

/// On-disk persistence of solved credentials.
mod store;
pub use store::*;

/// Raw HTTP transport abstraction.
mod transport;
pub use transport::*;

/// Shared types and errors.
mod types;
pub use types::*;
