//! # Campground Scan
//!
//! This crate crawls reservation platforms for available campsites. Each
//! configured search walks a tree of maps (or checks one site), resolves
//! display names, filters the hits and notifies them. Failures are reported
//! through a per-message throttle.

/// Types for campground scan operations
mod scan_types;
pub use scan_types::*;

/// Platform profiles and configuration files
mod config;
pub use config::*;

/// Client for the reservation platform API
mod reservation_api;
pub use reservation_api::*;

/// Map and site display names
mod names;
pub use names::*;

/// Recursive availability crawl
mod crawler;
pub use crawler::*;

/// Error notification throttle
mod error_throttle;
pub use error_throttle::*;

/// Scan loop
mod executor;
pub use executor::*;

#[cfg(test)]
mod test_support;
