//! # Notification Services
//!
//! This crate provides the notification collaborator used by the scanner.
//! It defines the `Notifier` interface plus a Pushover implementation for
//! real deliveries and a log-only implementation for dry runs.

/// Notifier implementations (Pushover, log).
pub mod service;
/// Notifier trait, messages and errors.
pub mod types;

pub use service::{LogNotifier, PushoverNotifier};
pub use types::{Notification, NotificationError, Notifier, PRIORITY_ERROR, PRIORITY_HIT};
