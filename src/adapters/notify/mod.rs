//! Notification sinks: log output and an optional JSON webhook.

pub mod log_notifier;
pub mod message;
pub mod webhook;

pub use log_notifier::LogNotifier;
pub use webhook::WebhookNotifier;
