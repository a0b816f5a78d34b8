//! Notifier plugins: `notifier.log` writes through `tracing`,
//! `notifier.webhook` posts JSON to an operator endpoint.

mod log;
mod webhook;

pub use log::{LogNotifier, LogNotifierModule};
pub use webhook::{WebhookNotifier, WebhookNotifierModule};
