//! Downstream notification channels: the live feed and alert mail.
//!
//! Both are best-effort. Failures are returned to the caller, which logs
//! them and carries on; nothing here is retried.

pub mod feed;
pub mod mail;

pub use feed::{FeedMessage, FeedPublisher, HttpFeedPublisher};
pub use mail::{AlertPool, HttpMailRelay, MailDispatcher};

use anyhow::{Context, Result};
use std::time::Duration;

/// Blocking HTTP client with a bounded request timeout.
pub(crate) fn http_client(timeout_ms: u64) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .connect_timeout(Duration::from_millis(timeout_ms))
        .user_agent(concat!("segment-monitor/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}
