use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::sync::Mutex;

use super::http_client;
use crate::config::MailConfig;
use crate::monitor::event::Tier;
use crate::ocr::Reading;

/// Delivers one pre-formatted alert body to a list of recipients.
pub trait MailDispatcher: Send + Sync {
    fn send(&self, body: &str, recipients: &[String]) -> Result<()>;
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    body: &'a str,
}

/// Hands mails to an HTTP mail relay.
pub struct HttpMailRelay {
    client: reqwest::blocking::Client,
    config: MailConfig,
}

impl HttpMailRelay {
    pub fn new(config: &MailConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_ms)?,
            config: config.clone(),
        })
    }
}

impl MailDispatcher for HttpMailRelay {
    fn send(&self, body: &str, recipients: &[String]) -> Result<()> {
        if recipients.is_empty() {
            bail!("no enabled mail recipients");
        }

        let request = RelayRequest {
            from: &self.config.sender,
            to: recipients,
            subject: &self.config.subject,
            body,
        };
        let response = self
            .client
            .post(&self.config.relay_endpoint)
            .json(&request)
            .send()
            .with_context(|| format!("Failed to reach mail relay {}", self.config.relay_endpoint))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Mail relay {} answered HTTP {}",
                self.config.relay_endpoint,
                response.status()
            ));
        }
        Ok(())
    }
}

/// One alert line.
pub fn alert_message(camera_name: &str, setting_name: &str, tier: Tier, value: Reading) -> String {
    format!(
        "Camera {} / setting {} changed to {}, value: {}",
        camera_name,
        setting_name,
        tier.label(),
        value
    )
}

/// Alert lines collected during one processing cycle.
///
/// Displays of the same cycle push concurrently; the cycle drains the pool
/// once and sends everything as a single mail.
#[derive(Default)]
pub struct AlertPool {
    messages: Mutex<Vec<String>>,
}

impl AlertPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: String) {
        self.messages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(message);
    }

    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock().unwrap_or_else(|p| p.into_inner()))
    }
}
