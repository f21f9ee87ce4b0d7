use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use super::http_client;
use crate::config::FeedConfig;
use crate::monitor::event::Tier;
use crate::ocr::Reading;

/// Live-feed message for one consensus reading.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FeedMessage {
    pub display_id: String,
    pub value: Reading,
    pub timestamp: String,
    pub event_tier: Tier,
}

/// Fan-out to connected viewers. At most once, no acknowledgement.
pub trait FeedPublisher: Send + Sync {
    fn publish(&self, message: &FeedMessage) -> Result<()>;
}

/// Posts each message as JSON to an HTTP endpoint.
pub struct HttpFeedPublisher {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpFeedPublisher {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_ms)?,
            endpoint: config.endpoint.clone(),
        })
    }
}

impl FeedPublisher for HttpFeedPublisher {
    fn publish(&self, message: &FeedMessage) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(message)
            .send()
            .with_context(|| format!("Failed to reach feed endpoint {}", self.endpoint))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Feed endpoint {} answered HTTP {}",
                self.endpoint,
                response.status()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_shape() {
        let msg = FeedMessage {
            display_id: "boiler".to_string(),
            value: Reading::Value(12.5),
            timestamp: "2024-05-01 08:00:00".to_string(),
            event_tier: Tier::Alert,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "display_id": "boiler",
                "value": 12.5,
                "timestamp": "2024-05-01 08:00:00",
                "event_tier": "alert"
            })
        );

        let unreadable = FeedMessage {
            value: Reading::Unreadable,
            event_tier: Tier::OcrError,
            ..msg
        };
        let json = serde_json::to_value(&unreadable).unwrap();
        assert_eq!(json["value"], "NaN");
        assert_eq!(json["event_tier"], "ocr_error");
    }

    #[test]
    fn test_unreachable_endpoint_is_an_error() {
        let publisher = HttpFeedPublisher::new(&FeedConfig {
            endpoint: "http://127.0.0.1:9/feed".to_string(),
            timeout_ms: 200,
        })
        .unwrap();
        let msg = FeedMessage {
            display_id: "boiler".to_string(),
            value: Reading::Value(1.0),
            timestamp: "2024-05-01 08:00:00".to_string(),
            event_tier: Tier::Normal,
        };
        assert!(publisher.publish(&msg).is_err());
    }
}
