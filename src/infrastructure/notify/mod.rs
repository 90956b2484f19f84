//! Chat-webhook notifier. Outbound notifications are POSTed as a JSON
//! payload `{"channel": ..., "text": ...}`, a shape compatible with
//! Slack-style incoming webhooks.

use crate::domain::ports::Notifier;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::warn;

pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, url }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, channel: &str, message: &str) -> Result<()> {
        let payload = serde_json::json!({ "channel": channel, "text": message });
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("sending webhook notification")?;
        if !response.status().is_success() {
            warn!(status = %response.status(), channel, "webhook notification rejected");
        }
        Ok(())
    }
}
