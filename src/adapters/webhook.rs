//! JSON webhook notifications
//!
//! Posts agent flags to a chat/paging webhook.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{FlagKind, Notifier};

/// Webhook notification client
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    msg_type: &'a str,
    content: WebhookContent,
}

#[derive(Serialize)]
struct WebhookContent {
    text: String,
}

impl WebhookNotifier {
    /// Create a notifier from `QUORUM_WEBHOOK_URL`, if set
    pub fn from_env() -> Option<Arc<Self>> {
        std::env::var("QUORUM_WEBHOOK_URL").ok().map(|url| {
            info!("Webhook notifications enabled");
            Self::new(url)
        })
    }

    pub fn new(webhook_url: String) -> Arc<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Arc::new(Self {
            client,
            webhook_url,
        })
    }

    /// Send a text message to the webhook
    pub async fn send_message(&self, text: &str) -> Result<(), String> {
        let message = WebhookMessage {
            msg_type: "text",
            content: WebhookContent {
                text: text.to_string(),
            },
        };

        match self.client.post(&self.webhook_url).json(&message).send().await {
            Ok(resp) => {
                if resp.status().is_success() {
                    debug!("Webhook notification sent");
                    Ok(())
                } else {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    error!("Webhook notification failed: {} - {}", status, body);
                    Err(format!("HTTP {}: {}", status, body))
                }
            }
            Err(e) => {
                error!("Webhook request failed: {}", e);
                Err(e.to_string())
            }
        }
    }
}

pub(crate) fn format_flag(agent_id: &str, flag: FlagKind, details: &str) -> String {
    let title = match flag {
        FlagKind::LowPerformer => "Agent below accuracy threshold",
        FlagKind::Overconfident => "Agent overconfident",
    };
    format!("[{}] {}\nAgent: {}\n{}", flag, title, agent_id, details)
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, agent_id: &str, flag: FlagKind, details: &str) -> Result<(), String> {
        self.send_message(&format_flag(agent_id, flag, details)).await
    }
}
