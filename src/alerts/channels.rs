//! Delivery channel implementations
//!
//! Every channel speaks HTTP through a shared `reqwest::Client`; email goes
//! through a mail gateway rather than SMTP directly. Channels report
//! failures as [`ChannelError`] and leave logging and bookkeeping to the
//! dispatcher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::config::{ChannelConfig, ChannelEntry};

use super::Alert;

const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";

/// Errors that can occur delivering through a single channel
#[derive(Debug)]
pub enum ChannelError {
    /// The HTTP request itself failed
    Request(String),

    /// The endpoint answered with a non-success status
    Rejected { status: u16 },

    /// The send did not finish within the per-channel time limit
    Timeout,
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Request(msg) => write!(f, "delivery request failed: {}", msg),
            ChannelError::Rejected { status } => {
                write!(f, "delivery rejected with status: {}", status)
            }
            ChannelError::Timeout => write!(f, "delivery timed out"),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChannelError::Timeout
        } else {
            ChannelError::Request(err.to_string())
        }
    }
}

/// One delivery channel. The dispatcher holds a collection of these and
/// knows nothing about individual channel kinds.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError>;
}

/// Build the channel collection from config, skipping disabled entries.
pub fn build_channels(entries: &[ChannelEntry]) -> Vec<Box<dyn AlertChannel>> {
    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to build HTTP client");

    entries
        .iter()
        .filter(|entry| entry.enabled)
        .map(|entry| -> Box<dyn AlertChannel> {
            match &entry.channel {
                ChannelConfig::Email {
                    gateway_url,
                    from,
                    to,
                } => Box::new(EmailChannel {
                    client: client.clone(),
                    gateway_url: gateway_url.clone(),
                    from: from.clone(),
                    to: to.clone(),
                }),
                ChannelConfig::Webhook { url } => Box::new(WebhookChannel {
                    client: client.clone(),
                    url: url.clone(),
                }),
                ChannelConfig::Slack { webhook_url } => Box::new(SlackChannel {
                    client: client.clone(),
                    webhook_url: webhook_url.clone(),
                }),
                ChannelConfig::Discord {
                    webhook_url,
                    user_id,
                } => Box::new(DiscordChannel {
                    client: client.clone(),
                    webhook_url: webhook_url.clone(),
                    user_id: user_id.clone(),
                }),
                ChannelConfig::Pushover { token, user_key } => Box::new(PushoverChannel {
                    client: client.clone(),
                    token: token.clone(),
                    user_key: user_key.clone(),
                }),
            }
        })
        .collect()
}

fn ensure_success(response: reqwest::Response) -> Result<(), ChannelError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(ChannelError::Rejected {
            status: response.status().as_u16(),
        })
    }
}

/// Generic JSON webhook.
pub struct WebhookChannel {
    client: Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: impl ToString) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let payload = json!({
            "id": alert.id,
            "type": alert.kind.to_string(),
            "severity": alert.severity.to_string(),
            "service": alert.service_id,
            "message": alert.message,
            "timestamp": alert.timestamp.to_rfc3339(),
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;
        ensure_success(response)
    }
}

pub struct SlackChannel {
    client: Client,
    webhook_url: String,
}

#[async_trait]
impl AlertChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let payload = json!({
            "text": format!(
                "{} *{}* `{}`: {}",
                alert.severity.emoji(),
                alert.severity,
                alert.service_id,
                alert.message
            ),
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;
        ensure_success(response)
    }
}

pub struct DiscordChannel {
    client: Client,
    webhook_url: String,
    user_id: Option<String>,
}

#[async_trait]
impl AlertChannel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let embed = json!({
            "title": format!("{} {}", alert.severity.emoji(), alert.severity),
            "description": alert.message,
            "color": alert.severity.color(),
            "fields": [
                { "name": "Service", "value": alert.service_id, "inline": true },
                { "name": "Type", "value": alert.kind.to_string(), "inline": true },
            ],
            "timestamp": alert.timestamp.to_rfc3339(),
        });

        let mut payload = json!({ "embeds": [embed] });
        if let Some(user_id) = &self.user_id {
            payload["content"] = json!(format!(
                "{} `{}` <@{user_id}>",
                alert.severity.emoji(),
                alert.service_id
            ));
        }

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;
        ensure_success(response)
    }
}

pub struct PushoverChannel {
    client: Client,
    token: String,
    user_key: String,
}

#[async_trait]
impl AlertChannel for PushoverChannel {
    fn name(&self) -> &'static str {
        "pushover"
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let title = format!("{}: {}", alert.severity, alert.service_id);
        let priority = alert.severity.push_priority().to_string();
        let params = [
            ("token", self.token.as_str()),
            ("user", self.user_key.as_str()),
            ("title", title.as_str()),
            ("message", alert.message.as_str()),
            ("priority", priority.as_str()),
        ];

        let response = self
            .client
            .post(PUSHOVER_API_URL)
            .form(&params)
            .send()
            .await?;
        ensure_success(response)
    }
}

/// Email through an HTTP mail gateway.
pub struct EmailChannel {
    client: Client,
    gateway_url: String,
    from: String,
    to: Vec<String>,
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let payload = json!({
            "from": self.from,
            "to": self.to,
            "subject": format!("[{}] {}", alert.severity, alert.service_id),
            "body": format!(
                "{}\n\nservice: {}\ntype: {}\nat: {}",
                alert.message,
                alert.service_id,
                alert.kind,
                alert.timestamp.to_rfc3339()
            ),
        });

        let response = self
            .client
            .post(&self.gateway_url)
            .json(&payload)
            .send()
            .await?;
        ensure_success(response)
    }
}
