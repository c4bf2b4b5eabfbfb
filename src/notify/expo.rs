//! Expo push delivery.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const EXPO_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

/// Only tokens with this prefix are accepted by the gateway.
pub const EXPO_TOKEN_PREFIX: &str = "ExponentPushToken[";

/// Expo accepts at most this many messages per request.
pub const CHUNK_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push request failed: {0}")]
    Network(String),

    #[error("push gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected push gateway response: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PushMessage {
    pub to: String,
    pub title: String,
    pub body: String,
    pub sound: &'static str,
    pub badge: u32,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketDetails {
    #[serde(default)]
    pub error: Option<String>,
}

/// Per-message delivery receipt, in the order the messages were sent.
#[derive(Debug, Clone, Deserialize)]
pub struct PushTicket {
    pub status: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<TicketDetails>,
}

impl PushTicket {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            id: None,
            message: None,
            details: None,
        }
    }

    pub fn error(message: &str, code: Option<&str>) -> Self {
        Self {
            status: "error".to_string(),
            id: None,
            message: Some(message.to_string()),
            details: Some(TicketDetails {
                error: code.map(str::to_string),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    pub fn is_device_not_registered(&self) -> bool {
        self.details
            .as_ref()
            .and_then(|d| d.error.as_deref())
            == Some("DeviceNotRegistered")
    }
}

/// Something that can deliver a batch of push messages.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Send at most [`CHUNK_SIZE`] messages. Returns one ticket per message.
    async fn send_batch(&self, messages: &[PushMessage]) -> Result<Vec<PushTicket>, PushError>;
}

/// Outcome of a push fan-out.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PushReport {
    pub sent: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    /// Tokens the gateway no longer knows; callers deactivate them.
    #[serde(skip)]
    pub unregistered: Vec<String>,
}

/// Send one notification to every valid token, in chunks.
pub async fn deliver(
    gateway: &dyn PushGateway,
    tokens: &[String],
    title: &str,
    body: &str,
    data: serde_json::Value,
) -> PushReport {
    let mut report = PushReport::default();

    let messages: Vec<PushMessage> = tokens
        .iter()
        .filter(|t| t.starts_with(EXPO_TOKEN_PREFIX))
        .map(|t| PushMessage {
            to: t.clone(),
            title: title.to_string(),
            body: body.to_string(),
            sound: "default",
            badge: 1,
            data: data.clone(),
        })
        .collect();

    if messages.is_empty() {
        tracing::debug!(tokens = tokens.len(), "No valid push tokens to send to");
        return report;
    }

    for chunk in messages.chunks(CHUNK_SIZE) {
        match gateway.send_batch(chunk).await {
            Ok(tickets) => {
                for (message, ticket) in chunk.iter().zip(tickets.iter()) {
                    if ticket.is_ok() {
                        report.sent += 1;
                        continue;
                    }
                    report.failed += 1;
                    report.errors.push(
                        ticket
                            .message
                            .clone()
                            .unwrap_or_else(|| "unknown push error".to_string()),
                    );
                    if ticket.is_device_not_registered() {
                        report.unregistered.push(message.to.clone());
                    }
                }
                if tickets.len() < chunk.len() {
                    let missing = chunk.len() - tickets.len();
                    report.failed += missing;
                    report
                        .errors
                        .push(format!("{} messages without a ticket", missing));
                }
            }
            Err(e) => {
                tracing::error!("Push batch failed: {}", e);
                report.failed += chunk.len();
                report.errors.push(e.to_string());
            }
        }
    }

    tracing::info!(sent = report.sent, failed = report.failed, "Push delivery finished");
    report
}

/// Client for the Expo push API.
pub struct ExpoPushClient {
    client: Client,
    access_token: Option<String>,
}

impl ExpoPushClient {
    pub fn new(client: Client, access_token: Option<String>) -> Self {
        Self {
            client,
            access_token,
        }
    }
}

#[derive(Deserialize)]
struct ExpoResponse {
    #[serde(default)]
    data: Vec<PushTicket>,
}

#[async_trait]
impl PushGateway for ExpoPushClient {
    async fn send_batch(&self, messages: &[PushMessage]) -> Result<Vec<PushTicket>, PushError> {
        let mut request = self
            .client
            .post(EXPO_PUSH_URL)
            .header("Accept", "application/json")
            .json(messages);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PushError::Network(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(PushError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ExpoResponse = serde_json::from_str(&body)
            .map_err(|e| PushError::Parse(format!("{}, body: {}", e, body)))?;
        Ok(parsed.data)
    }
}
