//! Outbound email through SendGrid.
//!
//! Without credentials every message is logged instead of sent.

use reqwest::Client;
use serde_json::json;

use crate::config::EmailConfig;

const SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Clone)]
pub struct Mailer {
    client: Client,
    config: EmailConfig,
}

impl Mailer {
    pub fn new(client: Client, config: EmailConfig) -> Self {
        Self { client, config }
    }

    /// Mailer that only logs.
    pub fn disabled() -> Self {
        Self::new(Client::new(), EmailConfig::default())
    }

    /// Send an HTML email. Returns whether the provider accepted it; never
    /// fails the caller.
    pub async fn send(&self, to: &str, subject: &str, html: &str) -> bool {
        let (Some(api_key), Some(from)) = (&self.config.sendgrid_api_key, &self.config.from_email)
        else {
            let preview: String = html.chars().take(100).collect();
            tracing::info!(to, subject, "[mock email] {}...", preview.trim());
            return false;
        };

        let payload = json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": { "email": from },
            "subject": subject,
            "content": [{ "type": "text/html", "value": html }],
        });

        match self
            .client
            .post(SENDGRID_URL)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(to, subject, "Email accepted by SendGrid");
                true
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(to, %status, "SendGrid rejected email: {}", body);
                false
            }
            Err(e) => {
                tracing::error!(to, "Failed to reach SendGrid: {}", e);
                false
            }
        }
    }
}
