//! Push and email notifications.
//!
//! Delivery is best effort: failures are logged and counted, never returned
//! to the request that triggered them.

mod email;
mod expo;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub use email::Mailer;
pub use expo::{
    deliver, ExpoPushClient, PushError, PushGateway, PushMessage, PushReport, PushTicket,
    CHUNK_SIZE, EXPO_TOKEN_PREFIX,
};

#[cfg(test)]
pub use expo::fake;

use crate::accounts::{self, User};
use crate::config::Config;
use crate::matching;
use crate::store::{Database, Document, StoreResult};
use crate::walks::Walk;

/// A device registered for push notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushToken {
    pub user_id: String,
    pub push_token: String,
    /// `ios` or `android`.
    pub platform: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for PushToken {
    const COLLECTION: &'static str = "push_tokens";

    fn key(&self) -> String {
        format!("{}:{}", self.user_id, self.push_token)
    }
}

/// Register (or re-activate) a device token for `user_id`.
pub async fn register_token(
    db: &Database,
    user_id: &str,
    push_token: &str,
    platform: &str,
) -> StoreResult<PushToken> {
    let now = Utc::now();
    let key = format!("{}:{}", user_id, push_token);
    let created_at = db
        .push_tokens
        .get(&key)
        .await
        .map_or(now, |existing| existing.created_at);

    let token = PushToken {
        user_id: user_id.to_string(),
        push_token: push_token.to_string(),
        platform: platform.to_string(),
        active: true,
        created_at,
        updated_at: now,
    };
    db.push_tokens.upsert(token.clone()).await?;
    tracing::info!(user_id, platform, "Registered push token");
    Ok(token)
}

pub async fn unregister_token(db: &Database, user_id: &str, push_token: &str) -> StoreResult<()> {
    db.push_tokens
        .update(&format!("{}:{}", user_id, push_token), |t| t.active = false)
        .await?;
    Ok(())
}

/// Deactivate every registration of the given device tokens.
pub async fn deactivate_tokens(db: &Database, tokens: &[String]) -> StoreResult<usize> {
    if tokens.is_empty() {
        return Ok(0);
    }
    let tokens: HashSet<&str> = tokens.iter().map(String::as_str).collect();
    let n = db
        .push_tokens
        .update_where(|t| t.active && tokens.contains(t.push_token.as_str()), |t| {
            t.active = false
        })
        .await?;
    if n > 0 {
        tracing::info!(count = n, "Deactivated unregistered push tokens");
    }
    Ok(n)
}

pub async fn active_tokens(db: &Database, user_ids: &[String]) -> Vec<String> {
    let ids: HashSet<&str> = user_ids.iter().map(String::as_str).collect();
    db.push_tokens
        .find(|t| t.active && ids.contains(t.user_id.as_str()))
        .await
        .into_iter()
        .map(|t| t.push_token)
        .collect()
}

/// What a fan-out reached.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NotifySummary {
    pub recipients: usize,
    pub push: PushReport,
    pub emails_sent: usize,
}

fn walk_email_details(walk: &Walk) -> String {
    let mut html = format!(
        "<p><strong>{}</strong></p>\
         <p><strong>Date:</strong> {}</p>\
         <p><strong>Time:</strong> {}</p>\
         <p><strong>City:</strong> {}</p>\
         <p><strong>Neighborhood:</strong> {}</p>\
         <p><strong>Starting Point:</strong> {}</p>",
        walk.title, walk.date, walk.time, walk.city, walk.neighborhood, walk.starting_point
    );
    if let Some(desc) = walk.description.as_deref().filter(|d| !d.is_empty()) {
        html.push_str(&format!("<p><strong>Description:</strong> {}</p>", desc));
    }
    if let Some(c) = walk.conditions.as_ref().filter(|c| !c.is_unrestricted()) {
        let mut parts = Vec::new();
        if !c.sex.is_empty() {
            parts.push(format!("sex {}", c.sex.join("/")));
        }
        if !c.age_groups.is_empty() {
            parts.push(format!("ages {}", c.age_groups.join(", ")));
        }
        html.push_str(&format!("<p><strong>Conditions:</strong> {}</p>", parts.join("; ")));
    }
    html
}

pub fn new_walk_push(walk: &Walk) -> (String, String, serde_json::Value) {
    (
        "🚶 New Walk Available!".to_string(),
        format!(
            "{} on {} at {}. Join {}'s walk in {}!",
            walk.title, walk.date, walk.time, walk.organizer_name, walk.city
        ),
        json!({ "type": "new_walk", "walk_id": walk.walk_id, "screen": "/walk-details" }),
    )
}

pub fn reminder_push(walk: &Walk) -> (String, String, serde_json::Value) {
    (
        "⏰ Walk Tomorrow - Don't Forget!".to_string(),
        format!(
            "{} at {}. Meet at {}, {}. See you there!",
            walk.title, walk.time, walk.starting_point, walk.neighborhood
        ),
        json!({ "type": "walk_reminder", "walk_id": walk.walk_id, "screen": "/walk-details" }),
    )
}

/// Sends notifications through the push gateway and the mailer.
#[derive(Clone)]
pub struct Notifier {
    db: Arc<Database>,
    push: Arc<dyn PushGateway>,
    mailer: Mailer,
}

impl Notifier {
    pub fn new(db: Arc<Database>, push: Arc<dyn PushGateway>, mailer: Mailer) -> Self {
        Self { db, push, mailer }
    }

    pub fn mailer(&self) -> &Mailer {
        &self.mailer
    }

    /// Push to every active token of `user_ids`. Tokens the gateway reports
    /// as unregistered are deactivated.
    pub async fn send_to_users(
        &self,
        user_ids: &[String],
        title: &str,
        body: &str,
        data: serde_json::Value,
    ) -> PushReport {
        let tokens = active_tokens(&self.db, user_ids).await;
        if tokens.is_empty() {
            tracing::debug!(users = user_ids.len(), "No active push tokens");
            return PushReport::default();
        }

        let report = deliver(self.push.as_ref(), &tokens, title, body, data).await;
        if let Err(e) = deactivate_tokens(&self.db, &report.unregistered).await {
            tracing::warn!("Failed to deactivate push tokens: {}", e);
        }
        report
    }

    /// Alert every user the targeting engine selects for a new walk.
    pub async fn notify_new_walk(&self, walk: &Walk) -> NotifySummary {
        let users = self.db.users.all().await;
        let recipients = matching::select_recipients(walk, &users);
        tracing::info!(
            walk_id = %walk.walk_id,
            city = %walk.city,
            conditions = ?walk.conditions,
            recipients = recipients.len(),
            "Notifying users about new walk"
        );
        if recipients.is_empty() {
            return NotifySummary::default();
        }

        let user_ids: Vec<String> = recipients.iter().map(|u| u.user_id.clone()).collect();
        let (title, body, data) = new_walk_push(walk);
        let push = self.send_to_users(&user_ids, &title, &body, data).await;

        let subject = format!("New Walk: {}", walk.title);
        let html = format!(
            "<h2>New Walk Available!</h2>{}<p>Log in to book your spot!</p>",
            walk_email_details(walk)
        );
        let emails_sent = self.email_users(&recipients, &subject, &html).await;

        NotifySummary {
            recipients: recipients.len(),
            push,
            emails_sent,
        }
    }

    /// Remind booked participants (with notifications on) about a walk.
    pub async fn send_walk_reminder(&self, walk: &Walk) -> NotifySummary {
        let booked: HashSet<String> = self
            .db
            .bookings
            .find(|b| b.walk_id == walk.walk_id && b.is_active())
            .await
            .into_iter()
            .map(|b| b.user_id)
            .collect();
        if booked.is_empty() {
            return NotifySummary::default();
        }

        let users = self
            .db
            .users
            .find(|u| booked.contains(&u.user_id) && u.notifications_enabled && !u.is_cancelled)
            .await;
        let recipients: Vec<&User> = users.iter().collect();
        if recipients.is_empty() {
            return NotifySummary::default();
        }

        let user_ids: Vec<String> = users.iter().map(|u| u.user_id.clone()).collect();
        let (title, body, data) = reminder_push(walk);
        let push = self.send_to_users(&user_ids, &title, &body, data).await;

        let subject = format!("Reminder: {} Tomorrow", walk.title);
        let html = format!(
            "<h2>Walk Reminder</h2><p>This is a friendly reminder about your upcoming walk!</p>{}\
             <p>We look forward to seeing you!</p>",
            walk_email_details(walk)
        );
        let emails_sent = self.email_users(&recipients, &subject, &html).await;

        tracing::info!(
            walk_id = %walk.walk_id,
            participants = recipients.len(),
            "Sent walk reminders"
        );
        NotifySummary {
            recipients: recipients.len(),
            push,
            emails_sent,
        }
    }

    async fn email_users(&self, users: &[&User], subject: &str, html: &str) -> usize {
        let mut sent = 0;
        for user in users.iter().filter(|u| u.email_notifications) {
            if self.mailer.send(&user.email, subject, html).await {
                sent += 1;
            }
        }
        sent
    }

    /// Email every address in `ADMIN_EMAILS`.
    pub async fn email_admins(&self, config: &Config, subject: &str, html: &str) -> usize {
        let sends = config
            .admin_emails
            .iter()
            .map(|admin| self.mailer.send(admin, subject, html));
        futures::future::join_all(sends)
            .await
            .into_iter()
            .filter(|delivered| *delivered)
            .count()
    }

    /// Push to every admin account.
    pub async fn push_admins(&self, config: &Config, title: &str, body: &str) -> PushReport {
        let admin_ids: Vec<String> = self
            .db
            .users
            .find(|u| accounts::is_admin(u, config))
            .await
            .into_iter()
            .map(|u| u.user_id)
            .collect();
        if admin_ids.is_empty() {
            return PushReport::default();
        }
        self.send_to_users(&admin_ids, title, body, json!({ "type": "admin_notice" }))
            .await
    }
}
