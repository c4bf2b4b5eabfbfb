//! Day-before walk reminders.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::notify::Notifier;
use crate::store::{Database, Document, StoreResult};
use crate::walks;

/// Marks a walk whose reminder went out, so hourly runs send it once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderMarker {
    pub key: String,
    pub walk_id: String,
    pub sent_at: DateTime<Utc>,
}

impl Document for ReminderMarker {
    const COLLECTION: &'static str = "reminders_sent";

    fn key(&self) -> String {
        self.key.clone()
    }
}

pub fn marker_key(walk_id: &str, date: &str) -> String {
    format!("reminder_sent_{}_{}", walk_id, date)
}

/// Remind participants of every walk dated tomorrow (UTC) that has not been
/// reminded yet. Returns the number of walks handled in this run.
pub async fn send_due_reminders(
    db: &Database,
    notifier: &Notifier,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let tomorrow = walks::date_string(now + Duration::days(1));
    let due = db.walks.find(|w| w.date == tomorrow).await;
    if due.is_empty() {
        tracing::debug!(date = %tomorrow, "No walks scheduled for tomorrow");
        return Ok(0);
    }

    let mut handled = 0;
    for walk in due {
        let key = marker_key(&walk.walk_id, &tomorrow);
        if db.reminders_sent.get(&key).await.is_some() {
            tracing::debug!(walk_id = %walk.walk_id, "Reminder already sent");
            continue;
        }

        notifier.send_walk_reminder(&walk).await;
        db.reminders_sent
            .upsert(ReminderMarker {
                key,
                walk_id: walk.walk_id.clone(),
                sent_at: Utc::now(),
            })
            .await?;
        handled += 1;
        tracing::info!(walk_id = %walk.walk_id, title = %walk.title, "24h reminder sent");
    }
    Ok(handled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::notify::fake::RecordingGateway;
    use crate::notify::{register_token, Mailer};
    use crate::walks::test_support::{user_in, walk_in};

    #[tokio::test]
    async fn test_reminders_are_sent_once() {
        let db = Arc::new(Database::in_memory());
        let gateway = Arc::new(RecordingGateway::default());
        let notifier = Notifier::new(db.clone(), gateway.clone(), Mailer::disabled());

        let walker = user_in("walker", "Lyon");
        db.users.insert(walker.clone()).await.unwrap();
        register_token(&db, "walker", "ExponentPushToken[walker]", "ios")
            .await
            .unwrap();

        let tomorrow = db.walks.insert(walk_in("Lyon", "org")).await.unwrap();
        let mut later = walk_in("Lyon", "org");
        later.date = walks::date_string(Utc::now() + Duration::days(5));
        let later = db.walks.insert(later).await.unwrap();
        walks::book(&db, &tomorrow.walk_id, &walker).await.unwrap();
        walks::book(&db, &later.walk_id, &walker).await.unwrap();

        let now = Utc::now();
        assert_eq!(send_due_reminders(&db, &notifier, now).await.unwrap(), 1);
        assert_eq!(send_due_reminders(&db, &notifier, now).await.unwrap(), 0);

        let messages = gateway.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data["walk_id"], tomorrow.walk_id.as_str());

        let key = marker_key(&tomorrow.walk_id, &tomorrow.date);
        assert!(db.reminders_sent.get(&key).await.is_some());
    }
}
