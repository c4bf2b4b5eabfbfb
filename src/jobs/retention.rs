//! Nudges for accounts that have not opened the app for a few days.

use std::collections::HashSet;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::accounts::User;
use crate::notify::{self, Notifier};
use crate::store::{new_id, Database, Document, StoreResult};
use crate::weather::{self, WeatherProvider};

pub const INACTIVE_AFTER_DAYS: i64 = 3;
pub const RENUDGE_AFTER_DAYS: i64 = 3;
pub const MAX_USERS_PER_RUN: usize = 100;
/// A city needs more walkers than this in a week to be worth mentioning.
const CITY_STATS_THRESHOLD: usize = 5;

const MOTIVATIONAL: [(&str, &str); 5] = [
    (
        "👋 We miss you!",
        "Your walking community is waiting. Join a local walk today!",
    ),
    (
        "🚶 Time to walk!",
        "New walks are available near you. Come explore!",
    ),
    (
        "💪 Keep moving!",
        "Walking is better together. Find your group today!",
    ),
    (
        "🌟 Don't miss out!",
        "Join local walking groups and stay connected.",
    ),
    (
        "🤝 We grow together!",
        "Your walking buddies miss you. Come back and join a walk!",
    ),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionNotification {
    pub notification_id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    /// Devices the push reached.
    #[serde(default)]
    pub delivered: usize,
}

impl Document for RetentionNotification {
    const COLLECTION: &'static str = "retention_notifications";

    fn key(&self) -> String {
        self.notification_id.clone()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetentionDetail {
    pub user: String,
    pub status: &'static str,
    pub last_login: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionRun {
    pub total_inactive_users: usize,
    pub notifications_sent: usize,
    pub notifications_skipped: usize,
    pub details: Vec<RetentionDetail>,
}

/// Inactive users who accept notifications, oldest accounts first.
pub async fn inactive_users(db: &Database, now: DateTime<Utc>) -> Vec<User> {
    let cutoff = now - Duration::days(INACTIVE_AFTER_DAYS);
    let mut users = db
        .users
        .find(|u| {
            u.notifications_enabled
                && !u.is_cancelled
                && u.last_login_at.map_or(true, |t| t < cutoff)
        })
        .await;
    users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    users
}

/// The city a user most likely walks in: profile city, else the city of the
/// walk they booked last, else of the walk they organized last.
async fn home_city(db: &Database, user: &User) -> Option<String> {
    if let Some(city) = user.city.as_ref().filter(|c| !c.is_empty()) {
        return Some(city.clone());
    }

    let mut bookings = db.bookings.find(|b| b.user_id == user.user_id).await;
    bookings.sort_by(|a, b| b.booked_at.cmp(&a.booked_at));
    if let Some(latest) = bookings.first() {
        if let Some(walk) = db.walks.get(&latest.walk_id).await {
            return Some(walk.city);
        }
    }

    latest_organized_city(db, &user.user_id).await
}

async fn latest_organized_city(db: &Database, user_id: &str) -> Option<String> {
    db.walks
        .find(|w| w.organizer_id == user_id)
        .await
        .into_iter()
        .max_by(|a, b| a.created_at.cmp(&b.created_at))
        .map(|w| w.city)
}

/// Distinct users who booked a walk in `city` during the last week.
pub async fn recent_walkers(db: &Database, city: &str, now: DateTime<Utc>) -> usize {
    let since = now - Duration::days(7);
    let walk_ids: HashSet<String> = db
        .walks
        .find(|w| w.city == city)
        .await
        .into_iter()
        .map(|w| w.walk_id)
        .collect();
    if walk_ids.is_empty() {
        return 0;
    }
    db.bookings
        .find(|b| walk_ids.contains(&b.walk_id) && b.booked_at >= since)
        .await
        .into_iter()
        .map(|b| b.user_id)
        .collect::<HashSet<_>>()
        .len()
}

fn motivational() -> (String, String) {
    let (title, body) = MOTIVATIONAL
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(MOTIVATIONAL[0]);
    (title.to_string(), body.to_string())
}

fn greet(user: &User, body: String) -> String {
    match user.first_name() {
        Some(first) if first.chars().count() > 1 => format!("Hey {}! {}", first, body),
        _ => body,
    }
}

/// Pick the nudge for `user`: good weather tomorrow, then a busy week in
/// their city, then a random motivational line.
pub async fn compose(
    db: &Database,
    weather_provider: &dyn WeatherProvider,
    user: &User,
    now: DateTime<Utc>,
) -> (String, String) {
    let tomorrow = (now + Duration::days(1)).date_naive();

    if let Some(city) = home_city(db, user).await {
        if let Some(msg) = weather::good_weather_message(weather_provider, &city, tomorrow).await {
            return ("☀️ Perfect walking weather!".to_string(), greet(user, msg));
        }
    }

    if let Some(city) = latest_organized_city(db, &user.user_id).await {
        let walkers = recent_walkers(db, &city, now).await;
        if walkers > CITY_STATS_THRESHOLD {
            return (
                format!("🚶 {} people walked in {} this week!", walkers, city),
                greet(user, "Join them and discover new walking routes.".to_string()),
            );
        }
    }

    let (title, body) = motivational();
    (title, greet(user, body))
}

async fn nudged_recently(db: &Database, user_id: &str, now: DateTime<Utc>) -> bool {
    let since = now - Duration::days(RENUDGE_AFTER_DAYS);
    db.retention_notifications
        .find_one(|n| n.user_id == user_id && n.sent_at >= since)
        .await
        .is_some()
}

/// Nudge eligible inactive users once. Users without a device or nudged
/// recently are skipped before the per-run cap applies, so at most
/// `MAX_USERS_PER_RUN` pushes are attempted.
pub async fn run(
    db: &Database,
    notifier: &Notifier,
    weather_provider: &dyn WeatherProvider,
    now: DateTime<Utc>,
    delay: StdDuration,
) -> StoreResult<RetentionRun> {
    let users = inactive_users(db, now).await;
    tracing::info!(count = users.len(), "Checking inactive users for retention nudges");

    let mut run = RetentionRun {
        total_inactive_users: users.len(),
        ..RetentionRun::default()
    };
    let mut attempted = 0;

    for user in users {
        let last_login = user
            .last_login_at
            .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
        let skip = |run: &mut RetentionRun, status: &'static str| {
            run.notifications_skipped += 1;
            run.details.push(RetentionDetail {
                user: user.name.clone(),
                status,
                last_login: last_login.clone(),
            });
        };

        let ids = [user.user_id.clone()];
        if notify::active_tokens(db, &ids).await.is_empty() {
            skip(&mut run, "skipped (no push token)");
            continue;
        }
        if nudged_recently(db, &user.user_id, now).await {
            skip(&mut run, "skipped (already sent recently)");
            continue;
        }

        if attempted == MAX_USERS_PER_RUN {
            tracing::info!(cap = MAX_USERS_PER_RUN, "Retention cap reached for this run");
            break;
        }
        attempted += 1;

        let (title, body) = compose(db, weather_provider, &user, now).await;
        let report = notifier
            .send_to_users(
                &ids,
                &title,
                &body,
                json!({ "type": "retention", "user_id": user.user_id }),
            )
            .await;
        if report.sent == 0 {
            skip(&mut run, "skipped (delivery failed)");
            continue;
        }

        db.retention_notifications
            .insert(RetentionNotification {
                notification_id: new_id("retention"),
                user_id: user.user_id.clone(),
                title: title.clone(),
                body,
                sent_at: Utc::now(),
                delivered: report.sent,
            })
            .await?;
        tracing::info!(user_id = %user.user_id, %title, "Retention notification sent");
        run.notifications_sent += 1;
        run.details.push(RetentionDetail {
            user: user.name.clone(),
            status: "sent",
            last_login,
        });

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    tracing::info!(
        sent = run.notifications_sent,
        skipped = run.notifications_skipped,
        "Retention pass finished"
    );
    Ok(run)
}
