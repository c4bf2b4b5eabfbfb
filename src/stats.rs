//! Admin statistics: app usage breakdowns, the walker leaderboard and
//! aggregated walk tracking data synced from devices.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::accounts::UserStatus;
use crate::badges;
use crate::matching::age_bucket;
use crate::store::{new_id, Database, Document, StoreResult};

/// One finished walk as tracked on a device. Only totals are kept, never a
/// route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkTrackingStat {
    pub stat_id: String,
    pub user_id: String,
    pub country: String,
    /// Meters.
    pub distance: f64,
    pub steps: u64,
    pub calories: u64,
    /// Seconds.
    pub duration: f64,
    pub synced_at: DateTime<Utc>,
}

impl Document for WalkTrackingStat {
    const COLLECTION: &'static str = "walk_tracking_stats";

    fn key(&self) -> String {
        self.stat_id.clone()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalkStatsSync {
    pub distance: f64,
    pub steps: u64,
    pub calories: u64,
    pub duration: f64,
    #[serde(default)]
    pub country: Option<String>,
}

/// Store synced totals. The country falls back to the profile country, then
/// "Unknown".
pub async fn record_walk_stats(
    db: &Database,
    user_id: &str,
    profile_country: Option<&str>,
    sync: WalkStatsSync,
) -> StoreResult<WalkTrackingStat> {
    let country = sync
        .country
        .filter(|c| !c.is_empty() && c != "Unknown")
        .or_else(|| profile_country.filter(|c| !c.is_empty()).map(str::to_string))
        .unwrap_or_else(|| "Unknown".to_string());

    let stat = WalkTrackingStat {
        stat_id: new_id("stat"),
        user_id: user_id.to_string(),
        country,
        distance: sync.distance,
        steps: sync.steps,
        calories: sync.calories,
        duration: sync.duration,
        synced_at: Utc::now(),
    };
    tracing::info!(
        user_id,
        distance_m = stat.distance,
        steps = stat.steps,
        "Walk stats synced"
    );
    db.walk_tracking_stats.insert(stat).await
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CountryTracking {
    pub country: String,
    pub total_walks: usize,
    pub total_distance_km: f64,
    pub total_steps: u64,
    pub total_calories: u64,
    pub total_duration_hours: f64,
    pub unique_users: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrackingTotals {
    pub total_walks: usize,
    pub total_distance_km: f64,
    pub total_steps: u64,
    pub total_calories: u64,
    pub total_duration_hours: f64,
    pub total_duration_seconds: f64,
    pub total_countries: usize,
    pub total_unique_users: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackingReport {
    pub global_totals: TrackingTotals,
    /// Longest total distance first.
    pub by_country: Vec<CountryTracking>,
}

#[derive(Default)]
struct CountryAcc {
    walks: usize,
    distance: f64,
    steps: u64,
    calories: u64,
    duration: f64,
    users: HashSet<String>,
}

/// Aggregate synced walk totals per country.
pub fn aggregate_tracking(stats: &[WalkTrackingStat]) -> TrackingReport {
    let mut by_country: HashMap<&str, CountryAcc> = HashMap::new();
    for s in stats {
        let acc = by_country.entry(s.country.as_str()).or_default();
        acc.walks += 1;
        acc.distance += s.distance;
        acc.steps += s.steps;
        acc.calories += s.calories;
        acc.duration += s.duration;
        acc.users.insert(s.user_id.clone());
    }

    let mut rows: Vec<(&str, CountryAcc)> = by_country.into_iter().collect();
    rows.sort_by(|a, b| {
        b.1.distance
            .partial_cmp(&a.1.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    let total_distance: f64 = rows.iter().map(|(_, a)| a.distance).sum();
    let total_duration: f64 = rows.iter().map(|(_, a)| a.duration).sum();
    let unique_users: HashSet<&str> = stats.iter().map(|s| s.user_id.as_str()).collect();

    let global_totals = TrackingTotals {
        total_walks: stats.len(),
        total_distance_km: round_to(total_distance / 1000.0, 2),
        total_steps: rows.iter().map(|(_, a)| a.steps).sum(),
        total_calories: rows.iter().map(|(_, a)| a.calories).sum(),
        total_duration_hours: round_to(total_duration / 3600.0, 1),
        total_duration_seconds: total_duration,
        total_countries: rows.len(),
        total_unique_users: unique_users.len(),
    };

    let by_country = rows
        .into_iter()
        .map(|(country, a)| CountryTracking {
            country: country.to_string(),
            total_walks: a.walks,
            total_distance_km: round_to(a.distance / 1000.0, 2),
            total_steps: a.steps,
            total_calories: a.calories,
            total_duration_hours: round_to(a.duration / 3600.0, 1),
            unique_users: a.users.len(),
        })
        .collect();

    TrackingReport {
        global_totals,
        by_country,
    }
}

/// Optional `YYYY-MM-DD` bounds, both inclusive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

impl DateRange {
    fn start_instant(&self) -> Option<DateTime<Utc>> {
        let day = NaiveDate::parse_from_str(self.start_date.as_deref()?, "%Y-%m-%d").ok()?;
        Some(Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN)))
    }

    fn end_instant(&self) -> Option<DateTime<Utc>> {
        let day = NaiveDate::parse_from_str(self.end_date.as_deref()?, "%Y-%m-%d").ok()?;
        let end = day.and_hms_opt(23, 59, 59)?;
        Some(Utc.from_utc_datetime(&end))
    }

    /// Walk dates are compared as strings.
    fn admits_date(&self, date: &str) -> bool {
        let after_start = self.start_date.as_deref().map_or(true, |s| date >= s);
        let before_end = self.end_date.as_deref().map_or(true, |e| date <= e);
        after_start && before_end
    }

    /// Creation and booking instants are compared to whole days.
    fn admits_instant(&self, at: DateTime<Utc>) -> bool {
        let after_start = self.start_instant().map_or(true, |s| at >= s);
        let before_end = self.end_instant().map_or(true, |e| at <= e);
        after_start && before_end
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total_walks: usize,
    pub total_users: usize,
    pub total_bookings: usize,
    pub total_reviews: usize,
    pub average_rating: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub full_name: String,
    pub pseudonym: Option<String>,
    pub email: String,
    pub city: String,
    pub neighborhood: String,
    pub walks_organized: usize,
    pub walks_participated: usize,
    pub walks_achieved: usize,
    pub badge_level: u32,
    pub created_at: DateTime<Utc>,
    pub status: UserStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppStatistics {
    pub summary: Summary,
    pub walks_by_country: BTreeMap<String, usize>,
    pub walks_by_city: BTreeMap<String, usize>,
    pub walks_by_neighborhood: BTreeMap<String, usize>,
    pub walks_by_community: BTreeMap<String, usize>,
    pub users_by_sex: BTreeMap<String, usize>,
    pub users_by_age_group: BTreeMap<String, usize>,
    pub users_by_city: BTreeMap<String, usize>,
    pub ratings_distribution: BTreeMap<u8, usize>,
    pub active_users: Vec<LeaderboardEntry>,
}

fn bump(map: &mut BTreeMap<String, usize>, key: Option<&str>, fallback: &str) {
    let key = key.filter(|k| !k.is_empty()).unwrap_or(fallback);
    *map.entry(key.to_string()).or_insert(0) += 1;
}

/// Usage breakdowns for the admin dashboard. Walks are filtered by their
/// date, users by sign-up, bookings by booking time and reviews by creation.
pub async fn app_statistics(db: &Database, range: &DateRange, today: &str) -> AppStatistics {
    let walks = db.walks.find(|w| range.admits_date(&w.date)).await;
    let users = db.users.find(|u| range.admits_instant(u.created_at)).await;
    let bookings = db
        .bookings
        .count(|b| b.is_active() && range.admits_instant(b.booked_at))
        .await;
    let reviews = db.reviews.find(|r| range.admits_instant(r.created_at)).await;

    let organizer_country: HashMap<String, Option<String>> = db
        .users
        .all()
        .await
        .into_iter()
        .map(|u| (u.user_id, u.country))
        .collect();

    let mut walks_by_country = BTreeMap::new();
    let mut walks_by_city = BTreeMap::new();
    let mut walks_by_neighborhood = BTreeMap::new();
    let mut walks_by_community = BTreeMap::new();
    for walk in &walks {
        let country = organizer_country
            .get(&walk.organizer_id)
            .and_then(|c| c.as_deref());
        bump(&mut walks_by_country, country, "Unknown");
        bump(&mut walks_by_city, Some(&walk.city), "Unknown");
        bump(&mut walks_by_neighborhood, Some(&walk.neighborhood), "Unknown");
        let community = walk
            .conditions
            .as_ref()
            .and_then(|c| c.country_region.as_deref());
        bump(&mut walks_by_community, community, "All");
    }

    let mut users_by_sex = BTreeMap::new();
    let mut users_by_age_group = BTreeMap::new();
    let mut users_by_city = BTreeMap::new();
    for user in &users {
        bump(&mut users_by_sex, user.sex.as_deref(), "Unknown");
        bump(&mut users_by_age_group, Some(age_bucket(user.age)), "Unknown");
        bump(&mut users_by_city, user.city.as_deref(), "Unknown");
    }

    let ratings: Vec<u8> = reviews.iter().map(|r| r.rating).filter(|r| *r > 0).collect();
    let average_rating = if ratings.is_empty() {
        0.0
    } else {
        let sum: u32 = ratings.iter().map(|&r| u32::from(r)).sum();
        round_to(f64::from(sum) / ratings.len() as f64, 1)
    };
    let mut ratings_distribution: BTreeMap<u8, usize> = (1..=5).map(|r| (r, 0)).collect();
    for rating in ratings.iter().filter(|r| (1..=5).contains(*r)) {
        *ratings_distribution.entry(*rating).or_insert(0) += 1;
    }

    AppStatistics {
        summary: Summary {
            total_walks: walks.len(),
            total_users: users.len(),
            total_bookings: bookings,
            total_reviews: reviews.len(),
            average_rating,
        },
        walks_by_country,
        walks_by_city,
        walks_by_neighborhood,
        walks_by_community,
        users_by_sex,
        users_by_age_group,
        users_by_city,
        ratings_distribution,
        active_users: leaderboard(db, today).await,
    }
}

/// Open, unrestricted accounts ranked by completed walks.
pub async fn leaderboard(db: &Database, today: &str) -> Vec<LeaderboardEntry> {
    let users = db
        .users
        .find(|u| u.status == UserStatus::Active && !u.is_cancelled)
        .await;

    let mut entries = Vec::with_capacity(users.len());
    for user in users {
        let progress = badges::progress(db, &user.user_id, today).await;
        entries.push(LeaderboardEntry {
            full_name: user.name,
            pseudonym: user.pseudonym,
            email: user.email,
            city: user.city.unwrap_or_else(|| "Not set".to_string()),
            neighborhood: user.neighborhood.unwrap_or_else(|| "Not set".to_string()),
            walks_organized: progress.organized_count,
            walks_participated: progress.participated_count,
            walks_achieved: progress.total_walks,
            badge_level: progress.badge_level,
            created_at: user.created_at,
            status: user.status,
            user_id: user.user_id,
        });
    }
    entries.sort_by(|a, b| b.walks_achieved.cmp(&a.walks_achieved));
    entries
}

#[derive(Debug, Clone, Serialize)]
pub struct RetentionStats {
    pub total_users: usize,
    pub users_with_login_tracking: usize,
    pub active_users_3_days: usize,
    pub inactive_users_3_days: usize,
    pub users_with_push_tokens: usize,
    pub total_retention_notifications_sent: usize,
    pub notifications_sent_last_7_days: usize,
}

pub async fn retention_stats(db: &Database, now: DateTime<Utc>) -> RetentionStats {
    let three_days_ago = now - Duration::days(3);
    let week_ago = now - Duration::days(7);
    let token_owners: HashSet<String> = db
        .push_tokens
        .find(|t| t.active)
        .await
        .into_iter()
        .map(|t| t.user_id)
        .collect();

    RetentionStats {
        total_users: db.users.len().await,
        users_with_login_tracking: db.users.count(|u| u.last_login_at.is_some()).await,
        active_users_3_days: db
            .users
            .count(|u| u.last_login_at.is_some_and(|t| t >= three_days_ago))
            .await,
        inactive_users_3_days: db
            .users
            .count(|u| u.last_login_at.map_or(true, |t| t < three_days_ago))
            .await,
        users_with_push_tokens: token_owners.len(),
        total_retention_notifications_sent: db.retention_notifications.len().await,
        notifications_sent_last_7_days: db
            .retention_notifications
            .count(|n| n.sent_at >= week_ago)
            .await,
    }
}
