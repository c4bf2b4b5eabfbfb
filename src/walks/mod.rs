//! Walks and bookings.
//!
//! Walk dates are `YYYY-MM-DD` strings and compare lexically. "Today" is the
//! UTC calendar date.

mod types;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use types::*;

use crate::accounts::User;
use crate::badges;
use crate::matching::{self, AgeBand, Sex};
use crate::store::{new_id, Database, StoreError};

/// No walk takes more active bookings than this, whatever its
/// `max_participants` says.
pub const HARD_PARTICIPANT_LIMIT: u32 = 10;

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("Walk not found")]
    NotFound,

    #[error("Booking not found")]
    BookingNotFound,

    #[error("Only the organizer or app admin can {0} this walk")]
    NotOrganizer(&'static str),

    #[error("No update data provided")]
    EmptyUpdate,

    #[error("{0}")]
    Invalid(String),

    #[error("This walk has reached the maximum limit of {0} participants")]
    Full(u32),

    #[error("Already booked this walk")]
    AlreadyBooked,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub fn date_string(now: DateTime<Utc>) -> String {
    now.date_naive().format("%Y-%m-%d").to_string()
}

pub fn today() -> String {
    date_string(Utc::now())
}

/// Minutes since midnight for `HH:MM`, `H:MM` or `h:mm AM/PM`.
pub fn time_of_day_minutes(raw: &str) -> Option<u32> {
    let (hour, rest) = raw.trim().split_once(':')?;
    let mut hour: u32 = hour.trim().parse().ok()?;
    let minute: u32 = rest
        .split(|c: char| !c.is_ascii_digit())
        .next()?
        .parse()
        .ok()?;

    let upper = rest.to_uppercase();
    if upper.contains("PM") && hour != 12 {
        hour += 12;
    } else if upper.contains("AM") && hour == 12 {
        hour = 0;
    }

    if hour > 23 || minute > 59 {
        return None;
    }
    Some(hour * 60 + minute)
}

/// A walk scheduled for today whose start time is at or before `now`.
pub fn has_started(walk: &Walk, now: DateTime<Utc>) -> bool {
    if walk.date != date_string(now) || walk.time.trim().is_empty() {
        return false;
    }
    match time_of_day_minutes(&walk.time) {
        Some(minutes) => minutes <= now.hour() * 60 + now.minute(),
        None => {
            tracing::warn!(walk_id = %walk.walk_id, "Could not parse walk time {:?}", walk.time);
            false
        }
    }
}

/// Normalize audience conditions to canonical values. Unknown sexes or age
/// bands are rejected.
pub fn normalize_conditions(conditions: WalkConditions) -> Result<WalkConditions, WalkError> {
    let mut sex = Vec::new();
    for raw in &conditions.sex {
        let s = Sex::normalize(raw)
            .ok_or_else(|| WalkError::Invalid(format!("Unknown sex condition: {}", raw)))?;
        if !sex.contains(&s) {
            sex.push(s);
        }
    }

    let mut age_groups = Vec::new();
    for raw in &conditions.age_groups {
        let band = AgeBand::parse(raw)
            .ok_or_else(|| WalkError::Invalid(format!("Unknown age group: {}", raw)))?;
        let label = band.label().to_string();
        if !age_groups.contains(&label) {
            age_groups.push(label);
        }
    }

    Ok(WalkConditions {
        sex: sex.iter().map(|s| s.as_str().to_string()).collect(),
        age_groups,
        country_region: conditions
            .country_region
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty()),
    })
}

fn validate_schedule(date: &str, time: &str) -> Result<(), WalkError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| WalkError::Invalid("Invalid date format. Use YYYY-MM-DD".to_string()))?;
    time_of_day_minutes(time)
        .ok_or_else(|| WalkError::Invalid("Invalid time format. Use HH:MM".to_string()))?;
    Ok(())
}

fn require_text(field: &str, value: &str) -> Result<(), WalkError> {
    if value.trim().is_empty() {
        return Err(WalkError::Invalid(format!("{} is required", field)));
    }
    Ok(())
}

/// Walk document plus its active booking count.
#[derive(Debug, Clone, Serialize)]
pub struct WalkView {
    #[serde(flatten)]
    pub walk: Walk,
    pub participant_count: usize,
}

pub async fn participant_count(db: &Database, walk_id: &str) -> usize {
    db.bookings
        .count(|b| b.walk_id == walk_id && b.is_active())
        .await
}

async fn active_counts(db: &Database) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for booking in db.bookings.find(|b| b.is_active()).await {
        *counts.entry(booking.walk_id).or_insert(0) += 1;
    }
    counts
}

async fn with_counts(db: &Database, walks: Vec<Walk>) -> Vec<WalkView> {
    let counts = active_counts(db).await;
    walks
        .into_iter()
        .map(|walk| WalkView {
            participant_count: counts.get(&walk.walk_id).copied().unwrap_or(0),
            walk,
        })
        .collect()
}

pub async fn create_walk(db: &Database, new: NewWalk, organizer: &User) -> Result<Walk, WalkError> {
    require_text("title", &new.title)?;
    require_text("city", &new.city)?;
    require_text("starting_point", &new.starting_point)?;
    validate_schedule(&new.date, &new.time)?;
    let conditions = new.conditions.map(normalize_conditions).transpose()?;

    let now = Utc::now();
    let ending_point = new
        .ending_point
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| new.starting_point.clone());

    let walk = Walk {
        walk_id: new_id("walk"),
        title: new.title.trim().to_string(),
        date: new.date,
        time: new.time.trim().to_string(),
        city: new.city.trim().to_string(),
        neighborhood: new.neighborhood.trim().to_string(),
        starting_point: new.starting_point,
        ending_point: Some(ending_point),
        duration_hours: new.duration_hours,
        max_participants: new.max_participants,
        description: new.description,
        conditions,
        organizer_id: organizer.user_id.clone(),
        organizer_name: organizer.display_name().to_string(),
        created_at: now,
        updated_at: now,
    };

    let walk = db.walks.insert(walk).await?;
    tracing::info!(
        walk_id = %walk.walk_id,
        city = %walk.city,
        organizer = %walk.organizer_id,
        "Walk created"
    );
    Ok(walk)
}

pub async fn get_walk(db: &Database, walk_id: &str) -> Result<WalkView, WalkError> {
    let walk = db.walks.get(walk_id).await.ok_or(WalkError::NotFound)?;
    Ok(WalkView {
        participant_count: participant_count(db, walk_id).await,
        walk,
    })
}

pub async fn update_walk(
    db: &Database,
    walk_id: &str,
    update: WalkUpdate,
    user: &User,
    is_admin: bool,
) -> Result<Walk, WalkError> {
    let walk = db.walks.get(walk_id).await.ok_or(WalkError::NotFound)?;
    if walk.organizer_id != user.user_id && !is_admin {
        return Err(WalkError::NotOrganizer("edit"));
    }
    if update.is_empty() {
        return Err(WalkError::EmptyUpdate);
    }

    let mut update = update;
    if let Some(conditions) = update.conditions.take() {
        update.conditions = Some(normalize_conditions(conditions)?);
    }
    validate_schedule(
        update.date.as_deref().unwrap_or(&walk.date),
        update.time.as_deref().unwrap_or(&walk.time),
    )?;

    db.walks
        .update(walk_id, |w| update.apply(w))
        .await?
        .ok_or(WalkError::NotFound)
}

/// Delete a walk and every booking on it. Returns the number of bookings
/// removed.
pub async fn delete_walk(
    db: &Database,
    walk_id: &str,
    user: &User,
    is_admin: bool,
) -> Result<usize, WalkError> {
    let walk = db.walks.get(walk_id).await.ok_or(WalkError::NotFound)?;
    if walk.organizer_id != user.user_id && !is_admin {
        return Err(WalkError::NotOrganizer("delete"));
    }

    db.walks.delete(walk_id).await?.ok_or(WalkError::NotFound)?;
    let removed = db.bookings.delete_where(|b| b.walk_id == walk_id).await?;
    tracing::info!(walk_id, bookings = removed, "Walk deleted");
    Ok(removed)
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct BrowseOptions {
    #[serde(default)]
    pub show_past: bool,
    /// Admins only: every city, no audience filtering.
    #[serde(default)]
    pub all_locations: bool,
}

/// Walks a user can still join.
///
/// Restricted to the user's city (none without a city), excluding walks
/// the user already booked, today's walks that have started, and walks
/// whose audience does not admit the user.
pub async fn browse(
    db: &Database,
    user: &User,
    is_admin: bool,
    options: BrowseOptions,
    now: DateTime<Utc>,
) -> Vec<WalkView> {
    let global = options.all_locations && is_admin;
    let city = match (global, user.city.as_deref()) {
        (true, _) => None,
        (false, Some(city)) if !city.is_empty() => Some(city.to_string()),
        (false, _) => {
            tracing::debug!(user_id = %user.user_id, "No city set, no walks to browse");
            return Vec::new();
        }
    };

    let today = date_string(now);
    let booked: HashSet<String> = db
        .bookings
        .find(|b| b.user_id == user.user_id && b.is_active())
        .await
        .into_iter()
        .map(|b| b.walk_id)
        .collect();

    let mut walks: Vec<Walk> = db
        .walks
        .find(|w| {
            (options.show_past || w.date >= today)
                && city.as_ref().map_or(true, |c| &w.city == c)
        })
        .await
        .into_iter()
        .filter(|w| !booked.contains(&w.walk_id))
        .filter(|w| !has_started(w, now))
        .filter(|w| global || matching::walk_admits(w, user))
        .collect();
    walks.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.time.cmp(&b.time)));

    tracing::debug!(
        user_id = %user.user_id,
        city = ?user.city,
        count = walks.len(),
        "Browsing walks"
    );
    with_counts(db, walks).await
}

/// Every walk organized by `user_id`, newest date first.
pub async fn organized_by(db: &Database, user_id: &str) -> Vec<WalkView> {
    let mut walks = db.walks.find(|w| w.organizer_id == user_id).await;
    walks.sort_by(|a, b| b.date.cmp(&a.date));
    with_counts(db, walks).await
}

/// Walks the user may leave feedback on: any walk they booked, or any walk
/// in their city and neighborhood, never their own.
pub async fn feedback_eligible(db: &Database, user: &User) -> Vec<Walk> {
    let booked: HashSet<String> = db
        .bookings
        .find(|b| b.user_id == user.user_id)
        .await
        .into_iter()
        .map(|b| b.walk_id)
        .collect();
    let area = match (user.city.as_deref(), user.neighborhood.as_deref()) {
        (Some(c), Some(n)) if !c.is_empty() && !n.is_empty() => Some((c, n)),
        _ => None,
    };
    if booked.is_empty() && area.is_none() {
        return Vec::new();
    }

    let mut walks = db
        .walks
        .find(|w| {
            w.organizer_id != user.user_id
                && (booked.contains(&w.walk_id)
                    || area.map_or(false, |(c, n)| w.city == c && w.neighborhood == n))
        })
        .await;
    walks.sort_by(|a, b| b.date.cmp(&a.date));
    walks
}

/// Booked walks the user has not reviewed yet.
pub async fn reviewable(db: &Database, user_id: &str) -> Vec<Walk> {
    let reviewed: HashSet<String> = db
        .reviews
        .find(|r| r.user_id == user_id)
        .await
        .into_iter()
        .map(|r| r.walk_id)
        .collect();
    let pending: HashSet<String> = db
        .bookings
        .find(|b| b.user_id == user_id)
        .await
        .into_iter()
        .map(|b| b.walk_id)
        .filter(|id| !reviewed.contains(id))
        .collect();
    if pending.is_empty() {
        return Vec::new();
    }

    let mut walks = db.walks.find(|w| pending.contains(&w.walk_id)).await;
    walks.sort_by(|a, b| b.date.cmp(&a.date));
    walks
}

/// Book a spot. Only the hard limit caps a walk, `max_participants` is shown
/// to walkers but not enforced. Capacity and duplicate checks run under the
/// same lock as the insert.
pub async fn book(db: &Database, walk_id: &str, user: &User) -> Result<Booking, WalkError> {
    db.walks.get(walk_id).await.ok_or(WalkError::NotFound)?;

    let booking = Booking {
        booking_id: new_id("booking"),
        walk_id: walk_id.to_string(),
        user_id: user.user_id.clone(),
        user_name: user.display_name().to_string(),
        user_email: user.email.clone(),
        booked_at: Utc::now(),
        status: BookingStatus::Active,
    };
    let booking = db
        .bookings
        .insert_if(booking, |existing| {
            let mut active = 0;
            let mut already = false;
            for b in existing.filter(|b| b.walk_id == walk_id && b.is_active()) {
                active += 1;
                already |= b.user_id == user.user_id;
            }
            if active >= HARD_PARTICIPANT_LIMIT as usize {
                Err(WalkError::Full(HARD_PARTICIPANT_LIMIT))
            } else if already {
                Err(WalkError::AlreadyBooked)
            } else {
                Ok(())
            }
        })
        .await?;
    tracing::info!(walk_id, user_id = %user.user_id, "Walk booked");
    Ok(booking)
}

/// Mark one of the user's bookings as cancelled.
pub async fn cancel_booking(db: &Database, booking_id: &str, user_id: &str) -> Result<(), WalkError> {
    match db.bookings.get(booking_id).await {
        Some(b) if b.user_id == user_id => {}
        _ => return Err(WalkError::BookingNotFound),
    }
    db.bookings
        .update(booking_id, |b| b.status = BookingStatus::Cancelled)
        .await?;
    Ok(())
}

/// Active booking with the title and date of its walk.
#[derive(Debug, Clone, Serialize)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    pub walk_title: String,
    pub walk_date: String,
}

pub async fn bookings_of(db: &Database, user_id: &str) -> Vec<BookingView> {
    let bookings = db
        .bookings
        .find(|b| b.user_id == user_id && b.is_active())
        .await;
    let walk_ids: HashSet<&str> = bookings.iter().map(|b| b.walk_id.as_str()).collect();
    let walks: HashMap<String, Walk> = db
        .walks
        .find(|w| walk_ids.contains(w.walk_id.as_str()))
        .await
        .into_iter()
        .map(|w| (w.walk_id.clone(), w))
        .collect();

    let mut views: Vec<BookingView> = bookings
        .into_iter()
        .map(|booking| {
            let walk = walks.get(&booking.walk_id);
            BookingView {
                walk_title: walk.map_or("Unknown Walk", |w| w.title.as_str()).to_string(),
                walk_date: walk.map_or("Unknown Date", |w| w.date.as_str()).to_string(),
                booking,
            }
        })
        .collect();
    views.sort_by(|a, b| a.walk_date.cmp(&b.walk_date));
    views
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantInfo {
    pub user_id: String,
    pub name: String,
    pub pseudonym: Option<String>,
    pub email: String,
    pub picture: Option<String>,
    pub age: Option<u32>,
    pub sex: Option<String>,
    pub country_of_birth: Option<String>,
    pub booked_at: DateTime<Utc>,
    pub badge_level: u32,
    pub total_walks: usize,
}

/// Active participants of a walk with their badge progress.
pub async fn participants(db: &Database, walk_id: &str) -> Result<Vec<ParticipantInfo>, WalkError> {
    if db.walks.get(walk_id).await.is_none() {
        return Err(WalkError::NotFound);
    }

    let today = today();
    let mut bookings = db
        .bookings
        .find(|b| b.walk_id == walk_id && b.is_active())
        .await;
    bookings.sort_by_key(|b| b.booked_at);

    let mut out = Vec::with_capacity(bookings.len());
    for booking in bookings {
        let Some(user) = db.users.get(&booking.user_id).await else {
            continue;
        };
        let progress = badges::progress(db, &user.user_id, &today).await;
        out.push(ParticipantInfo {
            user_id: user.user_id,
            name: user.name,
            pseudonym: user.pseudonym,
            email: user.email,
            picture: user.picture,
            age: user.age,
            sex: user.sex,
            country_of_birth: user.country_of_birth,
            booked_at: booking.booked_at,
            badge_level: progress.badge_level,
            total_walks: progress.total_walks,
        });
    }
    Ok(out)
}
