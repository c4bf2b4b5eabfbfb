//! Walk count badges.
//!
//! A walk counts as completed once its date is in the past, whether the
//! user organized it or holds an active booking on it.

use std::collections::HashSet;

use serde::Serialize;

use crate::store::{Database, StoreResult};

pub const BADGE_LEVELS: [usize; 5] = [10, 50, 100, 200, 500];

/// Highest badge reached, or 0.
pub fn badge_level(total_walks: usize) -> u32 {
    BADGE_LEVELS
        .iter()
        .rev()
        .find(|&&level| total_walks >= level)
        .map_or(0, |&level| level as u32)
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Progress {
    pub organized_count: usize,
    pub participated_count: usize,
    pub total_walks: usize,
    pub badge_level: u32,
}

/// Completed walks of `user_id` as of `today` (`YYYY-MM-DD`, exclusive).
pub async fn progress(db: &Database, user_id: &str, today: &str) -> Progress {
    let organized_count = db
        .walks
        .count(|w| w.organizer_id == user_id && w.date.as_str() < today)
        .await;

    let booked: HashSet<String> = db
        .bookings
        .find(|b| b.user_id == user_id && b.is_active())
        .await
        .into_iter()
        .map(|b| b.walk_id)
        .collect();
    let participated_count = if booked.is_empty() {
        0
    } else {
        db.walks
            .count(|w| booked.contains(&w.walk_id) && w.date.as_str() < today)
            .await
    };

    let total_walks = organized_count + participated_count;
    Progress {
        organized_count,
        participated_count,
        total_walks,
        badge_level: badge_level(total_walks),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BadgeInfo {
    #[serde(flatten)]
    pub progress: Progress,
    pub should_celebrate: bool,
    pub last_celebrated_badge: u32,
}

impl BadgeInfo {
    pub fn new(progress: Progress, last_celebrated_badge: u32) -> Self {
        Self {
            should_celebrate: progress.badge_level > 0
                && progress.badge_level > last_celebrated_badge,
            progress,
            last_celebrated_badge,
        }
    }
}

/// Record the current level as celebrated. Returns that level.
pub async fn celebrate(db: &Database, user_id: &str, today: &str) -> StoreResult<u32> {
    let level = progress(db, user_id, today).await.badge_level;
    db.users
        .update(user_id, |u| u.last_celebrated_badge = level)
        .await?;
    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walks::test_support::{user_in, walk_in};
    use crate::walks::{self, BookingStatus};

    #[test]
    fn test_badge_levels() {
        assert_eq!(badge_level(0), 0);
        assert_eq!(badge_level(9), 0);
        assert_eq!(badge_level(10), 10);
        assert_eq!(badge_level(49), 10);
        assert_eq!(badge_level(50), 50);
        assert_eq!(badge_level(499), 200);
        assert_eq!(badge_level(10_000), 500);
    }

    #[test]
    fn test_should_celebrate() {
        let progress = Progress {
            organized_count: 6,
            participated_count: 6,
            total_walks: 12,
            badge_level: 10,
        };
        assert!(BadgeInfo::new(progress, 0).should_celebrate);
        assert!(!BadgeInfo::new(progress, 10).should_celebrate);

        let none = Progress {
            badge_level: 0,
            total_walks: 3,
            ..progress
        };
        assert!(!BadgeInfo::new(none, 0).should_celebrate);
    }

    #[tokio::test]
    async fn test_progress_counts_only_past_walks() {
        let db = Database::in_memory();
        let walker = user_in("walker", "Lyon");
        db.users.insert(walker.clone()).await.unwrap();

        for (date, organizer) in [
            ("2020-01-01", "walker"),
            ("2020-01-02", "walker"),
            ("2999-01-01", "walker"),
        ] {
            let mut w = walk_in("Lyon", organizer);
            w.date = date.to_string();
            db.walks.insert(w).await.unwrap();
        }

        let mut joined = Vec::new();
        for date in ["2020-02-01", "2020-02-02", "2999-02-01"] {
            let mut w = walk_in("Lyon", "org");
            w.date = date.to_string();
            let w = db.walks.insert(w).await.unwrap();
            joined.push(walks::book(&db, &w.walk_id, &walker).await.unwrap());
        }
        db.bookings
            .update(&joined[1].booking_id, |b| b.status = BookingStatus::Cancelled)
            .await
            .unwrap();

        let p = progress(&db, "walker", "2026-01-01").await;
        assert_eq!(p.organized_count, 2);
        assert_eq!(p.participated_count, 1);
        assert_eq!(p.total_walks, 3);
        assert_eq!(p.badge_level, 0);

        assert_eq!(celebrate(&db, "walker", "2026-01-01").await.unwrap(), 0);
    }
}
