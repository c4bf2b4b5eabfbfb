//! Admin moderation: inbox, content reports, user status and the audit log.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::accounts::{User, UserStatus, UserView};
use crate::community::{
    AdminMessage, ContentReport, Feedback, ModerationAction, ModerationEntry, ReportStatus,
    WalkReview, WalkerExperience,
};
use crate::store::{new_id, Database, StoreError, StoreResult};
use crate::walks::{Booking, BookingStatus, Walk};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// `skip`/`limit` window over a listing.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "Page::default_limit")]
    pub limit: usize,
}

impl Page {
    fn default_limit() -> usize {
        50
    }

    pub fn new(skip: usize, limit: usize) -> Self {
        Self { skip, limit }
    }

    fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.skip).take(self.limit).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub skip: usize,
    pub limit: usize,
}

fn paged<T>(mut items: Vec<T>, page: Page, sort: impl FnMut(&T, &T) -> std::cmp::Ordering) -> Paged<T> {
    items.sort_by(sort);
    let total = items.len();
    Paged {
        items: page.apply(items),
        total,
        skip: page.skip,
        limit: page.limit,
    }
}

async fn log_action(db: &Database, admin: &User, action: ModerationAction) -> StoreResult<()> {
    db.moderation_log
        .insert(ModerationEntry {
            entry_id: new_id("mod"),
            action,
            admin_id: admin.user_id.clone(),
            admin_email: admin.email.clone(),
            created_at: Utc::now(),
        })
        .await?;
    Ok(())
}

pub async fn messages(db: &Database, page: Page) -> Paged<AdminMessage> {
    paged(db.admin_messages.all().await, page, |a, b| {
        b.created_at.cmp(&a.created_at)
    })
}

pub async fn mark_message_read(db: &Database, message_id: &str) -> Result<(), AdminError> {
    db.admin_messages
        .update(message_id, |m| {
            m.read = true;
            m.read_at = Some(Utc::now());
        })
        .await?
        .ok_or(AdminError::NotFound("Message"))?;
    Ok(())
}

pub async fn reports(db: &Database, page: Page) -> Paged<ContentReport> {
    paged(db.content_reports.all().await, page, |a, b| {
        b.created_at.cmp(&a.created_at)
    })
}

pub async fn set_report_status(
    db: &Database,
    admin: &User,
    report_id: &str,
    status: &str,
) -> Result<ReportStatus, AdminError> {
    let status = ReportStatus::parse(status).ok_or_else(|| {
        AdminError::Invalid("Invalid status. Must be: pending, reviewed, or resolved".to_string())
    })?;
    db.content_reports
        .update(report_id, |r| {
            r.status = status;
            r.reviewed_by = Some(admin.email.clone());
            r.reviewed_at = Some(Utc::now());
        })
        .await?
        .ok_or(AdminError::NotFound("Report"))?;
    Ok(status)
}

pub async fn all_feedback(db: &Database, page: Page) -> Paged<Feedback> {
    paged(db.feedback.all().await, page, |a, b| b.created_at.cmp(&a.created_at))
}

pub async fn delete_feedback(db: &Database, admin: &User, feedback_id: &str) -> Result<(), AdminError> {
    db.feedback
        .delete(feedback_id)
        .await?
        .ok_or(AdminError::NotFound("Feedback"))?;
    tracing::info!(admin = %admin.email, feedback_id, "Admin deleted feedback");
    Ok(())
}

/// Hide or show an experience. The change is audited.
pub async fn set_experience_visibility(
    db: &Database,
    admin: &User,
    experience_id: &str,
    is_visible: bool,
    reason: Option<String>,
) -> Result<(), AdminError> {
    let experience = db
        .experiences
        .update(experience_id, |e| {
            e.is_visible = is_visible;
            e.visibility_updated_at = Some(Utc::now());
            e.visibility_updated_by = Some(admin.user_id.clone());
            e.visibility_reason = reason.clone();
        })
        .await?
        .ok_or(AdminError::NotFound("Experience"))?;

    log_action(
        db,
        admin,
        ModerationAction::ExperienceVisibilityChange {
            experience_id: experience_id.to_string(),
            experience_user_id: experience.user_id,
            new_visibility: is_visible,
            reason,
        },
    )
    .await?;
    tracing::info!(admin = %admin.email, experience_id, is_visible, "Experience visibility changed");
    Ok(())
}

/// Delete an experience, keeping an excerpt in the audit log.
pub async fn delete_experience(
    db: &Database,
    admin: &User,
    experience_id: &str,
    reason: Option<String>,
) -> Result<(), AdminError> {
    let experience = db
        .experiences
        .get(experience_id)
        .await
        .ok_or(AdminError::NotFound("Experience"))?;

    log_action(
        db,
        admin,
        ModerationAction::ExperienceDeleted {
            experience_id: experience_id.to_string(),
            experience_user_id: experience.user_id.clone(),
            experience_text: experience.text.chars().take(200).collect(),
            reason,
        },
    )
    .await?;
    db.experiences.delete(experience_id).await?;
    tracing::info!(admin = %admin.email, experience_id, "Admin deleted experience");
    Ok(())
}

/// Activate, suspend or block an account. Admins cannot change their own
/// status.
pub async fn set_user_status(
    db: &Database,
    admin: &User,
    user_id: &str,
    status: &str,
    reason: Option<String>,
) -> Result<UserStatus, AdminError> {
    let status = UserStatus::parse(status).ok_or_else(|| {
        AdminError::Invalid(
            "Invalid status. Must be one of: active, suspended, blocked".to_string(),
        )
    })?;
    if user_id == admin.user_id {
        return Err(AdminError::Invalid("Cannot change your own status".to_string()));
    }

    let target = db
        .users
        .update(user_id, |u| {
            u.status = status;
            u.status_updated_at = Some(Utc::now());
            u.status_updated_by = Some(admin.user_id.clone());
            if reason.is_some() {
                u.status_reason = reason.clone();
            }
        })
        .await?
        .ok_or(AdminError::NotFound("User"))?;

    log_action(
        db,
        admin,
        ModerationAction::UserStatusChange {
            target_user_id: user_id.to_string(),
            target_user_email: target.email.clone(),
            new_status: status,
            reason,
        },
    )
    .await?;
    tracing::info!(
        admin = %admin.email,
        target = %target.email,
        status = status.as_str(),
        "User status changed"
    );
    Ok(status)
}

/// Every account, newest first, optionally of one status.
pub async fn list_users(db: &Database, status: Option<UserStatus>) -> Vec<UserView> {
    let mut users = db
        .users
        .find(|u| status.map_or(true, |s| u.status == s))
        .await;
    users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    users.into_iter().map(UserView::from).collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserSearch {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub neighborhood: Option<String>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "UserSearch::default_limit")]
    pub limit: usize,
}

impl UserSearch {
    fn default_limit() -> usize {
        20
    }

    fn present(field: &Option<String>) -> Option<String> {
        field
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    /// Any criterion matching is enough. No criteria matches everyone.
    pub fn matches(&self, user: &User) -> bool {
        let contains = |value: Option<&str>, needle: &str| {
            value.is_some_and(|v| v.to_lowercase().contains(needle))
        };

        let q = Self::present(&self.q);
        let city = Self::present(&self.city);
        let neighborhood = Self::present(&self.neighborhood);
        if q.is_none() && city.is_none() && neighborhood.is_none() {
            return true;
        }

        q.as_deref().is_some_and(|q| {
            contains(user.pseudonym.as_deref(), q)
                || contains(Some(&user.name), q)
                || contains(Some(&user.email), q)
        }) || city
            .as_deref()
            .is_some_and(|c| contains(user.city.as_deref(), c))
            || neighborhood
                .as_deref()
                .is_some_and(|n| contains(user.neighborhood.as_deref(), n))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    #[serde(flatten)]
    pub user: UserView,
    pub walks_organized: usize,
    pub total_bookings: usize,
    pub experiences_count: usize,
}

/// Case-insensitive user search, sorted by name.
pub async fn search_users(db: &Database, search: &UserSearch) -> Paged<UserSummary> {
    let mut users = db.users.find(|u| search.matches(u)).await;
    users.sort_by(|a, b| a.name.cmp(&b.name));
    let total = users.len();
    let page = Page::new(search.skip, search.limit);

    let mut items = Vec::new();
    for user in page.apply(users) {
        let id = user.user_id.clone();
        items.push(UserSummary {
            walks_organized: db.walks.count(|w| w.organizer_id == id).await,
            total_bookings: db.bookings.count(|b| b.user_id == id).await,
            experiences_count: db.experiences.count(|e| e.user_id == id).await,
            user: user.into(),
        });
    }

    Paged {
        items,
        total,
        skip: page.skip,
        limit: page.limit,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserCounts {
    pub walks_organized: usize,
    pub walks_booked: usize,
    pub walks_cancelled: usize,
    pub experiences_shared: usize,
    pub reviews_given: usize,
    pub feedbacks_sent: usize,
    pub feedbacks_received: usize,
    pub admin_messages_sent: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentWalk {
    pub walk_id: String,
    pub title: String,
    pub date: String,
    pub city: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentBooking {
    #[serde(flatten)]
    pub booking: Booking,
    pub walk_title: Option<String>,
    pub walk_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserDetails {
    pub user: UserView,
    pub stats: UserCounts,
    pub recent_walks: Vec<RecentWalk>,
    pub recent_bookings: Vec<RecentBooking>,
    pub experiences: Vec<WalkerExperience>,
    pub feedbacks_sent: Vec<Feedback>,
    pub feedbacks_received: Vec<Feedback>,
    pub admin_messages: Vec<AdminMessage>,
    pub reviews: Vec<WalkReview>,
}

fn latest<T>(mut items: Vec<T>, n: usize, key: impl Fn(&T) -> chrono::DateTime<Utc>) -> Vec<T> {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
    items.truncate(n);
    items
}

/// Everything an admin needs to review one account.
pub async fn user_details(db: &Database, user_id: &str) -> Result<UserDetails, AdminError> {
    let user = db.users.get(user_id).await.ok_or(AdminError::NotFound("User"))?;

    let bookings = db.bookings.find(|b| b.user_id == user_id).await;
    let feedbacks_sent = db.feedback.find(|f| f.from_user_id == user_id).await;
    let feedbacks_received = db.feedback.find(|f| f.to_organizer_id == user_id).await;
    let experiences = db.experiences.find(|e| e.user_id == user_id).await;
    let admin_messages = db.admin_messages.find(|m| m.from_user_id == user_id).await;
    let reviews = db.reviews.find(|r| r.user_id == user_id).await;
    let mut organized: Vec<Walk> = db.walks.find(|w| w.organizer_id == user_id).await;

    let stats = UserCounts {
        walks_organized: organized.len(),
        walks_booked: bookings.iter().filter(|b| b.is_active()).count(),
        walks_cancelled: bookings
            .iter()
            .filter(|b| b.status == BookingStatus::Cancelled)
            .count(),
        experiences_shared: experiences.len(),
        reviews_given: reviews.len(),
        feedbacks_sent: feedbacks_sent.len(),
        feedbacks_received: feedbacks_received.len(),
        admin_messages_sent: admin_messages.len(),
    };

    organized.sort_by(|a, b| b.date.cmp(&a.date));
    let recent_walks = organized
        .into_iter()
        .take(5)
        .map(|w| RecentWalk {
            walk_id: w.walk_id,
            title: w.title,
            date: w.date,
            city: w.city,
        })
        .collect();

    let mut recent_bookings = Vec::new();
    for booking in latest(bookings, 5, |b| b.booked_at) {
        let walk = db.walks.get(&booking.walk_id).await;
        recent_bookings.push(RecentBooking {
            walk_title: walk.as_ref().map(|w| w.title.clone()),
            walk_date: walk.map(|w| w.date),
            booking,
        });
    }

    Ok(UserDetails {
        user: user.into(),
        stats,
        recent_walks,
        recent_bookings,
        experiences: latest(experiences, 10, |e| e.created_at),
        feedbacks_sent: latest(feedbacks_sent, 10, |f| f.created_at),
        feedbacks_received: latest(feedbacks_received, 10, |f| f.created_at),
        admin_messages: latest(admin_messages, 10, |m| m.created_at),
        reviews: latest(reviews, 10, |r| r.created_at),
    })
}

/// Audit entries, newest first.
pub async fn moderation_log(db: &Database, limit: usize) -> Vec<ModerationEntry> {
    latest(db.moderation_log.all().await, limit, |e| e.created_at)
}

/// Remove bookings whose walk no longer exists. Returns how many went.
pub async fn cleanup_orphaned_bookings(db: &Database) -> StoreResult<usize> {
    let walk_ids: std::collections::HashSet<String> =
        db.walks.all().await.into_iter().map(|w| w.walk_id).collect();
    let removed = db
        .bookings
        .delete_where(|b| !walk_ids.contains(&b.walk_id))
        .await?;
    tracing::info!(removed, "Removed orphaned bookings");
    Ok(removed)
}
