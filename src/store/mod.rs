//! Document storage.
//!
//! Every kind of record is kept in its own [`Collection`], which holds the
//! documents in memory and mirrors them to `{data_dir}/{collection}.json`.

mod collection;

use std::path::Path;

use thiserror::Error;
use uuid::Uuid;

pub use collection::{Collection, Document};

use crate::accounts::{AccountCancellation, PasswordReset, Session, User};
use crate::community::{
    AdminMessage, ContentReport, Feedback, ModerationEntry, WalkReview, WalkerExperience,
};
use crate::jobs::{ReminderMarker, RetentionNotification};
use crate::notify::PushToken;
use crate::stats::WalkTrackingStat;
use crate::walks::{Booking, Walk};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize documents: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("collection {collection} is corrupt: {source}")]
    Corrupt {
        collection: &'static str,
        source: serde_json::Error,
    },

    #[error("{collection} already contains {key}")]
    Duplicate {
        collection: &'static str,
        key: String,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Generate a prefixed identifier such as `walk_3f2a9c01b7de`.
pub fn new_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &hex[..12])
}

/// All collections used by the service.
pub struct Database {
    pub users: Collection<User>,
    pub sessions: Collection<Session>,
    pub password_resets: Collection<PasswordReset>,
    pub account_cancellations: Collection<AccountCancellation>,
    pub walks: Collection<Walk>,
    pub bookings: Collection<Booking>,
    pub feedback: Collection<Feedback>,
    pub reviews: Collection<WalkReview>,
    pub experiences: Collection<WalkerExperience>,
    pub admin_messages: Collection<AdminMessage>,
    pub content_reports: Collection<ContentReport>,
    pub moderation_log: Collection<ModerationEntry>,
    pub push_tokens: Collection<PushToken>,
    pub reminders_sent: Collection<ReminderMarker>,
    pub retention_notifications: Collection<RetentionNotification>,
    pub walk_tracking_stats: Collection<WalkTrackingStat>,
}

impl Database {
    /// Open (or create) every collection under `data_dir`.
    pub async fn open(data_dir: &Path) -> StoreResult<Self> {
        tokio::fs::create_dir_all(data_dir).await?;

        let db = Self {
            users: Collection::open(data_dir).await?,
            sessions: Collection::open(data_dir).await?,
            password_resets: Collection::open(data_dir).await?,
            account_cancellations: Collection::open(data_dir).await?,
            walks: Collection::open(data_dir).await?,
            bookings: Collection::open(data_dir).await?,
            feedback: Collection::open(data_dir).await?,
            reviews: Collection::open(data_dir).await?,
            experiences: Collection::open(data_dir).await?,
            admin_messages: Collection::open(data_dir).await?,
            content_reports: Collection::open(data_dir).await?,
            moderation_log: Collection::open(data_dir).await?,
            push_tokens: Collection::open(data_dir).await?,
            reminders_sent: Collection::open(data_dir).await?,
            retention_notifications: Collection::open(data_dir).await?,
            walk_tracking_stats: Collection::open(data_dir).await?,
        };

        tracing::info!(
            users = db.users.len().await,
            walks = db.walks.len().await,
            "Opened document store at {}",
            data_dir.display()
        );
        Ok(db)
    }

    /// A database that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            users: Collection::in_memory(),
            sessions: Collection::in_memory(),
            password_resets: Collection::in_memory(),
            account_cancellations: Collection::in_memory(),
            walks: Collection::in_memory(),
            bookings: Collection::in_memory(),
            feedback: Collection::in_memory(),
            reviews: Collection::in_memory(),
            experiences: Collection::in_memory(),
            admin_messages: Collection::in_memory(),
            content_reports: Collection::in_memory(),
            moderation_log: Collection::in_memory(),
            push_tokens: Collection::in_memory(),
            reminders_sent: Collection::in_memory(),
            retention_notifications: Collection::in_memory(),
            walk_tracking_stats: Collection::in_memory(),
        }
    }
}
