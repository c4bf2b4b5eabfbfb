//! Community documents: feedback, reviews, experiences and messages to admins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::accounts::UserStatus;
use crate::store::Document;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackReply {
    pub reply_id: String,
    pub feedback_id: String,
    pub from_user_id: String,
    pub from_user_name: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Private message from a walker to the organizer of a walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub feedback_id: String,
    pub walk_id: String,
    pub walk_title: String,
    pub from_user_id: String,
    pub from_user_name: String,
    pub to_organizer_id: String,
    pub to_organizer_name: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub replies: Vec<FeedbackReply>,
}

impl Document for Feedback {
    const COLLECTION: &'static str = "feedback";

    fn key(&self) -> String {
        self.feedback_id.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkReview {
    pub review_id: String,
    pub walk_id: String,
    pub walk_title: String,
    pub user_id: String,
    pub user_name: String,
    /// 1 to 5 stars.
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Document for WalkReview {
    const COLLECTION: &'static str = "reviews";

    fn key(&self) -> String {
        self.review_id.clone()
    }
}

fn default_true() -> bool {
    true
}

/// Public post shared with walkers of the same city.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkerExperience {
    pub experience_id: String,
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub user_pseudonym: Option<String>,
    #[serde(default)]
    pub user_city: Option<String>,
    #[serde(default)]
    pub user_picture: Option<String>,
    #[serde(default)]
    pub walk_id: Option<String>,
    #[serde(default)]
    pub walk_title: Option<String>,
    pub text: String,
    /// Base64 encoded media, stored as sent.
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub video: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_visible: bool,
    #[serde(default)]
    pub visibility_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub visibility_updated_by: Option<String>,
    #[serde(default)]
    pub visibility_reason: Option<String>,
}

impl Document for WalkerExperience {
    const COLLECTION: &'static str = "experiences";

    fn key(&self) -> String {
        self.experience_id.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminMessage {
    pub message_id: String,
    pub from_user_id: String,
    pub from_user_name: String,
    pub from_user_email: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

impl Document for AdminMessage {
    const COLLECTION: &'static str = "admin_messages";

    fn key(&self) -> String {
        self.message_id.clone()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    #[default]
    Pending,
    Reviewed,
    Resolved,
}

impl ReportStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "reviewed" => Some(Self::Reviewed),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reviewed => "reviewed",
            Self::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentReport {
    pub report_id: String,
    pub reporter_user_id: String,
    pub reporter_user_name: String,
    pub reporter_user_email: String,
    /// `feedback`, `experience` or `walk`.
    pub content_type: String,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub reported_user_name: Option<String>,
    #[serde(default)]
    pub walk_title: Option<String>,
    #[serde(default)]
    pub walk_date: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: ReportStatus,
    #[serde(default)]
    pub reviewed_by: Option<String>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl Document for ContentReport {
    const COLLECTION: &'static str = "content_reports";

    fn key(&self) -> String {
        self.report_id.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ModerationAction {
    UserStatusChange {
        target_user_id: String,
        target_user_email: String,
        new_status: UserStatus,
        reason: Option<String>,
    },
    ExperienceVisibilityChange {
        experience_id: String,
        experience_user_id: String,
        new_visibility: bool,
        reason: Option<String>,
    },
    ExperienceDeleted {
        experience_id: String,
        experience_user_id: String,
        /// First 200 characters of the deleted text.
        experience_text: String,
        reason: Option<String>,
    },
}

/// Audit record of an admin moderation action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationEntry {
    pub entry_id: String,
    #[serde(flatten)]
    pub action: ModerationAction,
    pub admin_id: String,
    pub admin_email: String,
    pub created_at: DateTime<Utc>,
}

impl Document for ModerationEntry {
    const COLLECTION: &'static str = "moderation_log";

    fn key(&self) -> String {
        self.entry_id.clone()
    }
}
