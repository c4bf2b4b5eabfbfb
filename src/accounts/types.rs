//! Account documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Document;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Suspended,
    Blocked,
}

impl UserStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Blocked => "blocked",
        }
    }
}

/// How the account signs in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    Email,
    Apple,
    Oauth,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub email: String,
    pub name: String,
    /// Display name used on bookings, feedback and reviews.
    #[serde(default)]
    pub pseudonym: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub age: Option<u32>,
    /// Stored as entered; compare through `matching::Sex::normalize`.
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub country_of_birth: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub neighborhood: Option<String>,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    #[serde(default = "default_true")]
    pub email_notifications: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default)]
    pub terms_accepted: bool,
    #[serde(default)]
    pub terms_accepted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auth_type: AuthType,
    /// Present only for email/password accounts.
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_celebrated_badge: u32,
    #[serde(default)]
    pub is_cancelled: bool,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub status_reason: Option<String>,
    #[serde(default)]
    pub status_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status_updated_by: Option<String>,
}

impl User {
    fn base(user_id: &str, email: &str, name: &str, auth_type: AuthType) -> Self {
        Self {
            user_id: user_id.to_string(),
            email: email.trim().to_lowercase(),
            name: name.trim().to_string(),
            pseudonym: None,
            picture: None,
            role: Role::User,
            age: None,
            sex: None,
            country_of_birth: None,
            country: None,
            country_code: None,
            city: None,
            neighborhood: None,
            notifications_enabled: true,
            email_notifications: true,
            created_at: Utc::now(),
            status: UserStatus::Active,
            terms_accepted: false,
            terms_accepted_at: None,
            auth_type,
            password_hash: None,
            last_login_at: None,
            last_celebrated_badge: 0,
            is_cancelled: false,
            cancelled_at: None,
            cancellation_reason: None,
            status_reason: None,
            status_updated_at: None,
            status_updated_by: None,
        }
    }

    /// New email/password account.
    pub fn new_email(user_id: &str, email: &str, name: &str, password_hash: Option<String>) -> Self {
        Self {
            password_hash,
            ..Self::base(user_id, email, name, AuthType::Email)
        }
    }

    /// New account created through an external identity provider.
    pub fn new_external(user_id: &str, email: &str, name: &str, auth_type: AuthType) -> Self {
        Self {
            last_login_at: Some(Utc::now()),
            ..Self::base(user_id, email, name, auth_type)
        }
    }

    /// Pseudonym when set, otherwise the real name.
    pub fn display_name(&self) -> &str {
        self.pseudonym
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(self.name.as_str())
    }

    pub fn first_name(&self) -> Option<&str> {
        self.name.split_whitespace().next()
    }
}

/// A user as returned by the API: everything but the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub pseudonym: Option<String>,
    pub picture: Option<String>,
    pub role: Role,
    pub age: Option<u32>,
    pub sex: Option<String>,
    pub country_of_birth: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub city: Option<String>,
    pub neighborhood: Option<String>,
    pub notifications_enabled: bool,
    pub email_notifications: bool,
    pub created_at: DateTime<Utc>,
    pub status: UserStatus,
    pub terms_accepted: bool,
    pub terms_accepted_at: Option<DateTime<Utc>>,
    pub auth_type: AuthType,
    pub last_login_at: Option<DateTime<Utc>>,
    pub is_cancelled: bool,
    pub status_reason: Option<String>,
}

impl From<User> for UserView {
    fn from(u: User) -> Self {
        Self {
            user_id: u.user_id,
            email: u.email,
            name: u.name,
            pseudonym: u.pseudonym,
            picture: u.picture,
            role: u.role,
            age: u.age,
            sex: u.sex,
            country_of_birth: u.country_of_birth,
            country: u.country,
            country_code: u.country_code,
            city: u.city,
            neighborhood: u.neighborhood,
            notifications_enabled: u.notifications_enabled,
            email_notifications: u.email_notifications,
            created_at: u.created_at,
            status: u.status,
            terms_accepted: u.terms_accepted,
            terms_accepted_at: u.terms_accepted_at,
            auth_type: u.auth_type,
            last_login_at: u.last_login_at,
            is_cancelled: u.is_cancelled,
            status_reason: u.status_reason,
        }
    }
}

impl Document for User {
    const COLLECTION: &'static str = "users";

    fn key(&self) -> String {
        self.user_id.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Document for Session {
    const COLLECTION: &'static str = "user_sessions";

    fn key(&self) -> String {
        self.session_token.clone()
    }
}

/// One outstanding reset code per email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordReset {
    pub email: String,
    pub reset_code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl Document for PasswordReset {
    const COLLECTION: &'static str = "password_resets";

    fn key(&self) -> String {
        self.email.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountCancellation {
    pub cancellation_id: String,
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub reason: String,
    pub improvement_suggestion: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

impl Document for AccountCancellation {
    const COLLECTION: &'static str = "account_cancellations";

    fn key(&self) -> String {
        self.cancellation_id.clone()
    }
}
