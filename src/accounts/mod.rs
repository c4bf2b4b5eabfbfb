//! Accounts, sessions and password resets.
//!
//! Sessions are opaque tokens stored in the `user_sessions` collection. A
//! client presents the token either as the `session_token` cookie or as an
//! `Authorization: Bearer` header.

pub mod password;
mod types;

use password::PasswordError;

use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use types::*;

use crate::config::Config;
use crate::matching::Sex;
use crate::store::{new_id, Database, StoreError, StoreResult};

pub const RESET_CODE_TTL_MINUTES: i64 = 15;
pub const TERMS_REACCEPT_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Not authenticated")]
    MissingToken,

    #[error("Invalid session")]
    InvalidSession,

    #[error("Session expired")]
    Expired,

    #[error("User not found")]
    UserNotFound,

    #[error("Your account has been blocked. Please contact support.")]
    Blocked,

    #[error("Your account has been temporarily suspended. Please contact support.")]
    Suspended,

    #[error("Invalid email format")]
    InvalidEmail,

    #[error("Name must be at least 2 characters")]
    NameTooShort,

    #[error("Email already registered")]
    EmailTaken,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("This account uses Google or Apple Sign-In. Please use that method to log in.")]
    ExternalAccount,

    #[error("Invalid or expired reset code")]
    InvalidResetCode,

    #[error("Reset code has expired. Please request a new one.")]
    ResetCodeExpired,

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Admins are users with the admin role or an email listed in `ADMIN_EMAILS`.
pub fn is_admin(user: &User, config: &Config) -> bool {
    user.role == Role::Admin || config.is_admin_email(&user.email)
}

pub fn is_valid_email(email: &str) -> bool {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    EMAIL_RE
        .get_or_init(|| {
            Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
                .expect("email regex is valid")
        })
        .is_match(email)
}

/// Random session token in the `sess_<32 hex>` format.
pub fn new_session_token() -> String {
    format!("sess_{}", uuid::Uuid::new_v4().simple())
}

/// Store a session for `user_id` under `token`.
pub async fn create_session(
    db: &Database,
    user_id: &str,
    token: String,
    ttl_days: i64,
) -> StoreResult<Session> {
    let now = Utc::now();
    let session = Session {
        session_token: token,
        user_id: user_id.to_string(),
        expires_at: now + Duration::days(ttl_days.max(1)),
        created_at: now,
    };
    db.sessions.upsert(session.clone()).await?;
    Ok(session)
}

/// Resolve a session token to an active user.
pub async fn resolve_session(db: &Database, token: &str) -> Result<User, AuthError> {
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    let session = db
        .sessions
        .get(token)
        .await
        .ok_or(AuthError::InvalidSession)?;

    if session.expires_at < Utc::now() {
        db.sessions.delete(token).await?;
        return Err(AuthError::Expired);
    }

    let user = db
        .users
        .get(&session.user_id)
        .await
        .ok_or(AuthError::UserNotFound)?;

    match user.status {
        UserStatus::Blocked => Err(AuthError::Blocked),
        UserStatus::Suspended => Err(AuthError::Suspended),
        UserStatus::Active => Ok(user),
    }
}

pub async fn touch_last_login(db: &Database, user_id: &str) -> StoreResult<()> {
    db.users
        .update(user_id, |u| u.last_login_at = Some(Utc::now()))
        .await?;
    Ok(())
}

pub async fn find_by_email(db: &Database, email: &str) -> Option<User> {
    let email = email.trim().to_lowercase();
    db.users.find_one(|u| u.email == email).await
}

pub fn generate_reset_code() -> String {
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Store a fresh reset code for `email`, replacing any previous one.
pub async fn issue_reset_code(db: &Database, email: &str) -> StoreResult<PasswordReset> {
    let now = Utc::now();
    let reset = PasswordReset {
        email: email.to_string(),
        reset_code: generate_reset_code(),
        created_at: now,
        expires_at: now + Duration::minutes(RESET_CODE_TTL_MINUTES),
        used: false,
    };
    db.password_resets.upsert(reset.clone()).await?;
    Ok(reset)
}

/// Create an email/password account.
pub async fn register(
    db: &Database,
    email: &str,
    password: &str,
    name: &str,
) -> Result<User, AuthError> {
    let email = email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AuthError::InvalidEmail);
    }
    password::validate_password(password)?;
    if name.trim().chars().count() < 2 {
        return Err(AuthError::NameTooShort);
    }
    if find_by_email(db, &email).await.is_some() {
        return Err(AuthError::EmailTaken);
    }

    let mut user = User::new_email(
        &new_id("user"),
        &email,
        name,
        Some(password::hash_password(password)),
    );
    user.last_login_at = Some(Utc::now());
    let user = db
        .users
        .insert_if(user, |mut existing| {
            if existing.any(|u| u.email == email) {
                Err(AuthError::EmailTaken)
            } else {
                Ok(())
            }
        })
        .await?;
    tracing::info!(user_id = %user.user_id, "New email user registered");
    Ok(user)
}

/// Check an email/password pair. Unknown emails and wrong passwords fail
/// the same way.
pub async fn authenticate(db: &Database, email: &str, password: &str) -> Result<User, AuthError> {
    let user = find_by_email(db, email)
        .await
        .ok_or(AuthError::InvalidCredentials)?;
    let Some(stored) = user.password_hash.as_deref() else {
        return Err(AuthError::ExternalAccount);
    };
    if !password::verify_password(password, stored)? {
        return Err(AuthError::InvalidCredentials);
    }
    touch_last_login(db, &user.user_id).await?;
    Ok(user)
}

/// Identity asserted by an external provider.
#[derive(Debug, Clone)]
pub struct ExternalIdentity {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
    pub auth_type: AuthType,
}

/// Load the account of an external identity, creating it on first sign-in.
pub async fn sign_in_external(db: &Database, identity: ExternalIdentity) -> StoreResult<User> {
    if let Some(user) = db.users.get(&identity.user_id).await {
        touch_last_login(db, &user.user_id).await?;
        tracing::info!(user_id = %user.user_id, "Existing external user signed in");
        return Ok(user);
    }

    let mut user = User::new_external(
        &identity.user_id,
        &identity.email,
        &identity.name,
        identity.auth_type,
    );
    user.picture = identity.picture;
    if identity.auth_type == AuthType::Apple {
        user.pseudonym = Some(user.name.clone());
    }
    let user = db.users.insert(user).await?;
    tracing::info!(user_id = %user.user_id, auth_type = ?user.auth_type, "New external user created");
    Ok(user)
}

/// Set a new password with a reset code and burn the code.
pub async fn reset_password(
    db: &Database,
    email: &str,
    code: &str,
    new_password: &str,
) -> Result<(), AuthError> {
    let email = email.trim().to_lowercase();
    let reset = db
        .password_resets
        .get(&email)
        .await
        .filter(|r| {
            !r.used && password::constant_time_eq(r.reset_code.as_bytes(), code.as_bytes())
        })
        .ok_or(AuthError::InvalidResetCode)?;
    if Utc::now() > reset.expires_at {
        return Err(AuthError::ResetCodeExpired);
    }
    password::validate_password(new_password)?;

    let hash = password::hash_password(new_password);
    let user = find_by_email(db, &email).await.ok_or(AuthError::UserNotFound)?;
    db.users
        .update(&user.user_id, |u| u.password_hash = Some(hash))
        .await?;
    db.password_resets.update(&email, |r| r.used = true).await?;
    tracing::info!(user_id = %user.user_id, "Password reset");
    Ok(())
}

/// Record why the user left and anonymize the account.
pub async fn cancel_account(
    db: &Database,
    user: &User,
    reason: &str,
    improvement_suggestion: Option<String>,
) -> StoreResult<AccountCancellation> {
    let record = AccountCancellation {
        cancellation_id: new_id("cancel"),
        user_id: user.user_id.clone(),
        email: user.email.clone(),
        name: user.name.clone(),
        reason: reason.to_string(),
        improvement_suggestion,
        cancelled_at: Utc::now(),
    };
    let record = db.account_cancellations.insert(record).await?;
    db.users
        .update(&user.user_id, |u| anonymize(u, reason))
        .await?;
    db.sessions.delete_where(|s| s.user_id == user.user_id).await?;
    tracing::info!(user_id = %user.user_id, reason, "Account cancelled");
    Ok(record)
}

/// Give the admin role to the account registered under `email`.
pub async fn promote_to_admin(db: &Database, email: &str) -> Result<User, AuthError> {
    let user = find_by_email(db, email).await.ok_or(AuthError::UserNotFound)?;
    db.users
        .update(&user.user_id, |u| u.role = Role::Admin)
        .await?
        .ok_or(AuthError::UserNotFound)
}

#[derive(Debug, Clone, Serialize)]
pub struct TermsStatus {
    pub terms_accepted: bool,
    pub terms_accepted_at: Option<DateTime<Utc>>,
    pub needs_reacceptance: bool,
    pub days_since_acceptance: Option<i64>,
    pub reacceptance_period_days: i64,
}

impl TermsStatus {
    /// Terms must be re-accepted every 30 days. An acceptance without a
    /// timestamp counts as stale.
    pub fn evaluate(user: &User, now: DateTime<Utc>) -> Self {
        let days_since_acceptance = user
            .terms_accepted_at
            .map(|accepted| (now - accepted).num_days());

        let needs_reacceptance = if !user.terms_accepted {
            true
        } else {
            match days_since_acceptance {
                Some(days) => days >= TERMS_REACCEPT_DAYS,
                None => true,
            }
        };

        Self {
            terms_accepted: user.terms_accepted,
            terms_accepted_at: user.terms_accepted_at,
            needs_reacceptance,
            days_since_acceptance,
            reacceptance_period_days: TERMS_REACCEPT_DAYS,
        }
    }
}

/// Partial profile update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub pseudonym: Option<String>,
    pub age: Option<u32>,
    pub sex: Option<String>,
    pub country_of_birth: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub city: Option<String>,
    pub neighborhood: Option<String>,
    pub picture: Option<String>,
    pub notifications_enabled: Option<bool>,
    pub email_notifications: Option<bool>,
    pub terms_accepted: Option<bool>,
    pub terms_accepted_at: Option<DateTime<Utc>>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.pseudonym.is_none()
            && self.age.is_none()
            && self.sex.is_none()
            && self.country_of_birth.is_none()
            && self.country.is_none()
            && self.country_code.is_none()
            && self.city.is_none()
            && self.neighborhood.is_none()
            && self.picture.is_none()
            && self.notifications_enabled.is_none()
            && self.email_notifications.is_none()
            && self.terms_accepted.is_none()
            && self.terms_accepted_at.is_none()
    }

    /// Apply to `user`. Recognized sex spellings are stored in canonical form.
    pub fn apply(self, user: &mut User) {
        fn set<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        let sex = self
            .sex
            .map(|raw| Sex::normalize(&raw).map_or(raw, |s| s.as_str().to_string()));
        set(&mut user.pseudonym, self.pseudonym);
        set(&mut user.age, self.age);
        set(&mut user.sex, sex);
        set(&mut user.country_of_birth, self.country_of_birth);
        set(&mut user.country, self.country);
        set(&mut user.country_code, self.country_code);
        set(&mut user.city, self.city);
        set(&mut user.neighborhood, self.neighborhood);
        set(&mut user.picture, self.picture);
        set(&mut user.terms_accepted_at, self.terms_accepted_at);
        if let Some(v) = self.notifications_enabled {
            user.notifications_enabled = v;
        }
        if let Some(v) = self.email_notifications {
            user.email_notifications = v;
        }
        if let Some(v) = self.terms_accepted {
            user.terms_accepted = v;
        }
    }
}

/// Replace personal data of a cancelled account. Walk history is kept for
/// statistics.
pub fn anonymize(user: &mut User, reason: &str) {
    user.is_cancelled = true;
    user.cancelled_at = Some(Utc::now());
    user.cancellation_reason = Some(reason.to_string());
    user.email = format!("cancelled_{}@deleted.local", user.user_id);
    user.name = "Deleted User".to_string();
    user.pseudonym = Some("Deleted User".to_string());
    user.picture = None;
    user.password_hash = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> User {
        User::new_email("user_alice", "Alice@Example.com ", " Alice Martin ", None)
    }

    #[test]
    fn test_new_user_normalizes_email_and_name() {
        let u = alice();
        assert_eq!(u.email, "alice@example.com");
        assert_eq!(u.name, "Alice Martin");
        assert_eq!(u.display_name(), "Alice Martin");
        assert_eq!(u.first_name(), Some("Alice"));
        assert!(u.notifications_enabled && u.email_notifications);
    }

    #[test]
    fn test_display_name_prefers_pseudonym() {
        let mut u = alice();
        u.pseudonym = Some("WalkerA".to_string());
        assert_eq!(u.display_name(), "WalkerA");
        u.pseudonym = Some("  ".to_string());
        assert_eq!(u.display_name(), "Alice Martin");
    }

    #[test]
    fn test_profile_update_normalizes_sex() {
        let mut u = alice();
        let update = ProfileUpdate {
            sex: Some("female".to_string()),
            city: Some("Lyon".to_string()),
            notifications_enabled: Some(false),
            ..ProfileUpdate::default()
        };
        assert!(!update.is_empty());
        update.apply(&mut u);
        assert_eq!(u.sex.as_deref(), Some("F"));
        assert_eq!(u.city.as_deref(), Some("Lyon"));
        assert!(!u.notifications_enabled);
        assert!(u.email_notifications);
        assert!(ProfileUpdate::default().is_empty());
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("someone@example.org"));
        assert!(is_valid_email("first.last+tag@sub.example.co"));
        assert!(!is_valid_email("no-at-sign.example.org"));
        assert!(!is_valid_email("x@y.z"));
    }

    #[test]
    fn test_admin_by_role_or_config() {
        let mut u = alice();
        let config = Config::default();
        assert!(!is_admin(&u, &config));

        let config = Config {
            admin_emails: vec!["alice@example.com".to_string()],
            ..Config::default()
        };
        assert!(is_admin(&u, &config));

        u.role = Role::Admin;
        assert!(is_admin(&u, &Config::default()));
    }

    #[test]
    fn test_reset_code_is_six_digits() {
        for _ in 0..20 {
            let code = generate_reset_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_terms_status() {
        let now = Utc::now();
        let mut u = alice();
        assert!(TermsStatus::evaluate(&u, now).needs_reacceptance);

        u.terms_accepted = true;
        assert!(TermsStatus::evaluate(&u, now).needs_reacceptance);

        u.terms_accepted_at = Some(now - Duration::days(29));
        let status = TermsStatus::evaluate(&u, now);
        assert!(!status.needs_reacceptance);
        assert_eq!(status.days_since_acceptance, Some(29));

        u.terms_accepted_at = Some(now - Duration::days(30));
        assert!(TermsStatus::evaluate(&u, now).needs_reacceptance);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let db = Database::in_memory();
        let user = alice();
        db.users.insert(user.clone()).await.unwrap();

        let token = new_session_token();
        assert!(token.starts_with("sess_"));
        create_session(&db, &user.user_id, token.clone(), 7)
            .await
            .unwrap();

        let resolved = resolve_session(&db, &token).await.unwrap();
        assert_eq!(resolved.user_id, user.user_id);

        assert!(matches!(
            resolve_session(&db, "sess_unknown").await,
            Err(AuthError::InvalidSession)
        ));
        assert!(matches!(
            resolve_session(&db, "").await,
            Err(AuthError::MissingToken)
        ));
    }

    #[tokio::test]
    async fn test_expired_session_is_removed() {
        let db = Database::in_memory();
        db.users.insert(alice()).await.unwrap();
        db.sessions
            .insert(Session {
                session_token: "old".to_string(),
                user_id: "user_alice".to_string(),
                expires_at: Utc::now() - Duration::minutes(1),
                created_at: Utc::now() - Duration::days(8),
            })
            .await
            .unwrap();

        assert!(matches!(
            resolve_session(&db, "old").await,
            Err(AuthError::Expired)
        ));
        assert!(db.sessions.get("old").await.is_none());
    }

    #[tokio::test]
    async fn test_blocked_and_suspended_users_are_rejected() {
        let db = Database::in_memory();
        let mut u = alice();
        u.status = UserStatus::Suspended;
        db.users.insert(u).await.unwrap();
        create_session(&db, "user_alice", "t".to_string(), 7)
            .await
            .unwrap();
        assert!(matches!(
            resolve_session(&db, "t").await,
            Err(AuthError::Suspended)
        ));

        db.users
            .update("user_alice", |u| u.status = UserStatus::Blocked)
            .await
            .unwrap();
        assert!(matches!(
            resolve_session(&db, "t").await,
            Err(AuthError::Blocked)
        ));
    }

    #[test]
    fn test_anonymize() {
        let mut u = alice();
        u.password_hash = Some("hash".to_string());
        anonymize(&mut u, "moving away");
        assert!(u.is_cancelled);
        assert_eq!(u.email, "cancelled_user_alice@deleted.local");
        assert_eq!(u.display_name(), "Deleted User");
        assert!(u.password_hash.is_none());
        assert_eq!(u.cancellation_reason.as_deref(), Some("moving away"));
    }

    #[tokio::test]
    async fn test_register_and_authenticate() {
        let db = Database::in_memory();
        let user = register(&db, " Bob@Example.com", "secret1", "Bob")
            .await
            .unwrap();
        assert!(user.user_id.starts_with("user_"));
        assert_eq!(user.email, "bob@example.com");

        assert!(matches!(
            register(&db, "bob@example.com", "secret1", "Bobby").await,
            Err(AuthError::EmailTaken)
        ));
        assert!(matches!(
            register(&db, "not-an-email", "secret1", "Bob").await,
            Err(AuthError::InvalidEmail)
        ));
        assert!(matches!(
            register(&db, "carl@example.com", "short", "Carl").await,
            Err(AuthError::Password(PasswordError::TooShort))
        ));
        assert!(matches!(
            register(&db, "carl@example.com", "secret1", " C ").await,
            Err(AuthError::NameTooShort)
        ));

        let signed_in = authenticate(&db, "BOB@example.com", "secret1").await.unwrap();
        assert_eq!(signed_in.user_id, user.user_id);
        assert!(matches!(
            authenticate(&db, "bob@example.com", "wrong-one").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            authenticate(&db, "nobody@example.com", "secret1").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations_keep_email_unique() {
        let temp = tempfile::tempdir().unwrap();
        let db = std::sync::Arc::new(Database::open(temp.path()).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..8 {
            let db = std::sync::Arc::clone(&db);
            handles.push(tokio::spawn(async move {
                register(&db, "dup@example.com", "secret1", &format!("Dup {}", i)).await
            }));
        }
        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert!(matches!(e, AuthError::EmailTaken)),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(db.users.count(|u| u.email == "dup@example.com").await, 1);
    }

    #[tokio::test]
    async fn test_external_account_cannot_use_password() {
        let db = Database::in_memory();
        let identity = ExternalIdentity {
            user_id: "apple_001".to_string(),
            email: "dee@privaterelay.appleid.com".to_string(),
            name: "Dee".to_string(),
            picture: None,
            auth_type: AuthType::Apple,
        };
        let created = sign_in_external(&db, identity.clone()).await.unwrap();
        assert_eq!(created.pseudonym.as_deref(), Some("Dee"));
        let again = sign_in_external(&db, identity).await.unwrap();
        assert_eq!(again.user_id, "apple_001");
        assert_eq!(db.users.len().await, 1);

        assert!(matches!(
            authenticate(&db, "dee@privaterelay.appleid.com", "whatever").await,
            Err(AuthError::ExternalAccount)
        ));
    }

    #[tokio::test]
    async fn test_reset_password_burns_the_code() {
        let db = Database::in_memory();
        register(&db, "eve@example.com", "secret1", "Eve").await.unwrap();
        let reset = issue_reset_code(&db, "eve@example.com").await.unwrap();

        assert!(matches!(
            reset_password(&db, "eve@example.com", "000000x", "newpass").await,
            Err(AuthError::InvalidResetCode)
        ));
        let wrong: String = reset
            .reset_code
            .chars()
            .map(|c| if c == '9' { '0' } else { '9' })
            .collect();
        assert!(matches!(
            reset_password(&db, "eve@example.com", &wrong, "newpass").await,
            Err(AuthError::InvalidResetCode)
        ));
        reset_password(&db, "eve@example.com", &reset.reset_code, "newpass")
            .await
            .unwrap();
        authenticate(&db, "eve@example.com", "newpass").await.unwrap();

        assert!(matches!(
            reset_password(&db, "eve@example.com", &reset.reset_code, "another").await,
            Err(AuthError::InvalidResetCode)
        ));
    }

    #[tokio::test]
    async fn test_cancel_account_anonymizes_and_signs_out() {
        let db = Database::in_memory();
        let user = alice();
        db.users.insert(user.clone()).await.unwrap();
        create_session(&db, &user.user_id, new_session_token(), 7)
            .await
            .unwrap();

        cancel_account(&db, &user, "Moving away", None).await.unwrap();

        let stored = db.users.get(&user.user_id).await.unwrap();
        assert!(stored.is_cancelled);
        assert_eq!(stored.name, "Deleted User");
        assert_eq!(stored.email, "cancelled_user_alice@deleted.local");
        assert_eq!(db.account_cancellations.len().await, 1);
        assert_eq!(db.sessions.len().await, 0);
    }
}
