//! Account lifecycle, terms, badges, devices and walk tracking sync.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{bad_request, ApiError};
use super::routes::AppState;
use super::types::MessageResponse;
use crate::accounts::{self, TermsStatus, User};
use crate::badges::{self, BadgeInfo};
use crate::notify::{self, EXPO_TOKEN_PREFIX};
use crate::stats::{self, WalkStatsSync};
use crate::walks;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/account/cancel", post(cancel_account))
        .route("/terms/accept", post(accept_terms))
        .route("/terms/status", get(terms_status))
        .route("/badge/info", get(badge_info))
        .route("/badge/celebrate", post(celebrate_badge))
        .route("/badge/user/:id", get(user_badge))
        .route("/push/register", post(register_push_token))
        .route("/push/unregister", delete(unregister_push_token))
        .route("/walk-stats/sync", post(sync_walk_stats))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CancelAccountRequest {
    pub reason: String,
    #[serde(default)]
    pub improvement_suggestion: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelAccountResponse {
    pub message: &'static str,
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct TermsAccepted {
    pub success: bool,
    pub terms_accepted: bool,
    pub terms_accepted_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CelebrateResponse {
    pub message: &'static str,
    pub badge_level: u32,
}

#[derive(Debug, Serialize)]
pub struct UserBadge {
    pub user_id: String,
    pub total_walks: usize,
    pub badge_level: u32,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPushRequest {
    #[serde(default)]
    pub push_token: String,
    #[serde(default = "default_platform")]
    pub platform: String,
}

fn default_platform() -> String {
    "ios".to_string()
}

#[derive(Debug, Deserialize)]
pub struct UnregisterPushQuery {
    pub push_token: String,
}

#[derive(Debug, Serialize)]
pub struct PushTokenResponse {
    pub status: &'static str,
    pub message: &'static str,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/account/cancel - Close the account, keeping anonymous history.
async fn cancel_account(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<CancelAccountRequest>,
) -> Result<Json<CancelAccountResponse>, ApiError> {
    if req.reason.trim().is_empty() {
        return Err(bad_request("A cancellation reason is required"));
    }
    accounts::cancel_account(
        &state.db,
        &user,
        req.reason.trim(),
        req.improvement_suggestion.clone(),
    )
    .await?;

    let report = state
        .notifier
        .push_admins(
            &state.config,
            "Account Cancelled",
            &format!(
                "User {} cancelled their account. Reason: {}",
                user.name,
                req.reason.trim()
            ),
        )
        .await;
    tracing::info!(
        user_id = %user.user_id,
        suggestion = req.improvement_suggestion.as_deref().unwrap_or("None provided"),
        admins_pushed = report.sent,
        "Account cancellation recorded"
    );

    Ok(Json(CancelAccountResponse {
        message: "Account cancelled successfully",
        user_id: user.user_id,
    }))
}

/// POST /api/terms/accept
async fn accept_terms(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<TermsAccepted>, ApiError> {
    let now = Utc::now();
    state
        .db
        .users
        .update(&user.user_id, |u| {
            u.terms_accepted = true;
            u.terms_accepted_at = Some(now);
        })
        .await?;
    Ok(Json(TermsAccepted {
        success: true,
        terms_accepted: true,
        terms_accepted_at: now,
    }))
}

/// GET /api/terms/status - Whether the terms must be accepted again.
async fn terms_status(Extension(user): Extension<User>) -> Json<TermsStatus> {
    Json(TermsStatus::evaluate(&user, Utc::now()))
}

/// GET /api/badge/info - The user's badge progress.
async fn badge_info(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Json<BadgeInfo> {
    let progress = badges::progress(&state.db, &user.user_id, &walks::today()).await;
    Json(BadgeInfo::new(progress, user.last_celebrated_badge))
}

/// POST /api/badge/celebrate - Stop celebrating the current level.
async fn celebrate_badge(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<CelebrateResponse>, ApiError> {
    let badge_level = badges::celebrate(&state.db, &user.user_id, &walks::today()).await?;
    Ok(Json(CelebrateResponse {
        message: "Badge celebration marked",
        badge_level,
    }))
}

/// GET /api/badge/user/:id - Badge of any user.
async fn user_badge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<UserBadge> {
    let progress = badges::progress(&state.db, &id, &walks::today()).await;
    Json(UserBadge {
        user_id: id,
        total_walks: progress.total_walks,
        badge_level: progress.badge_level,
    })
}

/// POST /api/push/register - Register this device for push notifications.
async fn register_push_token(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<RegisterPushRequest>,
) -> Result<Json<PushTokenResponse>, ApiError> {
    if req.push_token.is_empty() {
        return Err(bad_request("Push token required"));
    }
    if !req.push_token.starts_with(EXPO_TOKEN_PREFIX) {
        return Err(bad_request("Invalid Expo push token format"));
    }
    notify::register_token(&state.db, &user.user_id, &req.push_token, &req.platform).await?;
    Ok(Json(PushTokenResponse {
        status: "success",
        message: "Push token registered",
    }))
}

/// DELETE /api/push/unregister?push_token= - Stop pushing to this device.
async fn unregister_push_token(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(query): Query<UnregisterPushQuery>,
) -> Result<Json<PushTokenResponse>, ApiError> {
    notify::unregister_token(&state.db, &user.user_id, &query.push_token).await?;
    Ok(Json(PushTokenResponse {
        status: "success",
        message: "Push token unregistered",
    }))
}

/// POST /api/walk-stats/sync - Store aggregate tracking totals of a walk.
async fn sync_walk_stats(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<WalkStatsSync>,
) -> Result<Json<MessageResponse>, ApiError> {
    stats::record_walk_stats(&state.db, &user.user_id, user.country.as_deref(), req).await?;
    Ok(Json(MessageResponse::new("Stats synced successfully")))
}

#[cfg(test)]
mod tests {
    use super::super::routes::test_support::TestApp;
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_cancel_account_notifies_admins() {
        let app = TestApp::new();
        let token = app.login_as("wes", "Lyon").await;
        app.login_admin("boss").await;
        notify::register_token(app.db(), "boss", "ExponentPushToken[boss]", "ios")
            .await
            .unwrap();

        let (status, body) = app
            .post(
                "/api/account/cancel",
                &token,
                json!({ "reason": "Not enough walks nearby" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_id"], "wes");

        let stored = app.db().users.get("wes").await.unwrap();
        assert!(stored.is_cancelled);
        assert_eq!(
            app.gateway.sent_to().await,
            vec!["ExponentPushToken[boss]".to_string()]
        );

        let (status, _) = app.get("/api/auth/me", &token).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_terms_acceptance() {
        let app = TestApp::new();
        let token = app.login_as("wes", "Lyon").await;

        let (_, status_body) = app.get("/api/terms/status", &token).await;
        assert_eq!(status_body["needs_reacceptance"], true);

        let (status, _) = app.post("/api/terms/accept", &token, json!({})).await;
        assert_eq!(status, StatusCode::OK);

        let (_, status_body) = app.get("/api/terms/status", &token).await;
        assert_eq!(status_body["needs_reacceptance"], false);
        assert_eq!(status_body["days_since_acceptance"], 0);
    }

    #[tokio::test]
    async fn test_push_registration() {
        let app = TestApp::new();
        let token = app.login_as("wes", "Lyon").await;

        let (status, body) = app
            .post("/api/push/register", &token, json!({ "push_token": "fcm:abc" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Invalid Expo push token format");

        let (status, _) = app
            .post(
                "/api/push/register",
                &token,
                json!({ "push_token": "ExponentPushToken[wes]", "platform": "android" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            notify::active_tokens(app.db(), &["wes".to_string()]).await,
            vec!["ExponentPushToken[wes]".to_string()]
        );

        let (status, _) = app
            .delete("/api/push/unregister?push_token=ExponentPushToken%5Bwes%5D", &token)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(notify::active_tokens(app.db(), &["wes".to_string()])
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_badge_endpoints_start_at_zero() {
        let app = TestApp::new();
        let token = app.login_as("wes", "Lyon").await;

        let (_, info) = app.get("/api/badge/info", &token).await;
        assert_eq!(info["total_walks"], 0);
        assert_eq!(info["should_celebrate"], false);

        let (_, other) = app.get("/api/badge/user/someone", &token).await;
        assert_eq!(other["user_id"], "someone");
        assert_eq!(other["badge_level"], 0);

        let (_, celebrated) = app.post("/api/badge/celebrate", &token, json!({})).await;
        assert_eq!(celebrated["badge_level"], 0);
    }

    #[tokio::test]
    async fn test_walk_stats_sync_uses_profile_country() {
        let app = TestApp::new();
        let token = app.login_as("wes", "Lyon").await;
        app.db()
            .users
            .update("wes", |u| u.country = Some("France".to_string()))
            .await
            .unwrap();
        let token_user = app.db().users.get("wes").await.unwrap();
        assert_eq!(token_user.country.as_deref(), Some("France"));

        let (status, _) = app
            .post(
                "/api/walk-stats/sync",
                &token,
                json!({ "distance": 2400.0, "steps": 3100, "calories": 120, "duration": 1800.0 }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let stats = app.db().walk_tracking_stats.all().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].country, "France");
    }
}
