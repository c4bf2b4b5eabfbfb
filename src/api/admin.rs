//! Admin dashboard endpoints.
//!
//! Everything here except `/admin/check` requires an admin caller.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::errors::{bad_request, internal, ApiError};
use super::routes::AppState;
use super::types::MessageResponse;
use crate::accounts::{User, UserStatus, UserView};
use crate::admin::{self, Page, Paged, UserDetails, UserSearch, UserSummary};
use crate::community::{AdminMessage, ContentReport, Feedback, ModerationEntry};
use crate::jobs::RetentionRun;
use crate::stats::{self, AppStatistics, DateRange, RetentionStats, TrackingReport};
use crate::walks;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/check", get(check_admin))
        .route("/admin/statistics", get(statistics))
        .route("/admin/messages", get(list_messages))
        .route("/admin/messages/:id/read", put(mark_message_read))
        .route("/admin/reports", get(list_reports))
        .route("/admin/reports/:id/status", put(set_report_status))
        .route("/admin/feedback/all", get(all_feedback))
        .route("/admin/feedback/:id", delete(delete_feedback))
        .route("/admin/users", get(list_users))
        .route("/admin/users/search", get(search_users))
        .route("/admin/users/:id/details", get(user_details))
        .route("/admin/users/:id/status", put(set_user_status))
        .route("/admin/experiences/:id/visibility", put(set_experience_visibility))
        .route("/admin/experiences/:id", delete(delete_experience))
        .route("/admin/moderation-log", get(moderation_log))
        .route("/admin/cleanup-old-data", delete(cleanup_old_data))
        .route("/admin/test-retention-notifications", post(run_retention))
        .route("/admin/retention-stats", get(retention_stats))
        .route("/admin/walk-tracking-stats", get(walk_tracking_stats))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct AdminCheckResponse {
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserStatusUpdate {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VisibilityUpdate {
    pub is_visible: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonQuery {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default = "LogQuery::default_limit")]
    pub limit: usize,
}

impl LogQuery {
    fn default_limit() -> usize {
        100
    }
}

#[derive(Debug, Serialize)]
pub struct ReportStatusResponse {
    pub message: String,
    pub report_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct UserStatusResponse {
    pub message: String,
    pub user_id: String,
    pub new_status: UserStatus,
}

#[derive(Debug, Serialize)]
pub struct VisibilityResponse {
    pub message: String,
    pub experience_id: String,
    pub is_visible: bool,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub message: String,
    pub orphaned_bookings_removed: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/admin/check - Whether the caller is an admin.
async fn check_admin(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Json<AdminCheckResponse> {
    Json(AdminCheckResponse {
        is_admin: state.is_admin(&user),
    })
}

/// GET /api/admin/statistics?start_date&end_date - Dashboard breakdowns.
async fn statistics(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(range): Query<DateRange>,
) -> Result<Json<AppStatistics>, ApiError> {
    state.require_admin(&user)?;
    Ok(Json(
        stats::app_statistics(&state.db, &range, &walks::today()).await,
    ))
}

/// GET /api/admin/messages - Messages users sent to the team.
async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(page): Query<Page>,
) -> Result<Json<Paged<AdminMessage>>, ApiError> {
    state.require_admin(&user)?;
    Ok(Json(admin::messages(&state.db, page).await))
}

/// PUT /api/admin/messages/:id/read
async fn mark_message_read(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.require_admin(&user)?;
    admin::mark_message_read(&state.db, &id).await?;
    Ok(Json(MessageResponse::new("Message marked as read")))
}

/// GET /api/admin/reports - Content reports, newest first.
async fn list_reports(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(page): Query<Page>,
) -> Result<Json<Paged<ContentReport>>, ApiError> {
    state.require_admin(&user)?;
    Ok(Json(admin::reports(&state.db, page).await))
}

/// PUT /api/admin/reports/:id/status?status=
async fn set_report_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<ReportStatusResponse>, ApiError> {
    state.require_admin(&user)?;
    let status = admin::set_report_status(&state.db, &user, &id, &query.status).await?;
    Ok(Json(ReportStatusResponse {
        message: format!("Report status updated to {}", status.as_str()),
        report_id: id,
        status: status.as_str().to_string(),
    }))
}

/// GET /api/admin/feedback/all
async fn all_feedback(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(page): Query<Page>,
) -> Result<Json<Paged<Feedback>>, ApiError> {
    state.require_admin(&user)?;
    Ok(Json(admin::all_feedback(&state.db, page).await))
}

/// DELETE /api/admin/feedback/:id
async fn delete_feedback(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.require_admin(&user)?;
    admin::delete_feedback(&state.db, &user, &id).await?;
    Ok(Json(MessageResponse::new("Feedback deleted successfully")))
}

/// GET /api/admin/users?status= - Users, optionally by moderation status.
async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Vec<UserView>>, ApiError> {
    state.require_admin(&user)?;
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(UserStatus::parse(raw).ok_or_else(|| {
            bad_request("Invalid status. Must be: active, suspended, or blocked")
        })?),
        None => None,
    };
    Ok(Json(admin::list_users(&state.db, status).await))
}

/// GET /api/admin/users/search?q&city&neighborhood&skip&limit
async fn search_users(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(search): Query<UserSearch>,
) -> Result<Json<Paged<UserSummary>>, ApiError> {
    state.require_admin(&user)?;
    Ok(Json(admin::search_users(&state.db, &search).await))
}

/// GET /api/admin/users/:id/details - Everything about one user.
async fn user_details(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<Json<UserDetails>, ApiError> {
    state.require_admin(&user)?;
    Ok(Json(admin::user_details(&state.db, &id).await?))
}

/// PUT /api/admin/users/:id/status - Suspend, block or reactivate a user.
async fn set_user_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    Json(req): Json<UserStatusUpdate>,
) -> Result<Json<UserStatusResponse>, ApiError> {
    state.require_admin(&user)?;
    let new_status =
        admin::set_user_status(&state.db, &user, &id, &req.status, req.reason).await?;
    Ok(Json(UserStatusResponse {
        message: format!("User status updated to {}", new_status.as_str()),
        user_id: id,
        new_status,
    }))
}

/// PUT /api/admin/experiences/:id/visibility - Hide or show an experience.
async fn set_experience_visibility(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    Json(req): Json<VisibilityUpdate>,
) -> Result<Json<VisibilityResponse>, ApiError> {
    state.require_admin(&user)?;
    admin::set_experience_visibility(&state.db, &user, &id, req.is_visible, req.reason).await?;
    let action = if req.is_visible { "shown" } else { "hidden" };
    Ok(Json(VisibilityResponse {
        message: format!("Experience {}", action),
        experience_id: id,
        is_visible: req.is_visible,
    }))
}

/// DELETE /api/admin/experiences/:id?reason=
async fn delete_experience(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    Query(query): Query<ReasonQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.require_admin(&user)?;
    admin::delete_experience(&state.db, &user, &id, query.reason).await?;
    Ok(Json(MessageResponse::new("Experience deleted successfully")))
}

/// GET /api/admin/moderation-log?limit
async fn moderation_log(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<ModerationEntry>>, ApiError> {
    state.require_admin(&user)?;
    Ok(Json(admin::moderation_log(&state.db, query.limit).await))
}

/// DELETE /api/admin/cleanup-old-data - Remove bookings of deleted walks.
async fn cleanup_old_data(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<CleanupResponse>, ApiError> {
    state.require_admin(&user)?;
    let removed = admin::cleanup_orphaned_bookings(&state.db).await?;
    Ok(Json(CleanupResponse {
        message: "Cleanup completed".to_string(),
        orphaned_bookings_removed: removed,
    }))
}

/// POST /api/admin/test-retention-notifications - Run the retention pass now.
async fn run_retention(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<RetentionRun>, ApiError> {
    state.require_admin(&user)?;
    tracing::info!(admin = %user.email, "Retention pass triggered manually");
    state
        .jobs()
        .run_retention()
        .await
        .map(Json)
        .ok_or_else(|| internal("retention pass failed"))
}

/// GET /api/admin/retention-stats
async fn retention_stats(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<RetentionStats>, ApiError> {
    state.require_admin(&user)?;
    Ok(Json(stats::retention_stats(&state.db, Utc::now()).await))
}

/// GET /api/admin/walk-tracking-stats - Synced tracking totals by country.
async fn walk_tracking_stats(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<TrackingReport>, ApiError> {
    state.require_admin(&user)?;
    let synced = state.db.walk_tracking_stats.all().await;
    Ok(Json(stats::aggregate_tracking(&synced)))
}

#[cfg(test)]
mod tests {
    use super::super::routes::test_support::TestApp;
    use super::*;
    use axum::http::StatusCode;
    use chrono::Duration;
    use serde_json::json;

    use crate::community::{self, NewExperience};
    use crate::notify::register_token;
    use crate::walks::test_support::walk_in;

    #[tokio::test]
    async fn test_admin_by_configured_email() {
        let app = TestApp::new();
        let token = app.login_as("chief", "Lyon").await;
        app.db()
            .users
            .update("chief", |u| u.email = "boss@walkwithus.app".to_string())
            .await
            .unwrap();
        let (_, body) = app.get("/api/admin/check", &token).await;
        assert_eq!(body["is_admin"], true);
        let (status, _) = app.get("/api/admin/retention-stats", &token).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_user_moderation() {
        let app = TestApp::new();
        let admin = app.login_admin("boss").await;
        let walker = app.login_as("wes", "Lyon").await;

        let (status, _) = app
            .put("/api/admin/users/boss/status", &admin, json!({ "status": "blocked" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .put("/api/admin/users/wes/status", &admin, json!({ "status": "frozen" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app
            .put(
                "/api/admin/users/wes/status",
                &admin,
                json!({ "status": "suspended", "reason": "Spam" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["new_status"], "suspended");

        let (status, _) = app.get("/api/auth/me", &walker).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, suspended) = app.get("/api/admin/users?status=suspended", &admin).await;
        assert_eq!(suspended[0]["user_id"], "wes");
        let (status, _) = app.get("/api/admin/users?status=nope", &admin).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, log) = app.get("/api/admin/moderation-log", &admin).await;
        assert_eq!(log[0]["action"], "user_status_change");
    }

    #[tokio::test]
    async fn test_experience_moderation() {
        let app = TestApp::new();
        let admin = app.login_admin("boss").await;
        app.login_as("wes", "Lyon").await;
        let author = app.db().users.get("wes").await.unwrap();
        let exp = community::share_experience(
            app.db(),
            &author,
            NewExperience {
                text: "Foggy morning by the river".to_string(),
                ..NewExperience::default()
            },
        )
        .await
        .unwrap();

        let uri = format!("/api/admin/experiences/{}/visibility", exp.experience_id);
        let (status, body) = app
            .put(&uri, &admin, json!({ "is_visible": false, "reason": "Off-topic" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Experience hidden");

        let uri = format!("/api/admin/experiences/{}?reason=Spam", exp.experience_id);
        let (status, _) = app.delete(&uri, &admin).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.delete(&uri, &admin).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(app.db().moderation_log.len().await, 2);
    }

    #[tokio::test]
    async fn test_search_and_details() {
        let app = TestApp::new();
        let admin = app.login_admin("boss").await;
        app.login_as("wes", "Lyon").await;
        app.login_as("pat", "Paris").await;

        let (status, body) = app.get("/api/admin/users/search?city=par", &admin).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"][0]["user_id"], "pat");
        assert_eq!(body["items"][0]["walks_organized"], 0);

        let (status, body) = app.get("/api/admin/users/wes/details", &admin).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["user_id"], "wes");
        let (status, _) = app.get("/api/admin/users/ghost/details", &admin).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_statistics_and_cleanup() {
        let app = TestApp::new();
        let admin = app.login_admin("boss").await;
        let walker = app.login_as("wes", "Lyon").await;
        let walk = app.db().walks.insert(walk_in("Lyon", "boss")).await.unwrap();
        let (status, _) = app
            .post("/api/bookings", &walker, json!({ "walk_id": walk.walk_id }))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app.get("/api/admin/statistics", &admin).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["total_walks"], 1);
        assert_eq!(body["summary"]["total_bookings"], 1);
        assert_eq!(body["walks_by_city"]["Lyon"], 1);

        app.db().walks.delete(&walk.walk_id).await.unwrap();
        let (_, body) = app.delete("/api/admin/cleanup-old-data", &admin).await;
        assert_eq!(body["orphaned_bookings_removed"], 1);
    }

    #[tokio::test]
    async fn test_manual_retention_run() {
        let app = TestApp::new();
        let admin = app.login_admin("boss").await;
        app.login_as("sleepy", "Lyon").await;
        app.db()
            .users
            .update("sleepy", |u| {
                u.last_login_at = Some(Utc::now() - Duration::days(10));
                u.created_at = Utc::now() - Duration::days(30);
            })
            .await
            .unwrap();
        register_token(app.db(), "sleepy", "ExponentPushToken[sleepy]", "ios")
            .await
            .unwrap();

        let (status, body) = app
            .post("/api/admin/test-retention-notifications", &admin, json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["notifications_sent"], 1);
        assert_eq!(
            app.gateway.sent_to().await,
            vec!["ExponentPushToken[sleepy]".to_string()]
        );

        let (_, stats) = app.get("/api/admin/retention-stats", &admin).await;
        assert_eq!(stats["total_retention_notifications_sent"], 1);
    }

    #[tokio::test]
    async fn test_walk_tracking_report() {
        let app = TestApp::new();
        let admin = app.login_admin("boss").await;
        let walker = app.login_as("wes", "Lyon").await;
        app.post(
            "/api/walk-stats/sync",
            &walker,
            json!({ "distance": 5000.0, "steps": 6500, "calories": 250, "duration": 3600.0, "country": "France" }),
        )
        .await;

        let (status, body) = app.get("/api/admin/walk-tracking-stats", &admin).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["global_totals"]["total_walks"], 1);
        assert_eq!(body["by_country"][0]["country"], "France");
        assert_eq!(body["by_country"][0]["total_distance_km"], 5.0);
    }
}
