//! Walk and booking endpoints.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::errors::ApiError;
use super::routes::AppState;
use super::types::MessageResponse;
use crate::accounts::User;
use crate::notify::NotifySummary;
use crate::walks::{
    self, BookingView, BrowseOptions, NewWalk, ParticipantInfo, Walk, WalkError, WalkUpdate,
    WalkView,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/walks", get(browse_walks).post(create_walk))
        .route("/walks/my-organized", get(my_organized))
        .route("/walks/feedback-eligible", get(feedback_eligible))
        .route("/walks/reviewable", get(reviewable))
        .route(
            "/walks/:id",
            get(get_walk).put(update_walk).delete(delete_walk),
        )
        .route("/walks/:id/send-reminder", post(send_reminder))
        .route("/walks/:id/participants", get(participants))
        .route("/bookings", get(my_bookings).post(book_walk))
        .route("/bookings/:id", axum::routing::delete(cancel_booking))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BookingRequest {
    pub walk_id: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteWalkResponse {
    pub message: String,
    pub bookings_removed: usize,
}

#[derive(Debug, Serialize)]
pub struct ReminderResponse {
    pub message: String,
    #[serde(flatten)]
    pub summary: NotifySummary,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/walks - Create a walk and alert matching walkers.
async fn create_walk(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<NewWalk>,
) -> Result<Json<Walk>, ApiError> {
    let walk = walks::create_walk(&state.db, req, &user).await?;
    let summary = state.notifier.notify_new_walk(&walk).await;
    tracing::info!(
        walk_id = %walk.walk_id,
        recipients = summary.recipients,
        pushed = summary.push.sent,
        emails = summary.emails_sent,
        "New walk announced"
    );
    Ok(Json(walk))
}

/// GET /api/walks - Upcoming walks the user can join.
async fn browse_walks(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(options): Query<BrowseOptions>,
) -> Json<Vec<WalkView>> {
    let is_admin = state.is_admin(&user);
    Json(walks::browse(&state.db, &user, is_admin, options, Utc::now()).await)
}

/// GET /api/walks/my-organized - Walks the user organizes.
async fn my_organized(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Json<Vec<WalkView>> {
    Json(walks::organized_by(&state.db, &user.user_id).await)
}

/// GET /api/walks/feedback-eligible - Walks the user may send feedback on.
async fn feedback_eligible(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Json<Vec<Walk>> {
    Json(walks::feedback_eligible(&state.db, &user).await)
}

/// GET /api/walks/reviewable - Past walks the user booked and has not reviewed.
async fn reviewable(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Json<Vec<Walk>> {
    Json(walks::reviewable(&state.db, &user.user_id).await)
}

/// GET /api/walks/:id - Walk details.
async fn get_walk(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WalkView>, ApiError> {
    Ok(Json(walks::get_walk(&state.db, &id).await?))
}

/// PUT /api/walks/:id - Update a walk (organizer or admin).
async fn update_walk(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    Json(req): Json<WalkUpdate>,
) -> Result<Json<Walk>, ApiError> {
    let is_admin = state.is_admin(&user);
    let walk = walks::update_walk(&state.db, &id, req, &user, is_admin).await?;
    tracing::info!(walk_id = %id, by = %user.user_id, "Walk updated");
    Ok(Json(walk))
}

/// DELETE /api/walks/:id - Delete a walk and its bookings (organizer or admin).
async fn delete_walk(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<Json<DeleteWalkResponse>, ApiError> {
    let is_admin = state.is_admin(&user);
    let bookings_removed = walks::delete_walk(&state.db, &id, &user, is_admin).await?;
    Ok(Json(DeleteWalkResponse {
        message: "Walk deleted successfully".to_string(),
        bookings_removed,
    }))
}

/// POST /api/walks/:id/send-reminder - Remind participants now (admin).
async fn send_reminder(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<Json<ReminderResponse>, ApiError> {
    state.require_admin(&user)?;
    let walk = state.db.walks.get(&id).await.ok_or(WalkError::NotFound)?;
    let summary = state.notifier.send_walk_reminder(&walk).await;
    Ok(Json(ReminderResponse {
        message: "Reminders sent successfully".to_string(),
        summary,
    }))
}

/// GET /api/walks/:id/participants - Active participants with badges.
async fn participants(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ParticipantInfo>>, ApiError> {
    Ok(Json(walks::participants(&state.db, &id).await?))
}

/// POST /api/bookings - Book a walk.
async fn book_walk(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<BookingRequest>,
) -> Result<Json<walks::Booking>, ApiError> {
    Ok(Json(walks::book(&state.db, &req.walk_id, &user).await?))
}

/// GET /api/bookings - The user's active bookings.
async fn my_bookings(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Json<Vec<BookingView>> {
    Json(walks::bookings_of(&state.db, &user.user_id).await)
}

/// DELETE /api/bookings/:id - Cancel one of the user's bookings.
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    walks::cancel_booking(&state.db, &id, &user.user_id).await?;
    tracing::info!(booking_id = %id, user_id = %user.user_id, "Booking cancelled");
    Ok(Json(MessageResponse::new("Booking cancelled successfully")))
}

#[cfg(test)]
mod tests {
    use super::super::routes::test_support::TestApp;
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::notify::register_token;

    fn tomorrow() -> String {
        walks::date_string(Utc::now() + chrono::Duration::days(1))
    }

    fn walk_body(city: &str) -> serde_json::Value {
        json!({
            "title": "Riverside loop",
            "date": tomorrow(),
            "time": "09:30",
            "city": city,
            "neighborhood": "Croix-Rousse",
            "starting_point": "Place Bellevue",
        })
    }

    #[tokio::test]
    async fn test_create_walk_notifies_neighbors() {
        let app = TestApp::new();
        let organizer = app.login_as("olga", "Lyon").await;
        app.login_as("neighbor", "Lyon").await;
        app.login_as("faraway", "Paris").await;
        for id in ["neighbor", "faraway", "olga"] {
            register_token(app.db(), id, &format!("ExponentPushToken[{}]", id), "ios")
                .await
                .unwrap();
        }

        let (status, body) = app.post("/api/walks", &organizer, walk_body("Lyon")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["walk_id"].as_str().unwrap().starts_with("walk_"));
        assert_eq!(body["ending_point"], "Place Bellevue");

        assert_eq!(
            app.gateway.sent_to().await,
            vec!["ExponentPushToken[neighbor]".to_string()]
        );
    }

    #[tokio::test]
    async fn test_booking_flow() {
        let app = TestApp::new();
        let organizer = app.login_as("olga", "Lyon").await;
        let walker = app.login_as("wes", "Lyon").await;

        let (_, walk) = app.post("/api/walks", &organizer, walk_body("Lyon")).await;
        let walk_id = walk["walk_id"].as_str().unwrap().to_string();

        let (_, listed) = app.get("/api/walks", &walker).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, booking) = app
            .post("/api/bookings", &walker, json!({ "walk_id": walk_id }))
            .await;
        assert_eq!(status, StatusCode::OK);
        let booking_id = booking["booking_id"].as_str().unwrap().to_string();

        let (status, body) = app
            .post("/api/bookings", &walker, json!({ "walk_id": walk_id }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Already booked this walk");

        let (_, listed) = app.get("/api/walks", &walker).await;
        assert!(listed.as_array().unwrap().is_empty());

        let (_, mine) = app.get("/api/bookings", &walker).await;
        assert_eq!(mine[0]["walk_title"], "Riverside loop");

        let (_, people) = app
            .get(&format!("/api/walks/{}/participants", walk_id), &organizer)
            .await;
        assert_eq!(people[0]["user_id"], "wes");

        let (status, _) = app
            .delete(&format!("/api/bookings/{}", booking_id), &organizer)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app
            .delete(&format!("/api/bookings/{}", booking_id), &walker)
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_only_organizer_or_admin_edits() {
        let app = TestApp::new();
        let organizer = app.login_as("olga", "Lyon").await;
        let other = app.login_as("mallory", "Lyon").await;
        let admin = app.login_admin("boss").await;

        let (_, walk) = app.post("/api/walks", &organizer, walk_body("Lyon")).await;
        let uri = format!("/api/walks/{}", walk["walk_id"].as_str().unwrap());

        let (status, _) = app.put(&uri, &other, json!({ "title": "Mine now" })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.put(&uri, &organizer, json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = app.put(&uri, &admin, json!({ "title": "Renamed" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Renamed");

        let (status, _) = app.delete(&uri, &other).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = app.delete(&uri, &organizer).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bookings_removed"], 0);
        let (status, _) = app.get(&uri, &organizer).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_manual_reminder_is_admin_only() {
        let app = TestApp::new();
        let organizer = app.login_as("olga", "Lyon").await;
        let admin = app.login_admin("boss").await;
        let (_, walk) = app.post("/api/walks", &organizer, walk_body("Lyon")).await;
        let uri = format!("/api/walks/{}/send-reminder", walk["walk_id"].as_str().unwrap());

        let (status, _) = app.post(&uri, &organizer, json!({})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = app.post(&uri, &admin, json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recipients"], 0);
    }
}
