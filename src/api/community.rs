//! Feedback, reviews, experiences and messages to the team.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::errors::ApiError;
use super::routes::AppState;
use crate::accounts::User;
use crate::community::{
    self, Feedback, FeedbackReply, NewExperience, NewReport, NewReview, WalkReview,
    WalkerExperience,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/feedback", post(send_feedback))
        .route("/feedback/sent", get(feedback_sent))
        .route("/feedback/received", get(feedback_received))
        .route("/feedback/:id/reply", post(reply_to_feedback))
        .route("/reviews", post(create_review))
        .route("/reviews/my", get(my_reviews))
        .route("/reviews/walk/:id", get(walk_reviews))
        .route("/experiences", get(experience_feed).post(share_experience))
        .route("/experiences/my", get(my_experiences))
        .route("/admin/message", post(message_admins))
        .route("/report/content", post(report_content))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub walk_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct AdminMessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SubmittedResponse {
    pub message: &'static str,
    pub id: String,
    pub admins_notified: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/feedback - Send feedback to a walk's organizer.
async fn send_feedback(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<Feedback>, ApiError> {
    Ok(Json(
        community::send_feedback(&state.db, &user, &req.walk_id, &req.message).await?,
    ))
}

/// GET /api/feedback/sent
async fn feedback_sent(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Json<Vec<Feedback>> {
    Json(community::feedback_sent(&state.db, &user.user_id).await)
}

/// GET /api/feedback/received
async fn feedback_received(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Json<Vec<Feedback>> {
    Json(community::feedback_received(&state.db, &user.user_id).await)
}

/// POST /api/feedback/:id/reply - Continue a feedback thread.
async fn reply_to_feedback(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    Json(req): Json<ReplyRequest>,
) -> Result<Json<FeedbackReply>, ApiError> {
    Ok(Json(
        community::reply_to_feedback(&state.db, &user, &id, &req.message).await?,
    ))
}

/// POST /api/reviews - Rate a walk the user booked.
async fn create_review(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<NewReview>,
) -> Result<Json<WalkReview>, ApiError> {
    let review = community::create_review(&state.db, &user, req).await?;
    tracing::info!(
        walk_id = %review.walk_id,
        user_id = %user.user_id,
        rating = review.rating,
        "Review created"
    );
    Ok(Json(review))
}

/// GET /api/reviews/my
async fn my_reviews(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Json<Vec<WalkReview>> {
    Json(community::reviews_by(&state.db, &user.user_id).await)
}

/// GET /api/reviews/walk/:id
async fn walk_reviews(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Vec<WalkReview>> {
    Json(community::reviews_for_walk(&state.db, &id).await)
}

/// POST /api/experiences - Share a walking experience.
async fn share_experience(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<NewExperience>,
) -> Result<Json<WalkerExperience>, ApiError> {
    Ok(Json(
        community::share_experience(&state.db, &user, req).await?,
    ))
}

/// GET /api/experiences - Experiences from the user's city.
async fn experience_feed(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Json<Vec<WalkerExperience>> {
    let is_admin = state.is_admin(&user);
    Json(community::experience_feed(&state.db, &user, is_admin).await)
}

/// GET /api/experiences/my
async fn my_experiences(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Json<Vec<WalkerExperience>> {
    Json(community::experiences_of(&state.db, &user.user_id).await)
}

/// POST /api/admin/message - Write to the team.
async fn message_admins(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<AdminMessageRequest>,
) -> Result<Json<SubmittedResponse>, ApiError> {
    let msg = community::record_admin_message(&state.db, &user, &req.message).await?;
    let (subject, html) = community::admin_message_email(&msg);
    let admins_notified = state
        .notifier
        .email_admins(&state.config, &subject, &html)
        .await;
    tracing::info!(
        message_id = %msg.message_id,
        from = %user.user_id,
        admins_notified,
        "Admin message received"
    );
    Ok(Json(SubmittedResponse {
        message: "Message sent successfully",
        id: msg.message_id,
        admins_notified,
    }))
}

/// POST /api/report/content - Report content that breaks the rules.
async fn report_content(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<NewReport>,
) -> Result<Json<SubmittedResponse>, ApiError> {
    let report = community::report_content(&state.db, &user, req).await?;
    let (subject, html) = community::content_report_email(&report);
    let admins_notified = state
        .notifier
        .email_admins(&state.config, &subject, &html)
        .await;
    Ok(Json(SubmittedResponse {
        message: "Report submitted successfully. Thank you for helping keep our community safe.",
        id: report.report_id,
        admins_notified,
    }))
}
