//! Session authentication.
//!
//! - Email/password accounts sign in through `/api/auth/login`
//! - Apple and hosted-OAuth accounts sign in through `/api/auth/apple` and
//!   `/api/auth/session`
//! - Every sign-in returns a session token and sets the `session_token`
//!   cookie; protected routes accept either the cookie or
//!   `Authorization: Bearer <token>`

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Extension, Query, State},
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use super::errors::{bad_request, internal, ApiError};
use super::routes::AppState;
use super::types::MessageResponse;
use crate::accounts::{
    self, AuthType, ExternalIdentity, ProfileUpdate, User, UserView, RESET_CODE_TTL_MINUTES,
};

const SESSION_COOKIE: &str = "session_token";
const OAUTH_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Routes reachable without a session.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/session", post(exchange_session))
        .route("/auth/apple", post(apple_sign_in))
        .route("/auth/logout", post(logout))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/me", get(me))
        .route("/auth/profile", put(update_profile))
        .route("/auth/make-admin", post(make_admin))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionExchangeRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppleSignInRequest {
    pub identity_token: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub reset_code: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct MakeAdminQuery {
    pub email: String,
}

/// A signed-in user plus the token mobile clients keep.
#[derive(Debug, Serialize)]
pub struct SignInResponse {
    #[serde(flatten)]
    pub user: UserView,
    pub session_token: String,
}

#[derive(Debug, Serialize)]
pub struct ForgotPasswordResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_minutes: Option<i64>,
}

/// User data returned by the hosted OAuth session endpoint.
#[derive(Debug, Deserialize)]
struct OAuthSessionData {
    id: String,
    email: String,
    name: String,
    #[serde(default)]
    picture: Option<String>,
    session_token: String,
}

#[derive(Debug, Deserialize)]
struct AppleClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

type SignedIn = ([(header::HeaderName, String); 1], Json<SignInResponse>);

// ─────────────────────────────────────────────────────────────────────────────
// Session plumbing
// ─────────────────────────────────────────────────────────────────────────────

fn session_cookie(token: &str, ttl_days: i64) -> String {
    format!(
        "{}={}; HttpOnly; Secure; SameSite=None; Max-Age={}; Path=/",
        SESSION_COOKIE,
        token,
        ttl_days.max(1) * 24 * 60 * 60
    )
}

fn expired_cookie() -> String {
    format!(
        "{}=; HttpOnly; Secure; SameSite=None; Max-Age=0; Path=/",
        SESSION_COOKIE
    )
}

/// Session token from the cookie, falling back to a bearer header.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .find_map(|pair| {
            pair.trim()
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
                .map(str::to_string)
        })
        .filter(|t| !t.is_empty());
    if from_cookie.is_some() {
        return from_cookie;
    }

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Resolve the session and put the [`User`] into request extensions.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = session_token(req.headers()) else {
        return (StatusCode::UNAUTHORIZED, "Not authenticated").into_response();
    };

    match accounts::resolve_session(&state.db, &token).await {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!("Rejected session: {}", e);
            ApiError::from(e).into_response()
        }
    }
}

async fn start_session(state: &AppState, user: User, token: String) -> Result<SignedIn, ApiError> {
    let ttl = state.config.session_ttl_days;
    accounts::create_session(&state.db, &user.user_id, token.clone(), ttl).await?;
    Ok((
        [(header::SET_COOKIE, session_cookie(&token, ttl))],
        Json(SignInResponse {
            user: user.into(),
            session_token: token,
        }),
    ))
}

fn decode_apple_claims(token: &str) -> Option<AppleClaims> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    jsonwebtoken::decode::<AppleClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| tracing::warn!("Apple token decode error: {}", e))
        .ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/auth/register - Create an email/password account.
async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<SignedIn, ApiError> {
    let user = accounts::register(&state.db, &req.email, &req.password, &req.name).await?;
    start_session(&state, user, accounts::new_session_token()).await
}

/// POST /api/auth/login - Sign in with email and password.
async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<SignedIn, ApiError> {
    let user = accounts::authenticate(&state.db, &req.email, &req.password).await?;
    tracing::info!(user_id = %user.user_id, "User logged in");
    start_session(&state, user, accounts::new_session_token()).await
}

/// POST /api/auth/session - Exchange a hosted-OAuth session id.
async fn exchange_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SessionExchangeRequest>,
) -> Result<SignedIn, ApiError> {
    let session_id = req
        .session_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_request("session_id required"))?;
    let Some(url) = state.config.oauth_session_url.as_deref() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "OAuth sign-in is not configured".to_string(),
        ));
    };

    let resp = state
        .http
        .get(url)
        .header("X-Session-ID", &session_id)
        .timeout(OAUTH_EXCHANGE_TIMEOUT)
        .send()
        .await
        .map_err(internal)?;
    if !resp.status().is_success() {
        tracing::warn!(status = %resp.status(), "OAuth session exchange rejected");
        return Err((StatusCode::UNAUTHORIZED, "Invalid session_id".to_string()));
    }
    let data: OAuthSessionData = resp.json().await.map_err(internal)?;

    let user = accounts::sign_in_external(
        &state.db,
        ExternalIdentity {
            user_id: data.id,
            email: data.email,
            name: data.name,
            picture: data.picture,
            auth_type: AuthType::Oauth,
        },
    )
    .await?;
    start_session(&state, user, data.session_token).await
}

/// POST /api/auth/apple - Sign in with an Apple identity token.
async fn apple_sign_in(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AppleSignInRequest>,
) -> Result<SignedIn, ApiError> {
    let claims = decode_apple_claims(&req.identity_token).ok_or((
        StatusCode::UNAUTHORIZED,
        "Invalid Apple identity token".to_string(),
    ))?;
    let subject = claims
        .sub
        .filter(|s| !s.is_empty())
        .ok_or((StatusCode::UNAUTHORIZED, "Invalid Apple user ID".to_string()))?;
    if let Some(claimed) = req.user_id.as_deref() {
        if claimed != subject {
            tracing::debug!("Apple user_id does not match token subject, using subject");
        }
    }

    let user_id = format!("apple_{}", subject);
    let email = req.email.filter(|e| !e.is_empty()).or(claims.email);
    let name = req
        .full_name
        .filter(|n| !n.trim().is_empty())
        .or_else(|| {
            email
                .as_deref()
                .and_then(|e| e.split('@').next())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "Apple User".to_string());
    let email = email.unwrap_or_else(|| format!("{}@privaterelay.appleid.com", user_id));

    let user = accounts::sign_in_external(
        &state.db,
        ExternalIdentity {
            user_id,
            email,
            name,
            picture: None,
            auth_type: AuthType::Apple,
        },
    )
    .await?;
    start_session(&state, user, accounts::new_session_token()).await
}

/// GET /api/auth/me - Current user.
async fn me(Extension(user): Extension<User>) -> Json<UserView> {
    Json(user.into())
}

/// POST /api/auth/logout - Drop the session and clear the cookie.
async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = session_token(&headers) {
        state.db.sessions.delete(&token).await?;
    }
    Ok((
        [(header::SET_COOKIE, expired_cookie())],
        Json(MessageResponse::new("Logged out successfully")),
    ))
}

/// POST /api/auth/forgot-password - Issue a 6-digit reset code.
async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<Json<ForgotPasswordResponse>, ApiError> {
    let generic = |message: &str| {
        Json(ForgotPasswordResponse {
            message: message.to_string(),
            reset_code: None,
            expires_in_minutes: None,
        })
    };

    let Some(user) = accounts::find_by_email(&state.db, &req.email).await else {
        return Ok(generic(
            "If an account exists with this email, a reset code has been generated.",
        ));
    };
    if user.password_hash.is_none() {
        return Ok(generic(
            "This account uses Google or Apple Sign-In. Please use that method to log in.",
        ));
    }

    let reset = accounts::issue_reset_code(&state.db, &user.email).await?;
    tracing::info!(user_id = %user.user_id, "Password reset code generated");
    state
        .notifier
        .mailer()
        .send(
            &user.email,
            "WalkWithUs - Password Reset Code",
            &format!(
                "<h2>Password Reset</h2><p>Your reset code is <strong>{}</strong>.</p>\
                 <p>It expires in {} minutes.</p>",
                reset.reset_code, RESET_CODE_TTL_MINUTES
            ),
        )
        .await;

    Ok(Json(ForgotPasswordResponse {
        message: "Reset code generated. Check your email.".to_string(),
        reset_code: Some(reset.reset_code),
        expires_in_minutes: Some(RESET_CODE_TTL_MINUTES),
    }))
}

/// POST /api/auth/reset-password - Set a new password with a reset code.
async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    accounts::reset_password(&state.db, &req.email, &req.reset_code, &req.new_password).await?;
    Ok(Json(MessageResponse::new(
        "Password has been reset successfully. You can now log in with your new password.",
    )))
}

/// PUT /api/auth/profile - Partial profile update.
async fn update_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<UserView>, ApiError> {
    if update.is_empty() {
        return Err(bad_request("No update data provided"));
    }
    let updated = state
        .db
        .users
        .update(&user.user_id, |u| update.apply(u))
        .await?
        .ok_or((StatusCode::NOT_FOUND, "User not found".to_string()))?;
    tracing::info!(user_id = %user.user_id, "Profile updated");
    Ok(Json(updated.into()))
}

/// POST /api/auth/make-admin?email= - Promote an account to admin.
async fn make_admin(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(query): Query<MakeAdminQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.require_admin(&user)?;
    let promoted = accounts::promote_to_admin(&state.db, &query.email).await?;
    tracing::info!(by = %user.user_id, user_id = %promoted.user_id, "User promoted to admin");
    Ok(Json(MessageResponse::new(format!(
        "User {} is now an admin",
        query.email
    ))))
}

#[cfg(test)]
mod tests {
    use super::super::routes::test_support::TestApp;
    use super::*;
    use axum::http::Method;
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;

    #[test]
    fn test_session_token_prefers_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer sess_header".parse().unwrap());
        assert_eq!(session_token(&headers).as_deref(), Some("sess_header"));

        headers.insert(
            header::COOKIE,
            "theme=dark; session_token=sess_cookie".parse().unwrap(),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("sess_cookie"));

        assert_eq!(session_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("sess_abc", 7);
        assert!(cookie.starts_with("session_token=sess_abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=None"));
        assert!(cookie.contains("Max-Age=604800"));
    }

    #[test]
    fn test_apple_claims_are_read_without_verification() {
        let token = jsonwebtoken::encode(
            &Header::default(),
            &json!({ "sub": "001234.abcd", "email": "x@privaterelay.appleid.com" }),
            &EncodingKey::from_secret(b"not-apple"),
        )
        .unwrap();
        let claims = decode_apple_claims(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("001234.abcd"));
        assert!(decode_apple_claims("garbage").is_none());
    }

    #[tokio::test]
    async fn test_register_login_me_logout() {
        let app = TestApp::new();
        let (status, body) = app
            .call(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "email": "Nina@Example.com", "password": "walking", "name": "Nina" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "nina@example.com");
        assert!(body.get("password_hash").is_none());
        let token = body["session_token"].as_str().unwrap().to_string();

        let (status, body) = app.get("/api/auth/me", &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Nina");

        let (status, _) = app
            .call(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": "nina@example.com", "password": "wrong!!" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app.post("/api/auth/logout", &token, json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.get("/api/auth/me", &token).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_forgot_and_reset_password() {
        let app = TestApp::new();
        accounts::register(app.db(), "omar@example.com", "first-pass", "Omar")
            .await
            .unwrap();

        let (_, body) = app
            .call(
                Method::POST,
                "/api/auth/forgot-password",
                None,
                Some(json!({ "email": "nobody@example.com" })),
            )
            .await;
        assert!(body.get("reset_code").is_none());

        let (status, body) = app
            .call(
                Method::POST,
                "/api/auth/forgot-password",
                None,
                Some(json!({ "email": "omar@example.com" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["expires_in_minutes"], 15);
        let code = body["reset_code"].as_str().unwrap().to_string();

        let (status, _) = app
            .call(
                Method::POST,
                "/api/auth/reset-password",
                None,
                Some(json!({ "email": "omar@example.com", "reset_code": code, "new_password": "second-pass" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        accounts::authenticate(app.db(), "omar@example.com", "second-pass")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_profile_update() {
        let app = TestApp::new();
        let token = app.login_as("pia", "Lyon").await;

        let (status, _) = app.put("/api/auth/profile", &token, json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app
            .put("/api/auth/profile", &token, json!({ "sex": "Male", "age": 40 }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sex"], "M");
        assert_eq!(body["age"], 40);
    }

    #[tokio::test]
    async fn test_blocked_user_is_rejected() {
        let app = TestApp::new();
        let token = app.login_as("quentin", "Lyon").await;
        app.db()
            .users
            .update("quentin", |u| u.status = accounts::UserStatus::Blocked)
            .await
            .unwrap();
        let (status, body) = app.get("/api/auth/me", &token).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.as_str().unwrap().contains("blocked"));
    }

    #[tokio::test]
    async fn test_make_admin_requires_admin() {
        let app = TestApp::new();
        let token = app.login_as("rita", "Lyon").await;
        let (status, _) = app
            .post("/api/auth/make-admin?email=rita@example.com", &token, json!({}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = app.login_admin("boss").await;
        let (status, _) = app
            .post("/api/auth/make-admin?email=rita@example.com", &admin, json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app
            .post("/api/auth/make-admin?email=ghost@example.com", &admin, json!({}))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
