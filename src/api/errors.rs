//! Mapping of domain errors to HTTP responses.

use axum::http::StatusCode;

use crate::accounts::password::PasswordError;
use crate::accounts::AuthError;
use crate::admin::AdminError;
use crate::community::CommunityError;
use crate::store::StoreError;
use crate::walks::WalkError;

pub type ApiError = (StatusCode, String);

pub fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, msg.into())
}

pub fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!("Request failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

impl From<StoreError> for (StatusCode, String) {
    fn from(e: StoreError) -> Self {
        internal(e)
    }
}

impl From<AuthError> for (StatusCode, String) {
    fn from(e: AuthError) -> Self {
        let status = match e {
            AuthError::Password(inner) => return inner.into(),
            AuthError::Store(inner) => return internal(inner),
            AuthError::MissingToken
            | AuthError::InvalidSession
            | AuthError::Expired
            | AuthError::InvalidCredentials
            | AuthError::ExternalAccount => StatusCode::UNAUTHORIZED,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::Blocked | AuthError::Suspended => StatusCode::FORBIDDEN,
            AuthError::InvalidEmail
            | AuthError::NameTooShort
            | AuthError::EmailTaken
            | AuthError::InvalidResetCode
            | AuthError::ResetCodeExpired => StatusCode::BAD_REQUEST,
        };
        (status, e.to_string())
    }
}

impl From<PasswordError> for (StatusCode, String) {
    fn from(e: PasswordError) -> Self {
        match e {
            PasswordError::TooShort => bad_request(e.to_string()),
            PasswordError::MalformedHash => internal(e),
        }
    }
}

impl From<WalkError> for (StatusCode, String) {
    fn from(e: WalkError) -> Self {
        let status = match &e {
            WalkError::NotFound | WalkError::BookingNotFound => StatusCode::NOT_FOUND,
            WalkError::NotOrganizer(_) => StatusCode::FORBIDDEN,
            WalkError::EmptyUpdate
            | WalkError::Invalid(_)
            | WalkError::Full(_)
            | WalkError::AlreadyBooked => StatusCode::BAD_REQUEST,
            WalkError::Store(_) => return internal(e),
        };
        (status, e.to_string())
    }
}

impl From<CommunityError> for (StatusCode, String) {
    fn from(e: CommunityError) -> Self {
        let status = match &e {
            CommunityError::NotFound(_) => StatusCode::NOT_FOUND,
            CommunityError::Invalid(_) => StatusCode::BAD_REQUEST,
            CommunityError::Forbidden(_) => StatusCode::FORBIDDEN,
            CommunityError::Store(_) => return internal(e),
        };
        (status, e.to_string())
    }
}

impl From<AdminError> for (StatusCode, String) {
    fn from(e: AdminError) -> Self {
        let status = match &e {
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
            AdminError::Invalid(_) => StatusCode::BAD_REQUEST,
            AdminError::Store(_) => return internal(e),
        };
        (status, e.to_string())
    }
}
