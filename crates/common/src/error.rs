//! Error types for slotvote.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Booking Rejections ===
    #[error("Slot is full")]
    SlotFull,

    #[error("Already signed up for another slot in this poll")]
    AlreadySignedUp,

    #[error("A vote with this email already exists")]
    DuplicateEmailVote,

    // === Pre-booking Checks ===
    #[error("Poll is not active")]
    PollInactive,

    #[error("Poll has expired")]
    PollExpired,

    #[error("Email belongs to a registered account; please log in")]
    LoginRequired,

    #[error("Email does not match the authenticated account")]
    EmailMismatch,

    #[error("Already voted and this poll does not allow editing")]
    AlreadyVoted,

    #[error("This poll does not allow withdrawing votes")]
    WithdrawalNotAllowed,

    // === Client Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Poll not found: {0}")]
    PollNotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // === Server Errors ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            // 4xx Client Errors
            Self::SlotFull | Self::AlreadySignedUp | Self::DuplicateEmailVote | Self::AlreadyVoted => {
                StatusCode::CONFLICT
            }
            Self::PollInactive
            | Self::PollExpired
            | Self::EmailMismatch
            | Self::WithdrawalNotAllowed => StatusCode::FORBIDDEN,
            Self::LoginRequired => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) | Self::PollNotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,

            // 5xx Server Errors
            Self::Database(_) | Self::Config(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::SlotFull => "SLOT_FULL",
            Self::AlreadySignedUp => "ALREADY_SIGNED_UP",
            Self::DuplicateEmailVote => "DUPLICATE_EMAIL_VOTE",
            Self::PollInactive => "POLL_INACTIVE",
            Self::PollExpired => "POLL_EXPIRED",
            Self::LoginRequired => "LOGIN_REQUIRED",
            Self::EmailMismatch => "EMAIL_MISMATCH",
            Self::AlreadyVoted => "ALREADY_VOTED",
            Self::WithdrawalNotAllowed => "WITHDRAWAL_NOT_ALLOWED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::PollNotFound(_) => "POLL_NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Returns whether this is one of the typed booking rejections.
    ///
    /// These are expected outcomes of a booking attempt and must reach the
    /// client unchanged.
    #[must_use]
    pub const fn is_booking_rejection(&self) -> bool {
        matches!(
            self,
            Self::SlotFull | Self::AlreadySignedUp | Self::DuplicateEmailVote
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        if self.is_server_error() {
            tracing::error!(error = %self, code = code, "Server error occurred");
        } else {
            tracing::debug!(error = %self, code = code, "Client error occurred");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
