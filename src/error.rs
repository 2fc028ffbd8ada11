// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("No calendar connection for this user")]
    NotConnected,

    #[error("Calendar connection revoked; reauthorization required")]
    Revoked,

    #[error("OAuth state mismatch")]
    StateMismatch,

    #[error("User cancelled the authorization")]
    UserCancelled,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Stored token could not be decrypted")]
    DecryptionFailed,

    #[error("Google API error: {0}")]
    GoogleApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether this error is a terminal `invalid_grant` rejection from the
    /// token endpoint, meaning the refresh token is dead and the user must
    /// reconnect.
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, AppError::GoogleApi(msg) if msg.contains("invalid_grant"))
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::NotConnected => (StatusCode::NOT_FOUND, "not_connected", None),
            AppError::Revoked => (StatusCode::CONFLICT, "reauthorization_required", None),
            AppError::StateMismatch => (StatusCode::BAD_REQUEST, "state_mismatch", None),
            AppError::UserCancelled => (StatusCode::BAD_REQUEST, "cancelled", None),
            AppError::TokenExchangeFailed(msg) => {
                tracing::warn!(error = %msg, "Token exchange failed");
                (StatusCode::BAD_GATEWAY, "token_exchange_failed", None)
            }
            AppError::DecryptionFailed => {
                tracing::error!("Stored token decryption failed; check TOKEN_ENCRYPTION_KEY");
                (StatusCode::INTERNAL_SERVER_ERROR, "decryption_failed", None)
            }
            AppError::GoogleApi(msg) => {
                (StatusCode::BAD_GATEWAY, "google_error", Some(msg.clone()))
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
