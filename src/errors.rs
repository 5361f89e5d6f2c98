// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    ValidationError(String),

    #[error("Authentication with payment provider failed: {0}")]
    AuthError(String),

    #[error("{0} circuit breaker open. Too many failures. Try again later.")]
    CircuitOpen(&'static str),

    /// `message` is the friendly text when the provider code is known, otherwise
    /// the provider's own description.
    #[error("STK Push failed: {message}")]
    PushError {
        message: String,
        provider_description: String,
    },

    #[error("Status check failed: {0}")]
    QueryError(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("Unexpected provider response: {0}")]
    UnexpectedResponse(String),

    /// Provider answered with a non-success HTTP status.
    #[error("Provider returned HTTP {status}: {body}")]
    ProviderStatus { status: u16, body: String },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Store error: {0}")]
    StoreError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, "Validation failed"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "Not found"),
            AppError::CircuitOpen(_) => (StatusCode::SERVICE_UNAVAILABLE, "Payment provider temporarily unavailable"),
            AppError::AuthError(_) => (StatusCode::BAD_GATEWAY, "Payment provider authentication failed"),
            AppError::PushError { .. } => (StatusCode::BAD_GATEWAY, "STK Push failed"),
            AppError::QueryError(_) => (StatusCode::BAD_GATEWAY, "Status check failed"),
            AppError::ExternalApi(_)
            | AppError::UnexpectedResponse(_)
            | AppError::ProviderStatus { .. } => {
                (StatusCode::BAD_GATEWAY, "External API error")
            }
            AppError::MongoDB(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error"),
            AppError::StoreError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error"),
            AppError::ConfigurationError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error"),
        };

        let body = Json(json!({
            "success": false,
            "error": error_message,
            "message": self.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::UnexpectedResponse(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return AppError::UnexpectedResponse(err.to_string());
        }
        AppError::ExternalApi(format!("HTTP request failed: {}", err))
    }
}

impl AppError {
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        AppError::ValidationError(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        AppError::ConfigurationError(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        AppError::StoreError(msg.into())
    }

    /// Network failures and provider 5xx answers are worth another attempt;
    /// everything else is final for the current call.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::ExternalApi(_) => true,
            AppError::ProviderStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// 401/403 from the provider means the bearer token was rejected.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, AppError::ProviderStatus { status: 401 | 403, .. })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
