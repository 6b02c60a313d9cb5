use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::domain::DomainError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("azure ad token error: {0}")]
    AuthBroker(String),

    #[error("power bi api error: {message}")]
    RemoteApi { status: Option<u16>, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AuthBroker(_) | AppError::RemoteApi { .. } => StatusCode::BAD_GATEWAY,
            AppError::Configuration(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code, used by the embed endpoint's `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Configuration(_) => "configuration_error",
            AppError::AuthBroker(_) => "auth_broker_error",
            AppError::RemoteApi { .. } => "remote_api_error",
            AppError::Database(_) | AppError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to return to the caller. Storage and internal failures
    /// are logged here and replaced with a generic message.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Unauthorized(m)
            | AppError::Forbidden(m)
            | AppError::BadRequest(m)
            | AppError::NotFound(m)
            | AppError::Configuration(m)
            | AppError::AuthBroker(m) => m.clone(),
            AppError::RemoteApi { status: Some(s), message } => {
                format!("Power BI API returned {}: {}", s, message)
            }
            AppError::RemoteApi { status: None, message } => message.clone(),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "internal server error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                "internal server error".to_string()
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownModel(model) => {
                AppError::BadRequest(format!("unknown model '{}'", model))
            }
            StoreError::InvalidIdentifier(ident) => {
                AppError::BadRequest(format!("invalid identifier '{}'", ident))
            }
            StoreError::ProtectedModel(model) => {
                AppError::Forbidden(format!("model '{}' is not readable through the API", model))
            }
            StoreError::UniqueViolation(detail) => {
                AppError::BadRequest(format!("unique constraint violated: {}", detail))
            }
            StoreError::Database(e) => AppError::Database(e),
            StoreError::Serialization(e) => AppError::Internal(e.into()),
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        AppError::BadRequest(format!("invalid domain: {}", err))
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "success": false,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "message": self.public_message(),
        }));

        let mut response = (status, body).into_response();

        if matches!(self, AppError::Unauthorized(_)) {
            response.headers_mut().insert(
                "www-authenticate",
                axum::http::HeaderValue::from_static("Token header=\"X-PowerBI-Token\""),
            );
        }

        response
    }
}
