// src/error.rs

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use uuid::Uuid;

use crate::models::UnknownVariant;

#[derive(Debug)]
pub enum AppError {
    InsufficientCredits { required: i32 },
    InvalidTransition { job_id: Uuid },
    NotFound(&'static str),
    Validation(String),
    Conflict(String),
    Unauthorized(&'static str),
    WebhookVerificationFailed(String),
    PaymentProvider(String),
    Storage(String),
    Database(sqlx::Error),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InsufficientCredits { required } => {
                write!(f, "insufficient credits: {required} required")
            }
            AppError::InvalidTransition { job_id } => {
                write!(f, "job {job_id} is already in a terminal state")
            }
            AppError::NotFound(what) => write!(f, "{what} not found"),
            AppError::Validation(msg) => write!(f, "validation error: {msg}"),
            AppError::Conflict(msg) => write!(f, "conflict: {msg}"),
            AppError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            AppError::WebhookVerificationFailed(msg) => {
                write!(f, "webhook verification failed: {msg}")
            }
            AppError::PaymentProvider(msg) => write!(f, "payment provider error: {msg}"),
            AppError::Storage(msg) => write!(f, "storage error: {msg}"),
            AppError::Database(e) => write!(f, "database error: {e}"),
            AppError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(value: sqlx::Error) -> Self {
        Self::Database(value)
    }
}

impl From<UnknownVariant> for AppError {
    fn from(value: UnknownVariant) -> Self {
        Self::Internal(value.to_string())
    }
}

impl AppError {
    /// Persistence failures are worth retrying by the caller; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Database(_))
    }

    /// Message safe to show to end users. Internal and vendor detail stays in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::InsufficientCredits { required } => format!(
                "You need {required} credits to generate images. Please purchase a subscription to continue."
            ),
            AppError::NotFound(what) => format!("{what} not found"),
            AppError::Validation(msg) | AppError::Conflict(msg) => msg.clone(),
            AppError::Unauthorized(msg) => (*msg).to_string(),
            AppError::WebhookVerificationFailed(_) => "Webhook processing failed".to_string(),
            AppError::PaymentProvider(_) => "Payment provider unavailable".to_string(),
            _ => "Unexpected error. Please try again.".to_string(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InsufficientCredits { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_)
            | AppError::Conflict(_)
            | AppError::WebhookVerificationFailed(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::PaymentProvider(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            log::error!("request failed: {self}");
        }
        HttpResponse::build(self.status_code()).json(json!({ "error": self.public_message() }))
    }
}
