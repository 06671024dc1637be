//! HTTP-facing error type.
//!
//! Every handler returns `Result<_, ApiError>`. Each variant maps to one
//! status code and renders as `{"message": ..., "errors"?: [...], "code"?: ...}`.
//! Server-side failures are logged in full and answered with a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

use crate::auth::TokenError;
use crate::MarketError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation error")]
    Validation(Vec<String>),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Token expired.")]
    TokenExpired,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Too many requests, please try again later.")]
    TooManyRequests,

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(what: &str) -> Self { Self::NotFound(format!("{what} not found.")) }
    pub fn not_authorized() -> Self { Self::Forbidden("Not authorized.".to_string()) }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) | Self::TokenExpired => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn user_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Gateway(_) => "Payment service temporarily unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Server error: {}", self);
        } else {
            tracing::debug!("Client error: {}", self);
        }

        let mut body = json!({ "message": self.user_message() });
        match &self {
            Self::Validation(errors) => body["errors"] = json!(errors),
            Self::TokenExpired => body["code"] = json!("TOKEN_EXPIRED"),
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

/// Unique violations become 409 naming the field, like `email already exists.`
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some("23505") {
                let field = db.constraint().and_then(constraint_field).unwrap_or("record");
                return ApiError::Conflict(format!("{field} already exists."));
            }
        }
        ApiError::Database(err)
    }
}

const TABLES: [&str; 7] = ["cart_items", "categories", "complaints", "products", "orders", "users", "chats"];

/// `users_email_key` -> `email`, `cart_items_user_id_product_id_key` -> `user_id_product_id`
fn constraint_field(constraint: &str) -> Option<&str> {
    let trimmed = constraint.strip_suffix("_key")?;
    TABLES
        .iter()
        .find_map(|table| trimmed.strip_prefix(*table)?.strip_prefix('_'))
        .or_else(|| trimmed.split_once('_').map(|(_, field)| field))
}

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        match err {
            MarketError::ProductNotFound(_) | MarketError::CartItemNotFound => ApiError::NotFound(err.to_string()),
            _ => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => ApiError::TokenExpired,
            TokenError::Invalid(_) => ApiError::Unauthorized("Invalid token.".to_string()),
            TokenError::Signing(e) => ApiError::Internal(e),
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let mut messages = Vec::new();
        collect_messages("", &errors, &mut messages);
        messages.sort();
        ApiError::Validation(messages)
    }
}

fn collect_messages(prefix: &str, errors: &ValidationErrors, out: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() { field.to_string() } else { format!("{prefix}.{field}") };
        match kind {
            ValidationErrorsKind::Field(list) => out.extend(list.iter().map(|e| match &e.message {
                Some(msg) => msg.to_string(),
                None => format!("{path} is invalid ({})", e.code),
            })),
            ValidationErrorsKind::Struct(inner) => collect_messages(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    collect_messages(&format!("{path}[{idx}]"), inner, out);
                }
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self { ApiError::Internal(err.to_string()) }
}
