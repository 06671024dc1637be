//! Request extractors: bearer-token authentication, validated JSON bodies, and
//! path/query wrappers whose rejections render as the JSON error body.

use axum::{
    async_trait,
    extract::{
        rejection::{PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Request,
    },
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use super::AppState;
use crate::domain::aggregates::{Role, User};
use crate::error::{ApiError, ApiResult};

/// The signed-in, active user behind `Authorization: Bearer <jwt>`.
pub struct AuthUser(pub User);

impl AuthUser {
    /// Narrows to the given roles, or 403.
    pub fn require(self, roles: &[Role]) -> ApiResult<User> {
        if roles.contains(&self.0.role) {
            Ok(self.0)
        } else {
            Err(ApiError::Forbidden("Insufficient permissions.".to_string()))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| ApiError::Unauthorized("Access denied. No token provided.".to_string()))?;
        let claims = state.tokens.verify_access(token)?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(claims.sub)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("User not found.".to_string()))?;
        if !user.is_active {
            return Err(ApiError::Forbidden("Account has been deactivated.".to_string()));
        }

        tracing::debug!(user_id = %user.id, role = %user.role, "authenticated");
        Ok(AuthUser(user))
    }
}

/// A JSON body that parsed and passed its `Validate` rules.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::Validation(vec![rejection.body_text()]))?;
        value.validate()?;
        Ok(Self(value))
    }
}

/// `axum::extract::Path` answering bad segments with a JSON 400.
pub struct Path<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for Path<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Path(value) = axum::extract::Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// `axum::extract::Query` answering malformed query strings with a JSON 400.
#[derive(Debug)]
pub struct Query<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for Query<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Query(value) = axum::extract::Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!("path rejected: {}", rejection.body_text());
        ApiError::BadRequest("Invalid resource id.".to_string())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(vec![rejection.body_text()])
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
