//! Registration, login, token refresh and profile endpoints.

use axum::{extract::State, http::StatusCode, routing::{get, post}, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{types::Json as DbJson, PgPool};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::extract::{AuthUser, ValidatedJson};
use super::validation::{business_name_for, self_service_role, valid_phone};
use super::AppState;
use crate::auth::{hash_password, refresh_digest, verify_password, verify_unknown_user, TokenError, TokenPair, TokenService};
use crate::domain::aggregates::{user::normalize_email, Address, LoginBlock, Role, User};
use crate::error::{ApiError, ApiResult};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/me", get(me).put(update_me))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "business_name_required", skip_on_field_errors = false))]
pub struct RegisterRequest {
    #[validate(length(min = 2, max = 50, message = "name must be 2-50 characters"))]
    pub name: String,
    #[validate(email(message = "email must be a valid email"))]
    pub email: String,
    #[validate(length(min = 6, max = 128, message = "password must be 6-128 characters"))]
    pub password: String,
    #[serde(default)]
    #[validate(custom = "self_service_role")]
    pub role: Role,
    #[validate(custom = "valid_phone")]
    pub phone: Option<String>,
    #[validate(custom = "valid_phone")]
    pub whatsapp_number: Option<String>,
    #[validate]
    pub address: Option<Address>,
    pub business_name: Option<String>,
    pub business_license: Option<String>,
}

fn business_name_required(req: &RegisterRequest) -> Result<(), ValidationError> {
    business_name_for(req.role, req.business_name.as_deref())
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "email must be a valid email"))]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required."))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[validate(length(min = 2, max = 50, message = "name must be 2-50 characters"))]
    pub name: Option<String>,
    #[validate(custom = "valid_phone")]
    pub phone: Option<String>,
    #[validate(custom = "valid_phone")]
    pub whatsapp_number: Option<String>,
    #[validate]
    pub address: Option<Address>,
    #[validate(length(min = 2, max = 100, message = "businessName must be 2-100 characters"))]
    pub business_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    message: &'static str,
    user: User,
    #[serde(flatten)]
    tokens: TokenPair,
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let email = normalize_email(&req.email);
    let password_hash = hash_password(&req.password).map_err(|e| ApiError::Internal(e.to_string()))?;
    let id = Uuid::now_v7();
    let tokens = state.tokens.issue(id, req.role)?;

    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (id, name, email, password_hash, role, phone, whatsapp_number, address, \
         business_name, business_license, refresh_token_digest) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING *",
    )
    .bind(id)
    .bind(req.name.trim())
    .bind(&email)
    .bind(&password_hash)
    .bind(req.role)
    .bind(blank_to_none(req.phone))
    .bind(blank_to_none(req.whatsapp_number))
    .bind(req.address.map(DbJson))
    .bind(blank_to_none(req.business_name))
    .bind(blank_to_none(req.business_license))
    .bind(refresh_digest(&tokens.refresh_token))
    .fetch_one(&state.db)
    .await
    .map_err(|e| match ApiError::from(e) {
        ApiError::Conflict(_) => ApiError::Conflict("Email already registered.".to_string()),
        other => other,
    })?;

    tracing::info!(user_id = %user.id, role = %user.role, "user registered");
    Ok((StatusCode::CREATED, Json(AuthResponse { message: "Registration successful!", user, tokens })))
}

async fn login(State(state): State<AppState>, ValidatedJson(req): ValidatedJson<LoginRequest>) -> ApiResult<Json<AuthResponse>> {
    let invalid = || ApiError::Unauthorized("Invalid email or password.".to_string());
    let email = normalize_email(&req.email);

    let found = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    let Some(user) = found else {
        verify_unknown_user(&req.password);
        tracing::warn!(%email, "login failed");
        return Err(invalid());
    };
    if !verify_password(&req.password, &user.password_hash) {
        tracing::warn!(%email, "login failed");
        return Err(invalid());
    }
    match user.login_block() {
        Some(LoginBlock::Deactivated) => return Err(ApiError::Forbidden("Account has been deactivated.".to_string())),
        Some(LoginBlock::PendingApproval) => {
            return Err(ApiError::Forbidden("Your wholesaler account is pending approval.".to_string()))
        }
        None => {}
    }

    let tokens = state.tokens.issue(user.id, user.role)?;
    sqlx::query("UPDATE users SET refresh_token_digest = $2, updated_at = NOW() WHERE id = $1")
        .bind(user.id)
        .bind(refresh_digest(&tokens.refresh_token))
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %user.id, "user logged in");
    Ok(Json(AuthResponse { message: "Login successful!", user, tokens }))
}

/// Rotates the pair. The old refresh token stops working once this succeeds.
async fn refresh(State(state): State<AppState>, ValidatedJson(req): ValidatedJson<RefreshRequest>) -> ApiResult<Json<TokenPair>> {
    rotate_refresh(&state.db, &state.tokens, &req.refresh_token).await.map(Json)
}

/// Swaps the stored digest for a fresh pair in a single conditional update,
/// so two requests racing with the same token cannot both succeed.
pub async fn rotate_refresh(db: &PgPool, tokens: &TokenService, refresh_token: &str) -> ApiResult<TokenPair> {
    let invalid = || ApiError::Unauthorized("Invalid refresh token.".to_string());
    let claims = tokens.verify_refresh(refresh_token).map_err(|e| match e {
        TokenError::Expired => ApiError::Unauthorized("Refresh token expired. Please login again.".to_string()),
        _ => invalid(),
    })?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(claims.sub)
        .fetch_optional(db)
        .await?
        .ok_or_else(invalid)?;
    if !user.is_active {
        return Err(ApiError::Forbidden("Account has been deactivated.".to_string()));
    }

    let presented = refresh_digest(refresh_token);
    if user.refresh_token_digest.as_deref() != Some(presented.as_str()) {
        tracing::warn!(user_id = %user.id, "refresh token reuse or mismatch");
        return Err(invalid());
    }

    let pair = tokens.issue(user.id, user.role)?;
    let rotated = sqlx::query("UPDATE users SET refresh_token_digest = $2, updated_at = NOW() WHERE id = $1 AND refresh_token_digest = $3")
        .bind(user.id)
        .bind(refresh_digest(&pair.refresh_token))
        .bind(&presented)
        .execute(db)
        .await?;
    if rotated.rows_affected() == 0 {
        return Err(invalid());
    }
    Ok(pair)
}

async fn logout(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Json<Value>> {
    sqlx::query("UPDATE users SET refresh_token_digest = NULL, updated_at = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(&state.db)
        .await?;
    Ok(Json(json!({ "message": "Logged out successfully." })))
}

async fn me(AuthUser(user): AuthUser) -> Json<Value> {
    Json(json!({ "user": user }))
}

async fn update_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidatedJson(req): ValidatedJson<UpdateProfileRequest>,
) -> ApiResult<Json<Value>> {
    let updated = sqlx::query_as::<_, User>(
        "UPDATE users SET name = COALESCE($2, name), phone = COALESCE($3, phone), \
         whatsapp_number = COALESCE($4, whatsapp_number), address = COALESCE($5, address), \
         business_name = COALESCE($6, business_name), updated_at = NOW() \
         WHERE id = $1 RETURNING *",
    )
    .bind(user.id)
    .bind(req.name.map(|n| n.trim().to_string()))
    .bind(req.phone)
    .bind(req.whatsapp_number)
    .bind(req.address.map(DbJson))
    .bind(req.business_name.map(|n| n.trim().to_string()))
    .fetch_one(&state.db)
    .await?;
    Ok(Json(json!({ "message": "Profile updated.", "user": updated })))
}
