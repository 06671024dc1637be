//! Support chatbot endpoint and transcripts.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::types::Json as DbJson;
use uuid::Uuid;
use validator::Validate;

use super::extract::{AuthUser, Query, ValidatedJson};
use super::AppState;
use crate::chat::{respond, PgKnowledge};
use crate::domain::aggregates::chat::{default_session_id, exchange};
use crate::domain::aggregates::ChatSession;
use crate::error::{ApiError, ApiResult};

pub const HISTORY_LIMIT: i64 = 10;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(send_message))
        .route("/history", get(history))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    #[validate(length(max = 1000, message = "message must be at most 1000 characters"))]
    pub message: String,
    #[validate(length(min = 1, max = 100))]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilter {
    pub session_id: Option<String>,
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidatedJson(req): ValidatedJson<ChatRequest>,
) -> ApiResult<Json<Value>> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("Message is required.".to_string()));
    }
    let now = Utc::now();
    let session_id = req.session_id.unwrap_or_else(|| default_session_id(user.id, now));

    let knowledge = PgKnowledge::new(state.db.clone());
    let response = respond(&state.chatbot, message, user.id, &knowledge).await?;

    sqlx::query(
        "INSERT INTO chats (id, user_id, session_id, messages, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $5) \
         ON CONFLICT (user_id, session_id) DO UPDATE SET messages = chats.messages || EXCLUDED.messages, updated_at = EXCLUDED.updated_at",
    )
    .bind(Uuid::now_v7())
    .bind(user.id)
    .bind(&session_id)
    .bind(DbJson(exchange(message, &response, now)))
    .bind(now)
    .execute(&state.db)
    .await?;

    tracing::debug!(user_id = %user.id, %session_id, "chat message answered");
    Ok(Json(json!({ "response": response, "sessionId": session_id })))
}

async fn history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(filter): Query<HistoryFilter>,
) -> ApiResult<Json<Value>> {
    let chats = sqlx::query_as::<_, ChatSession>(
        "SELECT * FROM chats WHERE user_id = $1 AND ($2::TEXT IS NULL OR session_id = $2) \
         ORDER BY updated_at DESC LIMIT $3",
    )
    .bind(user.id)
    .bind(filter.session_id)
    .bind(HISTORY_LIMIT)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(json!({ "chats": chats })))
}
