//! Chat session transcript

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole { User, Assistant }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: String,
    pub messages: Json<Vec<ChatMessage>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The user's question followed by the bot's answer.
pub fn exchange(question: &str, answer: &str, now: DateTime<Utc>) -> Vec<ChatMessage> {
    vec![
        ChatMessage { role: ChatRole::User, content: question.to_string(), timestamp: now },
        ChatMessage { role: ChatRole::Assistant, content: answer.to_string(), timestamp: now },
    ]
}

/// Session id used when the client does not continue an existing one.
pub fn default_session_id(user_id: Uuid, now: DateTime<Utc>) -> String {
    format!("session-{}-{}", user_id, now.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_order() {
        let msgs = exchange("hi", "Hello!", Utc::now());
        assert_eq!(msgs[0].role, ChatRole::User);
        assert_eq!(msgs[1].role, ChatRole::Assistant);
        assert_eq!(serde_json::to_value(&msgs[1]).unwrap()["role"], "assistant");
    }

    #[test]
    fn test_default_session_id() {
        let id = Uuid::nil();
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(default_session_id(id, now), format!("session-{}-1700000000000", id));
    }
}
