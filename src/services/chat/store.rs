//! Chat persistence facade. Each operation is one short-lived session; the
//! orchestrator never holds a connection across an LLM call.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::ChatMessageRow;
use crate::services::llm::{ChatMessage, ContentBlock};
use crate::utils::ApiResult;

#[derive(Clone)]
pub struct ChatStore {
    pool: SqlitePool,
}

impl ChatStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Ensure a conversation exists, creating one when no id is supplied.
    pub async fn ensure_conversation(
        &self,
        conversation_id: Option<&str>,
        user_id: i64,
        org_id: &str,
        title_hint: &str,
    ) -> ApiResult<String> {
        if let Some(id) = conversation_id {
            let exists: Option<(String,)> =
                sqlx::query_as("SELECT id FROM chat_conversations WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
            if exists.is_some() {
                return Ok(id.to_string());
            }
        }
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO chat_conversations (id, user_id, org_id, title) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(org_id)
        .bind(crate::utils::truncate_chars(title_hint, 80))
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Load the most recent `window` messages in chronological order.
    pub async fn load_history(
        &self,
        conversation_id: &str,
        window: usize,
    ) -> ApiResult<Vec<ChatMessage>> {
        let rows: Vec<ChatMessageRow> = sqlx::query_as(
            "SELECT * FROM (
                SELECT * FROM chat_messages WHERE conversation_id = ?
                ORDER BY id DESC LIMIT ?
             ) ORDER BY id ASC",
        )
        .bind(conversation_id)
        .bind(window as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let content: Vec<ContentBlock> = serde_json::from_str(&row.content_json).ok()?;
                Some(ChatMessage { role: row.role, content })
            })
            .collect())
    }

    pub async fn append_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &[ContentBlock],
        input_tokens: Option<i64>,
        output_tokens: Option<i64>,
    ) -> ApiResult<()> {
        sqlx::query(
            "INSERT INTO chat_messages (conversation_id, role, content_json, input_tokens, output_tokens)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(role)
        .bind(serde_json::to_string(content)?)
        .bind(input_tokens)
        .bind(output_tokens)
        .execute(&self.pool)
        .await?;
        sqlx::query("UPDATE chat_conversations SET updated_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
