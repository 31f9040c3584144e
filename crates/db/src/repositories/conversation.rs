use sqlx::Row;

use remedi_core::{ConversationState, SubjectId};

use super::{parse_timestamp, ConversationStateRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationStateRepository {
    pool: DbPool,
}

impl SqlConversationStateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationStateRepository for SqlConversationStateRepository {
    async fn load(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<ConversationState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT subject_id, flow, updated_at FROM conversation_state WHERE subject_id = ?",
        )
        .bind(&subject.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw_flow: String =
            row.try_get("flow").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let updated_at_raw: String =
            row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

        let flow = serde_json::from_str(&raw_flow)
            .map_err(|error| RepositoryError::Decode(format!("bad flow document: {error}")))?;
        let updated_at = parse_timestamp(&updated_at_raw)?;

        Ok(Some(ConversationState { subject_id: subject.clone(), flow, updated_at }))
    }

    async fn save(&self, state: &ConversationState) -> Result<(), RepositoryError> {
        let flow = serde_json::to_string(&state.flow)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO conversation_state (subject_id, flow, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT (subject_id) DO UPDATE SET flow = excluded.flow, \
             updated_at = excluded.updated_at",
        )
        .bind(&state.subject_id.0)
        .bind(flow)
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, subject: &SubjectId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM conversation_state WHERE subject_id = ?")
            .bind(&subject.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
