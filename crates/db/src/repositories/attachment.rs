use chrono::{DateTime, Utc};
use sqlx::Row;

use remedi_core::{
    AppendOutcome, AttachmentCategory, MediaItem, PendingAttachment, SubjectId, ATTACHMENT_CAP,
};

use super::{parse_timestamp, AttachmentRepository, RepositoryError};
use crate::DbPool;

/// Aggregate rows live in `order_attachment`, one row per item; the
/// aggregate's age is the age of its first row.
pub struct SqlAttachmentRepository {
    pool: DbPool,
}

impl SqlAttachmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn category_key(category: AttachmentCategory) -> &'static str {
    category.as_str()
}

#[async_trait::async_trait]
impl AttachmentRepository for SqlAttachmentRepository {
    async fn load(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
    ) -> Result<Option<PendingAttachment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT position, content_type, payload, created_at FROM order_attachment \
             WHERE subject_id = ? AND category = ? ORDER BY position",
        )
        .bind(&subject.0)
        .bind(category_key(category))
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let created_at_raw: String =
            rows[0].try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let mut pending =
            PendingAttachment::new(subject.clone(), category, parse_timestamp(&created_at_raw)?);
        for row in &rows {
            let content_type: String =
                row.try_get("content_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
            let payload: Vec<u8> =
                row.try_get("payload").map_err(|e| RepositoryError::Decode(e.to_string()))?;
            pending.items.push(MediaItem { content_type, bytes: payload });
        }
        Ok(Some(pending))
    }

    async fn append(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
        item: MediaItem,
    ) -> Result<AppendOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM order_attachment WHERE subject_id = ? AND category = ?",
        )
        .bind(&subject.0)
        .bind(category_key(category))
        .fetch_one(&mut *tx)
        .await?;

        if count as usize >= ATTACHMENT_CAP {
            tx.rollback().await?;
            return Ok(AppendOutcome::Rejected);
        }

        sqlx::query(
            "INSERT INTO order_attachment (subject_id, category, position, content_type, \
             payload, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&subject.0)
        .bind(category_key(category))
        .bind(count + 1)
        .bind(&item.content_type)
        .bind(&item.bytes)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(AppendOutcome::Appended { count: count as usize + 1 })
    }

    async fn delete(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
    ) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM order_attachment WHERE subject_id = ? AND category = ?")
            .bind(&subject.0)
            .bind(category_key(category))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        // Whole aggregates whose oldest row predates the cutoff are removed,
        // so a half-old aggregate never loses only its early items.
        let mut tx = self.pool.begin().await?;

        let stale: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ( \
             SELECT subject_id FROM order_attachment \
             GROUP BY subject_id, category HAVING MIN(created_at) < ?)",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM order_attachment WHERE (subject_id, category) IN ( \
             SELECT subject_id, category FROM order_attachment \
             GROUP BY subject_id, category HAVING MIN(created_at) < ?)",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(stale.max(0) as u64)
    }
}
