use sqlx::Row;

use remedi_core::Pharmacy;

use super::{PharmacyRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPharmacyRepository {
    pool: DbPool,
}

impl SqlPharmacyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PharmacyRepository for SqlPharmacyRepository {
    async fn list_all(&self) -> Result<Vec<Pharmacy>, RepositoryError> {
        let rows = sqlx::query("SELECT id, name, suburb FROM pharmacy ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Pharmacy {
                    id: row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?,
                    name: row
                        .try_get("name")
                        .map_err(|e| RepositoryError::Decode(e.to_string()))?,
                    suburb: row
                        .try_get("suburb")
                        .map_err(|e| RepositoryError::Decode(e.to_string()))?,
                })
            })
            .collect()
    }
}
