use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Deterministic pickup directory seeded by `remedi seed` and the demo
/// environment.
const SEED_PHARMACIES: &[SeedPharmacy] = &[
    SeedPharmacy { id: "ph-citymed", name: "CityMed", suburb: "CBD" },
    SeedPharmacy { id: "ph-greenpoint", name: "Greenpoint Pharmacy", suburb: "Sea Point" },
    SeedPharmacy { id: "ph-obs", name: "Observatory Dispensary", suburb: "Observatory" },
    SeedPharmacy { id: "ph-wynberg", name: "Wynberg Health", suburb: "Wynberg" },
    SeedPharmacy { id: "ph-bellville", name: "Tygerberg Pharmacy", suburb: "Bellville" },
];

struct SeedPharmacy {
    id: &'static str,
    name: &'static str,
    suburb: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub pharmacies_inserted: u64,
}

pub async fn seed_pharmacies(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
    let mut inserted = 0;
    for pharmacy in SEED_PHARMACIES {
        let result = sqlx::query(
            "INSERT INTO pharmacy (id, name, suburb) VALUES (?, ?, ?) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(pharmacy.id)
        .bind(pharmacy.name)
        .bind(pharmacy.suburb)
        .execute(pool)
        .await?;
        inserted += result.rows_affected();
    }
    Ok(SeedResult { pharmacies_inserted: inserted })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub pharmacy_count: i64,
    pub complete: bool,
}

pub async fn verify_seeds(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
    let pharmacy_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pharmacy").fetch_one(pool).await?;
    Ok(VerificationResult {
        pharmacy_count,
        complete: pharmacy_count >= SEED_PHARMACIES.len() as i64,
    })
}

#[cfg(test)]
mod tests {
    use crate::{connect_with_settings, migrations};

    use super::{seed_pharmacies, verify_seeds};

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let first = seed_pharmacies(&pool).await.expect("first seed");
        assert_eq!(first.pharmacies_inserted, 5);

        let second = seed_pharmacies(&pool).await.expect("second seed");
        assert_eq!(second.pharmacies_inserted, 0);

        let verification = verify_seeds(&pool).await.expect("verify");
        assert!(verification.complete);
        assert_eq!(verification.pharmacy_count, 5);

        pool.close().await;
    }
}
