use sqlx::Row;

use remedi_core::{
    Dependent, DependentId, MedicalAidProvider, MemberType, Subject, SubjectId,
};

use super::{parse_date, parse_timestamp, RepositoryError, SubjectRepository};
use crate::DbPool;

pub struct SqlSubjectRepository {
    pool: DbPool,
}

impl SqlSubjectRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn member_type_as_str(member_type: &MemberType) -> &'static str {
    match member_type {
        MemberType::Principal => "principal",
        MemberType::Dependent => "dependent",
    }
}

fn parse_member_type(raw: &str) -> Result<MemberType, RepositoryError> {
    match raw {
        "principal" => Ok(MemberType::Principal),
        "dependent" => Ok(MemberType::Dependent),
        other => Err(RepositoryError::Decode(format!("unknown member type `{other}`"))),
    }
}

fn provider_as_str(provider: &MedicalAidProvider) -> &'static str {
    match provider {
        MedicalAidProvider::DiscoveryHealth => "discovery_health",
        MedicalAidProvider::Bonitas => "bonitas",
        MedicalAidProvider::MomentumHealth => "momentum_health",
        MedicalAidProvider::PrivateClient => "private_client",
    }
}

fn parse_provider(raw: &str) -> Result<MedicalAidProvider, RepositoryError> {
    match raw {
        "discovery_health" => Ok(MedicalAidProvider::DiscoveryHealth),
        "bonitas" => Ok(MedicalAidProvider::Bonitas),
        "momentum_health" => Ok(MedicalAidProvider::MomentumHealth),
        "private_client" => Ok(MedicalAidProvider::PrivateClient),
        other => Err(RepositoryError::Decode(format!("unknown provider `{other}`"))),
    }
}

fn row_to_subject(row: &sqlx::sqlite::SqliteRow) -> Result<Subject, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let first_name: String =
        row.try_get("first_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let last_name: String =
        row.try_get("last_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let date_of_birth_raw: String =
        row.try_get("date_of_birth").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let member_type_raw: String =
        row.try_get("member_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let dependent_number: String =
        row.try_get("dependent_number").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let provider_raw: String =
        row.try_get("medical_aid_provider").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let medical_aid_number: Option<String> =
        row.try_get("medical_aid_number").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let medical_aid_plan: Option<String> =
        row.try_get("medical_aid_plan").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let registration_complete: i64 = row
        .try_get("registration_complete")
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_raw: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at_raw: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Subject {
        id: SubjectId(id),
        first_name,
        last_name,
        date_of_birth: parse_date(&date_of_birth_raw)?,
        member_type: parse_member_type(&member_type_raw)?,
        dependent_number,
        medical_aid_provider: parse_provider(&provider_raw)?,
        medical_aid_number,
        medical_aid_plan,
        registration_complete: registration_complete != 0,
        created_at: parse_timestamp(&created_at_raw)?,
        updated_at: parse_timestamp(&updated_at_raw)?,
    })
}

fn row_to_dependent(row: &sqlx::sqlite::SqliteRow) -> Result<Dependent, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let subject_id: String =
        row.try_get("subject_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let first_name: String =
        row.try_get("first_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let last_name: String =
        row.try_get("last_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let date_of_birth_raw: String =
        row.try_get("date_of_birth").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let dependent_number: String =
        row.try_get("dependent_number").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_raw: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Dependent {
        id: DependentId(id),
        subject_id: SubjectId(subject_id),
        first_name,
        last_name,
        date_of_birth: parse_date(&date_of_birth_raw)?,
        dependent_number,
        created_at: parse_timestamp(&created_at_raw)?,
    })
}

#[async_trait::async_trait]
impl SubjectRepository for SqlSubjectRepository {
    async fn find_by_id(&self, id: &SubjectId) -> Result<Option<Subject>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM subject WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_subject).transpose()
    }

    async fn upsert(&self, subject: &Subject) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO subject (id, first_name, last_name, date_of_birth, member_type, \
             dependent_number, medical_aid_provider, medical_aid_number, medical_aid_plan, \
             registration_complete, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
             first_name = excluded.first_name, \
             last_name = excluded.last_name, \
             date_of_birth = excluded.date_of_birth, \
             member_type = excluded.member_type, \
             dependent_number = excluded.dependent_number, \
             medical_aid_provider = excluded.medical_aid_provider, \
             medical_aid_number = excluded.medical_aid_number, \
             medical_aid_plan = excluded.medical_aid_plan, \
             registration_complete = excluded.registration_complete, \
             updated_at = excluded.updated_at",
        )
        .bind(&subject.id.0)
        .bind(&subject.first_name)
        .bind(&subject.last_name)
        .bind(subject.date_of_birth.to_string())
        .bind(member_type_as_str(&subject.member_type))
        .bind(&subject.dependent_number)
        .bind(provider_as_str(&subject.medical_aid_provider))
        .bind(&subject.medical_aid_number)
        .bind(&subject.medical_aid_plan)
        .bind(i64::from(subject.registration_complete))
        .bind(subject.created_at.to_rfc3339())
        .bind(subject.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_dependents(
        &self,
        subject: &SubjectId,
    ) -> Result<Vec<Dependent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM dependent WHERE subject_id = ? ORDER BY dependent_number",
        )
        .bind(&subject.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_dependent).collect()
    }

    async fn add_dependent(&self, dependent: &Dependent) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO dependent (id, subject_id, first_name, last_name, date_of_birth, \
             dependent_number, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&dependent.id.0)
        .bind(&dependent.subject_id.0)
        .bind(&dependent.first_name)
        .bind(&dependent.last_name)
        .bind(dependent.date_of_birth.to_string())
        .bind(&dependent.dependent_number)
        .bind(dependent.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_dependent(&self, id: &DependentId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM dependent WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
