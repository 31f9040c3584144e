use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use remedi_core::{
    AppendOutcome, AttachmentCategory, ConversationState, Dependent, DependentId, MediaItem, Order,
    OrderId, PendingAttachment, Pharmacy, Subject, SubjectId,
};

pub mod attachment;
pub mod conversation;
pub mod memory;
pub mod order;
pub mod pharmacy;
pub mod subject;

pub use attachment::SqlAttachmentRepository;
pub use conversation::SqlConversationStateRepository;
pub use memory::{
    InMemoryAttachmentRepository, InMemoryConversationStateRepository, InMemoryOrderRepository,
    InMemorySubjectRepository,
};
pub use order::SqlOrderRepository;
pub use pharmacy::SqlPharmacyRepository;
pub use subject::SqlSubjectRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ConversationStateRepository: Send + Sync {
    async fn load(&self, subject: &SubjectId) -> Result<Option<ConversationState>, RepositoryError>;
    async fn save(&self, state: &ConversationState) -> Result<(), RepositoryError>;
    async fn delete(&self, subject: &SubjectId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait SubjectRepository: Send + Sync {
    async fn find_by_id(&self, id: &SubjectId) -> Result<Option<Subject>, RepositoryError>;
    async fn upsert(&self, subject: &Subject) -> Result<(), RepositoryError>;
    async fn list_dependents(&self, subject: &SubjectId) -> Result<Vec<Dependent>, RepositoryError>;
    async fn add_dependent(&self, dependent: &Dependent) -> Result<(), RepositoryError>;
    async fn remove_dependent(&self, id: &DependentId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn save(&self, order: &Order) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;
    async fn list_for_subject(&self, subject: &SubjectId) -> Result<Vec<Order>, RepositoryError>;
    /// Distinct delivery addresses of past orders, most recent first; feeds
    /// the delivery-address choice list.
    async fn distinct_addresses(
        &self,
        subject: &SubjectId,
    ) -> Result<Vec<String>, RepositoryError>;
}

#[async_trait]
pub trait AttachmentRepository: Send + Sync {
    async fn load(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
    ) -> Result<Option<PendingAttachment>, RepositoryError>;
    async fn append(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
        item: MediaItem,
    ) -> Result<AppendOutcome, RepositoryError>;
    async fn delete(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
    ) -> Result<(), RepositoryError>;
    /// Public deletion contract for the externally scheduled sweep. Returns
    /// the number of aggregates removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait PharmacyRepository: Send + Sync {
    async fn list_all(&self) -> Result<Vec<Pharmacy>, RepositoryError>;
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("bad timestamp `{raw}`: {error}")))
}

pub(crate) fn parse_date(raw: &str) -> Result<chrono::NaiveDate, RepositoryError> {
    raw.parse()
        .map_err(|error| RepositoryError::Decode(format!("bad date `{raw}`: {error}")))
}
