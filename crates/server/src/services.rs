use async_trait::async_trait;
use chrono::Utc;

use remedi_chat::controller::{
    AttachmentStore, RecordError, RecordService, StateError, StateStore, SubjectStatus,
};
use remedi_core::wizard::dependents::DependentsData;
use remedi_core::wizard::order::OrderDraft;
use remedi_core::wizard::profile::{ProfileField, ProfileValue};
use remedi_core::wizard::registration::{RegistrationData, PRINCIPAL_DEPENDENT_NUMBER};
use remedi_core::{
    AppendOutcome, AttachmentCategory, ConversationState, Dependent, DependentId, MediaItem,
    MedicalAidProvider, MemberType, Order, OrderId, OrderStatus, PendingAttachment, Subject,
    SubjectId,
};
use remedi_db::repositories::{
    SqlAttachmentRepository, SqlConversationStateRepository, SqlOrderRepository,
    SqlPharmacyRepository, SqlSubjectRepository,
};
use remedi_db::{
    AttachmentRepository, ConversationStateRepository, DbPool, OrderRepository,
    PharmacyRepository, RepositoryError, SubjectRepository,
};

fn state_error(error: RepositoryError) -> StateError {
    match error {
        RepositoryError::Decode(detail) => StateError::Corrupt(detail),
        RepositoryError::Database(source) => StateError::Backend(source.to_string()),
    }
}

fn record_error(error: RepositoryError) -> RecordError {
    RecordError::Backend(error.to_string())
}

/// Conversation slot over the SQL repository; undecodable rows surface as
/// the corrupt-state condition the controller recovers from.
pub struct SqlStateStore {
    repo: SqlConversationStateRepository,
}

impl SqlStateStore {
    pub fn new(pool: DbPool) -> Self {
        Self { repo: SqlConversationStateRepository::new(pool) }
    }
}

#[async_trait]
impl StateStore for SqlStateStore {
    async fn load(&self, subject: &SubjectId) -> Result<Option<ConversationState>, StateError> {
        self.repo.load(subject).await.map_err(state_error)
    }

    async fn save(&self, state: &ConversationState) -> Result<(), StateError> {
        self.repo.save(state).await.map_err(state_error)
    }
}

pub struct SqlAttachmentStore {
    repo: SqlAttachmentRepository,
}

impl SqlAttachmentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { repo: SqlAttachmentRepository::new(pool) }
    }
}

#[async_trait]
impl AttachmentStore for SqlAttachmentStore {
    async fn append(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
        item: MediaItem,
    ) -> Result<AppendOutcome, StateError> {
        self.repo.append(subject, category, item).await.map_err(state_error)
    }

    async fn get(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
    ) -> Result<Option<PendingAttachment>, StateError> {
        self.repo.load(subject, category).await.map_err(state_error)
    }

    async fn delete(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
    ) -> Result<(), StateError> {
        self.repo.delete(subject, category).await.map_err(state_error)
    }
}

/// Record commits over the SQL repositories: profile finalization, order
/// creation, dependents, and the option lookups wizards snapshot at entry.
pub struct SqlRecordService {
    subjects: SqlSubjectRepository,
    orders: SqlOrderRepository,
    pharmacies: SqlPharmacyRepository,
}

impl SqlRecordService {
    pub fn new(pool: DbPool) -> Self {
        Self {
            subjects: SqlSubjectRepository::new(pool.clone()),
            orders: SqlOrderRepository::new(pool.clone()),
            pharmacies: SqlPharmacyRepository::new(pool),
        }
    }

    async fn next_dependent_number(&self, subject: &SubjectId) -> Result<String, RecordError> {
        let dependents = self.subjects.list_dependents(subject).await.map_err(record_error)?;
        let mut candidate = 1u32;
        loop {
            let number = format!("{candidate:02}");
            if dependents.iter().all(|dependent| dependent.dependent_number != number) {
                return Ok(number);
            }
            candidate += 1;
        }
    }
}

#[async_trait]
impl RecordService for SqlRecordService {
    async fn subject_status(&self, subject: &SubjectId) -> Result<SubjectStatus, RecordError> {
        match self.subjects.find_by_id(subject).await.map_err(record_error)? {
            None => Ok(SubjectStatus::Unknown),
            Some(subject) if subject.registration_complete => Ok(SubjectStatus::Registered),
            Some(_) => Ok(SubjectStatus::Unregistered),
        }
    }

    async fn pharmacy_options(&self) -> Result<Vec<String>, RecordError> {
        let pharmacies = self.pharmacies.list_all().await.map_err(record_error)?;
        Ok(pharmacies.iter().map(|pharmacy| pharmacy.label()).collect())
    }

    async fn address_options(&self, subject: &SubjectId) -> Result<Vec<String>, RecordError> {
        self.orders.distinct_addresses(subject).await.map_err(record_error)
    }

    async fn dependent_options(&self, subject: &SubjectId) -> Result<Vec<String>, RecordError> {
        let dependents = self.subjects.list_dependents(subject).await.map_err(record_error)?;
        Ok(dependents.iter().map(Dependent::label).collect())
    }

    async fn finalize_registration(
        &self,
        subject: &SubjectId,
        data: &RegistrationData,
    ) -> Result<(), RecordError> {
        let now = Utc::now();
        let created_at = match self.subjects.find_by_id(subject).await.map_err(record_error)? {
            Some(existing) => existing.created_at,
            None => now,
        };

        let record = Subject {
            id: subject.clone(),
            first_name: data
                .first_name
                .clone()
                .ok_or_else(|| RecordError::Rejected("first name missing".to_owned()))?,
            last_name: data
                .last_name
                .clone()
                .ok_or_else(|| RecordError::Rejected("last name missing".to_owned()))?,
            date_of_birth: data
                .date_of_birth
                .ok_or_else(|| RecordError::Rejected("date of birth missing".to_owned()))?,
            member_type: data.member_type.unwrap_or(MemberType::Principal),
            dependent_number: data
                .dependent_number
                .clone()
                .unwrap_or_else(|| PRINCIPAL_DEPENDENT_NUMBER.to_owned()),
            medical_aid_provider: data
                .medical_aid_provider
                .unwrap_or(MedicalAidProvider::PrivateClient),
            medical_aid_number: data.medical_aid_number.clone(),
            medical_aid_plan: data.medical_aid_plan.clone(),
            registration_complete: data.terms_accepted == Some(true),
            created_at,
            updated_at: now,
        };

        self.subjects.upsert(&record).await.map_err(record_error)
    }

    async fn finalize_order(
        &self,
        subject: &SubjectId,
        draft: &OrderDraft,
        attachments: Vec<MediaItem>,
    ) -> Result<OrderId, RecordError> {
        let order_type = draft
            .order_type
            .ok_or_else(|| RecordError::Rejected("order type missing".to_owned()))?;
        let delivery_method = draft
            .delivery_method
            .ok_or_else(|| RecordError::Rejected("delivery method missing".to_owned()))?;

        let order = Order {
            id: OrderId::generate(),
            subject_id: subject.clone(),
            order_type,
            refill_reference: draft.refill_reference.clone(),
            otc_items: draft.otc_items.clone(),
            delivery_method,
            pharmacy: draft.pharmacy.clone(),
            delivery_address: draft.resolved_address().map(str::to_owned),
            extra_notes: draft.extra_notes.clone(),
            attachment_count: attachments.len() as u32,
            status: OrderStatus::Placed,
            created_at: Utc::now(),
        };

        self.orders.save(&order).await.map_err(record_error)?;
        Ok(order.id)
    }

    async fn update_profile_field(
        &self,
        subject: &SubjectId,
        field: ProfileField,
        value: ProfileValue,
    ) -> Result<(), RecordError> {
        let mut record = self
            .subjects
            .find_by_id(subject)
            .await
            .map_err(record_error)?
            .ok_or_else(|| RecordError::Rejected(format!("unknown subject `{subject}`")))?;

        match (field, value) {
            (ProfileField::FirstName, ProfileValue::Text(value)) => record.first_name = value,
            (ProfileField::LastName, ProfileValue::Text(value)) => record.last_name = value,
            (ProfileField::DateOfBirth, ProfileValue::Date(value)) => record.date_of_birth = value,
            (ProfileField::MedicalAidNumber, ProfileValue::Text(value)) => {
                record.medical_aid_number = Some(value);
            }
            (field, _) => {
                return Err(RecordError::Rejected(format!(
                    "value shape does not match field `{}`",
                    field.label()
                )));
            }
        }
        record.updated_at = Utc::now();

        self.subjects.upsert(&record).await.map_err(record_error)
    }

    async fn add_dependent(
        &self,
        subject: &SubjectId,
        data: &DependentsData,
    ) -> Result<Dependent, RecordError> {
        let dependent = Dependent {
            id: DependentId::generate(),
            subject_id: subject.clone(),
            first_name: data
                .first_name
                .clone()
                .ok_or_else(|| RecordError::Rejected("dependent first name missing".to_owned()))?,
            last_name: data
                .last_name
                .clone()
                .ok_or_else(|| RecordError::Rejected("dependent last name missing".to_owned()))?,
            date_of_birth: data
                .date_of_birth
                .ok_or_else(|| RecordError::Rejected("dependent date of birth missing".to_owned()))?,
            dependent_number: self.next_dependent_number(subject).await?,
            created_at: Utc::now(),
        };

        self.subjects.add_dependent(&dependent).await.map_err(record_error)?;
        Ok(dependent)
    }

    async fn remove_dependent(
        &self,
        subject: &SubjectId,
        label: &str,
    ) -> Result<bool, RecordError> {
        let dependents = self.subjects.list_dependents(subject).await.map_err(record_error)?;
        let Some(target) = dependents.iter().find(|dependent| dependent.label() == label) else {
            return Ok(false);
        };
        self.subjects.remove_dependent(&target.id).await.map_err(record_error)
    }

    async fn list_dependents(&self, subject: &SubjectId) -> Result<Vec<Dependent>, RecordError> {
        self.subjects.list_dependents(subject).await.map_err(record_error)
    }
}
