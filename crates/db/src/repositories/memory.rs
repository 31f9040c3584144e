use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use remedi_core::{
    AppendOutcome, AttachmentCategory, ConversationState, Dependent, DependentId, MediaItem,
    Order, OrderId, PendingAttachment, Subject, SubjectId,
};

use super::{
    AttachmentRepository, ConversationStateRepository, OrderRepository, RepositoryError,
    SubjectRepository,
};

#[derive(Clone, Default)]
pub struct InMemoryConversationStateRepository {
    states: Arc<Mutex<HashMap<String, ConversationState>>>,
}

#[async_trait::async_trait]
impl ConversationStateRepository for InMemoryConversationStateRepository {
    async fn load(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<ConversationState>, RepositoryError> {
        Ok(self.states.lock().expect("state lock").get(&subject.0).cloned())
    }

    async fn save(&self, state: &ConversationState) -> Result<(), RepositoryError> {
        self.states
            .lock()
            .expect("state lock")
            .insert(state.subject_id.0.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, subject: &SubjectId) -> Result<(), RepositoryError> {
        self.states.lock().expect("state lock").remove(&subject.0);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemorySubjectRepository {
    subjects: Arc<Mutex<HashMap<String, Subject>>>,
    dependents: Arc<Mutex<Vec<Dependent>>>,
}

#[async_trait::async_trait]
impl SubjectRepository for InMemorySubjectRepository {
    async fn find_by_id(&self, id: &SubjectId) -> Result<Option<Subject>, RepositoryError> {
        Ok(self.subjects.lock().expect("subject lock").get(&id.0).cloned())
    }

    async fn upsert(&self, subject: &Subject) -> Result<(), RepositoryError> {
        self.subjects
            .lock()
            .expect("subject lock")
            .insert(subject.id.0.clone(), subject.clone());
        Ok(())
    }

    async fn list_dependents(
        &self,
        subject: &SubjectId,
    ) -> Result<Vec<Dependent>, RepositoryError> {
        let mut dependents: Vec<Dependent> = self
            .dependents
            .lock()
            .expect("dependent lock")
            .iter()
            .filter(|dependent| dependent.subject_id == *subject)
            .cloned()
            .collect();
        dependents.sort_by(|a, b| a.dependent_number.cmp(&b.dependent_number));
        Ok(dependents)
    }

    async fn add_dependent(&self, dependent: &Dependent) -> Result<(), RepositoryError> {
        self.dependents.lock().expect("dependent lock").push(dependent.clone());
        Ok(())
    }

    async fn remove_dependent(&self, id: &DependentId) -> Result<bool, RepositoryError> {
        let mut dependents = self.dependents.lock().expect("dependent lock");
        let before = dependents.len();
        dependents.retain(|dependent| dependent.id != *id);
        Ok(dependents.len() < before)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<Mutex<Vec<Order>>>,
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn save(&self, order: &Order) -> Result<(), RepositoryError> {
        self.orders.lock().expect("order lock").push(order.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .orders
            .lock()
            .expect("order lock")
            .iter()
            .find(|order| order.id == *id)
            .cloned())
    }

    async fn list_for_subject(&self, subject: &SubjectId) -> Result<Vec<Order>, RepositoryError> {
        let mut orders: Vec<Order> = self
            .orders
            .lock()
            .expect("order lock")
            .iter()
            .filter(|order| order.subject_id == *subject)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn distinct_addresses(
        &self,
        subject: &SubjectId,
    ) -> Result<Vec<String>, RepositoryError> {
        let orders = self.list_for_subject(subject).await?;
        let mut seen = Vec::new();
        for order in orders {
            if let Some(address) = order.delivery_address {
                if !seen.contains(&address) {
                    seen.push(address);
                }
            }
        }
        Ok(seen)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAttachmentRepository {
    aggregates: Arc<Mutex<HashMap<(String, AttachmentCategory), PendingAttachment>>>,
}

#[async_trait::async_trait]
impl AttachmentRepository for InMemoryAttachmentRepository {
    async fn load(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
    ) -> Result<Option<PendingAttachment>, RepositoryError> {
        Ok(self
            .aggregates
            .lock()
            .expect("attachment lock")
            .get(&(subject.0.clone(), category))
            .cloned())
    }

    async fn append(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
        item: MediaItem,
    ) -> Result<AppendOutcome, RepositoryError> {
        let mut aggregates = self.aggregates.lock().expect("attachment lock");
        let pending = aggregates
            .entry((subject.0.clone(), category))
            .or_insert_with(|| PendingAttachment::new(subject.clone(), category, Utc::now()));
        Ok(pending.append(item))
    }

    async fn delete(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
    ) -> Result<(), RepositoryError> {
        self.aggregates.lock().expect("attachment lock").remove(&(subject.0.clone(), category));
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut aggregates = self.aggregates.lock().expect("attachment lock");
        let before = aggregates.len();
        aggregates.retain(|_, pending| pending.created_at >= cutoff);
        Ok((before - aggregates.len()) as u64)
    }
}
