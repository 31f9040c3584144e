use chrono::{Duration, NaiveDate, Utc};

use remedi_core::session::{FlowState, WizardProgress};
use remedi_core::wizard::registration::{RegistrationData, Step as RegStep};
use remedi_core::{
    AppendOutcome, AttachmentCategory, ConversationState, DeliveryMethod, Dependent, DependentId,
    MediaItem, MedicalAidProvider, MemberType, Order, OrderId, OrderStatus, OrderType, Subject,
    SubjectId, ATTACHMENT_CAP,
};

use remedi_db::repositories::{
    AttachmentRepository, ConversationStateRepository, OrderRepository, PharmacyRepository,
    SqlAttachmentRepository, SqlConversationStateRepository, SqlOrderRepository,
    SqlPharmacyRepository, SqlSubjectRepository, SubjectRepository,
};
use remedi_db::{connect_with_settings, migrations, seed_pharmacies, DbPool};

async fn pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");
    pool
}

fn subject_id() -> SubjectId {
    SubjectId("27820000001".to_owned())
}

fn subject_fixture() -> Subject {
    let now = Utc::now();
    Subject {
        id: subject_id(),
        first_name: "Naledi".to_owned(),
        last_name: "Mokoena".to_owned(),
        date_of_birth: NaiveDate::from_ymd_opt(1987, 3, 21).expect("valid date"),
        member_type: MemberType::Principal,
        dependent_number: "00".to_owned(),
        medical_aid_provider: MedicalAidProvider::Bonitas,
        medical_aid_number: Some("BON-4411".to_owned()),
        medical_aid_plan: Some("BonComprehensive".to_owned()),
        registration_complete: true,
        created_at: now,
        updated_at: now,
    }
}

fn jpeg() -> MediaItem {
    MediaItem { content_type: "image/jpeg".to_owned(), bytes: vec![0xFF, 0xD8, 0xFF, 0xE0] }
}

#[tokio::test]
async fn conversation_state_round_trips_with_mid_wizard_progress() {
    let pool = pool().await;
    let repo = SqlConversationStateRepository::new(pool.clone());

    let state = ConversationState {
        subject_id: subject_id(),
        flow: FlowState::Registration(WizardProgress::new(
            RegStep::MedicalAidProvider,
            RegistrationData {
                first_name: Some("Naledi".to_owned()),
                last_name: Some("Mokoena".to_owned()),
                member_type: Some(MemberType::Principal),
                dependent_number: Some("00".to_owned()),
                ..RegistrationData::default()
            },
        )),
        updated_at: Utc::now(),
    };

    repo.save(&state).await.expect("save");
    let loaded = repo.load(&subject_id()).await.expect("load").expect("present");
    assert_eq!(loaded.flow, state.flow);

    // A second save for the same subject replaces the slot.
    let mut idle = state.clone();
    idle.flow = FlowState::Idle;
    repo.save(&idle).await.expect("overwrite");
    let replaced = repo.load(&subject_id()).await.expect("load").expect("present");
    assert!(replaced.is_idle());

    repo.delete(&subject_id()).await.expect("delete");
    assert!(repo.load(&subject_id()).await.expect("load").is_none());

    pool.close().await;
}

#[tokio::test]
async fn hand_corrupted_flow_documents_surface_as_decode_errors() {
    let pool = pool().await;
    let repo = SqlConversationStateRepository::new(pool.clone());

    sqlx::query(
        "INSERT INTO conversation_state (subject_id, flow, updated_at) VALUES (?, ?, ?)",
    )
    .bind(&subject_id().0)
    .bind("{\"flow\":\"loyalty_signup\"}")
    .bind(Utc::now().to_rfc3339())
    .execute(&pool)
    .await
    .expect("insert raw row");

    let result = repo.load(&subject_id()).await;
    assert!(matches!(result, Err(remedi_db::RepositoryError::Decode(_))));

    pool.close().await;
}

#[tokio::test]
async fn subject_upsert_and_dependents_round_trip() {
    let pool = pool().await;
    let repo = SqlSubjectRepository::new(pool.clone());

    let subject = subject_fixture();
    repo.upsert(&subject).await.expect("insert");

    let mut renamed = subject.clone();
    renamed.first_name = "Thandi".to_owned();
    repo.upsert(&renamed).await.expect("update");

    let loaded = repo.find_by_id(&subject.id).await.expect("find").expect("present");
    assert_eq!(loaded.first_name, "Thandi");
    assert_eq!(loaded.medical_aid_provider, MedicalAidProvider::Bonitas);
    assert!(loaded.registration_complete);

    let dependent = Dependent {
        id: DependentId("DEP-test-1".to_owned()),
        subject_id: subject.id.clone(),
        first_name: "Lwazi".to_owned(),
        last_name: "Mokoena".to_owned(),
        date_of_birth: NaiveDate::from_ymd_opt(2012, 2, 2).expect("valid date"),
        dependent_number: "01".to_owned(),
        created_at: Utc::now(),
    };
    repo.add_dependent(&dependent).await.expect("add dependent");

    let dependents = repo.list_dependents(&subject.id).await.expect("list");
    assert_eq!(dependents.len(), 1);
    assert_eq!(dependents[0].label(), "Lwazi Mokoena (01)");

    assert!(repo.remove_dependent(&dependent.id).await.expect("remove"));
    assert!(!repo.remove_dependent(&dependent.id).await.expect("second remove is a no-op"));

    pool.close().await;
}

#[tokio::test]
async fn orders_persist_and_feed_the_address_history() {
    let pool = pool().await;
    let repo = SqlOrderRepository::new(pool.clone());

    let first = Order {
        id: OrderId("ORD-test-1".to_owned()),
        subject_id: subject_id(),
        order_type: OrderType::Refill,
        refill_reference: Some("ORD-2026-0413".to_owned()),
        otc_items: None,
        delivery_method: DeliveryMethod::Delivery,
        pharmacy: None,
        delivery_address: Some("12 Kloof St, Gardens".to_owned()),
        extra_notes: None,
        attachment_count: 0,
        status: OrderStatus::Placed,
        created_at: Utc::now() - Duration::days(7),
    };
    let second = Order {
        id: OrderId("ORD-test-2".to_owned()),
        order_type: OrderType::OverTheCounter,
        refill_reference: None,
        otc_items: Some("vitamin c".to_owned()),
        delivery_address: Some("3 Main Rd, Observatory".to_owned()),
        created_at: Utc::now(),
        ..first.clone()
    };

    repo.save(&first).await.expect("save first");
    repo.save(&second).await.expect("save second");

    let loaded = repo.find_by_id(&first.id).await.expect("find").expect("present");
    assert_eq!(loaded.refill_reference.as_deref(), Some("ORD-2026-0413"));

    let orders = repo.list_for_subject(&subject_id()).await.expect("list");
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].id, second.id, "most recent first");

    let addresses = repo.distinct_addresses(&subject_id()).await.expect("addresses");
    assert_eq!(
        addresses,
        vec!["3 Main Rd, Observatory".to_owned(), "12 Kloof St, Gardens".to_owned()]
    );

    pool.close().await;
}

#[tokio::test]
async fn attachment_aggregate_enforces_the_cap_and_sweeps_by_age() {
    let pool = pool().await;
    let repo = SqlAttachmentRepository::new(pool.clone());
    let subject = subject_id();

    assert!(repo
        .load(&subject, AttachmentCategory::Prescription)
        .await
        .expect("load")
        .is_none());

    for expected in 1..=ATTACHMENT_CAP {
        let outcome = repo
            .append(&subject, AttachmentCategory::Prescription, jpeg())
            .await
            .expect("append");
        assert_eq!(outcome, AppendOutcome::Appended { count: expected });
    }

    let outcome = repo
        .append(&subject, AttachmentCategory::Prescription, jpeg())
        .await
        .expect("append at cap");
    assert_eq!(outcome, AppendOutcome::Rejected);

    let pending = repo
        .load(&subject, AttachmentCategory::Prescription)
        .await
        .expect("load")
        .expect("present");
    assert_eq!(pending.len(), ATTACHMENT_CAP);
    assert!(pending.is_full());

    // A cutoff in the past removes nothing; one in the future sweeps it.
    let kept = repo.delete_older_than(Utc::now() - Duration::minutes(30)).await.expect("sweep");
    assert_eq!(kept, 0);
    let swept = repo.delete_older_than(Utc::now() + Duration::minutes(1)).await.expect("sweep");
    assert_eq!(swept, 1);
    assert!(repo
        .load(&subject, AttachmentCategory::Prescription)
        .await
        .expect("load")
        .is_none());

    // Deleting an already-absent aggregate is idempotent.
    repo.delete(&subject, AttachmentCategory::Prescription).await.expect("delete");

    pool.close().await;
}

#[tokio::test]
async fn pharmacy_directory_lists_seeded_entries() {
    let pool = pool().await;
    seed_pharmacies(&pool).await.expect("seed");

    let repo = SqlPharmacyRepository::new(pool.clone());
    let pharmacies = repo.list_all().await.expect("list");

    assert_eq!(pharmacies.len(), 5);
    assert!(pharmacies.iter().any(|pharmacy| pharmacy.label() == "CityMed (CBD)"));

    pool.close().await;
}
