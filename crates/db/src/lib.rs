pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{seed_pharmacies, verify_seeds, SeedResult, VerificationResult};
pub use repositories::{
    AttachmentRepository, ConversationStateRepository, OrderRepository, PharmacyRepository,
    RepositoryError, SubjectRepository,
};
