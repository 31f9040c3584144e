pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod session;
pub mod wizard;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::media::{
    AppendOutcome, AttachmentCategory, MediaItem, PendingAttachment, ATTACHMENT_CAP,
};
pub use domain::order::{DeliveryMethod, Order, OrderId, OrderStatus, OrderType, Pharmacy};
pub use domain::subject::{
    Dependent, DependentId, MedicalAidProvider, MemberType, Subject, SubjectId,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use session::{ConversationState, FlowState, SessionPolicy, WizardProgress};
pub use wizard::{UserInput, ValidationError};
