//! Messaging-provider boundary and the conversational flow controller.
//!
//! - **Events** (`events`) - inbound webhook event shapes and the literal
//!   back/cancel commands
//! - **Prompts** (`prompts`) - outbound text and quick-reply messages
//! - **Outbound** (`outbound`) - the provider send API behind `PromptSender`
//! - **Media** (`media`) - resolve-and-download contract for image uploads
//! - **Controller** (`controller`) - the stateful wizard engine driving
//!   registration, ordering, profile edits, and dependents
//!
//! # Key Types
//!
//! - `SessionController` - per-subject serialized turn processing
//! - `StateStore` / `RecordService` / `AttachmentStore` - service seams the
//!   server wires to the database crate
//! - `InMemoryHarness` - full in-memory wiring for tests and smoke checks

pub mod controller;
pub mod events;
pub mod media;
pub mod outbound;
pub mod prompts;

pub use controller::{
    in_memory_harness, AttachmentStore, InMemoryAttachmentStore, InMemoryHarness,
    InMemoryRecordService, InMemoryStateStore, RecordError, RecordService, SessionController,
    StateError, StateStore, SubjectStatus, TurnError, TurnOutcome,
};
pub use events::{ControlCommand, EventContext, InboundEnvelope, InboundEvent, InboundEventKind};
pub use media::{FixedMediaResolver, HttpMediaResolver, MediaError, MediaResolver, NoopMediaResolver};
pub use outbound::{HttpPromptSender, NoopPromptSender, PromptSender, RecordingPromptSender, SendError};
pub use prompts::OutboundPrompt;
