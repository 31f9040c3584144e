use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use remedi_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
use remedi_core::session::{ConversationState, FlowState, SessionPolicy, WizardProgress};
use remedi_core::wizard::dependents::{DependentAction, DependentsData, DependentsWizard};
use remedi_core::wizard::order::{OrderDraft, OrderWizard, IMAGES_DONE_LABEL};
use remedi_core::wizard::profile::{ProfileField, ProfileValue, ProfileWizard};
use remedi_core::wizard::registration::{RegistrationData, RegistrationWizard};
use remedi_core::wizard::step::Expect;
use remedi_core::wizard::{
    advance, ensure_allowed_media_type, entry_step, retreat, validate, Backward, FieldValue,
    Forward, NavigationError, UserInput, ValidationError, Wizard,
};
use remedi_core::{
    AppendOutcome, AttachmentCategory, Dependent, DependentId, MediaItem, OrderId,
    PendingAttachment, SubjectId, ATTACHMENT_CAP,
};

use crate::events::{ControlCommand, EventContext, InboundEnvelope, InboundEvent};
use crate::media::MediaResolver;
use crate::outbound::PromptSender;
use crate::prompts::{self, OutboundPrompt};

const ACTOR: &str = "flow-controller";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The persisted row no longer decodes into a known flow. Recovered by
    /// resetting the subject to Idle with a generic notice.
    #[error("persisted conversation state is corrupt: {0}")]
    Corrupt(String),
    #[error("state backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record backend failure: {0}")]
    Backend(String),
    #[error("commit rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    State(StateError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Navigation(#[from] NavigationError),
}

/// What a turn amounted to, for logging and tests. Prompts themselves travel
/// through the `PromptSender`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// A wizard asked (or re-asked) a question.
    Prompted,
    /// A wizard reached its commit path.
    Completed,
    /// The Confirm step declined; the draft was discarded.
    Cancelled,
    /// The subject backed out of the first step, or cancelled mid-flow.
    Exited,
    /// The idle menu (or help) was served.
    Menu,
    /// The session exceeded its idle window and was reset.
    TimedOut,
    /// Corrupt persisted state was replaced with a fresh idle slot.
    Recovered,
}

/// Persistence seam for the conversation slot.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, subject: &SubjectId) -> Result<Option<ConversationState>, StateError>;
    async fn save(&self, state: &ConversationState) -> Result<(), StateError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubjectStatus {
    /// Never seen before: first contact.
    Unknown,
    /// A row exists but registration never completed.
    Unregistered,
    Registered,
}

/// Commit seam into the permanent records, plus the option lookups wizards
/// snapshot at entry.
#[async_trait]
pub trait RecordService: Send + Sync {
    async fn subject_status(&self, subject: &SubjectId) -> Result<SubjectStatus, RecordError>;
    async fn pharmacy_options(&self) -> Result<Vec<String>, RecordError>;
    async fn address_options(&self, subject: &SubjectId) -> Result<Vec<String>, RecordError>;
    async fn dependent_options(&self, subject: &SubjectId) -> Result<Vec<String>, RecordError>;
    async fn finalize_registration(
        &self,
        subject: &SubjectId,
        data: &RegistrationData,
    ) -> Result<(), RecordError>;
    async fn finalize_order(
        &self,
        subject: &SubjectId,
        draft: &OrderDraft,
        attachments: Vec<MediaItem>,
    ) -> Result<OrderId, RecordError>;
    async fn update_profile_field(
        &self,
        subject: &SubjectId,
        field: ProfileField,
        value: ProfileValue,
    ) -> Result<(), RecordError>;
    async fn add_dependent(
        &self,
        subject: &SubjectId,
        data: &DependentsData,
    ) -> Result<Dependent, RecordError>;
    async fn remove_dependent(
        &self,
        subject: &SubjectId,
        label: &str,
    ) -> Result<bool, RecordError>;
    async fn list_dependents(&self, subject: &SubjectId) -> Result<Vec<Dependent>, RecordError>;
}

/// Ephemeral aggregate seam. An aggregate may vanish between steps (the
/// external sweep owns deletion by age); `get` returning `None` means empty,
/// never an error.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn append(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
        item: MediaItem,
    ) -> Result<AppendOutcome, StateError>;
    async fn get(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
    ) -> Result<Option<PendingAttachment>, StateError>;
    async fn delete(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
    ) -> Result<(), StateError>;
}

enum StepEval<S> {
    Invalid(ValidationError),
    Moved(S),
    Completed,
}

/// Validate the input against the current step, write the value, and resolve
/// the next step. Pure except for the data mutation; persisting and
/// messaging stay with the controller.
fn eval_step<W: Wizard + 'static>(
    wizard: &W,
    progress: &mut WizardProgress<W::Step, W::Data>,
    input: &UserInput,
    today: NaiveDate,
) -> Result<StepEval<W::Step>, TurnError> {
    let def = wizard
        .find(progress.step)
        .ok_or_else(|| NavigationError::UnknownStep(format!("{:?}", progress.step)))?;

    match validate(&def.expect, &progress.data, input, today) {
        Err(error) => Ok(StepEval::Invalid(error)),
        Ok(value) => {
            (def.apply)(&mut progress.data, value);
            match advance(wizard, &mut progress.data, progress.step)? {
                Forward::Step(next) => {
                    progress.step = next;
                    Ok(StepEval::Moved(next))
                }
                Forward::Complete => Ok(StepEval::Completed),
            }
        }
    }
}

fn is_images_done(input: &UserInput) -> bool {
    match input {
        UserInput::Text(body) => body.trim().eq_ignore_ascii_case(IMAGES_DONE_LABEL),
        UserInput::Choice(label) => label == IMAGES_DONE_LABEL,
        UserInput::Image { .. } => false,
    }
}

/// The flow controller: loads the conversation slot, routes one inbound
/// event through the active wizard (or the idle menu), persists the mutated
/// state, and only then emits side effects. Turns are serialized per subject
/// so concurrent double-delivery cannot lose a mutation; distinct subjects
/// proceed in parallel.
pub struct SessionController<S, R, A, M, P> {
    states: S,
    records: R,
    attachments: A,
    media: M,
    sender: P,
    policy: SessionPolicy,
    audit: Arc<dyn AuditSink>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<S, R, A, M, P> SessionController<S, R, A, M, P>
where
    S: StateStore,
    R: RecordService,
    A: AttachmentStore,
    M: MediaResolver,
    P: PromptSender,
{
    pub fn new(
        states: S,
        records: R,
        attachments: A,
        media: M,
        sender: P,
        policy: SessionPolicy,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { states, records, attachments, media, sender, policy, audit, locks: DashMap::new() }
    }

    pub async fn handle(
        &self,
        envelope: &InboundEnvelope,
        ctx: &EventContext,
    ) -> Result<TurnOutcome, TurnError> {
        let lock = self.subject_lock(&envelope.subject_id);
        let _guard = lock.lock().await;
        self.handle_serialized(envelope, ctx).await
    }

    fn subject_lock(&self, subject: &SubjectId) -> Arc<Mutex<()>> {
        self.locks
            .entry(subject.0.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn handle_serialized(
        &self,
        envelope: &InboundEnvelope,
        ctx: &EventContext,
    ) -> Result<TurnOutcome, TurnError> {
        let now = Utc::now();
        let subject = &envelope.subject_id;

        self.emit(ctx, subject, "chat.event_received", AuditCategory::Ingress, AuditOutcome::Success);

        let state = match self.states.load(subject).await {
            Ok(Some(state)) => state,
            Ok(None) => ConversationState::idle(subject.clone(), now),
            Err(StateError::Corrupt(detail)) => {
                warn!(
                    event_name = "session.state_corrupt",
                    correlation_id = %ctx.correlation_id,
                    subject_id = %subject,
                    detail = %detail,
                    "resetting undecodable conversation state"
                );
                return self.recover_corrupt_state(subject, ctx, now).await;
            }
            Err(error) => return Err(TurnError::State(error)),
        };

        if !state.is_idle() && self.policy.expired(state.updated_at, now) {
            return self.timeout_turn(state, ctx, now).await;
        }

        if !state.is_idle() {
            match ControlCommand::parse(&envelope.event) {
                Some(ControlCommand::Cancel) => return self.cancel_turn(state, ctx, now).await,
                Some(ControlCommand::Back) => return self.back_turn(state, ctx, now).await,
                None => {}
            }
        }

        let input = envelope.event.as_user_input();
        match state.flow.clone() {
            FlowState::Idle => self.idle_turn(state, &envelope.event, ctx, now).await,
            FlowState::Registration(progress) => {
                self.registration_turn(state, progress, input, ctx, now).await
            }
            FlowState::PlaceOrder(progress) => {
                self.order_turn(state, progress, input, ctx, now).await
            }
            FlowState::EditProfile(progress) => {
                self.profile_turn(state, progress, input, ctx, now).await
            }
            FlowState::ManageDependents(progress) => {
                self.dependents_turn(state, progress, input, ctx, now).await
            }
        }
    }

    async fn recover_corrupt_state(
        &self,
        subject: &SubjectId,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        self.discard_attachments(subject).await;
        let fresh = ConversationState::idle(subject.clone(), now);
        self.states.save(&fresh).await.map_err(TurnError::State)?;
        self.send(subject, prompts::apology()).await;
        self.send(subject, prompts::home_menu()).await;
        self.emit(ctx, subject, "session.recovered", AuditCategory::System, AuditOutcome::Failed);
        Ok(TurnOutcome::Recovered)
    }

    async fn timeout_turn(
        &self,
        mut state: ConversationState,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let subject = state.subject_id.clone();
        self.discard_attachments(&subject).await;
        state.reset(now);
        self.states.save(&state).await.map_err(TurnError::State)?;
        self.send(&subject, prompts::timeout_notice()).await;
        self.send(&subject, prompts::home_menu()).await;
        self.emit(ctx, &subject, "session.timed_out", AuditCategory::Wizard, AuditOutcome::Success);
        Ok(TurnOutcome::TimedOut)
    }

    async fn cancel_turn(
        &self,
        mut state: ConversationState,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let subject = state.subject_id.clone();
        self.discard_attachments(&subject).await;
        state.reset(now);
        self.states.save(&state).await.map_err(TurnError::State)?;
        self.send(&subject, prompts::home_menu()).await;
        self.emit(ctx, &subject, "session.cancelled", AuditCategory::Wizard, AuditOutcome::Success);
        Ok(TurnOutcome::Exited)
    }

    async fn back_turn(
        &self,
        state: ConversationState,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        match state.flow.clone() {
            FlowState::Idle => {
                self.send(&state.subject_id, prompts::home_menu()).await;
                Ok(TurnOutcome::Menu)
            }
            FlowState::Registration(mut progress) => {
                match retreat(&RegistrationWizard, &mut progress.data, progress.step)? {
                    Backward::Step(step) => {
                        progress.step = step;
                        self.persist_and_prompt(
                            state,
                            &RegistrationWizard,
                            progress,
                            FlowState::Registration,
                            now,
                        )
                        .await
                    }
                    Backward::Exit => self.exit_to_menu(state, ctx, now).await,
                }
            }
            FlowState::PlaceOrder(mut progress) => {
                match retreat(&OrderWizard, &mut progress.data, progress.step)? {
                    Backward::Step(step) => {
                        progress.step = step;
                        let images_step = OrderWizard
                            .find(step)
                            .map_or(false, |def| matches!(def.expect, Expect::Images));
                        if images_step {
                            // Re-entering the upload step restarts collection.
                            self.discard_attachments(&state.subject_id).await;
                        }
                        self.persist_and_prompt(
                            state,
                            &OrderWizard,
                            progress,
                            FlowState::PlaceOrder,
                            now,
                        )
                        .await
                    }
                    Backward::Exit => {
                        self.discard_attachments(&state.subject_id).await;
                        self.exit_to_menu(state, ctx, now).await
                    }
                }
            }
            FlowState::EditProfile(mut progress) => {
                match retreat(&ProfileWizard, &mut progress.data, progress.step)? {
                    Backward::Step(step) => {
                        progress.step = step;
                        self.persist_and_prompt(
                            state,
                            &ProfileWizard,
                            progress,
                            FlowState::EditProfile,
                            now,
                        )
                        .await
                    }
                    Backward::Exit => self.exit_to_menu(state, ctx, now).await,
                }
            }
            FlowState::ManageDependents(mut progress) => {
                match retreat(&DependentsWizard, &mut progress.data, progress.step)? {
                    Backward::Step(step) => {
                        progress.step = step;
                        self.persist_and_prompt(
                            state,
                            &DependentsWizard,
                            progress,
                            FlowState::ManageDependents,
                            now,
                        )
                        .await
                    }
                    Backward::Exit => self.exit_to_menu(state, ctx, now).await,
                }
            }
        }
    }

    async fn exit_to_menu(
        &self,
        mut state: ConversationState,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let subject = state.subject_id.clone();
        state.reset(now);
        self.states.save(&state).await.map_err(TurnError::State)?;
        self.send(&subject, prompts::home_menu()).await;
        self.emit(ctx, &subject, "wizard.exited", AuditCategory::Wizard, AuditOutcome::Success);
        Ok(TurnOutcome::Exited)
    }

    async fn idle_turn(
        &self,
        state: ConversationState,
        event: &InboundEvent,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let subject = state.subject_id.clone();
        let status = self.records.subject_status(&subject).await?;
        if status != SubjectStatus::Registered {
            return self.enter_registration(state, ctx, now).await;
        }

        let selection = match event {
            InboundEvent::Text { body } => body.trim(),
            InboundEvent::InteractiveChoice { chosen_label } => chosen_label.as_str(),
            InboundEvent::Image { .. } => "",
        };

        if selection.eq_ignore_ascii_case(prompts::MENU_PLACE_ORDER) {
            self.enter_order(state, ctx, now).await
        } else if selection.eq_ignore_ascii_case(prompts::MENU_EDIT_PROFILE) {
            self.enter_profile(state, ctx, now).await
        } else if selection.eq_ignore_ascii_case(prompts::MENU_DEPENDENTS) {
            self.enter_dependents(state, ctx, now).await
        } else if selection.eq_ignore_ascii_case(prompts::MENU_HELP) {
            self.send(&subject, prompts::help_message()).await;
            self.send(&subject, prompts::home_menu()).await;
            Ok(TurnOutcome::Menu)
        } else {
            self.send(&subject, prompts::home_menu()).await;
            Ok(TurnOutcome::Menu)
        }
    }

    async fn enter_registration(
        &self,
        mut state: ConversationState,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let subject = state.subject_id.clone();
        let mut data = RegistrationData::default();
        let Forward::Step(step) = entry_step(&RegistrationWizard, &mut data) else {
            self.send(&subject, prompts::home_menu()).await;
            return Ok(TurnOutcome::Menu);
        };
        let def = RegistrationWizard
            .find(step)
            .ok_or_else(|| NavigationError::UnknownStep(format!("{step:?}")))?;
        let prompt = prompts::render_step(def, &data);

        state.flow = FlowState::Registration(WizardProgress::new(step, data));
        state.touch(now);
        self.states.save(&state).await.map_err(TurnError::State)?;

        self.send(&subject, prompts::welcome()).await;
        self.send(&subject, prompt).await;
        self.emit(ctx, &subject, "wizard.started", AuditCategory::Wizard, AuditOutcome::Success);
        Ok(TurnOutcome::Prompted)
    }

    async fn enter_order(
        &self,
        state: ConversationState,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let subject = state.subject_id.clone();
        let pharmacy_options = self.records.pharmacy_options().await?;
        let address_options = self.records.address_options(&subject).await?;
        let mut draft = OrderDraft { pharmacy_options, address_options, ..OrderDraft::default() };

        let Forward::Step(step) = entry_step(&OrderWizard, &mut draft) else {
            self.send(&subject, prompts::home_menu()).await;
            return Ok(TurnOutcome::Menu);
        };
        self.emit(ctx, &subject, "wizard.started", AuditCategory::Wizard, AuditOutcome::Success);
        self.persist_and_prompt(
            state,
            &OrderWizard,
            WizardProgress::new(step, draft),
            FlowState::PlaceOrder,
            now,
        )
        .await
    }

    async fn enter_profile(
        &self,
        state: ConversationState,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let subject = state.subject_id.clone();
        let mut data = remedi_core::wizard::profile::ProfileEdit::default();
        let Forward::Step(step) = entry_step(&ProfileWizard, &mut data) else {
            self.send(&subject, prompts::home_menu()).await;
            return Ok(TurnOutcome::Menu);
        };
        self.emit(ctx, &subject, "wizard.started", AuditCategory::Wizard, AuditOutcome::Success);
        self.persist_and_prompt(
            state,
            &ProfileWizard,
            WizardProgress::new(step, data),
            FlowState::EditProfile,
            now,
        )
        .await
    }

    async fn enter_dependents(
        &self,
        state: ConversationState,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let subject = state.subject_id.clone();
        let dependent_options = self.records.dependent_options(&subject).await?;
        let mut data = DependentsData { dependent_options, ..DependentsData::default() };
        let Forward::Step(step) = entry_step(&DependentsWizard, &mut data) else {
            self.send(&subject, prompts::home_menu()).await;
            return Ok(TurnOutcome::Menu);
        };
        self.emit(ctx, &subject, "wizard.started", AuditCategory::Wizard, AuditOutcome::Success);
        self.persist_and_prompt(
            state,
            &DependentsWizard,
            WizardProgress::new(step, data),
            FlowState::ManageDependents,
            now,
        )
        .await
    }

    async fn registration_turn(
        &self,
        state: ConversationState,
        mut progress: WizardProgress<
            remedi_core::wizard::registration::Step,
            RegistrationData,
        >,
        input: UserInput,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let subject = state.subject_id.clone();
        match eval_step(&RegistrationWizard, &mut progress, &input, now.date_naive())? {
            StepEval::Invalid(error) => {
                self.emit(ctx, &subject, "wizard.input_rejected", AuditCategory::Wizard, AuditOutcome::Rejected);
                self.reprompt(&subject, &RegistrationWizard, &progress, &error).await;
                Ok(TurnOutcome::Prompted)
            }
            StepEval::Moved(_) => {
                self.emit(ctx, &subject, "wizard.step_advanced", AuditCategory::Wizard, AuditOutcome::Success);
                self.persist_and_prompt(
                    state,
                    &RegistrationWizard,
                    progress,
                    FlowState::Registration,
                    now,
                )
                .await
            }
            StepEval::Completed => {
                let mut state = state;
                state.reset(now);
                self.states.save(&state).await.map_err(TurnError::State)?;
                self.records.finalize_registration(&subject, &progress.data).await?;
                let first_name = progress.data.first_name.as_deref().unwrap_or("there");
                self.send(&subject, prompts::registration_complete(first_name)).await;
                self.send(&subject, prompts::home_menu()).await;
                self.emit(ctx, &subject, "registration.finalized", AuditCategory::Commit, AuditOutcome::Success);
                Ok(TurnOutcome::Completed)
            }
        }
    }

    async fn order_turn(
        &self,
        state: ConversationState,
        mut progress: WizardProgress<remedi_core::wizard::order::Step, OrderDraft>,
        input: UserInput,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let subject = state.subject_id.clone();
        let def = OrderWizard
            .find(progress.step)
            .ok_or_else(|| NavigationError::UnknownStep(format!("{:?}", progress.step)))?;

        if matches!(def.expect, Expect::Images) {
            return self.order_images_turn(state, progress, input, ctx, now).await;
        }

        match eval_step(&OrderWizard, &mut progress, &input, now.date_naive())? {
            StepEval::Invalid(error) => {
                self.emit(ctx, &subject, "wizard.input_rejected", AuditCategory::Wizard, AuditOutcome::Rejected);
                self.reprompt(&subject, &OrderWizard, &progress, &error).await;
                Ok(TurnOutcome::Prompted)
            }
            StepEval::Moved(_) => {
                self.emit(ctx, &subject, "wizard.step_advanced", AuditCategory::Wizard, AuditOutcome::Success);
                self.persist_and_prompt(state, &OrderWizard, progress, FlowState::PlaceOrder, now)
                    .await
            }
            StepEval::Completed => self.order_complete(state, progress, ctx, now).await,
        }
    }

    async fn order_images_turn(
        &self,
        mut state: ConversationState,
        progress: WizardProgress<remedi_core::wizard::order::Step, OrderDraft>,
        input: UserInput,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let subject = state.subject_id.clone();

        if is_images_done(&input) {
            let count = self.attachment_count(&subject).await;
            if count == 0 {
                let error = ValidationError::ExpectedImage;
                self.reprompt(&subject, &OrderWizard, &progress, &error).await;
                return Ok(TurnOutcome::Prompted);
            }
            return self.finish_images(state, progress, count, ctx, now).await;
        }

        let (media_ref, mime_type) = match &input {
            UserInput::Image { media_ref, mime_type } => (media_ref, mime_type),
            _ => {
                let error = ValidationError::ExpectedImage;
                self.reprompt(&subject, &OrderWizard, &progress, &error).await;
                return Ok(TurnOutcome::Prompted);
            }
        };

        let item = match self.fetch_media(media_ref, mime_type).await {
            Ok(item) => item,
            Err(error) => {
                self.emit(ctx, &subject, "wizard.input_rejected", AuditCategory::Wizard, AuditOutcome::Rejected);
                self.reprompt(&subject, &OrderWizard, &progress, &error).await;
                return Ok(TurnOutcome::Prompted);
            }
        };

        match self
            .attachments
            .append(&subject, AttachmentCategory::Prescription, item)
            .await
            .map_err(TurnError::State)?
        {
            AppendOutcome::Appended { count } if count >= ATTACHMENT_CAP => {
                self.finish_images(state, progress, count, ctx, now).await
            }
            AppendOutcome::Appended { count } => {
                state.touch(now);
                self.states.save(&state).await.map_err(TurnError::State)?;
                self.send(&subject, prompts::attachment_progress(count, ATTACHMENT_CAP)).await;
                Ok(TurnOutcome::Prompted)
            }
            AppendOutcome::Rejected => {
                // Aggregate already at the cap: commit what is there.
                let count = self.attachment_count(&subject).await;
                self.finish_images(state, progress, count.max(ATTACHMENT_CAP), ctx, now).await
            }
        }
    }

    async fn finish_images(
        &self,
        state: ConversationState,
        mut progress: WizardProgress<remedi_core::wizard::order::Step, OrderDraft>,
        count: usize,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let subject = state.subject_id.clone();
        let def = OrderWizard
            .find(progress.step)
            .ok_or_else(|| NavigationError::UnknownStep(format!("{:?}", progress.step)))?;
        (def.apply)(&mut progress.data, FieldValue::Attachments(count));

        match advance(&OrderWizard, &mut progress.data, progress.step)? {
            Forward::Step(next) => {
                progress.step = next;
                self.emit(ctx, &subject, "wizard.step_advanced", AuditCategory::Wizard, AuditOutcome::Success);
                self.persist_and_prompt(state, &OrderWizard, progress, FlowState::PlaceOrder, now)
                    .await
            }
            Forward::Complete => self.order_complete(state, progress, ctx, now).await,
        }
    }

    async fn order_complete(
        &self,
        mut state: ConversationState,
        progress: WizardProgress<remedi_core::wizard::order::Step, OrderDraft>,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let subject = state.subject_id.clone();
        state.reset(now);
        self.states.save(&state).await.map_err(TurnError::State)?;

        if progress.data.confirmed == Some(true) {
            let attachments = self.collect_attachments(&subject).await;
            let order_id =
                self.records.finalize_order(&subject, &progress.data, attachments).await?;
            self.discard_attachments(&subject).await;
            self.send(&subject, prompts::order_placed(&order_id)).await;
            self.send(&subject, prompts::home_menu()).await;
            self.emit(ctx, &subject, "order.finalized", AuditCategory::Commit, AuditOutcome::Success);
            Ok(TurnOutcome::Completed)
        } else {
            self.discard_attachments(&subject).await;
            self.send(&subject, prompts::order_cancelled()).await;
            self.send(&subject, prompts::home_menu()).await;
            self.emit(ctx, &subject, "order.discarded", AuditCategory::Commit, AuditOutcome::Rejected);
            Ok(TurnOutcome::Cancelled)
        }
    }

    async fn profile_turn(
        &self,
        state: ConversationState,
        mut progress: WizardProgress<
            remedi_core::wizard::profile::Step,
            remedi_core::wizard::profile::ProfileEdit,
        >,
        input: UserInput,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let subject = state.subject_id.clone();
        match eval_step(&ProfileWizard, &mut progress, &input, now.date_naive())? {
            StepEval::Invalid(error) => {
                self.reprompt(&subject, &ProfileWizard, &progress, &error).await;
                Ok(TurnOutcome::Prompted)
            }
            StepEval::Moved(_) => {
                self.persist_and_prompt(state, &ProfileWizard, progress, FlowState::EditProfile, now)
                    .await
            }
            StepEval::Completed => {
                let mut state = state;
                state.reset(now);
                self.states.save(&state).await.map_err(TurnError::State)?;
                match (progress.data.field, progress.data.value()) {
                    (Some(field), Some(value)) => {
                        self.records.update_profile_field(&subject, field, value).await?;
                        self.send(&subject, prompts::profile_updated(field.label())).await;
                        self.emit(ctx, &subject, "profile.updated", AuditCategory::Commit, AuditOutcome::Success);
                    }
                    _ => {
                        self.send(&subject, prompts::apology()).await;
                    }
                }
                self.send(&subject, prompts::home_menu()).await;
                Ok(TurnOutcome::Completed)
            }
        }
    }

    async fn dependents_turn(
        &self,
        state: ConversationState,
        mut progress: WizardProgress<remedi_core::wizard::dependents::Step, DependentsData>,
        input: UserInput,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let subject = state.subject_id.clone();
        match eval_step(&DependentsWizard, &mut progress, &input, now.date_naive())? {
            StepEval::Invalid(error) => {
                self.reprompt(&subject, &DependentsWizard, &progress, &error).await;
                Ok(TurnOutcome::Prompted)
            }
            StepEval::Moved(_) => {
                self.persist_and_prompt(
                    state,
                    &DependentsWizard,
                    progress,
                    FlowState::ManageDependents,
                    now,
                )
                .await
            }
            StepEval::Completed => {
                let mut state = state;
                state.reset(now);
                self.states.save(&state).await.map_err(TurnError::State)?;
                self.dependents_commit(&subject, &progress.data, ctx).await?;
                self.send(&subject, prompts::home_menu()).await;
                Ok(TurnOutcome::Completed)
            }
        }
    }

    async fn dependents_commit(
        &self,
        subject: &SubjectId,
        data: &DependentsData,
        ctx: &EventContext,
    ) -> Result<(), TurnError> {
        match data.action {
            Some(DependentAction::Add) => {
                let dependent = self.records.add_dependent(subject, data).await?;
                self.send(subject, prompts::dependent_added(&dependent)).await;
                self.emit(ctx, subject, "dependent.added", AuditCategory::Commit, AuditOutcome::Success);
            }
            Some(DependentAction::Remove) => match &data.selected {
                Some(label) => {
                    let removed = self.records.remove_dependent(subject, label).await?;
                    if removed {
                        self.send(subject, prompts::dependent_removed(label)).await;
                        self.emit(ctx, subject, "dependent.removed", AuditCategory::Commit, AuditOutcome::Success);
                    } else {
                        self.send(
                            subject,
                            OutboundPrompt::text("We couldn't find that dependent."),
                        )
                        .await;
                    }
                }
                None => {
                    self.send(
                        subject,
                        OutboundPrompt::text("You have no dependents to remove."),
                    )
                    .await;
                }
            },
            Some(DependentAction::List) | None => {
                let roster = self.records.list_dependents(subject).await?;
                self.send(subject, prompts::dependent_roster(&roster)).await;
            }
        }
        Ok(())
    }

    async fn persist_and_prompt<W: Wizard + 'static>(
        &self,
        mut state: ConversationState,
        wizard: &W,
        progress: WizardProgress<W::Step, W::Data>,
        wrap: fn(WizardProgress<W::Step, W::Data>) -> FlowState,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let subject = state.subject_id.clone();
        let def = wizard
            .find(progress.step)
            .ok_or_else(|| NavigationError::UnknownStep(format!("{:?}", progress.step)))?;
        let prompt = prompts::render_step(def, &progress.data);

        state.flow = wrap(progress);
        state.touch(now);
        self.states.save(&state).await.map_err(TurnError::State)?;
        self.send(&subject, prompt).await;
        Ok(TurnOutcome::Prompted)
    }

    async fn reprompt<W: Wizard + 'static>(
        &self,
        subject: &SubjectId,
        wizard: &W,
        progress: &WizardProgress<W::Step, W::Data>,
        error: &ValidationError,
    ) {
        self.send(subject, prompts::invalid_input(error)).await;
        if let Some(def) = wizard.find(progress.step) {
            self.send(subject, prompts::render_step(def, &progress.data)).await;
        }
    }

    async fn fetch_media(
        &self,
        media_ref: &str,
        mime_type: &str,
    ) -> Result<MediaItem, ValidationError> {
        ensure_allowed_media_type(mime_type)?;
        let url = self
            .media
            .resolve_url(media_ref)
            .await
            .map_err(|_| ValidationError::MediaUnavailable)?;
        let item =
            self.media.download(&url).await.map_err(|_| ValidationError::MediaUnavailable)?;
        ensure_allowed_media_type(&item.content_type)?;
        Ok(item)
    }

    async fn attachment_count(&self, subject: &SubjectId) -> usize {
        match self.attachments.get(subject, AttachmentCategory::Prescription).await {
            Ok(Some(pending)) => pending.len(),
            Ok(None) => 0,
            Err(error) => {
                warn!(
                    event_name = "attachment.read_failed",
                    subject_id = %subject,
                    error = %error,
                    "treating unreadable aggregate as empty"
                );
                0
            }
        }
    }

    async fn collect_attachments(&self, subject: &SubjectId) -> Vec<MediaItem> {
        match self.attachments.get(subject, AttachmentCategory::Prescription).await {
            Ok(Some(pending)) => pending.items,
            Ok(None) => Vec::new(),
            Err(error) => {
                warn!(
                    event_name = "attachment.read_failed",
                    subject_id = %subject,
                    error = %error,
                    "treating unreadable aggregate as empty"
                );
                Vec::new()
            }
        }
    }

    async fn discard_attachments(&self, subject: &SubjectId) {
        if let Err(error) =
            self.attachments.delete(subject, AttachmentCategory::Prescription).await
        {
            warn!(
                event_name = "attachment.discard_failed",
                subject_id = %subject,
                error = %error,
                "attachment aggregate left for the sweep"
            );
        }
    }

    async fn send(&self, subject: &SubjectId, prompt: OutboundPrompt) {
        if let Err(error) = self.sender.send(subject, &prompt).await {
            warn!(
                event_name = "chat.send_failed",
                subject_id = %subject,
                error = %error,
                "outbound prompt dropped"
            );
        }
    }

    fn emit(
        &self,
        ctx: &EventContext,
        subject: &SubjectId,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) {
        self.audit.emit(AuditEvent::new(
            Some(subject.clone()),
            ctx.correlation_id.clone(),
            event_type,
            category,
            ACTOR,
            outcome,
        ));
    }
}

/// State store over serialized rows, mirroring how the SQL store works so
/// corrupt-row behavior can be exercised without a database.
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    rows: Arc<StdMutex<HashMap<String, String>>>,
}

impl InMemoryStateStore {
    pub fn inject_raw(&self, subject: &SubjectId, raw: impl Into<String>) {
        self.rows.lock().expect("state store lock").insert(subject.0.clone(), raw.into());
    }

    pub fn get(&self, subject: &SubjectId) -> Option<ConversationState> {
        self.rows
            .lock()
            .expect("state store lock")
            .get(&subject.0)
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, subject: &SubjectId) -> Result<Option<ConversationState>, StateError> {
        let rows = self.rows.lock().expect("state store lock");
        match rows.get(&subject.0) {
            None => Ok(None),
            Some(raw) => serde_json::from_str(raw)
                .map(Some)
                .map_err(|error| StateError::Corrupt(error.to_string())),
        }
    }

    async fn save(&self, state: &ConversationState) -> Result<(), StateError> {
        let raw =
            serde_json::to_string(state).map_err(|error| StateError::Backend(error.to_string()))?;
        self.rows.lock().expect("state store lock").insert(state.subject_id.0.clone(), raw);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAttachmentStore {
    aggregates: Arc<StdMutex<HashMap<(String, AttachmentCategory), PendingAttachment>>>,
}

impl InMemoryAttachmentStore {
    pub fn count(&self, subject: &SubjectId, category: AttachmentCategory) -> usize {
        self.aggregates
            .lock()
            .expect("attachment store lock")
            .get(&(subject.0.clone(), category))
            .map(PendingAttachment::len)
            .unwrap_or(0)
    }

    /// Simulates the externally scheduled age sweep.
    pub fn sweep_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut aggregates = self.aggregates.lock().expect("attachment store lock");
        let before = aggregates.len();
        aggregates.retain(|_, pending| pending.created_at >= cutoff);
        before - aggregates.len()
    }
}

#[async_trait]
impl AttachmentStore for InMemoryAttachmentStore {
    async fn append(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
        item: MediaItem,
    ) -> Result<AppendOutcome, StateError> {
        let mut aggregates = self.aggregates.lock().expect("attachment store lock");
        let pending = aggregates
            .entry((subject.0.clone(), category))
            .or_insert_with(|| PendingAttachment::new(subject.clone(), category, Utc::now()));
        Ok(pending.append(item))
    }

    async fn get(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
    ) -> Result<Option<PendingAttachment>, StateError> {
        Ok(self
            .aggregates
            .lock()
            .expect("attachment store lock")
            .get(&(subject.0.clone(), category))
            .cloned())
    }

    async fn delete(
        &self,
        subject: &SubjectId,
        category: AttachmentCategory,
    ) -> Result<(), StateError> {
        self.aggregates
            .lock()
            .expect("attachment store lock")
            .remove(&(subject.0.clone(), category));
        Ok(())
    }
}

/// Record service over in-memory collections; doubles as the smoke-test
/// backend for the CLI. Clones share the underlying collections.
#[derive(Clone, Default)]
pub struct InMemoryRecordService {
    status: Arc<StdMutex<Option<SubjectStatus>>>,
    pharmacies: Arc<StdMutex<Vec<String>>>,
    addresses: Arc<StdMutex<Vec<String>>>,
    dependents: Arc<StdMutex<Vec<Dependent>>>,
    registrations: Arc<StdMutex<Vec<RegistrationData>>>,
    orders: Arc<StdMutex<Vec<(OrderDraft, usize)>>>,
    profile_updates: Arc<StdMutex<Vec<(ProfileField, ProfileValue)>>>,
}

impl InMemoryRecordService {
    pub fn registered() -> Self {
        let service = Self::default();
        *service.status.lock().expect("record lock") = Some(SubjectStatus::Registered);
        service
    }

    pub fn unknown() -> Self {
        let service = Self::default();
        *service.status.lock().expect("record lock") = Some(SubjectStatus::Unknown);
        service
    }

    pub fn with_pharmacies(self, pharmacies: Vec<String>) -> Self {
        *self.pharmacies.lock().expect("record lock") = pharmacies;
        self
    }

    pub fn with_addresses(self, addresses: Vec<String>) -> Self {
        *self.addresses.lock().expect("record lock") = addresses;
        self
    }

    pub fn with_dependents(self, dependents: Vec<Dependent>) -> Self {
        *self.dependents.lock().expect("record lock") = dependents;
        self
    }

    pub fn registrations(&self) -> Vec<RegistrationData> {
        self.registrations.lock().expect("record lock").clone()
    }

    pub fn orders(&self) -> Vec<(OrderDraft, usize)> {
        self.orders.lock().expect("record lock").clone()
    }

    pub fn profile_updates(&self) -> Vec<(ProfileField, ProfileValue)> {
        self.profile_updates.lock().expect("record lock").clone()
    }

    pub fn dependents(&self) -> Vec<Dependent> {
        self.dependents.lock().expect("record lock").clone()
    }
}

#[async_trait]
impl RecordService for InMemoryRecordService {
    async fn subject_status(&self, _subject: &SubjectId) -> Result<SubjectStatus, RecordError> {
        Ok(self.status.lock().expect("record lock").unwrap_or(SubjectStatus::Unknown))
    }

    async fn pharmacy_options(&self) -> Result<Vec<String>, RecordError> {
        Ok(self.pharmacies.lock().expect("record lock").clone())
    }

    async fn address_options(&self, _subject: &SubjectId) -> Result<Vec<String>, RecordError> {
        Ok(self.addresses.lock().expect("record lock").clone())
    }

    async fn dependent_options(&self, _subject: &SubjectId) -> Result<Vec<String>, RecordError> {
        Ok(self.dependents.lock().expect("record lock").iter().map(Dependent::label).collect())
    }

    async fn finalize_registration(
        &self,
        _subject: &SubjectId,
        data: &RegistrationData,
    ) -> Result<(), RecordError> {
        self.registrations.lock().expect("record lock").push(data.clone());
        *self.status.lock().expect("record lock") = Some(SubjectStatus::Registered);
        Ok(())
    }

    async fn finalize_order(
        &self,
        _subject: &SubjectId,
        draft: &OrderDraft,
        attachments: Vec<MediaItem>,
    ) -> Result<OrderId, RecordError> {
        self.orders.lock().expect("record lock").push((draft.clone(), attachments.len()));
        Ok(OrderId::generate())
    }

    async fn update_profile_field(
        &self,
        _subject: &SubjectId,
        field: ProfileField,
        value: ProfileValue,
    ) -> Result<(), RecordError> {
        self.profile_updates.lock().expect("record lock").push((field, value));
        Ok(())
    }

    async fn add_dependent(
        &self,
        subject: &SubjectId,
        data: &DependentsData,
    ) -> Result<Dependent, RecordError> {
        let mut dependents = self.dependents.lock().expect("record lock");
        let number = format!("{:02}", dependents.len() + 1);
        let dependent = Dependent {
            id: DependentId::generate(),
            subject_id: subject.clone(),
            first_name: data.first_name.clone().unwrap_or_default(),
            last_name: data.last_name.clone().unwrap_or_default(),
            date_of_birth: data
                .date_of_birth
                .unwrap_or_else(|| Utc::now().date_naive()),
            dependent_number: number,
            created_at: Utc::now(),
        };
        dependents.push(dependent.clone());
        Ok(dependent)
    }

    async fn remove_dependent(
        &self,
        _subject: &SubjectId,
        label: &str,
    ) -> Result<bool, RecordError> {
        let mut dependents = self.dependents.lock().expect("record lock");
        let before = dependents.len();
        dependents.retain(|dependent| dependent.label() != label);
        Ok(dependents.len() < before)
    }

    async fn list_dependents(&self, _subject: &SubjectId) -> Result<Vec<Dependent>, RecordError> {
        Ok(self.dependents.lock().expect("record lock").clone())
    }
}

/// Ready-made controller over the in-memory doubles, used by tests and the
/// CLI smoke command.
pub type InMemoryController = SessionController<
    InMemoryStateStore,
    InMemoryRecordService,
    InMemoryAttachmentStore,
    crate::media::FixedMediaResolver,
    crate::outbound::RecordingPromptSender,
>;

/// Controller plus handles onto every in-memory collaborator, so callers can
/// inspect what a turn persisted and sent.
pub struct InMemoryHarness {
    pub controller: InMemoryController,
    pub states: InMemoryStateStore,
    pub attachments: InMemoryAttachmentStore,
    pub records: InMemoryRecordService,
    pub sender: crate::outbound::RecordingPromptSender,
    pub audit: InMemoryAuditSink,
}

pub fn in_memory_harness(
    records: InMemoryRecordService,
    media: crate::media::FixedMediaResolver,
) -> InMemoryHarness {
    let states = InMemoryStateStore::default();
    let attachments = InMemoryAttachmentStore::default();
    let sender = crate::outbound::RecordingPromptSender::default();
    let audit = InMemoryAuditSink::default();
    let controller = SessionController::new(
        states.clone(),
        records.clone(),
        attachments.clone(),
        media,
        sender.clone(),
        SessionPolicy::default(),
        Arc::new(audit.clone()),
    );
    InMemoryHarness { controller, states, attachments, records, sender, audit }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use remedi_core::session::{FlowState, WizardProgress};
    use remedi_core::wizard::order::{Step as OrderStep, NEW_ADDRESS_OPTION};
    use remedi_core::wizard::registration::Step as RegStep;
    use remedi_core::{
        AttachmentCategory, DeliveryMethod, MediaItem, OrderType, SubjectId, ATTACHMENT_CAP,
    };

    use crate::events::{EventContext, InboundEnvelope, InboundEvent};
    use crate::media::FixedMediaResolver;
    use crate::prompts::{self, OutboundPrompt};

    use super::{
        in_memory_harness, InMemoryHarness, InMemoryRecordService, StateStore, TurnOutcome,
    };

    fn subject() -> SubjectId {
        SubjectId("27820000001".to_owned())
    }

    fn jpeg(media_ref: &str) -> (String, MediaItem) {
        (
            media_ref.to_owned(),
            MediaItem { content_type: "image/jpeg".to_owned(), bytes: vec![0xFF, 0xD8, 0xFF] },
        )
    }

    fn media_with(refs: &[&str]) -> FixedMediaResolver {
        let mut resolver = FixedMediaResolver::default();
        for media_ref in refs {
            let (key, item) = jpeg(media_ref);
            resolver = resolver.with_item(key, item);
        }
        resolver
    }

    async fn turn(harness: &InMemoryHarness, event: InboundEvent) -> TurnOutcome {
        let envelope =
            InboundEnvelope { message_id: "m-test".to_owned(), subject_id: subject(), event };
        harness
            .controller
            .handle(&envelope, &EventContext::new("req-test"))
            .await
            .expect("turn should not fail")
    }

    async fn text(harness: &InMemoryHarness, body: &str) -> TurnOutcome {
        turn(harness, InboundEvent::Text { body: body.to_owned() }).await
    }

    async fn tap(harness: &InMemoryHarness, label: &str) -> TurnOutcome {
        turn(harness, InboundEvent::InteractiveChoice { chosen_label: label.to_owned() }).await
    }

    async fn image(harness: &InMemoryHarness, media_ref: &str) -> TurnOutcome {
        turn(
            harness,
            InboundEvent::Image {
                media_ref: media_ref.to_owned(),
                mime_type: "image/jpeg".to_owned(),
            },
        )
        .await
    }

    fn registered_harness() -> InMemoryHarness {
        in_memory_harness(
            InMemoryRecordService::registered()
                .with_pharmacies(vec![
                    "CityMed (CBD)".to_owned(),
                    "Greenpoint Pharmacy (Sea Point)".to_owned(),
                ])
                .with_addresses(vec!["12 Kloof St, Gardens".to_owned()]),
            FixedMediaResolver::default(),
        )
    }

    #[tokio::test]
    async fn first_contact_auto_enters_registration() {
        let harness =
            in_memory_harness(InMemoryRecordService::unknown(), FixedMediaResolver::default());

        let outcome = text(&harness, "hi").await;

        assert_eq!(outcome, TurnOutcome::Prompted);
        let state = harness.states.get(&subject()).expect("state persisted");
        assert!(matches!(
            state.flow,
            FlowState::Registration(WizardProgress { step: RegStep::FirstName, .. })
        ));
        let bodies = harness.sender.bodies();
        assert!(bodies[0].contains("Welcome"));
        assert!(bodies[1].contains("first name"));
    }

    #[tokio::test]
    async fn registration_happy_path_commits_the_profile() {
        let harness =
            in_memory_harness(InMemoryRecordService::unknown(), FixedMediaResolver::default());

        text(&harness, "hello").await;
        text(&harness, "Naledi").await;
        text(&harness, "Mokoena").await;
        text(&harness, "21/03/1987").await;
        tap(&harness, "Principal member").await;
        tap(&harness, "Private Client").await;
        let outcome = tap(&harness, "I accept").await;

        assert_eq!(outcome, TurnOutcome::Completed);
        let state = harness.states.get(&subject()).expect("state persisted");
        assert!(state.is_idle());

        let registrations = harness.records.registrations();
        assert_eq!(registrations.len(), 1);
        let data = &registrations[0];
        assert_eq!(data.first_name.as_deref(), Some("Naledi"));
        assert_eq!(data.dependent_number.as_deref(), Some("00"), "default-fill must be total");
        assert_eq!(data.medical_aid_number, None, "provider steps were skipped in one pass");
        assert_eq!(data.terms_accepted, Some(true));

        let bodies = harness.sender.bodies();
        assert!(bodies.iter().any(|body| body.contains("You're all set, Naledi")));
    }

    #[tokio::test]
    async fn invalid_input_repeats_the_step_without_mutating_state() {
        let harness =
            in_memory_harness(InMemoryRecordService::unknown(), FixedMediaResolver::default());

        text(&harness, "hello").await;
        text(&harness, "Naledi").await;
        text(&harness, "Mokoena").await;
        let before = harness.states.get(&subject()).expect("state persisted");

        for _ in 0..3 {
            let outcome = text(&harness, "yesterday").await;
            assert_eq!(outcome, TurnOutcome::Prompted);
        }

        let after = harness.states.get(&subject()).expect("state persisted");
        assert_eq!(after, before, "repeated invalid input must be a no-op on state");
        let bodies = harness.sender.bodies();
        assert!(bodies.iter().any(|body| body.contains("Sorry")));
    }

    #[tokio::test]
    async fn session_times_out_after_the_idle_window() {
        let harness = registered_harness();

        tap(&harness, prompts::MENU_PLACE_ORDER).await;
        let mut state = harness.states.get(&subject()).expect("state persisted");
        state.updated_at = Utc::now() - Duration::minutes(31);
        harness.states.save(&state).await.expect("save");
        harness.sender.clear();

        let outcome = tap(&harness, "Refill").await;

        assert_eq!(outcome, TurnOutcome::TimedOut);
        assert!(harness.states.get(&subject()).expect("state persisted").is_idle());
        let bodies = harness.sender.bodies();
        assert!(bodies[0].contains("closed it"), "timeout notice expected, got {bodies:?}");
    }

    #[tokio::test]
    async fn session_survives_under_the_idle_window() {
        let harness = registered_harness();

        tap(&harness, prompts::MENU_PLACE_ORDER).await;
        let mut state = harness.states.get(&subject()).expect("state persisted");
        state.updated_at = Utc::now() - Duration::minutes(29);
        harness.states.save(&state).await.expect("save");

        let outcome = tap(&harness, "Refill").await;

        assert_eq!(outcome, TurnOutcome::Prompted);
        let state = harness.states.get(&subject()).expect("state persisted");
        assert!(matches!(
            state.flow,
            FlowState::PlaceOrder(WizardProgress { step: OrderStep::RefillReference, .. })
        ));
    }

    #[tokio::test]
    async fn cancel_resets_and_discards_the_aggregate() {
        let harness = in_memory_harness(
            InMemoryRecordService::registered(),
            media_with(&["m-1"]),
        );

        tap(&harness, prompts::MENU_PLACE_ORDER).await;
        tap(&harness, "New prescription").await;
        image(&harness, "m-1").await;
        assert_eq!(harness.attachments.count(&subject(), AttachmentCategory::Prescription), 1);

        let outcome = text(&harness, "cancel").await;

        assert_eq!(outcome, TurnOutcome::Exited);
        assert!(harness.states.get(&subject()).expect("state persisted").is_idle());
        assert_eq!(harness.attachments.count(&subject(), AttachmentCategory::Prescription), 0);
    }

    #[tokio::test]
    async fn back_from_the_first_step_exits_to_the_menu() {
        let harness = registered_harness();

        tap(&harness, prompts::MENU_PLACE_ORDER).await;
        let outcome = text(&harness, "back").await;

        assert_eq!(outcome, TurnOutcome::Exited);
        assert!(harness.states.get(&subject()).expect("state persisted").is_idle());
    }

    #[tokio::test]
    async fn order_entry_snapshots_pharmacy_and_address_options() {
        let harness = registered_harness();

        tap(&harness, prompts::MENU_PLACE_ORDER).await;

        let state = harness.states.get(&subject()).expect("state persisted");
        let FlowState::PlaceOrder(progress) = state.flow else {
            panic!("expected the order wizard, got {:?}", state.flow);
        };
        assert_eq!(progress.step, OrderStep::OrderType);
        assert_eq!(progress.data.pharmacy_options.len(), 2);
        assert_eq!(progress.data.address_options, vec!["12 Kloof St, Gardens".to_owned()]);
    }

    #[tokio::test]
    async fn refill_pickup_order_runs_end_to_end() {
        let harness = registered_harness();

        tap(&harness, prompts::MENU_PLACE_ORDER).await;
        tap(&harness, "Refill").await;
        text(&harness, "ORD-2026-0413").await;
        tap(&harness, "Pickup").await;
        text(&harness, "2").await;
        text(&harness, "please have it ready by noon").await;
        let outcome = tap(&harness, "Confirm order").await;

        assert_eq!(outcome, TurnOutcome::Completed);
        let orders = harness.records.orders();
        assert_eq!(orders.len(), 1);
        let (draft, attachment_count) = &orders[0];
        assert_eq!(draft.order_type, Some(OrderType::Refill));
        assert_eq!(draft.refill_reference.as_deref(), Some("ORD-2026-0413"));
        assert_eq!(draft.delivery_method, Some(DeliveryMethod::Pickup));
        assert_eq!(draft.pharmacy.as_deref(), Some("Greenpoint Pharmacy (Sea Point)"));
        assert_eq!(*attachment_count, 0);
        assert!(harness.states.get(&subject()).expect("state persisted").is_idle());
    }

    #[tokio::test]
    async fn delivery_order_collects_a_new_address() {
        let harness = registered_harness();

        tap(&harness, prompts::MENU_PLACE_ORDER).await;
        tap(&harness, "Over the counter").await;
        text(&harness, "vitamin c, plasters").await;
        tap(&harness, "Delivery").await;
        // Option 2 is the literal new-address entry (one saved address).
        text(&harness, "2").await;
        text(&harness, "3 Main Rd, Observatory").await;
        text(&harness, "-").await;
        let outcome = tap(&harness, "Confirm order").await;

        assert_eq!(outcome, TurnOutcome::Completed);
        let orders = harness.records.orders();
        let (draft, _) = &orders[0];
        assert_eq!(draft.delivery_address.as_deref(), Some(NEW_ADDRESS_OPTION));
        assert_eq!(draft.resolved_address(), Some("3 Main Rd, Observatory"));
    }

    #[tokio::test]
    async fn sixth_image_auto_advances_to_delivery_method() {
        let refs = ["m-1", "m-2", "m-3", "m-4", "m-5", "m-6"];
        let harness =
            in_memory_harness(InMemoryRecordService::registered(), media_with(&refs));

        tap(&harness, prompts::MENU_PLACE_ORDER).await;
        tap(&harness, "New prescription").await;
        for media_ref in &refs[..5] {
            let outcome = image(&harness, media_ref).await;
            assert_eq!(outcome, TurnOutcome::Prompted);
        }

        let outcome = image(&harness, "m-6").await;

        assert_eq!(outcome, TurnOutcome::Prompted);
        let state = harness.states.get(&subject()).expect("state persisted");
        let FlowState::PlaceOrder(progress) = state.flow else {
            panic!("expected the order wizard, got {:?}", state.flow);
        };
        assert_eq!(progress.step, OrderStep::DeliveryMethod, "6th image forces the transition");
        assert_eq!(progress.data.image_count, Some(ATTACHMENT_CAP));
        assert_eq!(
            harness.attachments.count(&subject(), AttachmentCategory::Prescription),
            ATTACHMENT_CAP
        );
    }

    #[tokio::test]
    async fn a_seventh_image_is_rejected_and_exactly_six_commit() {
        let refs = ["m-1", "m-2", "m-3", "m-4", "m-5", "m-6", "m-7"];
        let harness =
            in_memory_harness(InMemoryRecordService::registered(), media_with(&refs));

        tap(&harness, prompts::MENU_PLACE_ORDER).await;
        tap(&harness, "New prescription").await;
        for media_ref in &refs[..6] {
            image(&harness, media_ref).await;
        }
        // Force the wizard back onto the images step with the aggregate full,
        // as a racing duplicate delivery would.
        let mut state = harness.states.get(&subject()).expect("state persisted");
        if let FlowState::PlaceOrder(progress) = &mut state.flow {
            progress.step = OrderStep::PrescriptionImages;
            progress.data.image_count = None;
        }
        harness.states.save(&state).await.expect("save");

        image(&harness, "m-7").await;

        assert_eq!(
            harness.attachments.count(&subject(), AttachmentCategory::Prescription),
            ATTACHMENT_CAP,
            "the seventh append must be refused"
        );
        let state = harness.states.get(&subject()).expect("state persisted");
        let FlowState::PlaceOrder(progress) = state.flow else {
            panic!("expected the order wizard, got {:?}", state.flow);
        };
        assert_eq!(progress.step, OrderStep::DeliveryMethod);
        assert_eq!(progress.data.image_count, Some(ATTACHMENT_CAP));
    }

    #[tokio::test]
    async fn done_without_any_images_reprompts() {
        let harness = in_memory_harness(
            InMemoryRecordService::registered(),
            FixedMediaResolver::default(),
        );

        tap(&harness, prompts::MENU_PLACE_ORDER).await;
        tap(&harness, "New prescription").await;
        let outcome = text(&harness, "done").await;

        assert_eq!(outcome, TurnOutcome::Prompted);
        let state = harness.states.get(&subject()).expect("state persisted");
        assert!(matches!(
            state.flow,
            FlowState::PlaceOrder(WizardProgress { step: OrderStep::PrescriptionImages, .. })
        ));
    }

    #[tokio::test]
    async fn a_swept_aggregate_reads_as_empty_not_as_an_error() {
        let harness = in_memory_harness(
            InMemoryRecordService::registered(),
            media_with(&["m-1", "m-2"]),
        );

        tap(&harness, prompts::MENU_PLACE_ORDER).await;
        tap(&harness, "New prescription").await;
        image(&harness, "m-1").await;
        image(&harness, "m-2").await;

        // The external sweep may fire between steps.
        let swept = harness.attachments.sweep_older_than(Utc::now() + Duration::minutes(1));
        assert_eq!(swept, 1);

        let outcome = text(&harness, "Done").await;

        assert_eq!(outcome, TurnOutcome::Prompted, "engine re-prompts instead of failing");
        let state = harness.states.get(&subject()).expect("state persisted");
        assert!(matches!(
            state.flow,
            FlowState::PlaceOrder(WizardProgress { step: OrderStep::PrescriptionImages, .. })
        ));
    }

    #[tokio::test]
    async fn unavailable_media_is_a_validation_failure_not_fatal() {
        let harness = in_memory_harness(
            InMemoryRecordService::registered(),
            FixedMediaResolver::default(),
        );

        tap(&harness, prompts::MENU_PLACE_ORDER).await;
        tap(&harness, "New prescription").await;
        let before = harness.states.get(&subject()).expect("state persisted");

        let outcome = image(&harness, "m-missing").await;

        assert_eq!(outcome, TurnOutcome::Prompted);
        let after = harness.states.get(&subject()).expect("state persisted");
        assert_eq!(after.flow, before.flow);
        assert_eq!(harness.attachments.count(&subject(), AttachmentCategory::Prescription), 0);
    }

    #[tokio::test]
    async fn pickup_back_from_notes_returns_to_pharmacy_select() {
        let harness = registered_harness();

        tap(&harness, prompts::MENU_PLACE_ORDER).await;
        tap(&harness, "Refill").await;
        text(&harness, "ORD-2026-0413").await;
        tap(&harness, "Pickup").await;
        text(&harness, "1").await;
        harness.sender.clear();

        let outcome = text(&harness, "back").await;

        assert_eq!(outcome, TurnOutcome::Prompted);
        let state = harness.states.get(&subject()).expect("state persisted");
        let FlowState::PlaceOrder(progress) = state.flow else {
            panic!("expected the order wizard, got {:?}", state.flow);
        };
        assert_eq!(progress.step, OrderStep::PharmacySelect);
        assert_eq!(progress.data.pharmacy, None, "re-entered selection is cleared");
        assert_eq!(
            progress.data.delivery_method,
            Some(DeliveryMethod::Pickup),
            "other answers survive"
        );
        let bodies = harness.sender.bodies();
        assert!(bodies[0].contains("1. CityMed (CBD)"));
    }

    #[tokio::test]
    async fn corrupt_state_recovers_to_idle_with_a_generic_notice() {
        let harness = registered_harness();
        harness.states.inject_raw(&subject(), r#"{"flow":"loyalty_signup","step":7}"#);

        let outcome = text(&harness, "hello").await;

        assert_eq!(outcome, TurnOutcome::Recovered);
        assert!(harness.states.get(&subject()).expect("state persisted").is_idle());
        let bodies = harness.sender.bodies();
        assert!(bodies[0].contains("Something went wrong"));
    }

    #[tokio::test]
    async fn unknown_menu_input_re_serves_the_menu() {
        let harness = registered_harness();

        let outcome = text(&harness, "what's the weather").await;

        assert_eq!(outcome, TurnOutcome::Menu);
        let sent = harness.sender.sent();
        assert!(matches!(sent.last(), Some((_, OutboundPrompt::Choice { .. }))));
    }

    #[tokio::test]
    async fn profile_edit_commits_the_selected_field() {
        let harness = registered_harness();

        tap(&harness, prompts::MENU_EDIT_PROFILE).await;
        tap(&harness, "First name").await;
        let outcome = text(&harness, "Thandi").await;

        assert_eq!(outcome, TurnOutcome::Completed);
        let updates = harness.records.profile_updates();
        assert_eq!(updates.len(), 1);
        assert!(harness.states.get(&subject()).expect("state persisted").is_idle());
    }

    #[tokio::test]
    async fn dependents_list_completes_in_one_step() {
        let harness = registered_harness();

        tap(&harness, prompts::MENU_DEPENDENTS).await;
        let outcome = tap(&harness, "List dependents").await;

        assert_eq!(outcome, TurnOutcome::Completed);
        let bodies = harness.sender.bodies();
        assert!(bodies.iter().any(|body| body.contains("no dependents")));
    }

    #[tokio::test]
    async fn dependents_add_generates_the_next_number() {
        let harness = registered_harness();

        tap(&harness, prompts::MENU_DEPENDENTS).await;
        tap(&harness, "Add a dependent").await;
        text(&harness, "Lwazi").await;
        text(&harness, "Mokoena").await;
        let outcome = text(&harness, "02/02/2012").await;

        assert_eq!(outcome, TurnOutcome::Completed);
        let dependents = harness.records.dependents();
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0].dependent_number, "01");
        assert_eq!(dependents[0].first_name, "Lwazi");
    }

    #[tokio::test]
    async fn concurrent_turns_for_one_subject_are_serialized() {
        let harness = std::sync::Arc::new(in_memory_harness(
            InMemoryRecordService::unknown(),
            FixedMediaResolver::default(),
        ));

        text(&harness, "hello").await;

        // Two rapid duplicates of the same answer: the second must observe
        // the first's mutation instead of racing it.
        let first = {
            let harness = harness.clone();
            tokio::spawn(async move { text(&harness, "Naledi").await })
        };
        let second = {
            let harness = harness.clone();
            tokio::spawn(async move { text(&harness, "Naledi").await })
        };
        first.await.expect("join");
        second.await.expect("join");

        let state = harness.states.get(&subject()).expect("state persisted");
        let FlowState::Registration(progress) = state.flow else {
            panic!("expected registration, got {:?}", state.flow);
        };
        // One turn answered FirstName, the other answered LastName.
        assert_eq!(progress.step, RegStep::DateOfBirth);
        assert_eq!(progress.data.first_name.as_deref(), Some("Naledi"));
        assert_eq!(progress.data.last_name.as_deref(), Some("Naledi"));
    }
}
