use remedi_core::wizard::UserInput;
use remedi_core::SubjectId;

/// One inbound webhook event, exactly one per user action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEnvelope {
    /// Provider message id, used for correlation.
    pub message_id: String,
    pub subject_id: SubjectId,
    pub event: InboundEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    Text { body: String },
    InteractiveChoice { chosen_label: String },
    Image { media_ref: String, mime_type: String },
}

impl InboundEvent {
    pub fn kind(&self) -> InboundEventKind {
        match self {
            Self::Text { .. } => InboundEventKind::Text,
            Self::InteractiveChoice { .. } => InboundEventKind::InteractiveChoice,
            Self::Image { .. } => InboundEventKind::Image,
        }
    }

    /// Strip provider framing down to what the wizard engine consumes.
    pub fn as_user_input(&self) -> UserInput {
        match self {
            Self::Text { body } => UserInput::Text(body.clone()),
            Self::InteractiveChoice { chosen_label } => UserInput::Choice(chosen_label.clone()),
            Self::Image { media_ref, mime_type } => {
                UserInput::Image { media_ref: media_ref.clone(), mime_type: mime_type.clone() }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InboundEventKind {
    Text,
    InteractiveChoice,
    Image,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

impl EventContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self { correlation_id: correlation_id.into() }
    }
}

/// Navigation words understood in every active wizard, as typed text or as a
/// quick-reply tap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    Back,
    Cancel,
}

impl ControlCommand {
    pub fn parse(event: &InboundEvent) -> Option<Self> {
        let raw = match event {
            InboundEvent::Text { body } => body.trim(),
            InboundEvent::InteractiveChoice { chosen_label } => chosen_label.as_str(),
            InboundEvent::Image { .. } => return None,
        };
        match raw.to_ascii_lowercase().as_str() {
            "back" => Some(Self::Back),
            "cancel" | "home" | "menu" => Some(Self::Cancel),
            _ => None,
        }
    }
}
