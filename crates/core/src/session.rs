use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::subject::SubjectId;
use crate::wizard::{dependents, order, profile, registration};

/// Step-and-data snapshot of one in-progress wizard run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WizardProgress<S, D> {
    pub step: S,
    pub data: D,
}

impl<S, D> WizardProgress<S, D> {
    pub fn new(step: S, data: D) -> Self {
        Self { step, data }
    }
}

/// The active flow, keyed by tag. Each wizard owns its own step namespace
/// and data shape, so a step that is invalid for the current flow cannot be
/// represented at all.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flow", content = "progress", rename_all = "snake_case")]
pub enum FlowState {
    Idle,
    Registration(WizardProgress<registration::Step, registration::RegistrationData>),
    PlaceOrder(WizardProgress<order::Step, order::OrderDraft>),
    EditProfile(WizardProgress<profile::Step, profile::ProfileEdit>),
    ManageDependents(WizardProgress<dependents::Step, dependents::DependentsData>),
}

impl FlowState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Registration(_) => "registration",
            Self::PlaceOrder(_) => "place_order",
            Self::EditProfile(_) => "edit_profile",
            Self::ManageDependents(_) => "manage_dependents",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// One persisted conversation slot per subject, mutated only by the flow
/// controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub subject_id: SubjectId,
    pub flow: FlowState,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn idle(subject_id: SubjectId, now: DateTime<Utc>) -> Self {
        Self { subject_id, flow: FlowState::Idle, updated_at: now }
    }

    pub fn is_idle(&self) -> bool {
        self.flow.is_idle()
    }

    /// Refresh the timestamp; call on every mutation.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.flow = FlowState::Idle;
        self.updated_at = now;
    }
}

/// Session-timeout policy. Purely elapsed-time based: content never extends
/// or shortens a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionPolicy {
    pub timeout: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self { timeout: Duration::minutes(30) }
    }
}

impl SessionPolicy {
    pub fn from_minutes(minutes: i64) -> Self {
        Self { timeout: Duration::minutes(minutes) }
    }

    pub fn expired(&self, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - updated_at > self.timeout
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::domain::subject::SubjectId;
    use crate::wizard::registration::{RegistrationData, Step};

    use super::{ConversationState, FlowState, SessionPolicy, WizardProgress};

    #[test]
    fn timeout_is_a_strict_threshold_on_elapsed_time() {
        let policy = SessionPolicy::default();
        let started = Utc::now();

        assert!(!policy.expired(started, started + Duration::minutes(29)));
        assert!(!policy.expired(started, started + Duration::minutes(30)));
        assert!(policy.expired(started, started + Duration::minutes(31)));
    }

    #[test]
    fn flow_state_round_trips_through_json() {
        let state = ConversationState {
            subject_id: SubjectId("27820000001".to_owned()),
            flow: FlowState::Registration(WizardProgress::new(
                Step::MemberType,
                RegistrationData {
                    first_name: Some("Naledi".to_owned()),
                    ..RegistrationData::default()
                },
            )),
            updated_at: Utc::now(),
        };

        let encoded = serde_json::to_string(&state).expect("encode");
        let decoded: ConversationState = serde_json::from_str(&encoded).expect("decode");

        assert_eq!(decoded, state);
    }

    #[test]
    fn idle_state_has_no_step() {
        let state = ConversationState::idle(SubjectId("27820000001".to_owned()), Utc::now());
        assert!(state.is_idle());
        assert_eq!(state.flow.name(), "idle");
    }

    #[test]
    fn unknown_flow_tags_fail_to_decode() {
        let raw = r#"{"subject_id":"27820000001","flow":{"flow":"loyalty_signup"},"updated_at":"2026-08-06T10:00:00Z"}"#;
        assert!(serde_json::from_str::<ConversationState>(raw).is_err());
    }
}
