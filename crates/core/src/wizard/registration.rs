use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::subject::{MedicalAidProvider, MemberType};
use crate::wizard::step::{Expect, StepDef, Wizard};

pub const MEMBER_TYPE_OPTIONS: &[&str] = &["Principal member", "Dependent"];
pub const PROVIDER_OPTIONS: &[&str] =
    &["Discovery Health", "Bonitas", "Momentum Health", "Private Client"];
pub const TERMS_OPTIONS: &[&str] = &["I accept"];

/// Dependent number injected when a principal member skips the prompt.
pub const PRINCIPAL_DEPENDENT_NUMBER: &str = "00";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    FirstName,
    LastName,
    DateOfBirth,
    MemberType,
    DependentNumber,
    MedicalAidProvider,
    MedicalAidNumber,
    MedicalAidPlan,
    TermsOfService,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationData {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub member_type: Option<MemberType>,
    pub dependent_number: Option<String>,
    pub medical_aid_provider: Option<MedicalAidProvider>,
    pub medical_aid_number: Option<String>,
    pub medical_aid_plan: Option<String>,
    pub terms_accepted: Option<bool>,
}

impl RegistrationData {
    pub fn is_private_client(&self) -> bool {
        self.medical_aid_provider == Some(MedicalAidProvider::PrivateClient)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RegistrationWizard;

static STEPS: &[StepDef<RegistrationWizard>] = &[
    StepDef {
        step: Step::FirstName,
        prompt: |_| "What is your first name?".to_owned(),
        expect: Expect::Text,
        condition: None,
        default_fill: None,
        apply: |data, value| data.first_name = value.into_text(),
        clear: |data| data.first_name = None,
    },
    StepDef {
        step: Step::LastName,
        prompt: |_| "And your last name?".to_owned(),
        expect: Expect::Text,
        condition: None,
        default_fill: None,
        apply: |data, value| data.last_name = value.into_text(),
        clear: |data| data.last_name = None,
    },
    StepDef {
        step: Step::DateOfBirth,
        prompt: |_| "What is your date of birth? (DD/MM/YYYY)".to_owned(),
        expect: Expect::Date,
        condition: None,
        default_fill: None,
        apply: |data, value| data.date_of_birth = value.into_date(),
        clear: |data| data.date_of_birth = None,
    },
    StepDef {
        step: Step::MemberType,
        prompt: |_| "Are you the principal member of your medical aid, or a dependent?".to_owned(),
        expect: Expect::Buttons(MEMBER_TYPE_OPTIONS),
        condition: None,
        default_fill: None,
        apply: |data, value| {
            data.member_type = value.into_choice().and_then(|label| MemberType::from_label(&label));
        },
        clear: |data| data.member_type = None,
    },
    StepDef {
        step: Step::DependentNumber,
        prompt: |_| "What is your dependent number on the medical aid?".to_owned(),
        expect: Expect::Text,
        condition: Some(|data| data.member_type == Some(MemberType::Dependent)),
        default_fill: Some(|data| {
            data.dependent_number = Some(PRINCIPAL_DEPENDENT_NUMBER.to_owned());
        }),
        apply: |data, value| data.dependent_number = value.into_text(),
        clear: |data| data.dependent_number = None,
    },
    StepDef {
        step: Step::MedicalAidProvider,
        prompt: |_| "Who is your medical aid provider?".to_owned(),
        expect: Expect::Buttons(PROVIDER_OPTIONS),
        condition: None,
        default_fill: None,
        apply: |data, value| {
            data.medical_aid_provider =
                value.into_choice().and_then(|label| MedicalAidProvider::from_label(&label));
        },
        clear: |data| data.medical_aid_provider = None,
    },
    StepDef {
        step: Step::MedicalAidNumber,
        prompt: |_| "What is your medical aid membership number?".to_owned(),
        expect: Expect::Text,
        condition: Some(|data| !data.is_private_client()),
        default_fill: None,
        apply: |data, value| data.medical_aid_number = value.into_text(),
        clear: |data| data.medical_aid_number = None,
    },
    StepDef {
        step: Step::MedicalAidPlan,
        prompt: |_| "Which plan are you on?".to_owned(),
        expect: Expect::Text,
        condition: Some(|data| !data.is_private_client()),
        default_fill: None,
        apply: |data, value| data.medical_aid_plan = value.into_text(),
        clear: |data| data.medical_aid_plan = None,
    },
    StepDef {
        step: Step::TermsOfService,
        prompt: |_| {
            "Almost done. By continuing you accept our terms of service \
             (shared with your pharmacy for dispensing only)."
                .to_owned()
        },
        expect: Expect::Buttons(TERMS_OPTIONS),
        condition: None,
        default_fill: None,
        apply: |data, value| {
            data.terms_accepted = value.into_choice().map(|label| label == "I accept");
        },
        clear: |data| data.terms_accepted = None,
    },
];

impl Wizard for RegistrationWizard {
    type Step = Step;
    type Data = RegistrationData;

    fn steps(&self) -> &'static [StepDef<Self>] {
        STEPS
    }

    fn jump_override(&self, step: Step) -> Option<fn(&RegistrationData) -> Option<Step>> {
        match step {
            // Private Client deactivates the whole provider sub-range in one
            // pass rather than step by step.
            Step::MedicalAidProvider => {
                Some(|data| data.is_private_client().then_some(Step::TermsOfService))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::subject::{MedicalAidProvider, MemberType};
    use crate::wizard::navigate::{advance, entry_step, retreat, Backward, Forward};
    use crate::wizard::step::Wizard;

    use super::{RegistrationData, RegistrationWizard, Step, PRINCIPAL_DEPENDENT_NUMBER};

    #[test]
    fn registration_starts_at_first_name() {
        let mut data = RegistrationData::default();
        assert_eq!(entry_step(&RegistrationWizard, &mut data), Forward::Step(Step::FirstName));
    }

    #[test]
    fn principal_members_skip_dependent_number_and_get_the_default() {
        let mut data = RegistrationData {
            member_type: Some(MemberType::Principal),
            ..RegistrationData::default()
        };

        let next = advance(&RegistrationWizard, &mut data, Step::MemberType).expect("known step");

        assert_eq!(next, Forward::Step(Step::MedicalAidProvider));
        assert_eq!(data.dependent_number.as_deref(), Some(PRINCIPAL_DEPENDENT_NUMBER));
    }

    #[test]
    fn dependents_are_prompted_for_their_number() {
        let mut data = RegistrationData {
            member_type: Some(MemberType::Dependent),
            ..RegistrationData::default()
        };

        let next = advance(&RegistrationWizard, &mut data, Step::MemberType).expect("known step");

        assert_eq!(next, Forward::Step(Step::DependentNumber));
        assert_eq!(data.dependent_number, None);
    }

    #[test]
    fn private_client_jumps_to_terms_in_one_pass() {
        let mut data = RegistrationData {
            member_type: Some(MemberType::Principal),
            dependent_number: Some(PRINCIPAL_DEPENDENT_NUMBER.to_owned()),
            medical_aid_provider: Some(MedicalAidProvider::PrivateClient),
            ..RegistrationData::default()
        };

        let next =
            advance(&RegistrationWizard, &mut data, Step::MedicalAidProvider).expect("known step");

        assert_eq!(next, Forward::Step(Step::TermsOfService));
        assert_eq!(data.medical_aid_number, None);
        assert_eq!(data.medical_aid_plan, None);
    }

    #[test]
    fn named_providers_continue_into_the_provider_steps() {
        let mut data = RegistrationData {
            medical_aid_provider: Some(MedicalAidProvider::Bonitas),
            ..RegistrationData::default()
        };

        let next =
            advance(&RegistrationWizard, &mut data, Step::MedicalAidProvider).expect("known step");

        assert_eq!(next, Forward::Step(Step::MedicalAidNumber));
    }

    #[test]
    fn back_from_terms_skips_provider_steps_for_private_clients() {
        let mut data = RegistrationData {
            medical_aid_provider: Some(MedicalAidProvider::PrivateClient),
            ..RegistrationData::default()
        };

        let back =
            retreat(&RegistrationWizard, &mut data, Step::TermsOfService).expect("known step");

        assert_eq!(back, Backward::Step(Step::MedicalAidProvider));
        assert_eq!(data.medical_aid_provider, None, "re-entered answer is cleared");
    }

    #[test]
    fn back_before_first_name_exits_the_wizard() {
        let mut data = RegistrationData::default();
        assert_eq!(retreat(&RegistrationWizard, &mut data, Step::FirstName), Ok(Backward::Exit));
    }

    #[test]
    fn every_step_is_addressable_in_the_registry() {
        for step in [
            Step::FirstName,
            Step::LastName,
            Step::DateOfBirth,
            Step::MemberType,
            Step::DependentNumber,
            Step::MedicalAidProvider,
            Step::MedicalAidNumber,
            Step::MedicalAidPlan,
            Step::TermsOfService,
        ] {
            assert!(RegistrationWizard.find(step).is_some(), "{step:?} missing from registry");
        }
    }
}
