use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::wizard::step::{Expect, StepDef, Wizard};

pub const PROFILE_FIELD_OPTIONS: &[&str] =
    &["First name", "Last name", "Date of birth", "Medical aid number"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    FirstName,
    LastName,
    DateOfBirth,
    MedicalAidNumber,
}

impl ProfileField {
    pub fn label(&self) -> &'static str {
        match self {
            Self::FirstName => "First name",
            Self::LastName => "Last name",
            Self::DateOfBirth => "Date of birth",
            Self::MedicalAidNumber => "Medical aid number",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "First name" => Some(Self::FirstName),
            "Last name" => Some(Self::LastName),
            "Date of birth" => Some(Self::DateOfBirth),
            "Medical aid number" => Some(Self::MedicalAidNumber),
            _ => None,
        }
    }

    pub fn is_textual(&self) -> bool {
        !matches!(self, Self::DateOfBirth)
    }
}

/// The new value for a profile edit, already shaped for the field it targets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ProfileValue {
    Text(String),
    Date(NaiveDate),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    FieldSelect,
    NewTextValue,
    NewDateValue,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileEdit {
    pub field: Option<ProfileField>,
    pub text_value: Option<String>,
    pub date_value: Option<NaiveDate>,
}

impl ProfileEdit {
    pub fn value(&self) -> Option<ProfileValue> {
        match self.field? {
            ProfileField::DateOfBirth => self.date_value.map(ProfileValue::Date),
            _ => self.text_value.clone().map(ProfileValue::Text),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ProfileWizard;

static STEPS: &[StepDef<ProfileWizard>] = &[
    StepDef {
        step: Step::FieldSelect,
        prompt: |_| "Which detail would you like to change?".to_owned(),
        expect: Expect::Buttons(PROFILE_FIELD_OPTIONS),
        condition: None,
        default_fill: None,
        apply: |data, value| {
            data.field = value.into_choice().and_then(|label| ProfileField::from_label(&label));
        },
        clear: |data| data.field = None,
    },
    StepDef {
        step: Step::NewTextValue,
        prompt: |data| match data.field {
            Some(field) => format!("What should your {} be?", field.label().to_lowercase()),
            None => "What should the new value be?".to_owned(),
        },
        expect: Expect::Text,
        condition: Some(|data| data.field.map_or(false, |field| field.is_textual())),
        default_fill: None,
        apply: |data, value| data.text_value = value.into_text(),
        clear: |data| data.text_value = None,
    },
    StepDef {
        step: Step::NewDateValue,
        prompt: |_| "What is the correct date of birth? (DD/MM/YYYY)".to_owned(),
        expect: Expect::Date,
        condition: Some(|data| data.field == Some(ProfileField::DateOfBirth)),
        default_fill: None,
        apply: |data, value| data.date_value = value.into_date(),
        clear: |data| data.date_value = None,
    },
];

impl Wizard for ProfileWizard {
    type Step = Step;
    type Data = ProfileEdit;

    fn steps(&self) -> &'static [StepDef<Self>] {
        STEPS
    }
}
