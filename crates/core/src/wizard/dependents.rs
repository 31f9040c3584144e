use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::wizard::step::{Expect, StepDef, Wizard};

pub const DEPENDENT_ACTION_OPTIONS: &[&str] =
    &["Add a dependent", "Remove a dependent", "List dependents"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentAction {
    Add,
    Remove,
    List,
}

impl DependentAction {
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Add a dependent" => Some(Self::Add),
            "Remove a dependent" => Some(Self::Remove),
            "List dependents" => Some(Self::List),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Action,
    FirstName,
    LastName,
    DateOfBirth,
    DependentSelect,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DependentsData {
    pub action: Option<DependentAction>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub selected: Option<String>,
    /// Labels of the subject's current dependents, snapshotted at entry.
    pub dependent_options: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DependentsWizard;

static STEPS: &[StepDef<DependentsWizard>] = &[
    StepDef {
        step: Step::Action,
        prompt: |_| "What would you like to do with your dependents?".to_owned(),
        expect: Expect::Buttons(DEPENDENT_ACTION_OPTIONS),
        condition: None,
        default_fill: None,
        apply: |data, value| {
            data.action = value.into_choice().and_then(|label| DependentAction::from_label(&label));
        },
        clear: |data| data.action = None,
    },
    StepDef {
        step: Step::FirstName,
        prompt: |_| "What is the dependent's first name?".to_owned(),
        expect: Expect::Text,
        condition: Some(|data| data.action == Some(DependentAction::Add)),
        default_fill: None,
        apply: |data, value| data.first_name = value.into_text(),
        clear: |data| data.first_name = None,
    },
    StepDef {
        step: Step::LastName,
        prompt: |_| "And the dependent's last name?".to_owned(),
        expect: Expect::Text,
        condition: Some(|data| data.action == Some(DependentAction::Add)),
        default_fill: None,
        apply: |data, value| data.last_name = value.into_text(),
        clear: |data| data.last_name = None,
    },
    StepDef {
        step: Step::DateOfBirth,
        prompt: |_| "The dependent's date of birth? (DD/MM/YYYY)".to_owned(),
        expect: Expect::Date,
        condition: Some(|data| data.action == Some(DependentAction::Add)),
        default_fill: None,
        apply: |data, value| data.date_of_birth = value.into_date(),
        clear: |data| data.date_of_birth = None,
    },
    StepDef {
        step: Step::DependentSelect,
        prompt: |_| "Which dependent should be removed? Reply with a number.".to_owned(),
        expect: Expect::Numbered(|data| data.dependent_options.clone()),
        condition: Some(|data| {
            data.action == Some(DependentAction::Remove) && !data.dependent_options.is_empty()
        }),
        default_fill: None,
        apply: |data, value| data.selected = value.into_choice(),
        clear: |data| data.selected = None,
    },
];

impl Wizard for DependentsWizard {
    type Step = Step;
    type Data = DependentsData;

    fn steps(&self) -> &'static [StepDef<Self>] {
        STEPS
    }
}
