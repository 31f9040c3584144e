use remedi_core::wizard::step::{Expect, StepDef, Wizard};
use remedi_core::wizard::ValidationError;
use remedi_core::{Dependent, OrderId};

/// Outbound message to the subject: plain text, or text with quick-reply
/// buttons.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundPrompt {
    Text { body: String },
    Choice { body: String, options: Vec<String> },
}

impl OutboundPrompt {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    pub fn choice(body: impl Into<String>, options: Vec<String>) -> Self {
        Self::Choice { body: body.into(), options }
    }

    pub fn body(&self) -> &str {
        match self {
            Self::Text { body } | Self::Choice { body, .. } => body,
        }
    }
}

pub const MENU_PLACE_ORDER: &str = "Place an order";
pub const MENU_EDIT_PROFILE: &str = "Edit my profile";
pub const MENU_DEPENDENTS: &str = "My dependents";
pub const MENU_HELP: &str = "Help";

pub fn home_menu() -> OutboundPrompt {
    OutboundPrompt::choice(
        "What can we help you with today?",
        vec![
            MENU_PLACE_ORDER.to_owned(),
            MENU_EDIT_PROFILE.to_owned(),
            MENU_DEPENDENTS.to_owned(),
            MENU_HELP.to_owned(),
        ],
    )
}

pub fn welcome() -> OutboundPrompt {
    OutboundPrompt::text(
        "Welcome to Remedi! Let's get you registered — it only takes a minute. \
         You can type `back` to change an earlier answer or `cancel` to stop.",
    )
}

pub fn help_message() -> OutboundPrompt {
    OutboundPrompt::text(
        "Order medication, update your details, or manage dependents from the menu. \
         While in a flow, type `back` to revisit the previous question and \
         `cancel` to return here.",
    )
}

pub fn timeout_notice() -> OutboundPrompt {
    OutboundPrompt::text(
        "That session sat quiet for a while, so we closed it to keep your details safe. \
         Let's start fresh.",
    )
}

pub fn invalid_input(error: &ValidationError) -> OutboundPrompt {
    OutboundPrompt::text(format!("Sorry, {error}. Please try again."))
}

pub fn apology() -> OutboundPrompt {
    OutboundPrompt::text("Something went wrong on our side. Let's go back to the start.")
}

pub fn registration_complete(first_name: &str) -> OutboundPrompt {
    OutboundPrompt::text(format!(
        "You're all set, {first_name}! Your profile is registered and you can order any time."
    ))
}

pub fn order_placed(order_id: &OrderId) -> OutboundPrompt {
    OutboundPrompt::text(format!(
        "Thank you — your order {order_id} has been sent to the pharmacy. \
         We'll message you as soon as it is ready."
    ))
}

pub fn order_cancelled() -> OutboundPrompt {
    OutboundPrompt::text("No problem, that order has been discarded.")
}

pub fn profile_updated(field_label: &str) -> OutboundPrompt {
    OutboundPrompt::text(format!("Done — your {} has been updated.", field_label.to_lowercase()))
}

pub fn dependent_added(dependent: &Dependent) -> OutboundPrompt {
    OutboundPrompt::text(format!("{} has been added as dependent {}.", dependent.first_name, dependent.dependent_number))
}

pub fn dependent_removed(label: &str) -> OutboundPrompt {
    OutboundPrompt::text(format!("{label} has been removed from your profile."))
}

pub fn dependent_roster(dependents: &[Dependent]) -> OutboundPrompt {
    if dependents.is_empty() {
        return OutboundPrompt::text("You have no dependents on your profile yet.");
    }
    let mut lines = vec!["Your dependents:".to_owned()];
    for dependent in dependents {
        lines.push(format!("• {}", dependent.label()));
    }
    OutboundPrompt::text(lines.join("\n"))
}

pub fn attachment_progress(count: usize, cap: usize) -> OutboundPrompt {
    OutboundPrompt::choice(
        format!("Got it — {count} of {cap} photos. Send another, or tap Done."),
        vec![remedi_core::wizard::order::IMAGES_DONE_LABEL.to_owned()],
    )
}

/// Render a wizard step as an outbound prompt. Numbered lists are written
/// into the body because the provider caps quick-reply buttons at three.
pub fn render_step<W: Wizard>(def: &StepDef<W>, data: &W::Data) -> OutboundPrompt {
    let body = (def.prompt)(data);
    match &def.expect {
        Expect::Text | Expect::Date => OutboundPrompt::text(body),
        Expect::Buttons(options) => OutboundPrompt::choice(
            body,
            options.iter().map(|option| (*option).to_owned()).collect(),
        ),
        Expect::Numbered(options_for) => {
            let options = options_for(data);
            let mut lines = vec![body];
            for (index, option) in options.iter().enumerate() {
                lines.push(format!("{}. {}", index + 1, option));
            }
            OutboundPrompt::text(lines.join("\n"))
        }
        Expect::Images => OutboundPrompt::choice(
            body,
            vec![remedi_core::wizard::order::IMAGES_DONE_LABEL.to_owned()],
        ),
    }
}
