use serde::{Deserialize, Serialize};

use crate::domain::media::ATTACHMENT_CAP;
use crate::domain::order::{DeliveryMethod, OrderType};
use crate::wizard::step::{Expect, FieldValue, StepDef, Wizard};

pub const ORDER_TYPE_OPTIONS: &[&str] = &["New prescription", "Refill", "Over the counter"];
pub const DELIVERY_METHOD_OPTIONS: &[&str] = &["Delivery", "Pickup"];
pub const CONFIRM_OPTIONS: &[&str] = &["Confirm order", "Cancel order"];

/// Literal list entry that activates the free-text address step.
pub const NEW_ADDRESS_OPTION: &str = "Enter a new address";

/// Quick-reply label that ends the prescription image loop early.
pub const IMAGES_DONE_LABEL: &str = "Done";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    OrderType,
    PrescriptionImages,
    RefillReference,
    OtcItems,
    DeliveryMethod,
    PharmacySelect,
    DeliveryAddress,
    NewAddress,
    ExtraNotes,
    Confirm,
}

/// Accumulated order state. The option vectors are snapshotted when the
/// wizard starts so prompts and validation stay stable for the whole run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub order_type: Option<OrderType>,
    pub image_count: Option<usize>,
    pub refill_reference: Option<String>,
    pub otc_items: Option<String>,
    pub delivery_method: Option<DeliveryMethod>,
    pub pharmacy: Option<String>,
    pub delivery_address: Option<String>,
    pub new_address: Option<String>,
    pub extra_notes: Option<String>,
    pub confirmed: Option<bool>,
    pub pharmacy_options: Vec<String>,
    pub address_options: Vec<String>,
}

impl OrderDraft {
    pub fn wants_new_address(&self) -> bool {
        self.delivery_address.as_deref() == Some(NEW_ADDRESS_OPTION)
    }

    /// The address an order ships to, once the wizard has collected one.
    pub fn resolved_address(&self) -> Option<&str> {
        if self.wants_new_address() {
            self.new_address.as_deref()
        } else {
            self.delivery_address.as_deref()
        }
    }

    fn summary(&self) -> String {
        let mut lines = vec!["Please confirm your order:".to_owned()];
        if let Some(order_type) = self.order_type {
            lines.push(format!("• Type: {}", order_type.label()));
        }
        if let Some(count) = self.image_count {
            lines.push(format!("• Prescription photos: {count}"));
        }
        if let Some(reference) = &self.refill_reference {
            lines.push(format!("• Refill of: {reference}"));
        }
        if let Some(items) = &self.otc_items {
            lines.push(format!("• Items: {items}"));
        }
        match self.delivery_method {
            Some(DeliveryMethod::Pickup) => {
                if let Some(pharmacy) = &self.pharmacy {
                    lines.push(format!("• Pickup at: {pharmacy}"));
                }
            }
            Some(DeliveryMethod::Delivery) => {
                if let Some(address) = self.resolved_address() {
                    lines.push(format!("• Deliver to: {address}"));
                }
            }
            None => {}
        }
        if let Some(notes) = &self.extra_notes {
            lines.push(format!("• Notes: {notes}"));
        }
        lines.join("\n")
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OrderWizard;

static STEPS: &[StepDef<OrderWizard>] = &[
    StepDef {
        step: Step::OrderType,
        prompt: |_| "What would you like to order?".to_owned(),
        expect: Expect::Buttons(ORDER_TYPE_OPTIONS),
        condition: None,
        default_fill: None,
        apply: |data, value| {
            data.order_type = value.into_choice().and_then(|label| OrderType::from_label(&label));
        },
        clear: |data| data.order_type = None,
    },
    StepDef {
        step: Step::PrescriptionImages,
        prompt: |_| {
            format!(
                "Send photos of your prescription (up to {ATTACHMENT_CAP}). \
                 Tap Done when you have sent them all."
            )
        },
        expect: Expect::Images,
        condition: Some(|data| data.order_type == Some(OrderType::NewPrescription)),
        default_fill: None,
        apply: |data, value| {
            if let FieldValue::Attachments(count) = value {
                data.image_count = Some(count);
            }
        },
        clear: |data| data.image_count = None,
    },
    StepDef {
        step: Step::RefillReference,
        prompt: |_| "Which order or script number should we refill?".to_owned(),
        expect: Expect::Text,
        condition: Some(|data| data.order_type == Some(OrderType::Refill)),
        default_fill: None,
        apply: |data, value| data.refill_reference = value.into_text(),
        clear: |data| data.refill_reference = None,
    },
    StepDef {
        step: Step::OtcItems,
        prompt: |_| "List the over-the-counter items you need, one per line.".to_owned(),
        expect: Expect::Text,
        condition: Some(|data| data.order_type == Some(OrderType::OverTheCounter)),
        default_fill: None,
        apply: |data, value| data.otc_items = value.into_text(),
        clear: |data| data.otc_items = None,
    },
    StepDef {
        step: Step::DeliveryMethod,
        prompt: |_| "Should we deliver, or will you pick up at a pharmacy?".to_owned(),
        expect: Expect::Buttons(DELIVERY_METHOD_OPTIONS),
        condition: None,
        default_fill: None,
        apply: |data, value| {
            data.delivery_method =
                value.into_choice().and_then(|label| DeliveryMethod::from_label(&label));
        },
        clear: |data| data.delivery_method = None,
    },
    StepDef {
        step: Step::PharmacySelect,
        prompt: |_| "Which pharmacy suits you? Reply with a number.".to_owned(),
        expect: Expect::Numbered(|data| data.pharmacy_options.clone()),
        condition: Some(|data| data.delivery_method == Some(DeliveryMethod::Pickup)),
        default_fill: None,
        apply: |data, value| data.pharmacy = value.into_choice(),
        clear: |data| data.pharmacy = None,
    },
    StepDef {
        step: Step::DeliveryAddress,
        prompt: |_| "Where should we deliver? Reply with a number.".to_owned(),
        expect: Expect::Numbered(|data| {
            let mut options = data.address_options.clone();
            options.push(NEW_ADDRESS_OPTION.to_owned());
            options
        }),
        condition: Some(|data| data.delivery_method == Some(DeliveryMethod::Delivery)),
        default_fill: None,
        apply: |data, value| data.delivery_address = value.into_choice(),
        clear: |data| data.delivery_address = None,
    },
    StepDef {
        step: Step::NewAddress,
        prompt: |_| "Type the full delivery address.".to_owned(),
        expect: Expect::Text,
        condition: Some(|data| data.wants_new_address()),
        default_fill: None,
        apply: |data, value| data.new_address = value.into_text(),
        clear: |data| data.new_address = None,
    },
    StepDef {
        step: Step::ExtraNotes,
        prompt: |_| "Any extra notes for the pharmacist? Type them now, or a dash for none.".to_owned(),
        expect: Expect::Text,
        condition: None,
        default_fill: None,
        apply: |data, value| data.extra_notes = value.into_text(),
        clear: |data| data.extra_notes = None,
    },
    StepDef {
        step: Step::Confirm,
        prompt: |data| data.summary(),
        expect: Expect::Buttons(CONFIRM_OPTIONS),
        condition: None,
        default_fill: None,
        apply: |data, value| {
            data.confirmed = value.into_choice().map(|label| label == "Confirm order");
        },
        clear: |data| data.confirmed = None,
    },
];

impl Wizard for OrderWizard {
    type Step = Step;
    type Data = OrderDraft;

    fn steps(&self) -> &'static [StepDef<Self>] {
        STEPS
    }

    fn back_override(&self, step: Step) -> Option<fn(&OrderDraft) -> Step> {
        match step {
            // The raw index-1 predecessor of ExtraNotes is NewAddress, which
            // is wrong for every path that did not type a fresh address.
            Step::ExtraNotes => Some(|data| {
                if data.delivery_method == Some(DeliveryMethod::Pickup) {
                    Step::PharmacySelect
                } else if data.wants_new_address() {
                    Step::NewAddress
                } else {
                    Step::DeliveryAddress
                }
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::order::{DeliveryMethod, OrderType};
    use crate::wizard::navigate::{advance, retreat, Backward, Forward};

    use super::{OrderDraft, OrderWizard, Step, NEW_ADDRESS_OPTION};

    fn pickup_draft() -> OrderDraft {
        OrderDraft {
            order_type: Some(OrderType::NewPrescription),
            image_count: Some(2),
            delivery_method: Some(DeliveryMethod::Pickup),
            pharmacy: Some("CityMed (CBD)".to_owned()),
            pharmacy_options: vec!["CityMed (CBD)".to_owned()],
            ..OrderDraft::default()
        }
    }

    #[test]
    fn after_prescription_images_comes_delivery_method() {
        let mut draft = OrderDraft {
            order_type: Some(OrderType::NewPrescription),
            image_count: Some(6),
            ..OrderDraft::default()
        };

        let next = advance(&OrderWizard, &mut draft, Step::PrescriptionImages).expect("known step");

        assert_eq!(next, Forward::Step(Step::DeliveryMethod));
    }

    #[test]
    fn refill_orders_skip_images_and_otc_steps() {
        let mut draft =
            OrderDraft { order_type: Some(OrderType::Refill), ..OrderDraft::default() };

        let next = advance(&OrderWizard, &mut draft, Step::OrderType).expect("known step");

        assert_eq!(next, Forward::Step(Step::RefillReference));
    }

    #[test]
    fn pickup_routes_to_pharmacy_then_notes() {
        let mut draft = pickup_draft();

        let next = advance(&OrderWizard, &mut draft, Step::DeliveryMethod).expect("known step");
        assert_eq!(next, Forward::Step(Step::PharmacySelect));

        let next = advance(&OrderWizard, &mut draft, Step::PharmacySelect).expect("known step");
        assert_eq!(next, Forward::Step(Step::ExtraNotes));
    }

    #[test]
    fn back_from_extra_notes_resolves_to_pharmacy_for_pickup() {
        let mut draft = pickup_draft();

        let back = retreat(&OrderWizard, &mut draft, Step::ExtraNotes).expect("known step");

        assert_eq!(back, Backward::Step(Step::PharmacySelect));
        assert_eq!(draft.pharmacy, None, "re-entered selection is cleared");
    }

    #[test]
    fn back_from_extra_notes_resolves_to_saved_address_for_delivery() {
        let mut draft = OrderDraft {
            order_type: Some(OrderType::Refill),
            refill_reference: Some("ORD-0001".to_owned()),
            delivery_method: Some(DeliveryMethod::Delivery),
            delivery_address: Some("12 Kloof St, Gardens".to_owned()),
            address_options: vec!["12 Kloof St, Gardens".to_owned()],
            ..OrderDraft::default()
        };

        let back = retreat(&OrderWizard, &mut draft, Step::ExtraNotes).expect("known step");

        assert_eq!(back, Backward::Step(Step::DeliveryAddress));
    }

    #[test]
    fn back_from_extra_notes_resolves_to_new_address_when_one_was_typed() {
        let mut draft = OrderDraft {
            delivery_method: Some(DeliveryMethod::Delivery),
            delivery_address: Some(NEW_ADDRESS_OPTION.to_owned()),
            new_address: Some("3 Main Rd, Observatory".to_owned()),
            ..OrderDraft::default()
        };

        let back = retreat(&OrderWizard, &mut draft, Step::ExtraNotes).expect("known step");

        assert_eq!(back, Backward::Step(Step::NewAddress));
        assert_eq!(draft.new_address, None);
        assert_eq!(
            draft.delivery_address.as_deref(),
            Some(NEW_ADDRESS_OPTION),
            "the list selection that led here is preserved"
        );
    }

    #[test]
    fn choosing_a_new_address_activates_the_free_text_step() {
        let mut draft = OrderDraft {
            delivery_method: Some(DeliveryMethod::Delivery),
            delivery_address: Some(NEW_ADDRESS_OPTION.to_owned()),
            ..OrderDraft::default()
        };

        let next = advance(&OrderWizard, &mut draft, Step::DeliveryAddress).expect("known step");

        assert_eq!(next, Forward::Step(Step::NewAddress));
    }

    #[test]
    fn resolved_address_prefers_the_typed_address() {
        let draft = OrderDraft {
            delivery_address: Some(NEW_ADDRESS_OPTION.to_owned()),
            new_address: Some("3 Main Rd, Observatory".to_owned()),
            ..OrderDraft::default()
        };
        assert_eq!(draft.resolved_address(), Some("3 Main Rd, Observatory"));

        let saved = OrderDraft {
            delivery_address: Some("12 Kloof St, Gardens".to_owned()),
            ..OrderDraft::default()
        };
        assert_eq!(saved.resolved_address(), Some("12 Kloof St, Gardens"));
    }

    #[test]
    fn confirm_is_the_last_step() {
        let mut draft = pickup_draft();
        draft.extra_notes = Some("-".to_owned());
        draft.confirmed = Some(true);

        assert_eq!(advance(&OrderWizard, &mut draft, Step::Confirm), Ok(Forward::Complete));
    }

    #[test]
    fn confirm_summary_reflects_the_pickup_path() {
        let mut draft = pickup_draft();
        draft.extra_notes = Some("call on arrival".to_owned());

        let summary = draft.summary();

        assert!(summary.contains("New prescription"));
        assert!(summary.contains("Pickup at: CityMed (CBD)"));
        assert!(summary.contains("call on arrival"));
        assert!(!summary.contains("Deliver to"));
    }
}
