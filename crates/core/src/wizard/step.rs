use chrono::NaiveDate;

/// Normalized user input, as the engine sees it after the transport layer
/// strips provider framing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserInput {
    Text(String),
    Choice(String),
    Image { media_ref: String, mime_type: String },
}

/// Input shape a step expects. `Numbered` options may depend on the data
/// captured so far (for lists snapshotted at wizard entry).
pub enum Expect<D> {
    Text,
    Date,
    Buttons(&'static [&'static str]),
    Numbered(fn(&D) -> Vec<String>),
    Images,
}

/// A validated field value, ready to be written into a wizard's data struct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Choice(String),
    Date(NaiveDate),
    /// An accepted image reference; the controller resolves and downloads it.
    Media { media_ref: String, mime_type: String },
    /// Number of items committed to the ephemeral aggregate when an images
    /// step ends.
    Attachments(usize),
}

impl FieldValue {
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_choice(self) -> Option<String> {
        match self {
            Self::Choice(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_date(self) -> Option<NaiveDate> {
        match self {
            Self::Date(value) => Some(value),
            _ => None,
        }
    }
}

/// One addressable unit of a wizard. Owns exactly one field of the wizard's
/// data struct; `apply` and `clear` are the only writers of that field.
pub struct StepDef<W: Wizard + ?Sized> {
    pub step: W::Step,
    pub prompt: fn(&W::Data) -> String,
    pub expect: Expect<W::Data>,
    /// Step is skipped whenever this evaluates false against the current
    /// data. Absent means always active.
    pub condition: Option<fn(&W::Data) -> bool>,
    /// Runs when the skip-scan passes over an inactive step, so downstream
    /// steps observe a fully populated bag.
    pub default_fill: Option<fn(&mut W::Data)>,
    pub apply: fn(&mut W::Data, FieldValue),
    pub clear: fn(&mut W::Data),
}

/// A wizard: an ordered step table plus the two override tables the
/// navigation resolver consults before falling back to linear scanning.
pub trait Wizard {
    type Step: Copy + PartialEq + Eq + std::fmt::Debug + Send + Sync + 'static;
    type Data: Clone + Default + std::fmt::Debug + Send + Sync;

    fn steps(&self) -> &'static [StepDef<Self>];

    /// Backward-override table: where the back command lands from `step`,
    /// computed from the data snapshot. Absent means linear decrement with
    /// skip-scan.
    fn back_override(&self, step: Self::Step) -> Option<fn(&Self::Data) -> Self::Step> {
        let _ = step;
        None
    }

    /// Forward jump table for answers that deactivate an entire sub-range in
    /// one pass. Absent (or a None result) means plain increment with
    /// skip-scan.
    fn jump_override(&self, step: Self::Step) -> Option<fn(&Self::Data) -> Option<Self::Step>> {
        let _ = step;
        None
    }

    fn find(&self, step: Self::Step) -> Option<&'static StepDef<Self>> {
        self.steps().iter().find(|def| def.step == step)
    }
}
