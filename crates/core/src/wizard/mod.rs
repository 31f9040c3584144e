pub mod dependents;
pub mod navigate;
pub mod order;
pub mod profile;
pub mod registration;
pub mod step;
pub mod validate;

pub use navigate::{advance, entry_step, retreat, Backward, Forward, NavigationError};
pub use step::{Expect, FieldValue, StepDef, UserInput, Wizard};
pub use validate::{
    ensure_allowed_media_type, parse_past_date, validate, ValidationError, ALLOWED_IMAGE_TYPES,
};
