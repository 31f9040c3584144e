use chrono::NaiveDate;
use thiserror::Error;

use crate::wizard::step::{Expect, FieldValue, UserInput};

/// Content types an image step accepts, checked against both the declared
/// inbound mime and the type reported by the media endpoint after download.
pub const ALLOWED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif"];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("`{raw}` is not a date in DD/MM/YYYY or DDMMYYYY form")]
    UnparseableDate { raw: String },
    #[error("{date} lies in the future")]
    FutureDate { date: NaiveDate },
    #[error("`{raw}` is not one of the offered options")]
    UnknownOption { raw: String },
    #[error("expected a number between 1 and {max}")]
    ChoiceOutOfRange { max: usize },
    #[error("`{raw}` is not a number")]
    NotANumber { raw: String },
    #[error("a typed reply is needed here")]
    ExpectedText,
    #[error("an image attachment is needed here")]
    ExpectedImage,
    #[error("attachments of type `{mime}` are not accepted (JPEG, PNG or GIF only)")]
    UnsupportedMediaType { mime: String },
    #[error("the attachment could not be retrieved")]
    MediaUnavailable,
}

pub fn ensure_allowed_media_type(mime: &str) -> Result<(), ValidationError> {
    let normalized = mime.trim().to_ascii_lowercase();
    if ALLOWED_IMAGE_TYPES.contains(&normalized.as_str()) {
        Ok(())
    } else {
        Err(ValidationError::UnsupportedMediaType { mime: mime.to_owned() })
    }
}

/// Accepts `DD/MM/YYYY` and `DDMMYYYY`; rejects anything unparseable and any
/// date after `today`.
pub fn parse_past_date(raw: &str, today: NaiveDate) -> Result<NaiveDate, ValidationError> {
    let trimmed = raw.trim();
    let parsed = NaiveDate::parse_from_str(trimmed, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%d%m%Y"))
        .map_err(|_| ValidationError::UnparseableDate { raw: trimmed.to_owned() })?;
    if parsed > today {
        return Err(ValidationError::FutureDate { date: parsed });
    }
    Ok(parsed)
}

/// Validates one inbound input against a step's expected shape. Never
/// mutates anything; the caller applies the returned value only after a
/// successful advance.
pub fn validate<D>(
    expect: &Expect<D>,
    data: &D,
    input: &UserInput,
    today: NaiveDate,
) -> Result<FieldValue, ValidationError> {
    match expect {
        Expect::Text => match input {
            UserInput::Text(body) if !body.trim().is_empty() => {
                Ok(FieldValue::Text(body.trim().to_owned()))
            }
            _ => Err(ValidationError::ExpectedText),
        },
        Expect::Date => match input {
            UserInput::Text(body) => parse_past_date(body, today).map(FieldValue::Date),
            _ => Err(ValidationError::ExpectedText),
        },
        Expect::Buttons(options) => {
            let label = match input {
                UserInput::Choice(label) => label.as_str(),
                UserInput::Text(body) => body.trim(),
                UserInput::Image { .. } => return Err(ValidationError::ExpectedText),
            };
            if options.contains(&label) {
                Ok(FieldValue::Choice(label.to_owned()))
            } else {
                Err(ValidationError::UnknownOption { raw: label.to_owned() })
            }
        }
        Expect::Numbered(options_for) => {
            let options = options_for(data);
            let raw = match input {
                UserInput::Text(body) => body.trim(),
                UserInput::Choice(label) => label.as_str(),
                UserInput::Image { .. } => return Err(ValidationError::ExpectedText),
            };
            // Quick-reply taps echo the option label; typed replies are the
            // 1-based position.
            if options.iter().any(|option| option == raw) {
                return Ok(FieldValue::Choice(raw.to_owned()));
            }
            let index: usize =
                raw.parse().map_err(|_| ValidationError::NotANumber { raw: raw.to_owned() })?;
            if index == 0 || index > options.len() {
                return Err(ValidationError::ChoiceOutOfRange { max: options.len() });
            }
            Ok(FieldValue::Choice(options[index - 1].clone()))
        }
        Expect::Images => match input {
            UserInput::Image { media_ref, mime_type } => {
                ensure_allowed_media_type(mime_type)?;
                Ok(FieldValue::Media {
                    media_ref: media_ref.clone(),
                    mime_type: mime_type.clone(),
                })
            }
            _ => Err(ValidationError::ExpectedImage),
        },
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{ensure_allowed_media_type, parse_past_date, validate, ValidationError};
    use crate::wizard::step::{Expect, FieldValue, UserInput};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 6).expect("valid date")
    }

    #[test]
    fn dates_parse_in_both_literal_formats() {
        let expected = NaiveDate::from_ymd_opt(1987, 3, 21).expect("valid date");
        assert_eq!(parse_past_date("21/03/1987", today()), Ok(expected));
        assert_eq!(parse_past_date("21031987", today()), Ok(expected));
    }

    #[test]
    fn unparseable_and_future_dates_are_rejected() {
        assert!(matches!(
            parse_past_date("1987-03-21", today()),
            Err(ValidationError::UnparseableDate { .. })
        ));
        assert!(matches!(
            parse_past_date("32/01/2001", today()),
            Err(ValidationError::UnparseableDate { .. })
        ));
        assert!(matches!(
            parse_past_date("01/01/2030", today()),
            Err(ValidationError::FutureDate { .. })
        ));
    }

    #[test]
    fn button_match_is_case_sensitive_and_exact() {
        let expect: Expect<()> = Expect::Buttons(&["Delivery", "Pickup"]);
        assert_eq!(
            validate(&expect, &(), &UserInput::Choice("Pickup".to_owned()), today()),
            Ok(FieldValue::Choice("Pickup".to_owned()))
        );
        assert!(matches!(
            validate(&expect, &(), &UserInput::Text("pickup".to_owned()), today()),
            Err(ValidationError::UnknownOption { .. })
        ));
    }

    #[test]
    fn numbered_choice_maps_one_based_and_rejects_out_of_range() {
        let expect: Expect<()> =
            Expect::Numbered(|_| vec!["Greenpoint Pharmacy (Sea Point)".to_owned(), "CityMed (CBD)".to_owned()]);
        assert_eq!(
            validate(&expect, &(), &UserInput::Text("2".to_owned()), today()),
            Ok(FieldValue::Choice("CityMed (CBD)".to_owned()))
        );
        assert!(matches!(
            validate(&expect, &(), &UserInput::Text("3".to_owned()), today()),
            Err(ValidationError::ChoiceOutOfRange { max: 2 })
        ));
        assert!(matches!(
            validate(&expect, &(), &UserInput::Text("two".to_owned()), today()),
            Err(ValidationError::NotANumber { .. })
        ));
        assert!(matches!(
            validate(&expect, &(), &UserInput::Text("0".to_owned()), today()),
            Err(ValidationError::ChoiceOutOfRange { max: 2 })
        ));
    }

    #[test]
    fn numbered_choice_accepts_the_echoed_label() {
        let expect: Expect<()> = Expect::Numbered(|_| vec!["CityMed (CBD)".to_owned()]);
        assert_eq!(
            validate(&expect, &(), &UserInput::Choice("CityMed (CBD)".to_owned()), today()),
            Ok(FieldValue::Choice("CityMed (CBD)".to_owned()))
        );
    }

    #[test]
    fn image_steps_gate_on_the_declared_mime_type() {
        let expect: Expect<()> = Expect::Images;
        let accepted = validate(
            &expect,
            &(),
            &UserInput::Image { media_ref: "m-1".to_owned(), mime_type: "image/png".to_owned() },
            today(),
        );
        assert_eq!(
            accepted,
            Ok(FieldValue::Media { media_ref: "m-1".to_owned(), mime_type: "image/png".to_owned() })
        );

        let rejected = validate(
            &expect,
            &(),
            &UserInput::Image {
                media_ref: "m-2".to_owned(),
                mime_type: "application/pdf".to_owned(),
            },
            today(),
        );
        assert!(matches!(rejected, Err(ValidationError::UnsupportedMediaType { .. })));

        assert!(matches!(
            validate(&expect, &(), &UserInput::Text("here you go".to_owned()), today()),
            Err(ValidationError::ExpectedImage)
        ));
    }

    #[test]
    fn allow_list_normalizes_case_but_not_content() {
        assert_eq!(ensure_allowed_media_type("IMAGE/JPEG"), Ok(()));
        assert!(ensure_allowed_media_type("image/webp").is_err());
    }
}
