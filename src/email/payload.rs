use serde_derive::{Deserialize, Serialize};
use std::borrow::Cow;
use validator::{Validate, ValidateEmail, ValidationError};

/// The input of the email task. The body is HTML that was rendered by the producer.
///
/// `subject` and `body` may be empty, but the fields must be present when decoding.
#[derive(Debug, Clone, Eq, PartialEq, Validate, Serialize, Deserialize)]
#[non_exhaustive]
pub struct EmailPayload {
    #[validate(
        length(min = 1, message = "At least one recipient is required"),
        custom(function = "validate_addresses")
    )]
    pub addresses: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl EmailPayload {
    pub fn new(addresses: Vec<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            addresses,
            subject: subject.into(),
            body: body.into(),
        }
    }
}

fn validate_addresses(addresses: &[String]) -> Result<(), ValidationError> {
    let invalid = addresses
        .iter()
        .filter(|address| !address.validate_email())
        .cloned()
        .collect::<Vec<_>>();
    if invalid.is_empty() {
        return Ok(());
    }

    let mut err = ValidationError::new("email")
        .with_message(Cow::from("Recipient addresses must be valid email addresses"));
    err.add_param(Cow::from("addresses"), &invalid);
    Err(err)
}
