pub mod smtp;

use lettre::message::Mailbox;
use serde_derive::{Deserialize, Serialize};
use smtp::Smtp;
use validator::Validate;

/// Sender identity and relay settings used by the email task.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct Email {
    pub from: Mailbox,
    #[serde(default)]
    pub reply_to: Option<Mailbox>,
    #[validate(nested)]
    pub smtp: Smtp,
}
