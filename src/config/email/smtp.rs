use crate::config::email::Email;
use lettre::SmtpTransport;
use lettre::message::MessageBuilder;
use lettre::transport::smtp::SmtpTransportBuilder;
use lettre::transport::smtp::authentication::Credentials;
use serde_derive::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;
use url::Url;
use validator::{Validate, ValidationErrors};

#[serde_as]
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct Smtp {
    #[validate(nested)]
    pub connection: SmtpConnection,

    /// Timeout for each SMTP command. Uses lettre's default when not provided.
    #[serde(default)]
    #[serde_as(as = "Option<serde_with::DurationMilliSeconds>")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged, rename_all = "kebab-case")]
#[non_exhaustive]
pub enum SmtpConnection {
    // Checked first so a `uri` override wins over fields inherited from the default config.
    Uri(SmtpConnectionUri),
    Fields(SmtpConnectionFields),
}

impl Validate for SmtpConnection {
    fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            SmtpConnection::Fields(fields) => fields.validate(),
            SmtpConnection::Uri(uri) => uri.validate(),
        }
    }
}

/// Relay host and sender credentials, equivalent to PLAIN auth against `host:port`.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct SmtpConnectionFields {
    #[validate(length(min = 1))]
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub security: SmtpSecurity,
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct SmtpConnectionUri {
    pub uri: Url,
}

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum SmtpSecurity {
    /// Upgrade a plaintext connection with `STARTTLS` (usually port 587).
    #[default]
    Starttls,
    /// TLS from the first byte (usually port 465).
    Tls,
    /// No encryption. Only for local relays such as mailpit.
    None,
}

impl From<&Email> for MessageBuilder {
    fn from(value: &Email) -> Self {
        let builder = MessageBuilder::new().from(value.from.clone());
        match value.reply_to.as_ref() {
            Some(reply_to) => builder.reply_to(reply_to.clone()),
            None => builder,
        }
    }
}

impl TryFrom<&Smtp> for SmtpTransport {
    type Error = lettre::transport::smtp::Error;

    fn try_from(value: &Smtp) -> Result<Self, Self::Error> {
        let builder = match &value.connection {
            SmtpConnection::Fields(fields) => transport_builder(fields)?,
            SmtpConnection::Uri(uri) => SmtpTransport::from_url(uri.uri.as_ref())?,
        };
        Ok(builder.timeout(value.timeout).build())
    }
}

fn transport_builder(
    fields: &SmtpConnectionFields,
) -> Result<SmtpTransportBuilder, lettre::transport::smtp::Error> {
    let builder = match fields.security {
        SmtpSecurity::Starttls => SmtpTransport::starttls_relay(&fields.host)?,
        SmtpSecurity::Tls => SmtpTransport::relay(&fields.host)?,
        SmtpSecurity::None => SmtpTransport::builder_dangerous(&fields.host),
    };
    let builder = match fields.port {
        Some(port) => builder.port(port),
        None => builder,
    };
    Ok(builder.credentials(Credentials::new(
        fields.username.clone(),
        fields.password.clone(),
    )))
}
