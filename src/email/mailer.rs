use crate::config::email::smtp::Smtp;
use crate::error::email::EmailError;
use async_trait::async_trait;
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;
use tracing::instrument;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MailerError {
    /// The relay refused the message and will keep refusing it, e.g. for an unknown recipient.
    #[error("The mail relay permanently rejected the message: {0}")]
    Permanent(#[source] BoxError),

    /// Anything that might go away on its own: connection failures, timeouts, temporary
    /// rejections.
    #[error("Unable to deliver the message to the mail relay: {0}")]
    Transient(#[source] BoxError),
}

impl From<lettre::transport::smtp::Error> for MailerError {
    fn from(value: lettre::transport::smtp::Error) -> Self {
        if value.is_permanent() {
            Self::Permanent(Box::new(value))
        } else {
            Self::Transient(Box::new(value))
        }
    }
}

/// Sends a composed message to the mail relay.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &Message) -> Result<(), MailerError>;
}

/// [`Mailer`] for an SMTP relay. Connections are pooled by the transport.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(config: &Smtp) -> Result<Self, EmailError> {
        Ok(Self {
            transport: SmtpTransport::try_from(config)?,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    #[instrument(skip_all)]
    async fn send(&self, message: &Message) -> Result<(), MailerError> {
        // The transport is blocking, so keep it off the async worker threads.
        let transport = self.transport.clone();
        let message = message.clone();
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|err| MailerError::Transient(Box::new(err)))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;

    #[test]
    fn display() {
        let err = MailerError::Permanent("550 5.1.1 no such user".into());

        assert_snapshot!(err, @"The mail relay permanently rejected the message: 550 5.1.1 no such user");
    }

    #[tokio::test]
    async fn unreachable_relay_is_transient() {
        let config: Smtp = toml::from_str(
            r#"
            timeout = 500

            [connection]
            host = "127.0.0.1"
            port = 1
            username = ""
            password = ""
            security = "none"
            "#,
        )
        .unwrap();
        let mailer = SmtpMailer::new(&config).unwrap();
        let message = Message::builder()
            .from("no-reply@example.com".parse().unwrap())
            .to("a@x.com".parse().unwrap())
            .subject("Welcome")
            .body("<p>Hi</p>".to_owned())
            .unwrap();

        let err = mailer.send(&message).await.unwrap_err();

        assert!(matches!(err, MailerError::Transient(_)));
    }
}
