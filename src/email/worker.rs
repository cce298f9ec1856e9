use crate::config::email::Email;
use crate::email::mailer::{Mailer, MailerError, SmtpMailer};
use crate::email::payload::EmailPayload;
use crate::error::email::EmailError;
use crate::worker::Worker;
use crate::worker::config::EnqueueConfig;
use crate::worker::job::JobContext;
use crate::worker::outcome::HandleError;
use crate::worker::task::{TaskType, task_types};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MessageBuilder};
use lettre::{Address, Message};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use validator::Validate;

/// Emails are user-facing, so they go on the highest weight queue by default.
pub const EMAIL_QUEUE: &str = "critical";

/// Delivers an [`EmailPayload`] through a [`Mailer`].
///
/// Delivery is at-least-once: if the worker stops after the relay accepted a message but before
/// the task was acked, the task is redelivered and the recipient gets the email twice.
pub struct EmailWorker {
    mailer: Arc<dyn Mailer>,
    config: Email,
}

impl EmailWorker {
    pub fn new(mailer: Arc<dyn Mailer>, config: &Email) -> Self {
        Self {
            mailer,
            config: config.clone(),
        }
    }

    /// An [`EmailWorker`] that sends through the SMTP relay in `config`.
    pub fn from_config(config: &Email) -> Result<Self, EmailError> {
        let mailer = SmtpMailer::new(&config.smtp)?;
        Ok(Self::new(Arc::new(mailer), config))
    }

    /// Compose the message. Fails if an address can't be parsed, which retrying can't fix.
    fn message(&self, payload: &EmailPayload) -> Result<Message, EmailError> {
        let builder = payload.addresses.iter().try_fold(
            <MessageBuilder as From<&Email>>::from(&self.config),
            |builder, address| -> Result<MessageBuilder, EmailError> {
                let address: Address = address.parse()?;
                Ok(builder.to(Mailbox::new(None, address)))
            },
        )?;
        Ok(builder
            .subject(payload.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(payload.body.clone())?)
    }
}

#[async_trait]
impl Worker<EmailPayload> for EmailWorker {
    const TASK_TYPE: TaskType = task_types::EMAIL_DELIVER;

    fn enqueue_config() -> EnqueueConfig {
        EnqueueConfig::builder().queue(EMAIL_QUEUE).build()
    }

    #[instrument(skip_all)]
    async fn handle(&self, context: &JobContext, payload: EmailPayload) -> Result<(), HandleError> {
        let to = payload.addresses.join(", ");

        let message = payload
            .validate()
            .map_err(HandleError::terminal)
            .and_then(|_| self.message(&payload).map_err(HandleError::terminal));
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                error!(
                    to,
                    subject = payload.subject,
                    %err,
                    "Unable to compose email, it will not be sent"
                );
                return Err(err);
            }
        };

        match self.mailer.send(&message).await {
            Ok(()) => {
                info!(to, subject = payload.subject, "Email sent");
                Ok(())
            }
            Err(err @ MailerError::Permanent(_)) => {
                error!(
                    to,
                    subject = payload.subject,
                    attempt = context.attempt,
                    %err,
                    "Email was rejected"
                );
                Err(HandleError::terminal(err))
            }
            Err(err) => {
                warn!(
                    to,
                    subject = payload.subject,
                    attempt = context.attempt,
                    %err,
                    "Unable to send email"
                );
                Err(HandleError::retryable(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::email::mailer::MockMailer;
    use rstest::{fixture, rstest};

    #[fixture]
    fn config() -> Email {
        AppConfig::test(None).unwrap().email
    }

    fn payload(addresses: &[&str]) -> EmailPayload {
        EmailPayload::new(
            addresses.iter().map(|address| address.to_string()).collect(),
            "Welcome",
            "<p>Hi</p>",
        )
    }

    fn context() -> JobContext {
        JobContext::test(EmailWorker::TASK_TYPE)
    }

    #[rstest]
    #[tokio::test]
    async fn sends_exactly_once(config: Email) {
        let mut mailer = MockMailer::default();
        mailer
            .expect_send()
            .withf(|message| {
                let formatted = String::from_utf8(message.formatted()).unwrap();
                let recipients = message
                    .envelope()
                    .to()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>();
                recipients == vec!["a@x.com"]
                    && formatted.contains("From: no-reply@example.com")
                    && formatted.contains("To: a@x.com")
                    && formatted.contains("Subject: Welcome")
                    && formatted.contains("Content-Type: text/html; charset=utf-8")
                    && formatted.contains("<p>Hi</p>")
            })
            .times(1)
            .returning(|_| Ok(()));
        let worker = EmailWorker::new(Arc::new(mailer), &config);

        worker.handle(&context(), payload(&["a@x.com"])).await.unwrap();
    }

    #[rstest]
    #[tokio::test]
    async fn one_message_for_all_recipients(config: Email) {
        let mut mailer = MockMailer::default();
        mailer
            .expect_send()
            .withf(|message| message.envelope().to().len() == 2)
            .times(1)
            .returning(|_| Ok(()));
        let worker = EmailWorker::new(Arc::new(mailer), &config);

        worker
            .handle(&context(), payload(&["a@x.com", "b@y.org"]))
            .await
            .unwrap();
    }

    #[rstest]
    #[tokio::test]
    async fn transient_failure_is_retryable(config: Email) {
        let mut mailer = MockMailer::default();
        mailer
            .expect_send()
            .times(1)
            .returning(|_| Err(MailerError::Transient("421 try again later".into())));
        let worker = EmailWorker::new(Arc::new(mailer), &config);

        let err = worker
            .handle(&context(), payload(&["a@x.com"]))
            .await
            .unwrap_err();

        assert!(!err.is_terminal());
    }

    #[rstest]
    #[tokio::test]
    async fn permanent_failure_is_terminal(config: Email) {
        let mut mailer = MockMailer::default();
        mailer
            .expect_send()
            .times(1)
            .returning(|_| Err(MailerError::Permanent("550 no such user".into())));
        let worker = EmailWorker::new(Arc::new(mailer), &config);

        let err = worker
            .handle(&context(), payload(&["a@x.com"]))
            .await
            .unwrap_err();

        assert!(err.is_terminal());
    }

    #[rstest]
    #[case(&[])]
    #[case(&["not an address"])]
    #[tokio::test]
    async fn invalid_payload_is_terminal(config: Email, #[case] addresses: &[&str]) {
        let mut mailer = MockMailer::default();
        mailer.expect_send().never();
        let worker = EmailWorker::new(Arc::new(mailer), &config);

        let err = worker
            .handle(&context(), payload(addresses))
            .await
            .unwrap_err();

        assert!(err.is_terminal());
    }

    #[test]
    fn queue() {
        assert_eq!(
            EmailWorker::enqueue_config().queue.as_deref(),
            Some(EMAIL_QUEUE)
        );
    }
}
