//! The built-in email task: a producer helper, the payload, and the worker that sends it.

pub mod mailer;
pub mod payload;
pub mod worker;

use crate::worker::codec::EncodingError;
use crate::worker::task::{Task, task_types};
pub use mailer::{Mailer, MailerError, SmtpMailer};
pub use payload::EmailPayload;
pub use worker::{EMAIL_QUEUE, EmailWorker};

/// Build the task for `payload`, addressed to the email queue. Submit it with
/// [`crate::worker::enqueue::Enqueuer::enqueue_task`].
pub fn new_email_task(payload: &EmailPayload) -> Result<Task, EncodingError> {
    let mut task = Task::new(task_types::EMAIL_DELIVER, payload)?;
    task.queue = Some(EMAIL_QUEUE.to_owned());
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_task() {
        let payload = EmailPayload::new(vec!["a@x.com".to_owned()], "Welcome", "<p>Hi</p>");

        let task = new_email_task(&payload).unwrap();

        assert_eq!(task.task_type, task_types::EMAIL_DELIVER);
        assert_eq!(task.queue.as_deref(), Some("critical"));
        assert_eq!(task.decode_payload::<EmailPayload>().unwrap(), payload);
    }
}
