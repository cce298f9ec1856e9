use crate::app::AppContext;
use crate::cli::RunCommand;
use crate::config::AppConfig;
use crate::email::{EmailPayload, new_email_task};
use crate::error::CourierResult;
use async_trait::async_trait;
use clap::Parser;
use tracing::info;
use validator::Validate;

#[derive(Debug, Parser)]
#[non_exhaustive]
pub struct EnqueueEmailArgs {
    /// Recipient address. Repeat to send one message to several recipients.
    #[clap(long, required = true)]
    pub to: Vec<String>,

    #[clap(long)]
    pub subject: String,

    /// The HTML body of the email.
    #[clap(long)]
    pub body: String,
}

impl EnqueueEmailArgs {
    fn payload(&self) -> CourierResult<EmailPayload> {
        let payload = EmailPayload::new(self.to.clone(), self.subject.clone(), self.body.clone());
        payload.validate()?;
        Ok(payload)
    }
}

#[async_trait]
impl RunCommand for EnqueueEmailArgs {
    async fn run(&self, config: AppConfig) -> CourierResult<()> {
        let payload = self.payload()?;
        let context = AppContext::new(config).await?;

        let task_id = context
            .enqueuer()
            .enqueue_task(new_email_task(&payload)?)
            .await?;
        info!(%task_id, to = self.to.join(", "), "Enqueued email task");

        Ok(())
    }
}
