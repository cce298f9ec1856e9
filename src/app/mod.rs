//! Lifecycle of the worker process: connect, register the built-in workers, run the pool until a
//! shutdown signal, drain.

pub mod context;
pub mod run;

use crate::config::AppConfig;
use crate::email::EmailWorker;
use crate::error::CourierResult;
use crate::worker::processor::Processor;
use crate::worker::task::task_types;
pub use context::AppContext;
pub use run::{graceful_shutdown_signal, run};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Build the worker pool with every built-in worker registered. Fails if any task type a
/// producer can emit has no worker.
pub fn processor(context: &AppContext) -> CourierResult<Processor> {
    let config = context.config();
    Processor::builder(context.broker().clone(), &config.service.worker)
        .register(EmailWorker::from_config(&config.email)?)?
        .expect_task_types(task_types::ALL)
        .build()
}

/// Run the worker process for `config` until it receives ctrl-c or SIGTERM.
pub async fn start(config: AppConfig) -> CourierResult<()> {
    config.validate(true)?;

    info!(
        app = config.app.name,
        environment = %config.environment,
        "Starting worker process"
    );
    let context = AppContext::new(config).await?;
    let processor = processor(&context)?;

    run(processor, &context, CancellationToken::new()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::task::TaskType;

    #[tokio::test]
    async fn built_in_workers_cover_all_task_types() {
        let context = AppContext::new(AppConfig::test(None).unwrap())
            .await
            .unwrap();

        let processor = processor(&context).unwrap();

        let task_types = processor.task_types().cloned().collect::<Vec<TaskType>>();
        assert_eq!(task_types, task_types::ALL.to_vec());
    }
}
