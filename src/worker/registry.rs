use crate::error::worker::WorkerError;
use crate::worker::Worker;
use crate::worker::codec;
use crate::worker::config::WorkerConfig;
use crate::worker::job::JobContext;
use crate::worker::outcome::HandleError;
use crate::worker::task::TaskType;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, instrument};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// A [`Worker`] was already registered for the task type.
    #[error("A worker was already registered for task type `{0}`")]
    AlreadyRegistered(TaskType),

    /// Tasks of these types can be produced, but no [`Worker`] was registered to handle them.
    #[error("No worker registered for task types: {}", .0.iter().map(TaskType::as_str).collect::<Vec<_>>().join(", "))]
    MissingTaskTypes(Vec<TaskType>),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RoutingError {
    #[error("No worker registered for task type `{0}`")]
    Unregistered(TaskType),
}

type WorkerFn = Box<
    dyn Send
        + Sync
        + Fn(JobContext, Vec<u8>) -> Pin<Box<dyn Send + Future<Output = Result<(), HandleError>>>>,
>;

/// Type-erased [`Worker`], so workers with different payload types can live in one map.
pub(crate) struct WorkerWrapper {
    pub(crate) task_type: TaskType,
    pub(crate) worker_config: WorkerConfig,
    worker_fn: WorkerFn,
}

impl WorkerWrapper {
    /// `default_config` is the app-wide worker config; it fills anything the worker doesn't set.
    pub(crate) fn new<W, Args>(worker: W, default_config: &WorkerConfig) -> Self
    where
        W: 'static + Worker<Args>,
        Args: 'static + Send + Sync + Serialize + DeserializeOwned,
    {
        let worker_config = worker.worker_config().or(default_config);
        let worker = Arc::new(worker);

        Self {
            task_type: W::TASK_TYPE,
            worker_config,
            worker_fn: Box::new(move |context: JobContext, payload: Vec<u8>| {
                Box::pin(decode_and_handle(worker.clone(), context, payload))
            }),
        }
    }

    #[instrument(skip_all)]
    pub(crate) async fn handle(
        &self,
        context: JobContext,
        payload: Vec<u8>,
    ) -> Result<(), HandleError> {
        let inner = (self.worker_fn)(context, payload);

        if let Some(max_duration) = self.worker_config.enforced_max_duration() {
            tokio::time::timeout(max_duration, inner)
                .await
                .unwrap_or_else(|err| {
                    error!(
                        task_type = %self.task_type,
                        max_duration = max_duration.as_millis(),
                        %err,
                        "Worker timed out"
                    );
                    Err(HandleError::retryable(WorkerError::Timeout(
                        self.task_type.to_string(),
                        max_duration,
                    )))
                })
        } else {
            inner.await
        }
    }
}

async fn decode_and_handle<W, Args>(
    worker: Arc<W>,
    context: JobContext,
    payload: Vec<u8>,
) -> Result<(), HandleError>
where
    W: 'static + Worker<Args>,
    Args: 'static + Send + Sync + Serialize + DeserializeOwned,
{
    let args: Args = codec::decode(&payload)?;
    worker.handle(&context, args).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use insta::assert_snapshot;
    use serde_derive::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct SleepArgs {
        millis: u64,
    }

    struct SleepWorker;

    #[async_trait]
    impl Worker<SleepArgs> for SleepWorker {
        const TASK_TYPE: TaskType = TaskType::from_static("test:sleep");

        async fn handle(&self, _context: &JobContext, args: SleepArgs) -> Result<(), HandleError> {
            tokio::time::sleep(Duration::from_millis(args.millis)).await;
            Ok(())
        }
    }

    fn wrapper(timeout: bool) -> WorkerWrapper {
        WorkerWrapper::new(
            SleepWorker,
            &WorkerConfig::builder()
                .timeout(timeout)
                .max_duration(Duration::from_secs(1))
                .build(),
        )
    }

    fn context() -> JobContext {
        JobContext::test(SleepWorker::TASK_TYPE)
    }

    #[tokio::test(start_paused = true)]
    async fn handle() {
        let result = wrapper(true)
            .handle(context(), br#"{"millis":10}"#.to_vec())
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_retryable() {
        let result = wrapper(true)
            .handle(context(), br#"{"millis":5000}"#.to_vec())
            .await;

        let err = result.unwrap_err();
        assert!(!err.is_terminal());
        assert_snapshot!(err, @"Retryable failure: The maximum duration of `1s` elapsed when handling a `test:sleep` task");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_disabled() {
        let result = wrapper(false)
            .handle(context(), br#"{"millis":5000}"#.to_vec())
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn undecodable_payload_is_terminal() {
        let result = wrapper(true).handle(context(), b"not json".to_vec()).await;

        assert!(result.unwrap_err().is_terminal());
    }

    #[test]
    fn missing_task_types() {
        let err = RegistryError::MissingTaskTypes(vec![
            TaskType::from_static("email:deliver"),
            TaskType::from_static("report:generate"),
        ]);

        assert_snapshot!(err, @"No worker registered for task types: email:deliver, report:generate");
    }
}
