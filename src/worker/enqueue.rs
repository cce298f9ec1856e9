use crate::config::service::worker::WorkerServiceConfig;
use crate::error::CourierResult;
use crate::error::worker::EnqueueError;
use crate::worker::Worker;
use crate::worker::broker::Broker;
use crate::worker::codec;
use crate::worker::config::EnqueueConfig;
use crate::worker::task::Task;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, instrument};
use uuid::Uuid;

/// The producer side: wraps payloads in [`Task`]s and hands them to the [`Broker`]. Cheap to
/// clone.
#[derive(Clone)]
pub struct Enqueuer {
    broker: Arc<dyn Broker>,
    queues: Arc<BTreeSet<String>>,
    enqueue_config: EnqueueConfig,
}

impl Enqueuer {
    pub fn new(broker: Arc<dyn Broker>, config: &WorkerServiceConfig) -> Self {
        Self {
            broker,
            queues: Arc::new(config.queues.keys().cloned().collect()),
            enqueue_config: config.enqueue_config.clone(),
        }
    }

    /// Submit a prepared task. Its queue and retry limit fall back to the configured defaults.
    #[instrument(skip_all, fields(task_id = %task.id, task_type = %task.task_type))]
    pub async fn enqueue_task(&self, task: Task) -> CourierResult<Uuid> {
        let task = self.resolve(task, &EnqueueConfig::default())?;
        self.submit(task).await
    }

    /// Enqueue a task for the worker `W`.
    #[instrument(skip_all)]
    pub async fn enqueue<W, Args>(&self, args: &Args) -> CourierResult<Uuid>
    where
        W: 'static + Worker<Args>,
        Args: Send + Sync + Serialize + DeserializeOwned,
    {
        let task = self.task_for::<W, Args>(args, None)?;
        self.submit(task).await
    }

    /// Enqueue a task for the worker `W` that won't be delivered until `delay` has passed.
    #[instrument(skip_all)]
    pub async fn enqueue_delayed<W, Args>(
        &self,
        args: &Args,
        delay: Duration,
    ) -> CourierResult<Uuid>
    where
        W: 'static + Worker<Args>,
        Args: Send + Sync + Serialize + DeserializeOwned,
    {
        let task = self.task_for::<W, Args>(args, Some(delay))?;
        self.submit(task).await
    }

    /// Enqueue one task per item in `args`. Every task is encoded before any is submitted, so an
    /// encoding failure enqueues nothing.
    #[instrument(skip_all)]
    pub async fn enqueue_batch<W, Args>(&self, args: &[Args]) -> CourierResult<Vec<Uuid>>
    where
        W: 'static + Worker<Args>,
        Args: Send + Sync + Serialize + DeserializeOwned,
    {
        let tasks = args
            .iter()
            .map(|args| self.task_for::<W, Args>(args, None))
            .collect::<CourierResult<Vec<_>>>()?;

        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            ids.push(self.submit(task).await?);
        }
        Ok(ids)
    }

    fn task_for<W, Args>(&self, args: &Args, delay: Option<Duration>) -> CourierResult<Task>
    where
        W: 'static + Worker<Args>,
        Args: Send + Sync + Serialize + DeserializeOwned,
    {
        let task = Task::builder()
            .task_type(W::TASK_TYPE)
            .payload(codec::encode(args).map_err(EnqueueError::from)?)
            .maybe_delay(delay)
            .build();
        Ok(self.resolve(task, &W::enqueue_config())?)
    }

    /// Fill in the task's queue and retry limit from `worker_config`, then the app config, and
    /// check the queue is one the worker pool polls.
    fn resolve(&self, task: Task, worker_config: &EnqueueConfig) -> Result<Task, EnqueueError> {
        let config = worker_config.or(&self.enqueue_config);

        let queue = match task.queue.clone().or(config.queue) {
            Some(queue) => queue,
            None => {
                error!(
                    task_type = %task.task_type,
                    "Unable to enqueue task, no queue configured"
                );
                return Err(EnqueueError::NoQueue(task.task_type.to_string()));
            }
        };
        if !self.queues.contains(&queue) {
            error!(
                task_type = %task.task_type,
                queue,
                "Unable to enqueue task, queue is not one of the configured queues"
            );
            return Err(EnqueueError::UnknownQueue(task.task_type.to_string(), queue));
        }

        Ok(Task {
            max_retries: task.max_retries.or(config.max_retries),
            queue: Some(queue),
            ..task
        })
    }

    async fn submit(&self, task: Task) -> CourierResult<Uuid> {
        let data = codec::encode_task(&task)?;
        // `resolve` always sets the queue
        let queue = task.queue.as_deref().unwrap_or_default();
        self.broker.enqueue(queue, data, task.delay).await?;
        Ok(task.id)
    }
}
