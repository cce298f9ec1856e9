use crate::config::service::worker::WorkerServiceConfig;
use crate::error::CourierResult;
use crate::error::broker::BrokerError;
use crate::error::worker::WorkerError;
use crate::worker::broker::{Broker, Delivery};
use crate::worker::codec;
use crate::worker::job::JobContext;
use crate::worker::outcome::{Disposition, HandleError};
use crate::worker::queue::QueueRouter;
use crate::worker::registry::{RoutingError, WorkerWrapper};
use crate::worker::retry;
use crate::worker::task::{Task, TaskType};
use builder::ProcessorBuilder;
use futures::FutureExt;
use itertools::Itertools;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub mod builder;

/// The worker pool. Pulls tasks from the broker, routes each one to the [`crate::worker::Worker`]
/// registered for its task type, and settles it with the broker according to the result. At
/// most `num-workers` tasks are handled at once.
#[derive(Clone)]
#[non_exhaustive]
pub struct Processor {
    inner: Arc<ProcessorInner>,
}

#[non_exhaustive]
pub(crate) struct ProcessorInner {
    broker: Arc<dyn Broker>,
    config: WorkerServiceConfig,
    router: QueueRouter,
    workers: BTreeMap<TaskType, WorkerWrapper>,
    /// `num-workers` permits. One is held from the moment a task is pulled until it is settled.
    slots: Arc<Semaphore>,
    active: AtomicUsize,
}

/// Decrements the active gauge when dropped, including when a handler is aborted.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn new(active: &'a AtomicUsize) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Processor {
    pub(crate) fn new(inner: ProcessorInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn builder(broker: Arc<dyn Broker>, config: &WorkerServiceConfig) -> ProcessorBuilder {
        ProcessorBuilder::new(broker, config)
    }

    /// The number of task handlers currently executing.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn task_types(&self) -> impl Iterator<Item = &TaskType> {
        self.inner.workers.keys()
    }

    /// Run the worker pool until `cancellation_token` is cancelled. Handlers that are running
    /// when it is cancelled are allowed to finish, so this returns once every in-flight task is
    /// settled.
    ///
    /// Returns an error if one of the handler tasks could not be joined.
    pub async fn run(self, cancellation_token: CancellationToken) -> CourierResult<()> {
        info!(
            num_workers = self.inner.config.num_workers,
            queues = self.inner.router.queues().join(","),
            strict_priority = self.inner.config.strict_priority,
            "Starting worker pool"
        );

        let mut in_flight = JoinSet::new();
        let mut join_error = None;
        self.dispatch(&cancellation_token, &mut in_flight, &mut join_error)
            .await;

        info!(in_flight = in_flight.len(), "Waiting for in-flight tasks");
        while let Some(result) = in_flight.join_next().await {
            record_join_error(result, &mut join_error);
        }

        info!("Worker pool stopped");
        match join_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Pull tasks from the broker and hand each one to its own handler task. A permit is taken
    /// from `slots` before fetching and is held until the task is settled, so at most
    /// `num-workers` tasks are leased at once.
    async fn dispatch(
        &self,
        cancellation_token: &CancellationToken,
        in_flight: &mut JoinSet<()>,
        join_error: &mut Option<JoinError>,
    ) {
        let mut router = self.inner.router.clone();
        let fetch_config = &self.inner.config.queue_fetch_config;

        loop {
            while let Some(result) = in_flight.try_join_next() {
                record_join_error(result, join_error);
            }

            let permit = tokio::select! {
                // `biased` ensures that the cancellation token is polled first
                biased;

                _ = cancellation_token.cancelled() => {
                    info!("Worker pool received shutdown signal");
                    return;
                },
                permit = self.inner.slots.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                error!("Worker pool semaphore was closed");
                cancellation_token.cancel();
                return;
            };

            let delay = match self.fetch(&mut router).await {
                Ok(Some(delivery)) => {
                    let processor = self.clone();
                    let cancellation_token = cancellation_token.clone();
                    in_flight.spawn(async move {
                        processor.process(delivery, &cancellation_token).await;
                        drop(permit);
                    });
                    None
                }
                Ok(None) => Some(fetch_config.empty_delay),
                Err(err) => {
                    error!("An error occurred while fetching a task: {err}");
                    Some(fetch_config.error_delay)
                }
            };

            if let Some(delay) = delay {
                tokio::select! {
                    biased;

                    _ = cancellation_token.cancelled() => {
                        info!("Worker pool received shutdown signal");
                        return;
                    },
                    _ = sleep(delay) => (),
                }
            }
        }
    }

    /// Try each queue in the router's order for this cycle and lease the first ready task.
    async fn fetch(&self, router: &mut QueueRouter) -> Result<Option<Delivery>, BrokerError> {
        let visibility_timeout = self.inner.config.visibility_timeout;
        for queue in router.next_order() {
            if let Some(delivery) = self.inner.broker.dequeue(queue, visibility_timeout).await? {
                return Ok(Some(delivery));
            }
        }
        Ok(None)
    }

    #[instrument(skip_all, fields(queue = delivery.queue))]
    async fn process(&self, delivery: Delivery, cancellation_token: &CancellationToken) {
        let task = match codec::decode_task(&delivery.data) {
            Ok(task) => task,
            Err(err) => {
                error!(
                    queue = delivery.queue,
                    %err,
                    "Unable to decode task, moving it to the dead set"
                );
                let disposition = Disposition::Discard {
                    reason: err.to_string(),
                };
                self.settle(&delivery, None, disposition).await;
                return;
            }
        };

        let Some(worker) = self.inner.workers.get(&task.task_type) else {
            let err = RoutingError::Unregistered(task.task_type.clone());
            error!(
                task_id = %task.id,
                task_type = %task.task_type,
                queue = delivery.queue,
                attempt = task.attempt(),
                %err,
                "Unable to handle task, worker not registered"
            );
            let disposition = Disposition::Discard {
                reason: err.to_string(),
            };
            self.settle(&delivery, Some(&task), disposition).await;
            return;
        };

        let context = JobContext::new(&task, &delivery.queue, cancellation_token.clone());
        let result = {
            let _active = ActiveGuard::new(&self.inner.active);
            AssertUnwindSafe(worker.handle(context, task.payload.clone()))
                .catch_unwind()
                .await
        };
        // A panicking handler is treated as a retryable failure so the task is still settled.
        let result = result.unwrap_or_else(|panic| {
            let err = WorkerError::Panic(task.task_type.to_string(), panic_message(&*panic));
            error!(
                task_id = %task.id,
                task_type = %task.task_type,
                queue = delivery.queue,
                attempt = task.attempt(),
                %err,
                "Worker panicked"
            );
            Err(HandleError::retryable(err))
        });
        let error = result.as_ref().err().map(ToString::to_string);

        let disposition =
            retry::disposition(result, &task, worker.worker_config.retry_config.as_ref());
        let error = error.unwrap_or_default();
        match &disposition {
            Disposition::Ack => {
                debug!(task_id = %task.id, task_type = %task.task_type, "Task completed");
            }
            Disposition::Retry { delay } => {
                warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    queue = delivery.queue,
                    attempt = task.attempt(),
                    ?delay,
                    error,
                    "Task failed, it will be retried"
                );
            }
            Disposition::Discard { .. } => {
                error!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    queue = delivery.queue,
                    attempt = task.attempt(),
                    error,
                    "Task failed with a terminal error, moving it to the dead set"
                );
            }
            Disposition::Dead { .. } => {
                error!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    queue = delivery.queue,
                    attempt = task.attempt(),
                    error,
                    "Task exhausted its retries, moving it to the dead set"
                );
            }
        }

        self.settle(&delivery, Some(&task), disposition).await;
    }

    /// Apply the `disposition` with the broker.
    #[instrument(skip_all)]
    async fn settle(&self, delivery: &Delivery, task: Option<&Task>, disposition: Disposition) {
        let broker = &self.inner.broker;
        let result = match (&disposition, task) {
            (Disposition::Ack, _) => broker.ack(delivery).await,
            (Disposition::Retry { delay }, Some(task)) => {
                match codec::encode_task(&task.next_attempt()) {
                    Ok(data) => broker.retry(delivery, data, *delay).await,
                    Err(err) => broker.kill(delivery, &err.to_string()).await,
                }
            }
            (Disposition::Retry { .. }, None) => {
                broker.kill(delivery, "Unable to retry a task that could not be decoded").await
            }
            (Disposition::Discard { reason }, _) | (Disposition::Dead { reason }, _) => {
                broker.kill(delivery, reason).await
            }
        };

        if let Err(err) = result {
            error!(
                queue = delivery.queue,
                task_id = task.map(|task| task.id.to_string()),
                ?disposition,
                "An error occurred while settling a task with the broker: {err}"
            );
        }
    }
}

fn record_join_error(result: Result<(), JoinError>, join_error: &mut Option<JoinError>) {
    if let Err(err) = result {
        error!("An error occurred when trying to join on one of the worker pool's handler tasks. Error: {err}");
        join_error.get_or_insert(err);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}
