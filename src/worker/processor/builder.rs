use crate::config::service::worker::WorkerServiceConfig;
use crate::error::CourierResult;
use crate::error::worker::EnqueueError;
use crate::worker::Worker;
use crate::worker::broker::Broker;
use crate::worker::processor::{Processor, ProcessorInner};
use crate::worker::queue::QueueRouter;
use crate::worker::registry::{RegistryError, WorkerWrapper};
use crate::worker::task::TaskType;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::Semaphore;
use tracing::{error, info};

#[non_exhaustive]
pub struct ProcessorBuilder {
    broker: Arc<dyn Broker>,
    config: WorkerServiceConfig,
    workers: BTreeMap<TaskType, WorkerWrapper>,
    expected_task_types: Vec<TaskType>,
}

impl ProcessorBuilder {
    pub(crate) fn new(broker: Arc<dyn Broker>, config: &WorkerServiceConfig) -> Self {
        Self {
            broker,
            config: config.clone(),
            workers: Default::default(),
            expected_task_types: Default::default(),
        }
    }

    /// Register the handler for `W::TASK_TYPE`. Each task type can only be registered once.
    pub fn register<W, Args>(mut self, worker: W) -> CourierResult<Self>
    where
        W: 'static + Worker<Args>,
        Args: 'static + Send + Sync + Serialize + DeserializeOwned,
    {
        let task_type = W::TASK_TYPE;
        info!(%task_type, "Registering worker");

        let queue = W::enqueue_config()
            .or(&self.config.enqueue_config)
            .queue;
        if let Some(queue) = queue.filter(|queue| !self.config.queues.contains_key(queue)) {
            error!(
                %task_type,
                queue,
                "Unable to register worker, its queue is not one of the configured queues"
            );
            return Err(EnqueueError::UnknownQueue(task_type.to_string(), queue).into());
        }

        if self.workers.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type).into());
        }
        let worker = WorkerWrapper::new(worker, &self.config.worker_config);
        self.workers.insert(task_type, worker);

        Ok(self)
    }

    /// Task types that must have a registered worker. [`Self::build`] fails if any are missing,
    /// so a producer/consumer mismatch is caught at startup instead of leaving tasks unroutable.
    pub fn expect_task_types(mut self, task_types: &[TaskType]) -> Self {
        self.expected_task_types.extend_from_slice(task_types);
        self
    }

    pub fn build(self) -> CourierResult<Processor> {
        let missing = self
            .expected_task_types
            .iter()
            .filter(|task_type| !self.workers.contains_key(*task_type))
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(RegistryError::MissingTaskTypes(missing).into());
        }

        let router = QueueRouter::from_config(&self.config)?;
        let num_workers = usize::try_from(self.config.num_workers).unwrap_or(usize::MAX);

        Ok(Processor::new(ProcessorInner {
            broker: self.broker,
            config: self.config,
            router,
            workers: self.workers,
            slots: Arc::new(Semaphore::new(num_workers.min(Semaphore::MAX_PERMITS))),
            active: AtomicUsize::new(0),
        }))
    }
}
