use crate::worker::config::{EnqueueConfig, WorkerConfig};
use crate::worker::job::JobContext;
use crate::worker::outcome::HandleError;
use crate::worker::task::TaskType;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub mod broker;
pub mod codec;
pub mod config;
pub mod enqueue;
pub mod job;
pub mod outcome;
pub mod processor;
pub mod queue;
pub mod registry;
pub(crate) mod retry;
pub mod task;

/// The handler for one type of task.
#[async_trait]
pub trait Worker<Args>: Send + Sync
where
    Args: Send + Sync + Serialize + DeserializeOwned,
{
    /// The routing key stamped on tasks for this worker when they're enqueued, and used by the
    /// [`processor::Processor`] to find this worker when they're fetched from a queue. Care
    /// should be taken when changing it, since tasks already in the broker keep the old value.
    const TASK_TYPE: TaskType;

    /// Worker-specific options to use when enqueuing a task. Any value not provided falls back
    /// to `service.worker.enqueue-config` from the [`crate::config::AppConfig`].
    fn enqueue_config() -> EnqueueConfig
    where
        Self: Sized,
    {
        EnqueueConfig::default()
    }

    /// Worker-specific options to use when handling a task. Any value not provided falls back
    /// to `service.worker.worker-config` from the [`crate::config::AppConfig`].
    ///
    /// Called once, when the worker is registered with the [`processor::Processor`].
    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default()
    }

    async fn handle(&self, context: &JobContext, args: Args) -> Result<(), HandleError>;
}
