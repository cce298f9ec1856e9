use crate::worker::task::{Task, TaskType};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Information about the task being handled, passed to [`crate::worker::Worker::handle`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct JobContext {
    pub task_id: Uuid,
    pub task_type: TaskType,
    pub queue: String,
    /// 1-based; greater than 1 when the task is being retried.
    pub attempt: u32,
    /// Cancelled when the worker pool starts shutting down. Handlers that can stop early should
    /// watch it; handlers still running at the end of the drain timeout are aborted.
    pub cancellation_token: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(task: &Task, queue: &str, cancellation_token: CancellationToken) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type.clone(),
            queue: queue.to_owned(),
            attempt: task.attempt(),
            cancellation_token,
        }
    }

    #[cfg(test)]
    pub(crate) fn test(task_type: TaskType) -> Self {
        Self {
            task_id: Uuid::now_v7(),
            task_type,
            queue: "default".to_owned(),
            attempt: 1,
            cancellation_token: CancellationToken::new(),
        }
    }
}
