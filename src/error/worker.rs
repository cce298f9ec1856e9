use crate::worker::codec::{DecodingError, EncodingError};
use crate::worker::registry::{RegistryError, RoutingError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkerError {
    #[error(transparent)]
    Enqueue(#[from] EnqueueError),

    #[error(transparent)]
    Dequeue(#[from] DequeueError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("The maximum duration of `{1:?}` elapsed when handling a `{0}` task")]
    Timeout(String, Duration),

    #[error("The worker for a `{0}` task panicked: {1}")]
    Panic(String, String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnqueueError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("No queue configured for task type `{0}`")]
    NoQueue(String),

    /// The task was addressed to a queue the worker pool does not poll, so it would never be
    /// delivered.
    #[error("Queue `{1}` for task type `{0}` is not one of the configured queues")]
    UnknownQueue(String, String),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DequeueError {
    #[error(transparent)]
    Decoding(#[from] DecodingError),
}

impl From<EnqueueError> for crate::error::Error {
    fn from(value: EnqueueError) -> Self {
        Self::Worker(WorkerError::from(value))
    }
}

impl From<DequeueError> for crate::error::Error {
    fn from(value: DequeueError) -> Self {
        Self::Worker(WorkerError::from(value))
    }
}

impl From<EncodingError> for crate::error::Error {
    fn from(value: EncodingError) -> Self {
        Self::Worker(WorkerError::from(EnqueueError::from(value)))
    }
}

impl From<DecodingError> for crate::error::Error {
    fn from(value: DecodingError) -> Self {
        Self::Worker(WorkerError::from(DequeueError::from(value)))
    }
}

impl From<RegistryError> for crate::error::Error {
    fn from(value: RegistryError) -> Self {
        Self::Worker(WorkerError::from(value))
    }
}

impl From<RoutingError> for crate::error::Error {
    fn from(value: RoutingError) -> Self {
        Self::Worker(WorkerError::from(value))
    }
}
