use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BrokerError {
    /// The broker could not be reached. Fatal at startup; transient while running.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// A delivery's lease was not held by this consumer anymore, e.g. because its visibility
    /// timeout expired and the task was handed to another consumer.
    #[error("Lease on task `{0}` was lost")]
    LeaseLost(String),

    #[cfg(feature = "worker-redis")]
    #[error(transparent)]
    Redis(#[from] sidekiq::RedisError),

    #[cfg(feature = "worker-redis")]
    #[error(transparent)]
    Pool(#[from] bb8::RunError<sidekiq::RedisError>),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(feature = "worker-redis")]
impl From<sidekiq::RedisError> for crate::error::Error {
    fn from(value: sidekiq::RedisError) -> Self {
        Self::Broker(BrokerError::from(value))
    }
}

#[cfg(feature = "worker-redis")]
impl From<bb8::RunError<sidekiq::RedisError>> for crate::error::Error {
    fn from(value: bb8::RunError<sidekiq::RedisError>) -> Self {
        Self::Broker(BrokerError::from(value))
    }
}
