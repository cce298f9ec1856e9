//! The seam between this crate and the store that holds tasks. A broker provides at-least-once
//! delivery: a dequeued task stays leased to its consumer for a visibility timeout, and is
//! delivered again if the lease runs out before the consumer acks, retries or kills it.

use crate::config::service::worker::{BrokerBackend, WorkerServiceConfig};
use crate::error::CourierResult;
use crate::error::broker::BrokerError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;
#[cfg(feature = "worker-redis")]
pub mod redis;

/// A task handed to a consumer, along with what the broker needs to settle it later.
#[derive(Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub struct Delivery {
    pub queue: String,
    /// Identifies this delivery's lease. Opaque outside the broker that issued it.
    pub receipt: String,
    /// The encoded [`crate::worker::task::Task`].
    pub data: Vec<u8>,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Check that the broker can be reached.
    async fn ping(&self) -> Result<(), BrokerError>;

    /// Add an encoded task to `queue`. With a `delay`, the task becomes visible once the delay
    /// has passed.
    async fn enqueue(
        &self,
        queue: &str,
        data: Vec<u8>,
        delay: Option<Duration>,
    ) -> Result<(), BrokerError>;

    /// Lease the next ready task on `queue` for `visibility_timeout`, if there is one.
    async fn dequeue(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<Delivery>, BrokerError>;

    /// The task is done; it's never delivered again.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Release the lease and replace the task with `data` (the task stamped for its next
    /// attempt), to be delivered again after `delay`.
    async fn retry(
        &self,
        delivery: &Delivery,
        data: Vec<u8>,
        delay: Duration,
    ) -> Result<(), BrokerError>;

    /// Release the lease and move the task to the dead set for an operator to inspect.
    async fn kill(&self, delivery: &Delivery, reason: &str) -> Result<(), BrokerError>;
}

/// Create the broker selected by `service.worker.backend`.
pub async fn connect(config: &WorkerServiceConfig) -> CourierResult<Arc<dyn Broker>> {
    let broker: Arc<dyn Broker> = match config.backend {
        BrokerBackend::InMemory => Arc::new(memory::MemoryBroker::default()),
        #[cfg(feature = "worker-redis")]
        BrokerBackend::Redis => {
            let redis_config = config.redis.as_ref().ok_or_else(|| {
                crate::error::config::ConfigError::Config(::config::ConfigError::NotFound(
                    "service.worker.redis".to_owned(),
                ))
            })?;
            Arc::new(redis::RedisBroker::connect(redis_config, config.num_workers).await?)
        }
        #[cfg(not(feature = "worker-redis"))]
        BrokerBackend::Redis => {
            return Err(crate::error::config::ConfigError::BackendUnavailable(
                "redis".to_owned(),
            )
            .into());
        }
    };
    Ok(broker)
}
