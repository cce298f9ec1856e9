use crate::config::AppConfig;
use crate::error::CourierResult;
use crate::worker::broker::{self, Broker};
use crate::worker::enqueue::Enqueuer;
use std::sync::Arc;

/// Shared resources for the worker process and for producers embedded in other processes.
/// Cheap to clone.
#[derive(Clone)]
pub struct AppContext {
    inner: Arc<AppContextInner>,
}

struct AppContextInner {
    config: AppConfig,
    broker: Arc<dyn Broker>,
    enqueuer: Enqueuer,
}

impl AppContext {
    /// Connect to the broker configured in `service.worker`.
    pub async fn new(config: AppConfig) -> CourierResult<Self> {
        let broker = broker::connect(&config.service.worker).await?;
        Ok(Self::with_broker(config, broker))
    }

    /// Build a context around an already connected broker.
    pub fn with_broker(config: AppConfig, broker: Arc<dyn Broker>) -> Self {
        let enqueuer = Enqueuer::new(broker.clone(), &config.service.worker);
        Self {
            inner: Arc::new(AppContextInner {
                config,
                broker,
                enqueuer,
            }),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.inner.broker
    }

    pub fn enqueuer(&self) -> &Enqueuer {
        &self.inner.enqueuer
    }
}
