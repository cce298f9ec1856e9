use crate::app::context::AppContext;
use crate::error::CourierResult;
use crate::worker::processor::Processor;
use std::future::pending;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Run the worker pool until a shutdown signal is received, then drain it.
///
/// The pool stops pulling new tasks as soon as the signal arrives. Tasks that are already being
/// handled get up to `service.worker.drain-timeout` to finish. Any that are still running after
/// that are aborted without being acked, so the broker redelivers them once their visibility
/// timeout expires.
///
/// Cancelling `cancellation_token` has the same effect as receiving a signal.
#[instrument(skip_all)]
pub async fn run(
    processor: Processor,
    context: &AppContext,
    cancellation_token: CancellationToken,
) -> CourierResult<()> {
    info!("Checking the broker connection");
    if let Err(err) = context.broker().ping().await {
        error!("Unable to reach the broker, the worker pool will not be started: {err}");
        return Err(err.into());
    }

    let pool_token = cancellation_token.child_token();
    let mut pool = tokio::spawn(processor.clone().run(pool_token.clone()));

    tokio::select! {
        biased;

        result = &mut pool => {
            // The pool only exits on its own if something went wrong, so bring the rest of the
            // process down with it.
            cancellation_token.cancel();
            result??;
            info!("Shutdown complete");
            return Ok(());
        },
        _ = graceful_shutdown_signal(cancellation_token.clone()) => {},
    }

    let drain_timeout = context.config().service.worker.drain_timeout;
    info!(
        active = processor.active(),
        ?drain_timeout,
        "Received shutdown signal. Waiting for in-flight tasks to finish."
    );
    pool_token.cancel();

    match tokio::time::timeout(drain_timeout, &mut pool).await {
        Ok(result) => result??,
        Err(_) => {
            let abandoned = processor.active();
            pool.abort();
            warn!(
                abandoned,
                ?drain_timeout,
                "Drain timeout elapsed. Abandoning in-flight tasks, they will be redelivered after their visibility timeout."
            );
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on ctrl-c, on SIGTERM (unix only), or when `cancellation_token` is cancelled.
pub async fn graceful_shutdown_signal(cancellation_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for the ctrl-c signal: {err}");
            pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Unable to listen for the sigterm signal: {err}");
                pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutting down due to ctrl-c signal received");
        },
        _ = sigterm => {
            info!("Shutting down due to sigterm signal received");
        },
        _ = cancellation_token.cancelled() => {
            info!("Shutting down due to cancellation token cancelled");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::error::broker::BrokerError;
    use crate::worker::Worker;
    use crate::worker::broker::memory::MemoryBroker;
    use crate::worker::broker::{Broker, Delivery};
    use crate::worker::codec;
    use crate::worker::job::JobContext;
    use crate::worker::outcome::HandleError;
    use crate::worker::task::{Task, TaskType};
    use async_trait::async_trait;
    use serde_derive::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::sleep;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct SleepArgs {
        millis: u64,
    }

    /// Sleeps without watching the cancellation token, like a handler stuck on slow I/O.
    struct SleepWorker;

    #[async_trait]
    impl Worker<SleepArgs> for SleepWorker {
        const TASK_TYPE: TaskType = TaskType::from_static("test:sleep");

        async fn handle(&self, _context: &JobContext, args: SleepArgs) -> Result<(), HandleError> {
            sleep(Duration::from_millis(args.millis)).await;
            Ok(())
        }
    }

    fn context(broker: Arc<dyn Broker>, drain_timeout: Duration) -> AppContext {
        let mut config = AppConfig::test(None).unwrap();
        config.service.worker.drain_timeout = drain_timeout;
        config.service.worker.queue_fetch_config.empty_delay = Duration::from_millis(10);
        AppContext::with_broker(config, broker)
    }

    fn processor(context: &AppContext) -> Processor {
        Processor::builder(context.broker().clone(), &context.config().service.worker)
            .register(SleepWorker)
            .unwrap()
            .build()
            .unwrap()
    }

    async fn enqueue_sleep(broker: &MemoryBroker, millis: u64) {
        let task = Task::builder()
            .task_type(SleepWorker::TASK_TYPE)
            .payload(codec::encode(&SleepArgs { millis }).unwrap())
            .queue("default")
            .build();
        broker
            .enqueue("default", codec::encode_task(&task).unwrap(), None)
            .await
            .unwrap();
    }

    /// Start `run`, wait for the processor to pick up a task, then signal shutdown.
    async fn run_and_shutdown(processor: Processor, context: AppContext) -> CourierResult<()> {
        let token = CancellationToken::new();
        let handle = {
            let processor = processor.clone();
            let token = token.clone();
            tokio::spawn(async move { run(processor, &context, token).await })
        };
        while processor.active() == 0 {
            sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
        handle.await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_task_is_drained() {
        let broker = Arc::new(MemoryBroker::default());
        let context = context(broker.clone(), Duration::from_secs(5));
        let processor = processor(&context);
        enqueue_sleep(&broker, 500).await;

        run_and_shutdown(processor.clone(), context).await.unwrap();

        assert_eq!(broker.acked().await, 1);
        assert_eq!(broker.in_flight().await, 0);
        assert_eq!(processor.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_task_is_abandoned_not_acked() {
        let broker = Arc::new(MemoryBroker::default());
        let context = context(broker.clone(), Duration::from_secs(1));
        let processor = processor(&context);
        enqueue_sleep(&broker, 30_000).await;

        run_and_shutdown(processor.clone(), context).await.unwrap();

        assert_eq!(broker.acked().await, 0);
        assert!(broker.dead().await.is_empty());
        // Still leased, so the broker hands it out again once the visibility timeout expires.
        assert_eq!(broker.in_flight().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_pool_stops_on_cancel() {
        let broker = Arc::new(MemoryBroker::default());
        let context = context(broker.clone(), Duration::from_secs(1));
        let processor = processor(&context);
        let token = CancellationToken::new();
        token.cancel();

        run(processor, &context, token).await.unwrap();
    }

    struct UnreachableBroker;

    #[async_trait]
    impl Broker for UnreachableBroker {
        async fn ping(&self) -> Result<(), BrokerError> {
            Err(BrokerError::Unavailable("connection refused".to_owned()))
        }

        async fn enqueue(
            &self,
            _queue: &str,
            _data: Vec<u8>,
            _delay: Option<Duration>,
        ) -> Result<(), BrokerError> {
            unimplemented!()
        }

        async fn dequeue(
            &self,
            _queue: &str,
            _visibility_timeout: Duration,
        ) -> Result<Option<Delivery>, BrokerError> {
            unimplemented!()
        }

        async fn ack(&self, _delivery: &Delivery) -> Result<(), BrokerError> {
            unimplemented!()
        }

        async fn retry(
            &self,
            _delivery: &Delivery,
            _data: Vec<u8>,
            _delay: Duration,
        ) -> Result<(), BrokerError> {
            unimplemented!()
        }

        async fn kill(&self, _delivery: &Delivery, _reason: &str) -> Result<(), BrokerError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn unreachable_broker_is_fatal() {
        let context = context(Arc::new(UnreachableBroker), Duration::from_secs(1));
        let processor = processor(&context);

        let err = run(processor, &context, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 69);
    }
}
