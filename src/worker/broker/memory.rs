use crate::error::broker::BrokerError;
use crate::worker::broker::{Broker, Delivery};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};
use uuid::Uuid;

/// A process-local [`Broker`]. Tasks don't survive a restart and aren't visible to other
/// processes, so this is only useful for tests and local development. Honors delays, visibility
/// timeouts and the dead set the same way the Redis broker does.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    ready: BTreeMap<String, VecDeque<Vec<u8>>>,
    scheduled: Vec<Scheduled>,
    /// Keyed by receipt.
    in_flight: BTreeMap<String, Lease>,
    dead: Vec<DeadTask>,
    acked: usize,
}

#[derive(Debug)]
struct Scheduled {
    queue: String,
    due: Instant,
    data: Vec<u8>,
}

#[derive(Debug)]
struct Lease {
    queue: String,
    deadline: Instant,
    data: Vec<u8>,
}

/// A task in the dead set.
#[derive(Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub struct DeadTask {
    pub queue: String,
    pub data: Vec<u8>,
    pub reason: String,
}

impl State {
    /// Move due scheduled tasks and expired leases back onto their ready queues.
    fn promote(&mut self, now: Instant) {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.scheduled)
            .into_iter()
            .partition(|scheduled| scheduled.due <= now);
        self.scheduled = pending;
        for scheduled in due {
            self.push(scheduled.queue, scheduled.data);
        }

        let expired = self
            .in_flight
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect::<Vec<_>>();
        for receipt in expired {
            if let Some(lease) = self.in_flight.remove(&receipt) {
                debug!(queue = lease.queue, "Lease expired, task will be redelivered");
                self.push(lease.queue, lease.data);
            }
        }
    }

    fn push(&mut self, queue: String, data: Vec<u8>) {
        self.ready.entry(queue).or_default().push_back(data);
    }

    fn release(&mut self, delivery: &Delivery) -> Result<Lease, BrokerError> {
        self.in_flight
            .remove(&delivery.receipt)
            .ok_or_else(|| BrokerError::LeaseLost(delivery.receipt.clone()))
    }
}

impl MemoryBroker {
    /// The number of tasks on `queue` that are ready or scheduled.
    pub async fn pending(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        let ready = state.ready.get(queue).map(VecDeque::len).unwrap_or_default();
        let scheduled = state
            .scheduled
            .iter()
            .filter(|scheduled| scheduled.queue == queue)
            .count();
        ready + scheduled
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    pub async fn acked(&self) -> usize {
        self.state.lock().await.acked
    }

    pub async fn dead(&self) -> Vec<DeadTask> {
        self.state.lock().await.dead.clone()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    #[instrument(skip(self, data))]
    async fn enqueue(
        &self,
        queue: &str,
        data: Vec<u8>,
        delay: Option<Duration>,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        match delay.filter(|delay| !delay.is_zero()) {
            Some(delay) => state.scheduled.push(Scheduled {
                queue: queue.to_owned(),
                due: Instant::now() + delay,
                data,
            }),
            None => state.push(queue.to_owned(), data),
        }
        Ok(())
    }

    async fn dequeue(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<Delivery>, BrokerError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.promote(now);

        let data = match state.ready.get_mut(queue).and_then(VecDeque::pop_front) {
            Some(data) => data,
            None => return Ok(None),
        };

        let receipt = Uuid::new_v4().to_string();
        state.in_flight.insert(
            receipt.clone(),
            Lease {
                queue: queue.to_owned(),
                deadline: now + visibility_timeout,
                data: data.clone(),
            },
        );
        Ok(Some(Delivery {
            queue: queue.to_owned(),
            receipt,
            data,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state.release(delivery)?;
        state.acked += 1;
        Ok(())
    }

    async fn retry(
        &self,
        delivery: &Delivery,
        data: Vec<u8>,
        delay: Duration,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let lease = state.release(delivery)?;
        state.scheduled.push(Scheduled {
            queue: lease.queue,
            due: Instant::now() + delay,
            data,
        });
        Ok(())
    }

    async fn kill(&self, delivery: &Delivery, reason: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let lease = state.release(delivery)?;
        state.dead.push(DeadTask {
            queue: lease.queue,
            data: lease.data,
            reason: reason.to_owned(),
        });
        Ok(())
    }
}
