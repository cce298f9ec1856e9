//! [`Broker`] backed by Redis. Keys, all under the configured prefix:
//!
//! - `queue:{name}`: list of tasks ready to be delivered
//! - `scheduled:{name}`: sorted set of delayed and retried tasks, scored by due time
//! - `inflight:{name}`: sorted set of leased tasks, scored by lease deadline. Each member is
//!   `{lease}:{task}`, where `lease` is a uuid generated for the delivery, so a consumer whose lease
//!   expired can't settle the lease of the consumer the task was redelivered to.
//! - `dead`: sorted set of dead tasks, scored by time of death, trimmed to `dead-set-limit`
//!
//! Times are unix epoch milliseconds. Moves between keys happen in Lua scripts so a task is
//! never in two places, or none, at once.

use crate::config::service::worker::RedisConfig;
use crate::error::broker::BrokerError;
use crate::worker::broker::{Broker, Delivery};
use async_trait::async_trait;
use chrono::Utc;
use serde_derive::Serialize;
use sidekiq::RedisPool;
use sidekiq::redis_rs::{Script, cmd};
use std::time::Duration;
use tracing::{instrument, warn};

/// Make due scheduled tasks and expired leases ready again, then lease the next ready task.
/// Returns the inflight member and the task, or nil if no task is ready.
const DEQUEUE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local function promote(key, leased)
    local due = redis.call('ZRANGEBYSCORE', key, '-inf', now, 'LIMIT', 0, 100)
    for _, member in ipairs(due) do
        redis.call('ZREM', key, member)
        local task = member
        if leased then
            task = string.sub(member, string.find(member, ':', 1, true) + 1)
        end
        redis.call('RPUSH', KEYS[1], task)
    end
end
promote(KEYS[2], false)
promote(KEYS[3], true)
local task = redis.call('LPOP', KEYS[1])
if not task then
    return false
end
local lease = ARGV[3] .. ':' .. task
redis.call('ZADD', KEYS[3], ARGV[2], lease)
return {lease, task}
"#;

/// Release a lease and schedule the replacement task. Returns 0 if the lease was already gone.
const RETRY_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
return 1
"#;

/// Release a lease and add the task to the dead set. Returns 0 if the lease was already gone.
const KILL_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
local limit = tonumber(ARGV[4])
if limit > 0 then
    redis.call('ZREMRANGEBYRANK', KEYS[2], 0, -(limit + 1))
end
return 1
"#;

/// An entry in the dead set.
#[derive(Serialize)]
struct DeadEntry<'a> {
    queue: &'a str,
    reason: &'a str,
    task: &'a str,
}

pub struct RedisBroker {
    pool: RedisPool,
    key_prefix: String,
    dead_set_limit: u32,
    dequeue_script: Script,
    retry_script: Script,
    kill_script: Script,
}

impl RedisBroker {
    /// Build the connection pool. By default the pool has one connection per concurrent task
    /// plus one for the enqueuer.
    pub async fn connect(config: &RedisConfig, num_workers: u32) -> Result<Self, BrokerError> {
        let redis = sidekiq::RedisConnectionManager::new(config.uri.to_string())?;
        let pool = bb8::Pool::builder()
            .min_idle(config.min_idle)
            .max_size(
                config
                    .max_connections
                    .unwrap_or_else(|| num_workers.saturating_add(1)),
            )
            .build(redis)
            .await?;
        Ok(Self::new(pool, config))
    }

    pub fn new(pool: RedisPool, config: &RedisConfig) -> Self {
        Self {
            pool,
            key_prefix: config.key_prefix.clone(),
            dead_set_limit: config.dead_set_limit,
            dequeue_script: Script::new(DEQUEUE_SCRIPT),
            retry_script: Script::new(RETRY_SCRIPT),
            kill_script: Script::new(KILL_SCRIPT),
        }
    }

    fn key(&self, kind: &str, queue: &str) -> String {
        format!("{}:{kind}:{queue}", self.key_prefix)
    }

    fn dead_key(&self) -> String {
        format!("{}:dead", self.key_prefix)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis_from_now(delay: Duration) -> i64 {
    now_millis().saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
}

/// Tasks are JSON, so they're valid UTF-8, and storing them as strings keeps them readable with
/// `redis-cli`.
fn task_str(data: Vec<u8>) -> Result<String, BrokerError> {
    String::from_utf8(data).map_err(|err| BrokerError::Other(Box::new(err)))
}

#[async_trait]
impl Broker for RedisBroker {
    #[instrument(skip_all)]
    async fn ping(&self) -> Result<(), BrokerError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| BrokerError::Unavailable(err.to_string()))?;
        let msg = uuid::Uuid::new_v4().to_string();
        let pong: String = cmd("PING")
            .arg(&msg)
            .query_async(conn.unnamespaced_borrow_mut())
            .await
            .map_err(|err| BrokerError::Unavailable(err.to_string()))?;
        if pong == msg {
            Ok(())
        } else {
            Err(BrokerError::Unavailable(
                "Ping response does not match input.".to_owned(),
            ))
        }
    }

    #[instrument(skip(self, data))]
    async fn enqueue(
        &self,
        queue: &str,
        data: Vec<u8>,
        delay: Option<Duration>,
    ) -> Result<(), BrokerError> {
        let task = task_str(data)?;
        let mut conn = self.pool.get().await?;
        match delay.filter(|delay| !delay.is_zero()) {
            Some(delay) => {
                let _: i64 = cmd("ZADD")
                    .arg(self.key("scheduled", queue))
                    .arg(millis_from_now(delay))
                    .arg(task)
                    .query_async(conn.unnamespaced_borrow_mut())
                    .await?;
            }
            None => {
                let _: i64 = cmd("RPUSH")
                    .arg(self.key("queue", queue))
                    .arg(task)
                    .query_async(conn.unnamespaced_borrow_mut())
                    .await?;
            }
        }
        Ok(())
    }

    async fn dequeue(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<Delivery>, BrokerError> {
        let mut conn = self.pool.get().await?;
        let leased: Option<(String, String)> = self
            .dequeue_script
            .key(self.key("queue", queue))
            .key(self.key("scheduled", queue))
            .key(self.key("inflight", queue))
            .arg(now_millis())
            .arg(millis_from_now(visibility_timeout))
            .arg(uuid::Uuid::new_v4().to_string())
            .invoke_async(conn.unnamespaced_borrow_mut())
            .await?;

        Ok(leased.map(|(receipt, task)| Delivery {
            queue: queue.to_owned(),
            data: task.into_bytes(),
            receipt,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut conn = self.pool.get().await?;
        let removed: i64 = cmd("ZREM")
            .arg(self.key("inflight", &delivery.queue))
            .arg(&delivery.receipt)
            .query_async(conn.unnamespaced_borrow_mut())
            .await?;
        lease_held(removed, delivery)
    }

    async fn retry(
        &self,
        delivery: &Delivery,
        data: Vec<u8>,
        delay: Duration,
    ) -> Result<(), BrokerError> {
        let task = task_str(data)?;
        let mut conn = self.pool.get().await?;
        let moved: i64 = self
            .retry_script
            .key(self.key("inflight", &delivery.queue))
            .key(self.key("scheduled", &delivery.queue))
            .arg(&delivery.receipt)
            .arg(task)
            .arg(millis_from_now(delay))
            .invoke_async(conn.unnamespaced_borrow_mut())
            .await?;
        lease_held(moved, delivery)
    }

    async fn kill(&self, delivery: &Delivery, reason: &str) -> Result<(), BrokerError> {
        let task = std::str::from_utf8(&delivery.data)
            .map_err(|err| BrokerError::Other(Box::new(err)))?;
        let entry = serde_json::to_string(&DeadEntry {
            queue: &delivery.queue,
            reason,
            task,
        })
        .map_err(|err| BrokerError::Other(Box::new(err)))?;
        let mut conn = self.pool.get().await?;
        let moved: i64 = self
            .kill_script
            .key(self.key("inflight", &delivery.queue))
            .key(self.dead_key())
            .arg(&delivery.receipt)
            .arg(entry)
            .arg(now_millis())
            .arg(self.dead_set_limit)
            .invoke_async(conn.unnamespaced_borrow_mut())
            .await?;
        lease_held(moved, delivery)
    }
}

fn lease_held(count: i64, delivery: &Delivery) -> Result<(), BrokerError> {
    if count > 0 {
        Ok(())
    } else {
        warn!(
            queue = delivery.queue,
            "Lease on task was lost before it could be settled"
        );
        Err(BrokerError::LeaseLost(delivery.receipt.clone()))
    }
}


#[cfg(all(test, feature = "test-containers"))]
mod container_tests {
    use super::*;
    use serde_json::{Value, json};
    use testcontainers_modules::redis::{REDIS_PORT, Redis};
    use testcontainers_modules::testcontainers::ContainerAsync;
    use testcontainers_modules::testcontainers::runners::AsyncRunner;
    use tokio::time::sleep;

    const VISIBILITY: Duration = Duration::from_secs(30);

    /// The container is returned so it lives as long as the test.
    async fn broker(dead_set_limit: u32) -> (ContainerAsync<Redis>, RedisBroker) {
        let container = Redis::default().start().await.unwrap();
        let host = container.get_host().await.unwrap();
        let port = container.get_host_port_ipv4(REDIS_PORT).await.unwrap();
        let config: RedisConfig = serde_json::from_value(json!({
            "uri": format!("redis://{host}:{port}"),
            "dead-set-limit": dead_set_limit,
        }))
        .unwrap();
        let broker = RedisBroker::connect(&config, 1).await.unwrap();
        (container, broker)
    }

    async fn dead(broker: &RedisBroker) -> Vec<Value> {
        let mut conn = broker.pool.get().await.unwrap();
        let entries: Vec<String> = cmd("ZRANGE")
            .arg(broker.dead_key())
            .arg(0)
            .arg(-1)
            .query_async(conn.unnamespaced_borrow_mut())
            .await
            .unwrap();
        entries
            .iter()
            .map(|entry| serde_json::from_str(entry).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn enqueue_dequeue_ack() {
        let (_container, broker) = broker(10).await;
        broker.ping().await.unwrap();
        broker.enqueue("default", b"a".to_vec(), None).await.unwrap();

        let delivery = broker.dequeue("default", VISIBILITY).await.unwrap().unwrap();
        assert_eq!(delivery.data, b"a".to_vec());
        assert!(delivery.receipt.ends_with(":a"));
        assert!(broker.dequeue("low", VISIBILITY).await.unwrap().is_none());

        broker.ack(&delivery).await.unwrap();
        assert!(broker.dequeue("default", VISIBILITY).await.unwrap().is_none());
        assert!(matches!(
            broker.ack(&delivery).await,
            Err(BrokerError::LeaseLost(_))
        ));
    }

    #[tokio::test]
    async fn delayed_task_is_not_visible_until_due() {
        let (_container, broker) = broker(10).await;
        broker
            .enqueue("default", b"a".to_vec(), Some(Duration::from_millis(500)))
            .await
            .unwrap();

        assert!(broker.dequeue("default", VISIBILITY).await.unwrap().is_none());

        sleep(Duration::from_millis(600)).await;
        let delivery = broker.dequeue("default", VISIBILITY).await.unwrap().unwrap();
        assert_eq!(delivery.data, b"a".to_vec());
    }

    #[tokio::test]
    async fn expired_lease_is_redelivered() {
        let (_container, broker) = broker(10).await;
        broker.enqueue("default", b"a".to_vec(), None).await.unwrap();
        let first = broker
            .dequeue("default", Duration::from_millis(200))
            .await
            .unwrap()
            .unwrap();

        sleep(Duration::from_millis(300)).await;
        let second = broker.dequeue("default", VISIBILITY).await.unwrap().unwrap();

        assert_eq!(first.data, second.data);
        assert_ne!(first.receipt, second.receipt);
        // The first consumer's lease is gone, so it can't settle the task anymore.
        assert!(matches!(
            broker.kill(&first, "too slow").await,
            Err(BrokerError::LeaseLost(_))
        ));
        broker.ack(&second).await.unwrap();
        assert!(dead(&broker).await.is_empty());
    }

    #[tokio::test]
    async fn retry_replaces_task_after_delay() {
        let (_container, broker) = broker(10).await;
        broker.enqueue("default", b"a".to_vec(), None).await.unwrap();
        let delivery = broker.dequeue("default", VISIBILITY).await.unwrap().unwrap();

        broker
            .retry(&delivery, b"b".to_vec(), Duration::from_millis(300))
            .await
            .unwrap();

        assert!(broker.dequeue("default", VISIBILITY).await.unwrap().is_none());
        sleep(Duration::from_millis(400)).await;
        let delivery = broker.dequeue("default", VISIBILITY).await.unwrap().unwrap();
        assert_eq!(delivery.data, b"b".to_vec());
    }

    #[tokio::test]
    async fn dead_set_is_trimmed() {
        let (_container, broker) = broker(2).await;
        for task in ["a", "b", "c"] {
            broker
                .enqueue("critical", task.as_bytes().to_vec(), None)
                .await
                .unwrap();
        }

        for reason in ["one", "two", "three"] {
            let delivery = broker.dequeue("critical", VISIBILITY).await.unwrap().unwrap();
            broker.kill(&delivery, reason).await.unwrap();
            // Keep the scores distinct so the trim order is deterministic.
            sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(
            dead(&broker).await,
            vec![
                json!({"queue": "critical", "reason": "two", "task": "b"}),
                json!({"queue": "critical", "reason": "three", "task": "c"}),
            ]
        );
        assert!(broker.dequeue("critical", VISIBILITY).await.unwrap().is_none());
    }
}
