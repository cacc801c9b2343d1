//! Trigger queue using Redis Streams.

use std::time::Duration;

use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use reel_models::{ObjectCreated, StageName};
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for trigger events
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter stream name
    pub dlq_stream_name: String,
    /// Deliveries before an event is dead-lettered
    pub max_deliveries: u32,
    /// Window in which a repeated (stage, key) event is suppressed
    pub dedup_window: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "reel:triggers".to_string(),
            consumer_group: "reel:workers".to_string(),
            dlq_stream_name: "reel:dlq".to_string(),
            max_deliveries: 5,
            dedup_window: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_deliveries: std::env::var("QUEUE_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_deliveries),
            dedup_window: std::env::var("QUEUE_DEDUP_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedup_window),
        }
    }

    fn dedup_key(&self, event: &ObjectCreated) -> String {
        format!("{}:dedup:{}", self.stream_name, event.dedup_key())
    }
}

/// Outcome of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    Published { message_id: String },
    /// The same (stage, key) was enqueued within the dedup window.
    Duplicate,
}

/// An event handed to a consumer.
#[derive(Debug, Clone)]
pub struct TriggerDelivery {
    pub message_id: String,
    pub event: ObjectCreated,
    /// How many times this event has been delivered, this one included
    pub deliveries: u64,
}

/// Trigger queue client.
#[derive(Clone)]
pub struct TriggerQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl TriggerQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Round-trip check for readiness probes.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self
            .conn()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        Ok(())
    }

    /// Publish an object-created event.
    pub async fn publish(&self, event: &ObjectCreated) -> QueueResult<Enqueued> {
        let mut conn = self.conn().await?;

        // SET NX makes the dedup check and the marker one atomic step.
        let window = self.config.dedup_window.as_secs();
        if window > 0 {
            let fresh: Option<String> = redis::cmd("SET")
                .arg(self.config.dedup_key(event))
                .arg(&event.event_id)
                .arg("NX")
                .arg("EX")
                .arg(window)
                .query_async(&mut conn)
                .await?;
            if fresh.is_none() {
                debug!(stage = %event.stage, key = %event.key, "Duplicate trigger suppressed");
                return Ok(Enqueued::Duplicate);
            }
        }

        let payload = serde_json::to_string(event)?;
        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("event")
            .arg(&payload)
            .arg("stage")
            .arg(event.stage.as_str())
            .arg("key")
            .arg(&event.key)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!(
            stage = %event.stage,
            key = %event.key,
            "Published trigger {} as {}",
            event.event_id,
            message_id
        );

        Ok(Enqueued::Published { message_id })
    }

    pub async fn publish_created(&self, stage: StageName, key: &str) -> QueueResult<Enqueued> {
        self.publish(&ObjectCreated::new(stage, key)).await
    }

    /// Acknowledge an event (mark as handled).
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged trigger: {}", message_id);
        Ok(())
    }

    /// Move an event to the dead letter stream and drop it from the main one.
    pub async fn dead_letter(&self, delivery: &TriggerDelivery, error: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let payload = serde_json::to_string(&delivery.event)?;
        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("event")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&delivery.message_id)
            .arg("deliveries")
            .arg(delivery.deliveries)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(&delivery.message_id).await?;

        warn!(
            stage = %delivery.event.stage,
            key = %delivery.event.key,
            "Moved trigger {} to DLQ after {} deliveries: {}",
            delivery.message_id,
            delivery.deliveries,
            error
        );
        Ok(())
    }

    /// Whether a failed delivery has used up its attempts.
    pub fn is_exhausted(&self, delivery: &TriggerDelivery) -> bool {
        delivery.deliveries >= u64::from(self.config.max_deliveries)
    }

    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Read new events for this consumer.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<TriggerDelivery>> {
        let mut conn = self.conn().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut deliveries = Vec::new();
        for stream_key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream_key.ids {
                if let Some(delivery) = self.decode(entry, 1).await {
                    deliveries.push(delivery);
                }
            }
        }

        Ok(deliveries)
    }

    /// Take over events another consumer has held for at least `min_idle`.
    ///
    /// Covers workers that crashed, and failed events left pending for
    /// redelivery.
    pub async fn reclaim_idle(
        &self,
        consumer_name: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<TriggerDelivery>> {
        let mut conn = self.conn().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut claim = redis::cmd("XCLAIM");
        claim
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms);
        for p in &pending.ids {
            claim.arg(&p.id);
        }
        let claimed: StreamClaimReply = claim.query_async(&mut conn).await?;

        let mut deliveries = Vec::new();
        for entry in claimed.ids {
            // XCLAIM bumps the delivery counter by one.
            let previous = pending
                .ids
                .iter()
                .find(|p| p.id == entry.id)
                .map(|p| p.times_delivered as u64)
                .unwrap_or(0);
            if let Some(delivery) = self.decode(entry, previous + 1).await {
                info!(
                    stage = %delivery.event.stage,
                    key = %delivery.event.key,
                    "Reclaimed trigger {} (delivery {})",
                    delivery.message_id,
                    delivery.deliveries
                );
                deliveries.push(delivery);
            }
        }

        Ok(deliveries)
    }

    /// Reset an event's idle time so `reclaim_idle` leaves it with its
    /// current consumer. Does not count as a delivery.
    ///
    /// Returns `false` if the event is no longer pending for this consumer.
    pub async fn touch(&self, consumer_name: &str, message_id: &str) -> QueueResult<bool> {
        let mut conn = self.conn().await?;

        // XCLAIM ignores the current owner, so never take back an event
        // another consumer has reclaimed.
        let owned: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .arg(message_id)
            .arg(1)
            .arg(consumer_name)
            .query_async(&mut conn)
            .await?;
        if owned.ids.is_empty() {
            return Ok(false);
        }

        let claimed: Vec<String> = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(0)
            .arg(message_id)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;

        Ok(claimed.iter().any(|id| id == message_id))
    }

    async fn decode(&self, entry: StreamId, deliveries: u64) -> Option<TriggerDelivery> {
        match parse_event(&entry) {
            Ok(event) => Some(TriggerDelivery {
                message_id: entry.id,
                event,
                deliveries,
            }),
            Err(reason) => {
                warn!("Dropping malformed trigger {}: {}", entry.id, reason);
                // Ack the malformed message to prevent reprocessing
                self.ack(&entry.id).await.ok();
                None
            }
        }
    }
}

fn parse_event(entry: &StreamId) -> Result<ObjectCreated, String> {
    let payload: String = entry
        .get("event")
        .ok_or_else(|| "missing event field".to_string())?;
    let event: ObjectCreated = serde_json::from_str(&payload).map_err(|e| e.to_string())?;
    if event.key.is_empty() {
        return Err("empty key".to_string());
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(fields: &[(&str, &str)]) -> StreamId {
        let map: HashMap<String, redis::Value> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), redis::Value::BulkString(v.as_bytes().to_vec())))
            .collect();
        StreamId {
            id: "1-0".to_string(),
            map,
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.max_deliveries, 5);
        assert_eq!(config.dedup_window, Duration::from_secs(30));
        assert_ne!(config.stream_name, config.dlq_stream_name);
    }

    #[test]
    fn test_dedup_key_is_per_stage_and_key() {
        let config = QueueConfig::default();
        let a = ObjectCreated::new(StageName::Normalized, "x.mp4");
        let b = ObjectCreated::new(StageName::Quarantine, "x.mp4");
        assert_eq!(config.dedup_key(&a), "reel:triggers:dedup:normalized:x.mp4");
        assert_ne!(config.dedup_key(&a), config.dedup_key(&b));
    }

    #[test]
    fn test_parse_event() {
        let event = ObjectCreated::new(StageName::Compilations, "compilation-20240101000000.mp4");
        let payload = serde_json::to_string(&event).unwrap();

        let parsed = parse_event(&entry(&[("event", &payload)])).unwrap();
        assert_eq!(parsed, event);

        assert!(parse_event(&entry(&[("stage", "quarantine")])).is_err());
        assert!(parse_event(&entry(&[("event", "{not json")])).is_err());
    }

    #[test]
    fn test_is_exhausted() {
        let queue = TriggerQueue::new(QueueConfig::default()).unwrap();
        let mut delivery = TriggerDelivery {
            message_id: "1-0".to_string(),
            event: ObjectCreated::new(StageName::Quarantine, "a.mp4"),
            deliveries: 4,
        };
        assert!(!queue.is_exhausted(&delivery));
        delivery.deliveries = 5;
        assert!(queue.is_exhausted(&delivery));
    }
}
