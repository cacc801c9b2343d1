//! Trigger queue tests against a live Redis (`REDIS_URL`).

use std::time::Duration;

use reel_models::StageName;
use reel_queue::{Enqueued, QueueConfig, TriggerQueue};

/// A queue on fresh stream names so runs don't see each other's events.
async fn fresh_queue(max_deliveries: u32) -> TriggerQueue {
    dotenvy::dotenv().ok();
    let suffix = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let config = QueueConfig {
        stream_name: format!("reel:test:{}", suffix),
        consumer_group: format!("reel:test-group:{}", suffix),
        dlq_stream_name: format!("reel:test-dlq:{}", suffix),
        max_deliveries,
        ..QueueConfig::from_env()
    };
    let queue = TriggerQueue::new(config).expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");
    queue
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_publish_consume_ack() {
    let queue = fresh_queue(5).await;
    queue.ping().await.expect("Redis unreachable");

    let enqueued = queue
        .publish_created(StageName::Quarantine, "fake-clip01.mp4")
        .await
        .expect("Failed to publish");
    assert!(matches!(enqueued, Enqueued::Published { .. }));

    let deliveries = queue.consume("test-consumer", 1000, 10).await.expect("Failed to consume");
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].event.stage, StageName::Quarantine);
    assert_eq!(deliveries[0].event.key, "fake-clip01.mp4");
    assert_eq!(deliveries[0].deliveries, 1);

    queue.ack(&deliveries[0].message_id).await.expect("Failed to ack");
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_within_window_is_suppressed() {
    let queue = fresh_queue(5).await;

    let first = queue.publish_created(StageName::Normalized, "a.mp4").await.unwrap();
    let second = queue.publish_created(StageName::Normalized, "a.mp4").await.unwrap();

    assert!(matches!(first, Enqueued::Published { .. }));
    assert_eq!(second, Enqueued::Duplicate);
    assert_eq!(queue.len().await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_reclaim_counts_deliveries_and_dead_letters() {
    let queue = fresh_queue(2).await;
    queue.publish_created(StageName::Compilations, "c.mp4").await.unwrap();

    // First consumer takes the event and never acks it
    let first = queue.consume("crashed", 1000, 1).await.unwrap();
    assert_eq!(first.len(), 1);
    assert!(!queue.is_exhausted(&first[0]));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let reclaimed = queue
        .reclaim_idle("survivor", Duration::from_millis(10), 10)
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].message_id, first[0].message_id);
    assert_eq!(reclaimed[0].deliveries, 2);
    assert!(queue.is_exhausted(&reclaimed[0]));

    queue.dead_letter(&reclaimed[0], "publish rejected").await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 0);
    assert_eq!(queue.dlq_len().await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_touch_keeps_busy_event_from_reclaim() {
    let queue = fresh_queue(5).await;
    queue.publish_created(StageName::Normalized, "n.mp4").await.unwrap();

    let busy = queue.consume("busy", 1000, 1).await.unwrap();
    assert_eq!(busy.len(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(queue.touch("busy", &busy[0].message_id).await.unwrap());

    // Idle time restarted, so a 100ms threshold no longer matches
    let reclaimed = queue
        .reclaim_idle("other", Duration::from_millis(100), 10)
        .await
        .unwrap();
    assert!(reclaimed.is_empty());

    // Touching does not count as a delivery
    tokio::time::sleep(Duration::from_millis(150)).await;
    let reclaimed = queue
        .reclaim_idle("other", Duration::from_millis(100), 10)
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].deliveries, 2);

    // The previous owner cannot pull a reclaimed event back
    assert!(!queue.touch("busy", &busy[0].message_id).await.unwrap());
    assert!(queue.touch("other", &busy[0].message_id).await.unwrap());

    // Once acked there is nothing left to touch
    queue.ack(&busy[0].message_id).await.unwrap();
    assert!(!queue.touch("other", &busy[0].message_id).await.unwrap());
}
