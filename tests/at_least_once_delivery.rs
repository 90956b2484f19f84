//! An uncommitted consume is redelivered to the same group once its
//! lease expires, proving at-least-once delivery end to end through
//! the queue's public API.

use chrono::Duration as ChronoDuration;
use perpbot::collections::queue::MessageQueue;
use perpbot::domain::errors::QueueError;
use std::time::Duration;

#[tokio::test]
async fn uncommitted_consume_is_redelivered_after_lease_expiry() {
    let queue = MessageQueue::<String>::with_lease(ChronoDuration::hours(1), ChronoDuration::milliseconds(50));

    let offset = queue.push("orders", "place BTCUSDT".to_string(), None).await;

    let first = queue.consume("orders", "executor").await.unwrap();
    assert_eq!(first.offset, offset);

    assert!(matches!(
        queue.consume("orders", "executor").await,
        Err(QueueError::MustCommitBeforeConsuming)
    ));

    tokio::time::sleep(Duration::from_millis(80)).await;

    let redelivered = queue.consume("orders", "executor").await.unwrap();
    assert_eq!(redelivered.offset, offset);
    assert_eq!(redelivered.data, "place BTCUSDT");

    queue.commit("orders", "executor", redelivered.offset).await;
    assert!(matches!(
        queue.consume("orders", "executor").await,
        Err(QueueError::NoMessage)
    ));
}
