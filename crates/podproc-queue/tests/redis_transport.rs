//! Redis transport integration tests.

use std::time::Duration;

use podproc_queue::{MessageTransport, QueueConfig, RedisStreamTransport};

async fn publish(config: &QueueConfig, payload: &str) -> String {
    let client = redis::Client::open(config.redis_url().as_str()).expect("client");
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .expect("connection");

    redis::cmd("XADD")
        .arg(config.namespaced(&config.requests_stream))
        .arg("*")
        .arg("job")
        .arg(payload)
        .query_async(&mut conn)
        .await
        .expect("xadd")
}

fn test_config() -> QueueConfig {
    dotenvy::dotenv().ok();
    let mut config = QueueConfig::from_env().expect("queue env");
    config.requests_stream = format!("podproc-test-{}", uuid::Uuid::new_v4());
    config.block_timeout = Duration::from_millis(200);
    config
}

/// Publish, consume and acknowledge one message.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_consume_and_ack() {
    let config = test_config();
    let transport = RedisStreamTransport::new(config.clone()).expect("transport");
    let mut subscription = transport.connect().await.expect("connect");

    let body = r#"{"outputS3Uri":"s3://out/b/final.mp3","segments":[{"s3Uri":"s3://in/a/1.mp3"}]}"#;
    let id = publish(&config, body).await;

    let delivery = tokio::time::timeout(Duration::from_secs(5), subscription.next_delivery())
        .await
        .expect("delivery in time")
        .expect("read")
        .expect("open subscription");

    assert_eq!(delivery.id, id);
    assert_eq!(delivery.payload, body.as_bytes());

    subscription
        .ack(&delivery, br#"{"outputS3Uri":"s3://out/b/final.mp3"}"#)
        .await
        .expect("ack");
}

/// Rejected messages land on the dead-letter stream.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_reject_moves_to_dlq() {
    let config = test_config();
    let transport = RedisStreamTransport::new(config.clone()).expect("transport");
    let mut subscription = transport.connect().await.expect("connect");

    publish(&config, "not json").await;
    let delivery = subscription
        .next_delivery()
        .await
        .expect("read")
        .expect("open subscription");

    subscription
        .reject(&delivery, "undecodable payload")
        .await
        .expect("reject");

    let client = redis::Client::open(config.redis_url().as_str()).expect("client");
    let mut conn = client.get_multiplexed_async_connection().await.expect("conn");
    let len: u64 = redis::cmd("XLEN")
        .arg(config.namespaced(&config.dlq_stream))
        .query_async(&mut conn)
        .await
        .expect("xlen");
    assert!(len >= 1);
}

/// A message left unsettled by a lost session is delivered again after
/// reconnecting.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_unsettled_message_redelivered_after_reconnect() {
    let config = test_config();
    let transport = RedisStreamTransport::new(config.clone()).expect("transport");

    let mut first = transport.connect().await.expect("connect");
    let body = r#"{"outputS3Uri":"s3://out/b/final.mp3","segments":[{"s3Uri":"s3://in/a/1.mp3"}]}"#;
    let id = publish(&config, body).await;

    let delivery = first
        .next_delivery()
        .await
        .expect("read")
        .expect("open subscription");
    assert_eq!(delivery.id, id);
    drop(first);

    let mut second = transport.connect().await.expect("reconnect");
    let again = tokio::time::timeout(Duration::from_secs(5), second.next_delivery())
        .await
        .expect("redelivery in time")
        .expect("read")
        .expect("open subscription");

    assert_eq!(again.id, id);
    assert_eq!(again.payload, body.as_bytes());
    second.ack(&again, b"{}").await.expect("ack");
}
