//! Integration tests for the Redis offset store
//!
//! These tests require a running Redis instance.
//! Run with: cargo test --test redis_offset_store_test -- --ignored

use change_stream::{
    EventDecoder, EventEncoder, GzipCodec, OffsetListStore, OffsetPublishStore, OffsetStore,
    OffsetStoreError, RedisOffsetStore, StreamOffset,
};
use chrono::{TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

const REDIS_URL: &str = "redis://127.0.0.1:6379";

async fn connection() -> ConnectionManager {
    let client = redis::Client::open(REDIS_URL).expect("Invalid Redis URL");
    ConnectionManager::new(client)
        .await
        .expect("Failed to connect to Redis")
}

async fn fresh_store(name: &str, list_key: Option<&str>) -> RedisOffsetStore {
    let mut conn = connection().await;
    let hash = format!("change_stream_test:{}", name);
    let _: () = conn.del(&hash).await.expect("Failed to clean hash");
    if let Some(list_key) = list_key {
        let _: () = conn.del(list_key).await.expect("Failed to clean list");
    }

    RedisOffsetStore::new(conn, hash, "users", list_key.map(str::to_string))
        .expect("Failed to build store")
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_offset_round_trip() {
    let store = fresh_store("round_trip", None).await;
    assert_eq!(store.get_offset().await.unwrap(), None);

    let ts = Utc.timestamp_opt(1_714_557_600, 250_000_000).unwrap();
    let offset = StreamOffset::new("8263A1B2C3", ts);
    store.set_offset(&offset).await.unwrap();

    assert_eq!(store.get_offset().await.unwrap(), Some(offset));
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_fields_layout() {
    let store = fresh_store("layout", None).await;
    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    store.set_offset(&StreamOffset::new("T1", ts)).await.unwrap();

    let mut conn = connection().await;
    let token: String = conn.hget(store.hash(), "users").await.unwrap();
    let raw_ts: String = conn.hget(store.hash(), "users_ts").await.unwrap();

    assert_eq!(token, "T1");
    assert_eq!(raw_ts, "2024-05-01T10:00:00Z");
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_clear_offset_means_tail() {
    let store = fresh_store("clear", None).await;
    store
        .set_offset(&StreamOffset::new("T1", Utc::now()))
        .await
        .unwrap();

    store.clear_offset().await.unwrap();

    assert_eq!(store.get_offset().await.unwrap(), None);
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_set_offset_and_push() {
    let list_key = "change_stream_test:outbox";
    let store = fresh_store("push", Some(list_key)).await;
    let codec = GzipCodec::new();

    let payload = codec.encode(br#"{"_id":{"_data":"T1"}}"#).unwrap();
    let offset = StreamOffset::new("T1", Utc::now());
    store.set_offset_and_push(&offset, &payload).await.unwrap();

    let mut conn = connection().await;
    let items: Vec<Vec<u8>> = conn.lrange(list_key, 0, -1).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(
        codec.decode(&items[0]).unwrap(),
        br#"{"_id":{"_data":"T1"}}"#.to_vec()
    );
    assert_eq!(
        store.get_offset().await.unwrap().map(|o| o.resume_token),
        Some("T1".to_string())
    );
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_push_without_list_key_is_rejected() {
    let store = fresh_store("push_no_list", None).await;
    let offset = StreamOffset::new("T1", Utc::now());

    let result = store.set_offset_and_push(&offset, b"payload").await;

    assert!(matches!(result, Err(OffsetStoreError::Configuration(_))));
    assert_eq!(store.get_offset().await.unwrap(), None);
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_set_offset_and_publish_without_subscribers() {
    let store = fresh_store("publish", None).await;
    let offset = StreamOffset::new("T9", Utc::now());

    store
        .set_offset_and_publish(&offset, "change_stream_test:users", "changed")
        .await
        .unwrap();

    assert_eq!(
        store.get_offset().await.unwrap().map(|o| o.resume_token),
        Some("T9".to_string())
    );
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_empty_hash_or_key_is_rejected() {
    let conn = connection().await;

    assert!(matches!(
        RedisOffsetStore::new(conn.clone(), "", "users", None),
        Err(OffsetStoreError::Configuration(_))
    ));
    assert!(matches!(
        RedisOffsetStore::new(conn, "offsets", "", None),
        Err(OffsetStoreError::Configuration(_))
    ));
}
