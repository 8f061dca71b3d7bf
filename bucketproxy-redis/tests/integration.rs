use bucketproxy::testing::{increment, read_counter, CountingTransition};
use bucketproxy::{
    CasStore, ClientSideConfig, ExpirationPolicy, KeyMapper, ProxyError,
};
use bucketproxy_redis::{builder_for, RedisCasStore};
use futures::future::join_all;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;

// Requires Redis. If BUCKETPROXY_TEST_REDIS_URL is unset, the tests skip.
async fn connection() -> Option<ConnectionManager> {
    let url = match std::env::var("BUCKETPROXY_TEST_REDIS_URL") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("skipping: set BUCKETPROXY_TEST_REDIS_URL (e.g. redis://127.0.0.1:6379/)");
            return None;
        }
    };
    let client = redis::Client::open(url.as_str())
        .unwrap_or_else(|e| panic!("invalid Redis URL '{}': {}", url, e));
    let conn = client
        .get_connection_manager()
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to Redis at '{}': {}", url, e));
    Some(conn)
}

fn prefix() -> String {
    format!("bucketproxy-test:{}:", uuid::Uuid::new_v4().simple())
}

#[tokio::test]
async fn store_swaps_only_on_match() {
    let Some(conn) = connection().await else { return };
    let store = RedisCasStore::new(conn);
    let key = format!("{}raw", prefix());
    let key = key.as_bytes();

    assert_eq!(store.get(key).await.unwrap(), None);
    assert!(store.compare_and_swap(key, None, b"\x00\xffv1", None).await.unwrap());
    assert!(!store.compare_and_swap(key, None, b"v2", None).await.unwrap());
    assert!(!store.compare_and_swap(key, Some(&b"v0"[..]), b"v2", None).await.unwrap());
    assert!(store.compare_and_swap(key, Some(&b"\x00\xffv1"[..]), b"v2", None).await.unwrap());
    assert_eq!(store.get(key).await.unwrap(), Some(b"v2".to_vec()));
    assert!(store.delete(key).await.unwrap());
    assert!(!store.delete(key).await.unwrap());
}

#[tokio::test]
async fn ttl_is_set_with_each_write_and_cleared_without() {
    let Some(conn) = connection().await else { return };
    let mut probe = conn.clone();
    let store = RedisCasStore::new(conn);
    let key = format!("{}ttl", prefix());

    store
        .compare_and_swap(key.as_bytes(), None, b"1", Some(Duration::from_secs(10)))
        .await
        .unwrap();
    let pttl: i64 = probe.pttl(&key).await.unwrap();
    assert!(pttl > 9_000 && pttl <= 10_000, "pttl = {}", pttl);

    store.compare_and_swap(key.as_bytes(), Some(&b"1"[..]), b"2", None).await.unwrap();
    let pttl: i64 = probe.pttl(&key).await.unwrap();
    assert_eq!(pttl, -1, "plain SET leaves the key persistent");
    store.delete(key.as_bytes()).await.unwrap();
}

#[tokio::test]
async fn expired_key_reads_absent() {
    let Some(conn) = connection().await else { return };
    let ttl = ExpirationPolicy::fixed_time_to_live(Duration::from_millis(200)).unwrap();
    let manager = builder_for(conn)
        .with_key_mapper(KeyMapper::text().with_prefix(prefix()))
        .with_expiration(ttl)
        .build()
        .unwrap();

    assert_eq!(manager.execute("k", &increment(4)).await.unwrap(), 4);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(manager.read("k").await.unwrap(), None);
    assert_eq!(manager.execute("k", &increment(1)).await.unwrap(), 1);
}

#[tokio::test]
async fn key_mappers_address_each_key_kind() {
    let Some(conn) = connection().await else { return };
    let ns = prefix();
    let integers = builder_for(conn.clone())
        .with_key_mapper(KeyMapper::integer().with_prefix(ns.clone()))
        .build()
        .unwrap();
    let strings = builder_for(conn.clone())
        .with_key_mapper(KeyMapper::text().with_prefix(ns.clone()))
        .build()
        .unwrap();
    let bytes = builder_for(conn)
        .with_key_mapper(KeyMapper::bytes().with_prefix(ns))
        .build()
        .unwrap();

    assert_eq!(integers.execute(&7i64, &increment(1)).await.unwrap(), 1);
    assert_eq!(strings.execute("seven", &increment(2)).await.unwrap(), 2);
    assert_eq!(bytes.execute(&b"\x07"[..], &increment(3)).await.unwrap(), 3);

    let err = integers.execute("seven", &increment(1)).await.unwrap_err();
    assert!(matches!(err, ProxyError::InvalidKey(_)));
    let err = strings.execute(&7i64, &increment(1)).await.unwrap_err();
    assert!(matches!(err, ProxyError::InvalidKey(_)));

    for removed in [
        integers.remove(&7i64).await.unwrap(),
        strings.remove("seven").await.unwrap(),
        bytes.remove(&b"\x07"[..]).await.unwrap(),
    ] {
        assert!(removed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_converge() {
    let Some(conn) = connection().await else { return };
    let manager = Arc::new(
        builder_for(conn)
            .with_key_mapper(KeyMapper::text().with_prefix(prefix()))
            .with_client_side_config(
                ClientSideConfig::new().with_request_timeout(Duration::from_secs(10)).unwrap(),
            )
            .build()
            .unwrap(),
    );
    let counting = CountingTransition::new(increment(1));

    let tasks = (0..8).map(|_| {
        let manager = manager.clone();
        let counting = counting.clone();
        tokio::spawn(async move {
            for _ in 0..25 {
                manager.execute("hot", &counting).await.expect("increment");
            }
        })
    });
    for joined in join_all(tasks).await {
        joined.expect("task panicked");
    }

    let total = read_counter(manager.read("hot").await.unwrap().as_deref()).unwrap();
    assert_eq!(total, 200);
    // Lost races re-apply the transition.
    assert!(counting.invocations() >= 200);
    manager.remove("hot").await.unwrap();
}
