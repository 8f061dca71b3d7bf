//! Compile-time prelude coverage test.
use bucketproxy::prelude::*;
use std::time::Duration;

#[tokio::test]
async fn prelude_reexports_core_types() {
    let config = ClientSideConfig::new()
        .with_request_timeout(Duration::from_millis(100))
        .expect("valid timeout");
    let manager = ProxyManager::builder(
        CasBackend::new(InMemoryCasStore::new()).with_key_mapper(KeyMapper::text()),
    )
    .with_client_side_config(config)
    .with_expiration(ExpirationPolicy::none())
    .build()
    .expect("valid manager");

    let bump = from_fn(|current| {
        let next = current.map_or(0u8, |bytes| bytes[0]) + 1;
        Ok(Mutation::write(vec![next], next))
    });
    let result: ProxyResult<u8> = manager.execute("k", &bump).await;
    assert_eq!(result.expect("execute failed"), 1);
}
