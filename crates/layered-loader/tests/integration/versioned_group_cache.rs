use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use layered_loader::{
    GroupDataSource, GroupLoader, GroupLoaderConfig, LayerError, Loaded,
    VersionStore, VersionedGroupCache, VersionedGroupCacheConfig,
};
use layered_loader_test::{
    CountingGroupedLoader, MemoryVersionStore, User, group_values, settle, setup,
};
use tokio::time::Instant;

fn versioned(
    config: VersionedGroupCacheConfig,
) -> (Arc<MemoryVersionStore<String>>, VersionedGroupCache<String>) {
    let store = Arc::new(MemoryVersionStore::new());
    let cache = VersionedGroupCache::new(
        Arc::clone(&store) as Arc<dyn VersionStore<String>>,
        config,
    )
    .unwrap();
    (store, cache)
}

fn value(value: &str) -> Loaded<String> {
    Loaded::Present(value.to_owned())
}

#[tokio::test]
async fn test_delete_group_makes_entries_unreachable() {
    setup();

    let (store, cache) = versioned(VersionedGroupCacheConfig::default());

    cache.set_for_group("k", Some("v".into()), "g").await.unwrap();
    assert_eq!(cache.get_from_group("k", "g").await, Ok(value("v")));

    let index_key = cache.resolve_group_index_key("g");
    let physical_key = cache.resolve_key_with_group("k", "g", "0");
    assert_eq!(index_key, "layered-loader:group-index:g");
    assert_eq!(physical_key, "layered-loader:g:0:k");
    assert_eq!(store.version(&index_key).as_deref(), Some("0"));
    assert!(store.contains(&physical_key));

    cache.delete_group("g").await.unwrap();
    assert_eq!(cache.get_from_group("k", "g").await, Ok(Loaded::Absent));

    // the old entry is still there, only the token moved on
    assert!(store.contains(&physical_key));
    assert_eq!(store.version(&index_key).as_deref(), Some("1"));

    cache.set_for_group("k", Some("new".into()), "g").await.unwrap();
    assert_eq!(cache.get_from_group("k", "g").await, Ok(value("new")));
    assert!(store.contains(&cache.resolve_key_with_group("k", "g", "1")));
}

#[tokio::test]
async fn test_groups_are_independent() {
    setup();

    let (_store, cache) = versioned(VersionedGroupCacheConfig::default());

    cache.set_for_group("k", Some("a".into()), "first").await.unwrap();
    cache.set_for_group("k", Some("b".into()), "second").await.unwrap();
    cache.delete_group("first").await.unwrap();

    assert_eq!(cache.get_from_group("k", "first").await, Ok(Loaded::Absent));
    assert_eq!(cache.get_from_group("k", "second").await, Ok(value("b")));
}

#[tokio::test]
async fn test_negative_entries() {
    setup();

    let (_store, cache) = versioned(VersionedGroupCacheConfig::default());

    cache.set_for_group("missing", None, "g").await.unwrap();
    assert_eq!(cache.get_from_group("missing", "g").await, Ok(Loaded::Negative));
    assert_eq!(cache.get_from_group("other", "g").await, Ok(Loaded::Absent));
}

#[tokio::test]
async fn test_delete_from_group() {
    setup();

    let (store, cache) = versioned(VersionedGroupCacheConfig::default());

    // nothing to delete without a version
    cache.delete_from_group("k", "g").await.unwrap();
    assert!(store.keys().is_empty());

    cache.set_for_group("k", Some("v".into()), "g").await.unwrap();
    cache.set_for_group("other", Some("o".into()), "g").await.unwrap();
    cache.delete_from_group("k", "g").await.unwrap();

    assert_eq!(cache.get_from_group("k", "g").await, Ok(Loaded::Absent));
    assert_eq!(cache.get_from_group("other", "g").await, Ok(value("o")));
    assert_eq!(
        store.version(&cache.resolve_group_index_key("g")).as_deref(),
        Some("0")
    );
}

#[tokio::test(start_paused = true)]
async fn test_expiration_time() {
    setup();

    let (_store, cache) = versioned(VersionedGroupCacheConfig {
        ttl: Some(Duration::from_secs(10)),
        ..Default::default()
    });

    assert_eq!(cache.get_expiration_time_from_group("k", "g").await, Ok(None));

    let written_at = Instant::now();
    cache.set_for_group("k", Some("v".into()), "g").await.unwrap();
    assert_eq!(
        cache.get_expiration_time_from_group("k", "g").await,
        Ok(Some(written_at + Duration::from_secs(10)))
    );

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(cache.get_from_group("k", "g").await, Ok(Loaded::Absent));
    assert_eq!(cache.get_expiration_time_from_group("k", "g").await, Ok(None));
}

#[tokio::test(start_paused = true)]
async fn test_group_token_lease() {
    setup();

    let (store, cache) = versioned(VersionedGroupCacheConfig {
        group_ttl: Some(Duration::from_secs(1)),
        ..Default::default()
    });
    let index_key = cache.resolve_group_index_key("g");

    cache.set_for_group("k", Some("v".into()), "g").await.unwrap();
    tokio::time::advance(Duration::from_secs(2)).await;

    assert_eq!(store.version(&index_key), None);
    assert_eq!(cache.get_from_group("k", "g").await, Ok(Loaded::Absent));

    // bumping renews the lease
    cache.delete_group("g").await.unwrap();
    tokio::time::advance(Duration::from_millis(500)).await;
    assert_eq!(store.version(&index_key).as_deref(), Some("1"));
}

#[tokio::test(start_paused = true)]
async fn test_bumping_an_expired_token_without_lease() {
    setup();

    let store = MemoryVersionStore::<String>::new();
    let ttl = Some(Duration::from_secs(1));
    assert_eq!(store.get_or_initialize_version("index", ttl).await, Ok("0".into()));
    tokio::time::advance(Duration::from_secs(2)).await;

    assert_eq!(store.increment_version("index", None).await, Ok("1".into()));
    tokio::time::advance(Duration::from_secs(3600)).await;
    assert_eq!(store.current_version("index").await, Ok(Some("1".into())));
}

#[tokio::test]
async fn test_concurrent_writers_share_one_version() {
    setup();

    let (store, cache) = versioned(VersionedGroupCacheConfig::default());

    let writes = (0..10).map(|i| {
        let cache = &cache;
        async move {
            cache
                .set_for_group(&format!("key-{i}"), Some(i.to_string()), "g")
                .await
        }
    });
    for result in join_all(writes).await {
        result.unwrap();
    }

    assert_eq!(
        store.version(&cache.resolve_group_index_key("g")).as_deref(),
        Some("0")
    );
    for i in 0..10 {
        assert_eq!(
            cache.get_from_group(&format!("key-{i}"), "g").await,
            Ok(value(&i.to_string()))
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_cached_version_tokens() {
    setup();

    let (store, cache) = versioned(VersionedGroupCacheConfig {
        version_cache_ttl: Some(Duration::from_secs(10)),
        ttl_left_before_refresh: Some(Duration::from_secs(2)),
        ..Default::default()
    });
    let index_key = cache.resolve_group_index_key("g");

    cache.set_for_group("k", Some("v".into()), "g").await.unwrap();
    assert_eq!(cache.get_from_group("k", "g").await, Ok(value("v")));

    // another process bumps the version; the token held in memory is still served
    store.increment_version(&index_key, None).await.unwrap();
    assert_eq!(cache.get_from_group("k", "g").await, Ok(value("v")));

    // a local bump drops the token held in memory
    cache.delete_group("g").await.unwrap();
    assert_eq!(store.version(&index_key).as_deref(), Some("2"));
    assert_eq!(cache.get_from_group("k", "g").await, Ok(Loaded::Absent));

    // writing refreshes the token held in memory
    cache.set_for_group("k", Some("w".into()), "g").await.unwrap();
    assert_eq!(cache.get_from_group("k", "g").await, Ok(value("w")));
}

#[tokio::test]
async fn test_store_failures() {
    setup();

    let (store, cache) = versioned(VersionedGroupCacheConfig::default());
    cache.set_for_group("k", Some("v".into()), "g").await.unwrap();

    store.set_failing(true);
    assert!(matches!(
        cache.set_for_group("k", Some("w".into()), "g").await,
        Err(LayerError::Unavailable(_))
    ));
    assert!(cache.delete_group("g").await.is_err());
    // version lookups fail in isolation and read as a miss
    assert_eq!(cache.get_from_group("k", "g").await, Ok(Loaded::Absent));

    store.set_failing(false);
    assert_eq!(cache.get_from_group("k", "g").await, Ok(value("v")));
}

#[tokio::test]
async fn test_clear() {
    setup();

    let (store, cache) = versioned(VersionedGroupCacheConfig::default());
    cache.set_for_group("a", Some("1".into()), "g").await.unwrap();
    cache.set_for_group("b", Some("2".into()), "h").await.unwrap();
    store
        .write("unrelated", Some("x".into()), None)
        .await
        .unwrap();

    cache.clear().await.unwrap();
    assert_eq!(store.keys(), vec!["unrelated".to_owned()]);
    assert_eq!(cache.get_from_group("a", "g").await, Ok(Loaded::Absent));
}

#[tokio::test(start_paused = true)]
async fn test_as_async_cache_of_group_loader() {
    setup();

    let store = Arc::new(MemoryVersionStore::<User>::new());
    let cache = Arc::new(
        VersionedGroupCache::<User>::new(
            Arc::clone(&store) as Arc<dyn VersionStore<User>>,
            VersionedGroupCacheConfig::default(),
        )
        .unwrap(),
    );
    let origin = Arc::new(CountingGroupedLoader::new(group_values()));
    let loader = GroupLoader::new(
        GroupLoaderConfig::new()
            .with_async_cache(Arc::clone(&cache) as Arc<dyn GroupDataSource<User>>)
            .with_data_source(Arc::clone(&origin) as Arc<dyn GroupDataSource<User>>),
    )
    .unwrap();

    let john = Loaded::Present(User::new(1, "John"));
    assert_eq!(loader.get("1", "1").await, Ok(john.clone()));
    settle().await;
    assert!(store.contains(&cache.resolve_key_with_group("1", "1", "0")));

    assert_eq!(loader.get("1", "1").await, Ok(john.clone()));
    assert_eq!(origin.times_called(), 1);

    loader.invalidate_cache_for_group("1").await;
    assert_eq!(loader.get("1", "1").await, Ok(john));
    assert_eq!(origin.times_called(), 2);
}
