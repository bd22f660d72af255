use std::sync::Arc;
use std::time::Duration;

use layered_loader::{
    DataSource, InMemoryCache, InMemoryCacheConfig, LayerError, LayerOperation, Loaded, Loader,
    LoaderConfig, LoaderError,
};
use layered_loader_test::{
    CountingLoader, DummyCache, DummyLoader, DummyLoaderParams, DummyLoaderWithParams,
    TemporaryThrowingLoader, ThrowingCache, ThrowingLoader, settle, setup,
};

use crate::{reporter, source};

fn in_memory() -> InMemoryCacheConfig {
    InMemoryCacheConfig::new(Duration::from_secs(10))
}

fn value(value: &str) -> Loaded<String> {
    Loaded::Present(value.to_owned())
}

#[tokio::test(start_paused = true)]
async fn test_get_in_memory_only() {
    setup();

    let origin = Arc::new(CountingLoader::new("value"));
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(in_memory())
            .with_data_source(source(&origin)),
    )
    .unwrap();

    // never resolves through the chain by itself
    assert_eq!(loader.get_in_memory_only("key"), Loaded::Absent);
    assert_eq!(origin.times_called(), 0);

    assert_eq!(loader.get("key").await, Ok(value("value")));
    assert_eq!(loader.get_in_memory_only("key"), value("value"));
    assert_eq!(origin.times_called(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_get_in_memory_only_without_in_memory_layer() {
    setup();

    let origin = Arc::new(DummyLoader::new("value"));
    let loader = Loader::new(LoaderConfig::new().with_data_source(source(&origin))).unwrap();

    assert_eq!(loader.get("key").await, Ok(value("value")));
    assert_eq!(loader.get_in_memory_only("key"), Loaded::Absent);
    assert_eq!(loader.expiration_time("key"), None);
}

#[tokio::test(start_paused = true)]
async fn test_in_memory_entries_expire() {
    setup();

    let origin = Arc::new(CountingLoader::new("value"));
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(InMemoryCacheConfig::new(Duration::from_millis(100)))
            .with_data_source(source(&origin)),
    )
    .unwrap();

    loader.get("key").await.unwrap();
    loader.get("key").await.unwrap();
    assert_eq!(origin.times_called(), 1);

    tokio::time::advance(Duration::from_millis(150)).await;
    assert_eq!(loader.get_in_memory_only("key"), Loaded::Absent);
    loader.get("key").await.unwrap();
    assert_eq!(origin.times_called(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_ahead() {
    setup();

    let origin = Arc::new(CountingLoader::new("value"));
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(
                InMemoryCacheConfig::new(Duration::from_millis(150))
                    .with_refresh(Duration::from_millis(75)),
            )
            .with_data_source(source(&origin)),
    )
    .unwrap();

    assert_eq!(loader.get("key").await, Ok(value("value")));
    let expires_at = loader.expiration_time("key").unwrap();

    tokio::time::advance(Duration::from_millis(80)).await;
    origin.set_value(value("refreshed"));

    // served synchronously, refreshed in the background exactly once
    assert_eq!(loader.get_in_memory_only("key"), value("value"));
    assert_eq!(loader.get("key").await, Ok(value("value")));
    assert_eq!(loader.expiration_time("key"), Some(expires_at));

    settle().await;
    assert!(loader.expiration_time("key").unwrap() > expires_at);
    assert_eq!(loader.get_in_memory_only("key"), value("refreshed"));
    assert_eq!(origin.times_called(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_ahead_with_identical_async_cache() {
    setup();

    let config = InMemoryCacheConfig::new(Duration::from_millis(150))
        .with_refresh(Duration::from_millis(75));
    let shared = Arc::new(InMemoryCache::new(config.clone()));
    let origin = Arc::new(CountingLoader::new("value"));
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(config)
            .with_async_cache(source(&shared))
            .with_data_source(source(&origin)),
    )
    .unwrap();

    loader.get("key").await.unwrap();
    settle().await;
    assert_eq!(shared.get("key"), value("value"));
    let expires_at = loader.expiration_time("key").unwrap();

    tokio::time::advance(Duration::from_millis(80)).await;
    assert_eq!(loader.get("key").await, Ok(value("value")));

    // the refresh resolves from the async cache without re-entering the loader
    tokio::time::timeout(Duration::from_secs(1), settle())
        .await
        .expect("refresh should settle");
    assert!(loader.expiration_time("key").unwrap() > expires_at);
    assert_eq!(origin.times_called(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_keeps_serving() {
    setup();

    let origin = Arc::new(TemporaryThrowingLoader::new("value"));
    origin.set_throwing(false);
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(
                InMemoryCacheConfig::new(Duration::from_millis(150))
                    .with_refresh(Duration::from_millis(75)),
            )
            .with_data_source(source(&origin)),
    )
    .unwrap();

    loader.get("key").await.unwrap();
    let expires_at = loader.expiration_time("key").unwrap();
    origin.set_throwing(true);

    tokio::time::advance(Duration::from_millis(80)).await;
    assert_eq!(loader.get_in_memory_only("key"), value("value"));
    settle().await;

    assert_eq!(origin.times_called(), 2);
    assert_eq!(loader.expiration_time("key"), Some(expires_at));
    assert_eq!(loader.get_in_memory_only("key"), value("value"));
}

#[tokio::test]
async fn test_throw_if_unresolved() {
    setup();

    let loader = Loader::<String>::new(LoaderConfig::new().throw_if_unresolved(true)).unwrap();
    let error = loader.get("value").await.unwrap_err();
    assert_eq!(
        error.to_string(),
        "Failed to resolve value for key \"value\""
    );

    let loader = Loader::<String>::new(LoaderConfig::new()).unwrap();
    assert_eq!(loader.get("value").await, Ok(Loaded::Absent));
}

#[tokio::test]
async fn test_throw_if_load_error() {
    setup();

    let (recording, reporter) = reporter();
    let origin = Arc::new(ThrowingLoader::new());
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(in_memory())
            .with_data_source(source(&origin))
            .with_reporter(reporter)
            .throw_if_load_error(true),
    )
    .unwrap();

    let error = loader.get("value").await.unwrap_err();
    assert!(matches!(
        error,
        LoaderError::Load {
            source: LayerError::Origin(ref message),
            ..
        } if message == "Error has occurred"
    ));
    assert_eq!(recording.count(), 1);
    assert_eq!(loader.get_in_memory_only("value"), Loaded::Absent);
}

#[tokio::test(start_paused = true)]
async fn test_failing_async_cache() {
    setup();

    let (recording, reporter) = reporter();
    let cache = Arc::new(ThrowingCache::new());
    let origin = Arc::new(DummyLoader::new("value"));
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(in_memory())
            .with_async_cache(source(&cache))
            .with_data_source(source(&origin))
            .with_reporter(reporter),
    )
    .unwrap();

    assert_eq!(loader.get("value").await, Ok(value("value")));
    settle().await;
    assert_eq!(recording.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_backfills_async_cache() {
    setup();

    let cache = Arc::new(DummyCache::new());
    let origin = Arc::new(DummyLoader::new("value"));
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(in_memory())
            .with_async_cache(source(&cache))
            .with_data_source(source(&origin)),
    )
    .unwrap();

    assert_eq!(loader.get("key").await, Ok(value("value")));
    assert_eq!(loader.get_in_memory_only("key"), value("value"));

    settle().await;
    assert_eq!(cache.stored("key"), Some(Some("value".to_owned())));
}

#[tokio::test(start_paused = true)]
async fn test_serves_from_async_cache() {
    setup();

    let cache = Arc::new(DummyCache::new().with_value("key", Some("cached")));
    let origin = Arc::new(CountingLoader::new("value"));
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(in_memory())
            .with_async_cache(source(&cache))
            .with_data_source(source(&origin)),
    )
    .unwrap();

    assert_eq!(loader.get("key").await, Ok(value("cached")));
    assert_eq!(loader.get_in_memory_only("key"), value("cached"));
    assert_eq!(origin.times_called(), 0);
}

#[tokio::test]
async fn test_passes_params_to_data_sources() {
    setup();

    let origin = Arc::new(DummyLoaderWithParams::new("value"));
    let loader = Loader::new(
        LoaderConfig::new()
            .with_data_source(origin as Arc<dyn DataSource<String, DummyLoaderParams>>),
    )
    .unwrap();

    let params = DummyLoaderParams::new("pre", "post");
    let result = loader.get_with_params("key", Some(params)).await;
    assert_eq!(result, Ok(value("prevaluepost")));
}

#[tokio::test(start_paused = true)]
async fn test_batches_identical_requests() {
    setup();

    let origin = Arc::new(CountingLoader::new("value").with_delay(Duration::from_millis(10)));
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(in_memory())
            .with_data_source(source(&origin)),
    )
    .unwrap();

    let (a, b, c) = futures::join!(loader.get("key"), loader.get("key"), loader.get("key"));
    assert_eq!(a, Ok(value("value")));
    assert_eq!(b, Ok(value("value")));
    assert_eq!(c, Ok(value("value")));
    assert_eq!(origin.times_called(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_negative_results_are_cached_in_memory() {
    setup();

    let origin = Arc::new(CountingLoader::with_loaded(Loaded::Negative));
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(in_memory())
            .with_data_source(source(&origin)),
    )
    .unwrap();

    assert_eq!(loader.get("key").await, Ok(Loaded::Negative));
    assert_eq!(loader.get("key").await, Ok(Loaded::Negative));
    assert_eq!(loader.get_in_memory_only("key"), Loaded::Negative);
    assert_eq!(origin.times_called(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_absent_results_are_not_cached() {
    setup();

    let origin = Arc::new(CountingLoader::with_loaded(Loaded::Absent));
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(in_memory())
            .with_data_source(source(&origin)),
    )
    .unwrap();

    assert_eq!(loader.get("key").await, Ok(Loaded::Absent));
    assert_eq!(loader.get("key").await, Ok(Loaded::Absent));
    assert_eq!(origin.times_called(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_get_async_only_skips_memory() {
    setup();

    let origin = Arc::new(CountingLoader::new("value"));
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(in_memory())
            .with_data_source(source(&origin)),
    )
    .unwrap();

    loader.get("key").await.unwrap();
    origin.set_value(value("updated"));

    assert_eq!(loader.get_async_only("key").await, Ok(value("updated")));
    assert_eq!(loader.get_in_memory_only("key"), value("updated"));
    assert_eq!(origin.times_called(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_cache_for() {
    setup();

    let cache = Arc::new(DummyCache::new());
    let origin = Arc::new(CountingLoader::new("value"));
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(in_memory())
            .with_async_cache(source(&cache))
            .with_data_source(source(&origin)),
    )
    .unwrap();

    loader.get("key").await.unwrap();
    loader.get("other").await.unwrap();
    settle().await;

    loader.invalidate_cache_for("key").await;
    assert_eq!(loader.get_in_memory_only("key"), Loaded::Absent);
    assert_eq!(cache.stored("key"), None);
    assert_eq!(loader.get_in_memory_only("other"), value("value"));

    loader.get("key").await.unwrap();
    assert_eq!(origin.times_called(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_cache_for_with_failing_async_cache() {
    setup();

    let (recording, reporter) = reporter();
    let cache = Arc::new(ThrowingCache::new());
    let origin = Arc::new(CountingLoader::new("value"));
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(in_memory())
            .with_async_cache(source(&cache))
            .with_data_source(source(&origin))
            .with_reporter(reporter),
    )
    .unwrap();

    loader.get("key").await.unwrap();
    loader.invalidate_cache_for("key").await;
    loader.get("key").await.unwrap();

    assert_eq!(origin.times_called(), 2);
    settle().await;
    let deletes = recording
        .failures()
        .into_iter()
        .filter(|failure| failure.operation == LayerOperation::Delete)
        .count();
    assert_eq!(deletes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_cache_is_idempotent() {
    setup();

    let (recording, reporter) = reporter();
    let cache = Arc::new(ThrowingCache::new());
    let origin = Arc::new(CountingLoader::new("value"));
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(in_memory())
            .with_async_cache(source(&cache))
            .with_data_source(source(&origin))
            .with_reporter(reporter),
    )
    .unwrap();

    loader.get("key").await.unwrap();
    settle().await;
    let before = recording.count();

    loader.invalidate_cache().await;
    assert_eq!(loader.get_in_memory_only("key"), Loaded::Absent);
    loader.invalidate_cache().await;
    assert_eq!(loader.get_in_memory_only("key"), Loaded::Absent);
    assert_eq!(recording.count(), before + 2);

    loader.get("key").await.unwrap();
    assert_eq!(origin.times_called(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_cache_clears_async_cache() {
    setup();

    let cache = Arc::new(DummyCache::new().with_value("a", Some("1")).with_value("b", None));
    let loader = Loader::new(
        LoaderConfig::new()
            .with_in_memory(in_memory())
            .with_async_cache(source(&cache)),
    )
    .unwrap();

    assert_eq!(loader.get("a").await, Ok(value("1")));
    loader.invalidate_cache().await;
    loader.invalidate_cache().await;

    assert!(cache.is_empty());
    assert_eq!(loader.get("a").await, Ok(Loaded::Absent));
}

#[test]
fn test_rejects_invalid_in_memory_config() {
    let config = InMemoryCacheConfig::new(Duration::from_millis(100))
        .with_refresh(Duration::from_millis(200));
    let result = Loader::<String>::new(LoaderConfig::new().with_in_memory(config));
    assert!(matches!(result, Err(LoaderError::Configuration(_))));
}
