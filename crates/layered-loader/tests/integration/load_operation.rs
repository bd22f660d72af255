use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use layered_loader::{
    DataSource, LayerError, LayerOperation, LoadOperation, LoadOptions, Loaded, LoaderError,
    TracingReporter,
};
use layered_loader_test::{
    CountingLoader, DummyCache, DummyLoader, ThrowingCache, ThrowingLoader, settle, setup,
};

use crate::{reporter, source};

type Layer = Arc<dyn DataSource<String>>;

fn operation(layers: Vec<Layer>, options: LoadOptions) -> LoadOperation<Layer> {
    LoadOperation::new("test", layers, options, Arc::new(TracingReporter))
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_loads_are_coalesced() {
    setup();

    let origin = Arc::new(CountingLoader::new("value").with_delay(Duration::from_millis(10)));
    let operation = operation(vec![source(&origin)], LoadOptions::default());

    let loads = (0..10).map(|_| operation.load("key".into(), None));
    let results = join_all(loads).await;

    assert_eq!(results.len(), 10);
    for result in results {
        assert_eq!(result, Ok(Loaded::Present("value".to_owned())));
    }
    assert_eq!(origin.times_called(), 1);

    // the in-flight entry is gone once settled
    operation.load("key".into(), None).await.unwrap();
    assert_eq!(origin.times_called(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_distinct_keys_are_not_coalesced() {
    setup();

    let origin = Arc::new(CountingLoader::new("value").with_delay(Duration::from_millis(10)));
    let operation = operation(vec![source(&origin)], LoadOptions::default());

    let (a, b) = futures::join!(
        operation.load("a".into(), None),
        operation.load("b".into(), None)
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(origin.times_called(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_backfills_skipped_caches() {
    setup();

    let first = Arc::new(DummyCache::named("first"));
    let second = Arc::new(DummyCache::named("second"));
    let origin = Arc::new(DummyLoader::new("v"));
    let operation = operation(
        vec![source(&first), source(&second), source(&origin)],
        LoadOptions::default(),
    );

    let result = operation.load("k".into(), None).await;
    assert_eq!(result, Ok(Loaded::Present("v".to_owned())));

    settle().await;
    assert_eq!(first.stored("k"), Some(Some("v".to_owned())));
    assert_eq!(second.stored("k"), Some(Some("v".to_owned())));
}

#[tokio::test(start_paused = true)]
async fn test_only_layers_above_the_answer_are_backfilled() {
    setup();

    let first = Arc::new(DummyCache::named("first"));
    let second = Arc::new(DummyCache::named("second").with_value("k", Some("cached")));
    let third = Arc::new(DummyCache::named("third"));
    let operation = operation(
        vec![source(&first), source(&second), source(&third)],
        LoadOptions::default(),
    );

    let result = operation.load("k".into(), None).await;
    assert_eq!(result, Ok(Loaded::Present("cached".to_owned())));

    settle().await;
    assert_eq!(first.stored("k"), Some(Some("cached".to_owned())));
    assert_eq!(third.stored("k"), None);
}

#[tokio::test(start_paused = true)]
async fn test_negative_results_are_terminal_and_backfilled() {
    setup();

    let cache = Arc::new(DummyCache::new());
    let origin = Arc::new(CountingLoader::with_loaded(Loaded::Negative));
    let fallback = Arc::new(DummyLoader::new("should not be reached"));
    let operation = operation(
        vec![source(&cache), source(&origin), source(&fallback)],
        LoadOptions::default(),
    );

    let result = operation.load("missing".into(), None).await;
    assert_eq!(result, Ok(Loaded::Negative));

    settle().await;
    assert_eq!(cache.stored("missing"), Some(None));

    let result = operation.load("missing".into(), None).await;
    assert_eq!(result, Ok(Loaded::Negative));
    assert_eq!(origin.times_called(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_all_misses_resolve_to_absent() {
    setup();

    let cache = Arc::new(DummyCache::new());
    let origin = Arc::new(DummyLoader::absent());
    let operation = operation(vec![source(&cache), source(&origin)], LoadOptions::default());

    let result = operation.load("key".into(), None).await;
    assert_eq!(result, Ok(Loaded::Absent));

    settle().await;
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_throw_if_unresolved() {
    setup();

    let options = LoadOptions {
        throw_if_unresolved: true,
        ..Default::default()
    };
    let error = operation(vec![], options)
        .load("value".into(), None)
        .await
        .unwrap_err();
    assert_eq!(
        error,
        LoaderError::NotFound {
            key: "value".into()
        }
    );
    assert!(
        error
            .to_string()
            .contains("Failed to resolve value for key \"value\"")
    );

    let result = operation(vec![], LoadOptions::default())
        .load("value".into(), None)
        .await;
    assert_eq!(result, Ok(Loaded::Absent));
}

#[tokio::test(start_paused = true)]
async fn test_failing_cache_falls_through_to_origin() {
    setup();

    let (recording, reporter) = reporter();
    let cache = Arc::new(ThrowingCache::new());
    let origin = Arc::new(DummyLoader::new("value"));
    let operation: LoadOperation<Layer> = LoadOperation::new(
        "test",
        vec![source(&cache), source(&origin)],
        LoadOptions {
            throw_if_load_error: true,
            ..Default::default()
        },
        reporter,
    );

    let result = operation.load("key".into(), None).await;
    assert_eq!(result, Ok(Loaded::Present("value".to_owned())));

    // the failed read and the failed backfill are both reported
    settle().await;
    let failures = recording.failures();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].operation, LayerOperation::Get);
    assert_eq!(failures[0].layer, "Throwing cache");
    assert_eq!(failures[0].key.as_deref(), Some("key"));
    assert_eq!(failures[1].operation, LayerOperation::Set);
    assert_eq!(cache.times_called(), 2);
}

#[tokio::test]
async fn test_origin_errors_are_isolated_by_default() {
    setup();

    let (recording, reporter) = reporter();
    let origin = Arc::new(ThrowingLoader::new());
    let operation: LoadOperation<Layer> = LoadOperation::new(
        "test",
        vec![source(&origin)],
        LoadOptions::default(),
        reporter,
    );

    let result = operation.load("key".into(), None).await;
    assert_eq!(result, Ok(Loaded::Absent));
    assert_eq!(recording.count(), 1);
}

#[tokio::test]
async fn test_origin_errors_surface_with_throw_if_load_error() {
    setup();

    let (recording, reporter) = reporter();
    let origin = Arc::new(ThrowingLoader::new());
    let fallback = Arc::new(DummyLoader::new("value"));
    let operation: LoadOperation<Layer> = LoadOperation::new(
        "test",
        vec![source(&origin), source(&fallback)],
        LoadOptions {
            throw_if_load_error: true,
            ..Default::default()
        },
        reporter,
    );

    let error = operation.load("key".into(), None).await.unwrap_err();
    assert_eq!(
        error,
        LoaderError::Load {
            layer: "Throwing loader".into(),
            source: LayerError::origin("Error has occurred"),
        }
    );
    assert_eq!(recording.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_layers_time_out() {
    setup();

    let (recording, reporter) = reporter();
    let slow = Arc::new(CountingLoader::new("slow").with_delay(Duration::from_secs(5)));
    let origin = Arc::new(DummyLoader::new("fast"));
    let operation: LoadOperation<Layer> = LoadOperation::new(
        "test",
        vec![source(&slow), source(&origin)],
        LoadOptions {
            layer_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        },
        reporter,
    );

    let result = operation.load("key".into(), None).await;
    assert_eq!(result, Ok(Loaded::Present("fast".to_owned())));

    let failures = recording.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].error,
        LayerError::Timeout(Duration::from_millis(100))
    );
}
