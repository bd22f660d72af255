use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use layered_loader::{DataSource, LayerError, Loaded};
use parking_lot::Mutex;

/// An origin always answering with the same value.
#[derive(Debug)]
pub struct DummyLoader {
    value: Mutex<Loaded<String>>,
}

impl DummyLoader {
    pub fn new(value: impl Into<String>) -> Self {
        Self::with_loaded(Loaded::Present(value.into()))
    }

    pub fn with_loaded(value: Loaded<String>) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    /// An origin that knows nothing.
    pub fn absent() -> Self {
        Self::with_loaded(Loaded::Absent)
    }

    pub fn set_value(&self, value: Loaded<String>) {
        *self.value.lock() = value;
    }
}

#[async_trait]
impl<P: Send + Sync + 'static> DataSource<String, P> for DummyLoader {
    fn name(&self) -> &str {
        "Dummy loader"
    }

    async fn get(&self, _key: &str, _params: Option<&P>) -> Result<Loaded<String>, LayerError> {
        Ok(self.value.lock().clone())
    }
}

/// An origin counting how often it was asked, optionally answering slowly.
#[derive(Debug)]
pub struct CountingLoader {
    value: Mutex<Loaded<String>>,
    delay: Option<Duration>,
    counter: AtomicUsize,
}

impl CountingLoader {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Loaded::Present(value.into())),
            delay: None,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn with_loaded(value: Loaded<String>) -> Self {
        Self {
            value: Mutex::new(value),
            delay: None,
            counter: AtomicUsize::new(0),
        }
    }

    /// Answers only after `delay`, so concurrent calls overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_value(&self, value: Loaded<String>) {
        *self.value.lock() = value;
    }

    pub fn times_called(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<P: Send + Sync + 'static> DataSource<String, P> for CountingLoader {
    fn name(&self) -> &str {
        "Counting loader"
    }

    async fn get(&self, _key: &str, _params: Option<&P>) -> Result<Loaded<String>, LayerError> {
        self.counter.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.value.lock().clone())
    }
}

/// An origin whose every attempt fails.
#[derive(Debug, Default)]
pub struct ThrowingLoader {
    counter: AtomicUsize,
}

impl ThrowingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn times_called(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<P: Send + Sync + 'static> DataSource<String, P> for ThrowingLoader {
    fn name(&self) -> &str {
        "Throwing loader"
    }

    async fn get(&self, _key: &str, _params: Option<&P>) -> Result<Loaded<String>, LayerError> {
        self.counter.fetch_add(1, Ordering::SeqCst);
        Err(LayerError::origin("Error has occurred"))
    }
}

/// An origin that fails while switched into throwing mode.
#[derive(Debug)]
pub struct TemporaryThrowingLoader {
    value: Mutex<Loaded<String>>,
    is_throwing: AtomicBool,
    counter: AtomicUsize,
}

impl TemporaryThrowingLoader {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Loaded::Present(value.into())),
            is_throwing: AtomicBool::new(true),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn set_throwing(&self, is_throwing: bool) {
        self.is_throwing.store(is_throwing, Ordering::SeqCst);
    }

    pub fn set_value(&self, value: Loaded<String>) {
        *self.value.lock() = value;
    }

    pub fn times_called(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<P: Send + Sync + 'static> DataSource<String, P> for TemporaryThrowingLoader {
    fn name(&self) -> &str {
        "Temporary throwing loader"
    }

    async fn get(&self, _key: &str, _params: Option<&P>) -> Result<Loaded<String>, LayerError> {
        self.counter.fetch_add(1, Ordering::SeqCst);
        if self.is_throwing.load(Ordering::SeqCst) {
            return Err(LayerError::origin("Error has occurred"));
        }
        Ok(self.value.lock().clone())
    }
}

/// A cache that is down: every operation fails.
#[derive(Debug, Default)]
pub struct ThrowingCache {
    counter: AtomicUsize,
}

impl ThrowingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations attempted, of any kind.
    pub fn times_called(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T, LayerError> {
        self.counter.fetch_add(1, Ordering::SeqCst);
        Err(LayerError::Unavailable("Error has occurred".into()))
    }
}

#[async_trait]
impl<P: Send + Sync + 'static> DataSource<String, P> for ThrowingCache {
    fn name(&self) -> &str {
        "Throwing cache"
    }

    fn is_cache(&self) -> bool {
        true
    }

    async fn get(&self, _key: &str, _params: Option<&P>) -> Result<Loaded<String>, LayerError> {
        self.fail()
    }

    async fn set(&self, _key: &str, _value: Option<String>) -> Result<(), LayerError> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> Result<(), LayerError> {
        self.fail()
    }

    async fn clear(&self) -> Result<(), LayerError> {
        self.fail()
    }
}

/// A cache backed by a plain map, open for inspection.
#[derive(Debug, Default)]
pub struct DummyCache {
    name: String,
    values: Mutex<HashMap<String, Option<String>>>,
}

impl DummyCache {
    pub fn new() -> Self {
        Self::named("Dummy cache")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Mutex::default(),
        }
    }

    pub fn with_value(self, key: &str, value: Option<&str>) -> Self {
        self.values
            .lock()
            .insert(key.to_owned(), value.map(ToOwned::to_owned));
        self
    }

    /// What is stored for `key`. The outer `None` means nothing is stored.
    pub fn stored(&self, key: &str) -> Option<Option<String>> {
        self.values.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

#[async_trait]
impl<P: Send + Sync + 'static> DataSource<String, P> for DummyCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_cache(&self) -> bool {
        true
    }

    async fn get(&self, key: &str, _params: Option<&P>) -> Result<Loaded<String>, LayerError> {
        Ok(self
            .stored(key)
            .map(Loaded::from_option)
            .unwrap_or(Loaded::Absent))
    }

    async fn set(&self, key: &str, value: Option<String>) -> Result<(), LayerError> {
        self.values.lock().insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), LayerError> {
        self.values.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), LayerError> {
        self.values.lock().clear();
        Ok(())
    }
}

/// Parameters decorating the values of [`DummyLoaderWithParams`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummyLoaderParams {
    pub prefix: String,
    pub suffix: String,
}

impl DummyLoaderParams {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }
}

/// An origin wrapping its value into the prefix and suffix passed as params.
#[derive(Debug)]
pub struct DummyLoaderWithParams {
    value: String,
}

impl DummyLoaderWithParams {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[async_trait]
impl DataSource<String, DummyLoaderParams> for DummyLoaderWithParams {
    fn name(&self) -> &str {
        "Dummy loader with params"
    }

    async fn get(
        &self,
        _key: &str,
        params: Option<&DummyLoaderParams>,
    ) -> Result<Loaded<String>, LayerError> {
        let Some(params) = params else {
            return Err(LayerError::origin("Params were not passed"));
        };
        Ok(Loaded::Present(format!(
            "{}{}{}",
            params.prefix, self.value, params.suffix
        )))
    }
}
