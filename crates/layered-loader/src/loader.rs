use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::LoaderConfig;
use crate::data_source::DataSource;
use crate::error::{LayerOperation, LoaderError};
use crate::load_operation::LoadOperation;
use crate::loaded::Loaded;
use crate::memory::InMemoryCache;
use crate::utils::{CallOnDrop, spawn_detached, with_timeout};

type SharedSource<T, P> = Arc<dyn DataSource<T, P>>;

/// Resolves keys through an optional in-memory layer, an optional async cache and any number
/// of data sources, in that order.
///
/// Entries read from memory with less than the configured threshold of lifetime left are
/// refreshed in the background while the current value is still served.
///
/// Cloning is cheap and clones share all state.
pub struct Loader<T, P = ()>
where
    T: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    inner: Arc<LoaderInner<T, P>>,
}

struct LoaderInner<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    in_memory: Option<InMemoryCache<T>>,
    async_cache: Option<SharedSource<T, P>>,
    operation: LoadOperation<SharedSource<T, P>>,
    /// Keys with a background refresh in flight.
    refreshes: Mutex<HashSet<String>>,
}

impl<T, P> Clone for Loader<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, P> fmt::Debug for Loader<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("in_memory", &self.inner.in_memory)
            .field("operation", &self.inner.operation)
            .finish()
    }
}

impl<T, P> Loader<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    pub fn new(config: LoaderConfig<T, P>) -> Result<Self, LoaderError> {
        config.validate()?;
        let LoaderConfig {
            name,
            in_memory,
            async_cache,
            data_sources,
            options,
            reporter,
        } = config;

        let in_memory = in_memory.map(InMemoryCache::new);
        let layers = async_cache.iter().cloned().chain(data_sources).collect();
        let operation = LoadOperation::new(name, layers, options, reporter);

        Ok(Self {
            inner: Arc::new(LoaderInner {
                in_memory,
                async_cache,
                operation,
                refreshes: Mutex::new(HashSet::new()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        self.inner.operation.name()
    }

    pub fn in_memory_cache(&self) -> Option<&InMemoryCache<T>> {
        self.inner.in_memory.as_ref()
    }

    /// When the in-memory entry for `key` expires.
    pub fn expiration_time(&self, key: &str) -> Option<Instant> {
        self.inner.in_memory.as_ref()?.expiration_time(key)
    }

    pub async fn get(&self, key: &str) -> Result<Loaded<T>, LoaderError> {
        self.get_with_params(key, None).await
    }

    /// Resolves `key`, passing `params` unchanged to every data source.
    ///
    /// Params are not part of the cache key.
    pub async fn get_with_params(
        &self,
        key: &str,
        params: Option<P>,
    ) -> Result<Loaded<T>, LoaderError> {
        metric!(counter("loader.access") += 1, "loader" => self.name());
        if let Some(loaded) = self.lookup_in_memory(key, params.as_ref()) {
            return Ok(loaded);
        }
        self.get_async_only_with_params(key, params).await
    }

    /// Only looks at the in-memory layer. Never waits, but may schedule a background refresh,
    /// so it has to be called within a Tokio runtime.
    pub fn get_in_memory_only(&self, key: &str) -> Loaded<T> {
        self.lookup_in_memory(key, None).unwrap_or(Loaded::Absent)
    }

    /// Resolves through the async cache and data sources, skipping the in-memory layer but
    /// updating it with the result.
    pub async fn get_async_only(&self, key: &str) -> Result<Loaded<T>, LoaderError> {
        self.get_async_only_with_params(key, None).await
    }

    pub async fn get_async_only_with_params(
        &self,
        key: &str,
        params: Option<P>,
    ) -> Result<Loaded<T>, LoaderError> {
        let loaded = self.inner.operation.load(key.to_owned(), params).await?;
        self.store_in_memory(key, &loaded);
        Ok(loaded)
    }

    /// Drops `key` from the in-memory layer and the async cache.
    ///
    /// Failures of the async cache are reported, never returned.
    pub async fn invalidate_cache_for(&self, key: &str) {
        if let Some(in_memory) = &self.inner.in_memory {
            in_memory.delete(key);
        }
        if let Some(async_cache) = &self.inner.async_cache {
            let timeout = self.inner.operation.options().layer_timeout;
            if let Err(error) = with_timeout(timeout, async_cache.delete(key)).await {
                self.inner.operation.report(
                    async_cache.name(),
                    LayerOperation::Delete,
                    Some(key),
                    None,
                    &error,
                );
            }
        }
    }

    /// Empties the in-memory layer and clears the async cache.
    pub async fn invalidate_cache(&self) {
        if let Some(in_memory) = &self.inner.in_memory {
            in_memory.clear();
        }
        if let Some(async_cache) = &self.inner.async_cache {
            let timeout = self.inner.operation.options().layer_timeout;
            if let Err(error) = with_timeout(timeout, async_cache.clear()).await {
                self.inner
                    .operation
                    .report(async_cache.name(), LayerOperation::Clear, None, None, &error);
            }
        }
    }

    fn lookup_in_memory(&self, key: &str, params: Option<&P>) -> Option<Loaded<T>> {
        let fresh = self.inner.in_memory.as_ref()?.lookup(key)?;
        metric!(counter("loader.memory.hit") += 1, "loader" => self.name());
        if fresh.needs_refresh {
            self.spawn_refresh(key, params.cloned());
        }
        Some(fresh.into_loaded())
    }

    fn store_in_memory(&self, key: &str, loaded: &Loaded<T>) {
        let Some(in_memory) = &self.inner.in_memory else {
            return;
        };
        if let Some(value) = loaded.clone().into_option() {
            in_memory.set(key, value);
        }
    }

    /// Re-resolves `key` through the async layers in the background, at most once at a time.
    fn spawn_refresh(&self, key: &str, params: Option<P>) {
        let mut refreshes = self.inner.refreshes.lock();
        if refreshes.contains(key) {
            return;
        }

        let done_token = {
            let key = key.to_owned();
            let this = self.clone();
            CallOnDrop::new(move || {
                this.inner.refreshes.lock().remove(&key);
            })
        };

        refreshes.insert(key.to_owned());
        drop(refreshes);

        metric!(counter("loader.refresh") += 1, "loader" => self.name());
        tracing::trace!(loader = self.name(), key, "Spawning background refresh");

        let this = self.clone();
        let key = key.to_owned();
        spawn_detached(async move {
            let _done_token = done_token; // move into the future

            match this.inner.operation.load(key.clone(), params).await {
                Ok(loaded) => this.store_in_memory(&key, &loaded),
                Err(error) => tracing::debug!(
                    error = &error as &dyn std::error::Error,
                    loader = this.name(),
                    key = key.as_str(),
                    "Background refresh failed"
                ),
            }
        });
    }
}
