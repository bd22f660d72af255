use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::GroupLoaderConfig;
use crate::data_source::{GroupDataSource, GroupKey};
use crate::error::{LayerOperation, LoaderError};
use crate::load_operation::LoadOperation;
use crate::loaded::Loaded;
use crate::memory::InMemoryGroupCache;
use crate::utils::{CallOnDrop, spawn_detached, with_timeout};

type SharedGroupSource<T, P> = Arc<dyn GroupDataSource<T, P>>;

/// The grouped counterpart of [`Loader`](crate::Loader).
///
/// Every key lives in a group, and a whole group can be invalidated at once. Resolutions are
/// coalesced per `(key, group)` pair.
pub struct GroupLoader<T, P = ()>
where
    T: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    inner: Arc<GroupLoaderInner<T, P>>,
}

struct GroupLoaderInner<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    in_memory: Option<InMemoryGroupCache<T>>,
    async_cache: Option<SharedGroupSource<T, P>>,
    operation: LoadOperation<SharedGroupSource<T, P>>,
    refreshes: Mutex<HashSet<GroupKey>>,
}

impl<T, P> Clone for GroupLoader<T, P>
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

impl<T, P> fmt::Debug for GroupLoader<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupLoader")
            .field("in_memory", &self.inner.in_memory)
            .field("operation", &self.inner.operation)
            .finish()
    }
}

impl<T, P> GroupLoader<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    pub fn new(config: GroupLoaderConfig<T, P>) -> Result<Self, LoaderError> {
        config.validate()?;
        let GroupLoaderConfig {
            name,
            in_memory,
            async_cache,
            data_sources,
            options,
            reporter,
        } = config;

        let in_memory = in_memory.map(InMemoryGroupCache::new);
        let layers = async_cache.iter().cloned().chain(data_sources).collect();
        let operation = LoadOperation::new(name, layers, options, reporter);

        Ok(Self {
            inner: Arc::new(GroupLoaderInner {
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

    pub fn in_memory_cache(&self) -> Option<&InMemoryGroupCache<T>> {
        self.inner.in_memory.as_ref()
    }

    pub fn expiration_time(&self, key: &str, group: &str) -> Option<Instant> {
        self.inner
            .in_memory
            .as_ref()?
            .expiration_time_from_group(key, group)
    }

    pub async fn get(&self, key: &str, group: &str) -> Result<Loaded<T>, LoaderError> {
        self.get_with_params(key, group, None).await
    }

    pub async fn get_with_params(
        &self,
        key: &str,
        group: &str,
        params: Option<P>,
    ) -> Result<Loaded<T>, LoaderError> {
        metric!(counter("loader.access") += 1, "loader" => self.name());
        let key = GroupKey::new(key, group);
        if let Some(loaded) = self.lookup_in_memory(&key, params.as_ref()) {
            return Ok(loaded);
        }
        self.load(key, params).await
    }

    /// Only looks at the in-memory layer. Must be called within a Tokio runtime.
    pub fn get_in_memory_only(&self, key: &str, group: &str) -> Loaded<T> {
        self.lookup_in_memory(&GroupKey::new(key, group), None)
            .unwrap_or(Loaded::Absent)
    }

    pub async fn get_async_only(&self, key: &str, group: &str) -> Result<Loaded<T>, LoaderError> {
        self.get_async_only_with_params(key, group, None).await
    }

    pub async fn get_async_only_with_params(
        &self,
        key: &str,
        group: &str,
        params: Option<P>,
    ) -> Result<Loaded<T>, LoaderError> {
        self.load(GroupKey::new(key, group), params).await
    }

    /// Drops a single entry of a group from the in-memory layer and the async cache.
    pub async fn invalidate_cache_for(&self, key: &str, group: &str) {
        if let Some(in_memory) = &self.inner.in_memory {
            in_memory.delete_from_group(key, group);
        }
        if let Some(async_cache) = &self.inner.async_cache {
            let timeout = self.inner.operation.options().layer_timeout;
            if let Err(error) = with_timeout(timeout, async_cache.delete_from_group(key, group)).await
            {
                self.inner.operation.report(
                    async_cache.name(),
                    LayerOperation::Delete,
                    Some(key),
                    Some(group),
                    &error,
                );
            }
        }
    }

    /// Drops a whole group from the in-memory layer and the async cache.
    pub async fn invalidate_cache_for_group(&self, group: &str) {
        if let Some(in_memory) = &self.inner.in_memory {
            in_memory.delete_group(group);
        }
        if let Some(async_cache) = &self.inner.async_cache {
            let timeout = self.inner.operation.options().layer_timeout;
            if let Err(error) = with_timeout(timeout, async_cache.delete_group(group)).await {
                self.inner.operation.report(
                    async_cache.name(),
                    LayerOperation::DeleteGroup,
                    None,
                    Some(group),
                    &error,
                );
            }
        }
    }

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

    async fn load(&self, key: GroupKey, params: Option<P>) -> Result<Loaded<T>, LoaderError> {
        let loaded = self.inner.operation.load(key.clone(), params).await?;
        self.store_in_memory(&key, &loaded);
        Ok(loaded)
    }

    fn lookup_in_memory(&self, key: &GroupKey, params: Option<&P>) -> Option<Loaded<T>> {
        let fresh = self.inner.in_memory.as_ref()?.lookup(&key.key, &key.group)?;
        metric!(counter("loader.memory.hit") += 1, "loader" => self.name());
        if fresh.needs_refresh {
            self.spawn_refresh(key, params.cloned());
        }
        Some(fresh.into_loaded())
    }

    fn store_in_memory(&self, key: &GroupKey, loaded: &Loaded<T>) {
        let Some(in_memory) = &self.inner.in_memory else {
            return;
        };
        if let Some(value) = loaded.clone().into_option() {
            in_memory.set_for_group(&key.key, value, &key.group);
        }
    }

    fn spawn_refresh(&self, key: &GroupKey, params: Option<P>) {
        let mut refreshes = self.inner.refreshes.lock();
        if refreshes.contains(key) {
            return;
        }

        let done_token = {
            let key = key.clone();
            let this = self.clone();
            CallOnDrop::new(move || {
                this.inner.refreshes.lock().remove(&key);
            })
        };

        refreshes.insert(key.clone());
        drop(refreshes);

        metric!(counter("loader.refresh") += 1, "loader" => self.name());
        tracing::trace!(loader = self.name(), key = %key, "Spawning background refresh");

        let this = self.clone();
        let key = key.clone();
        spawn_detached(async move {
            let _done_token = done_token;

            if let Err(error) = this.load(key.clone(), params).await {
                tracing::debug!(
                    error = &error as &dyn std::error::Error,
                    loader = this.name(),
                    key = %key,
                    "Background refresh failed"
                );
            }
        });
    }
}
