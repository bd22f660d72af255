//! Bounded in-process layers.
//!
//! Size bounds and eviction are delegated to [`moka`]. Expiration is tracked per entry with an
//! explicit deadline instead, because the loaders need to know how much lifetime an entry has
//! left to decide about refreshing it ahead of time.
use std::time::Duration;

use async_trait::async_trait;
use moka::ops::compute::Op;
use moka::sync::Cache;
use tokio::time::Instant;

use crate::config::{InMemoryCacheConfig, InMemoryGroupCacheConfig};
use crate::data_source::{DataSource, GroupDataSource};
use crate::error::LayerError;
use crate::loaded::Loaded;

#[derive(Clone, Debug)]
struct InMemoryItem<T> {
    deadline: Instant,
    /// `None` is a negative entry.
    value: Option<T>,
}

/// Stand-in deadline for ttls too large to be represented as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

impl<T: Clone> InMemoryItem<T> {
    fn new(value: Option<T>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            deadline: now.checked_add(ttl).unwrap_or(now + FAR_FUTURE),
            value,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.deadline <= now
    }
}

/// An entry found in memory that has not expired yet.
#[derive(Clone, Debug)]
pub struct Fresh<T> {
    pub value: Option<T>,
    pub expires_at: Instant,
    /// Less than the configured refresh threshold of lifetime is left.
    pub needs_refresh: bool,
}

impl<T> Fresh<T> {
    pub fn into_loaded(self) -> Loaded<T> {
        Loaded::from_option(self.value)
    }
}

/// Drops the entry at `key` if it is still expired at `now`.
///
/// The entry is re-checked under the entry lock, so a value stored since it was read survives.
fn remove_if_expired<T>(entries: &Cache<String, InMemoryItem<T>>, key: &str, now: Instant)
where
    T: Clone + Send + Sync + 'static,
{
    entries
        .entry_by_ref(key)
        .and_compute_with(|entry| match entry {
            Some(entry) if entry.value().is_expired(now) => Op::Remove,
            _ => Op::Nop,
        });
}

fn needs_refresh(deadline: Instant, now: Instant, threshold: Option<Duration>) -> bool {
    threshold.is_some_and(|threshold| deadline.saturating_duration_since(now) < threshold)
}

/// A size-bounded in-memory key/value layer with per-entry expiration.
#[derive(Clone)]
pub struct InMemoryCache<T> {
    name: String,
    config: InMemoryCacheConfig,
    cache: Cache<String, InMemoryItem<T>>,
}

impl<T> std::fmt::Debug for InMemoryCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCache")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

impl<T> InMemoryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: InMemoryCacheConfig) -> Self {
        let cache = Cache::builder().max_capacity(config.max_items).build();
        Self {
            name: "in-memory".into(),
            config,
            cache,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(&self) -> &InMemoryCacheConfig {
        &self.config
    }

    /// Looks up a non-expired entry, dropping it if it has expired.
    pub fn lookup(&self, key: &str) -> Option<Fresh<T>> {
        let item = self.cache.get(key)?;
        let now = Instant::now();
        if item.is_expired(now) {
            remove_if_expired(&self.cache, key, now);
            return None;
        }
        Some(Fresh {
            needs_refresh: needs_refresh(item.deadline, now, self.config.ttl_left_before_refresh),
            expires_at: item.deadline,
            value: item.value,
        })
    }

    pub fn get(&self, key: &str) -> Loaded<T> {
        self.lookup(key)
            .map(Fresh::into_loaded)
            .unwrap_or(Loaded::Absent)
    }

    /// Stores a value, or a negative entry for `None`, expiring after the configured ttl.
    pub fn set(&self, key: &str, value: Option<T>) {
        self.cache
            .insert(key.to_owned(), InMemoryItem::new(value, self.config.ttl));
    }

    pub fn delete(&self, key: &str) {
        self.cache.invalidate(key);
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    pub fn expiration_time(&self, key: &str) -> Option<Instant> {
        self.lookup(key).map(|fresh| fresh.expires_at)
    }
}

#[async_trait]
impl<T, P> DataSource<T, P> for InMemoryCache<T>
where
    T: Clone + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn is_cache(&self) -> bool {
        true
    }

    async fn get(&self, key: &str, _params: Option<&P>) -> Result<Loaded<T>, LayerError> {
        Ok(InMemoryCache::get(self, key))
    }

    async fn set(&self, key: &str, value: Option<T>) -> Result<(), LayerError> {
        InMemoryCache::set(self, key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), LayerError> {
        InMemoryCache::delete(self, key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), LayerError> {
        InMemoryCache::clear(self);
        Ok(())
    }
}

/// A size-bounded in-memory layer partitioned into groups.
///
/// Both the number of groups and the number of entries within each group are bounded.
#[derive(Clone)]
pub struct InMemoryGroupCache<T> {
    name: String,
    config: InMemoryGroupCacheConfig,
    groups: Cache<String, Cache<String, InMemoryItem<T>>>,
}

impl<T> std::fmt::Debug for InMemoryGroupCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryGroupCache")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

impl<T> InMemoryGroupCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: InMemoryGroupCacheConfig) -> Self {
        let groups = Cache::builder().max_capacity(config.max_groups).build();
        Self {
            name: "in-memory-group".into(),
            config,
            groups,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(&self) -> &InMemoryGroupCacheConfig {
        &self.config
    }

    pub fn lookup(&self, key: &str, group: &str) -> Option<Fresh<T>> {
        let entries = self.groups.get(group)?;
        let item = entries.get(key)?;
        let now = Instant::now();
        if item.is_expired(now) {
            remove_if_expired(&entries, key, now);
            return None;
        }
        Some(Fresh {
            needs_refresh: needs_refresh(item.deadline, now, self.config.ttl_left_before_refresh),
            expires_at: item.deadline,
            value: item.value,
        })
    }

    pub fn get_from_group(&self, key: &str, group: &str) -> Loaded<T> {
        self.lookup(key, group)
            .map(Fresh::into_loaded)
            .unwrap_or(Loaded::Absent)
    }

    pub fn set_for_group(&self, key: &str, value: Option<T>, group: &str) {
        let max_items = self.config.max_items_per_group;
        let entries = self
            .groups
            .get_with(group.to_owned(), || Cache::builder().max_capacity(max_items).build());
        entries.insert(key.to_owned(), InMemoryItem::new(value, self.config.ttl));
    }

    pub fn delete_from_group(&self, key: &str, group: &str) {
        if let Some(entries) = self.groups.get(group) {
            entries.invalidate(key);
        }
    }

    pub fn delete_group(&self, group: &str) {
        self.groups.invalidate(group);
    }

    pub fn clear(&self) {
        self.groups.invalidate_all();
    }

    pub fn expiration_time_from_group(&self, key: &str, group: &str) -> Option<Instant> {
        self.lookup(key, group).map(|fresh| fresh.expires_at)
    }
}

#[async_trait]
impl<T, P> GroupDataSource<T, P> for InMemoryGroupCache<T>
where
    T: Clone + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn is_cache(&self) -> bool {
        true
    }

    async fn get_from_group(
        &self,
        key: &str,
        group: &str,
        _params: Option<&P>,
    ) -> Result<Loaded<T>, LayerError> {
        Ok(InMemoryGroupCache::get_from_group(self, key, group))
    }

    async fn set_for_group(
        &self,
        key: &str,
        value: Option<T>,
        group: &str,
    ) -> Result<(), LayerError> {
        InMemoryGroupCache::set_for_group(self, key, value, group);
        Ok(())
    }

    async fn delete_from_group(&self, key: &str, group: &str) -> Result<(), LayerError> {
        InMemoryGroupCache::delete_from_group(self, key, group);
        Ok(())
    }

    async fn delete_group(&self, group: &str) -> Result<(), LayerError> {
        InMemoryGroupCache::delete_group(self, group);
        Ok(())
    }

    async fn clear(&self) -> Result<(), LayerError> {
        InMemoryGroupCache::clear(self);
        Ok(())
    }

    async fn get_expiration_time_from_group(
        &self,
        key: &str,
        group: &str,
    ) -> Result<Option<Instant>, LayerError> {
        Ok(self.expiration_time_from_group(key, group))
    }
}
