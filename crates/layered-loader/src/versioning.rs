//! Group invalidation through version tokens.
//!
//! Every group has a version token stored under
//! `prefix · separator · "group-index" · separator · group`. Entries written for a group are
//! stored under `prefix · separator · group · separator · version · separator · key`, embedding
//! the token that was current at write time. Bumping the token is all it takes to invalidate a
//! group: previously written entries are never looked up again and are left to expire in the
//! store.
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::config::{InMemoryCacheConfig, LoaderConfig, VersionedGroupCacheConfig};
use crate::data_source::{DataSource, GroupDataSource};
use crate::error::{LayerError, LoaderError};
use crate::loaded::Loaded;
use crate::loader::Loader;
use crate::utils::with_timeout;

/// Name of the namespace version tokens are stored in.
pub const GROUP_INDEX_KEY: &str = "group-index";

/// The distributed store backing a [`VersionedGroupCache`].
///
/// Besides plain reads and writes of physical keys, a store has to offer the two atomic
/// version primitives. Implementations must not emulate them with a read followed by a
/// write, as two concurrent writers could then initialize different tokens.
#[async_trait]
pub trait VersionStore<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    fn name(&self) -> &str;

    async fn read(&self, key: &str) -> Result<Loaded<T>, LayerError>;

    /// Writes a value, or a negative entry for `None`, optionally expiring after `ttl`.
    async fn write(&self, key: &str, value: Option<T>, ttl: Option<Duration>)
    -> Result<(), LayerError>;

    async fn remove(&self, key: &str) -> Result<(), LayerError>;

    /// Lifetime left of `key`. `None` if it does not exist or never expires.
    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, LayerError>;

    /// Removes every key starting with `prefix`.
    async fn clear_prefix(&self, prefix: &str) -> Result<(), LayerError>;

    /// The version token stored at `group_key`, without initializing it.
    async fn current_version(&self, group_key: &str) -> Result<Option<String>, LayerError>;

    /// Atomically reads the token at `group_key`, initializing it with a lease of `ttl` if
    /// it does not exist yet.
    async fn get_or_initialize_version(
        &self,
        group_key: &str,
        ttl: Option<Duration>,
    ) -> Result<String, LayerError>;

    /// Atomically changes the token at `group_key` and renews its lease of `ttl`.
    async fn increment_version(
        &self,
        group_key: &str,
        ttl: Option<Duration>,
    ) -> Result<String, LayerError>;
}

/// Reads version tokens for the token cache of a [`VersionedGroupCache`].
struct VersionSource<T> {
    name: String,
    store: Arc<dyn VersionStore<T>>,
}

#[async_trait]
impl<T> DataSource<String> for VersionSource<T>
where
    T: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str, _params: Option<&()>) -> Result<Loaded<String>, LayerError> {
        // A group without token has nothing stored yet; that is not cached.
        let version = self.store.current_version(key).await?;
        Ok(version.map(Loaded::Present).unwrap_or(Loaded::Absent))
    }
}

/// A [`GroupDataSource`] cache layer over a [`VersionStore`], with O(1) group invalidation.
///
/// Version tokens are looked up through a [`Loader`], kept in memory for
/// [`VersionedGroupCacheConfig::version_cache_ttl`] when configured.
pub struct VersionedGroupCache<T, P = ()>
where
    T: Send + Sync + 'static,
{
    name: String,
    config: VersionedGroupCacheConfig,
    store: Arc<dyn VersionStore<T>>,
    versions: Loader<String>,
    _params: PhantomData<fn(&P)>,
}

impl<T, P> fmt::Debug for VersionedGroupCache<T, P>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedGroupCache")
            .field("name", &self.name)
            .field("store", &self.store.name())
            .field("config", &self.config)
            .finish()
    }
}

impl<T, P> VersionedGroupCache<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    pub fn new(
        store: Arc<dyn VersionStore<T>>,
        config: VersionedGroupCacheConfig,
    ) -> Result<Self, LoaderError> {
        config.validate()?;
        let name = format!("versioned-{}", store.name());

        let source = VersionSource {
            name: format!("{}.versions", store.name()),
            store: Arc::clone(&store),
        };
        let mut versions = LoaderConfig::new()
            .with_name(format!("{name}.versions"))
            .with_data_source(Arc::new(source));
        if let Some(timeout) = config.timeout {
            versions = versions.with_layer_timeout(timeout);
        }
        if let Some(ttl) = config.version_cache_ttl {
            versions = versions.with_in_memory(InMemoryCacheConfig {
                ttl,
                ttl_left_before_refresh: config.ttl_left_before_refresh,
                ..Default::default()
            });
        }
        let versions = Loader::new(versions)?;

        Ok(Self {
            name,
            config,
            store,
            versions,
            _params: PhantomData,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(&self) -> &VersionedGroupCacheConfig {
        &self.config
    }

    /// The physical key an entry of `group` is stored under for `version`.
    pub fn resolve_key_with_group(&self, key: &str, group: &str, version: &str) -> String {
        let VersionedGroupCacheConfig {
            prefix, separator, ..
        } = &self.config;
        format!("{prefix}{separator}{group}{separator}{version}{separator}{key}")
    }

    /// The physical key the version token of `group` is stored under.
    pub fn resolve_group_index_key(&self, group: &str) -> String {
        let VersionedGroupCacheConfig {
            prefix, separator, ..
        } = &self.config;
        format!("{prefix}{separator}{GROUP_INDEX_KEY}{separator}{group}")
    }

    /// The version token of `group`, possibly served from memory.
    async fn cached_version(&self, group: &str) -> Result<Option<String>, LayerError> {
        let index_key = self.resolve_group_index_key(group);
        match self.versions.get(&index_key).await {
            Ok(version) => Ok(version.into_value()),
            Err(error) => Err(LayerError::unavailable(error)),
        }
    }

    async fn stored_version(&self, group: &str) -> Result<Option<String>, LayerError> {
        let index_key = self.resolve_group_index_key(group);
        with_timeout(self.config.timeout, self.store.current_version(&index_key)).await
    }

    pub async fn get_from_group(&self, key: &str, group: &str) -> Result<Loaded<T>, LayerError> {
        let Some(version) = self.cached_version(group).await? else {
            return Ok(Loaded::Absent);
        };
        let physical_key = self.resolve_key_with_group(key, group, &version);
        with_timeout(self.config.timeout, self.store.read(&physical_key)).await
    }

    pub async fn set_for_group(
        &self,
        key: &str,
        value: Option<T>,
        group: &str,
    ) -> Result<(), LayerError> {
        let index_key = self.resolve_group_index_key(group);
        let version = with_timeout(
            self.config.timeout,
            self.store
                .get_or_initialize_version(&index_key, self.config.group_ttl),
        )
        .await?;

        let physical_key = self.resolve_key_with_group(key, group, &version);
        with_timeout(
            self.config.timeout,
            self.store.write(&physical_key, value, self.config.ttl),
        )
        .await?;

        if self.config.ttl_left_before_refresh.is_some() {
            self.versions.invalidate_cache_for(&index_key).await;
        }
        Ok(())
    }

    /// Invalidates every entry of `group` by bumping its version token.
    pub async fn delete_group(&self, group: &str) -> Result<(), LayerError> {
        let index_key = self.resolve_group_index_key(group);
        let version = with_timeout(
            self.config.timeout,
            self.store
                .increment_version(&index_key, self.config.group_ttl),
        )
        .await?;
        self.versions.invalidate_cache_for(&index_key).await;

        metric!(counter("group.version.bump") += 1, "cache" => self.name.as_str());
        tracing::debug!(
            cache = self.name.as_str(),
            group,
            version = version.as_str(),
            "Bumped group version"
        );
        Ok(())
    }

    /// Deletes a single entry of the current version of `group`.
    pub async fn delete_from_group(&self, key: &str, group: &str) -> Result<(), LayerError> {
        let Some(version) = self.stored_version(group).await? else {
            return Ok(());
        };
        let physical_key = self.resolve_key_with_group(key, group, &version);
        with_timeout(self.config.timeout, self.store.remove(&physical_key)).await
    }

    pub async fn get_expiration_time_from_group(
        &self,
        key: &str,
        group: &str,
    ) -> Result<Option<Instant>, LayerError> {
        let Some(version) = self.stored_version(group).await? else {
            return Ok(None);
        };
        let physical_key = self.resolve_key_with_group(key, group, &version);
        let remaining =
            with_timeout(self.config.timeout, self.store.remaining_ttl(&physical_key)).await?;
        Ok(remaining.map(|remaining| Instant::now() + remaining))
    }

    /// Removes everything stored under the prefix, version tokens included.
    pub async fn clear(&self) -> Result<(), LayerError> {
        let prefix = format!("{}{}", self.config.prefix, self.config.separator);
        with_timeout(self.config.timeout, self.store.clear_prefix(&prefix)).await?;
        self.versions.invalidate_cache().await;
        Ok(())
    }
}

#[async_trait]
impl<T, P> GroupDataSource<T, P> for VersionedGroupCache<T, P>
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
        VersionedGroupCache::get_from_group(self, key, group).await
    }

    async fn set_for_group(
        &self,
        key: &str,
        value: Option<T>,
        group: &str,
    ) -> Result<(), LayerError> {
        VersionedGroupCache::set_for_group(self, key, value, group).await
    }

    async fn delete_from_group(&self, key: &str, group: &str) -> Result<(), LayerError> {
        VersionedGroupCache::delete_from_group(self, key, group).await
    }

    async fn delete_group(&self, group: &str) -> Result<(), LayerError> {
        VersionedGroupCache::delete_group(self, group).await
    }

    async fn clear(&self) -> Result<(), LayerError> {
        VersionedGroupCache::clear(self).await
    }

    async fn get_expiration_time_from_group(
        &self,
        key: &str,
        group: &str,
    ) -> Result<Option<Instant>, LayerError> {
        VersionedGroupCache::get_expiration_time_from_group(self, key, group).await
    }
}
