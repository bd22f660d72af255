use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::data_source::{DataSource, GroupDataSource};
use crate::error::{ErrorReporter, LoaderError, default_reporter};

/// Configuration of an in-memory layer.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InMemoryCacheConfig {
    /// How long an entry is served after it was stored.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// When an entry is read with less than this much of its ttl left, a background refresh
    /// is scheduled while the current value is still returned.
    #[serde(with = "humantime_serde")]
    pub ttl_left_before_refresh: Option<Duration>,

    /// Maximum number of entries held.
    pub max_items: u64,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            ttl_left_before_refresh: None,
            max_items: 500,
        }
    }
}

impl InMemoryCacheConfig {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Default::default()
        }
    }

    pub fn with_refresh(mut self, ttl_left_before_refresh: Duration) -> Self {
        self.ttl_left_before_refresh = Some(ttl_left_before_refresh);
        self
    }

    pub fn with_max_items(mut self, max_items: u64) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn validate(&self) -> Result<(), LoaderError> {
        validate_ttl(self.ttl, self.ttl_left_before_refresh)?;
        if self.max_items == 0 {
            return Err(LoaderError::configuration("max_items must be positive"));
        }
        Ok(())
    }
}

/// Configuration of an in-memory group layer.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InMemoryGroupCacheConfig {
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    #[serde(with = "humantime_serde")]
    pub ttl_left_before_refresh: Option<Duration>,

    /// Maximum number of groups held.
    pub max_groups: u64,

    /// Maximum number of entries held per group.
    pub max_items_per_group: u64,
}

impl Default for InMemoryGroupCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            ttl_left_before_refresh: None,
            max_groups: 1000,
            max_items_per_group: 500,
        }
    }
}

impl InMemoryGroupCacheConfig {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Default::default()
        }
    }

    pub fn with_refresh(mut self, ttl_left_before_refresh: Duration) -> Self {
        self.ttl_left_before_refresh = Some(ttl_left_before_refresh);
        self
    }

    pub fn validate(&self) -> Result<(), LoaderError> {
        validate_ttl(self.ttl, self.ttl_left_before_refresh)?;
        if self.max_groups == 0 || self.max_items_per_group == 0 {
            return Err(LoaderError::configuration(
                "max_groups and max_items_per_group must be positive",
            ));
        }
        Ok(())
    }
}

fn validate_ttl(ttl: Duration, refresh: Option<Duration>) -> Result<(), LoaderError> {
    if ttl.is_zero() {
        return Err(LoaderError::configuration("ttl must be positive"));
    }
    if let Some(refresh) = refresh {
        if refresh >= ttl {
            return Err(LoaderError::configuration(format!(
                "ttl_left_before_refresh ({refresh:?}) must be smaller than ttl ({ttl:?})"
            )));
        }
    }
    Ok(())
}

/// Configuration of a [`VersionedGroupCache`](crate::VersionedGroupCache).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VersionedGroupCacheConfig {
    /// Prepended to every physical key.
    pub prefix: String,
    pub separator: String,

    /// Lifetime of stored entries. Entries never expire when unset.
    #[serde(with = "humantime_serde")]
    pub ttl: Option<Duration>,

    /// Lifetime of a group's version token, renewed whenever the group is invalidated.
    #[serde(with = "humantime_serde")]
    pub group_ttl: Option<Duration>,

    /// How long version tokens are kept in memory. Tokens are read from the store on
    /// every access when unset.
    #[serde(with = "humantime_serde")]
    pub version_cache_ttl: Option<Duration>,

    /// Refresh threshold for in-memory version tokens.
    #[serde(with = "humantime_serde")]
    pub ttl_left_before_refresh: Option<Duration>,

    /// Timeout of each call into the store.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for VersionedGroupCacheConfig {
    fn default() -> Self {
        Self {
            prefix: "layered-loader".into(),
            separator: ":".into(),
            ttl: None,
            group_ttl: None,
            version_cache_ttl: None,
            ttl_left_before_refresh: None,
            timeout: None,
        }
    }
}

impl VersionedGroupCacheConfig {
    pub fn validate(&self) -> Result<(), LoaderError> {
        match (self.version_cache_ttl, self.ttl_left_before_refresh) {
            (Some(_), None) => Err(LoaderError::configuration(
                "version_cache_ttl cannot be specified if ttl_left_before_refresh is not",
            )),
            (Some(ttl), refresh) => validate_ttl(ttl, refresh),
            (None, _) => Ok(()),
        }
    }
}

/// Behavior of the resolution through the layer chain.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoadOptions {
    /// Fail with [`LoaderError::NotFound`] instead of returning an absent value.
    pub throw_if_unresolved: bool,

    /// Surface failures signalled by origins instead of treating them as misses.
    pub throw_if_load_error: bool,

    /// Timeout applied to every call into a layer.
    #[serde(with = "humantime_serde")]
    pub layer_timeout: Option<Duration>,
}

/// Everything a [`Loader`](crate::Loader) is built from.
pub struct LoaderConfig<T, P = ()>
where
    T: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    pub(crate) name: String,
    pub(crate) in_memory: Option<InMemoryCacheConfig>,
    pub(crate) async_cache: Option<Arc<dyn DataSource<T, P>>>,
    pub(crate) data_sources: Vec<Arc<dyn DataSource<T, P>>>,
    pub(crate) options: LoadOptions,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
}

impl<T, P> Default for LoaderConfig<T, P>
where
    T: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            name: "loader".into(),
            in_memory: None,
            async_cache: None,
            data_sources: Vec::new(),
            options: LoadOptions::default(),
            reporter: default_reporter(),
        }
    }
}

impl<T, P> LoaderConfig<T, P>
where
    T: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the loader in logs and metrics.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_in_memory(mut self, config: InMemoryCacheConfig) -> Self {
        self.in_memory = Some(config);
        self
    }

    /// The shared cache consulted after the in-memory layer. It must report
    /// [`DataSource::is_cache`] to be backfilled.
    pub fn with_async_cache(mut self, cache: Arc<dyn DataSource<T, P>>) -> Self {
        self.async_cache = Some(cache);
        self
    }

    /// Appends a data source. Sources are consulted in the order they were added.
    pub fn with_data_source(mut self, source: Arc<dyn DataSource<T, P>>) -> Self {
        self.data_sources.push(source);
        self
    }

    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn throw_if_unresolved(mut self, enabled: bool) -> Self {
        self.options.throw_if_unresolved = enabled;
        self
    }

    pub fn throw_if_load_error(mut self, enabled: bool) -> Self {
        self.options.throw_if_load_error = enabled;
        self
    }

    pub fn with_layer_timeout(mut self, timeout: Duration) -> Self {
        self.options.layer_timeout = Some(timeout);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), LoaderError> {
        if let Some(in_memory) = &self.in_memory {
            in_memory.validate()?;
        }
        Ok(())
    }
}

impl<T, P> fmt::Debug for LoaderConfig<T, P>
where
    T: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderConfig")
            .field("name", &self.name)
            .field("in_memory", &self.in_memory)
            .field("async_cache", &self.async_cache.as_ref().map(|c| c.name()))
            .field(
                "data_sources",
                &self.data_sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("options", &self.options)
            .finish()
    }
}

/// Everything a [`GroupLoader`](crate::GroupLoader) is built from.
pub struct GroupLoaderConfig<T, P = ()>
where
    T: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    pub(crate) name: String,
    pub(crate) in_memory: Option<InMemoryGroupCacheConfig>,
    pub(crate) async_cache: Option<Arc<dyn GroupDataSource<T, P>>>,
    pub(crate) data_sources: Vec<Arc<dyn GroupDataSource<T, P>>>,
    pub(crate) options: LoadOptions,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
}

impl<T, P> Default for GroupLoaderConfig<T, P>
where
    T: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            name: "group-loader".into(),
            in_memory: None,
            async_cache: None,
            data_sources: Vec::new(),
            options: LoadOptions::default(),
            reporter: default_reporter(),
        }
    }
}

impl<T, P> GroupLoaderConfig<T, P>
where
    T: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_in_memory(mut self, config: InMemoryGroupCacheConfig) -> Self {
        self.in_memory = Some(config);
        self
    }

    pub fn with_async_cache(mut self, cache: Arc<dyn GroupDataSource<T, P>>) -> Self {
        self.async_cache = Some(cache);
        self
    }

    pub fn with_data_source(mut self, source: Arc<dyn GroupDataSource<T, P>>) -> Self {
        self.data_sources.push(source);
        self
    }

    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn throw_if_unresolved(mut self, enabled: bool) -> Self {
        self.options.throw_if_unresolved = enabled;
        self
    }

    pub fn throw_if_load_error(mut self, enabled: bool) -> Self {
        self.options.throw_if_load_error = enabled;
        self
    }

    pub fn with_layer_timeout(mut self, timeout: Duration) -> Self {
        self.options.layer_timeout = Some(timeout);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), LoaderError> {
        if let Some(in_memory) = &self.in_memory {
            in_memory.validate()?;
        }
        Ok(())
    }
}
