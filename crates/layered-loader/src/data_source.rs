//! The contracts of the layers a loader resolves values through.
use std::fmt;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::LayerError;
use crate::loaded::Loaded;

/// Anything that can answer a `get` for a key.
///
/// A data source declaring itself a cache through [`is_cache`](Self::is_cache) is backfilled
/// with values resolved by later layers. Origins are only ever read from.
#[async_trait]
pub trait DataSource<T, P = ()>: Send + Sync
where
    T: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn name(&self) -> &str;

    fn is_cache(&self) -> bool {
        false
    }

    async fn get(&self, key: &str, params: Option<&P>) -> Result<Loaded<T>, LayerError>;

    /// Stores a value. `None` stores a negative entry.
    async fn set(&self, _key: &str, _value: Option<T>) -> Result<(), LayerError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), LayerError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), LayerError> {
        Ok(())
    }
}

/// A data source whose keys live inside groups that can be invalidated together.
#[async_trait]
pub trait GroupDataSource<T, P = ()>: Send + Sync
where
    T: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn name(&self) -> &str;

    fn is_cache(&self) -> bool {
        false
    }

    async fn get_from_group(
        &self,
        key: &str,
        group: &str,
        params: Option<&P>,
    ) -> Result<Loaded<T>, LayerError>;

    async fn set_for_group(
        &self,
        _key: &str,
        _value: Option<T>,
        _group: &str,
    ) -> Result<(), LayerError> {
        Ok(())
    }

    async fn delete_from_group(&self, _key: &str, _group: &str) -> Result<(), LayerError> {
        Ok(())
    }

    async fn delete_group(&self, _group: &str) -> Result<(), LayerError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), LayerError> {
        Ok(())
    }

    /// The absolute time the entry for `key` in `group` expires at, if it exists and expires.
    async fn get_expiration_time_from_group(
        &self,
        _key: &str,
        _group: &str,
    ) -> Result<Option<Instant>, LayerError> {
        Ok(None)
    }
}

/// The coalescing key of a grouped resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub key: String,
    pub group: String,
}

impl GroupKey {
    pub fn new(key: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.group)
    }
}
