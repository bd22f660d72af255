use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use layered_loader::utils::with_timeout;
use layered_loader::{DataSource, LayerError, Loaded};
use redis::RedisError;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::{decode, encode};
use crate::commands;
use crate::config::RedisCacheConfig;

/// A Redis backed cache layer.
///
/// Every key is stored under `prefix · separator · key`. [`clear`](DataSource::clear) removes
/// everything under the prefix.
pub struct RedisCache<T> {
    name: String,
    config: RedisCacheConfig,
    connection: ConnectionManager,
    _value: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for RedisCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

impl<T> RedisCache<T> {
    pub fn new(connection: ConnectionManager, config: RedisCacheConfig) -> Self {
        Self {
            name: "redis".into(),
            config,
            connection,
            _value: PhantomData,
        }
    }

    /// Connects to [`RedisCacheConfig::url`].
    pub async fn connect(config: RedisCacheConfig) -> Result<Self, RedisError> {
        let connection = crate::connect(&config.url).await?;
        Ok(Self::new(connection, config))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(&self) -> &RedisCacheConfig {
        &self.config
    }
}

#[async_trait]
impl<T, P> DataSource<T, P> for RedisCache<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn is_cache(&self) -> bool {
        true
    }

    async fn get(&self, key: &str, _params: Option<&P>) -> Result<Loaded<T>, LayerError> {
        let key = self.config.resolve_key(key);
        let mut connection = self.connection.clone();
        let stored = with_timeout(self.config.timeout, commands::get(&mut connection, &key)).await?;
        decode(stored)
    }

    async fn set(&self, key: &str, value: Option<T>) -> Result<(), LayerError> {
        let key = self.config.resolve_key(key);
        let encoded = encode(value.as_ref())?;
        let mut connection = self.connection.clone();
        with_timeout(
            self.config.timeout,
            commands::set(&mut connection, &key, &encoded, self.config.ttl),
        )
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), LayerError> {
        let key = self.config.resolve_key(key);
        let mut connection = self.connection.clone();
        with_timeout(self.config.timeout, commands::del(&mut connection, &key)).await
    }

    async fn clear(&self) -> Result<(), LayerError> {
        let pattern = self.config.prefix_pattern();
        let mut connection = self.connection.clone();
        let deleted = with_timeout(
            self.config.timeout,
            commands::delete_matching(&mut connection, &pattern),
        )
        .await?;
        tracing::debug!(cache = self.name.as_str(), deleted, "Cleared redis cache");
        Ok(())
    }
}
