use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use layered_loader::{LayerError, Loaded, VersionStore};
use redis::Script;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::{decode, encode, unavailable};
use crate::commands::{self, millis};
use crate::config::escape_pattern;

/// Returns the version at `KEYS[1]`, initializing it to `0` if missing.
const GET_OR_SET_ZERO: &str = r#"
local version = redis.call('GET', KEYS[1])
if version then
  return version
end
redis.call('SET', KEYS[1], '0')
return '0'
"#;

/// Like [`GET_OR_SET_ZERO`], initializing with a lease of `ARGV[1]` milliseconds.
const GET_OR_SET_ZERO_WITH_TTL: &str = r#"
local version = redis.call('GET', KEYS[1])
if version then
  return version
end
redis.call('SET', KEYS[1], '0', 'PX', ARGV[1])
return '0'
"#;

/// The [`VersionStore`] of a [`VersionedGroupCache`](layered_loader::VersionedGroupCache)
/// backed by Redis.
///
/// Keys are used as given: the versioned cache already resolves them to physical keys.
/// Version initialization runs as a Lua script and version bumps as `INCR`, wrapped into
/// `MULTI` together with `PEXPIRE` when the token carries a lease.
pub struct RedisVersionStore<T> {
    connection: ConnectionManager,
    get_or_set_zero: Script,
    get_or_set_zero_with_ttl: Script,
    _value: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for RedisVersionStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisVersionStore").finish_non_exhaustive()
    }
}

impl<T> RedisVersionStore<T> {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            get_or_set_zero: Script::new(GET_OR_SET_ZERO),
            get_or_set_zero_with_ttl: Script::new(GET_OR_SET_ZERO_WITH_TTL),
            _value: PhantomData,
        }
    }
}

#[async_trait]
impl<T> VersionStore<T> for RedisVersionStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "redis"
    }

    async fn read(&self, key: &str) -> Result<Loaded<T>, LayerError> {
        let mut connection = self.connection.clone();
        decode(commands::get(&mut connection, key).await?)
    }

    async fn write(
        &self,
        key: &str,
        value: Option<T>,
        ttl: Option<Duration>,
    ) -> Result<(), LayerError> {
        let encoded = encode(value.as_ref())?;
        let mut connection = self.connection.clone();
        commands::set(&mut connection, key, &encoded, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<(), LayerError> {
        let mut connection = self.connection.clone();
        commands::del(&mut connection, key).await
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, LayerError> {
        let mut connection = self.connection.clone();
        commands::pttl(&mut connection, key).await
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<(), LayerError> {
        let mut connection = self.connection.clone();
        let pattern = format!("{}*", escape_pattern(prefix));
        let deleted = commands::delete_matching(&mut connection, &pattern).await?;
        tracing::debug!(prefix, deleted, "Cleared versioned keys");
        Ok(())
    }

    async fn current_version(&self, group_key: &str) -> Result<Option<String>, LayerError> {
        let mut connection = self.connection.clone();
        commands::get(&mut connection, group_key).await
    }

    async fn get_or_initialize_version(
        &self,
        group_key: &str,
        ttl: Option<Duration>,
    ) -> Result<String, LayerError> {
        let mut connection = self.connection.clone();
        let version: String = match ttl {
            Some(ttl) => {
                self.get_or_set_zero_with_ttl
                    .key(group_key)
                    .arg(millis(ttl))
                    .invoke_async(&mut connection)
                    .await
            }
            None => {
                self.get_or_set_zero
                    .key(group_key)
                    .invoke_async(&mut connection)
                    .await
            }
        }
        .map_err(unavailable)?;
        Ok(version)
    }

    async fn increment_version(
        &self,
        group_key: &str,
        ttl: Option<Duration>,
    ) -> Result<String, LayerError> {
        let mut connection = self.connection.clone();
        let version: i64 = match ttl {
            Some(ttl) => {
                let (version,): (i64,) = redis::pipe()
                    .atomic()
                    .cmd("INCR")
                    .arg(group_key)
                    .cmd("PEXPIRE")
                    .arg(group_key)
                    .arg(millis(ttl))
                    .ignore()
                    .query_async(&mut connection)
                    .await
                    .map_err(unavailable)?;
                version
            }
            None => redis::cmd("INCR")
                .arg(group_key)
                .query_async(&mut connection)
                .await
                .map_err(unavailable)?,
        };
        Ok(version.to_string())
    }
}
