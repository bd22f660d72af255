//! Redis backed layers for `layered-loader`.
//!
//! - [`RedisCache`] is a plain [`DataSource`](layered_loader::DataSource) cache layer.
//! - [`RedisVersionStore`] provides the atomic group version primitives for a
//!   [`VersionedGroupCache`](layered_loader::VersionedGroupCache).
//!
//! Values are stored as JSON. Negative entries are stored as `null`.

use redis::RedisError;
use redis::aio::ConnectionManager;

mod cache;
mod codec;
mod commands;
mod config;
mod group;

pub use cache::RedisCache;
pub use config::RedisCacheConfig;
pub use group::RedisVersionStore;

/// Opens a reconnecting connection to the Redis server at `url`.
pub async fn connect(url: &str) -> Result<ConnectionManager, RedisError> {
    let client = redis::Client::open(url)?;
    ConnectionManager::new(client).await
}
