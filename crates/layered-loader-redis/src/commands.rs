//! Commands shared by the Redis layers.
use std::time::Duration;

use layered_loader::LayerError;
use redis::aio::ConnectionManager;

use crate::codec::unavailable;

pub(crate) async fn get(
    connection: &mut ConnectionManager,
    key: &str,
) -> Result<Option<String>, LayerError> {
    let value: Option<String> = redis::cmd("GET")
        .arg(key)
        .query_async(connection)
        .await
        .map_err(unavailable)?;
    Ok(value)
}

/// `SET`s `value`, with `PX` if a ttl is given.
pub(crate) async fn set(
    connection: &mut ConnectionManager,
    key: &str,
    value: &str,
    ttl: Option<Duration>,
) -> Result<(), LayerError> {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    if let Some(ttl) = ttl {
        cmd.arg("PX").arg(millis(ttl));
    }
    let () = cmd.query_async(connection).await.map_err(unavailable)?;
    Ok(())
}

pub(crate) async fn del(connection: &mut ConnectionManager, key: &str) -> Result<(), LayerError> {
    let _: i64 = redis::cmd("DEL")
        .arg(key)
        .query_async(connection)
        .await
        .map_err(unavailable)?;
    Ok(())
}

/// Lifetime left of `key`, `None` if it does not exist or does not expire.
pub(crate) async fn pttl(
    connection: &mut ConnectionManager,
    key: &str,
) -> Result<Option<Duration>, LayerError> {
    let remaining: i64 = redis::cmd("PTTL")
        .arg(key)
        .query_async(connection)
        .await
        .map_err(unavailable)?;
    // -2: no such key, -1: no expiry
    Ok(u64::try_from(remaining)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis))
}

/// Deletes every key matching `pattern`, a batch at a time.
pub(crate) async fn delete_matching(
    connection: &mut ConnectionManager,
    pattern: &str,
) -> Result<u64, LayerError> {
    let mut cursor = 0u64;
    let mut deleted = 0;
    loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(500)
            .query_async(connection)
            .await
            .map_err(unavailable)?;

        if !keys.is_empty() {
            let count: u64 = redis::cmd("DEL")
                .arg(&keys)
                .query_async(connection)
                .await
                .map_err(unavailable)?;
            deleted += count;
        }

        if next == 0 {
            return Ok(deleted);
        }
        cursor = next;
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}
