use layered_loader::{LayerError, Loaded};
use redis::RedisError;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub(crate) fn encode<T: Serialize>(value: Option<&T>) -> Result<String, LayerError> {
    serde_json::to_string(&value).map_err(|e| LayerError::Malformed(e.to_string()))
}

/// Decodes a stored value. `null` is a negative entry.
pub(crate) fn decode<T: DeserializeOwned>(stored: Option<String>) -> Result<Loaded<T>, LayerError> {
    let Some(stored) = stored else {
        return Ok(Loaded::Absent);
    };
    let value: Option<T> =
        serde_json::from_str(&stored).map_err(|e| LayerError::Malformed(e.to_string()))?;
    Ok(Loaded::from_option(value))
}

pub(crate) fn unavailable(error: RedisError) -> LayerError {
    LayerError::unavailable(error)
}
