use std::time::Duration;

use serde::Deserialize;

/// Configuration of the Redis layers.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RedisCacheConfig {
    /// The server to connect to.
    pub url: String,

    /// Prepended to every key, followed by the separator.
    pub prefix: String,
    pub separator: String,

    /// Lifetime of stored values. Values never expire when unset.
    #[serde(with = "humantime_serde")]
    pub ttl: Option<Duration>,

    /// Timeout of each command.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
            prefix: "layered-loader".into(),
            separator: ":".into(),
            ttl: None,
            timeout: None,
        }
    }
}

impl RedisCacheConfig {
    pub(crate) fn resolve_key(&self, key: &str) -> String {
        format!("{}{}{}", self.prefix, self.separator, key)
    }

    /// A `SCAN` pattern matching every key under the prefix.
    pub(crate) fn prefix_pattern(&self) -> String {
        let prefix = format!("{}{}", self.prefix, self.separator);
        format!("{}*", escape_pattern(&prefix))
    }
}

/// Escapes glob metacharacters so `prefix` is matched literally.
pub(crate) fn escape_pattern(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
