use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use layered_loader::{LayerError, Loaded, VersionStore};
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Stored<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Stored<V> {
    fn new(value: V, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

#[derive(Debug)]
struct State<T> {
    entries: HashMap<String, Stored<Option<T>>>,
    versions: HashMap<String, Stored<u64>>,
}

/// An in-process [`VersionStore`] whose contents can be inspected.
///
/// Atomicity of the version primitives comes from a single lock around all state. It honors
/// ttls using Tokio's clock, so paused tests can expire entries.
#[derive(Debug)]
pub struct MemoryVersionStore<T> {
    state: Mutex<State<T>>,
    failing: AtomicBool,
}

impl<T> Default for MemoryVersionStore<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                versions: HashMap::new(),
            }),
            failing: AtomicBool::new(false),
        }
    }
}

impl<T: Clone> MemoryVersionStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following operation fail, or succeed again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Whether a live entry is physically stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|stored| stored.is_live(now))
    }

    /// The raw version token stored under `group_key`.
    pub fn version(&self, group_key: &str) -> Option<String> {
        let now = Instant::now();
        let state = self.state.lock();
        let stored = state.versions.get(group_key)?;
        stored.is_live(now).then(|| stored.value.to_string())
    }

    /// All live physical keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let state = self.state.lock();
        let mut keys: Vec<_> = state
            .entries
            .iter()
            .filter(|(_, stored)| stored.is_live(now))
            .map(|(key, _)| key.clone())
            .chain(
                state
                    .versions
                    .iter()
                    .filter(|(_, stored)| stored.is_live(now))
                    .map(|(key, _)| key.clone()),
            )
            .collect();
        keys.sort();
        keys
    }

    fn check(&self) -> Result<(), LayerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LayerError::Unavailable("store is down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl<T> VersionStore<T> for MemoryVersionStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "memory"
    }

    async fn read(&self, key: &str) -> Result<Loaded<T>, LayerError> {
        self.check()?;
        let now = Instant::now();
        let state = self.state.lock();
        Ok(match state.entries.get(key) {
            Some(stored) if stored.is_live(now) => Loaded::from_option(stored.value.clone()),
            _ => Loaded::Absent,
        })
    }

    async fn write(
        &self,
        key: &str,
        value: Option<T>,
        ttl: Option<Duration>,
    ) -> Result<(), LayerError> {
        self.check()?;
        self.state
            .lock()
            .entries
            .insert(key.to_owned(), Stored::new(value, ttl));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), LayerError> {
        self.check()?;
        self.state.lock().entries.remove(key);
        Ok(())
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, LayerError> {
        self.check()?;
        let now = Instant::now();
        let state = self.state.lock();
        Ok(state
            .entries
            .get(key)
            .filter(|stored| stored.is_live(now))
            .and_then(|stored| stored.expires_at)
            .map(|expires_at| expires_at - now))
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<(), LayerError> {
        self.check()?;
        let mut state = self.state.lock();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        state.versions.retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }

    async fn current_version(&self, group_key: &str) -> Result<Option<String>, LayerError> {
        self.check()?;
        Ok(self.version(group_key))
    }

    async fn get_or_initialize_version(
        &self,
        group_key: &str,
        ttl: Option<Duration>,
    ) -> Result<String, LayerError> {
        self.check()?;
        let now = Instant::now();
        let mut state = self.state.lock();
        let stored = state
            .versions
            .entry(group_key.to_owned())
            .or_insert_with(|| Stored::new(0, ttl));
        if !stored.is_live(now) {
            *stored = Stored::new(0, ttl);
        }
        Ok(stored.value.to_string())
    }

    async fn increment_version(
        &self,
        group_key: &str,
        ttl: Option<Duration>,
    ) -> Result<String, LayerError> {
        self.check()?;
        let now = Instant::now();
        let mut state = self.state.lock();
        // Like `INCR`, a token that is gone starts over and does not expire unless told to.
        let previous = state
            .versions
            .get(group_key)
            .filter(|stored| stored.is_live(now));
        let next = previous.map_or(1, |stored| stored.value + 1);
        let expires_at = match ttl {
            Some(ttl) => Some(now + ttl),
            None => previous.and_then(|stored| stored.expires_at),
        };
        state.versions.insert(
            group_key.to_owned(),
            Stored {
                value: next,
                expires_at,
            },
        );
        Ok(next.to_string())
    }
}
