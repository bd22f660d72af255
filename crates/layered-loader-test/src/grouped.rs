use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use layered_loader::{GroupDataSource, LayerError, Loaded};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::DummyLoaderParams;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: u64,
    pub company_id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parametrized: Option<String>,
}

impl User {
    pub fn new(user_id: u64, name: impl Into<String>) -> Self {
        Self {
            user_id,
            company_id: 1,
            name: name.into(),
            parametrized: None,
        }
    }
}

/// Stored users by group and key. `None` is a negative entry.
pub type GroupValues = BTreeMap<String, BTreeMap<String, Option<User>>>;

/// Two groups with one user each: user `1` in group `1`, user `2` in group `2`.
pub fn group_values() -> GroupValues {
    let mut values = GroupValues::new();
    values
        .entry("1".into())
        .or_default()
        .insert("1".into(), Some(User::new(1, "John")));
    values
        .entry("2".into())
        .or_default()
        .insert("2".into(), Some(User::new(2, "Bob")));
    values
}

fn lookup(values: &GroupValues, key: &str, group: &str) -> Loaded<User> {
    values
        .get(group)
        .and_then(|entries| entries.get(key))
        .cloned()
        .map(Loaded::from_option)
        .unwrap_or(Loaded::Absent)
}

/// A grouped cache backed by nested maps, open for inspection.
#[derive(Debug, Default)]
pub struct DummyGroupedCache {
    values: Mutex<GroupValues>,
}

impl DummyGroupedCache {
    pub fn new(values: GroupValues) -> Self {
        Self {
            values: Mutex::new(values),
        }
    }

    pub fn stored(&self, key: &str, group: &str) -> Option<Option<User>> {
        self.values.lock().get(group)?.get(key).cloned()
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.values.lock().contains_key(group)
    }
}

#[async_trait]
impl<P: Send + Sync + 'static> GroupDataSource<User, P> for DummyGroupedCache {
    fn name(&self) -> &str {
        "Dummy grouped cache"
    }

    fn is_cache(&self) -> bool {
        true
    }

    async fn get_from_group(
        &self,
        key: &str,
        group: &str,
        _params: Option<&P>,
    ) -> Result<Loaded<User>, LayerError> {
        Ok(lookup(&self.values.lock(), key, group))
    }

    async fn set_for_group(
        &self,
        key: &str,
        value: Option<User>,
        group: &str,
    ) -> Result<(), LayerError> {
        self.values
            .lock()
            .entry(group.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete_from_group(&self, key: &str, group: &str) -> Result<(), LayerError> {
        if let Some(entries) = self.values.lock().get_mut(group) {
            entries.remove(key);
        }
        Ok(())
    }

    async fn delete_group(&self, group: &str) -> Result<(), LayerError> {
        self.values.lock().remove(group);
        Ok(())
    }

    async fn clear(&self) -> Result<(), LayerError> {
        self.values.lock().clear();
        Ok(())
    }
}

/// A grouped origin counting how often it was asked.
#[derive(Debug)]
pub struct CountingGroupedLoader {
    values: Mutex<GroupValues>,
    counter: AtomicUsize,
}

impl CountingGroupedLoader {
    pub fn new(values: GroupValues) -> Self {
        Self {
            values: Mutex::new(values),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn set_user(&self, key: &str, group: &str, user: Option<User>) {
        self.values
            .lock()
            .entry(group.to_owned())
            .or_default()
            .insert(key.to_owned(), user);
    }

    pub fn times_called(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<P: Send + Sync + 'static> GroupDataSource<User, P> for CountingGroupedLoader {
    fn name(&self) -> &str {
        "Counting grouped loader"
    }

    async fn get_from_group(
        &self,
        key: &str,
        group: &str,
        _params: Option<&P>,
    ) -> Result<Loaded<User>, LayerError> {
        self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(lookup(&self.values.lock(), key, group))
    }
}

/// A grouped origin requiring params, failing for unknown users.
#[derive(Debug)]
pub struct DummyGroupedLoaderWithParams {
    values: GroupValues,
}

impl DummyGroupedLoaderWithParams {
    pub fn new(values: GroupValues) -> Self {
        Self { values }
    }
}

#[async_trait]
impl GroupDataSource<User, DummyLoaderParams> for DummyGroupedLoaderWithParams {
    fn name(&self) -> &str {
        "Dummy grouped loader with params"
    }

    async fn get_from_group(
        &self,
        key: &str,
        group: &str,
        params: Option<&DummyLoaderParams>,
    ) -> Result<Loaded<User>, LayerError> {
        let Some(params) = params else {
            return Err(LayerError::origin("Params were not passed"));
        };
        let Loaded::Present(user) = lookup(&self.values, key, group) else {
            return Err(LayerError::origin("User not found"));
        };
        Ok(Loaded::Present(User {
            parametrized: Some(format!("{}{}", params.prefix, params.suffix)),
            ..user
        }))
    }
}

/// A grouped cache that is down: every operation fails.
#[derive(Debug, Default)]
pub struct ThrowingGroupedCache {
    counter: AtomicUsize,
}

impl ThrowingGroupedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn times_called(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T, LayerError> {
        self.counter.fetch_add(1, Ordering::SeqCst);
        Err(LayerError::Unavailable("Error has occurred".into()))
    }
}

#[async_trait]
impl<P: Send + Sync + 'static> GroupDataSource<User, P> for ThrowingGroupedCache {
    fn name(&self) -> &str {
        "Throwing grouped cache"
    }

    fn is_cache(&self) -> bool {
        true
    }

    async fn get_from_group(
        &self,
        _key: &str,
        _group: &str,
        _params: Option<&P>,
    ) -> Result<Loaded<User>, LayerError> {
        self.fail()
    }

    async fn set_for_group(
        &self,
        _key: &str,
        _value: Option<User>,
        _group: &str,
    ) -> Result<(), LayerError> {
        self.fail()
    }

    async fn delete_from_group(&self, _key: &str, _group: &str) -> Result<(), LayerError> {
        self.fail()
    }

    async fn delete_group(&self, _group: &str) -> Result<(), LayerError> {
        self.fail()
    }

    async fn clear(&self) -> Result<(), LayerError> {
        self.fail()
    }
}
