//! Resolution of a single key through an ordered chain of layers.
//!
//! Concurrent resolutions of the same key are coalesced: the first caller spawns the resolution
//! and every caller arriving before it settles subscribes to the same shared channel. The entry
//! is evicted from the map right before the outcome is sent, so later callers start afresh.
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared, TryFutureExt, join_all};
use parking_lot::Mutex;

use crate::config::LoadOptions;
use crate::data_source::{DataSource, GroupDataSource, GroupKey};
use crate::error::{ErrorReporter, LayerError, LayerFailure, LayerOperation, LoaderError};
use crate::loaded::Loaded;
use crate::utils::{CallOnDrop, spawn_detached, with_timeout};

type Resolution<T> = Result<Loaded<T>, LoaderError>;
type ResolutionChannel<T> = Shared<oneshot::Receiver<Resolution<T>>>;

/// The key a [`LoadOperation`] coalesces on.
pub trait ResolutionKey: Clone + Eq + Hash + Send + Sync + fmt::Debug + 'static {
    fn key(&self) -> &str;

    fn group(&self) -> Option<&str> {
        None
    }
}

impl ResolutionKey for String {
    fn key(&self) -> &str {
        self
    }
}

impl ResolutionKey for GroupKey {
    fn key(&self) -> &str {
        &self.key
    }

    fn group(&self) -> Option<&str> {
        Some(&self.group)
    }
}

/// A handle to one layer of a resolution chain.
///
/// Implemented for shared plain and grouped data sources so the same resolution algorithm serves
/// both [`Loader`](crate::Loader) and [`GroupLoader`](crate::GroupLoader).
pub trait ChainLayer: Clone + Send + Sync + 'static {
    type Key: ResolutionKey;
    type Value: Clone + Send + Sync + 'static;
    type Params: Send + Sync + 'static;

    fn name(&self) -> &str;

    /// Whether values resolved by later layers are written back into this one.
    fn is_cache(&self) -> bool;

    fn fetch<'a>(
        &'a self,
        key: &'a Self::Key,
        params: Option<&'a Self::Params>,
    ) -> BoxFuture<'a, Result<Loaded<Self::Value>, LayerError>>;

    fn store<'a>(
        &'a self,
        key: &'a Self::Key,
        value: Option<Self::Value>,
    ) -> BoxFuture<'a, Result<(), LayerError>>;
}

impl<T, P> ChainLayer for Arc<dyn DataSource<T, P>>
where
    T: Clone + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    type Key = String;
    type Value = T;
    type Params = P;

    fn name(&self) -> &str {
        DataSource::name(&**self)
    }

    fn is_cache(&self) -> bool {
        DataSource::is_cache(&**self)
    }

    fn fetch<'a>(
        &'a self,
        key: &'a String,
        params: Option<&'a P>,
    ) -> BoxFuture<'a, Result<Loaded<T>, LayerError>> {
        self.get(key, params)
    }

    fn store<'a>(
        &'a self,
        key: &'a String,
        value: Option<T>,
    ) -> BoxFuture<'a, Result<(), LayerError>> {
        self.set(key, value)
    }
}

impl<T, P> ChainLayer for Arc<dyn GroupDataSource<T, P>>
where
    T: Clone + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    type Key = GroupKey;
    type Value = T;
    type Params = P;

    fn name(&self) -> &str {
        GroupDataSource::name(&**self)
    }

    fn is_cache(&self) -> bool {
        GroupDataSource::is_cache(&**self)
    }

    fn fetch<'a>(
        &'a self,
        key: &'a GroupKey,
        params: Option<&'a P>,
    ) -> BoxFuture<'a, Result<Loaded<T>, LayerError>> {
        self.get_from_group(&key.key, &key.group, params)
    }

    fn store<'a>(
        &'a self,
        key: &'a GroupKey,
        value: Option<T>,
    ) -> BoxFuture<'a, Result<(), LayerError>> {
        self.set_for_group(&key.key, value, &key.group)
    }
}

/// Resolves keys through an ordered list of layers, stopping at the first one that knows the
/// value and backfilling the caches that missed.
///
/// Layer failures are reported and skipped. Only failures signalled by an origin are returned,
/// and only with [`LoadOptions::throw_if_load_error`].
pub struct LoadOperation<L: ChainLayer> {
    inner: Arc<LoadOperationInner<L>>,
}

struct LoadOperationInner<L: ChainLayer> {
    name: String,
    layers: Vec<L>,
    options: LoadOptions,
    reporter: Arc<dyn ErrorReporter>,
    current_loads: Mutex<HashMap<L::Key, ResolutionChannel<L::Value>>>,
}

impl<L: ChainLayer> Clone for LoadOperation<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: ChainLayer> fmt::Debug for LoadOperation<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOperation")
            .field("name", &self.inner.name)
            .field(
                "layers",
                &self.inner.layers.iter().map(|l| l.name()).collect::<Vec<_>>(),
            )
            .field("options", &self.inner.options)
            .finish()
    }
}

impl<L: ChainLayer> LoadOperation<L> {
    pub fn new(
        name: impl Into<String>,
        layers: Vec<L>,
        options: LoadOptions,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            inner: Arc::new(LoadOperationInner {
                name: name.into(),
                layers,
                options,
                reporter,
                current_loads: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn layers(&self) -> &[L] {
        &self.inner.layers
    }

    pub fn options(&self) -> &LoadOptions {
        &self.inner.options
    }

    /// Reports a layer failure through the configured hook.
    pub fn report(
        &self,
        layer: &str,
        operation: LayerOperation,
        key: Option<&str>,
        group: Option<&str>,
        error: &LayerError,
    ) {
        self.inner.reporter.report(&LayerFailure {
            loader: &self.inner.name,
            layer,
            operation,
            key,
            group,
            error,
        });
    }

    /// Resolves `key`, joining a resolution of the same key that is already in flight.
    ///
    /// NOTE: This function itself is *not* `async`: the resolution is spawned eagerly, even if
    /// the returned future is never polled.
    pub fn load(
        &self,
        key: L::Key,
        params: Option<L::Params>,
    ) -> BoxFuture<'static, Resolution<L::Value>> {
        let channel = {
            let mut current_loads = self.inner.current_loads.lock();
            if let Some(channel) = current_loads.get(&key) {
                metric!(counter("loader.coalesced") += 1, "loader" => self.name());
                tracing::trace!(loader = self.name(), key = ?key, "Joining in-flight resolution");
                channel.clone()
            } else {
                let channel = self.spawn_resolution(key.clone(), params);
                current_loads.insert(key, channel.clone());
                channel
            }
        };

        let name = self.inner.name.clone();
        channel
            .unwrap_or_else(move |_canceled| {
                Err(LoaderError::Load {
                    layer: name,
                    source: LayerError::Unavailable("resolution was interrupted".into()),
                })
            })
            .boxed()
    }

    fn spawn_resolution(
        &self,
        key: L::Key,
        params: Option<L::Params>,
    ) -> ResolutionChannel<L::Value> {
        let (sender, receiver) = oneshot::channel();

        let remove_load_token = {
            let this = self.clone();
            let key = key.clone();
            CallOnDrop::new(move || {
                this.inner.current_loads.lock().remove(&key);
            })
        };

        let this = self.clone();
        spawn_detached(async move {
            let start = Instant::now();
            let result = this.resolve(key, params).await;
            metric!(timer("loader.resolve.duration") = start.elapsed(), "loader" => this.name());
            // Evict before sending, so callers either receive this outcome or start anew.
            drop(remove_load_token);
            sender.send(result).ok();
        });

        receiver.shared()
    }

    /// Walks the layers once, without coalescing.
    pub async fn resolve(&self, key: L::Key, params: Option<L::Params>) -> Resolution<L::Value> {
        let inner = &self.inner;
        let params = params.as_ref();

        for (index, layer) in inner.layers.iter().enumerate() {
            let result = with_timeout(inner.options.layer_timeout, layer.fetch(&key, params)).await;
            match result {
                Ok(Loaded::Absent) => {
                    metric!(
                        counter("loader.layer.miss") += 1,
                        "loader" => self.name(),
                        "layer" => layer.name(),
                    );
                }
                Ok(loaded) => {
                    metric!(
                        counter("loader.layer.hit") += 1,
                        "loader" => self.name(),
                        "layer" => layer.name(),
                    );
                    tracing::trace!(
                        loader = self.name(),
                        layer = layer.name(),
                        key = ?key,
                        "Resolved value"
                    );
                    self.spawn_backfill(&key, &loaded, &inner.layers[..index]);
                    return Ok(loaded);
                }
                Err(error) => {
                    self.report(
                        layer.name(),
                        LayerOperation::Get,
                        Some(key.key()),
                        key.group(),
                        &error,
                    );
                    if error.is_origin() && inner.options.throw_if_load_error {
                        return Err(LoaderError::Load {
                            layer: layer.name().to_owned(),
                            source: error,
                        });
                    }
                }
            }
        }

        if inner.options.throw_if_unresolved {
            Err(LoaderError::NotFound {
                key: key.key().to_owned(),
            })
        } else {
            Ok(Loaded::Absent)
        }
    }

    /// Writes the resolved value into every cache that was asked before it, without waiting.
    fn spawn_backfill(&self, key: &L::Key, loaded: &Loaded<L::Value>, missed: &[L]) {
        let Some(value) = loaded.clone().into_option() else {
            return;
        };
        let targets: Vec<L> = missed.iter().filter(|l| l.is_cache()).cloned().collect();
        if targets.is_empty() {
            return;
        }

        let this = self.clone();
        let key = key.clone();
        spawn_detached(async move {
            let timeout = this.inner.options.layer_timeout;
            let writes = targets.iter().map(|layer| {
                let value = value.clone();
                let key = &key;
                async move {
                    let result = with_timeout(timeout, layer.store(key, value)).await;
                    (layer, result)
                }
            });
            for (layer, result) in join_all(writes).await {
                match result {
                    Ok(()) => metric!(
                        counter("loader.backfill") += 1,
                        "loader" => this.name(),
                        "layer" => layer.name(),
                    ),
                    Err(error) => this.report(
                        layer.name(),
                        LayerOperation::Set,
                        Some(key.key()),
                        key.group(),
                        &error,
                    ),
                }
            }
        });
    }
}
