use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use layered_loader::{
    DataSource, GroupDataSource, GroupLoader, GroupLoaderConfig, InMemoryCacheConfig,
    InMemoryGroupCacheConfig, LayerError, Loaded, Loader, LoaderConfig, VersionStore,
    VersionedGroupCache, VersionedGroupCacheConfig,
};
use layered_loader_redis::{RedisCache, RedisCacheConfig, RedisVersionStore};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

#[derive(Debug, Deserialize)]
pub struct Workload {
    pub concurrency: usize,
    /// Number of distinct keys the workload cycles through.
    #[serde(default = "default_keys")]
    pub keys: usize,
    /// Latency of every origin call.
    #[serde(default, with = "humantime_serde")]
    pub origin_latency: Duration,
    /// Put a redis cache between the in-memory layer and the origin.
    #[serde(default)]
    pub redis: bool,
    #[serde(flatten)]
    pub payload: Payload,
}

fn default_keys() -> usize {
    1000
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    Flat {
        in_memory: Option<InMemoryCacheConfig>,
    },
    Grouped {
        groups: usize,
        /// Invalidate a whole group after this many operations.
        invalidate_every: Option<usize>,
        in_memory: Option<InMemoryGroupCacheConfig>,
    },
}

/// An origin that answers every key after a fixed latency.
#[derive(Debug)]
pub struct SimulatedOrigin {
    latency: Duration,
    calls: AtomicUsize,
}

impl SimulatedOrigin {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    async fn answer(&self, value: String) -> Loaded<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Loaded::Present(value)
    }
}

#[async_trait]
impl DataSource<String> for SimulatedOrigin {
    fn name(&self) -> &str {
        "simulated origin"
    }

    async fn get(&self, key: &str, _params: Option<&()>) -> Result<Loaded<String>, LayerError> {
        Ok(self.answer(format!("value-{key}")).await)
    }
}

#[async_trait]
impl GroupDataSource<String> for SimulatedOrigin {
    fn name(&self) -> &str {
        "simulated origin"
    }

    async fn get_from_group(
        &self,
        key: &str,
        group: &str,
        _params: Option<&()>,
    ) -> Result<Loaded<String>, LayerError> {
        Ok(self.answer(format!("{group}/{key}")).await)
    }
}

pub enum ParsedPayload {
    Flat(Loader<String>),
    Grouped {
        loader: GroupLoader<String>,
        groups: usize,
        invalidate_every: Option<usize>,
    },
}

pub struct PreparedWorkload {
    pub concurrency: usize,
    pub keys: usize,
    pub origin: Arc<SimulatedOrigin>,
    pub payload: ParsedPayload,
}

pub async fn prepare_payload(
    index: usize,
    workload: Workload,
    redis_url: Option<&str>,
) -> Result<PreparedWorkload> {
    let origin = Arc::new(SimulatedOrigin::new(workload.origin_latency));
    let prefix = format!("layered-loader-stress:{index}");
    let redis_url = match (workload.redis, redis_url) {
        (true, Some(url)) => Some(url),
        (true, None) => anyhow::bail!("workload {index} uses redis, but no `--redis` was given"),
        (false, _) => None,
    };

    let payload = match workload.payload {
        Payload::Flat { in_memory } => {
            let mut config = LoaderConfig::new()
                .with_name(format!("workload-{index}"))
                .with_data_source(Arc::clone(&origin) as Arc<dyn DataSource<String>>);
            if let Some(in_memory) = in_memory {
                config = config.with_in_memory(in_memory);
            }
            if let Some(url) = redis_url {
                let cache = RedisCache::<String>::connect(RedisCacheConfig {
                    url: url.to_owned(),
                    prefix,
                    ..Default::default()
                })
                .await
                .context("failed to connect to redis")?;
                let cache: Arc<dyn DataSource<String>> = Arc::new(cache);
                cache.clear().await?;
                config = config.with_async_cache(cache);
            }
            ParsedPayload::Flat(Loader::new(config)?)
        }
        Payload::Grouped {
            groups,
            invalidate_every,
            in_memory,
        } => {
            let mut config = GroupLoaderConfig::new()
                .with_name(format!("workload-{index}"))
                .with_data_source(Arc::clone(&origin) as Arc<dyn GroupDataSource<String>>);
            if let Some(in_memory) = in_memory {
                config = config.with_in_memory(in_memory);
            }
            if let Some(url) = redis_url {
                let connection = layered_loader_redis::connect(url)
                    .await
                    .context("failed to connect to redis")?;
                let store: Arc<dyn VersionStore<String>> =
                    Arc::new(RedisVersionStore::<String>::new(connection));
                let cache = VersionedGroupCache::<String>::new(
                    store,
                    VersionedGroupCacheConfig {
                        prefix,
                        ..Default::default()
                    },
                )?;
                cache.clear().await?;
                config = config.with_async_cache(Arc::new(cache));
            }
            ParsedPayload::Grouped {
                loader: GroupLoader::new(config)?,
                groups: groups.max(1),
                invalidate_every,
            }
        }
    };

    Ok(PreparedWorkload {
        concurrency: workload.concurrency,
        keys: workload.keys.max(1),
        origin,
        payload,
    })
}

/// Performs the `op`-th operation of a workload.
pub async fn process_payload(workload: &PreparedWorkload, op: usize) -> Result<()> {
    let key = (op % workload.keys).to_string();
    match &workload.payload {
        ParsedPayload::Flat(loader) => {
            loader.get(&key).await?;
        }
        ParsedPayload::Grouped {
            loader,
            groups,
            invalidate_every,
        } => {
            let group = (op % groups).to_string();
            if invalidate_every.is_some_and(|every| every > 0 && op % every == 0) {
                loader.invalidate_cache_for_group(&group).await;
            }
            loader.get(&key, &group).await?;
        }
    }
    Ok(())
}
