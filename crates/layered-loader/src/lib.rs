//! # Layered loading
//!
//! This crate resolves values through an ordered chain of layers: an optional in-memory layer,
//! an optional shared ("async") cache, and any number of data sources. Resolution stops at the
//! first layer that knows the value, and every cache that missed before it is backfilled.
//!
//! ## Layers
//!
//! - The in-memory layer ([`InMemoryCache`], [`InMemoryGroupCache`]) is owned by its loader and
//!   consulted synchronously. Entries carry an explicit expiration, and entries about to expire
//!   are refreshed in the background while still being served ("refresh-ahead").
//! - The async cache and data sources implement [`DataSource`] (or [`GroupDataSource`] for
//!   grouped loaders) and are shared, externally owned collaborators.
//!
//! ## Resolution
//!
//! [`LoadOperation`] walks the chain for a single key. Concurrent resolutions of the same key are
//! coalesced into one. A failing layer is reported through an [`ErrorReporter`] and skipped, so a
//! broken cache never prevents falling through to an origin.
//!
//! Results are tri-state ([`Loaded`]): a value, an authoritative "does not exist" that is cached
//! like any value, or "nobody knows", which is never cached.
//!
//! ## Groups
//!
//! [`GroupLoader`] scopes keys to groups. [`VersionedGroupCache`] invalidates a whole group in
//! O(1) by bumping a version token embedded in every stored key, using the atomic primitives of
//! a [`VersionStore`].
//!
//! ### Metrics
//!
//! Each metric is tagged with the `loader` it originates from:
//!
//! - `loader.access`: All accesses through `get`.
//! - `loader.memory.hit`: Accesses served by the in-memory layer.
//! - `loader.layer.hit` / `loader.layer.miss`: Per layer (`layer` tag) outcomes of a resolution.
//! - `loader.layer.error`: Layer failures reported by the default [`TracingReporter`].
//! - `loader.coalesced`: Accesses that joined a resolution already in flight.
//! - `loader.resolve.duration`: Time spent walking the layers for one coalesced resolution.
//! - `loader.backfill`: Values written back into a cache layer.
//! - `loader.refresh`: Background refreshes scheduled.
//! - `group.version.bump`: Groups invalidated through a [`VersionedGroupCache`].

#[macro_use]
pub mod metrics;

pub mod config;
mod data_source;
mod error;
mod group_loader;
mod load_operation;
mod loaded;
mod loader;
pub mod logging;
mod memory;
pub mod utils;
mod versioning;

pub use config::{
    GroupLoaderConfig, InMemoryCacheConfig, InMemoryGroupCacheConfig, LoadOptions, LoaderConfig,
    VersionedGroupCacheConfig,
};
pub use data_source::{DataSource, GroupDataSource, GroupKey};
pub use error::{
    ErrorReporter, LayerError, LayerFailure, LayerOperation, LoaderError, TracingReporter,
};
pub use group_loader::GroupLoader;
pub use load_operation::{ChainLayer, LoadOperation, ResolutionKey};
pub use loaded::Loaded;
pub use loader::Loader;
pub use memory::{Fresh, InMemoryCache, InMemoryGroupCache};
pub use versioning::{GROUP_INDEX_KEY, VersionStore, VersionedGroupCache};

/// Re-exported so implementors of the layer traits use the same macro version.
pub use async_trait::async_trait;
