//! Helpers for testing loaders and the layers they resolve through.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Backfills, refreshes and coalesced resolutions run as spawned tasks. Tests that inspect
//!    layers after a load should let those tasks run first, e.g. with [`settle`].
//!
//!  - Tests against a real Redis server start with [`redis_url!`], which skips the test when
//!    `LAYERED_LOADER_REDIS_URL` is not set.

use std::time::Duration;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

mod fakes;
mod grouped;
mod reporter;
mod store;

pub use fakes::*;
pub use grouped::*;
pub use reporter::*;
pub use store::*;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `layered_loader` crates and
///    mutes all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("layered_loader=trace,layered_loader_redis=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Lets spawned tasks such as backfills and background refreshes run to completion.
///
/// With paused time this returns as soon as the runtime is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Returns the URL of the Redis server to test against.
pub fn redis_url_from_env() -> Option<String> {
    std::env::var("LAYERED_LOADER_REDIS_URL")
        .ok()
        .filter(|url| !url.is_empty())
}

/// Returns the URL of the Redis server to test against.
///
/// If `LAYERED_LOADER_REDIS_URL` is not set this will exit the test early, as a poor
/// substitute for skipping tests.
#[macro_export]
macro_rules! redis_url {
    () => {
        match $crate::redis_url_from_env() {
            Some(url) => url,
            None => {
                println!("Skipping due to missing LAYERED_LOADER_REDIS_URL");
                return;
            }
        }
    };
}
