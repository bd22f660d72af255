use std::future::Future;
use std::time::Duration;

use sentry::{Hub, SentryFutureExt};

use crate::error::LayerError;

/// Execute a callback on dropping of the container type.
///
/// The callback must not panic under any circumstance. Since it is called while dropping an item,
/// this might result in aborting program execution.
pub struct CallOnDrop {
    f: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl CallOnDrop {
    pub fn new<F: FnOnce() + Send + 'static>(f: F) -> CallOnDrop {
        CallOnDrop {
            f: Some(Box::new(f)),
        }
    }
}

impl Drop for CallOnDrop {
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            f();
        }
    }
}

/// Runs a layer call, failing with [`LayerError::Timeout`] if it takes longer than `timeout`.
pub async fn with_timeout<F, T>(timeout: Option<Duration>, future: F) -> Result<T, LayerError>
where
    F: Future<Output = Result<T, LayerError>>,
{
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, future)
            .await
            .unwrap_or(Err(LayerError::Timeout(timeout))),
        None => future.await,
    }
}

/// Spawns a task nobody waits for, bound to a fresh sentry hub.
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(future.bind_hub(Hub::new_from_top(Hub::current())));
}
