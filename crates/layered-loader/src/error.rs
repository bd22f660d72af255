use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// An error returned by a single layer of the loading chain.
///
/// These never reach the caller directly. The [`LoadOperation`](crate::LoadOperation) reports
/// them through an [`ErrorReporter`] and moves on to the next layer, unless the error comes
/// from an origin and the loader was configured to surface load errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayerError {
    /// The layer did not answer within the configured timeout.
    #[error("layer timed out after {0:?}")]
    Timeout(Duration),
    /// The layer could not be reached or failed internally.
    #[error("layer unavailable: {0}")]
    Unavailable(String),
    /// An origin tried to resolve the value and failed doing so.
    #[error("{0}")]
    Origin(String),
    /// A stored value could not be decoded.
    #[error("malformed value: {0}")]
    Malformed(String),
}

impl LayerError {
    pub fn unavailable(error: impl fmt::Display) -> Self {
        Self::Unavailable(error.to_string())
    }

    pub fn origin(message: impl Into<String>) -> Self {
        Self::Origin(message.into())
    }

    /// Whether this is a failure an origin signalled on purpose.
    pub fn is_origin(&self) -> bool {
        matches!(self, Self::Origin(_))
    }
}

/// Errors surfaced to users of [`Loader`](crate::Loader) and [`GroupLoader`](crate::GroupLoader).
///
/// This is `Clone` so that one settled resolution can be handed to every coalesced caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoaderError {
    /// Every layer missed and the loader is configured with `throw_if_unresolved`.
    #[error("Failed to resolve value for key \"{key}\"")]
    NotFound { key: String },
    /// A layer failed and the loader is configured with `throw_if_load_error`.
    #[error("layer `{layer}` failed to load value")]
    Load {
        layer: String,
        #[source]
        source: LayerError,
    },
    /// Invalid combination of options passed at construction time.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl LoaderError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// What was being done when a layer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerOperation {
    Get,
    Set,
    Delete,
    Clear,
    DeleteGroup,
}

impl LayerOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Clear => "clear",
            Self::DeleteGroup => "delete_group",
        }
    }
}

impl fmt::Display for LayerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A layer failure together with the context it happened in.
#[derive(Debug, Clone)]
pub struct LayerFailure<'a> {
    /// Name of the loader that owns the layer chain.
    pub loader: &'a str,
    /// Name of the failing layer.
    pub layer: &'a str,
    pub operation: LayerOperation,
    /// The key being operated on, if any. `clear` has none.
    pub key: Option<&'a str>,
    pub group: Option<&'a str>,
    pub error: &'a LayerError,
}

/// Observability hook for failures that are isolated instead of returned.
pub trait ErrorReporter: Send + Sync + fmt::Debug {
    fn report(&self, failure: &LayerFailure<'_>);
}

/// The default reporter: logs through `tracing` and counts the failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, failure: &LayerFailure<'_>) {
        tracing::error!(
            error = failure.error as &dyn std::error::Error,
            loader = failure.loader,
            layer = failure.layer,
            operation = failure.operation.as_str(),
            key = failure.key,
            group = failure.group,
            "Layer failed"
        );
        metric!(
            counter("loader.layer.error") += 1,
            "loader" => failure.loader,
            "layer" => failure.layer,
            "operation" => failure.operation.as_str(),
        );
    }
}

pub(crate) fn default_reporter() -> Arc<dyn ErrorReporter> {
    Arc::new(TracingReporter)
}
