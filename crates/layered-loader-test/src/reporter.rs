use layered_loader::{ErrorReporter, LayerError, LayerFailure, LayerOperation};
use parking_lot::Mutex;

/// An owned copy of a reported [`LayerFailure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFailure {
    pub loader: String,
    pub layer: String,
    pub operation: LayerOperation,
    pub key: Option<String>,
    pub group: Option<String>,
    pub error: LayerError,
}

/// An [`ErrorReporter`] remembering everything it was told.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    failures: Mutex<Vec<RecordedFailure>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<RecordedFailure> {
        self.failures.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.failures.lock().len()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, failure: &LayerFailure<'_>) {
        self.failures.lock().push(RecordedFailure {
            loader: failure.loader.to_owned(),
            layer: failure.layer.to_owned(),
            operation: failure.operation,
            key: failure.key.map(ToOwned::to_owned),
            group: failure.group.map(ToOwned::to_owned),
            error: failure.error.clone(),
        });
    }
}
