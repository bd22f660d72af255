use std::sync::Arc;

use layered_loader::{DataSource, ErrorReporter, GroupDataSource};
use layered_loader_test::{RecordingReporter, User};

/// Shares a plain data source as a layer of a loader without params.
pub fn source<S>(source: &Arc<S>) -> Arc<dyn DataSource<String>>
where
    S: DataSource<String> + 'static,
{
    Arc::clone(source) as Arc<dyn DataSource<String>>
}

/// Shares a grouped data source as a layer of a group loader without params.
pub fn group_source<S>(source: &Arc<S>) -> Arc<dyn GroupDataSource<User>>
where
    S: GroupDataSource<User> + 'static,
{
    Arc::clone(source) as Arc<dyn GroupDataSource<User>>
}

pub fn reporter() -> (Arc<RecordingReporter>, Arc<dyn ErrorReporter>) {
    let recording = Arc::new(RecordingReporter::new());
    let reporter = Arc::clone(&recording) as Arc<dyn ErrorReporter>;
    (recording, reporter)
}
