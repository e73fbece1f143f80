//! Progress reporting.

use crate::error::CloudError;
use tracing::{debug, info, warn};

/// Receives progress of one replication.
///
/// All methods default to doing nothing.
pub trait ProgressListener: Send + Sync {
    /// The transfer is starting.
    fn started(&self) {}

    /// `current` of `total` units have been sent.
    fn progress(&self, _current: u64, _total: u64) {}

    /// The transfer completed.
    fn finished(&self) {}

    /// The transfer failed with `error`.
    fn aborted(&self, _error: &CloudError) {}
}

/// Ignores all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ProgressListener for NoopListener {}

/// Reports progress through `tracing`.
#[derive(Debug)]
pub struct LoggingListener {
    label: String,
}

impl LoggingListener {
    /// Creates a listener whose events carry `label`.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ProgressListener for LoggingListener {
    fn started(&self) {
        info!(transfer = %self.label, "replication started");
    }

    fn progress(&self, current: u64, total: u64) {
        debug!(transfer = %self.label, current, total, "replication progress");
    }

    fn finished(&self) {
        info!(transfer = %self.label, "replication finished");
    }

    fn aborted(&self, error: &CloudError) {
        warn!(transfer = %self.label, error = %error, "replication aborted");
    }
}
