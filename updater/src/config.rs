//! Update coordinator configuration

use shared::BackoffPolicy;
use std::time::Duration;

/// Policy knobs of an [`crate::UpdateCoordinator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterConfig {
    /// Version of the running application
    pub current_version: String,
    /// Retries per failed check or download before the failure is terminal
    pub max_retries: u32,
    /// First retry delay; doubles on every further attempt
    pub retry_base_delay: Duration,
    /// Period of the automatic update check
    pub check_interval: Duration,
    /// Consecutive failures after which the automatic check is suspended
    pub failure_threshold: u32,
    /// How long a suspension lasts
    pub suspension: Duration,
    pub auto_check: bool,
    pub auto_download: bool,
    /// Whether failures of unknown cause are retried
    pub retry_unknown_errors: bool,
    pub history_capacity: usize,
}

impl UpdaterConfig {
    pub fn new(current_version: impl Into<String>) -> Self {
        Self {
            current_version: current_version.into(),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(5),
            check_interval: Duration::from_secs(4 * 60 * 60),
            failure_threshold: 5,
            suspension: Duration::from_secs(24 * 60 * 60),
            auto_check: true,
            auto_download: false,
            retry_unknown_errors: true,
            history_capacity: 10,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, retry_base_delay: Duration) -> Self {
        self.retry_base_delay = retry_base_delay;
        self
    }

    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    pub fn with_failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold;
        self
    }

    pub fn with_suspension(mut self, suspension: Duration) -> Self {
        self.suspension = suspension;
        self
    }

    pub fn with_auto_check(mut self, auto_check: bool) -> Self {
        self.auto_check = auto_check;
        self
    }

    pub fn with_auto_download(mut self, auto_download: bool) -> Self {
        self.auto_download = auto_download;
        self
    }

    pub fn with_retry_unknown_errors(mut self, retry_unknown_errors: bool) -> Self {
        self.retry_unknown_errors = retry_unknown_errors;
        self
    }

    pub fn with_history_capacity(mut self, history_capacity: usize) -> Self {
        self.history_capacity = history_capacity.max(1);
        self
    }

    /// Retry delays: base, 2x base, 4x base, ...
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(self.retry_base_delay)
    }
}
