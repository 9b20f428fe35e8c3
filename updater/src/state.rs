//! Update state, persisted records and status events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::ErrorCategory;
use std::collections::VecDeque;
use std::fmt;

/// Phase of the update state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePhase {
    #[default]
    Idle,
    Checking,
    Available,
    Downloading,
    Downloaded,
    Installing,
    Error,
}

/// The operation a failure or retry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateOperation {
    Check,
    Download,
    Install,
    Rollback,
}

impl fmt::Display for UpdateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateOperation::Check => "check",
            UpdateOperation::Download => "download",
            UpdateOperation::Install => "install",
            UpdateOperation::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// A release offered by the update provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl UpdateInfo {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            release_notes: None,
            download_url: None,
            sha256: None,
        }
    }
}

/// Read-only snapshot of the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateState {
    pub phase: UpdatePhase,
    pub current_version: String,
    pub target_version: Option<String>,
    pub progress_percent: u8,
    pub retry_count: u32,
    pub consecutive_failures: u32,
    pub last_successful_check_at: Option<DateTime<Utc>>,
    pub auto_check_enabled: bool,
    pub auto_download_enabled: bool,
    pub auto_check_disabled_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Release found by the last successful check, until installed or discarded
    pub available_update: Option<UpdateInfo>,
}

impl UpdateState {
    pub fn new(current_version: impl Into<String>, auto_check_enabled: bool, auto_download_enabled: bool) -> Self {
        Self {
            phase: UpdatePhase::Idle,
            current_version: current_version.into(),
            target_version: None,
            progress_percent: 0,
            retry_count: 0,
            consecutive_failures: 0,
            last_successful_check_at: None,
            auto_check_enabled,
            auto_download_enabled,
            auto_check_disabled_until: None,
            last_error: None,
            available_update: None,
        }
    }
}

/// One failed update operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub operation: UpdateOperation,
    pub message: String,
    pub category: ErrorCategory,
    pub retry_count_at_failure: u32,
}

/// Bounded failure history; the oldest record is evicted first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorHistory {
    records: VecDeque<ErrorRecord>,
    capacity: usize,
}

impl ErrorHistory {
    pub const DEFAULT_CAPACITY: usize = 10;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// History seeded from persisted records, keeping the newest ones
    pub fn from_records(records: Vec<ErrorRecord>, capacity: usize) -> Self {
        let mut history = Self::new(capacity);
        for record in records {
            history.push(record);
        }
        history
    }

    pub fn push(&mut self, record: ErrorRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&ErrorRecord> {
        self.records.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.records.iter()
    }

    /// Oldest first
    pub fn to_vec(&self) -> Vec<ErrorRecord> {
        self.records.iter().cloned().collect()
    }
}

impl Default for ErrorHistory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// Versions recorded right before an install attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBackup {
    pub previous_version: String,
    pub target_version: String,
    pub timestamp: DateTime<Utc>,
}

/// Events pushed to status subscribers, in emission order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateEvent {
    CheckingStarted,
    UpdateAvailable(UpdateInfo),
    UpdateNotAvailable { current_version: String },
    DownloadProgress { percent: u8 },
    UpdateDownloaded { version: String },
    Installing { version: String },
    Retrying { operation: UpdateOperation, attempt: u32, delay_ms: u64 },
    Error { operation: UpdateOperation, message: String, category: ErrorCategory, terminal: bool },
    AutoCheckDisabled { until: DateTime<Utc> },
    AutoCheckReenabled,
    /// The install failed and the application stays on `version`
    RolledBack { version: String },
}
