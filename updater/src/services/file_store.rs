//! JSON file backed [`StateStore`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::persist::{read_json, remove_file_if_exists, write_json_atomic};
use shared::SharedResult;
use std::path::{Path, PathBuf};

use crate::state::{ErrorRecord, UpdateBackup};
use crate::traits::StateStore;

pub const ERROR_HISTORY_FILE: &str = "error-history.json";
pub const BACKUP_FILE: &str = "update-backup.json";
pub const AUTO_CHECK_FILE: &str = "auto-check.json";

#[derive(Debug, Serialize, Deserialize)]
struct AutoCheckRecord {
    disabled_until: DateTime<Utc>,
}

/// Keeps each record in its own file under one state directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load_error_history(&self) -> SharedResult<Vec<ErrorRecord>> {
        Ok(read_json(&self.path(ERROR_HISTORY_FILE)).await?.unwrap_or_default())
    }

    async fn save_error_history(&self, records: Vec<ErrorRecord>) -> SharedResult<()> {
        write_json_atomic(&self.path(ERROR_HISTORY_FILE), &records).await
    }

    async fn load_backup(&self) -> SharedResult<Option<UpdateBackup>> {
        read_json(&self.path(BACKUP_FILE)).await
    }

    async fn save_backup(&self, backup: &UpdateBackup) -> SharedResult<()> {
        write_json_atomic(&self.path(BACKUP_FILE), backup).await
    }

    async fn load_suspension(&self) -> SharedResult<Option<DateTime<Utc>>> {
        let record: Option<AutoCheckRecord> = read_json(&self.path(AUTO_CHECK_FILE)).await?;
        Ok(record.map(|r| r.disabled_until))
    }

    async fn save_suspension(&self, until: Option<DateTime<Utc>>) -> SharedResult<()> {
        let path = self.path(AUTO_CHECK_FILE);
        match until {
            Some(disabled_until) => write_json_atomic(&path, &AutoCheckRecord { disabled_until }).await,
            None => remove_file_if_exists(&path).await,
        }
    }
}
