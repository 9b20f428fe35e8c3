//! Trait definitions with mockall annotations for testing
//!
//! The coordinator never talks to an update server or the filesystem
//! directly. Delivery goes through [`UpdateProvider`] and durable records
//! through [`StateStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::SharedResult;
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::state::{ErrorRecord, UpdateBackup, UpdateInfo};

/// Update delivery mechanism
#[mockall::automock]
#[async_trait]
pub trait UpdateProvider: Send + Sync {
    /// Latest release offered, if any; the coordinator decides whether it is newer
    async fn check_for_updates(&self) -> Result<Option<UpdateInfo>, ProviderError>;

    /// Fetch and stage `info`, reporting percent complete on `progress`
    async fn download_update(&self, info: &UpdateInfo, progress: mpsc::UnboundedSender<u8>) -> Result<(), ProviderError>;

    /// Hand over to the staged update; on success the process is expected to exit
    async fn quit_and_install(&self) -> Result<(), ProviderError>;

    /// Remove anything staged by a download
    async fn discard_staged_update(&self) -> Result<(), ProviderError>;
}

/// Durable storage for records that must survive restarts
#[mockall::automock]
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_error_history(&self) -> SharedResult<Vec<ErrorRecord>>;

    async fn save_error_history(&self, records: Vec<ErrorRecord>) -> SharedResult<()>;

    async fn load_backup(&self) -> SharedResult<Option<UpdateBackup>>;

    async fn save_backup(&self, backup: &UpdateBackup) -> SharedResult<()>;

    /// Deadline of a persisted auto-check suspension
    async fn load_suspension(&self) -> SharedResult<Option<DateTime<Utc>>>;

    /// Persist a suspension deadline, or clear it with `None`
    async fn save_suspension(&self, until: Option<DateTime<Utc>>) -> SharedResult<()>;
}
