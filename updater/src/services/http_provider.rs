//! Update provider backed by a JSON release feed
//!
//! The feed is a single manifest:
//!
//! ```json
//! { "version": "2.0.0", "url": "app-2.0.0.bin", "sha256": "…", "notes": "…" }
//! ```
//!
//! Relative artifact URLs are resolved against the feed URL. Downloads are
//! streamed into a staging directory and checked against the digest before
//! they count as staged.

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use url::Url;

use crate::error::ProviderError;
use crate::state::UpdateInfo;
use crate::traits::UpdateProvider;
use shared::{component_debug, component_info, component_warn, ComponentId};

const DEFAULT_ARTIFACT_NAME: &str = "update.bin";

#[derive(Debug, Deserialize)]
struct ReleaseManifest {
    version: String,
    url: String,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

/// Fetches releases over HTTP and installs them by launching the staged artifact
#[derive(Debug)]
pub struct HttpUpdateProvider {
    client: reqwest::Client,
    feed_url: Url,
    staging_dir: PathBuf,
    check_timeout: Duration,
    download_timeout: Duration,
    install_args: Vec<String>,
    shutdown: Option<mpsc::UnboundedSender<()>>,
    staged: Mutex<Option<PathBuf>>,
}

impl HttpUpdateProvider {
    pub fn new(feed_url: Url, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            feed_url,
            staging_dir: staging_dir.into(),
            check_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(600),
            install_args: Vec::new(),
            shutdown: None,
            staged: Mutex::new(None),
        }
    }

    /// Configure request timeouts for the manifest and the artifact (fluent API)
    pub fn with_timeouts(mut self, check_timeout: Duration, download_timeout: Duration) -> Self {
        self.check_timeout = check_timeout;
        self.download_timeout = download_timeout;
        self
    }

    /// Arguments passed to the staged installer
    pub fn with_install_args(mut self, install_args: Vec<String>) -> Self {
        self.install_args = install_args;
        self
    }

    /// Channel signalled once the installer has been launched, so the host can exit
    pub fn with_shutdown_signal(mut self, shutdown: mpsc::UnboundedSender<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Path of the currently staged artifact, if any
    pub async fn staged_artifact(&self) -> Option<PathBuf> {
        self.staged.lock().await.clone()
    }

    fn artifact_url(&self, info: &UpdateInfo) -> Result<Url, ProviderError> {
        let raw = info
            .download_url
            .as_deref()
            .ok_or_else(|| ProviderError::Other(format!("release {} has no download URL", info.version)))?;
        self.feed_url
            .join(raw)
            .map_err(|e| ProviderError::Other(format!("invalid download URL {raw}: {e}")))
    }

    fn artifact_path(&self, url: &Url) -> PathBuf {
        let name = url
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_ARTIFACT_NAME);
        self.staging_dir.join(name)
    }
}

#[async_trait]
impl UpdateProvider for HttpUpdateProvider {
    async fn check_for_updates(&self) -> Result<Option<UpdateInfo>, ProviderError> {
        component_debug!(ComponentId::Updater, "Fetching release manifest from {}", self.feed_url);
        let response = self
            .client
            .get(self.feed_url.clone())
            .timeout(self.check_timeout)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let manifest: ReleaseManifest = response.error_for_status()?.json().await?;

        Ok(Some(UpdateInfo {
            version: manifest.version,
            release_notes: manifest.notes,
            download_url: Some(manifest.url),
            sha256: manifest.sha256,
        }))
    }

    async fn download_update(&self, info: &UpdateInfo, progress: mpsc::UnboundedSender<u8>) -> Result<(), ProviderError> {
        let url = self.artifact_url(info)?;
        let path = self.artifact_path(&url);

        let mut response = self
            .client
            .get(url.clone())
            .timeout(self.download_timeout)
            .send()
            .await?
            .error_for_status()?;
        let total = response.content_length().filter(|len| *len > 0);

        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let mut file = tokio::fs::File::create(&path).await?;
        let mut hasher = Sha256::new();
        let mut received: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            received += chunk.len() as u64;
            if let Some(total) = total {
                let percent = (received.saturating_mul(100) / total).min(100) as u8;
                let _ = progress.send(percent);
            }
        }
        file.flush().await?;
        drop(file);

        if let Some(expected) = &info.sha256 {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                remove_if_exists(&path).await;
                return Err(ProviderError::Integrity(format!(
                    "sha256 mismatch for {}: expected {}, got {}",
                    info.version, expected, actual
                )));
            }
        }

        let _ = progress.send(100);
        component_info!(ComponentId::Updater, "📦 Staged {} ({} bytes) at {}", info.version, received, path.display());
        *self.staged.lock().await = Some(path);
        Ok(())
    }

    async fn quit_and_install(&self) -> Result<(), ProviderError> {
        let path = self
            .staged
            .lock()
            .await
            .clone()
            .ok_or_else(|| ProviderError::Other("no staged update to install".to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
        }

        // Not awaited: the installer outlives this process
        let child = tokio::process::Command::new(&path).args(&self.install_args).spawn()?;
        component_info!(ComponentId::Updater, "🚀 Launched installer {} (PID: {:?})", path.display(), child.id());

        if let Some(shutdown) = &self.shutdown {
            if shutdown.send(()).is_err() {
                component_warn!(ComponentId::Updater, "Shutdown listener is gone; installer runs alongside this process");
            }
        }
        Ok(())
    }

    async fn discard_staged_update(&self) -> Result<(), ProviderError> {
        self.staged.lock().await.take();
        match tokio::fs::remove_dir_all(&self.staging_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn remove_if_exists(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            component_warn!(ComponentId::Updater, "Could not remove {}: {}", path.display(), e);
        }
    }
}
