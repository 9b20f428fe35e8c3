//! Small JSON file persistence helpers
//!
//! Writes go to a sibling temp file first and are renamed into place, so a
//! crash mid-write leaves the previous contents intact.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::errors::SharedResult;

/// Read and decode `path`; a missing file is `Ok(None)`
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> SharedResult<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Encode `value` and atomically replace `path` with it
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> SharedResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let content = serde_json::to_vec_pretty(value)?;
    let tmp = temp_path(path);
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Remove `path`, treating an already missing file as success
pub async fn remove_file_if_exists(path: &Path) -> SharedResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
