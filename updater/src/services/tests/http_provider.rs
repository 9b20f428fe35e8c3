use sha2::{Digest, Sha256};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::mpsc;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::error::ProviderError;
use crate::services::HttpUpdateProvider;
use crate::state::UpdateInfo;
use crate::traits::UpdateProvider;

const ARTIFACT: &[u8] = b"#!/bin/sh\nexit 0\n";

fn feed_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}/releases/latest.json", server.uri())).unwrap()
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn drain(mut rx: mpsc::UnboundedReceiver<u8>) -> Vec<u8> {
    let mut values = Vec::new();
    while let Ok(value) = rx.try_recv() {
        values.push(value);
    }
    values
}

#[tokio::test]
async fn test_manifest_becomes_update_info() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/releases/latest.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "version": "2.0.0",
            "url": "app-2.0.0.bin",
            "sha256": "abc123",
            "notes": "Faster startup"
        })))
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let provider = HttpUpdateProvider::new(feed_url(&server), dir.path());

    let info = provider.check_for_updates().await.unwrap().unwrap();

    assert_eq!(info.version, "2.0.0");
    assert_eq!(info.download_url.as_deref(), Some("app-2.0.0.bin"));
    assert_eq!(info.sha256.as_deref(), Some("abc123"));
    assert_eq!(info.release_notes.as_deref(), Some("Faster startup"));
}

#[tokio::test]
async fn test_missing_feed_means_no_update() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let provider = HttpUpdateProvider::new(feed_url(&server), dir.path());

    assert!(provider.check_for_updates().await.unwrap().is_none());
}

#[tokio::test]
async fn test_gateway_error_is_typed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let provider = HttpUpdateProvider::new(feed_url(&server), dir.path());

    let err = provider.check_for_updates().await.unwrap_err();

    assert!(matches!(err, ProviderError::Http { status: 503 }), "{err:?}");
}

#[tokio::test]
async fn test_slow_feed_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let provider = HttpUpdateProvider::new(feed_url(&server), dir.path())
        .with_timeouts(Duration::from_millis(200), Duration::from_secs(5));

    let err = provider.check_for_updates().await.unwrap_err();

    assert!(matches!(err, ProviderError::Timeout(_)), "{err:?}");
}

#[tokio::test]
async fn test_download_stages_verified_artifact() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/releases/app-2.0.0.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(ARTIFACT))
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let staging = dir.path().join("staging");
    let provider = HttpUpdateProvider::new(feed_url(&server), &staging);
    let mut info = UpdateInfo::new("2.0.0");
    info.download_url = Some("app-2.0.0.bin".into());
    info.sha256 = Some(digest(ARTIFACT).to_uppercase());

    let (tx, rx) = mpsc::unbounded_channel();
    provider.download_update(&info, tx).await.unwrap();

    let staged = provider.staged_artifact().await.unwrap();
    assert_eq!(staged, staging.join("app-2.0.0.bin"));
    assert_eq!(std::fs::read(&staged).unwrap(), ARTIFACT);

    let progress = drain(rx);
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_digest_mismatch_is_an_integrity_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(ARTIFACT))
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let provider = HttpUpdateProvider::new(feed_url(&server), dir.path());
    let mut info = UpdateInfo::new("2.0.0");
    info.download_url = Some(format!("{}/artifacts/app.bin", server.uri()));
    info.sha256 = Some(digest(b"something else"));

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = provider.download_update(&info, tx).await.unwrap_err();

    assert!(matches!(err, ProviderError::Integrity(_)), "{err:?}");
    assert!(provider.staged_artifact().await.is_none());
    assert!(!dir.path().join("app.bin").exists());
}

#[tokio::test]
async fn test_install_without_staged_update_fails() {
    let dir = tempdir().unwrap();
    let provider = HttpUpdateProvider::new(Url::parse("http://127.0.0.1:1/feed.json").unwrap(), dir.path());

    assert!(matches!(provider.quit_and_install().await, Err(ProviderError::Other(_))));
}

#[tokio::test]
async fn test_discard_removes_staging_directory() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(ARTIFACT))
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let staging = dir.path().join("staging");
    let provider = HttpUpdateProvider::new(feed_url(&server), &staging);
    let mut info = UpdateInfo::new("2.0.0");
    info.download_url = Some("app.bin".into());

    let (tx, _rx) = mpsc::unbounded_channel();
    provider.download_update(&info, tx).await.unwrap();
    assert!(staging.exists());

    provider.discard_staged_update().await.unwrap();

    assert!(!staging.exists());
    assert!(provider.staged_artifact().await.is_none());
    // Nothing left to discard
    provider.discard_staged_update().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_install_launches_artifact_and_signals_shutdown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(ARTIFACT))
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();
    let provider = HttpUpdateProvider::new(feed_url(&server), dir.path()).with_shutdown_signal(shutdown_tx);
    let mut info = UpdateInfo::new("2.0.0");
    info.download_url = Some("installer.sh".into());

    let (tx, _rx) = mpsc::unbounded_channel();
    provider.download_update(&info, tx).await.unwrap();
    provider.quit_and_install().await.unwrap();

    assert_eq!(shutdown_rx.try_recv(), Ok(()));
}
