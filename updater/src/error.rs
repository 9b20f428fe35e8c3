//! Error types for the update workflow

use shared::{classifier::io_category, Categorized, ErrorCategory, SharedError};
use thiserror::Error;

use crate::state::{UpdateOperation, UpdatePhase};

/// Failures reported by an update provider
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Update server returned HTTP {status}")]
    Http { status: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("{0}")]
    Other(String),
}

impl Categorized for ProviderError {
    fn category(&self) -> Option<ErrorCategory> {
        match self {
            ProviderError::Network(_) => Some(ErrorCategory::Network),
            ProviderError::Timeout(_) => Some(ErrorCategory::Timeout),
            ProviderError::Http { status: 408 } => Some(ErrorCategory::Timeout),
            ProviderError::Http { status: 502..=504 } => Some(ErrorCategory::Network),
            ProviderError::Http { .. } => None,
            ProviderError::Io(e) => io_category(e),
            ProviderError::Integrity(_) => Some(ErrorCategory::Integrity),
            ProviderError::Other(_) => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::Http { status: status.as_u16() }
        } else if err.is_connect() || err.is_request() || err.is_body() {
            ProviderError::Network(err.to_string())
        } else {
            ProviderError::Other(err.to_string())
        }
    }
}

/// Update workflow errors
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Update check failed: {message}")]
    UpdateCheckError { message: String, category: ErrorCategory },

    #[error("Update download failed: {message}")]
    UpdateDownloadError { message: String, category: ErrorCategory },

    #[error("Update install failed, remaining on {rolled_back_to}: {message}")]
    UpdateInstallError { message: String, rolled_back_to: String },

    #[error("Rollback failed: {message}")]
    RollbackError { message: String },

    #[error("Cannot {operation} while phase is {phase:?}")]
    InvalidPhase { operation: UpdateOperation, phase: UpdatePhase },

    #[error("State storage error: {0}")]
    Storage(#[from] SharedError),
}

impl Categorized for UpdateError {
    fn category(&self) -> Option<ErrorCategory> {
        match self {
            UpdateError::UpdateCheckError { category, .. } | UpdateError::UpdateDownloadError { category, .. } => {
                Some(*category)
            }
            UpdateError::Storage(SharedError::IoError(e)) => io_category(e),
            _ => None,
        }
    }
}

pub type UpdateResult<T> = Result<T, UpdateError>;
