//! Failure classification shared by both lifecycle managers
//!
//! Errors raised inside the host carry their category directly through
//! [`Categorized`]. Only failures that cross an opaque boundary (a child's raw
//! stderr, an error string from a third-party library) fall back to message
//! matching.

use serde::{Deserialize, Serialize};

use crate::types::ErrorCategory;

/// Errors that may know their own category
///
/// Returning `None` asks the classifier to inspect the rendered message.
pub trait Categorized: std::fmt::Display {
    fn category(&self) -> Option<ErrorCategory> {
        None
    }
}

impl Categorized for str {}
impl Categorized for String {}

/// Result of classifying a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: ErrorCategory,
    pub retryable: bool,
}

const DISK_MARKERS: &[&str] = &["enospc", "no space left", "disk full", "not enough space", "quota exceeded"];
const PERMISSION_MARKERS: &[&str] = &["eacces", "eperm", "permission denied", "access denied", "operation not permitted"];
const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "etimedout", "deadline exceeded"];
const NETWORK_MARKERS: &[&str] = &[
    "network",
    "econnrefused",
    "connection refused",
    "econnreset",
    "connection reset",
    "enotfound",
    "getaddrinfo",
    "dns",
    "socket hang up",
    "host unreachable",
    "bad gateway",
    "service unavailable",
];
const GATEWAY_STATUS_CODES: &[&str] = &["502", "503", "504"];
const INTEGRITY_MARKERS: &[&str] = &["checksum", "sha256", "sha512", "signature", "integrity", "digest mismatch"];

/// Maps raw failures onto an [`ErrorCategory`] and a retry decision
#[derive(Debug, Clone, Copy)]
pub struct ErrorClassifier {
    retry_unknown: bool,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    /// Classifier with the optimistic default: unknown failures are retryable
    pub fn new() -> Self {
        Self { retry_unknown: true }
    }

    /// Configure whether unclassified failures are retried (fluent API)
    pub fn with_retry_unknown(mut self, retry_unknown: bool) -> Self {
        self.retry_unknown = retry_unknown;
        self
    }

    /// Classify an error, preferring the category it carries itself
    pub fn classify<E: Categorized + ?Sized>(&self, error: &E) -> Classification {
        match error.category() {
            Some(category) => self.for_category(category),
            None => self.classify_message(&error.to_string()),
        }
    }

    /// Classify an opaque failure message by its content
    pub fn classify_message(&self, message: &str) -> Classification {
        let lowered = message.to_lowercase();
        let category = if contains_any(&lowered, DISK_MARKERS) {
            ErrorCategory::Disk
        } else if contains_any(&lowered, PERMISSION_MARKERS) {
            ErrorCategory::Permission
        } else if contains_any(&lowered, TIMEOUT_MARKERS) {
            ErrorCategory::Timeout
        } else if contains_any(&lowered, NETWORK_MARKERS) || has_status_token(&lowered, GATEWAY_STATUS_CODES) {
            ErrorCategory::Network
        } else if contains_any(&lowered, INTEGRITY_MARKERS) {
            ErrorCategory::Integrity
        } else {
            ErrorCategory::Unknown
        };
        self.for_category(category)
    }

    /// Retry decision for an already known category
    pub fn for_category(&self, category: ErrorCategory) -> Classification {
        let retryable = match category {
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Integrity => true,
            ErrorCategory::Disk | ErrorCategory::Permission => false,
            ErrorCategory::Unknown => self.retry_unknown,
        };
        Classification { category, retryable }
    }
}

/// Category implied by an I/O error kind, if the kind is specific enough
///
/// Kinds without a clear mapping return `None` so the rendered OS message
/// (e.g. "No space left on device") can still be matched.
pub fn io_category(error: &std::io::Error) -> Option<ErrorCategory> {
    use std::io::ErrorKind;

    match error.kind() {
        ErrorKind::PermissionDenied => Some(ErrorCategory::Permission),
        ErrorKind::TimedOut => Some(ErrorCategory::Timeout),
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::AddrNotAvailable => Some(ErrorCategory::Network),
        ErrorKind::InvalidData | ErrorKind::UnexpectedEof => Some(ErrorCategory::Integrity),
        _ => None,
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

// Status codes only count as standalone tokens so "port 5020" is not a 502.
fn has_status_token(haystack: &str, codes: &[&str]) -> bool {
    haystack
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| codes.contains(&token))
}
