//! Self-update coordination
//!
//! Drives the check, download and install cycle against an injected update
//! provider. Check and download failures are classified and retried with
//! exponential backoff; repeated failures suspend the periodic check for a
//! day; a failed install rolls the bookkeeping back to the running version.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod services;
pub mod state;
pub mod traits;

// Re-export commonly used types
pub use config::UpdaterConfig;
pub use coordinator::UpdateCoordinator;
pub use error::{ProviderError, UpdateError, UpdateResult};
pub use services::{FileStateStore, HttpUpdateProvider};
pub use state::{ErrorHistory, ErrorRecord, UpdateBackup, UpdateEvent, UpdateInfo, UpdateOperation, UpdatePhase, UpdateState};
pub use traits::{StateStore, UpdateProvider};
