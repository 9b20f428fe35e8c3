//! Shared building blocks for the service host
//!
//! Contains the pieces both lifecycle managers depend on: failure
//! classification, retry backoff, the status event stream, the wall clock
//! abstraction, JSON persistence helpers and process-wide logging setup.

pub mod backoff;
pub mod classifier;
pub mod clock;
pub mod errors;
pub mod events;
pub mod logging;
pub mod persist;
pub mod types;

pub use backoff::BackoffPolicy;
pub use classifier::{Categorized, Classification, ErrorClassifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::*;
pub use events::{StatusBus, Subscription, SubscriptionId};
pub use types::*;
