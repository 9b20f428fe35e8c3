//! Shared logging utilities for consistent tracing across the host

use crate::types::ComponentId;
use chrono::{DateTime, Utc};

/// Crates whose events are shown at the configured level
const WORKSPACE_TARGETS: &[&str] = &["host", "supervisor", "updater", "shared"];

/// Build the default filter directive for a base level
pub fn default_filter(log_level: Option<&str>) -> String {
    let base_level = log_level.unwrap_or("info");
    let mut directives: Vec<String> = WORKSPACE_TARGETS
        .iter()
        .map(|target| format!("{target}={base_level}"))
        .collect();
    directives.push("reqwest=warn".to_string());
    directives.push("hyper=warn".to_string());
    directives.join(",")
}

/// Initialize the tracing subscriber with a base log level
///
/// `RUST_LOG` wins over `log_level` when set. Returns `false` if a global
/// subscriber was already installed.
pub fn init_tracing_with_level(log_level: Option<&str>) -> bool {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok()
}

/// Get formatted timestamp for consistent logging
pub fn format_timestamp() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format("%H:%M:%S%.3f").to_string()
}

/// Emit a tracing event tagged with a component and timestamp
#[doc(hidden)]
#[macro_export]
macro_rules! component_event {
    ($level:ident, $component:expr, $($arg:tt)*) => {
        tracing::$level!(
            component = %$component,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        $crate::component_event!(info, $component, $($arg)*);
    };
}

#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        $crate::component_event!(warn, $component, $($arg)*);
    };
}

#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        $crate::component_event!(error, $component, $($arg)*);
    };
}

#[macro_export]
macro_rules! component_debug {
    ($component:expr, $($arg:tt)*) => {
        $crate::component_event!(debug, $component, $($arg)*);
    };
}

pub fn log_startup(component: ComponentId, details: &str) {
    component_info!(component, "🚀 Starting {}", details);
}

pub fn log_shutdown(component: ComponentId, reason: &str) {
    component_info!(component, "🛑 Shutting down: {}", reason);
}

/// Log a failed step with the error attached as a field
pub fn log_error(component: ComponentId, context: &str, error: &dyn std::fmt::Display) {
    component_error!(component, error = %error, "❌ {} failed: {}", context, error);
}

pub fn log_success(component: ComponentId, message: &str) {
    component_info!(component, "✅ {}", message);
}
