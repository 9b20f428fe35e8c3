//! Service implementations
//!
//! Real implementations of the supervisor's traits plus the port allocator.
//! These handle the actual I/O: sockets, child processes and HTTP probes.

pub mod health_probe;
pub mod port_allocator;
pub mod process_manager;
pub mod process_output_handler;

#[cfg(test)]
mod tests;

// Re-export all service implementations
pub use health_probe::HttpHealthProbe;
pub use port_allocator::PortAllocator;
pub use process_manager::{ChildService, TokioProcessLauncher};
