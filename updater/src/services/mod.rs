//! Concrete implementations of the updater's injected dependencies

pub mod file_store;
pub mod http_provider;

#[cfg(test)]
mod tests;

pub use file_store::FileStateStore;
pub use http_provider::HttpUpdateProvider;
