//! Service-specific tests

mod http_provider;
