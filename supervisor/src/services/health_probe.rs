//! HTTP liveness probe
//!
//! A GET against a fixed path on the service's port. Any 2xx inside the
//! timeout is healthy; every other outcome, including transport errors and
//! malformed responses, is reported as unhealthy.

use async_trait::async_trait;
use std::time::Duration;

use crate::state::ServiceEndpoint;
use crate::traits::HealthProbe;
use shared::{component_debug, ComponentId};

/// Liveness probe over HTTP
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    path: String,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            path: path.into(),
            timeout: Duration::from_secs(2),
        }
    }

    /// Configure the per-request timeout (fluent API)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn probe_url(&self, endpoint: &ServiceEndpoint) -> Option<url::Url> {
        let base = url::Url::parse(&endpoint.url).ok()?;
        base.join(&self.path).ok()
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, endpoint: &ServiceEndpoint) -> bool {
        let Some(url) = self.probe_url(endpoint) else {
            component_debug!(ComponentId::Supervisor, "Invalid health URL for {}{}", endpoint.url, self.path);
            return false;
        };

        match self.client.get(url.clone()).timeout(self.timeout).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                component_debug!(ComponentId::Supervisor, "Health probe {} returned {}", url, response.status());
                false
            }
            Err(e) => {
                component_debug!(ComponentId::Supervisor, "Health probe {} failed: {}", url, e);
                false
            }
        }
    }
}
