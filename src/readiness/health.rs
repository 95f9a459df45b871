//! Operations endpoint health check

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::StatusCode;
use tracing::debug;

use crate::endpoint::{Endpoint, EndpointResolver};
use crate::{Error, Result};

/// Index of the operations port in every peer and orderer service
const OPERATIONS_PORT_INDEX: usize = 1;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Single-shot health probe of a node
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Succeeds when the node reports healthy
    async fn check(&self, node: &str) -> Result<()>;
}

/// URL of the health endpoint served on `endpoint`
pub fn health_url(endpoint: &Endpoint) -> String {
    format!("http://{}:{}/healthz", endpoint.host, endpoint.port)
}

/// [`HealthCheck`] that GETs `/healthz` on the node's operations port
pub struct HttpHealthCheck {
    resolver: Arc<dyn EndpointResolver>,
    http: reqwest::Client,
}

impl HttpHealthCheck {
    /// Probe endpoints found by `resolver`
    pub fn new(resolver: Arc<dyn EndpointResolver>) -> Result<Self> {
        // operations ports are reached directly, never through a proxy
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .no_proxy()
            .build()?;
        Ok(Self { resolver, http })
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self, node: &str) -> Result<()> {
        let endpoint = self.resolver.resolve(node, OPERATIONS_PORT_INDEX).await?;
        let url = health_url(&endpoint);
        debug!(node = %node, url = %url, "Checking health");

        let status = self.http.get(&url).send().await?.status();
        if status != StatusCode::OK {
            return Err(Error::HealthCheck {
                node: node.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
