// SPDX-License-Identifier: MIT
//! Service-registry tag lookup.
//!
//! Each newly alerting check resolves its service's current tag set with one
//! synchronous request against the agent's service endpoint. A failed lookup
//! yields an empty tag set — tags enrich a notification, they never block one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Resolves a service id to its current tag set.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Tags for `service_id`; empty on lookup failure or unknown service.
    async fn service_tags(&self, service_id: &str) -> Vec<String>;
}

/// Agent service endpoint response — only the fields we consume.
#[derive(Debug, Deserialize)]
struct AgentService {
    #[serde(rename = "Service", default)]
    service: String,
    #[serde(rename = "Tags", default)]
    tags: Vec<String>,
}

/// Registry lookup against the local agent's HTTP API.
pub struct AgentRegistry {
    http: reqwest::Client,
    base: String,
}

impl AgentRegistry {
    pub fn new(address: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            base: address.trim_end_matches('/').to_string(),
        })
    }

    fn service_url(&self, service_id: &str) -> String {
        format!("{}/v1/agent/service/{}", self.base, service_id)
    }

    async fn fetch_tags(&self, service_id: &str) -> Result<Vec<String>> {
        let url = self.service_url(service_id);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("registry request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("registry returned an error status for {url}"))?;
        let service: AgentService = resp
            .json()
            .await
            .with_context(|| format!("malformed registry response from {url}"))?;
        debug!(service = %service.service, tags = ?service.tags, "resolved service tags");
        Ok(service.tags)
    }
}

#[async_trait]
impl ServiceRegistry for AgentRegistry {
    async fn service_tags(&self, service_id: &str) -> Vec<String> {
        if service_id.is_empty() {
            // Node-level checks have no owning service.
            return Vec::new();
        }
        match self.fetch_tags(service_id).await {
            Ok(tags) => tags,
            Err(e) => {
                warn!(service = %service_id, err = %e, "tag lookup failed, proceeding without tags");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_url_shape() {
        let registry = AgentRegistry::new("http://127.0.0.1:8500/").unwrap();
        assert_eq!(
            registry.service_url("web"),
            "http://127.0.0.1:8500/v1/agent/service/web"
        );
    }

    #[tokio::test]
    async fn test_empty_service_id_skips_lookup() {
        // An empty id must not even attempt a request.
        let registry = AgentRegistry::new("http://127.0.0.1:9").unwrap();
        assert!(registry.service_tags("").await.is_empty());
    }
}
