//! HTTP client for the VM/service control API
//!
//! All calls are `PUT` with an empty body; answers are plain text.

use crate::broadcaster::api_error;
use crate::config::ControlConfig;
use crate::error::Result;
use async_trait::async_trait;
use sigpath_core::{ApiResult, ControlApi, SourceId};
use tracing::debug;

/// Control API reached over HTTP
pub struct HttpControl {
    base_url: String,
    zone: String,
    project: String,
    client: reqwest::Client,
}

impl HttpControl {
    /// Client with the configured timeout
    pub fn new(config: &ControlConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            zone: config.zone.clone(),
            project: config.project.clone(),
            client,
        })
    }

    async fn put(&self, endpoint: &str, query: &[(&str, &str)]) -> ApiResult<String> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(url = %url, ?query, "Control API request");

        let response = self
            .client
            .put(&url)
            .query(query)
            .body("")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| api_error(&url, e))?;

        response.text().await.map_err(|e| api_error(&url, e))
    }

    async fn instance_call(&self, endpoint: &str, hostname: &str) -> ApiResult<String> {
        self.put(
            endpoint,
            &[
                ("instance", hostname),
                ("zone", self.zone.as_str()),
                ("project", self.project.as_str()),
            ],
        )
        .await
    }
}

#[async_trait]
impl ControlApi for HttpControl {
    async fn vm_status(&self, hostname: &str) -> ApiResult<String> {
        self.instance_call("gcpistatus", hostname).await
    }

    async fn start_vm(&self, hostname: &str) -> ApiResult<String> {
        self.instance_call("startgcpi", hostname).await
    }

    async fn stop_vm(&self, hostname: &str) -> ApiResult<String> {
        self.instance_call("stopgcpi", hostname).await
    }

    async fn start_service(&self, source_id: &SourceId, ip: &str) -> ApiResult<String> {
        self.put("start", &[("sid", source_id.as_str()), ("ip", ip)]).await
    }

    async fn stop_service(&self, source_id: &SourceId, ip: &str) -> ApiResult<String> {
        self.put("stop", &[("sid", source_id.as_str()), ("ip", ip)]).await
    }

    async fn reprobe(&self, source_id: &SourceId) -> ApiResult<String> {
        self.put("plant_pid_map", &[("sid", source_id.as_str()), ("thumbs", "FALSE")])
            .await
    }

    async fn rename_segment(&self, source_id: &SourceId, ip: &str) -> ApiResult<String> {
        self.put("cmafsegment", &[("sid", source_id.as_str()), ("ip", ip)]).await
    }
}
