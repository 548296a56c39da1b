//! HTTP client for the device directory

use crate::broadcaster::api_error;
use crate::config::DirectoryConfig;
use crate::error::Result;
use async_trait::async_trait;
use sigpath_core::{ApiResult, DirectoryApi, ServiceRecord, SourceId};
use tracing::debug;

/// Device directory reached over HTTP
pub struct HttpDirectory {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDirectory {
    /// Client with the configured timeout
    pub fn new(config: &DirectoryConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl DirectoryApi for HttpDirectory {
    /// `GET {base}/devices?source_id=ID`
    async fn lookup(&self, source_id: &SourceId) -> ApiResult<Vec<ServiceRecord>> {
        let url = format!("{}/devices", self.base_url);
        debug!(url = %url, source_id = %source_id, "Directory lookup");

        let response = self
            .client
            .get(&url)
            .query(&[("source_id", source_id.as_str())])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| api_error(&url, e))?;

        response
            .json::<Vec<ServiceRecord>>()
            .await
            .map_err(|e| api_error(&url, e))
    }
}
