//! HTTP client for one stream-routing broadcaster
//!
//! ```text
//! GET /zixi/streams.json?complete=1
//! GET /zixi/outputs.json?complete=1
//! GET /zixi/redirect_client.json?id=&stream=[&update-remote=1&seamless=1]
//! GET /zixi/edit_output.json?id=&on=0|1
//! ```
//!
//! Every request carries a basic-auth header built from the deployment
//! credentials.

use crate::config::{BroadcasterConfig, Credentials};
use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sigpath_core::{ApiError, ApiResult, BroadcasterApi, InputStreamRecord, OutputRecord, RedirectFlags};
use tracing::debug;

/// Map a reqwest failure onto the collaborator error taxonomy
pub(crate) fn api_error(endpoint: &str, error: reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::Timeout {
            endpoint: endpoint.to_string(),
        }
    } else if let Some(status) = error.status() {
        ApiError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        }
    } else if error.is_decode() {
        ApiError::decode(endpoint, error.to_string())
    } else {
        ApiError::transport(endpoint, error.to_string())
    }
}

#[derive(Deserialize)]
struct StreamsResponse {
    #[serde(default)]
    streams: Vec<InputStreamRecord>,
}

#[derive(Deserialize)]
struct OutputsResponse {
    #[serde(default)]
    outputs: Vec<OutputRecord>,
}

/// Broadcaster reached over HTTP
pub struct HttpBroadcaster {
    address: String,
    base_url: String,
    ui_url: String,
    client: reqwest::Client,
}

impl HttpBroadcaster {
    /// Client for `http://{address}:{port}/zixi`
    pub fn new(config: &BroadcasterConfig, credentials: &Credentials) -> Result<Self> {
        let ui_url = format!("http://{}:{}", config.address, config.port);
        Self::with_base_url(
            &config.address,
            format!("{}/zixi", ui_url),
            ui_url,
            config,
            credentials,
        )
    }

    /// Client against an explicit base URL (`.../zixi`)
    pub fn with_base_url(
        address: &str,
        base_url: String,
        ui_url: String,
        config: &BroadcasterConfig,
        credentials: &Credentials,
    ) -> Result<Self> {
        let token = STANDARD.encode(format!(
            "{}:{}",
            credentials.broadcaster_user, credentials.broadcaster_password
        ));

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Basic {}", token))
            .map_err(|e| OrchestratorError::config(format!("invalid credentials: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            address: address.to_string(),
            base_url,
            ui_url,
            client,
        })
    }

    async fn send(&self, endpoint: &str, query: &[(&str, &str)]) -> ApiResult<(String, reqwest::Response)> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(broadcaster = %self.address, url = %url, ?query, "Broadcaster request");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| api_error(&url, e))?;
        Ok((url, response))
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, &str)]) -> ApiResult<T> {
        let (url, response) = self.send(endpoint, query).await?;
        response.json::<T>().await.map_err(|e| api_error(&url, e))
    }

    /// Mutation; only the status code matters
    async fn call(&self, endpoint: &str, query: &[(&str, &str)]) -> ApiResult<()> {
        self.send(endpoint, query).await.map(|_| ())
    }
}

#[async_trait]
impl BroadcasterApi for HttpBroadcaster {
    fn address(&self) -> &str {
        &self.address
    }

    fn ui_url(&self) -> String {
        self.ui_url.clone()
    }

    async fn list_streams(&self) -> ApiResult<Vec<InputStreamRecord>> {
        let response: StreamsResponse = self.get("streams.json", &[("complete", "1")]).await?;
        Ok(response.streams)
    }

    async fn list_outputs(&self) -> ApiResult<Vec<OutputRecord>> {
        let response: OutputsResponse = self.get("outputs.json", &[("complete", "1")]).await?;
        Ok(response.outputs)
    }

    async fn redirect(&self, output_id: &str, stream_id: &str, flags: RedirectFlags) -> ApiResult<()> {
        let mut query = vec![("id", output_id), ("stream", stream_id)];
        if flags.update_remote {
            query.push(("update-remote", "1"));
        }
        if flags.seamless {
            query.push(("seamless", "1"));
        }
        self.call("redirect_client.json", &query).await
    }

    async fn set_output_enabled(&self, output_id: &str, enabled: bool) -> ApiResult<()> {
        let on = if enabled { "1" } else { "0" };
        self.call("edit_output.json", &[("id", output_id), ("on", on)]).await
    }
}
