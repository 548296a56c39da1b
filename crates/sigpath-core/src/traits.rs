//! Collaborator traits for Sigpath
//!
//! The orchestrator talks to the three remote systems through these
//! interfaces ONLY. The HTTP clients live in the orchestrator crate; tests
//! plug in recording mocks.

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::types::*;

/// Query/mutate stream routing on one broadcaster instance
#[async_trait]
pub trait BroadcasterApi: Send + Sync {
    /// Address the broadcaster is reached at (for logs and UI links)
    fn address(&self) -> &str;

    /// Operator UI of this broadcaster
    fn ui_url(&self) -> String;

    /// All input streams
    async fn list_streams(&self) -> ApiResult<Vec<InputStreamRecord>>;

    /// All outputs with the stream currently feeding each
    async fn list_outputs(&self) -> ApiResult<Vec<OutputRecord>>;

    /// Feed output `output_id` from input `stream_id`
    async fn redirect(&self, output_id: &str, stream_id: &str, flags: RedirectFlags) -> ApiResult<()>;

    /// Enable (`true`) or disable an output
    async fn set_output_enabled(&self, output_id: &str, enabled: bool) -> ApiResult<()>;
}

/// Imperative VM/service control for encoder hosts
///
/// Every call only issues the request; none waits for the effect.
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Raw status word for the VM behind `hostname`
    async fn vm_status(&self, hostname: &str) -> ApiResult<String>;

    async fn start_vm(&self, hostname: &str) -> ApiResult<String>;

    async fn stop_vm(&self, hostname: &str) -> ApiResult<String>;

    /// Start the logical service `source_id` on the encoder at `ip`
    async fn start_service(&self, source_id: &SourceId, ip: &str) -> ApiResult<String>;

    async fn stop_service(&self, source_id: &SourceId, ip: &str) -> ApiResult<String>;

    /// Ask the encoder to re-detect elementary stream PIDs
    async fn reprobe(&self, source_id: &SourceId) -> ApiResult<String>;

    /// Increment the muxer segment names; restarts the service
    async fn rename_segment(&self, source_id: &SourceId, ip: &str) -> ApiResult<String>;
}

/// Resolve source ids to service callsigns and devices
#[async_trait]
pub trait DirectoryApi: Send + Sync {
    async fn lookup(&self, source_id: &SourceId) -> ApiResult<Vec<ServiceRecord>>;
}
