//! Encoder model and registry
//!
//! An `Encoder` ties a source id to the transcoding host that serves it (as
//! found in the device directory) and drives that host through the control
//! API.
//!
//! ## Failure policy
//!
//! Control API calls are best-effort. A transport failure is logged with the
//! host and swallowed; the enclosing action carries on with its next step.
//! Nothing is rolled back.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use sigpath_core::{ApiResult, ControlApi, DirectoryApi, EncoderStatus, SourceId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Role a directory device must carry to be used as encoder
pub const ENCODER_ROLE: &str = "encoder";

/// Why a source id has no usable encoder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionFailure {
    /// Directory has no record for the source id
    NoRecord,
    /// Record exists but no encoder device matches the facility filter
    NoEncoder {
        /// Service callsign from the record
        callsign: String,
    },
    /// Matching encoder device has no address
    NoAddress {
        /// Service callsign from the record
        callsign: String,
        /// Device name
        hostname: String,
    },
    /// Directory could not be queried
    Directory(String),
}

impl std::fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionFailure::NoRecord => write!(f, "no directory record"),
            ResolutionFailure::NoEncoder { callsign } => {
                write!(f, "no matching encoder device for {}", callsign)
            }
            ResolutionFailure::NoAddress { hostname, .. } => {
                write!(f, "encoder {} has no public address", hostname)
            }
            ResolutionFailure::Directory(e) => write!(f, "directory lookup failed: {}", e),
        }
    }
}

/// Outcome of a segment rename as interpreted from the control API answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentOutcome {
    /// Answer carried the success marker
    Renamed,
    /// Answer did not carry the marker
    Unconfirmed,
    /// Call never got an answer
    Failed,
}

/// Snapshot of an encoder for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderInfo {
    /// Logical service
    pub source_id: SourceId,
    /// Service callsign
    pub callsign: String,
    /// Public address of the encoder device
    pub ip: String,
    /// VM instance name
    pub hostname: String,
    /// Last known VM status
    pub status: EncoderStatus,
}

/// A transcoding host serving one logical service
pub struct Encoder {
    info: EncoderInfo,
    control: Arc<dyn ControlApi>,
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoder").field("info", &self.info).finish_non_exhaustive()
    }
}

impl Encoder {
    /// Client with the configured timeout
    pub fn new(info: EncoderInfo, control: Arc<dyn ControlApi>) -> Self {
        Self { info, control }
    }

    /// Logical service this encoder serves
    pub fn source_id(&self) -> &SourceId {
        &self.info.source_id
    }

    /// Service callsign from the directory
    pub fn callsign(&self) -> &str {
        &self.info.callsign
    }

    /// Public address used for service calls
    pub fn ip(&self) -> &str {
        &self.info.ip
    }

    /// VM instance name used for VM calls
    pub fn hostname(&self) -> &str {
        &self.info.hostname
    }

    /// Last known VM status
    pub fn status(&self) -> EncoderStatus {
        self.info.status
    }

    /// Encoder UI
    pub fn ui_url(&self) -> String {
        format!("http://{}", self.info.ip)
    }

    /// Log a failed control call and turn it into `None`
    fn tolerate(&self, operation: &str, result: ApiResult<String>) -> Option<String> {
        match result {
            Ok(body) => {
                debug!(host = %self.info.hostname, operation, body = %body.trim(), "Control API answered");
                Some(body)
            }
            Err(e) => {
                warn!(
                    host = %self.info.hostname,
                    ip = %self.info.ip,
                    operation,
                    error = %e,
                    "Control API call failed, continuing"
                );
                None
            }
        }
    }

    /// Ask the control API for the VM status (UNKNOWN when unreachable)
    pub async fn query_status(&self) -> EncoderStatus {
        let result = self.control.vm_status(&self.info.hostname).await;
        self.tolerate("vm_status", result)
            .map(|body| EncoderStatus::parse(&body))
            .unwrap_or(EncoderStatus::Unknown)
    }

    /// Re-query and store the VM status
    pub async fn refresh_status(&mut self) -> EncoderStatus {
        self.info.status = self.query_status().await;
        self.info.status
    }

    /// Issue a VM start; does not wait for it
    pub async fn start_vm(&self) {
        info!(ip = %self.info.ip, host = %self.info.hostname, "▶️  STARTING encoder VM instance");
        let result = self.control.start_vm(&self.info.hostname).await;
        self.tolerate("start_vm", result);
    }

    /// Issue a VM stop; does not wait for it
    pub async fn stop_vm(&self) {
        info!(ip = %self.info.ip, host = %self.info.hostname, "⏹️  STOPPING encoder VM instance");
        let result = self.control.stop_vm(&self.info.hostname).await;
        self.tolerate("stop_vm", result);
    }

    /// Poll the VM status until RUNNING or `budget` is spent
    ///
    /// Returns whether the VM was seen running. A zero `poll` interval makes
    /// this a single check after waiting the whole budget.
    pub async fn wait_for_running(&mut self, budget: Duration, poll: Duration) -> bool {
        let start = Instant::now();

        info!(
            host = %self.info.hostname,
            budget_secs = budget.as_secs(),
            "Waiting for encoder VM to start up"
        );

        if poll.is_zero() {
            tokio::time::sleep(budget).await;
            return self.refresh_status().await.is_running();
        }

        loop {
            if self.refresh_status().await.is_running() {
                info!(
                    host = %self.info.hostname,
                    elapsed_secs = start.elapsed().as_secs_f64(),
                    "Encoder VM instance started: {}",
                    self.ui_url()
                );
                return true;
            }

            if start.elapsed() + poll > budget {
                warn!(
                    host = %self.info.hostname,
                    status = %self.info.status,
                    "Encoder VM did not report RUNNING within its boot budget"
                );
                return false;
            }

            tokio::time::sleep(poll).await;
        }
    }

    /// Start logical service `target` on this encoder
    pub async fn start_service(&self, target: &SourceId) {
        info!(service = %target, ip = %self.info.ip, host = %self.info.hostname, "▶️  STARTING service");
        let result = self.control.start_service(target, &self.info.ip).await;
        self.tolerate("start_service", result);
    }

    /// Stop logical service `target` on this encoder
    pub async fn stop_service(&self, target: &SourceId) {
        info!(service = %target, ip = %self.info.ip, host = %self.info.hostname, "⏹️  STOPPING service");
        let result = self.control.stop_service(target, &self.info.ip).await;
        self.tolerate("stop_service", result);
    }

    /// Have the encoder re-detect PIDs for `target`
    pub async fn reprobe(&self, target: &SourceId) {
        info!(service = %target, host = %self.info.hostname, "Re-probing encoder and setting PIDs");
        let result = self.control.reprobe(target).await;
        self.tolerate("reprobe", result);
    }

    /// Increment muxer segment names; the answer is read after `settle`
    pub async fn rename_segment(&self, settle: Duration, success_marker: &str) -> SegmentOutcome {
        info!(ip = %self.info.ip, host = %self.info.hostname, "Updating segment names");
        let result = self
            .control
            .rename_segment(&self.info.source_id, &self.info.ip)
            .await;

        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        match self.tolerate("rename_segment", result) {
            Some(body) if body.contains(success_marker) => {
                info!(host = %self.info.hostname, "✅ Segment names successfully updated");
                SegmentOutcome::Renamed
            }
            Some(_) => {
                warn!(
                    host = %self.info.hostname,
                    "There was a problem updating segment names. Please verify"
                );
                SegmentOutcome::Unconfirmed
            }
            None => SegmentOutcome::Failed,
        }
    }
}

/// Resolves source ids to encoders through the directory
pub struct EncoderResolver {
    directory: Arc<dyn DirectoryApi>,
    control: Arc<dyn ControlApi>,
    facility_filter: Vec<String>,
}

impl EncoderResolver {
    /// Resolver keeping encoder devices in one of `facility_filter`
    pub fn new(
        directory: Arc<dyn DirectoryApi>,
        control: Arc<dyn ControlApi>,
        facility_filter: Vec<String>,
    ) -> Self {
        Self {
            directory,
            control,
            facility_filter,
        }
    }

    fn in_facility(&self, device_name: &str) -> bool {
        self.facility_filter
            .iter()
            .any(|facility| device_name.contains(facility.as_str()))
    }

    /// Find the encoder serving `source_id` and query its status
    pub async fn resolve(&self, source_id: &SourceId) -> std::result::Result<Encoder, ResolutionFailure> {
        let records = self
            .directory
            .lookup(source_id)
            .await
            .map_err(|e| ResolutionFailure::Directory(e.to_string()))?;

        let record = records.first().ok_or(ResolutionFailure::NoRecord)?;

        let device = record
            .devices
            .iter()
            .find(|d| d.role == ENCODER_ROLE && self.in_facility(&d.name))
            .ok_or_else(|| ResolutionFailure::NoEncoder {
                callsign: record.service.clone(),
            })?;

        let ip = device
            .public_ip
            .clone()
            .filter(|ip| !ip.trim().is_empty())
            .ok_or_else(|| ResolutionFailure::NoAddress {
                callsign: record.service.clone(),
                hostname: device.name.clone(),
            })?;

        let mut encoder = Encoder::new(
            EncoderInfo {
                source_id: source_id.clone(),
                callsign: record.service.clone(),
                ip,
                hostname: device.name.clone(),
                status: EncoderStatus::Unknown,
            },
            self.control.clone(),
        );
        encoder.refresh_status().await;

        debug!(
            source_id = %source_id,
            host = %encoder.hostname(),
            status = %encoder.status(),
            "Resolved encoder"
        );

        Ok(encoder)
    }
}

/// All encoders known for this run
///
/// Source ids that failed to resolve are kept apart: they never take part in
/// an action but still show up in status output.
#[derive(Debug, Default)]
pub struct EncoderRegistry {
    active: BTreeMap<SourceId, Encoder>,
    unresolved: BTreeMap<SourceId, ResolutionFailure>,
}

impl EncoderRegistry {
    /// Resolve every id once
    pub async fn build(resolver: &EncoderResolver, ids: impl IntoIterator<Item = SourceId>) -> Self {
        let mut registry = Self::default();

        for id in ids {
            if registry.active.contains_key(&id) || registry.unresolved.contains_key(&id) {
                continue;
            }
            match resolver.resolve(&id).await {
                Ok(encoder) => {
                    registry.active.insert(id, encoder);
                }
                Err(reason) => {
                    warn!(source_id = %id, reason = %reason, "Excluding source from active registry");
                    registry.unresolved.insert(id, reason);
                }
            }
        }

        info!(
            active = registry.active.len(),
            unresolved = registry.unresolved.len(),
            running = registry.running().len(),
            "Encoder registry built"
        );

        registry
    }

    /// Whether `source_id` resolved
    pub fn contains(&self, source_id: &SourceId) -> bool {
        self.active.contains_key(source_id)
    }

    /// Resolved encoder for `source_id`
    pub fn get(&self, source_id: &SourceId) -> Option<&Encoder> {
        self.active.get(source_id)
    }

    /// Mutable [`get`](Self::get)
    pub fn get_mut(&mut self, source_id: &SourceId) -> Option<&mut Encoder> {
        self.active.get_mut(source_id)
    }

    /// Encoder for `source_id`, or a resolution error naming why it is missing
    pub fn require(&self, source_id: &SourceId) -> Result<&Encoder> {
        self.active
            .get(source_id)
            .ok_or_else(|| missing(&self.unresolved, source_id))
    }

    /// Mutable [`require`](Self::require)
    pub fn require_mut(&mut self, source_id: &SourceId) -> Result<&mut Encoder> {
        let Self { active, unresolved } = self;
        active
            .get_mut(source_id)
            .ok_or_else(|| missing(unresolved, source_id))
    }

    /// Resolved encoders by source id
    pub fn active(&self) -> impl Iterator<Item = &Encoder> {
        self.active.values()
    }

    /// Mutable [`active`](Self::active)
    pub fn active_mut(&mut self) -> impl Iterator<Item = &mut Encoder> {
        self.active.values_mut()
    }

    /// Source ids kept out of actions, with the reason
    pub fn unresolved(&self) -> impl Iterator<Item = (&SourceId, &ResolutionFailure)> {
        self.unresolved.iter()
    }

    /// Encoders whose VM reports RUNNING
    pub fn running(&self) -> Vec<&Encoder> {
        self.active.values().filter(|e| e.status().is_running()).collect()
    }

    /// Encoder owning the VM of the given group (its first resolvable member)
    pub fn vm_owner<'a>(&self, group: &'a [SourceId]) -> Option<&'a SourceId> {
        group.iter().find(|id| self.active.contains_key(*id))
    }
}

fn missing(unresolved: &BTreeMap<SourceId, ResolutionFailure>, source_id: &SourceId) -> OrchestratorError {
    match unresolved.get(source_id) {
        Some(reason) => OrchestratorError::Resolution(format!("{} ({})", source_id, reason)),
        None => OrchestratorError::Resolution(source_id.to_string()),
    }
}
