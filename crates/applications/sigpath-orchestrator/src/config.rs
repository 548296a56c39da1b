//! Deployment configuration
//!
//! One YAML file describes a deployment: the broadcaster pair, the control
//! and directory endpoints, which routing policy the broadcasters need and
//! which steps the start/stop sequences include. Broadcaster credentials live
//! in a separate file so the deployment file can be shared.

use crate::action::ActionKind;
use crate::error::{OrchestratorError, Result};
use crate::path::{InputTransform, RedirectPolicy};
use serde::{Deserialize, Serialize};
use sigpath_core::SourceId;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment override for the broadcaster user
pub const ENV_BROADCASTER_USER: &str = "SIGPATH_BROADCASTER_USER";

/// Environment override for the broadcaster password
pub const ENV_BROADCASTER_PASSWORD: &str = "SIGPATH_BROADCASTER_PASSWORD";

/// Full deployment description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Human name shown in the status header
    #[serde(default = "default_name")]
    pub name: String,

    /// Primary path broadcaster
    pub primary: BroadcasterConfig,

    /// Backup path broadcaster
    pub backup: BroadcasterConfig,

    /// VM/service control API
    pub control: ControlConfig,

    /// Device directory API
    pub directory: DirectoryConfig,

    /// How endpoints are materialized and routed
    #[serde(default)]
    pub routing: RoutingConfig,

    /// How the input for a start/switch is chosen
    #[serde(default)]
    pub input_selection: InputSelection,

    /// Extra steps of the start sequence
    #[serde(default)]
    pub start: StartConfig,

    /// Extra steps of the stop sequence
    #[serde(default)]
    pub stop: StopConfig,

    /// Source ids sharing one physical VM; the first entry owns the VM
    #[serde(default)]
    pub vm_groups: Vec<Vec<SourceId>>,

    /// Actions offered in the interactive menu, in display order
    #[serde(default = "default_actions")]
    pub actions: Vec<ActionKind>,

    /// Non-interactive invocation settings
    #[serde(default)]
    pub unattended: UnattendedConfig,

    /// Settle intervals
    #[serde(default)]
    pub settle: SettleConfig,

    /// Substring the control API puts in a successful segment-rename answer
    #[serde(default = "default_segment_success_marker")]
    pub segment_success_marker: String,

    /// Directory for the rolling log file (stdout only when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_name() -> String {
    "sigpath".to_string()
}

fn default_actions() -> Vec<ActionKind> {
    vec![
        ActionKind::Start,
        ActionKind::Stop,
        ActionKind::Switch,
        ActionKind::Segment,
        ActionKind::Exit,
    ]
}

fn default_segment_success_marker() -> String {
    "successfully".to_string()
}

/// One broadcaster instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcasterConfig {
    /// Host or IP
    pub address: String,

    /// API and UI port
    #[serde(default = "default_broadcaster_port")]
    pub port: u16,

    /// Request timeout
    #[serde(default = "default_broadcaster_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_broadcaster_port() -> u16 {
    4444
}

fn default_broadcaster_timeout_secs() -> u64 {
    10
}

impl BroadcasterConfig {
    /// Defaults for everything but the address
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: default_broadcaster_port(),
            timeout_secs: default_broadcaster_timeout_secs(),
        }
    }

    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// VM/service control API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Base URL, e.g. `http://10.0.0.5/jane`
    pub base_url: String,

    /// Zone the encoder VMs live in
    pub zone: String,

    /// Cloud project of the encoder VMs
    pub project: String,

    /// Request timeout
    #[serde(default = "default_control_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_control_timeout_secs() -> u64 {
    20
}

impl ControlConfig {
    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Device directory API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Base URL, e.g. `https://directory.example/api/v2/services`
    pub base_url: String,

    /// An encoder device is eligible when its name contains one of these
    #[serde(default = "default_facility_filter")]
    pub facility_filter: Vec<String>,

    /// Request timeout
    #[serde(default = "default_directory_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_facility_filter() -> Vec<String> {
    vec!["east".to_string()]
}

fn default_directory_timeout_secs() -> u64 {
    10
}

impl DirectoryConfig {
    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Endpoint materialization and routing policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Redirect variant the broadcasters require
    #[serde(default)]
    pub redirect: RedirectPolicy,

    /// Maps a primary input selector to the backup path's selector
    #[serde(default)]
    pub backup_input: InputTransform,

    /// Keep only input streams whose id contains this tag
    #[serde(default)]
    pub input_tag: Option<String>,

    /// Keep only outputs for these source ids (all outputs when unset)
    #[serde(default)]
    pub output_allow_list: Option<Vec<SourceId>>,

    /// Source ids whose input and output are permanently identical
    #[serde(default)]
    pub static_mappings: Vec<SourceId>,
}

/// How the input of a start/switch is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSelection {
    /// Operator picks from the primary path's inputs
    #[default]
    Prompt,
    /// The input keyed by the target's own source id
    MatchTarget,
}

/// Optional steps of the start sequence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartConfig {
    /// Reprobe after the service starts
    #[serde(default)]
    pub reprobe_after_start: bool,

    /// Increment segment names once the VM has booted
    #[serde(default)]
    pub rename_segment_after_vm_start: bool,

    /// Launch the broadcaster and encoder UIs once the service is up
    #[serde(default)]
    pub open_ui: bool,
}

/// Optional steps of the stop sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopConfig {
    /// `stop` also shuts the VM down after its services
    #[serde(default = "default_true")]
    pub stop_vm_with_service: bool,
}

fn default_true() -> bool {
    true
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            stop_vm_with_service: true,
        }
    }
}

/// Non-interactive invocation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnattendedConfig {
    /// Source ids accepted on the command line
    #[serde(default)]
    pub services: Vec<SourceId>,

    /// Fixed primary input selector per source id
    #[serde(default)]
    pub inputs: BTreeMap<SourceId, String>,
}

/// Settle intervals, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleConfig {
    /// Budget for a started VM to report RUNNING
    #[serde(default = "default_vm_boot_secs")]
    pub vm_boot_secs: u64,

    /// Status polling interval while waiting for a VM
    #[serde(default = "default_vm_poll_secs")]
    pub vm_poll_secs: u64,

    /// Wait before issuing a service start
    #[serde(default = "default_service_start_secs")]
    pub service_start_secs: u64,

    /// Quiesced output stays off this long after a redirect
    #[serde(default = "default_quiesce_secs")]
    pub quiesce_secs: u64,

    /// Wait between routing the primary and the backup path
    #[serde(default)]
    pub between_paths_secs: u64,

    /// Wait after a switch before reprobing
    #[serde(default = "default_reprobe_secs")]
    pub reprobe_secs: u64,

    /// Wait after a segment rename before reading its answer
    #[serde(default = "default_segment_check_secs")]
    pub segment_check_secs: u64,
}

fn default_vm_boot_secs() -> u64 {
    90
}

fn default_vm_poll_secs() -> u64 {
    5
}

fn default_service_start_secs() -> u64 {
    10
}

fn default_quiesce_secs() -> u64 {
    10
}

fn default_reprobe_secs() -> u64 {
    15
}

fn default_segment_check_secs() -> u64 {
    3
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            vm_boot_secs: default_vm_boot_secs(),
            vm_poll_secs: default_vm_poll_secs(),
            service_start_secs: default_service_start_secs(),
            quiesce_secs: default_quiesce_secs(),
            between_paths_secs: 0,
            reprobe_secs: default_reprobe_secs(),
            segment_check_secs: default_segment_check_secs(),
        }
    }
}

impl SettleConfig {
    /// No waiting at all
    pub fn none() -> Self {
        Self {
            vm_boot_secs: 0,
            vm_poll_secs: 0,
            service_start_secs: 0,
            quiesce_secs: 0,
            between_paths_secs: 0,
            reprobe_secs: 0,
            segment_check_secs: 0,
        }
    }

    /// VM boot budget
    pub fn vm_boot(&self) -> Duration {
        Duration::from_secs(self.vm_boot_secs)
    }

    /// VM status polling interval
    pub fn vm_poll(&self) -> Duration {
        Duration::from_secs(self.vm_poll_secs)
    }

    /// Wait before a service start
    pub fn service_start(&self) -> Duration {
        Duration::from_secs(self.service_start_secs)
    }

    /// Quiesced output off-time
    pub fn quiesce(&self) -> Duration {
        Duration::from_secs(self.quiesce_secs)
    }

    /// Unattended runs only
    pub fn between_paths(&self) -> Duration {
        Duration::from_secs(self.between_paths_secs)
    }

    /// Wait before a reprobe
    pub fn reprobe(&self) -> Duration {
        Duration::from_secs(self.reprobe_secs)
    }

    /// Wait before checking a segment rename
    pub fn segment_check(&self) -> Duration {
        Duration::from_secs(self.segment_check_secs)
    }
}

impl DeploymentConfig {
    /// Load and validate a deployment file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading deployment config");

        let raw = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Parse and validate a deployment from YAML text
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run safely
    pub fn validate(&self) -> Result<()> {
        if self.primary.address.trim().is_empty() || self.backup.address.trim().is_empty() {
            return Err(OrchestratorError::config(
                "both primary and backup broadcaster addresses are required",
            ));
        }

        if self.primary.address == self.backup.address && self.primary.port == self.backup.port {
            return Err(OrchestratorError::config(
                "primary and backup must be different broadcasters",
            ));
        }

        if let Some(group) = self.vm_groups.iter().find(|g| g.is_empty()) {
            return Err(OrchestratorError::config(format!(
                "empty VM group in configuration: {:?}",
                group
            )));
        }

        for (i, group) in self.vm_groups.iter().enumerate() {
            for other in &self.vm_groups[i + 1..] {
                if let Some(shared) = group.iter().find(|id| other.contains(id)) {
                    return Err(OrchestratorError::config(format!(
                        "{} is listed in more than one VM group",
                        shared
                    )));
                }
            }
        }

        if let Some(id) = self
            .unattended
            .inputs
            .keys()
            .find(|id| !self.unattended.services.contains(id))
        {
            return Err(OrchestratorError::config(format!(
                "unattended input mapping for {} which is not an unattended service",
                id
            )));
        }

        if self.actions.is_empty() {
            return Err(OrchestratorError::config("at least one action must be offered"));
        }

        Ok(())
    }

    /// Members of the VM group `source_id` belongs to (just itself when ungrouped)
    ///
    /// The first element is the service whose encoder owns the VM.
    pub fn vm_group_of(&self, source_id: &SourceId) -> Vec<SourceId> {
        self.vm_groups
            .iter()
            .find(|group| group.contains(source_id))
            .cloned()
            .unwrap_or_else(|| vec![source_id.clone()])
    }

    /// True when `source_id` never needs a routing decision
    pub fn is_static(&self, source_id: &SourceId) -> bool {
        self.routing.static_mappings.contains(source_id)
    }
}

/// Broadcaster basic-auth credentials
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// Broadcaster API user
    #[serde(default)]
    pub broadcaster_user: String,

    /// Broadcaster API password
    #[serde(default)]
    pub broadcaster_password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("broadcaster_user", &self.broadcaster_user)
            .field("broadcaster_password", &"***")
            .finish()
    }
}

impl Credentials {
    /// Client with the configured timeout
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            broadcaster_user: user.into(),
            broadcaster_password: password.into(),
        }
    }

    /// Read the credentials file (if any), then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut credentials = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&raw)?
            }
            Some(path) => {
                debug!(path = %path.display(), "Credentials file not found, using environment");
                Self::default()
            }
            None => Self::default(),
        };

        if let Ok(user) = std::env::var(ENV_BROADCASTER_USER) {
            credentials.broadcaster_user = user;
        }
        if let Ok(password) = std::env::var(ENV_BROADCASTER_PASSWORD) {
            credentials.broadcaster_password = password;
        }

        if credentials.broadcaster_user.is_empty() {
            return Err(OrchestratorError::config(format!(
                "no broadcaster user configured (credentials file or {})",
                ENV_BROADCASTER_USER
            )));
        }

        Ok(credentials)
    }
}
