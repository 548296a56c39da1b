//! Path model: one broadcaster of the redundant pair
//!
//! A `PathModel` owns the client for one broadcaster, its materialized view
//! of inputs and outputs, and the input/output selected for the pending
//! operator action.
//!
//! ## Routing
//!
//! A route is only issued when the selected output is currently fed by a
//! different stream than the selected input. Two redirect variants exist:
//!
//! ```text
//! Seamless:  redirect(seamless, update-remote)
//! Quiesce:   disable output ─> redirect ─> settle ─> enable output
//! ```
//!
//! Which one applies is a property of the deployment, not of the call site.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use sigpath_core::{ApiError, BroadcasterApi, RedirectFlags, SourceId, StreamEndpoint};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which side of the redundant pair a path is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathRole {
    /// Main broadcaster
    Primary,
    /// Redundant broadcaster
    Backup,
}

impl std::fmt::Display for PathRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathRole::Primary => write!(f, "PRIMARY"),
            PathRole::Backup => write!(f, "BACKUP"),
        }
    }
}

/// Redirect variant required by the broadcasters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectPolicy {
    /// Direct redirect keeping the output live
    #[default]
    Seamless,
    /// Output is switched off around the redirect
    Quiesce,
}

/// Maps the primary path's input selector to the backup path's
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputTransform {
    /// Both paths use the same selector
    #[default]
    Identity,
    /// Substring substitution, e.g. `PRI` -> `BCK`
    Replace {
        /// Substring in the primary's stream id
        from: String,
        /// Replacement on the backup
        to: String,
    },
}

impl InputTransform {
    /// Backup selector for `selector`
    pub fn apply(&self, selector: &str) -> String {
        match self {
            InputTransform::Identity => selector.to_string(),
            InputTransform::Replace { from, to } => selector.replace(from.as_str(), to),
        }
    }
}

type EndpointPredicate = Arc<dyn Fn(&StreamEndpoint) -> bool + Send + Sync>;

/// Decides which endpoints of a broadcaster are relevant to this deployment
#[derive(Clone)]
pub struct EndpointFilters {
    input: EndpointPredicate,
    output: EndpointPredicate,
}

impl EndpointFilters {
    /// Keep every input and output
    pub fn all() -> Self {
        Self::new(|_| true, |_| true)
    }

    /// Filters from two predicates
    pub fn new(
        input: impl Fn(&StreamEndpoint) -> bool + Send + Sync + 'static,
        output: impl Fn(&StreamEndpoint) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            input: Arc::new(input),
            output: Arc::new(output),
        }
    }

    /// Inputs containing `input_tag`, outputs in `allow_list` (either optional)
    pub fn from_rules(input_tag: Option<String>, allow_list: Option<Vec<SourceId>>) -> Self {
        Self::new(
            move |endpoint| {
                input_tag
                    .as_deref()
                    .is_none_or(|tag| endpoint.stream_id.contains(tag))
            },
            move |endpoint| {
                allow_list
                    .as_ref()
                    .is_none_or(|allowed| allowed.contains(&endpoint.source_id))
            },
        )
    }

    /// Input passes the filter
    pub fn keeps_input(&self, endpoint: &StreamEndpoint) -> bool {
        (self.input)(endpoint)
    }

    /// Output passes the filter
    pub fn keeps_output(&self, endpoint: &StreamEndpoint) -> bool {
        (self.output)(endpoint)
    }
}

impl std::fmt::Debug for EndpointFilters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointFilters").finish_non_exhaustive()
    }
}

/// Result of one routing attempt on one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteOutcome {
    /// Output already fed by the selected input
    Skipped,
    /// Redirect accepted by the broadcaster
    Applied,
    /// Redirect failed; the output keeps its previous feed
    Failed(String),
}

impl RouteOutcome {
    /// Redirect was rejected or unreachable
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// `INPUT --> OUTPUT` line for operator confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingLine {
    /// Path the line describes
    pub role: PathRole,
    /// Input stream id
    pub input: String,
    /// Output display name
    pub output: String,
}

impl std::fmt::Display for MappingLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<8}  {}  -->  {}",
            format!("{}:", self.role),
            self.input,
            self.output
        )
    }
}

/// One redundant path
pub struct PathModel {
    role: PathRole,
    client: Arc<dyn BroadcasterApi>,
    policy: RedirectPolicy,
    quiesce_settle: Duration,

    /// Inputs keyed by stream id
    inputs: BTreeMap<String, StreamEndpoint>,

    /// Outputs keyed by source id
    outputs: BTreeMap<SourceId, StreamEndpoint>,

    /// Stream id of the selected input
    selected_input: Option<String>,

    selected_output: Option<SourceId>,
}

impl PathModel {
    /// Unloaded path; call [`load`](Self::load) before selecting
    pub fn new(role: PathRole, client: Arc<dyn BroadcasterApi>, policy: RedirectPolicy) -> Self {
        Self {
            role,
            client,
            policy,
            quiesce_settle: Duration::ZERO,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            selected_input: None,
            selected_output: None,
        }
    }

    /// Set how long a quiesced output stays off after the redirect
    pub fn with_quiesce_settle(mut self, settle: Duration) -> Self {
        self.quiesce_settle = settle;
        self
    }

    /// Side of the pair
    pub fn role(&self) -> PathRole {
        self.role
    }

    /// Broadcaster host
    pub fn address(&self) -> &str {
        self.client.address()
    }

    /// Broadcaster UI
    pub fn ui_url(&self) -> String {
        self.client.ui_url()
    }

    /// Materialize the endpoints relevant to this deployment
    ///
    /// Replaces any previously loaded view. Outputs whose names do not carry
    /// a source id are ignored; when two outputs share a source id the later
    /// one wins.
    pub async fn load(&mut self, filters: &EndpointFilters) -> Result<()> {
        let streams = self.client.list_streams().await?;
        let outputs = self.client.list_outputs().await?;

        self.inputs = streams
            .iter()
            .filter_map(StreamEndpoint::input)
            .filter(|endpoint| filters.keeps_input(endpoint))
            .map(|endpoint| (endpoint.stream_id.clone(), endpoint))
            .collect();

        self.outputs = outputs
            .iter()
            .filter_map(StreamEndpoint::output)
            .filter(|endpoint| filters.keeps_output(endpoint))
            .map(|endpoint| (endpoint.source_id.clone(), endpoint))
            .collect();

        info!(
            path = %self.role,
            broadcaster = %self.address(),
            inputs = self.inputs.len(),
            outputs = self.outputs.len(),
            "Loaded broadcaster endpoints"
        );

        Ok(())
    }

    /// Loaded inputs in stream id order
    pub fn inputs(&self) -> impl Iterator<Item = &StreamEndpoint> {
        self.inputs.values()
    }

    /// Loaded outputs in source id order
    pub fn outputs(&self) -> impl Iterator<Item = &StreamEndpoint> {
        self.outputs.values()
    }

    /// Output endpoint for `source_id`
    pub fn output(&self, source_id: &SourceId) -> Option<&StreamEndpoint> {
        self.outputs.get(source_id)
    }

    /// Whether an input with exactly this stream id is loaded
    pub fn has_input(&self, stream_id: &str) -> bool {
        self.inputs.contains_key(stream_id)
    }

    /// Resolve an operator/config input selector on this path
    ///
    /// An exact stream id wins; otherwise the selector is a source id and the
    /// last stream (in sorted order) carrying it is used.
    pub fn resolve_input(&self, selector: &str) -> Option<&StreamEndpoint> {
        let selector = selector.trim();
        if let Some(endpoint) = self.inputs.get(selector) {
            return Some(endpoint);
        }

        let key = SourceId::new(selector);
        self.inputs.values().filter(|e| e.source_id == key).last()
    }

    /// Select input and output for the pending action
    pub fn select(&mut self, input_selector: &str, output: &SourceId) -> Result<()> {
        let input = self
            .resolve_input(input_selector)
            .ok_or_else(|| {
                OrchestratorError::validation(format!(
                    "input {} does not exist on the {} broadcaster ({})",
                    input_selector,
                    self.role,
                    self.address()
                ))
            })?
            .stream_id
            .clone();

        if !self.outputs.contains_key(output) {
            return Err(OrchestratorError::validation(format!(
                "output {} does not exist on the {} broadcaster ({})",
                output,
                self.role,
                self.address()
            )));
        }

        debug!(path = %self.role, input = %input, output = %output, "Selected mapping");
        self.selected_input = Some(input);
        self.selected_output = Some(output.clone());
        Ok(())
    }

    /// Select an output together with the input currently feeding it
    pub fn select_current(&mut self, output: &SourceId) -> Result<()> {
        let current = self
            .outputs
            .get(output)
            .ok_or_else(|| {
                OrchestratorError::validation(format!(
                    "output {} does not exist on the {} broadcaster",
                    output, self.role
                ))
            })?
            .stream_id
            .clone();

        self.selected_input = Some(current);
        self.selected_output = Some(output.clone());
        Ok(())
    }

    /// Forget the pending selection
    pub fn clear_selection(&mut self) {
        self.selected_input = None;
        self.selected_output = None;
    }

    /// Stream id of the selected input
    pub fn selected_input(&self) -> Option<&str> {
        self.selected_input.as_deref()
    }

    /// Source id of the selected output
    pub fn selected_output(&self) -> Option<&SourceId> {
        self.selected_output.as_ref()
    }

    /// True iff `output` is fed by something other than `input`
    pub fn needs_routing(input_stream_id: &str, output: &StreamEndpoint) -> bool {
        output.stream_id != input_stream_id
    }

    /// `needs_routing` for the current selection (false when nothing is selected)
    pub fn selection_needs_routing(&self) -> bool {
        match (self.selected_input.as_deref(), self.selected_output_endpoint()) {
            (Some(input), Some(output)) => Self::needs_routing(input, output),
            _ => false,
        }
    }

    fn selected_output_endpoint(&self) -> Option<&StreamEndpoint> {
        self.selected_output
            .as_ref()
            .and_then(|id| self.outputs.get(id))
    }

    /// Route the selected output to the selected input
    ///
    /// No-op when the output is already fed by that input. A failed redirect
    /// is logged and reported, never raised: the other path must still be
    /// attempted by the caller.
    pub async fn route(&mut self) -> Result<RouteOutcome> {
        let (input, output) = match (self.selected_input.clone(), self.selected_output_endpoint()) {
            (Some(input), Some(output)) => (input, output.clone()),
            _ => {
                return Err(OrchestratorError::validation(format!(
                    "no mapping selected on the {} path",
                    self.role
                )))
            }
        };

        if !Self::needs_routing(&input, &output) {
            info!(
                path = %self.role,
                broadcaster = %self.address(),
                output = %output.source_id,
                "Service mapping changes are not required"
            );
            return Ok(RouteOutcome::Skipped);
        }

        info!(
            path = %self.role,
            broadcaster = %self.address(),
            input = %input,
            output = %output.display_name,
            policy = ?self.policy,
            "Mapping service on broadcaster"
        );

        let result = match self.policy {
            RedirectPolicy::Seamless => {
                self.client
                    .redirect(&output.internal_id, &input, RedirectFlags::SEAMLESS)
                    .await
            }
            RedirectPolicy::Quiesce => self.quiesced_redirect(&output.internal_id, &input).await,
        };

        match result {
            Ok(()) => {
                if let Some(endpoint) = self.outputs.get_mut(&output.source_id) {
                    endpoint.stream_id = input;
                }
                Ok(RouteOutcome::Applied)
            }
            Err(e) => {
                warn!(
                    path = %self.role,
                    broadcaster = %self.address(),
                    error = %e,
                    "Redirect failed, output keeps its previous input"
                );
                Ok(RouteOutcome::Failed(e.to_string()))
            }
        }
    }

    /// disable -> redirect -> settle -> enable, strictly in that order
    ///
    /// The output is re-enabled even when the redirect failed.
    async fn quiesced_redirect(&self, output_id: &str, input: &str) -> std::result::Result<(), ApiError> {
        if let Err(e) = self.client.set_output_enabled(output_id, false).await {
            warn!(path = %self.role, error = %e, "Could not disable output before redirect");
        }

        let redirect = self
            .client
            .redirect(output_id, input, RedirectFlags::NONE)
            .await;

        if !self.quiesce_settle.is_zero() {
            debug!(path = %self.role, secs = self.quiesce_settle.as_secs(), "Waiting before re-enabling output");
            tokio::time::sleep(self.quiesce_settle).await;
        }

        if let Err(e) = self.client.set_output_enabled(output_id, true).await {
            warn!(path = %self.role, error = %e, "Could not re-enable output after redirect");
        }

        redirect
    }

    /// Re-read the broadcaster and return what now feeds `source_id`
    ///
    /// Updates the local view on success.
    pub async fn read_back(&mut self, source_id: &SourceId) -> std::result::Result<Option<String>, ApiError> {
        let outputs = self.client.list_outputs().await?;
        let observed = outputs
            .iter()
            .filter_map(StreamEndpoint::output)
            .filter(|endpoint| &endpoint.source_id == source_id)
            .last();

        let Some(observed) = observed else {
            return Ok(None);
        };

        if let Some(endpoint) = self.outputs.get_mut(source_id) {
            endpoint.stream_id = observed.stream_id.clone();
        }
        Ok(Some(observed.stream_id))
    }

    /// Confirmation line for the current selection
    pub fn display_mapping(&self) -> Option<MappingLine> {
        let input = self.selected_input.clone()?;
        let output = self.selected_output_endpoint()?;
        Some(MappingLine {
            role: self.role,
            input,
            output: output.display_name.clone(),
        })
    }
}
