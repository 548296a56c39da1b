//! Orchestration engine
//!
//! The per-run context owning the path pair, the encoder registry and the
//! routing reconciler. One action runs at a time (`&mut self`); each moves
//! through select-target, confirm and execute.
//!
//! ## Execution sequences
//!
//! ```text
//! Start:    route(pri) ─> route(bck) ─> verify ─> start VM ─> wait boot
//!                 ─> [rename segment] ─> settle ─> start service ─> [reprobe]
//! Stop:     stop service(s) of the VM group ─> stop VM (once, owner)
//! Switch:   route(pri) ─> route(bck) ─> verify ─> settle ─> reprobe
//!                                                 (unless TERMINATED)
//! Segment:  rename segment
//! ```
//!
//! Routing is skipped for statically mapped targets and whenever both paths
//! already carry the selected input. Control API failures never stop a
//! sequence; the remaining steps still run.

use crate::action::{ActionKind, ActionPhase, ActionPlan, ActionReport, PendingAction, Step};
use crate::config::{DeploymentConfig, InputSelection};
use crate::encoder::{Encoder, EncoderRegistry, EncoderResolver};
use crate::error::{OrchestratorError, Result};
use crate::operator::{Operator, TargetChoice};
use crate::path::{EndpointFilters, PathModel, PathRole};
use crate::reconcile::{ConvergenceReport, PathPair, RoutingReconciler, display_mappings};
use crate::unattended::UnattendedRequest;
use sigpath_core::{BroadcasterApi, ControlApi, DirectoryApi, SourceId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// The remote systems an engine talks to
pub struct Collaborators {
    /// Primary broadcaster
    pub primary: Arc<dyn BroadcasterApi>,
    /// Backup broadcaster
    pub backup: Arc<dyn BroadcasterApi>,
    /// VM and service control
    pub control: Arc<dyn ControlApi>,
    /// Source id to encoder lookup
    pub directory: Arc<dyn DirectoryApi>,
}

/// Sleep for a settle interval (no-op when zero)
async fn settle(duration: Duration, reason: &str) {
    if duration.is_zero() {
        return;
    }
    info!(secs = duration.as_secs(), "⏳ Waiting {}", reason);
    tokio::time::sleep(duration).await;
}

/// Per-run orchestration context
pub struct Orchestrator {
    config: DeploymentConfig,
    paths: PathPair,
    registry: EncoderRegistry,
    reconciler: RoutingReconciler,
}

impl Orchestrator {
    /// Build the model from live queries
    ///
    /// Both broadcasters must answer. Encoders are resolved for every output
    /// of the primary path; those that fail to resolve are kept aside.
    pub async fn bootstrap(config: DeploymentConfig, collaborators: Collaborators) -> Result<Self> {
        let policy = config.routing.redirect;
        let quiesce = config.settle.quiesce();

        let mut paths = PathPair::new(
            PathModel::new(PathRole::Primary, collaborators.primary, policy).with_quiesce_settle(quiesce),
            PathModel::new(PathRole::Backup, collaborators.backup, policy).with_quiesce_settle(quiesce),
        );

        let filters = EndpointFilters::from_rules(
            config.routing.input_tag.clone(),
            config.routing.output_allow_list.clone(),
        );
        paths.load(&filters).await?;

        let resolver = EncoderResolver::new(
            collaborators.directory,
            collaborators.control,
            config.directory.facility_filter.clone(),
        );
        let ids: Vec<SourceId> = paths
            .primary
            .outputs()
            .map(|endpoint| endpoint.source_id.clone())
            .collect();
        let registry = EncoderRegistry::build(&resolver, ids).await;

        let reconciler = RoutingReconciler::new(config.routing.backup_input.clone());

        Ok(Self {
            config,
            paths,
            registry,
            reconciler,
        })
    }

    /// Deployment in use
    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    /// Both broadcaster paths
    pub fn paths(&self) -> &PathPair {
        &self.paths
    }

    /// Encoders of this run
    pub fn registry(&self) -> &EncoderRegistry {
        &self.registry
    }

    /// Re-query every encoder's VM status
    pub async fn refresh_statuses(&mut self) {
        for encoder in self.registry.active_mut() {
            encoder.refresh_status().await;
        }
    }

    fn eligible(&self, kind: ActionKind) -> Vec<&Encoder> {
        match kind {
            ActionKind::Start => self.registry.active().collect(),
            ActionKind::Stop | ActionKind::StopService | ActionKind::Segment => self.registry.running(),
            ActionKind::Switch => self
                .registry
                .active()
                .filter(|e| !self.config.is_static(e.source_id()))
                .collect(),
            ActionKind::Exit => Vec::new(),
        }
    }

    /// Targets an action may be applied to
    pub fn candidates(&self, kind: ActionKind) -> Vec<TargetChoice> {
        self.eligible(kind)
            .into_iter()
            .map(|e| TargetChoice {
                source_id: e.source_id().clone(),
                callsign: e.callsign().to_string(),
                status: e.status(),
            })
            .collect()
    }

    /// Fail with a precondition error when the action has nothing to act on
    pub fn check_preconditions(&self, kind: ActionKind) -> Result<()> {
        if kind == ActionKind::Exit || !self.eligible(kind).is_empty() {
            return Ok(());
        }
        let reason = match kind {
            ActionKind::Stop | ActionKind::StopService => "No encoders are running. Nothing to stop",
            ActionKind::Segment => "No encoders are running. No segment names to update",
            ActionKind::Switch => "No services can be switched",
            _ => "No encoders available",
        };
        Err(OrchestratorError::precondition(reason))
    }

    /// Check `target` is eligible for `kind`; returns its callsign
    pub fn validate_target(&self, kind: ActionKind, target: &SourceId) -> Result<String> {
        let encoder = self
            .registry
            .require(target)
            .map_err(|e| OrchestratorError::validation(e.to_string()))?;

        if !self.eligible(kind).iter().any(|e| e.source_id() == target) {
            let reason = if kind == ActionKind::Switch && self.config.is_static(target) {
                "it is statically mapped".to_string()
            } else {
                format!("its encoder is {}", encoder.status())
            };
            return Err(OrchestratorError::validation(format!(
                "{} ({}) cannot be used for {}: {}",
                target,
                encoder.callsign(),
                kind.label(),
                reason
            )));
        }

        Ok(encoder.callsign().to_string())
    }

    /// Whether the operator has to pick an input for this target
    pub fn needs_input_prompt(&self, kind: ActionKind, target: &SourceId) -> bool {
        match kind {
            ActionKind::Start => {
                !self.config.is_static(target) && self.config.input_selection == InputSelection::Prompt
            }
            ActionKind::Switch => true,
            _ => false,
        }
    }

    /// Input stream ids on the primary path, minus statically mapped sources
    pub fn input_choices(&self) -> Vec<String> {
        self.paths
            .primary
            .inputs()
            .filter(|endpoint| !self.config.is_static(&endpoint.source_id))
            .map(|endpoint| endpoint.stream_id.clone())
            .collect()
    }

    /// Reject selectors resolving to the feed of a statically mapped source
    fn check_routable_input(&self, selector: &str) -> Result<()> {
        match self.paths.primary.resolve_input(selector) {
            Some(endpoint) if self.config.is_static(&endpoint.source_id) => {
                Err(OrchestratorError::validation(format!(
                    "input {} belongs to statically mapped {} and cannot be routed",
                    endpoint.stream_id, endpoint.source_id
                )))
            }
            _ => Ok(()),
        }
    }

    /// Validate the target, select the mapping on both paths and build the plan
    ///
    /// Nothing remote is mutated. Any failure leaves no selection behind.
    pub fn plan(&mut self, kind: ActionKind, target: &SourceId, input: Option<&str>) -> Result<ActionPlan> {
        let callsign = self.validate_target(kind, target)?;
        self.paths.clear_selection();

        let mut selected_input = None;
        if matches!(kind, ActionKind::Start | ActionKind::Switch) {
            if self.config.is_static(target) {
                self.reconciler.select_static(&mut self.paths, target)?;
            } else {
                let selector = match input {
                    Some(selector) => selector.to_string(),
                    None if self.config.input_selection == InputSelection::MatchTarget
                        && kind == ActionKind::Start =>
                    {
                        target.to_string()
                    }
                    None => {
                        return Err(OrchestratorError::validation(format!(
                            "an input is required to {} {}",
                            kind, target
                        )));
                    }
                };
                self.check_routable_input(&selector)?;
                self.reconciler.select(&mut self.paths, &selector, target)?;
            }
            selected_input = self.paths.primary.selected_input().map(str::to_string);
        }

        Ok(ActionPlan {
            pending: PendingAction {
                kind,
                target: target.clone(),
                callsign,
                input: selected_input,
            },
            mappings: display_mappings(&self.paths),
            routing_required: self.reconciler.needs_routing(&self.paths),
        })
    }

    /// Run one action with interactive selection and confirmation
    ///
    /// Ineligible targets and unknown inputs are rejected and re-prompted.
    pub async fn run_interactive(&mut self, kind: ActionKind, operator: &mut dyn Operator) -> Result<ActionReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("action", kind = %kind, run_id = %run_id);
        self.interactive(kind, operator, run_id).instrument(span).await
    }

    async fn interactive(
        &mut self,
        kind: ActionKind,
        operator: &mut dyn Operator,
        run_id: Uuid,
    ) -> Result<ActionReport> {
        let mut report = ActionReport::new(run_id, kind);
        if kind == ActionKind::Exit {
            return Ok(report.finish());
        }

        self.check_preconditions(kind)?;
        let candidates = self.candidates(kind);

        let plan = loop {
            let target = operator.choose_target(kind, &candidates)?;
            match self.prepare(kind, &target, operator) {
                Ok(plan) => break plan,
                Err(e @ OrchestratorError::Validation(_)) => {
                    warn!(target = %target, error = %e, "Selection rejected");
                    operator.reject(&e.to_string());
                }
                Err(e) => return Err(e),
            }
        };

        report.target = Some(plan.pending.target.clone());
        report.phase = ActionPhase::Confirm;

        if !operator.confirm(&plan)? {
            self.paths.clear_selection();
            info!(target = %plan.pending.target, "Action cancelled by operator");
            return Err(OrchestratorError::Cancelled);
        }

        self.run_plan(&plan, &mut report).await?;
        Ok(report.finish())
    }

    fn prepare(&mut self, kind: ActionKind, target: &SourceId, operator: &mut dyn Operator) -> Result<ActionPlan> {
        self.validate_target(kind, target)?;

        let input = if self.needs_input_prompt(kind, target) {
            let inputs = self.input_choices();
            Some(operator.choose_input(target, &inputs)?)
        } else {
            None
        };

        self.plan(kind, target, input.as_deref())
    }

    /// Run one action from pre-supplied arguments, without prompts
    ///
    /// Any invalid selection is a hard error.
    pub async fn run_unattended(&mut self, request: &UnattendedRequest) -> Result<ActionReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("action", kind = %request.kind, run_id = %run_id, unattended = true);
        self.unattended(request, run_id).instrument(span).await
    }

    async fn unattended(&mut self, request: &UnattendedRequest, run_id: Uuid) -> Result<ActionReport> {
        let mut report = ActionReport::new(run_id, request.kind).unattended();
        if request.kind == ActionKind::Exit {
            return Ok(report.finish());
        }

        self.check_preconditions(request.kind)?;
        let plan = self.plan(request.kind, &request.target, request.input.as_deref())?;
        report.target = Some(request.target.clone());

        info!(
            target = %plan.pending.target,
            callsign = %plan.pending.callsign,
            "Running {} unattended",
            request.kind.label()
        );
        for line in &plan.mappings {
            info!("{}", line);
        }

        self.run_plan(&plan, &mut report).await?;
        Ok(report.finish())
    }

    async fn run_plan(&mut self, plan: &ActionPlan, report: &mut ActionReport) -> Result<()> {
        report.phase = ActionPhase::Execute;
        let result = self.execute(plan, report).await;
        self.paths.clear_selection();
        result
    }

    /// Execute a confirmed plan
    pub async fn execute(&mut self, plan: &ActionPlan, report: &mut ActionReport) -> Result<()> {
        let target = &plan.pending.target;
        match plan.pending.kind {
            ActionKind::Start => self.execute_start(target, report).await,
            ActionKind::Stop => self.execute_stop(target, report).await,
            ActionKind::StopService => self.execute_stop_service(target, report).await,
            ActionKind::Switch => self.execute_switch(target, report).await,
            ActionKind::Segment => self.execute_segment(target, report).await,
            ActionKind::Exit => Ok(()),
        }
    }

    /// Route both paths if needed and read them back
    ///
    /// Unattended runs wait `between_paths` after the primary.
    async fn route_pair(&mut self, target: &SourceId, report: &mut ActionReport) -> Result<Option<ConvergenceReport>> {
        if !self.reconciler.needs_routing(&self.paths) {
            info!(output = %target, "Service mapping changes are not required");
            return Ok(None);
        }

        let between_paths = if report.unattended {
            self.config.settle.between_paths()
        } else {
            Duration::ZERO
        };
        let outcome = self.reconciler.apply(&mut self.paths, between_paths).await?;
        report.record(Step::Route {
            role: PathRole::Primary,
            outcome: outcome.primary,
        });
        report.record(Step::Route {
            role: PathRole::Backup,
            outcome: outcome.backup,
        });

        let convergence = self.reconciler.verify(&mut self.paths, target).await;
        report.record(Step::Verify(convergence.clone()));
        Ok(Some(convergence))
    }

    async fn execute_start(&mut self, target: &SourceId, report: &mut ActionReport) -> Result<()> {
        self.route_pair(target, report).await?;

        let settle_config = self.config.settle.clone();
        let start = self.config.start.clone();
        let encoder = self.registry.require_mut(target)?;

        if encoder.refresh_status().await.is_running() {
            info!(host = %encoder.hostname(), "Encoder VM already running, skipping VM start");
            report.record(Step::VmAlreadyRunning {
                host: encoder.hostname().to_string(),
            });
        } else {
            encoder.start_vm().await;
            report.record(Step::StartVm {
                host: encoder.hostname().to_string(),
            });

            let running = encoder
                .wait_for_running(settle_config.vm_boot(), settle_config.vm_poll())
                .await;
            report.record(Step::VmBooted {
                host: encoder.hostname().to_string(),
                running,
            });

            if start.rename_segment_after_vm_start {
                let outcome = encoder
                    .rename_segment(settle_config.segment_check(), &self.config.segment_success_marker)
                    .await;
                report.record(Step::RenameSegment(outcome));
            }
        }

        settle(settle_config.service_start(), "before starting the service").await;
        encoder.start_service(target).await;
        report.record(Step::StartService {
            source_id: target.clone(),
        });

        if start.reprobe_after_start {
            settle(settle_config.reprobe(), "before re-probing").await;
            encoder.reprobe(target).await;
            report.record(Step::Reprobe {
                source_id: target.clone(),
            });
        }

        encoder.refresh_status().await;
        info!(target = %target, status = %encoder.status(), "✅ Service start sequence complete");

        if start.open_ui {
            report.open_urls = vec![
                self.paths.primary.ui_url(),
                self.paths.backup.ui_url(),
                encoder.ui_url(),
            ];
        }

        Ok(())
    }

    /// Stop every service of the target's VM group, then the VM once
    async fn execute_stop(&mut self, target: &SourceId, report: &mut ActionReport) -> Result<()> {
        if !self.config.stop.stop_vm_with_service {
            return self.execute_stop_service(target, report).await;
        }

        let group = self.config.vm_group_of(target);
        let owner_id = self.registry.vm_owner(&group).unwrap_or(target).clone();
        let fallback = self.registry.require(target)?;

        debug!(target = %target, group = ?group, owner = %owner_id, "Stopping VM group");

        for member in &group {
            let encoder = self.registry.get(member).unwrap_or(fallback);
            encoder.stop_service(member).await;
            report.record(Step::StopService {
                source_id: member.clone(),
            });
        }

        let owner = self.registry.get(&owner_id).unwrap_or(fallback);
        owner.stop_vm().await;
        report.record(Step::StopVm {
            host: owner.hostname().to_string(),
        });

        for member in &group {
            if let Some(encoder) = self.registry.get_mut(member) {
                encoder.refresh_status().await;
            }
        }

        info!(target = %target, services = group.len(), "✅ Service stop sequence complete");
        Ok(())
    }

    async fn execute_stop_service(&mut self, target: &SourceId, report: &mut ActionReport) -> Result<()> {
        let encoder = self.registry.require_mut(target)?;
        encoder.stop_service(target).await;
        report.record(Step::StopService {
            source_id: target.clone(),
        });
        encoder.refresh_status().await;
        Ok(())
    }

    /// Re-route a live output; reprobe unless the encoder is down or routing
    /// converged on neither path
    async fn execute_switch(&mut self, target: &SourceId, report: &mut ActionReport) -> Result<()> {
        let convergence = self.route_pair(target, report).await?;

        let reprobe_settle = self.config.settle.reprobe();
        let encoder = self.registry.require_mut(target)?;
        let status = encoder.refresh_status().await;

        if status.is_terminated() {
            info!(target = %target, "Encoder is TERMINATED, skipping reprobe");
            report.record(Step::ReprobeSkipped {
                reason: "encoder is TERMINATED".to_string(),
            });
            return Ok(());
        }

        if convergence.as_ref().is_some_and(|c| !c.any_converged()) {
            warn!(target = %target, "Neither path carries the new input, skipping reprobe");
            report.record(Step::ReprobeSkipped {
                reason: "routing not observed on either path".to_string(),
            });
            return Ok(());
        }

        settle(reprobe_settle, "for the new input to settle before re-probing").await;
        encoder.reprobe(target).await;
        report.record(Step::Reprobe {
            source_id: target.clone(),
        });
        Ok(())
    }

    async fn execute_segment(&mut self, target: &SourceId, report: &mut ActionReport) -> Result<()> {
        let encoder = self.registry.require(target)?;
        let outcome = encoder
            .rename_segment(self.config.settle.segment_check(), &self.config.segment_success_marker)
            .await;
        report.record(Step::RenameSegment(outcome));
        Ok(())
    }
}
