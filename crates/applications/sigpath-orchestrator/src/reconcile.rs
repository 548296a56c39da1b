//! Routing reconciler for the primary/backup pair
//!
//! Every routing change is applied to both paths, primary first, with the
//! backup's input derived from the primary's through the configured
//! [`InputTransform`]. Afterwards both broadcasters are read back and the
//! observed feeds compared against the intended ones:
//!
//! ```text
//! select(primary) ─> select(backup) ─> route(primary) ─> route(backup)
//!                                                            │
//!                        ConvergenceReport <─ read_back(both)┘
//! ```
//!
//! Selection happens on both paths before anything is mutated, so an input
//! missing on the backup broadcaster never leaves the primary re-routed alone.
//! The backup always carries exactly the transform of the primary's stream.

use crate::error::{OrchestratorError, Result};
use crate::path::{EndpointFilters, InputTransform, MappingLine, PathModel, RouteOutcome};
use serde::{Deserialize, Serialize};
use sigpath_core::SourceId;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// The redundant pair
pub struct PathPair {
    /// Path through the primary broadcaster
    pub primary: PathModel,
    /// Path through the backup broadcaster
    pub backup: PathModel,
}

impl PathPair {
    /// Pair two unloaded paths
    pub fn new(primary: PathModel, backup: PathModel) -> Self {
        Self { primary, backup }
    }

    /// Load both broadcasters; either failing aborts
    pub async fn load(&mut self, filters: &EndpointFilters) -> Result<()> {
        self.primary.load(filters).await?;
        self.backup.load(filters).await?;
        Ok(())
    }

    /// Drop the pending selection on both paths
    pub fn clear_selection(&mut self) {
        self.primary.clear_selection();
        self.backup.clear_selection();
    }
}

/// Route outcome per path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairOutcome {
    /// Primary path
    pub primary: RouteOutcome,
    /// Backup path
    pub backup: RouteOutcome,
}

impl PairOutcome {
    /// At least one redirect was accepted
    pub fn mutated(&self) -> bool {
        self.primary == RouteOutcome::Applied || self.backup == RouteOutcome::Applied
    }

    /// At least one redirect failed
    pub fn any_failed(&self) -> bool {
        self.primary.is_failed() || self.backup.is_failed()
    }
}

/// What one path was observed to carry after routing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathConvergence {
    /// Output fed by the intended input
    Converged,
    /// Output fed by something else (or missing)
    Diverged {
        /// Stream the output should carry
        expected: String,
        /// Stream it was read back with
        observed: Option<String>,
    },
    /// Broadcaster could not be read back
    Unreadable(String),
}

impl PathConvergence {
    /// Read back matched the intent
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// Post-route read-back of both paths for one output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    /// Output that was routed
    pub output: SourceId,
    /// Primary path
    pub primary: PathConvergence,
    /// Backup path
    pub backup: PathConvergence,
}

impl ConvergenceReport {
    /// Both paths carry the intended input
    pub fn all_converged(&self) -> bool {
        self.primary.is_converged() && self.backup.is_converged()
    }

    /// At least one path carries the intended input
    pub fn any_converged(&self) -> bool {
        self.primary.is_converged() || self.backup.is_converged()
    }
}

/// Applies a mapping to both paths and checks they agree afterwards
#[derive(Debug, Clone, Default)]
pub struct RoutingReconciler {
    transform: InputTransform,
}

impl RoutingReconciler {
    /// Reconciler deriving backup inputs through `transform`
    pub fn new(transform: InputTransform) -> Self {
        Self { transform }
    }

    /// Select `input_selector -> output` on both paths
    ///
    /// The selector is resolved on the primary; the backup must then carry
    /// exactly the transform of the resolved stream id. On any failure both
    /// selections are cleared.
    pub fn select(&self, pair: &mut PathPair, input_selector: &str, output: &SourceId) -> Result<()> {
        pair.clear_selection();

        let result = self.select_both(pair, input_selector, output);
        if result.is_err() {
            pair.clear_selection();
        }
        result
    }

    fn select_both(&self, pair: &mut PathPair, input_selector: &str, output: &SourceId) -> Result<()> {
        pair.primary.select(input_selector, output)?;

        let resolved = pair.primary.selected_input().unwrap_or(input_selector).to_string();
        let backup_input = self.transform.apply(&resolved);
        if !pair.backup.has_input(&backup_input) {
            return Err(OrchestratorError::validation(format!(
                "input {} (backup of {}) does not exist on the {} broadcaster ({})",
                backup_input,
                resolved,
                pair.backup.role(),
                pair.backup.address()
            )));
        }
        pair.backup.select(&backup_input, output)?;

        debug!(
            output = %output,
            primary_input = %resolved,
            backup_input = %backup_input,
            "Selected mapping on both paths"
        );
        Ok(())
    }

    /// Select `output` with its current feed on both paths (no routing)
    pub fn select_static(&self, pair: &mut PathPair, output: &SourceId) -> Result<()> {
        pair.clear_selection();
        let result = pair
            .primary
            .select_current(output)
            .and_then(|_| pair.backup.select_current(output));
        if result.is_err() {
            pair.clear_selection();
        }
        result
    }

    /// Either path needs a redirect for the current selection
    pub fn needs_routing(&self, pair: &PathPair) -> bool {
        pair.primary.selection_needs_routing() || pair.backup.selection_needs_routing()
    }

    /// Route primary then backup; a failed primary does not skip the backup
    ///
    /// `between_paths` is slept after an applied primary redirect when the
    /// backup still has to move.
    pub async fn apply(&self, pair: &mut PathPair, between_paths: Duration) -> Result<PairOutcome> {
        let primary = pair.primary.route().await?;

        if primary == RouteOutcome::Applied
            && pair.backup.selection_needs_routing()
            && !between_paths.is_zero()
        {
            info!(secs = between_paths.as_secs(), "Waiting before mapping the backup path");
            tokio::time::sleep(between_paths).await;
        }

        let backup = pair.backup.route().await?;

        let outcome = PairOutcome { primary, backup };
        if outcome.any_failed() {
            warn!(?outcome, "Routing failed on at least one path");
        }
        Ok(outcome)
    }

    /// Read both broadcasters back and compare with the primary's selection
    ///
    /// The backup is held to the transform of the primary's input, not to
    /// its own selection. Divergence is not repaired. It is logged loudly
    /// for the operator.
    pub async fn verify(&self, pair: &mut PathPair, output: &SourceId) -> ConvergenceReport {
        let expected = pair.primary.selected_input().map(str::to_string);
        let backup_expected = expected.as_deref().map(|input| self.transform.apply(input));

        let primary = Self::verify_path(&mut pair.primary, expected, output).await;
        let backup = Self::verify_path(&mut pair.backup, backup_expected, output).await;

        let report = ConvergenceReport {
            output: output.clone(),
            primary,
            backup,
        };

        if report.all_converged() {
            info!(output = %output, "✅ Primary and backup paths converged");
        } else {
            error!(
                output = %output,
                primary = ?report.primary,
                backup = ?report.backup,
                "CONSISTENCY RISK: primary and backup paths disagree for {}. Operator intervention required",
                output
            );
        }

        report
    }

    async fn verify_path(path: &mut PathModel, expected: Option<String>, output: &SourceId) -> PathConvergence {
        let Some(expected) = expected else {
            return PathConvergence::Diverged {
                expected: String::new(),
                observed: None,
            };
        };

        match path.read_back(output).await {
            Ok(Some(observed)) if observed == expected => PathConvergence::Converged,
            Ok(observed) => PathConvergence::Diverged { expected, observed },
            Err(e) => {
                warn!(path = %path.role(), error = %e, "Could not read back outputs");
                PathConvergence::Unreadable(e.to_string())
            }
        }
    }
}

/// Confirmation lines for the current selection, primary first
pub fn display_mappings(pair: &PathPair) -> Vec<MappingLine> {
    [&pair.primary, &pair.backup]
        .into_iter()
        .filter_map(PathModel::display_mapping)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{PathRole, RedirectPolicy};
    use crate::testing::{Call, CallLog, MockBroadcaster};
    use std::sync::Arc;

    async fn pair_from(primary: MockBroadcaster, backup: MockBroadcaster, policy: RedirectPolicy) -> PathPair {
        let mut pair = PathPair::new(
            PathModel::new(PathRole::Primary, Arc::new(primary), policy),
            PathModel::new(PathRole::Backup, Arc::new(backup), policy),
        );
        pair.load(&EndpointFilters::all()).await.unwrap();
        pair
    }

    fn pri_bck() -> InputTransform {
        InputTransform::Replace {
            from: "PRI".to_string(),
            to: "BCK".to_string(),
        }
    }

    #[tokio::test]
    async fn test_primary_routed_before_backup() {
        let log = CallLog::default();
        let primary = MockBroadcaster::new("pri", log.clone())
            .with_input("M2005_NFLNAL1_NFL_SES_PRI")
            .with_output("p1", "M2005_ALT1_OUT", "M2005_OLD_PRI");
        let backup = MockBroadcaster::new("bck", log.clone())
            .with_input("M2005_NFLNAL1_NFL_SES_BCK")
            .with_output("b1", "M2005_ALT1_OUT", "M2005_OLD_BCK");
        let mut pair = pair_from(primary, backup, RedirectPolicy::Seamless).await;
        let reconciler = RoutingReconciler::new(pri_bck());

        reconciler
            .select(&mut pair, "M2005_NFLNAL1_NFL_SES_PRI", &SourceId::new("M2005"))
            .unwrap();
        let outcome = reconciler.apply(&mut pair, Duration::ZERO).await.unwrap();
        assert!(outcome.mutated());

        let redirects: Vec<_> = log
            .mutations()
            .into_iter()
            .filter_map(|c| match c {
                Call::Redirect {
                    broadcaster,
                    stream_id,
                    ..
                } => Some((broadcaster, stream_id)),
                _ => None,
            })
            .collect();
        assert_eq!(
            redirects,
            vec![
                ("pri".to_string(), "M2005_NFLNAL1_NFL_SES_PRI".to_string()),
                ("bck".to_string(), "M2005_NFLNAL1_NFL_SES_BCK".to_string()),
            ]
        );

        let report = reconciler.verify(&mut pair, &SourceId::new("M2005")).await;
        assert!(report.all_converged());
    }

    #[tokio::test]
    async fn test_missing_backup_input_mutates_nothing() {
        let log = CallLog::default();
        let primary = MockBroadcaster::new("pri", log.clone())
            .with_input("M2005_NFLNAL1_NFL_SES_PRI")
            .with_output("p1", "M2005_ALT1_OUT", "OLD");
        let backup = MockBroadcaster::new("bck", log.clone()).with_output("b1", "M2005_ALT1_OUT", "OLD");
        let mut pair = pair_from(primary, backup, RedirectPolicy::Seamless).await;
        let reconciler = RoutingReconciler::new(pri_bck());

        let err = reconciler.select(&mut pair, "M2005_NFLNAL1_NFL_SES_PRI", &SourceId::new("M2005"));
        assert!(err.is_err());
        assert!(pair.primary.selected_input().is_none());
        assert!(log.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_backup_must_carry_the_primary_stream() {
        let log = CallLog::default();
        let primary = MockBroadcaster::new("pri", log.clone())
            .with_input("K1_A")
            .with_input("K1_B")
            .with_output("p1", "K1_OUT", "OLD");
        let backup = MockBroadcaster::new("bck", log.clone())
            .with_input("K1_A")
            .with_output("b1", "K1_OUT", "OLD");
        let mut pair = pair_from(primary, backup, RedirectPolicy::Seamless).await;
        let reconciler = RoutingReconciler::default();

        let err = reconciler.select(&mut pair, "K1", &SourceId::new("K1")).unwrap_err();

        assert!(matches!(err, OrchestratorError::Validation(msg) if msg.contains("K1_B")));
        assert!(pair.primary.selected_input().is_none());
        assert!(pair.backup.selected_input().is_none());
        assert!(log.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_source_id_selector_picks_matching_streams() {
        let log = CallLog::default();
        let primary = MockBroadcaster::new("pri", log.clone())
            .with_input("K1_A_PRI")
            .with_input("K1_B_PRI")
            .with_output("p1", "K1_OUT", "OLD");
        let backup = MockBroadcaster::new("bck", log.clone())
            .with_input("K1_A_BCK")
            .with_input("K1_B_BCK")
            .with_output("b1", "K1_OUT", "OLD");
        let mut pair = pair_from(primary, backup, RedirectPolicy::Seamless).await;
        let reconciler = RoutingReconciler::new(pri_bck());

        reconciler.select(&mut pair, "K1", &SourceId::new("K1")).unwrap();

        assert_eq!(pair.primary.selected_input(), Some("K1_B_PRI"));
        assert_eq!(pair.backup.selected_input(), Some("K1_B_BCK"));
    }

    #[tokio::test]
    async fn test_verify_holds_backup_to_primary_input() {
        let log = CallLog::default();
        let primary = MockBroadcaster::new("pri", log.clone())
            .with_input("K1_A")
            .with_input("K1_B")
            .with_output("p1", "K1_OUT", "OLD");
        let backup = MockBroadcaster::new("bck", log.clone())
            .with_input("K1_A")
            .with_input("K1_B")
            .with_output("b1", "K1_OUT", "OLD");
        let mut pair = pair_from(primary, backup, RedirectPolicy::Seamless).await;
        let reconciler = RoutingReconciler::default();
        let output = SourceId::new("K1");

        reconciler.select(&mut pair, "K1_B", &output).unwrap();
        pair.backup.select("K1_A", &output).unwrap();
        reconciler.apply(&mut pair, Duration::ZERO).await.unwrap();

        let report = reconciler.verify(&mut pair, &output).await;
        assert!(report.primary.is_converged());
        assert_eq!(
            report.backup,
            PathConvergence::Diverged {
                expected: "K1_B".to_string(),
                observed: Some("K1_A".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_failed_primary_still_routes_backup_and_flags_divergence() {
        let log = CallLog::default();
        let primary = MockBroadcaster::new("pri", log.clone())
            .with_input("Y")
            .with_output("p1", "A_CALL", "X")
            .failing_redirects();
        let backup = MockBroadcaster::new("bck", log.clone())
            .with_input("Y")
            .with_output("b1", "A_CALL", "X");
        let mut pair = pair_from(primary, backup, RedirectPolicy::Seamless).await;
        let reconciler = RoutingReconciler::default();

        reconciler.select(&mut pair, "Y", &SourceId::new("A")).unwrap();
        let outcome = reconciler.apply(&mut pair, Duration::ZERO).await.unwrap();
        assert!(outcome.primary.is_failed());
        assert_eq!(outcome.backup, RouteOutcome::Applied);

        let report = reconciler.verify(&mut pair, &SourceId::new("A")).await;
        assert!(!report.all_converged());
        assert!(report.any_converged());
        assert_eq!(
            report.primary,
            PathConvergence::Diverged {
                expected: "Y".to_string(),
                observed: Some("X".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_ignored_redirect_detected_by_read_back() {
        let log = CallLog::default();
        let primary = MockBroadcaster::new("pri", log.clone())
            .with_input("Y")
            .with_output("p1", "A_CALL", "X")
            .ignoring_redirects();
        let backup = MockBroadcaster::new("bck", log.clone())
            .with_input("Y")
            .with_output("b1", "A_CALL", "X")
            .ignoring_redirects();
        let mut pair = pair_from(primary, backup, RedirectPolicy::Seamless).await;
        let reconciler = RoutingReconciler::default();

        reconciler.select(&mut pair, "Y", &SourceId::new("A")).unwrap();
        reconciler.apply(&mut pair, Duration::ZERO).await.unwrap();

        let report = reconciler.verify(&mut pair, &SourceId::new("A")).await;
        assert!(!report.any_converged());
    }

    #[tokio::test]
    async fn test_static_selection_never_routes() {
        let log = CallLog::default();
        let primary = MockBroadcaster::new("pri", log.clone()).with_output("p1", "K4015_FOX4K", "K4015_SRC");
        let backup = MockBroadcaster::new("bck", log.clone()).with_output("b1", "K4015_FOX4K", "K4015_SRC");
        let mut pair = pair_from(primary, backup, RedirectPolicy::Seamless).await;
        let reconciler = RoutingReconciler::default();

        reconciler.select_static(&mut pair, &SourceId::new("K4015")).unwrap();
        assert!(!reconciler.needs_routing(&pair));

        let outcome = reconciler.apply(&mut pair, Duration::ZERO).await.unwrap();
        assert_eq!(outcome.primary, RouteOutcome::Skipped);
        assert_eq!(outcome.backup, RouteOutcome::Skipped);
        assert!(log.mutations().is_empty());

        let lines = display_mappings(&pair);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].role, PathRole::Primary);
        assert_eq!(lines[1].input, "K4015_SRC");
    }
}
