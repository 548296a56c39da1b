//! Non-interactive invocation: `sigpath TARGET ACTION [INPUT]`
//!
//! Arguments are checked against the deployment before anything remote is
//! contacted, so a bad invocation exits non-zero without side effects.

use crate::action::ActionKind;
use crate::config::DeploymentConfig;
use crate::error::{OrchestratorError, Result};
use sigpath_core::SourceId;

/// A pre-validated unattended action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnattendedRequest {
    /// Service to act on
    pub target: SourceId,
    /// Requested action
    pub kind: ActionKind,
    /// Primary input selector: the override argument, else the configured one
    pub input: Option<String>,
}

impl UnattendedRequest {
    /// Validate command-line arguments against the deployment
    pub fn parse(target: &str, action: &str, input: Option<&str>, config: &DeploymentConfig) -> Result<Self> {
        let target = SourceId::new(target);
        if !config.unattended.services.contains(&target) {
            return Err(OrchestratorError::validation(format!(
                "{} is not in the unattended service list ({})",
                target,
                config
                    .unattended
                    .services
                    .iter()
                    .map(SourceId::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let kind = ActionKind::parse_keyword(action)
            .ok_or_else(|| OrchestratorError::validation(format!("unknown action keyword {}", action)))?;

        if !config.actions.contains(&kind) {
            return Err(OrchestratorError::validation(format!(
                "action {} is not offered by this deployment",
                kind
            )));
        }

        let input = input
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| config.unattended.inputs.get(&target).cloned());

        Ok(Self { target, kind, input })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALT: &str = r#"
primary:
  address: 10.0.0.1
backup:
  address: 10.0.0.2
control:
  base_url: http://control.local/jane
  zone: us-east4-a
  project: encoders
directory:
  base_url: http://directory.local/api/v2/services
actions: [start, stop_service, stop, switch, exit]
unattended:
  services: [M2005, M2015]
  inputs:
    M2005: M2005_NFLNAL1_NFL_SES_PRI
"#;

    fn config() -> DeploymentConfig {
        DeploymentConfig::from_yaml_str(ALT).unwrap()
    }

    #[test]
    fn test_unknown_target_rejected() {
        let err = UnattendedRequest::parse("K9999", "start", None, &config()).unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(msg) if msg.contains("K9999")));
    }

    #[test]
    fn test_configured_input_used_unless_overridden() {
        let request = UnattendedRequest::parse("m2005", "start_service", None, &config()).unwrap();
        assert_eq!(request.kind, ActionKind::Start);
        assert_eq!(request.input.as_deref(), Some("M2005_NFLNAL1_NFL_SES_PRI"));

        let request =
            UnattendedRequest::parse("M2005", "switch_source", Some("M2005_NFLNAL2_NFL_SES_PRI"), &config()).unwrap();
        assert_eq!(request.input.as_deref(), Some("M2005_NFLNAL2_NFL_SES_PRI"));

        let request = UnattendedRequest::parse("M2015", "stop_vm", None, &config()).unwrap();
        assert_eq!(request.kind, ActionKind::Stop);
        assert_eq!(request.input, None);
    }

    #[test]
    fn test_action_must_be_offered() {
        let err = UnattendedRequest::parse("M2005", "segment", None, &config()).unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));

        let err = UnattendedRequest::parse("M2005", "reboot", None, &config()).unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(msg) if msg.contains("reboot")));
    }
}
