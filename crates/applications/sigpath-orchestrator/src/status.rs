//! Status rendering
//!
//! Pure functions over the registry and path views; nothing here queries a
//! remote system.

use crate::encoder::EncoderRegistry;
use crate::path::PathModel;
use crate::reconcile::PathPair;
use std::fmt::Write;

/// One line per active encoder
pub fn render_encoders(registry: &EncoderRegistry) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<8} {:<12} {:<16} {:<28} {}",
        "ID", "CALLSIGN", "IP", "HOSTNAME", "STATUS"
    );
    for encoder in registry.active() {
        let _ = writeln!(
            out,
            "{:<8} {:<12} {:<16} {:<28} {}",
            encoder.source_id(),
            encoder.callsign(),
            encoder.ip(),
            encoder.hostname(),
            encoder.status()
        );
    }
    out
}

/// `input --> output` for outputs belonging to active encoders
pub fn render_routing(path: &PathModel, registry: &EncoderRegistry) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", path.role(), path.address());
    for output in path.outputs().filter(|o| registry.contains(&o.source_id)) {
        let _ = writeln!(out, "  {}  -->  {}", output.stream_id, output.display_name);
    }
    out
}

/// Source ids left out of the registry, with the reason
pub fn render_unresolved(registry: &EncoderRegistry) -> String {
    let mut out = String::new();
    for (id, reason) in registry.unresolved() {
        let _ = writeln!(out, "{:<8} {}", id, reason);
    }
    out
}

/// Full status view
pub fn render_status(name: &str, paths: &PathPair, registry: &EncoderRegistry) -> String {
    let mut out = format!("=== {} ===\n\n", name);
    out.push_str(&render_encoders(registry));
    out.push('\n');
    out.push_str(&render_routing(&paths.primary, registry));
    out.push_str(&render_routing(&paths.backup, registry));

    let unresolved = render_unresolved(registry);
    if !unresolved.is_empty() {
        out.push_str("\nNo encoder record:\n");
        out.push_str(&unresolved);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncoderResolver;
    use crate::path::{EndpointFilters, PathRole, RedirectPolicy};
    use crate::testing::{CallLog, MockBroadcaster, MockControl, MockDirectory};
    use sigpath_core::SourceId;
    use std::sync::Arc;

    fn registry(log: &CallLog) -> EncoderRegistry {
        let directory = MockDirectory::new(log.clone()).with_encoder("A", "ALPHA", "enc-east-a", "10.0.0.1");
        let control = MockControl::new(log.clone()).with_status("enc-east-a", "RUNNING");
        let resolver = EncoderResolver::new(Arc::new(directory), Arc::new(control), vec!["east".to_string()]);
        tokio_test::block_on(EncoderRegistry::build(
            &resolver,
            vec![SourceId::new("A"), SourceId::new("Z")],
        ))
    }

    #[test]
    fn test_encoder_table() {
        let log = CallLog::default();
        let table = render_encoders(&registry(&log));
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("A        ALPHA"));
        assert!(lines[1].ends_with("RUNNING"));
    }

    #[test]
    fn test_routing_limited_to_registry_members() {
        let log = CallLog::default();
        let registry = registry(&log);
        let broadcaster = MockBroadcaster::new("pri", log.clone())
            .with_output("o1", "A_ALPHA_OUT", "A_SRC")
            .with_output("o2", "Q_QUEBEC_OUT", "Q_SRC");
        let mut path = PathModel::new(PathRole::Primary, Arc::new(broadcaster), RedirectPolicy::Seamless);
        tokio_test::block_on(path.load(&EndpointFilters::all())).unwrap();

        let text = render_routing(&path, &registry);
        assert!(text.contains("A_SRC  -->  A_ALPHA_OUT"));
        assert!(!text.contains("Q_QUEBEC_OUT"));
    }

    #[test]
    fn test_unresolved_listed_separately() {
        let log = CallLog::default();
        let text = render_unresolved(&registry(&log));
        assert_eq!(text.trim(), "Z        no directory record");
    }
}
