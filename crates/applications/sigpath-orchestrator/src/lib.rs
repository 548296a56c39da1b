//! # Sigpath Orchestrator
//!
//! Routing and encoder lifecycle orchestration for a redundant pair of
//! stream-routing broadcasters.
//!
//! ## Architecture
//!
//! ```text
//!                 Orchestrator (engine)
//!          ┌───────────┼──────────────────┐
//!      PathPair   RoutingReconciler   EncoderRegistry
//!     pri │ bck                         │        │
//!   Broadcaster API               Directory   Control API
//! ```
//!
//! Every run rebuilds its model from live queries:
//!
//! 1. **Load**: both broadcasters' inputs and outputs
//! 2. **Resolve**: one encoder per primary output via the device directory
//! 3. **Act**: start, stop, switch or rename segments for one target
//!
//! Routing changes always touch primary then backup and are read back
//! afterwards. Control API failures are logged and the sequence continues.
//!
//! See [`engine`] for the action sequences.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod broadcaster;
pub mod config;
pub mod control;
pub mod directory;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod operator;
pub mod path;
pub mod reconcile;
pub mod status;
pub mod unattended;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Public exports
// ============================================================================

// Engine
pub use engine::{Collaborators, Orchestrator};

// Actions
pub use action::{ActionKind, ActionPhase, ActionPlan, ActionReport, PendingAction, Step};

// Models
pub use encoder::{Encoder, EncoderRegistry, EncoderResolver, ResolutionFailure, SegmentOutcome};
pub use path::{EndpointFilters, InputTransform, PathModel, PathRole, RedirectPolicy, RouteOutcome};
pub use reconcile::{ConvergenceReport, PathConvergence, PathPair, RoutingReconciler};

// HTTP collaborators
pub use broadcaster::HttpBroadcaster;
pub use control::HttpControl;
pub use directory::HttpDirectory;

// Front ends
pub use operator::{Operator, TargetChoice, TerminalOperator};
pub use unattended::UnattendedRequest;

// Configuration
pub use config::{Credentials, DeploymentConfig};

// Error handling
pub use error::{OrchestratorError, Result};
