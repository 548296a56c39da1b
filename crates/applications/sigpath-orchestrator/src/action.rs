//! Operator actions
//!
//! The fixed set of things an operator can ask for, and the records an
//! action leaves behind while it moves through its phases:
//!
//! ```text
//! SelectTarget ──> Confirm ──> Execute ──> Done
//!      │              │
//!      └─ re-prompt   └─ cancel (exit 0)
//! ```

use crate::encoder::SegmentOutcome;
use crate::path::{MappingLine, PathRole, RouteOutcome};
use crate::reconcile::ConvergenceReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigpath_core::SourceId;
use uuid::Uuid;

/// Kind of operator action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Route the target, boot its VM, start its service
    Start,
    /// Stop the target's service(s), then its VM
    Stop,
    /// Stop only the target's service
    StopService,
    /// Change the input feeding a mapped output
    Switch,
    /// Increment muxer segment names (restarts the service)
    Segment,
    /// Show status and leave
    Exit,
}

impl ActionKind {
    /// Parse a command-line action keyword
    pub fn parse_keyword(keyword: &str) -> Option<Self> {
        match keyword.trim().to_lowercase().as_str() {
            "start" | "start_service" => Some(Self::Start),
            "stop" | "stop_vm" => Some(Self::Stop),
            "stop_service" => Some(Self::StopService),
            "switch" | "switch_source" => Some(Self::Switch),
            "segment" => Some(Self::Segment),
            "exit" => Some(Self::Exit),
            _ => None,
        }
    }

    /// Canonical keyword
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::StopService => "stop_service",
            Self::Switch => "switch",
            Self::Segment => "segment",
            Self::Exit => "exit",
        }
    }

    /// Menu label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Start => "Start Service",
            Self::Stop => "Stop Service and VM",
            Self::StopService => "Stop Service",
            Self::Switch => "Switch Source",
            Self::Segment => "Update Segment Names",
            Self::Exit => "Exit",
        }
    }

    /// Warning shown before confirmation of actions that interrupt a service
    pub fn warning(&self) -> Option<&'static str> {
        match self {
            Self::Stop | Self::StopService => Some("THIS WILL STOP THE SERVICE"),
            Self::Segment => Some("THIS WILL RESTART THE SERVICE"),
            Self::Switch => Some("THIS WILL CHANGE THE LIVE INPUT"),
            Self::Start | Self::Exit => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// Where an action currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionPhase {
    /// Picking a target (and input)
    SelectTarget,
    /// Waiting for the operator's `y/n`
    Confirm,
    /// Remote calls in progress
    Execute,
    /// Finished
    Done,
}

/// Intent held for the duration of one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Requested action
    pub kind: ActionKind,
    /// Output/service acted on
    pub target: SourceId,
    /// Callsign of the target's encoder record
    pub callsign: String,
    /// Input stream id selected on the primary path (routing actions only)
    pub input: Option<String>,
}

/// A validated action awaiting confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPlan {
    /// What will run
    pub pending: PendingAction,

    /// Mapping per path, empty for actions that do not route
    pub mappings: Vec<MappingLine>,

    /// Whether either path needs a redirect
    pub routing_required: bool,
}

impl ActionPlan {
    /// Text shown to the operator before `y/n`
    pub fn confirmation(&self) -> String {
        let mut text = format!(
            "{}: {} | {}\n",
            self.pending.kind.label().to_uppercase(),
            self.pending.target,
            self.pending.callsign
        );
        for line in &self.mappings {
            text.push_str(&format!("{}\n", line));
        }
        if !self.mappings.is_empty() && !self.routing_required {
            text.push_str("Service mapping changes are not required\n");
        }
        if let Some(warning) = self.pending.kind.warning() {
            text.push_str(&format!("WARNING: {}\n", warning));
        }
        text
    }
}

/// A step the engine executed (or deliberately skipped)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    /// Redirect attempt on one path
    Route {
        /// Path routed
        role: PathRole,
        /// What the broadcaster did
        outcome: RouteOutcome,
    },
    /// Read-back of both paths after routing
    Verify(ConvergenceReport),
    /// VM start issued
    StartVm {
        /// VM instance
        host: String,
    },
    /// VM start skipped
    VmAlreadyRunning {
        /// VM instance
        host: String,
    },
    /// End of the boot wait
    VmBooted {
        /// VM instance
        host: String,
        /// False when the budget ran out first
        running: bool,
    },
    /// Segment rename and its answer
    RenameSegment(SegmentOutcome),
    /// Service start issued
    StartService {
        /// Service started
        source_id: SourceId,
    },
    /// PID re-detection issued
    Reprobe {
        /// Service re-probed
        source_id: SourceId,
    },
    /// Reprobe not issued
    ReprobeSkipped {
        /// Why
        reason: String,
    },
    /// Service stop issued
    StopService {
        /// Service stopped
        source_id: SourceId,
    },
    /// VM stop issued
    StopVm {
        /// VM instance
        host: String,
    },
}

/// Record of one completed action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    /// Correlates log lines of one run
    pub run_id: Uuid,
    /// Action that ran
    pub kind: ActionKind,
    /// Target, once one was accepted
    pub target: Option<SourceId>,
    /// Last phase reached
    pub phase: ActionPhase,
    /// When the action was picked
    pub started_at: DateTime<Utc>,
    /// Set by [`finish`](Self::finish)
    pub finished_at: Option<DateTime<Utc>>,
    /// Steps in execution order
    pub steps: Vec<Step>,

    /// Run from command-line arguments instead of menus
    pub unattended: bool,

    /// UIs to open once the action is done
    pub open_urls: Vec<String>,
}

impl ActionReport {
    /// Empty report in the select-target phase
    pub fn new(run_id: Uuid, kind: ActionKind) -> Self {
        Self {
            run_id,
            kind,
            target: None,
            phase: ActionPhase::SelectTarget,
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            unattended: false,
            open_urls: Vec::new(),
        }
    }

    /// Mark the run as unattended
    pub fn unattended(mut self) -> Self {
        self.unattended = true;
        self
    }

    /// Append an executed step
    pub fn record(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Mark done and stamp the finish time
    pub fn finish(mut self) -> Self {
        self.phase = ActionPhase::Done;
        self.finished_at = Some(Utc::now());
        self
    }
}
