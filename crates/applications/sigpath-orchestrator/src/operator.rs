//! Operator front end
//!
//! The engine asks an [`Operator`] for every interactive decision. The
//! terminal implementation reads numbered choices from any `BufRead`, so the
//! same code drives stdin and the tests.

use crate::action::{ActionKind, ActionPlan};
use crate::error::{OrchestratorError, Result};
use sigpath_core::{EncoderStatus, SourceId};
use std::io::{BufRead, Write};

/// One selectable target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetChoice {
    /// Logical service this encoder serves
    pub source_id: SourceId,
    /// Service callsign from the directory
    pub callsign: String,
    /// VM status shown next to the entry
    pub status: EncoderStatus,
}

/// Source of interactive decisions
pub trait Operator {
    /// Pick an action from the deployment's menu
    fn choose_action(&mut self, actions: &[ActionKind]) -> Result<ActionKind>;

    /// Pick a target; may return an id that is not among `candidates`
    fn choose_target(&mut self, kind: ActionKind, candidates: &[TargetChoice]) -> Result<SourceId>;

    /// Pick an input stream id (or a selector resolving to one)
    fn choose_input(&mut self, target: &SourceId, inputs: &[String]) -> Result<String>;

    /// Approve the plan
    fn confirm(&mut self, plan: &ActionPlan) -> Result<bool>;

    /// Tell the operator why the last answer was rejected
    fn reject(&mut self, reason: &str);
}

/// Numbered menus on a line-oriented terminal
pub struct TerminalOperator<R, W> {
    reader: R,
    writer: W,
}

impl TerminalOperator<std::io::StdinLock<'static>, std::io::Stdout> {
    /// Operator on stdin/stdout
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalOperator<R, W> {
    /// Client with the configured timeout
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    fn prompt(&mut self, text: &str) -> Result<String> {
        write!(self.writer, "{}", text)?;
        self.writer.flush()?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(OrchestratorError::Cancelled);
        }
        Ok(line.trim().to_string())
    }

    /// Index into a 1-based menu, if `answer` is one
    fn menu_index(answer: &str, len: usize) -> Option<usize> {
        answer
            .parse::<usize>()
            .ok()
            .filter(|n| (1..=len).contains(n))
            .map(|n| n - 1)
    }
}

impl<R: BufRead, W: Write> Operator for TerminalOperator<R, W> {
    fn choose_action(&mut self, actions: &[ActionKind]) -> Result<ActionKind> {
        loop {
            writeln!(self.writer)?;
            for (i, action) in actions.iter().enumerate() {
                writeln!(self.writer, "{}. {}", i + 1, action.label())?;
            }
            let answer = self.prompt("Select an action: ")?;
            if let Some(i) = Self::menu_index(&answer, actions.len()) {
                return Ok(actions[i]);
            }
            self.reject(&format!("{} is not a menu entry", answer));
        }
    }

    fn choose_target(&mut self, kind: ActionKind, candidates: &[TargetChoice]) -> Result<SourceId> {
        writeln!(self.writer)?;
        for (i, choice) in candidates.iter().enumerate() {
            writeln!(
                self.writer,
                "{:>3}. {:<8} | {:<12} {}",
                i + 1,
                choice.source_id,
                choice.callsign,
                choice.status
            )?;
        }
        let answer = self.prompt(&format!("Enter ID or number to {}: ", kind.label().to_lowercase()))?;
        Ok(match Self::menu_index(&answer, candidates.len()) {
            Some(i) => candidates[i].source_id.clone(),
            None => SourceId::new(answer),
        })
    }

    fn choose_input(&mut self, target: &SourceId, inputs: &[String]) -> Result<String> {
        writeln!(self.writer)?;
        for (i, input) in inputs.iter().enumerate() {
            writeln!(self.writer, "{:>3}. {}", i + 1, input)?;
        }
        let answer = self.prompt(&format!("Select input for {}: ", target))?;
        Ok(match Self::menu_index(&answer, inputs.len()) {
            Some(i) => inputs[i].clone(),
            None => answer,
        })
    }

    fn confirm(&mut self, plan: &ActionPlan) -> Result<bool> {
        writeln!(self.writer)?;
        write!(self.writer, "{}", plan.confirmation())?;
        let answer = self.prompt("Confirm (y/n): ")?;
        Ok(answer == "y")
    }

    fn reject(&mut self, reason: &str) {
        // Nothing useful to do if the terminal itself is gone
        let _ = writeln!(self.writer, "❌ {}", reason);
    }
}
