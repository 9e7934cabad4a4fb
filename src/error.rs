//! Error taxonomy for the run surface.
//!
//! Executor failures inside a run are deliberately *not* part of this
//! taxonomy: they are captured into the offending node's state so the rest of
//! the pipeline keeps going, and only surface here indirectly when the output
//! node never produces a frame.

use thiserror::Error;

/// One structural problem found by pipeline validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// The offending node, when the problem is attributable to one.
    pub node_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(node_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            node_id: node_id.map(str::to_owned),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "{}: {}", id, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Topological sort failed because the graph contains a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Pipeline contains a cycle")]
pub struct CycleError;

/// Cooperative-cancellation marker.
///
/// Raised (wrapped in `anyhow::Error`) from any suspension point once the
/// run's [`CancelSignal`](crate::cancel::CancelSignal) fires; the scheduler
/// downcasts to it and rethrows as [`EngineError::Aborted`] unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("run aborted")]
pub struct Abort;

/// Terminal failure of an entire `run`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("pipeline validation failed: {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("run aborted")]
    Aborted,

    #[error("Pipeline produced no output")]
    NoOutput,
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
