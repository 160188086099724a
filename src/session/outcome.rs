use serde::Serialize;

use crate::session::events::ResultRoute;
use crate::session::response::QuestionId;

/// Why an action was a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    Submitted,
    SubmissionInFlight,
    OutOfBounds,
    AlreadyActive,
    NotActiveQuestion,
    Unmounted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavOutcome {
    Moved { from: usize, to: usize },
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { question: QuestionId, advanced_to: Option<usize> },
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOutcome {
    Applied,
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted(ResultRoute),
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// Whether the backend confirmed `ClearSession`; the local entry is removed either way.
    pub server_cleared: bool,
}
