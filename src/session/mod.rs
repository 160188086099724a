//! One student's attempt at one exam: answers, timing, navigation, autosave and submission.

pub mod accumulator;
mod autosave;
pub mod countdown;
mod engine;
pub mod errors;
pub mod events;
pub mod guard;
mod navigation;
pub mod outcome;
pub mod response;
pub mod store;
mod submission;


pub use accumulator::{TimeAccumulator, TimeLedger};
pub use countdown::{Countdown, CountdownState, CountdownTick};
pub use engine::{ExamSession, MountOptions, QuestionView, SessionSnapshot, SessionTiming};
pub use errors::SessionError;
pub use events::{NoticeLevel, ResultRoute, SessionEvent};
pub use guard::{SubmissionGuard, SubmissionPhase, SubmitTrigger};
pub use outcome::{
    CommitOutcome, IgnoreReason, LeaveOutcome, LocalOutcome, NavOutcome, SubmitOutcome,
};
pub use response::{QuestionId, QuestionResponse, QuestionStatus, StatusSummary};
pub use store::SessionStore;
