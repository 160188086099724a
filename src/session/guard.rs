use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitTrigger {
    Manual,
    Expiry,
}

impl SubmitTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Expiry => "expiry",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SubmissionPhase {
    Idle,
    Submitting { trigger: SubmitTrigger },
    Submitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid submission transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: SubmissionPhase,
    pub to: SubmissionPhase,
}

/// `Idle -> Submitting -> Submitted`, with `Submitting -> Idle` on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionGuard {
    phase: SubmissionPhase,
}

impl Default for SubmissionGuard {
    fn default() -> Self {
        Self { phase: SubmissionPhase::Idle }
    }
}

impl SubmissionGuard {
    pub fn phase(&self) -> SubmissionPhase {
        self.phase
    }

    /// Set the instant any submit path begins; stays set once submitted.
    pub fn submission_in_flight(&self) -> bool {
        !matches!(self.phase, SubmissionPhase::Idle)
    }

    pub fn has_submitted(&self) -> bool {
        matches!(self.phase, SubmissionPhase::Submitted)
    }

    /// Test-and-set entry point shared by every submit path.
    pub fn try_begin(&mut self, trigger: SubmitTrigger) -> Result<(), InvalidTransition> {
        self.transition(SubmissionPhase::Submitting { trigger })
    }

    pub fn complete(&mut self) -> Result<(), InvalidTransition> {
        self.transition(SubmissionPhase::Submitted)
    }

    pub fn rollback(&mut self) -> Result<(), InvalidTransition> {
        self.transition(SubmissionPhase::Idle)
    }

    fn transition(&mut self, to: SubmissionPhase) -> Result<(), InvalidTransition> {
        let allowed = matches!(
            (self.phase, to),
            (SubmissionPhase::Idle, SubmissionPhase::Submitting { .. })
                | (SubmissionPhase::Submitting { .. }, SubmissionPhase::Submitted)
                | (SubmissionPhase::Submitting { .. }, SubmissionPhase::Idle)
        );
        if !allowed {
            return Err(InvalidTransition { from: self.phase, to });
        }
        self.phase = to;
        Ok(())
    }
}
