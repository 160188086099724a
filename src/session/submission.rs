use crate::session::engine::{record_submission, ExamSession};
use crate::session::errors::SessionError;
use crate::session::events::{NoticeLevel, ResultRoute, SessionEvent};
use crate::session::guard::{SubmissionPhase, SubmitTrigger};
use crate::session::outcome::{IgnoreReason, SubmitOutcome};

impl ExamSession {
    /// Finishes the attempt with `MarkComplete`. Manual clicks and countdown
    /// expiry share this path; at most one request is ever in flight.
    ///
    /// A failed request re-arms the guard so the student can retry manually.
    pub async fn submit(&self, trigger: SubmitTrigger) -> Result<SubmitOutcome, SessionError> {
        let inner = &*self.inner;
        {
            let mut state = inner.lock();
            match state.guard.phase() {
                SubmissionPhase::Submitted => {
                    return Ok(SubmitOutcome::Ignored(IgnoreReason::Submitted));
                }
                SubmissionPhase::Submitting { .. } => {
                    tracing::debug!(trigger = trigger.as_str(), "Submission already in flight");
                    return Ok(SubmitOutcome::Ignored(IgnoreReason::SubmissionInFlight));
                }
                SubmissionPhase::Idle => {}
            }
            if !state.mounted {
                return Ok(SubmitOutcome::Ignored(IgnoreReason::Unmounted));
            }
            // Expiry must go through even while a navigation save is pending.
            if trigger == SubmitTrigger::Manual && state.busy {
                return Err(SessionError::Busy);
            }
            if let Err(err) = state.guard.try_begin(trigger) {
                tracing::debug!(error = %err, "Submission refused");
                return Ok(SubmitOutcome::Ignored(IgnoreReason::SubmissionInFlight));
            }
            inner.phase.send_replace(state.guard.phase());
            state.store.time_mut().flush();
        }

        tracing::info!(
            session_id = %inner.session_id,
            trigger = trigger.as_str(),
            remaining_seconds = inner.remaining_seconds(),
            "Submitting exam"
        );

        let result = inner.backend.mark_complete(inner.session_ref()).await;
        record_submission(trigger, result.is_ok());

        let mut state = inner.lock();
        match result {
            Ok(_) => {
                if let Err(err) = state.guard.complete() {
                    tracing::error!(error = %err, "Submission guard out of sync");
                }
                inner.phase.send_replace(state.guard.phase());
                let answered = state.store.summary().answered;
                drop(state);

                inner.shutdown.send_replace(true);
                tracing::info!(
                    exam_id = %inner.exam_id,
                    session_id = %inner.session_id,
                    trigger = trigger.as_str(),
                    answered,
                    "Exam submitted"
                );

                let route = ResultRoute {
                    exam_id: inner.exam_id.clone(),
                    session_id: inner.session_id,
                    student_id: inner.student_id.clone(),
                };
                inner.emit(SessionEvent::notice(NoticeLevel::Info, "Exam submitted."));
                inner.emit(SessionEvent::Submitted(route.clone()));
                Ok(SubmitOutcome::Submitted(route))
            }
            Err(err) => {
                if let Err(guard_err) = state.guard.rollback() {
                    tracing::error!(error = %guard_err, "Submission guard out of sync");
                }
                inner.phase.send_replace(state.guard.phase());
                let retry_required = state.expired;
                drop(state);

                tracing::error!(
                    session_id = %inner.session_id,
                    trigger = trigger.as_str(),
                    retry_required,
                    error = %err,
                    "MarkComplete failed"
                );
                let message = if retry_required {
                    "Time is up but the submission failed. Press Submit to retry."
                } else {
                    "Could not submit the exam. Please try again."
                };
                inner.emit(SessionEvent::notice(NoticeLevel::Error, message));
                inner.emit(SessionEvent::SubmitFailed { retry_required });
                Err(err.into())
            }
        }
    }
}
