use crate::session::engine::{record_save, BusyGuard, ExamSession, SaveKind};
use crate::session::errors::SessionError;
use crate::session::events::{NoticeLevel, SessionEvent};
use crate::session::outcome::{CommitOutcome, IgnoreReason, NavOutcome};

impl ExamSession {
    /// Saves progress for the displayed question, then displays `index`.
    ///
    /// The pointer only moves after the server acknowledged the save. On
    /// failure the student stays put and the outgoing question keeps timing.
    pub async fn go_to(&self, index: usize) -> Result<NavOutcome, SessionError> {
        let inner = &*self.inner;
        let (request, from) = {
            let mut state = inner.lock();
            if let Some(reason) = state.blocked() {
                tracing::debug!(?reason, index, "Navigation ignored");
                return Ok(NavOutcome::Ignored(reason));
            }
            if index >= state.store.len() {
                return Ok(NavOutcome::Ignored(IgnoreReason::OutOfBounds));
            }
            let from = state.store.active_index();
            if index == from {
                return Ok(NavOutcome::Ignored(IgnoreReason::AlreadyActive));
            }
            if state.busy {
                return Err(SessionError::Busy);
            }

            let time_taken = state.store.time_mut().flush();
            let request = state.progress_request(
                inner.session_id,
                SaveKind::Navigate,
                inner.remaining_seconds(),
                time_taken,
                None,
            )?;
            state.busy = true;
            (request, from)
        };
        let _busy = BusyGuard::armed(inner);

        let result = inner.backend.save_progress(&request).await;
        record_save(SaveKind::Navigate, result.is_ok());

        if let Err(err) = result {
            tracing::warn!(
                session_id = %inner.session_id,
                question = request.last_question_seq_no,
                error = %err,
                "Navigation save failed; staying on current question"
            );
            inner.emit(SessionEvent::notice(
                NoticeLevel::Warning,
                "Could not save your progress. Please try again.",
            ));
            return Err(err.into());
        }

        let mut state = inner.lock();
        if let Some(reason) = state.blocked() {
            return Ok(NavOutcome::Ignored(reason));
        }
        // Time spent while the save was in flight belongs to the outgoing question.
        state.store.time_mut().flush();
        state.store.activate(index);
        drop(state);

        inner.emit(SessionEvent::Navigated { from, to: index });
        tracing::debug!(session_id = %inner.session_id, from, to = index, "Navigated");
        Ok(NavOutcome::Moved { from, to: index })
    }

    /// The palette tile for question `index` was clicked.
    pub async fn select_question(&self, index: usize) -> Result<NavOutcome, SessionError> {
        self.go_to(index).await
    }

    /// No-op on the last question.
    pub async fn next(&self) -> Result<NavOutcome, SessionError> {
        let target = {
            let state = self.inner.lock();
            let active = state.store.active_index();
            (active < state.store.last_index()).then_some(active + 1)
        };
        match target {
            Some(index) => self.go_to(index).await,
            None => Ok(NavOutcome::Ignored(IgnoreReason::OutOfBounds)),
        }
    }

    /// No-op on the first question.
    pub async fn prev(&self) -> Result<NavOutcome, SessionError> {
        let target = self.inner.lock().store.active_index().checked_sub(1);
        match target {
            Some(index) => self.go_to(index).await,
            None => Ok(NavOutcome::Ignored(IgnoreReason::OutOfBounds)),
        }
    }

    /// "Save & Next": persists the pending selection and moves on unless on the last question.
    pub async fn commit_and_advance(&self) -> Result<CommitOutcome, SessionError> {
        let inner = &*self.inner;
        let (request, answer, from) = {
            let mut state = inner.lock();
            if let Some(reason) = state.blocked() {
                tracing::debug!(?reason, "Commit ignored");
                return Ok(CommitOutcome::Ignored(reason));
            }
            if state.busy {
                return Err(SessionError::Busy);
            }

            let answer = state.store.pending_selection().map(str::to_string);
            let time_taken = state.store.time_mut().flush();
            let request = state.progress_request(
                inner.session_id,
                SaveKind::Commit,
                inner.remaining_seconds(),
                time_taken,
                answer.clone(),
            )?;
            state.busy = true;
            (request, answer, state.store.active_index())
        };
        let _busy = BusyGuard::armed(inner);
        let q_id = request.last_question_seq_no;

        let result = inner.backend.save_progress(&request).await;
        record_save(SaveKind::Commit, result.is_ok());

        if let Err(err) = result {
            tracing::warn!(
                session_id = %inner.session_id,
                question = q_id,
                error = %err,
                "Answer save failed"
            );
            inner.emit(SessionEvent::notice(
                NoticeLevel::Error,
                "Could not save your answer. Please try again.",
            ));
            return Err(err.into());
        }

        let mut state = inner.lock();
        if state.guard.has_submitted() {
            return Ok(CommitOutcome::Ignored(IgnoreReason::Submitted));
        }
        if !state.mounted {
            return Ok(CommitOutcome::Ignored(IgnoreReason::Unmounted));
        }
        state.store.commit_answer(q_id, answer.as_deref());

        let advanced_to = if state.guard.submission_in_flight() || from >= state.store.last_index()
        {
            None
        } else {
            state.store.time_mut().flush();
            state.store.activate(from + 1).map(|_| from + 1)
        };
        drop(state);

        inner.emit(SessionEvent::Committed { question: q_id });
        if let Some(to) = advanced_to {
            inner.emit(SessionEvent::Navigated { from, to });
        }
        tracing::debug!(
            session_id = %inner.session_id,
            question = q_id,
            ?advanced_to,
            "Answer committed"
        );
        Ok(CommitOutcome::Committed { question: q_id, advanced_to })
    }
}
