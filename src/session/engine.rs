use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;
use validator::Validate;

use crate::core::config::ExamSettings;
use crate::core::time::{now_utc, Clock};
use crate::schemas::{ExamQuestion, ResultQuery, SaveProgressRequest, SessionRef};
use crate::services::{resolve_session_id, session_key, ExamBackend, KeyStore};
use crate::session::accumulator::TimeLedger;
use crate::session::autosave::spawn_autosave;
use crate::session::countdown::{spawn_countdown, Countdown};
use crate::session::errors::SessionError;
use crate::session::events::{NoticeLevel, SessionEvent};
use crate::session::guard::{SubmissionGuard, SubmissionPhase, SubmitTrigger};
use crate::session::outcome::{IgnoreReason, LeaveOutcome, LocalOutcome};
use crate::session::response::{QuestionId, QuestionResponse, QuestionStatus, StatusSummary};
use crate::session::store::SessionStore;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub autosave_interval: Duration,
    pub countdown_tick: Duration,
}

impl SessionTiming {
    pub fn from_settings(exam: &ExamSettings) -> Self {
        Self { autosave_interval: exam.autosave_interval(), countdown_tick: exam.countdown_tick() }
    }
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self { autosave_interval: Duration::from_secs(30), countdown_tick: Duration::from_secs(1) }
    }
}

#[derive(Debug, Clone)]
pub struct MountOptions {
    pub exam_id: String,
    pub student_id: String,
    /// Externally supplied attempt id; otherwise the stored one is resumed or a new one created.
    pub session_id: Option<Uuid>,
    pub timing: SessionTiming,
}

impl MountOptions {
    pub fn new(exam_id: impl Into<String>, student_id: impl Into<String>) -> Self {
        Self {
            exam_id: exam_id.into(),
            student_id: student_id.into(),
            session_id: None,
            timing: SessionTiming::default(),
        }
    }

    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_timing(mut self, timing: SessionTiming) -> Self {
        self.timing = timing;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SaveKind {
    Navigate,
    Commit,
    Heartbeat,
}

impl SaveKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::Commit => "commit",
            Self::Heartbeat => "heartbeat",
        }
    }

    fn includes_answer(self) -> bool {
        matches!(self, Self::Commit)
    }

    fn includes_correct_answer(self) -> bool {
        matches!(self, Self::Navigate | Self::Commit)
    }
}

pub(crate) fn record_save(kind: SaveKind, ok: bool) {
    let status = if ok { "ok" } else { "failed" };
    metrics::counter!("exam_saves_total", "kind" => kind.as_str(), "status" => status).increment(1);
}

pub(crate) fn record_submission(trigger: SubmitTrigger, ok: bool) {
    let status = if ok { "ok" } else { "failed" };
    metrics::counter!("exam_submissions_total", "trigger" => trigger.as_str(), "status" => status)
        .increment(1);
}

pub(crate) struct SessionState {
    pub(crate) store: SessionStore,
    pub(crate) guard: SubmissionGuard,
    pub(crate) busy: bool,
    pub(crate) expired: bool,
    pub(crate) mounted: bool,
    pub(crate) last_heartbeat_at: Option<OffsetDateTime>,
    sent_time: HashMap<QuestionId, u64>,
}

impl SessionState {
    /// Reason a state-changing action must be a no-op, if any.
    pub(crate) fn blocked(&self) -> Option<IgnoreReason> {
        match self.guard.phase() {
            SubmissionPhase::Submitted => Some(IgnoreReason::Submitted),
            SubmissionPhase::Submitting { .. } => Some(IgnoreReason::SubmissionInFlight),
            SubmissionPhase::Idle if !self.mounted => Some(IgnoreReason::Unmounted),
            SubmissionPhase::Idle => None,
        }
    }

    /// Builds the `SaveProgress` body for the displayed question.
    ///
    /// `timeTaken` never goes down between two requests for the same question.
    pub(crate) fn progress_request(
        &mut self,
        session_id: Uuid,
        kind: SaveKind,
        remaining_seconds: u64,
        time_taken: u64,
        answer: Option<String>,
    ) -> Result<SaveProgressRequest, SessionError> {
        let question = self
            .store
            .active_question()
            .ok_or_else(|| SessionError::precondition("no question is displayed"))?;
        let q_id = question.sequence_number;
        let correct_answer =
            if kind.includes_correct_answer() { question.correct_option_key.clone() } else { None };

        let sent = self.sent_time.entry(q_id).or_insert(0);
        *sent = (*sent).max(time_taken);
        let time_taken_seconds = *sent;

        let marked_for_review =
            self.store.response(q_id).map(|record| record.marked_for_review).unwrap_or(false);

        Ok(SaveProgressRequest {
            session_id,
            last_question_seq_no: q_id,
            answer: kind.includes_answer().then(|| answer.unwrap_or_default()),
            marked_for_review,
            remaining_time_seconds: remaining_seconds,
            time_taken_seconds,
            correct_answer,
        })
    }
}

pub(crate) struct SessionInner {
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) session_id: Uuid,
    pub(crate) backend: Arc<dyn ExamBackend>,
    key_store: Arc<dyn KeyStore>,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    remaining: watch::Receiver<u64>,
    pub(crate) phase: watch::Sender<SubmissionPhase>,
    pub(crate) shutdown: watch::Sender<bool>,
    mounted_at: OffsetDateTime,
}

impl SessionInner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscriber is fine; the UI may not be listening yet.
        let _ = self.events.send(event);
    }

    pub(crate) fn remaining_seconds(&self) -> u64 {
        *self.remaining.borrow()
    }

    pub(crate) fn session_ref(&self) -> SessionRef {
        SessionRef { session_id: self.session_id }
    }
}

/// Clears the request-scoped busy flag however the request ends.
pub(crate) struct BusyGuard<'a> {
    inner: &'a SessionInner,
}

impl<'a> BusyGuard<'a> {
    /// The caller must already have set `busy` under the lock.
    pub(crate) fn armed(inner: &'a SessionInner) -> Self {
        Self { inner }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.inner.lock().busy = false;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionView {
    pub index: usize,
    pub q_id: QuestionId,
    pub status: QuestionStatus,
    pub marked_for_review: bool,
    pub time_spent_seconds: u64,
}

/// Read-only view for rendering the exam screen.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub exam_id: String,
    pub session_id: Uuid,
    pub active_index: usize,
    pub current: Option<ExamQuestion>,
    pub pending_selection: Option<String>,
    pub questions: Vec<QuestionView>,
    pub summary: StatusSummary,
    pub remaining_seconds: u64,
    pub phase: SubmissionPhase,
    pub busy: bool,
    pub expired: bool,
    pub mounted_at: OffsetDateTime,
    pub last_heartbeat_at: Option<OffsetDateTime>,
}

/// Handle to one mounted exam attempt. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ExamSession {
    pub(crate) inner: Arc<SessionInner>,
}

impl ExamSession {
    /// Seeds the store from `FetchQuestions` and starts the countdown and the autosave channel.
    ///
    /// `clock` drives both the countdown value and the per-question timer.
    pub async fn mount(
        backend: Arc<dyn ExamBackend>,
        key_store: Arc<dyn KeyStore>,
        clock: Arc<dyn Clock>,
        options: MountOptions,
    ) -> Result<Self, SessionError> {
        let MountOptions { exam_id, student_id, session_id, timing } = options;
        if exam_id.trim().is_empty() {
            return Err(SessionError::precondition("exam id is missing"));
        }
        if student_id.trim().is_empty() {
            return Err(SessionError::precondition("student id is missing"));
        }

        let session_id = match session_id {
            Some(session_id) => {
                key_store.set(&session_key(&exam_id), &session_id.to_string())?;
                session_id
            }
            None => resolve_session_id(key_store.as_ref(), &exam_id)?,
        };

        let paper = backend.fetch_questions(&exam_id).await?;
        paper.validate().map_err(|err| {
            SessionError::precondition(format!("exam {exam_id} cannot be taken: {err}"))
        })?;

        let countdown = Countdown::from_minutes(paper.exam_duration_minutes);
        let question_count = paper.questions.len();
        let mut store = SessionStore::new(paper.into_ordered_questions(), clock.clone());
        store.activate(0);

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (remaining_tx, remaining_rx) = watch::channel(countdown.remaining());
        let (phase_tx, phase_rx) = watch::channel(SubmissionPhase::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(SessionInner {
            exam_id,
            student_id,
            session_id,
            backend,
            key_store,
            state: Mutex::new(SessionState {
                store,
                guard: SubmissionGuard::default(),
                busy: false,
                expired: false,
                mounted: true,
                last_heartbeat_at: None,
                sent_time: HashMap::new(),
            }),
            events,
            remaining: remaining_rx,
            phase: phase_tx,
            shutdown: shutdown_tx,
            mounted_at: now_utc(),
        });

        let on_expiry = {
            let session = Arc::downgrade(&inner);
            move || handle_expiry(session)
        };
        spawn_countdown(
            countdown,
            clock,
            timing.countdown_tick,
            remaining_tx,
            shutdown_rx.clone(),
            on_expiry,
        );
        spawn_autosave(Arc::downgrade(&inner), timing.autosave_interval, phase_rx, shutdown_rx);

        tracing::info!(
            exam_id = %inner.exam_id,
            session_id = %inner.session_id,
            questions = question_count,
            remaining_seconds = inner.remaining_seconds(),
            "Exam session mounted"
        );

        Ok(Self { inner })
    }

    pub fn exam_id(&self) -> &str {
        &self.inner.exam_id
    }

    pub fn student_id(&self) -> &str {
        &self.inner.student_id
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Remaining exam time, updated on every countdown tick.
    pub fn remaining(&self) -> watch::Receiver<u64> {
        self.inner.remaining.clone()
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.inner.remaining_seconds()
    }

    pub fn phase(&self) -> SubmissionPhase {
        self.inner.lock().guard.phase()
    }

    pub fn has_submitted(&self) -> bool {
        self.inner.lock().guard.has_submitted()
    }

    /// True while a navigation, commit or submission request is in flight.
    pub fn is_busy(&self) -> bool {
        let state = self.inner.lock();
        state.busy || matches!(state.guard.phase(), SubmissionPhase::Submitting { .. })
    }

    pub fn active_index(&self) -> usize {
        self.inner.lock().store.active_index()
    }

    pub fn question_count(&self) -> usize {
        self.inner.lock().store.len()
    }

    pub fn response(&self, q_id: QuestionId) -> Option<QuestionResponse> {
        self.inner.lock().store.response(q_id).cloned()
    }

    pub fn status(&self, q_id: QuestionId) -> QuestionStatus {
        self.inner.lock().store.status(q_id)
    }

    pub fn ledger(&self) -> TimeLedger {
        self.inner.lock().store.ledger().clone()
    }

    /// Ledger plus the running visit of the displayed question.
    pub fn time_spent(&self, q_id: QuestionId) -> u64 {
        self.inner.lock().store.time().accumulated_for(q_id)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let remaining_seconds = self.inner.remaining_seconds();
        let state = self.inner.lock();
        let store = &state.store;

        let questions = store
            .questions()
            .iter()
            .enumerate()
            .map(|(index, question)| {
                let q_id = question.sequence_number;
                QuestionView {
                    index,
                    q_id,
                    status: store.status(q_id),
                    marked_for_review: store
                        .response(q_id)
                        .map(|record| record.marked_for_review)
                        .unwrap_or(false),
                    time_spent_seconds: store.time().accumulated_for(q_id),
                }
            })
            .collect();

        SessionSnapshot {
            exam_id: self.inner.exam_id.clone(),
            session_id: self.inner.session_id,
            active_index: store.active_index(),
            current: store.active_question().cloned(),
            pending_selection: store.pending_selection().map(str::to_string),
            questions,
            summary: store.summary(),
            remaining_seconds,
            phase: state.guard.phase(),
            busy: state.busy || matches!(state.guard.phase(), SubmissionPhase::Submitting { .. }),
            expired: state.expired,
            mounted_at: self.inner.mounted_at,
            last_heartbeat_at: state.last_heartbeat_at,
        }
    }

    /// Transient selection for the displayed question; nothing is sent.
    pub fn set_answer(&self, q_id: QuestionId, option_key: &str) -> LocalOutcome {
        let mut state = self.inner.lock();
        if let Some(reason) = state.blocked() {
            return LocalOutcome::Ignored(reason);
        }
        if state.store.set_answer(q_id, option_key) {
            LocalOutcome::Applied
        } else {
            tracing::debug!(question = q_id, "Selection ignored: question is not displayed");
            LocalOutcome::Ignored(IgnoreReason::NotActiveQuestion)
        }
    }

    pub fn mark_for_review(&self, q_id: QuestionId) -> LocalOutcome {
        self.local_update(|store| store.mark_for_review(q_id))
    }

    pub fn unmark_for_review(&self, q_id: QuestionId) -> LocalOutcome {
        self.local_update(|store| store.unmark_for_review(q_id))
    }

    fn local_update(&self, apply: impl FnOnce(&mut SessionStore) -> bool) -> LocalOutcome {
        let mut state = self.inner.lock();
        if let Some(reason) = state.blocked() {
            return LocalOutcome::Ignored(reason);
        }
        if apply(&mut state.store) {
            LocalOutcome::Applied
        } else {
            LocalOutcome::Ignored(IgnoreReason::OutOfBounds)
        }
    }

    /// `FetchResult` for the result view; only valid after a successful submission.
    pub async fn fetch_result(&self) -> Result<serde_json::Value, SessionError> {
        if !self.has_submitted() {
            return Err(SessionError::precondition("exam has not been submitted yet"));
        }

        let query = ResultQuery {
            session_id: self.inner.session_id,
            student_id: self.inner.student_id.clone(),
        };
        Ok(self.inner.backend.fetch_result(&query).await?)
    }

    /// Silences the countdown and autosave. In-flight requests still complete, inertly.
    pub fn unmount(&self) {
        let was_mounted = std::mem::replace(&mut self.inner.lock().mounted, false);
        self.inner.shutdown.send_replace(true);
        if was_mounted {
            tracing::debug!(session_id = %self.inner.session_id, "Exam session unmounted");
        }
    }

    /// Abandons the attempt: releases the server row and forgets the stored session id.
    pub async fn leave(&self) -> Result<LeaveOutcome, SessionError> {
        self.unmount();

        let server_cleared = match self.inner.backend.clear_session(self.inner.session_ref()).await
        {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    session_id = %self.inner.session_id,
                    error = %err,
                    "ClearSession failed; removing local session id anyway"
                );
                self.inner.emit(SessionEvent::notice(
                    NoticeLevel::Warning,
                    "The server could not release this attempt.",
                ));
                false
            }
        };

        self.inner.key_store.remove(&session_key(&self.inner.exam_id))?;
        self.inner.emit(SessionEvent::Left);
        tracing::info!(
            exam_id = %self.inner.exam_id,
            session_id = %self.inner.session_id,
            server_cleared,
            "Left exam"
        );

        Ok(LeaveOutcome { server_cleared })
    }
}

impl std::fmt::Debug for ExamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExamSession")
            .field("exam_id", &self.inner.exam_id)
            .field("session_id", &self.inner.session_id)
            .finish_non_exhaustive()
    }
}

fn handle_expiry(session: Weak<SessionInner>) {
    let Some(inner) = session.upgrade() else {
        return;
    };

    inner.lock().expired = true;
    inner.emit(SessionEvent::Expired);

    let session = ExamSession { inner };
    tokio::spawn(async move {
        if let Err(err) = session.submit(SubmitTrigger::Expiry).await {
            tracing::debug!(error = %err, "Expiry submission did not complete");
        }
    });
}
