use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::core::time::{Clock, SystemClock};
use crate::schemas::{
    ExamPaper, ExamQuestion, MarkCompleteResponse, QuestionOption, ResultQuery,
    SaveProgressRequest, SessionRef,
};
use crate::services::{BackendError, ExamBackend, KeyStore, MemoryKeyStore};
use crate::session::{ExamSession, MountOptions, SessionTiming};

pub(crate) const EXAM_ID: &str = "exam-42";
pub(crate) const STUDENT_ID: &str = "student-7";

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<AsyncMutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(AsyncMutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    for (key, _) in std::env::vars() {
        if key.starts_with("OBE_") || key == "ENVIRONMENT" {
            std::env::remove_var(key);
        }
    }
    std::env::set_var("OBE_ENV", "test");
}

/// Lets spawned tasks run until they block on a timer or channel again.
pub(crate) async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

pub(crate) fn question(sequence_number: i64, correct_key: &str) -> ExamQuestion {
    ExamQuestion {
        sequence_number,
        text: format!("Question {sequence_number}"),
        options: ["A", "B", "C", "D"]
            .into_iter()
            .map(|key| QuestionOption { key: key.to_string(), text: format!("Option {key}") })
            .collect(),
        difficulty: None,
        correct_option_key: Some(correct_key.to_string()),
    }
}

pub(crate) fn paper(minutes: u32, question_count: i64) -> ExamPaper {
    ExamPaper {
        exam_duration_minutes: minutes,
        questions: (1..=question_count).map(|seq| question(seq, "A")).collect(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BackendCall {
    FetchQuestions(String),
    SaveProgress(SaveProgressRequest),
    MarkComplete(Uuid),
    ClearSession(Uuid),
    FetchResult(ResultQuery),
}

/// In-memory backend with call recording, failure injection and artificial latency.
#[derive(Default)]
pub(crate) struct FakeBackend {
    paper: Mutex<Option<ExamPaper>>,
    calls: Mutex<Vec<BackendCall>>,
    save_failures: AtomicUsize,
    complete_failures: AtomicUsize,
    clear_fails: AtomicBool,
    held_save: Mutex<Option<Duration>>,
    complete_delay: Mutex<Duration>,
}

impl FakeBackend {
    pub(crate) fn with_paper(paper: ExamPaper) -> Arc<Self> {
        let backend = Self::default();
        *backend.paper.lock().unwrap_or_else(PoisonError::into_inner) = Some(paper);
        Arc::new(backend)
    }

    pub(crate) fn fail_next_saves(&self, count: usize) {
        self.save_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_completes(&self, count: usize) {
        self.complete_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_clear(&self) {
        self.clear_fails.store(true, Ordering::SeqCst);
    }

    /// Delays only the next `save_progress` call; later saves answer at once.
    pub(crate) fn hold_next_save(&self, delay: Duration) {
        *self.held_save.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    pub(crate) fn set_complete_delay(&self, delay: Duration) {
        *self.complete_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub(crate) fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn saves(&self) -> Vec<SaveProgressRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::SaveProgress(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    /// Heartbeats carry neither an answer nor the correct key.
    pub(crate) fn heartbeats(&self) -> Vec<SaveProgressRequest> {
        self.saves()
            .into_iter()
            .filter(|request| request.answer.is_none() && request.correct_answer.is_none())
            .collect()
    }

    pub(crate) fn mark_complete_count(&self) -> usize {
        self.calls().iter().filter(|call| matches!(call, BackendCall::MarkComplete(_))).count()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }

    async fn delay(slot: &Mutex<Duration>) {
        let delay = *slot.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1)).is_ok()
}

#[async_trait]
impl ExamBackend for FakeBackend {
    async fn fetch_questions(&self, exam_id: &str) -> Result<ExamPaper, BackendError> {
        self.record(BackendCall::FetchQuestions(exam_id.to_string()));
        self.paper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| BackendError::Status { status: 404, detail: "Exam not found".into() })
    }

    async fn save_progress(&self, request: &SaveProgressRequest) -> Result<(), BackendError> {
        self.record(BackendCall::SaveProgress(request.clone()));
        let held = self.held_save.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(delay) = held {
            tokio::time::sleep(delay).await;
        }
        if take_failure(&self.save_failures) {
            return Err(BackendError::Unavailable("injected save failure".into()));
        }
        Ok(())
    }

    async fn mark_complete(
        &self,
        session: SessionRef,
    ) -> Result<MarkCompleteResponse, BackendError> {
        self.record(BackendCall::MarkComplete(session.session_id));
        Self::delay(&self.complete_delay).await;
        if take_failure(&self.complete_failures) {
            return Err(BackendError::Unavailable("injected complete failure".into()));
        }
        Ok(MarkCompleteResponse { success: Some(true) })
    }

    async fn clear_session(&self, session: SessionRef) -> Result<(), BackendError> {
        self.record(BackendCall::ClearSession(session.session_id));
        if self.clear_fails.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("injected clear failure".into()));
        }
        Ok(())
    }

    async fn fetch_result(&self, query: &ResultQuery) -> Result<Value, BackendError> {
        self.record(BackendCall::FetchResult(query.clone()));
        Ok(json!({ "sessionId": query.session_id, "score": 1 }))
    }
}

pub(crate) struct Mounted {
    pub(crate) session: ExamSession,
    pub(crate) backend: Arc<FakeBackend>,
    pub(crate) keys: Arc<MemoryKeyStore>,
}

/// Mounts against a fake backend on the tokio clock and lets the background tasks start.
pub(crate) async fn mount(paper: ExamPaper) -> Mounted {
    let backend = FakeBackend::with_paper(paper);
    let keys = Arc::new(MemoryKeyStore::new());
    let session = mount_with(backend.clone(), keys.clone(), MountOptions::new(EXAM_ID, STUDENT_ID))
        .await
        .expect("mount");
    Mounted { session, backend, keys }
}

pub(crate) async fn mount_with(
    backend: Arc<FakeBackend>,
    keys: Arc<MemoryKeyStore>,
    options: MountOptions,
) -> Result<ExamSession, crate::session::SessionError> {
    mount_on_clock(backend, keys, options, Arc::new(SystemClock)).await
}

pub(crate) async fn mount_on_clock(
    backend: Arc<FakeBackend>,
    keys: Arc<MemoryKeyStore>,
    options: MountOptions,
    clock: Arc<dyn Clock>,
) -> Result<ExamSession, crate::session::SessionError> {
    let keys: Arc<dyn KeyStore> = keys;
    let session =
        ExamSession::mount(backend, keys, clock, options.with_timing(SessionTiming::default()))
            .await?;
    settle().await;
    Ok(session)
}

/// Moves the paused tokio clock one second at a time, letting tasks react to every tick.
pub(crate) async fn elapse(seconds: u64) {
    for _ in 0..seconds {
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
    }
}

pub(crate) fn drain<T: Clone>(events: &mut tokio::sync::broadcast::Receiver<T>) -> Vec<T> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}
