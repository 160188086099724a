use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::core::time::now_utc;
use crate::session::engine::{record_save, ExamSession, SaveKind, SessionInner};
use crate::session::guard::SubmissionPhase;

/// Background heartbeat. Armed while the phase is `Idle`, paused while a
/// submission is in flight, gone once submitted, unmounted or dropped.
///
/// Re-arming restarts the period from scratch.
pub(crate) fn spawn_autosave(
    session: Weak<SessionInner>,
    period: Duration,
    mut phase: watch::Receiver<SubmissionPhase>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        'armed: loop {
            let current = *phase.borrow_and_update();
            match current {
                SubmissionPhase::Submitted => break,
                SubmissionPhase::Submitting { .. } => {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        changed = phase.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                    continue;
                }
                SubmissionPhase::Idle => {}
            }

            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break 'armed;
                        }
                    }
                    changed = phase.changed() => {
                        if changed.is_err() {
                            break 'armed;
                        }
                        if !matches!(*phase.borrow(), SubmissionPhase::Idle) {
                            continue 'armed;
                        }
                    }
                    _ = tick.tick() => {
                        let Some(inner) = session.upgrade() else {
                            break 'armed;
                        };
                        ExamSession { inner }.heartbeat().await;
                    }
                }
            }
        }
        tracing::debug!("Autosave channel torn down");
    })
}

impl ExamSession {
    /// One autosave tick. Sends the running total for the displayed question
    /// without touching the accumulator. Returns whether a save went out and succeeded.
    ///
    /// Runs even while a navigation or commit save is in flight. The per-question
    /// high-water mark keeps `timeTakenSeconds` from going backwards.
    pub(crate) async fn heartbeat(&self) -> bool {
        let inner = &*self.inner;
        let request = {
            let mut state = inner.lock();
            if state.blocked().is_some() {
                tracing::debug!("Heartbeat skipped");
                return false;
            }
            let Some(q_id) = state.store.active_q_id() else {
                return false;
            };
            let time_taken = state.store.time().accumulated_for(q_id);
            match state.progress_request(
                inner.session_id,
                SaveKind::Heartbeat,
                inner.remaining_seconds(),
                time_taken,
                None,
            ) {
                Ok(request) => request,
                Err(_) => return false,
            }
        };

        match inner.backend.save_progress(&request).await {
            Ok(()) => {
                record_save(SaveKind::Heartbeat, true);
                inner.lock().last_heartbeat_at = Some(now_utc());
                tracing::debug!(
                    session_id = %inner.session_id,
                    question = request.last_question_seq_no,
                    time_taken_seconds = request.time_taken_seconds,
                    "Heartbeat saved"
                );
                true
            }
            Err(err) => {
                record_save(SaveKind::Heartbeat, false);
                // The next tick carries fresher numbers.
                tracing::warn!(
                    session_id = %inner.session_id,
                    error = %err,
                    "Heartbeat save failed"
                );
                false
            }
        }
    }
}
