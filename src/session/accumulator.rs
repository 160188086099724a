use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::time::Instant;

use crate::core::time::Clock;
use crate::session::response::QuestionId;

/// Whole seconds spent per question, summed across visits. Entries only grow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeLedger {
    seconds: BTreeMap<QuestionId, u64>,
}

impl TimeLedger {
    pub fn get(&self, q_id: QuestionId) -> u64 {
        self.seconds.get(&q_id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.seconds.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (QuestionId, u64)> + '_ {
        self.seconds.iter().map(|(q_id, seconds)| (*q_id, *seconds))
    }

    fn add(&mut self, q_id: QuestionId, delta: u64) -> u64 {
        let entry = self.seconds.entry(q_id).or_insert(0);
        *entry = entry.saturating_add(delta);
        *entry
    }
}

/// Wall-clock time on the displayed question.
///
/// Each flush truncates its delta to whole seconds and restarts the visit at
/// the flush instant, so totals can under-count by up to a second per flush.
pub struct TimeAccumulator {
    clock: Arc<dyn Clock>,
    ledger: TimeLedger,
    active: Option<QuestionId>,
    started_at: Instant,
}

impl TimeAccumulator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now();
        Self { clock, ledger: TimeLedger::default(), active: None, started_at }
    }

    /// Starts timing `q_id` from now. Any unflushed time of the previous question is dropped.
    pub fn start(&mut self, q_id: QuestionId) {
        self.active = Some(q_id);
        self.started_at = self.clock.now();
    }

    pub fn active(&self) -> Option<QuestionId> {
        self.active
    }

    pub fn current_session_seconds(&self) -> u64 {
        if self.active.is_none() {
            return 0;
        }
        self.clock.now().saturating_duration_since(self.started_at).as_secs()
    }

    pub fn accumulated_for(&self, q_id: QuestionId) -> u64 {
        let recorded = self.ledger.get(q_id);
        if self.active == Some(q_id) {
            recorded + self.current_session_seconds()
        } else {
            recorded
        }
    }

    /// Moves the running delta into the ledger and restarts the visit. Returns the new total.
    pub fn flush(&mut self) -> u64 {
        let Some(q_id) = self.active else {
            return 0;
        };
        let delta = self.current_session_seconds();
        self.started_at = self.clock.now();
        self.ledger.add(q_id, delta)
    }

    /// Flushes the active question and starts timing `q_id`.
    pub fn switch_to(&mut self, q_id: QuestionId) {
        self.flush();
        self.start(q_id);
    }

    pub fn ledger(&self) -> &TimeLedger {
        &self.ledger
    }
}

impl std::fmt::Debug for TimeAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeAccumulator")
            .field("ledger", &self.ledger)
            .field("active", &self.active)
            .field("current_session_seconds", &self.current_session_seconds())
            .finish()
    }
}
