use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::time::Clock;
use crate::schemas::ExamQuestion;
use crate::session::accumulator::{TimeAccumulator, TimeLedger};
use crate::session::response::{QuestionId, QuestionResponse, QuestionStatus, StatusSummary};

/// Authoritative in-memory state of one attempt.
///
/// Every mutation is synchronous and total: unknown question ids get a fresh
/// record instead of an error.
#[derive(Debug)]
pub struct SessionStore {
    questions: Vec<ExamQuestion>,
    responses: BTreeMap<QuestionId, QuestionResponse>,
    time: TimeAccumulator,
    active_index: usize,
    pending_selection: Option<String>,
}

impl SessionStore {
    /// `questions` must be non-empty and in display order.
    pub fn new(questions: Vec<ExamQuestion>, clock: Arc<dyn Clock>) -> Self {
        Self {
            questions,
            responses: BTreeMap::new(),
            time: TimeAccumulator::new(clock),
            active_index: 0,
            pending_selection: None,
        }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.questions.len().saturating_sub(1)
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn question(&self, index: usize) -> Option<&ExamQuestion> {
        self.questions.get(index)
    }

    pub fn questions(&self) -> &[ExamQuestion] {
        &self.questions
    }

    pub fn active_question(&self) -> Option<&ExamQuestion> {
        self.questions.get(self.active_index)
    }

    pub fn active_q_id(&self) -> Option<QuestionId> {
        self.active_question().map(|question| question.sequence_number)
    }

    pub fn response(&self, q_id: QuestionId) -> Option<&QuestionResponse> {
        self.responses.get(&q_id)
    }

    pub fn status(&self, q_id: QuestionId) -> QuestionStatus {
        self.responses
            .get(&q_id)
            .map(QuestionResponse::status)
            .unwrap_or(QuestionStatus::NotVisited)
    }

    pub fn summary(&self) -> StatusSummary {
        self.questions.iter().map(|question| self.status(question.sequence_number)).collect()
    }

    pub fn pending_selection(&self) -> Option<&str> {
        self.pending_selection.as_deref()
    }

    pub fn time(&self) -> &TimeAccumulator {
        &self.time
    }

    pub fn time_mut(&mut self) -> &mut TimeAccumulator {
        &mut self.time
    }

    pub fn ledger(&self) -> &TimeLedger {
        self.time.ledger()
    }

    pub fn record_visit(&mut self, q_id: QuestionId) {
        self.responses.entry(q_id).or_insert_with(|| QuestionResponse::new(q_id)).visited = true;
    }

    /// Updates the transient selection. Returns `false` when `q_id` is not displayed.
    pub fn set_answer(&mut self, q_id: QuestionId, option_key: &str) -> bool {
        if self.active_q_id() != Some(q_id) {
            return false;
        }
        self.pending_selection = normalize_answer(option_key);
        true
    }

    /// Returns `false`, recording nothing, when `q_id` is not on the paper.
    pub fn mark_for_review(&mut self, q_id: QuestionId) -> bool {
        self.set_review_flag(q_id, true)
    }

    pub fn unmark_for_review(&mut self, q_id: QuestionId) -> bool {
        self.set_review_flag(q_id, false)
    }

    fn set_review_flag(&mut self, q_id: QuestionId, marked: bool) -> bool {
        if !self.questions.iter().any(|question| question.sequence_number == q_id) {
            return false;
        }
        self.record_mut(q_id).marked_for_review = marked;
        true
    }

    /// Persists `option_key` as the answer, keeping the review flag as it was.
    pub fn commit_answer(&mut self, q_id: QuestionId, option_key: Option<&str>) {
        let answer = option_key.and_then(normalize_answer);
        let record = self.record_mut(q_id);
        record.answer = answer.clone();
        record.saved = true;
        if self.active_q_id() == Some(q_id) {
            self.pending_selection = answer;
        }
    }

    /// Displays the question at `index`: starts its timer, marks it visited and
    /// seeds the transient selection from the committed answer.
    pub fn activate(&mut self, index: usize) -> Option<QuestionId> {
        let q_id = self.questions.get(index)?.sequence_number;
        self.active_index = index;
        self.time.start(q_id);
        self.record_visit(q_id);
        self.pending_selection = self.responses.get(&q_id).and_then(|record| record.answer.clone());
        Some(q_id)
    }

    fn record_mut(&mut self, q_id: QuestionId) -> &mut QuestionResponse {
        self.responses.entry(q_id).or_insert_with(|| QuestionResponse::new(q_id))
    }
}

fn normalize_answer(option_key: &str) -> Option<String> {
    let trimmed = option_key.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::time::ManualClock;
    use crate::test_support::question;

    fn store() -> (ManualClock, SessionStore) {
        let clock = ManualClock::new();
        let store =
            SessionStore::new(vec![question(1, "A"), question(2, "B")], Arc::new(clock.clone()));
        (clock, store)
    }

    #[test]
    fn record_visit_is_idempotent() {
        let (_clock, mut store) = store();
        store.record_visit(1);
        let first = store.response(1).cloned();
        store.record_visit(1);

        assert_eq!(store.response(1).cloned(), first);
        assert_eq!(
            first,
            Some(QuestionResponse {
                q_id: 1,
                answer: None,
                marked_for_review: false,
                saved: false,
                visited: true,
            })
        );
        assert_eq!(store.summary().total(), 2);
    }

    #[test]
    fn set_answer_only_touches_the_displayed_question() {
        let (_clock, mut store) = store();
        store.activate(0);

        assert!(store.set_answer(1, "B"));
        assert!(!store.set_answer(2, "C"));
        assert_eq!(store.pending_selection(), Some("B"));
        assert_eq!(store.status(1), QuestionStatus::NotAnswered);
        assert_eq!(store.response(2), None);
    }

    #[test]
    fn commit_keeps_review_flag() {
        let (_clock, mut store) = store();
        store.activate(0);
        store.mark_for_review(1);
        store.commit_answer(1, Some("B"));

        let record = store.response(1).expect("record");
        assert!(record.saved);
        assert!(record.marked_for_review);
        assert_eq!(record.answer.as_deref(), Some("B"));
        assert_eq!(store.status(1), QuestionStatus::SaveMarkReview);
    }

    #[test]
    fn mark_for_review_does_not_touch_answer() {
        let (_clock, mut store) = store();
        store.activate(0);
        store.commit_answer(1, Some("A"));
        store.mark_for_review(1);
        store.unmark_for_review(1);

        assert_eq!(store.status(1), QuestionStatus::Answered);
    }

    #[test]
    fn review_flag_ignores_unknown_questions() {
        let (_clock, mut store) = store();
        store.activate(0);
        let before = store.summary();

        assert!(!store.mark_for_review(99));
        assert!(!store.unmark_for_review(99));
        assert!(store.response(99).is_none());
        assert_eq!(store.summary(), before);

        assert!(store.mark_for_review(1));
        assert_eq!(store.status(1), QuestionStatus::MarkForReview);
    }

    #[test]
    fn activate_restores_committed_selection() {
        let (_clock, mut store) = store();
        store.activate(0);
        store.set_answer(1, "D");
        store.commit_answer(1, Some("D"));
        store.activate(1);
        assert_eq!(store.pending_selection(), None);
        store.activate(0);
        assert_eq!(store.pending_selection(), Some("D"));
    }

    #[test]
    fn activate_out_of_range_changes_nothing() {
        let (_clock, mut store) = store();
        store.activate(1);
        assert_eq!(store.activate(5), None);
        assert_eq!(store.active_index(), 1);
    }

    #[test]
    fn empty_commit_stays_not_answered() {
        let (_clock, mut store) = store();
        store.activate(0);
        store.commit_answer(1, Some("  "));
        assert!(store.response(1).expect("record").saved);
        assert_eq!(store.status(1), QuestionStatus::NotAnswered);
    }

    #[test]
    fn activation_starts_the_question_timer() {
        let (clock, mut store) = store();
        store.activate(0);
        clock.advance_secs(9);
        store.time_mut().switch_to(2);
        assert_eq!(store.ledger().get(1), 9);
    }
}
