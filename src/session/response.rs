use serde::Serialize;

/// Stable sequence number of a question within one exam.
pub type QuestionId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionStatus {
    NotVisited,
    NotAnswered,
    Answered,
    MarkForReview,
    SaveMarkReview,
}

impl QuestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotVisited => "NOT_VISITED",
            Self::NotAnswered => "NOT_ANSWERED",
            Self::Answered => "ANSWERED",
            Self::MarkForReview => "MARK_FOR_REVIEW",
            Self::SaveMarkReview => "SAVE_MARK_REVIEW",
        }
    }
}

/// The single place a question's status is derived.
pub fn derive_status(
    visited: bool,
    saved: bool,
    answer: Option<&str>,
    marked_for_review: bool,
) -> QuestionStatus {
    if !visited {
        return QuestionStatus::NotVisited;
    }

    let committed = saved && answer.is_some_and(|value| !value.trim().is_empty());
    match (marked_for_review, committed) {
        (true, true) => QuestionStatus::SaveMarkReview,
        (true, false) => QuestionStatus::MarkForReview,
        (false, true) => QuestionStatus::Answered,
        (false, false) => QuestionStatus::NotAnswered,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResponse {
    pub q_id: QuestionId,
    pub answer: Option<String>,
    pub marked_for_review: bool,
    pub saved: bool,
    pub visited: bool,
}

impl QuestionResponse {
    pub fn new(q_id: QuestionId) -> Self {
        Self { q_id, answer: None, marked_for_review: false, saved: false, visited: false }
    }

    pub fn status(&self) -> QuestionStatus {
        derive_status(self.visited, self.saved, self.answer.as_deref(), self.marked_for_review)
    }
}

/// Per-status counts for the question-map legend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub not_visited: usize,
    pub not_answered: usize,
    pub answered: usize,
    pub mark_for_review: usize,
    pub save_mark_review: usize,
}

impl StatusSummary {
    pub fn add(&mut self, status: QuestionStatus) {
        match status {
            QuestionStatus::NotVisited => self.not_visited += 1,
            QuestionStatus::NotAnswered => self.not_answered += 1,
            QuestionStatus::Answered => self.answered += 1,
            QuestionStatus::MarkForReview => self.mark_for_review += 1,
            QuestionStatus::SaveMarkReview => self.save_mark_review += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.not_visited
            + self.not_answered
            + self.answered
            + self.mark_for_review
            + self.save_mark_review
    }
}

impl FromIterator<QuestionStatus> for StatusSummary {
    fn from_iter<I: IntoIterator<Item = QuestionStatus>>(iter: I) -> Self {
        let mut summary = Self::default();
        for status in iter {
            summary.add(status);
        }
        summary
    }
}
