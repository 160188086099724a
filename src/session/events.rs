use serde::Serialize;
use uuid::Uuid;

use crate::session::response::QuestionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Where the UI goes after a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRoute {
    pub exam_id: String,
    pub session_id: Uuid,
    pub student_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Transient toast.
    Notice { level: NoticeLevel, message: String },
    Navigated { from: usize, to: usize },
    Committed { question: QuestionId },
    Expired,
    /// `retry_required` is set when the countdown already fired and cannot trigger again.
    SubmitFailed { retry_required: bool },
    Submitted(ResultRoute),
    Left,
}

impl SessionEvent {
    pub(crate) fn notice(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self::Notice { level, message: message.into() }
    }
}
