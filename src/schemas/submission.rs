use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `SaveProgress`. Repeated calls for the same question overwrite prior values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveProgressRequest {
    pub session_id: Uuid,
    pub last_question_seq_no: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub marked_for_review: bool,
    pub remaining_time_seconds: u64,
    pub time_taken_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    pub session_id: Uuid,
}

/// `MarkComplete` reply. Only an explicit `success: false` counts as a refusal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkCompleteResponse {
    #[serde(default)]
    pub success: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultQuery {
    pub session_id: Uuid,
    pub student_id: String,
}
