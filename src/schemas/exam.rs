use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// One selectable option of a multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct QuestionOption {
    #[validate(length(min = 1, message = "option key must not be empty"))]
    pub key: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExamQuestion {
    #[serde(alias = "sequence_number")]
    pub sequence_number: i64,
    #[serde(default)]
    pub text: String,
    #[validate(length(min = 1, message = "question must offer at least one option"), nested)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default, alias = "correct_option_key")]
    pub correct_option_key: Option<String>,
}

/// Payload of `FetchQuestions(examId)`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_unique_sequence_numbers"))]
pub struct ExamPaper {
    #[serde(alias = "exam_duration_minutes")]
    #[validate(range(min = 1, message = "exam duration must be at least one minute"))]
    pub exam_duration_minutes: u32,
    #[validate(length(min = 1, message = "exam has no questions"), nested)]
    pub questions: Vec<ExamQuestion>,
}

impl ExamPaper {
    pub fn total_seconds(&self) -> u64 {
        u64::from(self.exam_duration_minutes) * 60
    }

    /// Questions in display order.
    pub fn into_ordered_questions(self) -> Vec<ExamQuestion> {
        let mut questions = self.questions;
        questions.sort_by_key(|question| question.sequence_number);
        questions
    }
}

fn validate_unique_sequence_numbers(paper: &ExamPaper) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(paper.questions.len());
    for question in &paper.questions {
        if !seen.insert(question.sequence_number) {
            let mut err = ValidationError::new("duplicate_sequence_number");
            err.message = Some(
                format!("sequence number {} appears more than once", question.sequence_number)
                    .into(),
            );
            return Err(err);
        }
    }
    Ok(())
}
