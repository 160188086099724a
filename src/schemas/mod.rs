pub mod exam;
pub mod submission;

pub use exam::{ExamPaper, ExamQuestion, QuestionOption};
pub use submission::{MarkCompleteResponse, ResultQuery, SaveProgressRequest, SessionRef};
