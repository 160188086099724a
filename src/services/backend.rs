use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde_json::Value;
use thiserror::Error;

use crate::core::config::Settings;
use crate::schemas::{ExamPaper, MarkCompleteResponse, ResultQuery, SaveProgressRequest, SessionRef};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("unreadable backend response: {0}")]
    Decode(String),
    #[error("backend rejected the request: {0}")]
    Rejected(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
}

/// Request/response contract of the exam backend.
#[async_trait]
pub trait ExamBackend: Send + Sync + 'static {
    async fn fetch_questions(&self, exam_id: &str) -> Result<ExamPaper, BackendError>;

    async fn save_progress(&self, request: &SaveProgressRequest) -> Result<(), BackendError>;

    async fn mark_complete(&self, session: SessionRef)
        -> Result<MarkCompleteResponse, BackendError>;

    async fn clear_session(&self, session: SessionRef) -> Result<(), BackendError>;

    async fn fetch_result(&self, query: &ResultQuery) -> Result<Value, BackendError>;
}

#[derive(Debug, Clone)]
pub struct HttpExamBackend {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpExamBackend {
    pub fn from_settings(settings: &Settings) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(settings.api().connect_timeout())
            .timeout(settings.api().request_timeout())
            .build()?;

        Ok(Self::new(client, &settings.api().base_url, &settings.api().token))
    }

    pub fn new(client: Client, base_url: &str, token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `exam_id` is percent-encoded as a single path segment.
    fn questions_url(&self, exam_id: &str) -> Result<Url, BackendError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| BackendError::InvalidUrl(format!("{}: {err}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| BackendError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["exams", exam_id, "questions"]);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.token)
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, BackendError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        let raw_body = response.text().await?;

        if !status.is_success() {
            return Err(status_error(status, &raw_body));
        }

        Ok(raw_body)
    }
}

#[async_trait]
impl ExamBackend for HttpExamBackend {
    async fn fetch_questions(&self, exam_id: &str) -> Result<ExamPaper, BackendError> {
        let url = self.questions_url(exam_id)?;
        let raw_body = self.send(self.client.get(url)).await?;

        serde_json::from_str(&raw_body).map_err(|err| {
            BackendError::Decode(format!("exam paper for {exam_id} is not valid JSON: {err}"))
        })
    }

    async fn save_progress(&self, request: &SaveProgressRequest) -> Result<(), BackendError> {
        let endpoint = self.endpoint("exam-sessions/progress");
        self.send(self.client.post(&endpoint).json(request)).await?;
        Ok(())
    }

    async fn mark_complete(
        &self,
        session: SessionRef,
    ) -> Result<MarkCompleteResponse, BackendError> {
        let endpoint = self.endpoint("exam-sessions/complete");
        let raw_body = self.send(self.client.post(&endpoint).json(&session)).await?;

        let parsed = match serde_json::from_str::<MarkCompleteResponse>(&raw_body) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::debug!(
                    session_id = %session.session_id,
                    error = %err,
                    "MarkComplete body has an unexpected shape; accepting as success"
                );
                MarkCompleteResponse::default()
            }
        };

        if parsed.success == Some(false) {
            return Err(BackendError::Rejected("exam could not be marked complete".to_string()));
        }

        Ok(parsed)
    }

    async fn clear_session(&self, session: SessionRef) -> Result<(), BackendError> {
        let endpoint = self.endpoint("exam-sessions/clear");
        self.send(self.client.post(&endpoint).json(&session)).await?;
        Ok(())
    }

    async fn fetch_result(&self, query: &ResultQuery) -> Result<Value, BackendError> {
        let endpoint = self.endpoint("exam-sessions/result");
        let raw_body = self.send(self.client.post(&endpoint).json(query)).await?;

        serde_json::from_str(&raw_body)
            .map_err(|err| BackendError::Decode(format!("result payload is not valid JSON: {err}")))
    }
}

fn status_error(status: StatusCode, raw_body: &str) -> BackendError {
    let detail = serde_json::from_str::<Value>(raw_body)
        .map(|parsed| extract_error_message(&parsed))
        .unwrap_or_else(|_| truncate(raw_body, 200));
    BackendError::Status { status: status.as_u16(), detail }
}

fn extract_error_message(value: &Value) -> String {
    for key in ["detail", "message", "error"] {
        match value.get(key) {
            Some(Value::String(message)) if !message.trim().is_empty() => {
                return message.trim().to_string();
            }
            Some(Value::Object(inner)) => {
                if let Some(Value::String(message)) = inner.get("message") {
                    return message.trim().to_string();
                }
            }
            _ => {}
        }
    }
    truncate(&value.to_string(), 200)
}

fn truncate(value: &str, max_chars: usize) -> String {
    let mut out: String = value.chars().take(max_chars).collect();
    if value.chars().count() > max_chars {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_detail_then_message_then_nested_error() {
        let detail = json!({ "detail": "Session expired" });
        assert_eq!(extract_error_message(&detail), "Session expired");
        assert_eq!(extract_error_message(&json!({ "message": " busy " })), "busy");
        assert_eq!(
            extract_error_message(&json!({ "error": { "message": "row locked" } })),
            "row locked"
        );
        assert_eq!(extract_error_message(&json!({ "code": 7 })), "{\"code\":7}");
    }

    #[test]
    fn status_error_falls_back_to_raw_body() {
        let err = status_error(StatusCode::BAD_GATEWAY, "<html>upstream down</html>");
        match err {
            BackendError::Status { status, detail } => {
                assert_eq!(status, 502);
                assert_eq!(detail, "<html>upstream down</html>");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn endpoint_joins_without_double_slashes() {
        let backend = HttpExamBackend::new(Client::new(), "http://api.test/v1/", "");
        assert_eq!(
            backend.endpoint("/exam-sessions/progress"),
            "http://api.test/v1/exam-sessions/progress"
        );
    }

    #[test]
    fn exam_id_stays_inside_its_path_segment() {
        let backend = HttpExamBackend::new(Client::new(), "http://api.test/v1/", "");
        let url = backend.questions_url("unit 3/part?b#2").expect("url");
        assert_eq!(url.as_str(), "http://api.test/v1/exams/unit%203%2Fpart%3Fb%232/questions");
        assert_eq!(url.query(), None);

        let plain = backend.questions_url("exam-42").expect("url");
        assert_eq!(plain.as_str(), "http://api.test/v1/exams/exam-42/questions");
    }

    #[test]
    fn unusable_base_url_is_reported() {
        let backend = HttpExamBackend::new(Client::new(), "not a url", "");
        assert!(matches!(backend.questions_url("exam-42"), Err(BackendError::InvalidUrl(_))));
    }
}
