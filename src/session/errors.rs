use thiserror::Error;

use crate::services::{BackendError, KeyStoreError};

#[derive(Debug, Error)]
pub enum SessionError {
    /// The attempt cannot run at all (no session id, no questions, malformed paper).
    #[error("exam session unavailable: {0}")]
    MissingPrecondition(String),
    #[error("another request is still in flight")]
    Busy,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
}

impl SessionError {
    pub(crate) fn precondition(detail: impl Into<String>) -> Self {
        Self::MissingPrecondition(detail.into())
    }

    /// Recoverable failures leave the session usable; the student can retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Busy | Self::Backend(_))
    }
}
