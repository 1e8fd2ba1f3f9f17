use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a failure should be treated by the orchestrator's error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Mild,
    Important,
    /// Forces session teardown.
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Configuration,
    Transport,
    Decode,
    ModelMissing,
    Training,
    Persistence,
    Internal,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code:?} ({importance:?}): {message}")]
pub struct SpellerError {
    pub code: ErrorCode,
    pub importance: Importance,
    pub message: String,
}

impl SpellerError {
    pub fn new(code: ErrorCode, importance: Importance, message: impl Into<String>) -> Self {
        Self {
            code,
            importance,
            message: message.into(),
        }
    }

    pub fn critical(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, Importance::Critical, message)
    }

    pub fn mild(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, Importance::Mild, message)
    }

    pub fn is_critical(&self) -> bool {
        self.importance == Importance::Critical
    }
}

/// Failures decoding an inbound wire message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message is not a json object")]
    NotAnObject,
    #[error("message has no `event_type` field")]
    MissingEventType,
    #[error("invalid `{event_type}` payload: {source}")]
    InvalidPayload {
        event_type: String,
        source: serde_json::Error,
    },
}
