use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    Execution,
    Persistence,
    Internal,
}

/// Wire-level error payload carried by `movement_error`, `favorite_pose_error`
/// and friends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventError {
    pub code: ErrorCode,
    pub message: String,
}

impl EventError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Per-request failure taxonomy. Every variant is caught at the coordinator
/// boundary and converted into a targeted error event; none of these escape
/// to crash a session.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// Bad input shape or range, rejected before any state mutation.
    #[error("{0}")]
    Validation(String),
    /// The motion executor rejected or failed a goal.
    #[error("{0}")]
    Execution(String),
    /// The favorites backing store could not be read or rewritten.
    #[error("{0}")]
    Persistence(String),
}

impl CommandError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CommandError::Validation(_) => ErrorCode::Validation,
            CommandError::Execution(_) => ErrorCode::Execution,
            CommandError::Persistence(_) => ErrorCode::Persistence,
        }
    }
}

impl From<CommandError> for EventError {
    fn from(value: CommandError) -> Self {
        Self {
            code: value.code(),
            message: value.to_string(),
        }
    }
}
