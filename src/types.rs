use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::notify::NotifyBuffer;

/// Terminal classification of a command execution's outcome.
///
/// `Suspended` is a mid-flight marker only; it must never reach the
/// session-visible result path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum ReturnCode {
    Success,
    ParseError(String),
    PipeOpenError(String),
    ExecutionError(ExecErrorDetail),
    Suspended,
    Cancelled,
}

impl ReturnCode {
    pub fn is_error(&self) -> bool {
        !matches!(self, ReturnCode::Success | ReturnCode::Suspended)
    }

    pub fn execution_error(message: impl Into<String>) -> Self {
        ReturnCode::ExecutionError(ExecErrorDetail {
            message: message.into(),
            notify: None,
        })
    }
}

/// Detail attached to an execution error.
///
/// May embed a notification buffer produced by the command implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecErrorDetail {
    pub message: String,
    pub notify: Option<NotifyBuffer>,
}

/// Which class of suspension a parked execution is waiting in.
///
/// Selects the configured timeout and the error the expiry converts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendClass {
    Fetch,
    OpenPipes,
    Execute,
}

/// Infrastructure errors surfaced to callers of the engine API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session already has a command execution in flight")]
    Busy,

    #[error("session is closed")]
    SessionClosed,
}
