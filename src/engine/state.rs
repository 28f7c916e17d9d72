//! Execution state machine
//!
//! Linear per-command progression with two loops: open-pipes feeding back
//! to fetch when a line only opened a nested source, and every state able
//! to short-circuit to complete on failure.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecState {
    /// Not yet started.
    Null,
    /// Handling a control input that bypasses the command path.
    Special,
    /// Acquiring the next line from the pipe stack or the session.
    Fetch,
    /// Interpreting the fetched line.
    Parse,
    /// Opening a nested input source the line requested.
    OpenPipes,
    /// Running the command body.
    Execute,
    /// Post-execution bookkeeping for a successful command.
    Success,
    /// Terminal; resources released, result recorded.
    Complete,
}

impl ExecState {
    /// Whether the transition is one the machine defines.
    pub fn may_advance_to(self, next: ExecState) -> bool {
        use ExecState::*;
        matches!(
            (self, next),
            (Null, Special)
                | (Null, Fetch)
                | (Special, Complete)
                | (Fetch, Parse)
                | (Fetch, Complete)
                | (Parse, OpenPipes)
                | (Parse, Complete)
                | (OpenPipes, Execute)
                | (OpenPipes, Fetch)
                | (OpenPipes, Complete)
                | (Execute, Success)
                | (Execute, Complete)
                | (Success, Complete)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecState::Complete)
    }
}
