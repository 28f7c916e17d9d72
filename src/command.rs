//! Executor collaborator interface
//!
//! The engine knows nothing about individual commands. It hands a parsed
//! command to a [`CommandExecutor`], which either finishes synchronously or
//! suspends by keeping the provided [`Waker`] and returning
//! [`Outcome::Suspend`]. [`CommandTable`] is the keyword-dispatch
//! implementation most callers register handlers into.

use std::collections::HashMap;

use crate::continuation::{ResumeValue, Waker};
use crate::parse::ParsedCommand;
use crate::session::Session;
use crate::types::ReturnCode;

/// What the executor did with the command.
pub enum Outcome {
    /// Finished synchronously with this result.
    Ready(ReturnCode),
    /// Asynchronous work is in flight; the executor keeps the waker and
    /// fires it exactly once when the work completes.
    Suspend,
}

/// Executor collaborator seam.
///
/// `resumed` carries the value the executor's asynchronous work handed back
/// through the waker; it is `None` on first entry.
pub trait CommandExecutor: Send + Sync {
    fn execute(
        &self,
        parsed: &ParsedCommand,
        session: &Session,
        resumed: Option<ResumeValue>,
        waker: &Waker,
    ) -> Outcome;
}

type Handler =
    Box<dyn Fn(&ParsedCommand, &Session, Option<ResumeValue>, &Waker) -> Outcome + Send + Sync>;

/// Keyword-dispatch executor.
#[derive(Default)]
pub struct CommandTable {
    handlers: HashMap<String, Handler>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, keyword: impl Into<String>, handler: F)
    where
        F: Fn(&ParsedCommand, &Session, Option<ResumeValue>, &Waker) -> Outcome
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(keyword.into(), Box::new(handler));
    }
}

impl CommandExecutor for CommandTable {
    fn execute(
        &self,
        parsed: &ParsedCommand,
        session: &Session,
        resumed: Option<ResumeValue>,
        waker: &Waker,
    ) -> Outcome {
        match self.handlers.get(&parsed.keyword) {
            Some(handler) => handler(parsed, session, resumed, waker),
            None => Outcome::Ready(ReturnCode::execution_error(format!(
                "unknown command: {}",
                parsed.keyword
            ))),
        }
    }
}
