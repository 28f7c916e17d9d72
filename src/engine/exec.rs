//! Per-command execution record
//!
//! One [`CommandExecution`] exists per submitted command. It travels by
//! value: boxed into a continuation when parked, back out when resumed, so
//! exactly one context can touch it at a time. `finish` and `cancel` consume
//! the record, which is what makes resource release happen exactly once.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::error;
use uuid::Uuid;

use crate::continuation::ResumeValue;
use crate::engine::state::ExecState;
use crate::nexus::NexusId;
use crate::parse::{ParseMode, ParsedCommand, SpecialInput};
use crate::session::Session;
use crate::types::ReturnCode;

pub struct CommandExecution {
    id: Uuid,
    session: Arc<Session>,
    state: ExecState,
    /// Which nexus the next resumption should run on. Follows the top pipe
    /// frame's locus while nested sources are open.
    locus: NexusId,
    parse_mode: ParseMode,
    line: Option<Arc<str>>,
    parsed: Option<ParsedCommand>,
    ret: ReturnCode,
    resume_value: Option<ResumeValue>,
    special: Option<SpecialInput>,
    completion: Option<oneshot::Sender<ReturnCode>>,
}

impl CommandExecution {
    pub(crate) fn new(
        session: Arc<Session>,
        completion: oneshot::Sender<ReturnCode>,
    ) -> Box<Self> {
        let locus = session.home();
        let parse_mode = session.parse_mode();
        Box::new(Self {
            id: Uuid::new_v4(),
            session,
            state: ExecState::Null,
            locus,
            parse_mode,
            line: None,
            parsed: None,
            ret: ReturnCode::Suspended,
            resume_value: None,
            special: None,
            completion: Some(completion),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub(crate) fn locus(&self) -> NexusId {
        self.locus
    }

    pub(crate) fn set_locus(&mut self, locus: NexusId) {
        self.locus = locus;
    }

    pub(crate) fn parse_mode(&self) -> ParseMode {
        self.parse_mode
    }

    pub(crate) fn set_parse_mode(&mut self, mode: ParseMode) {
        self.parse_mode = mode;
    }

    pub(crate) fn line(&self) -> Option<&Arc<str>> {
        self.line.as_ref()
    }

    pub(crate) fn set_line(&mut self, line: Arc<str>) {
        self.line = Some(line);
    }

    pub(crate) fn parsed(&self) -> Option<&ParsedCommand> {
        self.parsed.as_ref()
    }

    pub(crate) fn set_parsed(&mut self, parsed: ParsedCommand) {
        self.parsed = Some(parsed);
    }

    /// Release the parsed command and line after a pipe-only line, before
    /// looping back to fetch.
    pub(crate) fn clear_command(&mut self) {
        self.parsed = None;
        self.line = None;
    }

    pub(crate) fn special(&self) -> Option<SpecialInput> {
        self.special
    }

    pub(crate) fn set_special(&mut self, special: SpecialInput) {
        self.special = Some(special);
    }

    pub(crate) fn take_resume_value(&mut self) -> Option<ResumeValue> {
        self.resume_value.take()
    }

    pub(crate) fn set_resume_value(&mut self, value: ResumeValue) {
        self.resume_value = Some(value);
    }

    pub(crate) fn set_ret(&mut self, ret: ReturnCode) {
        self.ret = ret;
    }

    /// Move to the next state. Illegal transitions are a driver bug; they
    /// are logged and forced to complete with an execution error.
    pub(crate) fn advance(&mut self, next: ExecState) {
        debug_assert!(
            self.state.may_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );

        if !self.state.may_advance_to(next) {
            error!(
                exec = %self.id,
                from = ?self.state,
                to = ?next,
                "illegal state transition forced to complete"
            );
            self.ret = ReturnCode::execution_error("internal state machine fault");
            self.state = ExecState::Complete;
            return;
        }

        self.state = next;
    }

    /// Fail the execution with the given result and jump to complete.
    pub(crate) fn fail(&mut self, ret: ReturnCode) {
        self.ret = ret;
        self.state = ExecState::Complete;
    }

    /// Consume the record: release held resources, record the result on the
    /// session and notify the submitter.
    pub(crate) fn finish(mut self: Box<Self>) -> ReturnCode {
        // Suspended must never surface as a final result
        if self.ret == ReturnCode::Suspended {
            error!(exec = %self.id, "execution completed without a result");
            self.ret = ReturnCode::execution_error("execution completed without a result");
        }

        self.parsed = None;
        self.line = None;

        let ret = self.ret.clone();
        self.session.finish_execution(ret.clone());
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(ret.clone());
        }
        ret
    }

    /// Consume the record without running it further.
    pub(crate) fn cancel(mut self: Box<Self>) -> ReturnCode {
        self.ret = ReturnCode::Cancelled;
        self.finish()
    }
}
