//! The driver
//!
//! Single entry point for all resumptions. Whatever delivered the
//! continuation, [`resume`] validates it against the execution's state,
//! then [`drive`] steps the state machine until the execution either parks
//! again or completes. Nothing in here branches on which resumption
//! strategy is configured; the sink is an opaque [`ResumeSink`].

use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::continuation::{Continuation, ParkSlot, Resume, ResumeToken};
use crate::engine::exec::CommandExecution;
use crate::engine::state::ExecState;
use crate::engine::EngineInner;
use crate::parse::{classify_special, SpecialInput};
use crate::pipes::{Opened, StackFetch};
use crate::types::{ReturnCode, SuspendClass};

/// What one state-machine step asks the driver to do next.
enum Step {
    Continue,
    Park { slot: ParkSlot, class: SuspendClass },
}

/// How a drive pass ended.
pub(crate) enum Driven {
    /// Execution is parked; a continuation holds it.
    Parked,
    /// Execution completed with this result.
    Finished(ReturnCode),
}

/// Handle one delivered resumption.
pub(crate) fn resume(resume: Resume, ctx: &Arc<EngineInner>) -> Driven {
    let Resume { mut exec, token } = resume;

    exec.session().clear_pending();

    // Teardown may have closed the session after this resumption was
    // already dispatched.
    if !exec.session().is_live() {
        debug!(exec = %exec.id(), "resumption for closed session cancelled");
        return Driven::Finished(exec.cancel());
    }

    match (token, exec.state()) {
        (ResumeToken::Start, ExecState::Null) => {}
        (ResumeToken::SourceReady, ExecState::Fetch | ExecState::OpenPipes) => {}
        (ResumeToken::Executor(value), ExecState::Execute) => {
            exec.set_resume_value(value);
        }
        (ResumeToken::TimedOut, state) => {
            let ret = match state {
                ExecState::Fetch => {
                    ReturnCode::PipeOpenError("timed out waiting for input source".to_string())
                }
                ExecState::OpenPipes => {
                    ReturnCode::PipeOpenError("timed out opening input source".to_string())
                }
                ExecState::Execute => {
                    ReturnCode::execution_error("command execution timed out")
                }
                other => {
                    error!(exec = %exec.id(), state = ?other, "timeout in unexpected state");
                    ReturnCode::execution_error("timeout in unexpected state")
                }
            };
            exec.fail(ret);
        }
        (token, state) => {
            error!(
                exec = %exec.id(),
                token = ?std::mem::discriminant(&token),
                state = ?state,
                "resumption does not match execution state"
            );
            return Driven::Finished(exec.cancel());
        }
    }

    drive(exec, ctx)
}

/// Step the execution until it parks or completes.
pub(crate) fn drive(mut exec: Box<CommandExecution>, ctx: &Arc<EngineInner>) -> Driven {
    loop {
        if exec.state().is_terminal() {
            return Driven::Finished(exec.finish());
        }

        match step(&mut exec, ctx) {
            Step::Continue => continue,
            Step::Park { slot, class } => {
                park(exec, slot, class, ctx);
                return Driven::Parked;
            }
        }
    }
}

/// Park the execution in the slot created before the suspension point.
///
/// The session keeps the revoke handle so teardown can reclaim the
/// continuation; the configured class timeout is armed as a late waker.
fn park(exec: Box<CommandExecution>, slot: ParkSlot, class: SuspendClass, ctx: &Arc<EngineInner>) {
    let session = exec.session().clone();
    let locus = exec.locus();

    session.set_pending(slot.revoke_handle());

    if let Some(timeout) = ctx.config.timeouts.for_class(class) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let waker = slot.waker();
                handle.spawn(async move {
                    tokio::time::sleep(timeout).await;
                    waker.fire(ResumeToken::TimedOut);
                });
            }
            Err(_) => {
                debug!("no async runtime; suspension timeout not armed");
            }
        }
    }

    trace!(exec = %exec.id(), class = ?class, "execution parked");
    slot.park(Continuation::new(exec, ctx.strategy.sink_for(locus)));
}

fn step(exec: &mut CommandExecution, ctx: &Arc<EngineInner>) -> Step {
    match exec.state() {
        ExecState::Null => step_null(exec),
        ExecState::Special => step_special(exec),
        ExecState::Fetch => step_fetch(exec),
        ExecState::Parse => step_parse(exec, ctx),
        ExecState::OpenPipes => step_open_pipes(exec, ctx),
        ExecState::Execute => step_execute(exec, ctx),
        ExecState::Success => step_success(exec),
        ExecState::Complete => Step::Continue,
    }
}

/* ===================== States ===================== */

fn step_null(exec: &mut CommandExecution) -> Step {
    let session = exec.session().clone();

    // Control inputs submitted directly to the session bypass the command
    // path, but only while no nested source is open.
    let special = if session.pipes().lock().unwrap().is_empty() {
        session
            .peek_line()
            .and_then(|line| classify_special(&line))
    } else {
        None
    };

    match special {
        Some(special) => {
            session.take_line();
            exec.set_special(special);
            exec.advance(ExecState::Special);
        }
        None => exec.advance(ExecState::Fetch),
    }

    Step::Continue
}

fn step_special(exec: &mut CommandExecution) -> Step {
    let session = exec.session().clone();

    match exec.special() {
        Some(SpecialInput::Blank) | Some(SpecialInput::Comment) | None => {}
        Some(SpecialInput::End) => {
            session.pipes().lock().unwrap().clear();
        }
        Some(SpecialInput::Exit) => {
            session.request_close();
        }
    }

    exec.set_ret(ReturnCode::Success);
    exec.advance(ExecState::Complete);
    Step::Continue
}

fn step_fetch(exec: &mut CommandExecution) -> Step {
    let session = exec.session().clone();

    let fetched = session.pipes().lock().unwrap().fetch_next();
    match fetched {
        StackFetch::Line { line, mode, locus } => {
            exec.set_parse_mode(mode);
            if let Some(locus) = locus {
                exec.set_locus(locus);
            }

            if let Some(step) = fetched_special(exec, &session, &line) {
                return step;
            }

            exec.set_line(line);
            exec.advance(ExecState::Parse);
            Step::Continue
        }
        StackFetch::WouldBlock => {
            let (slot, waker) = ParkSlot::new();
            {
                let mut pipes = session.pipes().lock().unwrap();
                pipes.register_waker_on_top(waker);
                if let Some(locus) = pipes.top_locus() {
                    exec.set_locus(locus);
                }
            }
            Step::Park {
                slot,
                class: SuspendClass::Fetch,
            }
        }
        StackFetch::Empty => match session.take_line() {
            Some(line) => {
                exec.set_parse_mode(session.parse_mode());
                if let Some(step) = fetched_special(exec, &session, &line) {
                    return step;
                }

                exec.set_line(line);
                exec.advance(ExecState::Parse);
                Step::Continue
            }
            None => {
                // End of input: nothing left to execute.
                exec.set_ret(ReturnCode::Success);
                exec.advance(ExecState::Complete);
                Step::Continue
            }
        },
    }
}

/// Handle a special line seen during fetch. Blank and comment lines are
/// skipped; `end` abandons the open sources and `exit` also asks the
/// session to close. Returns the step to take, or `None` for ordinary
/// lines.
fn fetched_special(
    exec: &mut CommandExecution,
    session: &Arc<crate::session::Session>,
    line: &str,
) -> Option<Step> {
    match classify_special(line)? {
        SpecialInput::Blank | SpecialInput::Comment => Some(Step::Continue),
        SpecialInput::End => {
            session.pipes().lock().unwrap().clear();
            exec.set_ret(ReturnCode::Success);
            exec.advance(ExecState::Complete);
            Some(Step::Continue)
        }
        SpecialInput::Exit => {
            session.pipes().lock().unwrap().clear();
            session.request_close();
            exec.set_ret(ReturnCode::Success);
            exec.advance(ExecState::Complete);
            Some(Step::Continue)
        }
    }
}

fn step_parse(exec: &mut CommandExecution, ctx: &Arc<EngineInner>) -> Step {
    let Some(line) = exec.line().cloned() else {
        exec.fail(ReturnCode::execution_error("parse reached without a line"));
        return Step::Continue;
    };

    match ctx.parser.parse(&line, exec.parse_mode()) {
        Ok(parsed) => {
            exec.set_parsed(parsed);
            exec.advance(ExecState::OpenPipes);
        }
        Err(e) => exec.fail(ReturnCode::ParseError(e.to_string())),
    }

    Step::Continue
}

fn step_open_pipes(exec: &mut CommandExecution, ctx: &Arc<EngineInner>) -> Step {
    let (pipe, direct) = match exec.parsed() {
        Some(parsed) => (parsed.pipe.clone(), parsed.direct),
        None => {
            exec.fail(ReturnCode::execution_error(
                "open pipes reached without a parsed command",
            ));
            return Step::Continue;
        }
    };

    let Some(request) = pipe else {
        exec.advance(ExecState::Execute);
        return Step::Continue;
    };

    let session = exec.session().clone();
    let (slot, waker) = ParkSlot::new();

    match ctx.opener.open(&request, &waker) {
        Ok(Opened::Ready(source)) => {
            let pushed = session.pipes().lock().unwrap().push_source(source);
            match pushed {
                Ok(_) => {
                    if direct {
                        exec.advance(ExecState::Execute);
                    } else {
                        // The line did nothing but open the source; its
                        // payload is the source's first line.
                        exec.clear_command();
                        exec.advance(ExecState::Fetch);
                    }
                    Step::Continue
                }
                Err(e) => {
                    exec.fail(ReturnCode::PipeOpenError(e.to_string()));
                    Step::Continue
                }
            }
        }
        Ok(Opened::WouldBlock) => Step::Park {
            slot,
            class: SuspendClass::OpenPipes,
        },
        Err(e) => {
            exec.fail(ReturnCode::PipeOpenError(e.to_string()));
            Step::Continue
        }
    }
}

fn step_execute(exec: &mut CommandExecution, ctx: &Arc<EngineInner>) -> Step {
    let session = exec.session().clone();
    let resumed = exec.take_resume_value();
    let (slot, waker) = ParkSlot::new();

    let outcome = {
        let Some(parsed) = exec.parsed() else {
            exec.fail(ReturnCode::execution_error(
                "execute reached without a parsed command",
            ));
            return Step::Continue;
        };
        ctx.executor.execute(parsed, &session, resumed, &waker)
    };

    match outcome {
        crate::command::Outcome::Ready(ReturnCode::Success) => {
            exec.set_ret(ReturnCode::Success);
            exec.advance(ExecState::Success);
            Step::Continue
        }
        crate::command::Outcome::Ready(ReturnCode::Suspended) => {
            error!(exec = %exec.id(), "executor returned a reserved result");
            exec.fail(ReturnCode::execution_error(
                "executor returned a reserved result",
            ));
            Step::Continue
        }
        crate::command::Outcome::Ready(ret) => {
            exec.fail(ret);
            Step::Continue
        }
        crate::command::Outcome::Suspend => Step::Park {
            slot,
            class: SuspendClass::Execute,
        },
    }
}

fn step_success(exec: &mut CommandExecution) -> Step {
    let session = exec.session().clone();

    if session.reflect_enabled() {
        if let Some(line) = exec.line() {
            session.reflect(line);
        }
    }

    exec.advance(ExecState::Complete);
    Step::Continue
}
