//! Continuations
//!
//! A suspended command execution is resumed through a [`Continuation`]: a
//! transferable token carrying the execution itself plus the sink it must be
//! delivered through. Two sinks exist, selected once at engine configuration
//! time: a queued message posted to a nexus's inbound queue, or a scheduled
//! callback on the single cooperative scheduler. The driver's resume logic
//! never branches on which one produced the resumption.
//!
//! Parking is two-phase. The driver creates a [`ParkSlot`]/[`Waker`] pair
//! before calling into whatever may suspend; if the wake races ahead of the
//! park, the slot records a pre-fire and the park dispatches immediately.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::engine::CommandExecution;
use crate::nexus::Scheduler;

/// Value handed back by a suspended collaborator when it resumes the driver.
pub type ResumeValue = serde_json::Value;

/// Why a parked execution is being resumed.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeToken {
    /// Initial entry into the state machine.
    Start,
    /// A blocked input source has data ready.
    SourceReady,
    /// The executor's asynchronous work finished.
    Executor(ResumeValue),
    /// The configured suspension timeout expired.
    TimedOut,
}

/// Message delivered to a nexus queue or the scheduler.
pub struct Resume {
    pub exec: Box<CommandExecution>,
    pub token: ResumeToken,
}

/// Where a continuation is delivered when it fires.
#[derive(Clone)]
pub enum ResumeSink {
    /// Post onto a nexus's inbound queue.
    Queued(mpsc::UnboundedSender<Resume>),
    /// Schedule on the cooperative scheduler loop.
    Scheduled(Arc<Scheduler>),
}

impl ResumeSink {
    pub(crate) fn dispatch(&self, resume: Resume) {
        match self {
            ResumeSink::Queued(tx) => {
                if tx.send(resume).is_err() {
                    tracing::warn!("nexus queue closed; resumption dropped");
                }
            }
            ResumeSink::Scheduled(scheduler) => scheduler.schedule(resume),
        }
    }
}

/// A parked execution plus its delivery sink.
///
/// Carries full ownership of the execution, so no two contexts can ever act
/// on the same instance concurrently.
pub struct Continuation {
    exec: Box<CommandExecution>,
    sink: ResumeSink,
}

impl Continuation {
    pub(crate) fn new(exec: Box<CommandExecution>, sink: ResumeSink) -> Self {
        Self { exec, sink }
    }

    fn dispatch(self, token: ResumeToken) {
        self.sink.dispatch(Resume {
            exec: self.exec,
            token,
        });
    }

    /// Release the execution without resuming it.
    pub(crate) fn cancel(self) {
        self.exec.cancel();
    }
}

/* ===================== Park slot ===================== */

enum SlotState {
    Empty,
    Parked(Continuation),
    PreFired(ResumeToken),
    Fired,
    Revoked,
}

/// Driver-side half of a suspension point.
pub struct ParkSlot {
    state: Arc<Mutex<SlotState>>,
}

/// Collaborator-side half: fires exactly once when the awaited event occurs.
#[derive(Clone)]
pub struct Waker {
    state: Arc<Mutex<SlotState>>,
}

/// Handle the owning session keeps so teardown can revoke the parked
/// continuation.
pub struct RevokeHandle {
    state: Arc<Mutex<SlotState>>,
}

impl ParkSlot {
    pub fn new() -> (ParkSlot, Waker) {
        let state = Arc::new(Mutex::new(SlotState::Empty));
        (
            ParkSlot {
                state: state.clone(),
            },
            Waker { state },
        )
    }

    pub fn waker(&self) -> Waker {
        Waker {
            state: self.state.clone(),
        }
    }

    pub(crate) fn revoke_handle(&self) -> RevokeHandle {
        RevokeHandle {
            state: self.state.clone(),
        }
    }

    /// Park the continuation in this slot.
    ///
    /// If the wake already arrived, the continuation is dispatched right
    /// away. If the slot was revoked in the meantime, the execution is
    /// cancelled and its resources released here, exactly once.
    pub(crate) fn park(self, continuation: Continuation) {
        enum After {
            Dispatch(Continuation, ResumeToken),
            Cancel(Continuation),
            Nothing,
        }

        let after = {
            let mut state = self.state.lock().unwrap();
            match std::mem::replace(&mut *state, SlotState::Parked(continuation)) {
                SlotState::Empty => After::Nothing,
                SlotState::PreFired(token) => {
                    let SlotState::Parked(parked) =
                        std::mem::replace(&mut *state, SlotState::Fired)
                    else {
                        unreachable!("slot state changed under lock");
                    };
                    After::Dispatch(parked, token)
                }
                SlotState::Revoked => {
                    let SlotState::Parked(parked) =
                        std::mem::replace(&mut *state, SlotState::Revoked)
                    else {
                        unreachable!("slot state changed under lock");
                    };
                    After::Cancel(parked)
                }
                SlotState::Parked(_) | SlotState::Fired => {
                    tracing::error!("park slot reused; continuation dropped");
                    After::Nothing
                }
            }
        };

        match after {
            After::Dispatch(parked, token) => parked.dispatch(token),
            After::Cancel(parked) => parked.cancel(),
            After::Nothing => {}
        }
    }
}

impl Waker {
    /// Resume the parked execution.
    ///
    /// The first fire wins. A fire on a revoked slot is a no-op; a second
    /// fire indicates a double-resume bug and is logged and dropped.
    pub fn fire(&self, token: ResumeToken) {
        let continuation = {
            let mut state = self.state.lock().unwrap();
            match std::mem::replace(&mut *state, SlotState::Fired) {
                SlotState::Parked(parked) => parked,
                SlotState::Empty => {
                    *state = SlotState::PreFired(token);
                    return;
                }
                SlotState::Revoked => {
                    *state = SlotState::Revoked;
                    tracing::debug!("wake for revoked continuation ignored");
                    return;
                }
                SlotState::Fired => {
                    tracing::error!("duplicate resumption dropped; continuation already fired");
                    return;
                }
                SlotState::PreFired(previous) => {
                    *state = SlotState::PreFired(previous);
                    tracing::error!("duplicate resumption dropped; wake already recorded");
                    return;
                }
            }
        };

        continuation.dispatch(token);
    }
}

impl RevokeHandle {
    /// Revoke the slot, taking back the parked continuation if any.
    pub(crate) fn revoke(&self) -> Option<Continuation> {
        let mut state = self.state.lock().unwrap();
        match std::mem::replace(&mut *state, SlotState::Revoked) {
            SlotState::Parked(parked) => Some(parked),
            SlotState::Fired => {
                // Already dispatched; the stale-session check on resumption
                // covers this case.
                *state = SlotState::Fired;
                None
            }
            _ => None,
        }
    }
}
