//! Sessions
//!
//! A session is one origin of command lines: an interactive terminal, a
//! configuration file load, or an internal caller. It owns the pipe stack
//! for nested input, the single in-flight execution guard, and the handle
//! needed to revoke a parked continuation on teardown.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use crate::continuation::RevokeHandle;
use crate::nexus::NexusId;
use crate::parse::ParseMode;
use crate::pipes::PipeStack;
use crate::types::{EngineError, ReturnCode};

pub struct Session {
    name: String,
    home: NexusId,
    parse_mode: ParseMode,
    out_enabled: bool,
    reflect_enabled: bool,

    live: AtomicBool,
    close_requested: AtomicBool,
    in_flight: AtomicBool,

    lines: Mutex<VecDeque<Arc<str>>>,
    pipes: Mutex<PipeStack>,
    pending: Mutex<Option<RevokeHandle>>,

    results: Mutex<Vec<ReturnCode>>,
    reflected: Mutex<Vec<String>>,
    outputs: Mutex<Vec<String>>,
}

impl Session {
    pub(crate) fn new(
        name: impl Into<String>,
        home: NexusId,
        parse_mode: ParseMode,
        max_pipe_depth: usize,
    ) -> Self {
        Self {
            name: name.into(),
            home,
            parse_mode,
            out_enabled: true,
            reflect_enabled: false,
            live: AtomicBool::new(true),
            close_requested: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            lines: Mutex::new(VecDeque::new()),
            pipes: Mutex::new(PipeStack::new(max_pipe_depth)),
            pending: Mutex::new(None),
            results: Mutex::new(Vec::new()),
            reflected: Mutex::new(Vec::new()),
            outputs: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn home(&self) -> NexusId {
        self.home
    }

    pub fn parse_mode(&self) -> ParseMode {
        self.parse_mode
    }

    pub(crate) fn set_reflect(&mut self, enabled: bool) {
        self.reflect_enabled = enabled;
    }

    pub(crate) fn set_out(&mut self, enabled: bool) {
        self.out_enabled = enabled;
    }

    pub fn reflect_enabled(&self) -> bool {
        self.reflect_enabled
    }

    /* ===================== Input queue ===================== */

    pub fn push_line(&self, line: impl AsRef<str>) {
        self.lines
            .lock()
            .unwrap()
            .push_back(Arc::from(line.as_ref()));
    }

    pub(crate) fn take_line(&self) -> Option<Arc<str>> {
        self.lines.lock().unwrap().pop_front()
    }

    pub(crate) fn peek_line(&self) -> Option<Arc<str>> {
        self.lines.lock().unwrap().front().cloned()
    }

    /// Lines queued or pipe frames still open.
    pub fn has_input(&self) -> bool {
        !self.lines.lock().unwrap().is_empty() || !self.pipes.lock().unwrap().is_empty()
    }

    pub(crate) fn pipes(&self) -> &Mutex<PipeStack> {
        &self.pipes
    }

    /* ===================== Lifecycle ===================== */

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Mark the session closed and revoke any parked continuation.
    ///
    /// A revoked continuation's execution is cancelled here; a resumption
    /// already in flight is caught by the liveness check when it runs.
    pub fn close(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            debug!(session = %self.name, "session closing");
        }

        let revoked = self
            .pending
            .lock()
            .unwrap()
            .take()
            .and_then(|handle| handle.revoke());

        if let Some(continuation) = revoked {
            continuation.cancel();
        }

        self.pipes.lock().unwrap().clear();
    }

    /// Ask for the session to close once the in-flight execution completes.
    pub(crate) fn request_close(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
    }

    /* ===================== Execution guard ===================== */

    /// Claim the single in-flight execution slot.
    pub(crate) fn begin_execution(&self) -> Result<(), EngineError> {
        if !self.is_live() {
            return Err(EngineError::SessionClosed);
        }

        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| EngineError::Busy)?;

        Ok(())
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Record the result of a completed execution and release the slot.
    pub(crate) fn finish_execution(&self, code: ReturnCode) {
        self.results.lock().unwrap().push(code);
        self.in_flight.store(false, Ordering::SeqCst);

        if self.close_requested.swap(false, Ordering::SeqCst) {
            self.close();
        }
    }

    /* ===================== Parked continuation ===================== */

    /// Remember the revoke handle for the currently parked continuation.
    pub(crate) fn set_pending(&self, handle: RevokeHandle) {
        let previous = self.pending.lock().unwrap().replace(handle);
        if previous.is_some() {
            error!(
                session = %self.name,
                "pending continuation replaced while one was still parked"
            );
        }
    }

    pub(crate) fn clear_pending(&self) {
        self.pending.lock().unwrap().take();
    }

    /* ===================== Output ===================== */

    pub fn write_output(&self, text: impl Into<String>) {
        if self.out_enabled {
            self.outputs.lock().unwrap().push(text.into());
        }
    }

    /// Echo a successfully executed line back to the session.
    pub(crate) fn reflect(&self, line: &str) {
        self.reflected.lock().unwrap().push(line.to_string());
    }

    pub fn results(&self) -> Vec<ReturnCode> {
        self.results.lock().unwrap().clone()
    }

    pub fn reflected(&self) -> Vec<String> {
        self.reflected.lock().unwrap().clone()
    }

    pub fn outputs(&self) -> Vec<String> {
        self.outputs.lock().unwrap().clone()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("home", &self.home)
            .field("live", &self.is_live())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
