//! Nested input sources
//!
//! A command can open a nested input source (running a file as if typed).
//! Sources stack LIFO per session; the driver always fetches from the top
//! frame and pops frames as they exhaust. A source that is not ready to
//! produce a line reports [`Fetch::WouldBlock`] and is handed a [`Waker`] to
//! fire once data arrives.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::continuation::{ResumeToken, Waker};
use crate::nexus::NexusId;
use crate::parse::{ParseMode, PipeRequest};

/// Identifier of one open frame on a session's pipe stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipeHandle(pub u64);

/// Result of asking a source for its next line.
pub enum Fetch {
    Line(Arc<str>),
    /// The source is exhausted and its frame should be popped.
    EndOfFrame,
    /// Not ready; the driver must suspend and the source will fire the
    /// registered waker once data is available.
    WouldBlock,
}

/// One nested input source.
pub trait LineSource: Send {
    fn fetch_line(&mut self) -> Fetch;

    /// Called before the driver parks on a `WouldBlock` from this source.
    /// Sources that never block may ignore it.
    fn register_waker(&mut self, waker: Waker) {
        let _ = waker;
    }

    /// The execution context that owns this source's I/O, if any.
    fn locus(&self) -> Option<NexusId> {
        None
    }

    /// Validation strictness for lines this source produces.
    fn parse_mode(&self) -> ParseMode {
        ParseMode::Pipe
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipeError {
    #[error("input source not found: {0}")]
    NotFound(String),

    #[error("pipe depth limit of {0} exceeded")]
    DepthExceeded(usize),

    #[error("{0}")]
    Io(String),
}

/// Result of a pipe-open attempt that may itself suspend.
pub enum Opened {
    Ready(Box<dyn LineSource>),
    /// The opener will fire the waker it was given once the source is ready;
    /// the driver retries the open on resumption.
    WouldBlock,
}

/// Collaborator that turns a parsed pipe request into a line source.
pub trait PipeOpener: Send + Sync {
    fn open(&self, request: &PipeRequest, waker: &Waker) -> Result<Opened, PipeError>;
}

/* ===================== Pipe stack ===================== */

struct PipeFrame {
    handle: PipeHandle,
    source: Box<dyn LineSource>,
}

/// Outcome of fetching through the whole stack.
pub enum StackFetch {
    Line {
        line: Arc<str>,
        mode: ParseMode,
        locus: Option<NexusId>,
    },
    WouldBlock,
    /// No frames remain.
    Empty,
}

/// LIFO stack of nested input sources owned by one session.
pub struct PipeStack {
    frames: Vec<PipeFrame>,
    max_depth: usize,
    next_handle: u64,
}

impl PipeStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            frames: Vec::new(),
            max_depth,
            next_handle: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Open a nested source on top of the stack.
    pub fn push_source(&mut self, source: Box<dyn LineSource>) -> Result<PipeHandle, PipeError> {
        if self.frames.len() >= self.max_depth {
            return Err(PipeError::DepthExceeded(self.max_depth));
        }

        self.next_handle += 1;
        let handle = PipeHandle(self.next_handle);
        self.frames.push(PipeFrame { handle, source });
        tracing::debug!(handle = handle.0, depth = self.frames.len(), "pipe frame pushed");
        Ok(handle)
    }

    /// Fetch the next line from the top of the stack, popping exhausted
    /// frames on the way down. `Empty` is reported only once the outermost
    /// frame is gone.
    pub fn fetch_next(&mut self) -> StackFetch {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return StackFetch::Empty;
            };

            match frame.source.fetch_line() {
                Fetch::Line(line) => {
                    let mode = frame.source.parse_mode();
                    let locus = frame.source.locus();
                    return StackFetch::Line { line, mode, locus };
                }
                Fetch::WouldBlock => return StackFetch::WouldBlock,
                Fetch::EndOfFrame => {
                    if let Some(frame) = self.frames.pop() {
                        tracing::debug!(handle = frame.handle.0, "pipe frame exhausted");
                    }
                }
            }
        }
    }

    /// Register a waker with the blocked top frame.
    pub fn register_waker_on_top(&mut self, waker: Waker) {
        if let Some(frame) = self.frames.last_mut() {
            frame.source.register_waker(waker);
        }
    }

    pub fn top_locus(&self) -> Option<NexusId> {
        self.frames.last().and_then(|frame| frame.source.locus())
    }

    /// Drop every frame. Used by the `end` directive and session teardown.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/* ===================== Sources ===================== */

/// Gate shared between a [`MemorySource`] and whoever controls when its
/// data becomes available.
pub struct SourceGate {
    open: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

impl SourceGate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(false),
            waker: Mutex::new(None),
        })
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Make the source's data available and wake any parked fetch.
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        if let Some(waker) = self.waker.lock().unwrap().take() {
            waker.fire(ResumeToken::SourceReady);
        }
    }

    fn install(&self, waker: Waker) {
        if self.is_open() {
            // Raced with open(); resume immediately.
            waker.fire(ResumeToken::SourceReady);
        } else {
            *self.waker.lock().unwrap() = Some(waker);
        }
    }
}

/// In-memory scripted line source.
pub struct MemorySource {
    lines: VecDeque<Arc<str>>,
    mode: ParseMode,
    locus: Option<NexusId>,
    gate: Option<Arc<SourceGate>>,
}

impl MemorySource {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            lines: lines.into_iter().map(|l| Arc::from(l.as_ref())).collect(),
            mode: ParseMode::Pipe,
            locus: None,
            gate: None,
        }
    }

    pub fn with_mode(mut self, mode: ParseMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_locus(mut self, locus: NexusId) -> Self {
        self.locus = Some(locus);
        self
    }

    /// A source that reports `WouldBlock` until its gate is opened.
    pub fn gated<I, S>(lines: I) -> (Self, Arc<SourceGate>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let gate = SourceGate::new();
        let mut source = Self::new(lines);
        source.gate = Some(gate.clone());
        (source, gate)
    }
}

impl LineSource for MemorySource {
    fn fetch_line(&mut self) -> Fetch {
        if let Some(gate) = &self.gate {
            if !gate.is_open() {
                return Fetch::WouldBlock;
            }
        }

        match self.lines.pop_front() {
            Some(line) => Fetch::Line(line),
            None => Fetch::EndOfFrame,
        }
    }

    fn register_waker(&mut self, waker: Waker) {
        if let Some(gate) = &self.gate {
            gate.install(waker);
        }
    }

    fn locus(&self) -> Option<NexusId> {
        self.locus
    }

    fn parse_mode(&self) -> ParseMode {
        self.mode
    }
}

/// Line source backed by a file read up front.
pub struct FileSource {
    lines: VecDeque<Arc<str>>,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self, PipeError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipeError::NotFound(path.display().to_string())
            } else {
                PipeError::Io(e.to_string())
            }
        })?;

        Ok(Self {
            lines: text.lines().map(Arc::from).collect(),
        })
    }
}

impl LineSource for FileSource {
    fn fetch_line(&mut self) -> Fetch {
        match self.lines.pop_front() {
            Some(line) => Fetch::Line(line),
            None => Fetch::EndOfFrame,
        }
    }

    fn parse_mode(&self) -> ParseMode {
        ParseMode::ConfigFile
    }
}

/// Default opener: pipe targets are files resolved against a root directory.
#[derive(Debug, Clone, Default)]
pub struct FilePipeOpener {
    root: Option<PathBuf>,
}

impl FilePipeOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

impl PipeOpener for FilePipeOpener {
    fn open(&self, request: &PipeRequest, _waker: &Waker) -> Result<Opened, PipeError> {
        let path = match &self.root {
            Some(root) => root.join(&request.target),
            None => PathBuf::from(&request.target),
        };

        let source = FileSource::open(&path).map_err(|e| match e {
            // Report the requested name, not the resolved path
            PipeError::NotFound(_) => PipeError::NotFound(request.target.clone()),
            other => other,
        })?;

        Ok(Opened::Ready(Box::new(source)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::ParkSlot;

    #[test]
    fn test_stack_pops_exhausted_frames_lifo() {
        let mut stack = PipeStack::new(8);
        stack
            .push_source(Box::new(MemorySource::new(["outer"])))
            .unwrap();
        stack
            .push_source(Box::new(MemorySource::new(["inner"])))
            .unwrap();
        assert_eq!(stack.depth(), 2);

        // Inner frame first
        let StackFetch::Line { line, .. } = stack.fetch_next() else {
            panic!("expected a line");
        };
        assert_eq!(&*line, "inner");

        // Inner exhausts, outer takes over
        let StackFetch::Line { line, .. } = stack.fetch_next() else {
            panic!("expected a line");
        };
        assert_eq!(&*line, "outer");
        assert_eq!(stack.depth(), 1);

        assert!(matches!(stack.fetch_next(), StackFetch::Empty));
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_depth_limit() {
        let mut stack = PipeStack::new(1);
        stack
            .push_source(Box::new(MemorySource::new(["a"])))
            .unwrap();
        let err = stack
            .push_source(Box::new(MemorySource::new(["b"])))
            .unwrap_err();
        assert_eq!(err, PipeError::DepthExceeded(1));
    }

    #[test]
    fn test_empty_frame_pops_immediately() {
        let mut stack = PipeStack::new(8);
        stack
            .push_source(Box::new(MemorySource::new(Vec::<&str>::new())))
            .unwrap();
        assert!(matches!(stack.fetch_next(), StackFetch::Empty));
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_gated_source_blocks_until_opened() {
        let (source, gate) = MemorySource::gated(["line"]);
        let mut source = source;

        assert!(matches!(source.fetch_line(), Fetch::WouldBlock));

        gate.open();
        let Fetch::Line(line) = source.fetch_line() else {
            panic!("expected a line after gate opened");
        };
        assert_eq!(&*line, "line");
    }

    #[test]
    fn test_gate_install_after_open_fires_immediately() {
        let (mut source, gate) = MemorySource::gated(["line"]);
        gate.open();

        // The waker must fire even though registration happened late
        let (_slot, waker) = ParkSlot::new();
        source.register_waker(waker.clone());
        // A pre-fired slot is observable: a second fire is the duplicate
        // path, which must not panic.
        waker.fire(ResumeToken::SourceReady);
    }

    #[test]
    fn test_file_opener_not_found() {
        let opener = FilePipeOpener::new();
        let (_slot, waker) = ParkSlot::new();
        let request = PipeRequest {
            target: "definitely-missing.cfg".to_string(),
        };
        match opener.open(&request, &waker) {
            Err(err) => {
                assert_eq!(err, PipeError::NotFound("definitely-missing.cfg".to_string()))
            }
            Ok(_) => panic!("expected a not-found error"),
        }
    }
}
