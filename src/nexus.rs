//! Resumption delivery
//!
//! Two delivery strategies exist for continuations. In queued mode each
//! worker context (a nexus) owns an inbound queue and a task draining it;
//! a resumption posted to a nexus runs on that nexus. In callback mode a
//! single cooperative [`Scheduler`] holds resumptions until its owner pumps
//! them, so everything runs on the pumping thread.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::continuation::{Resume, ResumeSink};
use crate::engine::{driver, EngineInner};

/// Identifier of one worker context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct NexusId(pub usize);

struct Nexus {
    id: NexusId,
    tx: mpsc::UnboundedSender<Resume>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Resume>>>,
}

/// The fixed set of worker contexts for queued delivery.
pub struct NexusSet {
    nexuses: Vec<Nexus>,
    cancel: CancellationToken,
}

impl NexusSet {
    pub fn new(workers: usize) -> Arc<Self> {
        let count = workers.max(1);
        let nexuses = (0..count)
            .map(|i| {
                let (tx, rx) = mpsc::unbounded_channel();
                Nexus {
                    id: NexusId(i),
                    tx,
                    rx: Mutex::new(Some(rx)),
                }
            })
            .collect();

        Arc::new(Self {
            nexuses,
            cancel: CancellationToken::new(),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.nexuses.len()
    }

    /// The sink delivering onto the given nexus's queue.
    pub fn sink_for(&self, locus: NexusId) -> ResumeSink {
        let nexus = &self.nexuses[locus.0 % self.nexuses.len()];
        ResumeSink::Queued(nexus.tx.clone())
    }

    /// Spawn one drain task per nexus.
    ///
    /// Each resumption is driven to completion or the next park before the
    /// queue is polled again, so executions on the same nexus never overlap.
    pub(crate) fn start(&self, ctx: Arc<EngineInner>) -> Vec<JoinHandle<()>> {
        self.nexuses
            .iter()
            .filter_map(|nexus| {
                let id = nexus.id;
                let Some(mut rx) = nexus.rx.lock().unwrap().take() else {
                    tracing::error!(nexus = id.0, "nexus already started");
                    return None;
                };
                let cancel = self.cancel.clone();
                let ctx = ctx.clone();

                Some(tokio::spawn(async move {
                    info!(nexus = id.0, "nexus worker started");
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                debug!(nexus = id.0, "nexus worker stopping");
                                break;
                            }
                            resume = rx.recv() => {
                                match resume {
                                    Some(resume) => {
                                        driver::resume(resume, &ctx);
                                    }
                                    None => break,
                                }
                            }
                        }
                    }
                }))
            })
            .collect()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/* ===================== Cooperative scheduler ===================== */

/// Single-context callback scheduler.
///
/// Resumptions accumulate here and run only when the owner pumps the
/// scheduler, which is what makes callback mode safe without any locking
/// around session state beyond the engine's own.
pub struct Scheduler {
    queue: Mutex<VecDeque<Resume>>,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
        })
    }

    pub(crate) fn schedule(&self, resume: Resume) {
        self.queue.lock().unwrap().push_back(resume);
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Run the next scheduled resumption, if any.
    pub(crate) fn run_once(&self, ctx: &Arc<EngineInner>) -> bool {
        let resume = self.queue.lock().unwrap().pop_front();
        match resume {
            Some(resume) => {
                driver::resume(resume, ctx);
                true
            }
            None => false,
        }
    }

    /// Drain the queue, including resumptions scheduled while draining.
    pub(crate) fn run_until_idle(&self, ctx: &Arc<EngineInner>) -> usize {
        let mut ran = 0;
        while self.run_once(ctx) {
            ran += 1;
        }
        ran
    }
}
