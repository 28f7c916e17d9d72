//! Command execution engine
//!
//! The engine owns the collaborators (parser, executor, pipe opener), the
//! configured resumption strategy, and session creation. One submitted line
//! becomes one [`CommandExecution`] driven through the state machine in
//! [`driver`]; results come back on a oneshot per submission and accumulate
//! on the session.

pub(crate) mod driver;
mod exec;
pub mod state;

#[cfg(test)]
mod tests;

pub use exec::CommandExecution;
pub use state::ExecState;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;

use crate::command::{CommandExecutor, CommandTable};
use crate::config::{Config, ResumeModeCfg};
use crate::continuation::{Resume, ResumeSink, ResumeToken};
use crate::nexus::{NexusId, NexusSet, Scheduler};
use crate::parse::{CommandParser, LineParser, ParseMode};
use crate::pipes::{FilePipeOpener, PipeOpener};
use crate::session::Session;
use crate::types::{EngineError, ReturnCode};

/// The configured resumption strategy.
///
/// Selected once at build time; everything past the sink is shared code.
pub(crate) enum Strategy {
    Queued(Arc<NexusSet>),
    Callback(Arc<Scheduler>),
}

impl Strategy {
    pub(crate) fn sink_for(&self, locus: NexusId) -> ResumeSink {
        match self {
            Strategy::Queued(set) => set.sink_for(locus),
            Strategy::Callback(scheduler) => ResumeSink::Scheduled(scheduler.clone()),
        }
    }

    fn worker_count(&self) -> usize {
        match self {
            Strategy::Queued(set) => set.worker_count(),
            Strategy::Callback(_) => 1,
        }
    }
}

/// Shared engine state handed to worker tasks and the scheduler.
pub(crate) struct EngineInner {
    pub(crate) config: Config,
    pub(crate) parser: Arc<dyn CommandParser>,
    pub(crate) executor: Arc<dyn CommandExecutor>,
    pub(crate) opener: Arc<dyn PipeOpener>,
    pub(crate) strategy: Strategy,
}

/* ===================== Builder ===================== */

pub struct EngineBuilder {
    config: Config,
    parser: Option<Arc<dyn CommandParser>>,
    executor: Option<Arc<dyn CommandExecutor>>,
    opener: Option<Arc<dyn PipeOpener>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn parser(mut self, parser: impl CommandParser + 'static) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    pub fn executor(mut self, executor: impl CommandExecutor + 'static) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    pub fn opener(mut self, opener: impl PipeOpener + 'static) -> Self {
        self.opener = Some(Arc::new(opener));
        self
    }

    /// Build the engine. Queued mode spawns its nexus workers here, so a
    /// tokio runtime must be current.
    pub fn build(self) -> Engine {
        let strategy = match self.config.resume {
            ResumeModeCfg::Queued { workers } => Strategy::Queued(NexusSet::new(workers)),
            ResumeModeCfg::Callback => Strategy::Callback(Scheduler::new()),
        };

        let opener = self.opener.unwrap_or_else(|| {
            Arc::new(match &self.config.pipe.root {
                Some(root) => FilePipeOpener::rooted(root.clone()),
                None => FilePipeOpener::new(),
            })
        });

        let inner = Arc::new(EngineInner {
            config: self.config,
            parser: self.parser.unwrap_or_else(|| Arc::new(LineParser::new())),
            executor: self
                .executor
                .unwrap_or_else(|| Arc::new(CommandTable::new())),
            opener,
            strategy,
        });

        let workers = match &inner.strategy {
            Strategy::Queued(set) => {
                let handles = set.start(inner.clone());
                info!(workers = handles.len(), "engine started in queued mode");
                handles
            }
            Strategy::Callback(_) => {
                info!("engine started in callback mode");
                Vec::new()
            }
        };

        Engine {
            inner,
            next_home: AtomicUsize::new(0),
            workers: Mutex::new(workers),
        }
    }
}

/* ===================== Engine ===================== */

/// Per-session creation options.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Echo successfully executed lines back to the session.
    pub reflect: bool,
    /// Deliver command output to the session.
    pub out: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reflect: false,
            out: true,
        }
    }
}

pub struct Engine {
    inner: Arc<EngineInner>,
    next_home: AtomicUsize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            config: Config::default(),
            parser: None,
            executor: None,
            opener: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn new_session(&self, name: impl Into<String>, mode: ParseMode) -> Arc<Session> {
        self.new_session_with(name, mode, SessionOptions::default())
    }

    /// Create a session homed on the next nexus, round robin.
    pub fn new_session_with(
        &self,
        name: impl Into<String>,
        mode: ParseMode,
        options: SessionOptions,
    ) -> Arc<Session> {
        let home = NexusId(
            self.next_home.fetch_add(1, Ordering::SeqCst) % self.inner.strategy.worker_count(),
        );

        let mut session = Session::new(name, home, mode, self.inner.config.pipe.max_depth);
        session.set_reflect(options.reflect);
        session.set_out(options.out);
        Arc::new(session)
    }

    /// Start one command execution for the session's next input.
    ///
    /// Fails if the session is closed or already has an execution in
    /// flight. The receiver yields the final result.
    pub fn submit(
        &self,
        session: &Arc<Session>,
    ) -> Result<oneshot::Receiver<ReturnCode>, EngineError> {
        session.begin_execution()?;

        let (tx, rx) = oneshot::channel();
        let exec = CommandExecution::new(session.clone(), tx);
        let sink = self.inner.strategy.sink_for(session.home());
        sink.dispatch(Resume {
            exec,
            token: ResumeToken::Start,
        });

        Ok(rx)
    }

    /// Queue one line on the session and start an execution for it.
    pub fn submit_line(
        &self,
        session: &Arc<Session>,
        line: impl AsRef<str>,
    ) -> Result<oneshot::Receiver<ReturnCode>, EngineError> {
        session.push_line(line);
        self.submit(session)
    }

    /// Run scheduled resumptions in callback mode. No-op in queued mode.
    ///
    /// Returns how many resumptions ran.
    pub fn pump(&self) -> usize {
        match &self.inner.strategy {
            Strategy::Callback(scheduler) => scheduler.run_until_idle(&self.inner),
            Strategy::Queued(_) => 0,
        }
    }

    /// Execute everything the session has queued, one execution at a time.
    pub async fn run_session(
        &self,
        session: &Arc<Session>,
    ) -> anyhow::Result<Vec<ReturnCode>> {
        let mut results = Vec::new();

        while session.is_live() && session.has_input() {
            let mut rx = self.submit(session)?;

            let ret = match &self.inner.strategy {
                Strategy::Queued(_) => rx
                    .await
                    .context("command execution dropped without a result")?,
                Strategy::Callback(_) => loop {
                    self.pump();
                    match rx.try_recv() {
                        Ok(ret) => break ret,
                        Err(oneshot::error::TryRecvError::Empty) => {
                            tokio::time::sleep(Duration::from_millis(1)).await;
                        }
                        Err(oneshot::error::TryRecvError::Closed) => {
                            anyhow::bail!("command execution dropped without a result");
                        }
                    }
                },
            };

            results.push(ret);
        }

        Ok(results)
    }

    /// Stop nexus workers and wait for them to drain.
    pub async fn shutdown(&self) {
        if let Strategy::Queued(set) = &self.inner.strategy {
            set.shutdown();
        }

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.await;
        }
    }
}
