//! Shared test fixtures for the engine suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::command::{CommandExecutor, Outcome};
use crate::config::{Config, ResumeModeCfg};
use crate::continuation::{ResumeValue, Waker};
use crate::engine::Engine;
use crate::notify::NotifyBuffer;
use crate::parse::{ParsedCommand, PipeRequest};
use crate::pipes::{LineSource, MemorySource, Opened, PipeError, PipeOpener};
use crate::session::Session;
use crate::types::{ExecErrorDetail, ReturnCode};

/// Scripted executor keyed on the command keyword.
///
/// `ok` succeeds, `fail` fails, `notify` fails with a notify buffer,
/// `suspend` parks once and succeeds on resumption, `reserved` misbehaves
/// by returning the mid-flight marker.
#[derive(Clone, Default)]
pub struct ScriptExecutor {
    state: Arc<ScriptState>,
}

#[derive(Default)]
struct ScriptState {
    executed: Mutex<Vec<String>>,
    calls: AtomicUsize,
    suspends: AtomicUsize,
    resumes: AtomicUsize,
    waker: Mutex<Option<Waker>>,
}

impl ScriptExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.executed.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn suspends(&self) -> usize {
        self.state.suspends.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.state.resumes.load(Ordering::SeqCst)
    }

    pub fn take_waker(&self) -> Option<Waker> {
        self.state.waker.lock().unwrap().take()
    }
}

impl CommandExecutor for ScriptExecutor {
    fn execute(
        &self,
        parsed: &ParsedCommand,
        _session: &Session,
        resumed: Option<ResumeValue>,
        waker: &Waker,
    ) -> Outcome {
        self.state.calls.fetch_add(1, Ordering::SeqCst);

        match parsed.keyword.as_str() {
            "ok" => {
                self.state
                    .executed
                    .lock()
                    .unwrap()
                    .push(parsed.line().to_string());
                Outcome::Ready(ReturnCode::Success)
            }
            "fail" => Outcome::Ready(ReturnCode::execution_error("scripted failure")),
            "notify" => {
                let mut notify = NotifyBuffer::new(6, 1);
                notify.append(parsed.args.join(" ").as_bytes());
                Outcome::Ready(ReturnCode::ExecutionError(ExecErrorDetail {
                    message: "scripted notify failure".to_string(),
                    notify: Some(notify),
                }))
            }
            "suspend" => {
                if resumed.is_some() {
                    self.state.resumes.fetch_add(1, Ordering::SeqCst);
                    self.state
                        .executed
                        .lock()
                        .unwrap()
                        .push(parsed.line().to_string());
                    Outcome::Ready(ReturnCode::Success)
                } else {
                    self.state.suspends.fetch_add(1, Ordering::SeqCst);
                    *self.state.waker.lock().unwrap() = Some(waker.clone());
                    Outcome::Suspend
                }
            }
            "reserved" => Outcome::Ready(ReturnCode::Suspended),
            other => Outcome::Ready(ReturnCode::execution_error(format!(
                "unknown command: {other}"
            ))),
        }
    }
}

/// Opener serving scripted in-memory sources by name.
#[derive(Clone, Default)]
pub struct FakeOpener {
    scripts: Arc<Mutex<HashMap<String, Vec<String>>>>,
    prepared: Arc<Mutex<HashMap<String, Box<dyn LineSource>>>>,
}

impl FakeOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script<I, S>(self, name: &str, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scripts.lock().unwrap().insert(
            name.to_string(),
            lines.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Hand out a specific source once, e.g. a gated one.
    pub fn with_source(self, name: &str, source: Box<dyn LineSource>) -> Self {
        self.prepared
            .lock()
            .unwrap()
            .insert(name.to_string(), source);
        self
    }
}

impl PipeOpener for FakeOpener {
    fn open(&self, request: &PipeRequest, _waker: &Waker) -> Result<Opened, PipeError> {
        if let Some(source) = self.prepared.lock().unwrap().remove(&request.target) {
            return Ok(Opened::Ready(source));
        }

        match self.scripts.lock().unwrap().get(&request.target) {
            Some(lines) => Ok(Opened::Ready(Box::new(MemorySource::new(lines.clone())))),
            None => Err(PipeError::NotFound(request.target.clone())),
        }
    }
}

/* ===================== Engine builders ===================== */

pub fn queued_engine(executor: ScriptExecutor, opener: FakeOpener) -> Engine {
    queued_engine_with(executor, opener, Config::default())
}

pub fn queued_engine_with(
    executor: ScriptExecutor,
    opener: FakeOpener,
    mut config: Config,
) -> Engine {
    config.resume = ResumeModeCfg::Queued { workers: 2 };
    Engine::builder()
        .config(config)
        .executor(executor)
        .opener(opener)
        .build()
}

pub fn callback_engine(executor: ScriptExecutor, opener: FakeOpener) -> Engine {
    callback_engine_with(executor, opener, Config::default())
}

pub fn callback_engine_with(
    executor: ScriptExecutor,
    opener: FakeOpener,
    mut config: Config,
) -> Engine {
    config.resume = ResumeModeCfg::Callback;
    Engine::builder()
        .config(config)
        .executor(executor)
        .opener(opener)
        .build()
}

/// Poll until the executor has parked and given up its waker.
pub async fn wait_for_waker(executor: &ScriptExecutor) -> Waker {
    for _ in 0..400 {
        if let Some(waker) = executor.take_waker() {
            return waker;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("executor never suspended");
}

/// Await a submission result with a test deadline.
pub async fn recv(
    rx: tokio::sync::oneshot::Receiver<ReturnCode>,
) -> ReturnCode {
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("timed out waiting for execution result")
        .expect("execution dropped without a result")
}
