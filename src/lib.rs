//! Cadence: a resumable command execution engine.
//!
//! Command lines from any origin (terminal, configuration file, internal
//! caller) run through one per-session state machine that can suspend at
//! any blocking point and resume later via a continuation, on a worker
//! nexus or a cooperative scheduler, without the calling code knowing
//! which.

pub mod cli;
pub mod command;
pub mod config;
pub mod continuation;
pub mod engine;
pub mod nexus;
pub mod notify;
pub mod parse;
pub mod pipes;
pub mod session;
pub mod types;

pub use command::{CommandExecutor, CommandTable, Outcome};
pub use config::Config;
pub use engine::{CommandExecution, Engine, EngineBuilder, ExecState, SessionOptions};
pub use parse::{CommandParser, LineParser, ParseMode, ParsedCommand};
pub use session::Session;
pub use types::{EngineError, ReturnCode, SuspendClass};
