//! Command line interface
//!
//! `run` executes a script file through a session, `exec` runs a single
//! line, `check` parses a line without executing it. The built-in command
//! table is a small demonstration set; embedders register their own.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use crate::command::{CommandTable, Outcome};
use crate::config::Config;
use crate::continuation::ResumeToken;
use crate::engine::{Engine, SessionOptions};
use crate::parse::{CommandParser, LineParser, ParseMode};
use crate::types::ReturnCode;

#[derive(Parser)]
#[command(name = "cadence", about = "Resumable command execution engine", version)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command script file through a session
    Run {
        /// Script file to execute
        file: String,

        /// Echo successfully executed lines
        #[arg(long)]
        reflect: bool,
    },

    /// Execute a single command line
    Exec {
        /// The line to execute
        line: String,
    },

    /// Parse a line without executing it
    Check {
        /// The line to parse
        line: String,

        /// Validation mode: interactive, config_file or pipe
        #[arg(long, default_value = "interactive")]
        mode: String,
    },
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Run { file, reflect } => run_file(config, &file, reflect).await,
        Commands::Exec { line } => exec_line(config, &line).await,
        Commands::Check { line, mode } => check_line(&line, &mode),
    }
}

async fn run_file(config: Config, file: &str, reflect: bool) -> Result<()> {
    let engine = Engine::builder()
        .config(config)
        .executor(demo_table())
        .build();

    let session = engine.new_session_with(
        "run",
        ParseMode::Interactive,
        SessionOptions {
            reflect,
            out: true,
        },
    );

    // The whole file runs as one nested input source.
    session.push_line(format!("< {file}"));
    let results = engine
        .run_session(&session)
        .await
        .with_context(|| format!("running {file}"))?;

    for line in session.outputs() {
        println!("{line}");
    }
    if reflect {
        for line in session.reflected() {
            println!("> {line}");
        }
    }

    let failures: Vec<_> = results.iter().filter(|r| r.is_error()).collect();
    engine.shutdown().await;

    if !failures.is_empty() {
        bail!("{} command(s) failed: {failures:?}", failures.len());
    }
    Ok(())
}

async fn exec_line(config: Config, line: &str) -> Result<()> {
    let engine = Engine::builder()
        .config(config)
        .executor(demo_table())
        .build();

    let session = engine.new_session("exec", ParseMode::Interactive);
    session.push_line(line);

    let results = engine.run_session(&session).await?;
    for output in session.outputs() {
        println!("{output}");
    }
    engine.shutdown().await;

    match results.last() {
        Some(ReturnCode::Success) | None => Ok(()),
        Some(other) => bail!("command failed: {other:?}"),
    }
}

fn check_line(line: &str, mode: &str) -> Result<()> {
    let mode = match mode {
        "interactive" => ParseMode::Interactive,
        "config_file" => ParseMode::ConfigFile,
        "pipe" => ParseMode::Pipe,
        other => bail!("unknown parse mode: {other}"),
    };

    let line: Arc<str> = Arc::from(line);
    match LineParser::new().parse(&line, mode) {
        Ok(parsed) => {
            println!("keyword: {}", parsed.keyword);
            println!("args:    {:?}", parsed.args);
            if let Some(pipe) = &parsed.pipe {
                println!("pipe:    {} (direct: {})", pipe.target, parsed.direct);
            }
            Ok(())
        }
        Err(e) => bail!("parse error: {e}"),
    }
}

/// Built-in demonstration commands.
pub fn demo_table() -> CommandTable {
    let mut table = CommandTable::new();

    table.register("show", |parsed, session, _resumed, _waker| {
        match parsed.args.first().map(String::as_str) {
            Some("version") => {
                session.write_output(format!("Cadence {}", env!("CARGO_PKG_VERSION")));
                Outcome::Ready(ReturnCode::Success)
            }
            other => Outcome::Ready(ReturnCode::execution_error(format!(
                "unknown show target: {}",
                other.unwrap_or("")
            ))),
        }
    });

    table.register("echo", |parsed, session, _resumed, _waker| {
        session.write_output(parsed.args.join(" "));
        Outcome::Ready(ReturnCode::Success)
    });

    table.register("configure", |_parsed, _session, _resumed, _waker| {
        Outcome::Ready(ReturnCode::Success)
    });

    // Suspends once, resumed by a timer task.
    table.register("wait", |parsed, _session, resumed, waker| {
        if resumed.is_some() {
            return Outcome::Ready(ReturnCode::Success);
        }

        let ms: u64 = match parsed.args.first().and_then(|a| a.parse().ok()) {
            Some(ms) => ms,
            None => {
                return Outcome::Ready(ReturnCode::execution_error(
                    "wait requires a duration in milliseconds",
                ))
            }
        };

        let waker = waker.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    waker.fire(ResumeToken::Executor(serde_json::json!({ "slept_ms": ms })));
                });
                Outcome::Suspend
            }
            Err(_) => Outcome::Ready(ReturnCode::execution_error(
                "wait requires an async runtime",
            )),
        }
    });

    table
}
