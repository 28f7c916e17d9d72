//! Parser collaborator interface
//!
//! The command grammar itself lives with the command table; the engine only
//! needs a line turned into a [`ParsedCommand`]. [`LineParser`] is the
//! default implementation: whitespace tokenizing plus recognition of nested
//! input requests (`< path` or `file=path`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How strictly a line should be validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    Interactive,
    ConfigFile,
    Pipe,
}

/// A request to open a nested input source, extracted from the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeRequest {
    pub target: String,
}

/// Structured result of interpreting a raw line.
///
/// Exclusively owned by the command execution that produced it and released
/// exactly once. Keeps a shared reference to the line's storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub keyword: String,
    pub args: Vec<String>,
    pub pipe: Option<PipeRequest>,
    /// The command itself is the payload and must execute even though it
    /// also opened a nested source.
    pub direct: bool,
    line: Arc<str>,
}

impl ParsedCommand {
    pub fn line(&self) -> &str {
        &self.line
    }

    /// The line does nothing but open a nested source.
    pub fn is_pipe_only(&self) -> bool {
        self.pipe.is_some() && self.keyword.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty command line")]
    EmptyLine,

    #[error("control character in command line")]
    ControlCharacter,

    #[error("pipe redirect `<` is missing a target")]
    MissingPipeTarget,
}

/// Parser collaborator seam.
pub trait CommandParser: Send + Sync {
    fn parse(&self, line: &Arc<str>, mode: ParseMode) -> Result<ParsedCommand, ParseError>;
}

/* ===================== Special input ===================== */

/// Inputs that are not ordinary commands.
///
/// These bypass parse, open-pipes and execute entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialInput {
    Blank,
    Comment,
    /// Abandon any nested input sources still open.
    End,
    /// Close the session once the current execution completes.
    Exit,
}

/// Classify a raw line as special input, if it is one.
pub fn classify_special(line: &str) -> Option<SpecialInput> {
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return Some(SpecialInput::Blank);
    }
    if trimmed.starts_with('!') || trimmed.starts_with('#') {
        return Some(SpecialInput::Comment);
    }

    match trimmed {
        "end" => Some(SpecialInput::End),
        "exit" => Some(SpecialInput::Exit),
        _ => None,
    }
}

/* ===================== Default parser ===================== */

/// Whitespace-tokenizing line parser.
///
/// Interactive input is lenient: stray control characters are stripped.
/// Config-file and pipe input reject them outright.
#[derive(Debug, Clone, Default)]
pub struct LineParser;

impl LineParser {
    pub fn new() -> Self {
        Self
    }
}

impl CommandParser for LineParser {
    fn parse(&self, line: &Arc<str>, mode: ParseMode) -> Result<ParsedCommand, ParseError> {
        let has_control = line.chars().any(|c| c.is_control() && c != '\t');

        let cleaned: String;
        let text: &str = if has_control {
            match mode {
                ParseMode::Interactive => {
                    cleaned = line.chars().filter(|c| !c.is_control() || *c == '\t').collect();
                    &cleaned
                }
                ParseMode::ConfigFile | ParseMode::Pipe => {
                    return Err(ParseError::ControlCharacter);
                }
            }
        } else {
            line
        };

        let mut tokens = text.split_whitespace().peekable();
        let mut words: Vec<String> = Vec::new();
        let mut pipe: Option<PipeRequest> = None;

        while let Some(token) = tokens.next() {
            if token == "<" {
                let target = tokens.next().ok_or(ParseError::MissingPipeTarget)?;
                pipe = Some(PipeRequest {
                    target: target.to_string(),
                });
            } else if let Some(target) = token.strip_prefix("file=") {
                if target.is_empty() {
                    return Err(ParseError::MissingPipeTarget);
                }
                pipe = Some(PipeRequest {
                    target: target.to_string(),
                });
            } else {
                words.push(token.to_string());
            }
        }

        if words.is_empty() && pipe.is_none() {
            return Err(ParseError::EmptyLine);
        }

        let direct = pipe.is_some() && !words.is_empty();
        let keyword = if words.is_empty() {
            String::new()
        } else {
            words.remove(0)
        };

        Ok(ParsedCommand {
            keyword,
            args: words,
            pipe,
            direct,
            line: line.clone(),
        })
    }
}
