//! Engine configuration
//!
//! Defaults first, then an optional TOML file, then environment variables
//! with the `CADENCE` prefix (`__` as the section separator), each layer
//! overriding the previous one.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::SuspendClass;

/// How resumptions are delivered back to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ResumeModeCfg {
    /// Worker contexts with inbound queues.
    Queued { workers: usize },
    /// Single cooperative scheduler pumped by the caller.
    Callback,
}

/// Per-suspension-class timeouts in milliseconds. Zero means unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    pub fetch_ms: u64,
    pub open_ms: u64,
    pub execute_ms: u64,
}

impl Timeouts {
    pub fn for_class(&self, class: SuspendClass) -> Option<Duration> {
        let ms = match class {
            SuspendClass::Fetch => self.fetch_ms,
            SuspendClass::OpenPipes => self.open_ms,
            SuspendClass::Execute => self.execute_ms,
        };
        (ms > 0).then(|| Duration::from_millis(ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeConfig {
    /// Maximum nesting depth of input sources per session.
    pub max_depth: usize,
    /// Directory pipe targets are resolved against. Unset means the
    /// process working directory.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub resume: ResumeModeCfg,
    pub timeouts: Timeouts,
    pub pipe: PipeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resume: ResumeModeCfg::Queued { workers: 2 },
            timeouts: Timeouts {
                fetch_ms: 0,
                open_ms: 0,
                execute_ms: 0,
            },
            pipe: PipeConfig {
                max_depth: 8,
                root: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from file and environment, falling back to
    /// defaults for anything unset.
    ///
    /// The file path comes from `CADENCE_CONFIG_PATH`, defaulting to
    /// `cadence.toml`; a missing file is not an error.
    pub fn load() -> anyhow::Result<Self> {
        let path =
            std::env::var("CADENCE_CONFIG_PATH").unwrap_or_else(|_| "cadence.toml".to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .set_default("resume.mode", "queued")?
            .set_default("resume.workers", 2)?
            .set_default("timeouts.fetch_ms", 0)?
            .set_default("timeouts.open_ms", 0)?
            .set_default("timeouts.execute_ms", 0)?
            .set_default("pipe.max_depth", 8)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("CADENCE").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.resume, ResumeModeCfg::Queued { workers: 2 });
        assert_eq!(config.pipe.max_depth, 8);
        assert!(config.timeouts.for_class(SuspendClass::Fetch).is_none());
    }

    #[test]
    fn test_timeout_lookup() {
        let timeouts = Timeouts {
            fetch_ms: 50,
            open_ms: 0,
            execute_ms: 250,
        };
        assert_eq!(
            timeouts.for_class(SuspendClass::Fetch),
            Some(Duration::from_millis(50))
        );
        assert_eq!(timeouts.for_class(SuspendClass::OpenPipes), None);
        assert_eq!(
            timeouts.for_class(SuspendClass::Execute),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load_from("no-such-config-file").unwrap();
        assert_eq!(config, Config::default());
    }
}
