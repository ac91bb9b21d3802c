// ABOUTME: Logging configuration for the bridge and its environment overrides
// ABOUTME: Levels deserialize from plain strings so they sit naturally in statebridge.toml

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;

const LEVEL_VAR: &str = "STATEBRIDGE_LOG";
const RUST_LOG_VAR: &str = "RUST_LOG";
const JSON_VAR: &str = "STATEBRIDGE_LOG_JSON";
const NO_CONSOLE_VAR: &str = "STATEBRIDGE_LOG_NO_CONSOLE";
const FILE_VAR: &str = "STATEBRIDGE_LOG_FILE";
const NO_FILE_VAR: &str = "STATEBRIDGE_LOG_NO_FILE";

/// A `tracing::Level` that reads and writes as `"trace"` .. `"error"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogLevel(pub Level);

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        parse_log_level(raw).map(LogLevel)
    }
}

impl TryFrom<String> for LogLevel {
    type Error = anyhow::Error;

    fn try_from(raw: String) -> Result<Self> {
        raw.parse()
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.to_string()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.as_str().to_ascii_lowercase())
    }
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        LogLevel(level)
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        level.0
    }
}

/// The `[logging]` table of `statebridge.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,

    /// Per-target overrides, e.g. `statebridge_events = "trace"` to watch
    /// every bus dispatch without raising the host's own verbosity
    pub module_levels: HashMap<String, LogLevel>,

    pub output: OutputConfig,

    pub file: FileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub console: bool,
    /// Off unless asked for; the bridge lives inside a host UI process
    pub file: bool,
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO.into(),
            module_levels: HashMap::new(),
            output: OutputConfig::default(),
            file: FileConfig::default(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            console: true,
            file: false,
            json: false,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        let path = match dirs::config_dir() {
            Some(dir) => dir.join("statebridge").join("statebridge.log"),
            None => PathBuf::from("statebridge.log"),
        };
        Self { path }
    }
}

/// One comma-separated piece of a `RUST_LOG` style filter.
#[derive(Debug, PartialEq, Eq)]
enum Directive<'a> {
    Global(Level),
    Target(&'a str, Level),
}

fn parse_directive(raw: &str) -> Result<Directive<'_>> {
    match raw.split_once('=') {
        Some((target, level)) => {
            let target = target.trim();
            let level = parse_log_level(level.trim())
                .with_context(|| format!("Bad level for target '{target}'"))?;
            Ok(Directive::Target(target, level))
        }
        None => Ok(Directive::Global(parse_log_level(raw)?)),
    }
}

impl LoggingConfig {
    /// Defaults with the process environment layered on top.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// `STATEBRIDGE_LOG` wins over `RUST_LOG`; only one of them is read.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(level) = lookup(LEVEL_VAR) {
            self.level = level
                .parse()
                .with_context(|| format!("{LEVEL_VAR} is not a log level"))?;
        } else if let Some(filter) = lookup(RUST_LOG_VAR) {
            self.apply_filter(&filter)
                .with_context(|| format!("{RUST_LOG_VAR} could not be parsed"))?;
        }

        let set = |name: &str| lookup(name).is_some();
        if set(JSON_VAR) {
            self.output.json = true;
        }
        if set(NO_CONSOLE_VAR) {
            self.output.console = false;
        }
        if let Some(path) = lookup(FILE_VAR) {
            self.output.file = true;
            self.file.path = path.into();
        }
        if set(NO_FILE_VAR) {
            self.output.file = false;
        }
        Ok(())
    }

    fn apply_filter(&mut self, filter: &str) -> Result<()> {
        let directives = filter
            .split(',')
            .map(str::trim)
            .filter(|piece| !piece.is_empty());
        for piece in directives {
            match parse_directive(piece)? {
                Directive::Global(level) => self.level = level.into(),
                Directive::Target(target, level) => {
                    self.module_levels.insert(target.to_owned(), level.into());
                }
            }
        }
        Ok(())
    }
}

/// Case-insensitive; `warning` is accepted as `warn`.
pub(crate) fn parse_log_level(raw: &str) -> Result<Level> {
    let level = match raw.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => return Err(anyhow!("unknown log level '{raw}'")),
    };
    Ok(level)
}
