//! # Config - benchstore settings
//!
//! Every knob is read from an environment variable with a default, then the
//! CLI overrides individual fields from its flags.
//!
//! ```text
//! BENCHSTORE_FILE            container path           (default: "output.bsc")
//! BENCHSTORE_ADDRESS         group namespace          (default: "result")
//! BENCHSTORE_ITERATIONS      worker iterations        (default: 10, "inf" = unbounded)
//! BENCHSTORE_WRITE_MODE      append | truncate        (default: "append"; "a" / "w" accepted)
//! BENCHSTORE_LOCK            take the advisory lock   (default: "true")
//! BENCHSTORE_PROBE_MS        lock probe interval ms   (default: 1000)
//! BENCHSTORE_LOCK_ATTEMPTS   max contended attempts   (default: unset = forever)
//! BENCHSTORE_LOCK_TIMEOUT_MS lock wait limit ms       (default: unset = forever)
//! BENCHSTORE_STALE_SECS      stale-lock max age secs  (default: unset = manual unlock)
//! BENCHSTORE_SYNC            fsync on close           (default: "true")
//! BENCHSTORE_SEED            benchmark seed           (default: 746574366)
//! BENCHSTORE_REPEATS         benchmark repeats        (default: 1000)
//! ```
//!
//! An unparseable value is an error rather than a fallback to the default.

pub mod logging;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Container file name used when nothing else is configured.
pub const DEFAULT_FILENAME: &str = "output.bsc";

/// Group namespace used when nothing else is configured.
pub const DEFAULT_ADDRESS: &str = "result";

/// Base seed of the benchmark payload; collective participants add their rank.
pub const DEFAULT_SEED: u64 = 746_574_366;

pub const DEFAULT_ITERATIONS: u64 = 10;
pub const DEFAULT_PROBE_MS: u64 = 1000;
pub const DEFAULT_REPEATS: u32 = 1000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid write mode {0:?} (expected append or truncate)")]
    InvalidWriteMode(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    /// A bounded iteration count must be at least one.
    #[error("iteration count must be positive or \"inf\", got {0:?}")]
    InvalidIterations(String),
}

/// How the container is opened for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Keep existing contents, create the file if absent.
    #[default]
    Append,
    /// Discard existing contents.
    Truncate,
}

impl FromStr for WriteMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" | "append" => Ok(WriteMode::Append),
            "w" | "truncate" => Ok(WriteMode::Truncate),
            _ => Err(ConfigError::InvalidWriteMode(s.to_string())),
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Append => f.write_str("append"),
            WriteMode::Truncate => f.write_str("truncate"),
        }
    }
}

/// How many compute/save/read cycles a worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iterations {
    Bounded(u64),
    Unbounded,
}

impl Iterations {
    /// `true` once `done` cycles satisfy the bound.
    pub fn reached(self, done: u64) -> bool {
        match self {
            Iterations::Bounded(n) => done >= n,
            Iterations::Unbounded => false,
        }
    }
}

impl Default for Iterations {
    fn default() -> Self {
        Iterations::Bounded(DEFAULT_ITERATIONS)
    }
}

impl FromStr for Iterations {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("inf") || s.eq_ignore_ascii_case("forever") {
            return Ok(Iterations::Unbounded);
        }
        match s.parse::<u64>() {
            Ok(n) if n > 0 => Ok(Iterations::Bounded(n)),
            _ => Err(ConfigError::InvalidIterations(s.to_string())),
        }
    }
}

impl fmt::Display for Iterations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Iterations::Bounded(n) => write!(f, "{n}"),
            Iterations::Unbounded => f.write_str("inf"),
        }
    }
}

/// Resolved settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub file: PathBuf,
    pub address: String,
    pub iterations: Iterations,
    pub write_mode: WriteMode,
    pub lock: bool,
    pub probe_interval: Duration,
    pub lock_attempts: Option<u32>,
    pub lock_timeout: Option<Duration>,
    pub stale_after: Option<Duration>,
    pub sync: bool,
    pub seed: u64,
    pub repeats: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_FILENAME),
            address: DEFAULT_ADDRESS.to_string(),
            iterations: Iterations::default(),
            write_mode: WriteMode::Append,
            lock: true,
            probe_interval: Duration::from_millis(DEFAULT_PROBE_MS),
            lock_attempts: None,
            lock_timeout: None,
            stale_after: None,
            sync: true,
            seed: DEFAULT_SEED,
            repeats: DEFAULT_REPEATS,
        }
    }
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads settings through `lookup`, which maps a variable name to its
    /// value. Unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut s = Settings::default();

        if let Some(v) = lookup("BENCHSTORE_FILE") {
            s.file = PathBuf::from(v);
        }
        if let Some(v) = lookup("BENCHSTORE_ADDRESS") {
            s.address = v;
        }
        if let Some(v) = lookup("BENCHSTORE_ITERATIONS") {
            s.iterations = v.parse()?;
        }
        if let Some(v) = lookup("BENCHSTORE_WRITE_MODE") {
            s.write_mode = v.parse()?;
        }
        if let Some(v) = lookup("BENCHSTORE_LOCK") {
            s.lock = parse_bool("BENCHSTORE_LOCK", &v)?;
        }
        if let Some(v) = lookup("BENCHSTORE_PROBE_MS") {
            s.probe_interval = Duration::from_millis(parse_num("BENCHSTORE_PROBE_MS", &v)?);
        }
        if let Some(v) = lookup("BENCHSTORE_LOCK_ATTEMPTS") {
            s.lock_attempts = Some(parse_num("BENCHSTORE_LOCK_ATTEMPTS", &v)?);
        }
        if let Some(v) = lookup("BENCHSTORE_LOCK_TIMEOUT_MS") {
            let ms = parse_num("BENCHSTORE_LOCK_TIMEOUT_MS", &v)?;
            s.lock_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(v) = lookup("BENCHSTORE_STALE_SECS") {
            let secs = parse_num("BENCHSTORE_STALE_SECS", &v)?;
            s.stale_after = Some(Duration::from_secs(secs));
        }
        if let Some(v) = lookup("BENCHSTORE_SYNC") {
            s.sync = parse_bool("BENCHSTORE_SYNC", &v)?;
        }
        if let Some(v) = lookup("BENCHSTORE_SEED") {
            s.seed = parse_num("BENCHSTORE_SEED", &v)?;
        }
        if let Some(v) = lookup("BENCHSTORE_REPEATS") {
            s.repeats = parse_num("BENCHSTORE_REPEATS", &v)?;
        }

        Ok(s)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
