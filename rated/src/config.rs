//! Executor configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the internal executor paces dequeues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Pacing {
    /// Fixed-rate timer on a dedicated runtime; in-flight tasks cannot be interrupted
    #[default]
    Timer,
    /// Dedicated worker loop with drift-correcting sleep and best-effort interruption
    Loop,
}

impl Pacing {
    /// Whether an in-flight task can be interrupted under this pacing
    pub fn supports_interrupt(&self) -> bool {
        matches!(self, Self::Loop)
    }
}

impl fmt::Display for Pacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timer => write!(f, "timer"),
            Self::Loop => write!(f, "loop"),
        }
    }
}

impl std::str::FromStr for Pacing {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "timer" => Ok(Self::Timer),
            "loop" => Ok(Self::Loop),
            _ => Err(format!("Unknown pacing: {}", s)),
        }
    }
}

/// Rated executor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatedConfig {
    /// Minimum spacing between task starts in milliseconds
    #[serde(rename = "rate-ms", default = "default_rate_ms")]
    pub rate_ms: u64,

    /// Pacing strategy
    #[serde(default)]
    pub pacing: Pacing,

    /// Name given to the worker thread (passed through untouched)
    #[serde(rename = "thread-name", default)]
    pub thread_name: Option<String>,
}

fn default_rate_ms() -> u64 {
    100
}

impl Default for RatedConfig {
    fn default() -> Self {
        Self {
            rate_ms: default_rate_ms(),
            pacing: Pacing::default(),
            thread_name: None,
        }
    }
}

impl RatedConfig {
    /// Build a config for the given period and pacing
    ///
    /// The period is stored in whole milliseconds; anything finer is rejected
    /// rather than rounded.
    pub fn new(rate: Duration, pacing: Pacing) -> Result<Self> {
        if rate.subsec_nanos() % 1_000_000 != 0 {
            return Err(eyre::eyre!("rate {:?} is not a whole number of milliseconds", rate));
        }
        let rate_ms = u64::try_from(rate.as_millis()).context("rate does not fit in rate-ms")?;
        let config = Self {
            rate_ms,
            pacing,
            thread_name: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the worker thread name
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    /// Get the rate as a Duration
    pub fn rate(&self) -> Duration {
        Duration::from_millis(self.rate_ms)
    }

    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.rate_ms == 0 {
            return Err(eyre::eyre!("rate-ms must be greater than zero"));
        }
        Ok(())
    }

    /// Default location of the user config file: `<config_dir>/rated/rated.yml`
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rated").join("rated.yml"))
    }

    /// Load configuration from `config_path`, else the user config file, else defaults
    ///
    /// An explicit path must load. A broken user config file is logged and
    /// skipped.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        if let Some(path) = Self::user_config_path().filter(|p| p.exists()) {
            match Self::load_from_file(&path) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "RatedConfig::load: skipping user config"),
            }
        }

        tracing::debug!("RatedConfig::load: no config file, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}
