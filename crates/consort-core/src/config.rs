//! Configuration loading and typed config structures for a coordinator.
//!
//! A [`ServerConfig`] can be built in code, parsed from YAML, or loaded from
//! a file. Every field has a default, so an empty document is valid:
//!
//! ```yaml
//! mode: asynchronous          # or synchronous
//! wait_for_start: true
//! error_policy: stop          # or propagate
//! ignore_multiple_reset: false
//! thread_name: consort-coordinator
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::session::{ErrorHandler, PropagateError, StopOnError};

/// Environment variable that overrides [`ServerConfig::mode`].
pub const MODE_ENV_VAR: &str = "CONSORT_MODE";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override carried a value that does not parse.
    #[error("invalid value {value:?} for {var}")]
    InvalidOverride {
        /// The environment variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// How participants check in for a round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    /// Only the participants due to act submit; everyone else blocks.
    #[default]
    Asynchronous,
    /// Every non-terminal participant submits each round, off-turn
    /// participants with a no-op.
    Synchronous,
}

impl TurnMode {
    /// Whether every participant checks in each round.
    pub const fn is_synchronous(self) -> bool {
        matches!(self, Self::Synchronous)
    }
}

impl fmt::Display for TurnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asynchronous => f.write_str("asynchronous"),
            Self::Synchronous => f.write_str("synchronous"),
        }
    }
}

impl FromStr for TurnMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asynchronous" | "async" => Ok(Self::Asynchronous),
            "synchronous" | "sync" => Ok(Self::Synchronous),
            other => Err(other.to_owned()),
        }
    }
}

/// What a session does when the coordinator reports a fault to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop the coordinator, then return the error.
    #[default]
    Stop,
    /// Return the error and leave the coordinator running.
    Propagate,
}

impl ErrorPolicy {
    /// The handler implementing this policy.
    pub fn handler(self) -> Box<dyn ErrorHandler> {
        match self {
            Self::Stop => Box::new(StopOnError),
            Self::Propagate => Box::new(PropagateError),
        }
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Round collection mode.
    #[serde(default)]
    pub mode: TurnMode,

    /// Block in `spawn` until the control loop has started.
    #[serde(default = "default_wait_for_start")]
    pub wait_for_start: bool,

    /// Default error policy for sessions created by `spawn`.
    #[serde(default)]
    pub error_policy: ErrorPolicy,

    /// Answer a repeated `reset` (one with no `step` in between) from the
    /// session's cache instead of asking the coordinator again.
    #[serde(default)]
    pub ignore_multiple_reset: bool,

    /// Name of the control-loop thread.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: TurnMode::default(),
            wait_for_start: default_wait_for_start(),
            error_policy: ErrorPolicy::default(),
            ignore_multiple_reset: false,
            thread_name: default_thread_name(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `CONSORT_MODE` overrides `mode` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::InvalidOverride`] if `CONSORT_MODE` is unparseable.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::InvalidOverride`] if `CONSORT_MODE` is unparseable.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] if `CONSORT_MODE` is set to
    /// something other than a turn mode.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] if the mode variable does
    /// not name a turn mode.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(MODE_ENV_VAR) {
            let Ok(mode) = value.parse::<TurnMode>() else {
                return Err(ConfigError::InvalidOverride {
                    var: MODE_ENV_VAR,
                    value,
                });
            };
            self.mode = mode;
        }
        Ok(())
    }

    /// Builder-style mode setter.
    #[must_use]
    pub const fn with_mode(mut self, mode: TurnMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builder-style error policy setter.
    #[must_use]
    pub const fn with_error_policy(mut self, error_policy: ErrorPolicy) -> Self {
        self.error_policy = error_policy;
        self
    }

    /// Builder-style setter for repeated-reset caching.
    #[must_use]
    pub const fn with_ignore_multiple_reset(mut self, ignore: bool) -> Self {
        self.ignore_multiple_reset = ignore;
        self
    }
}

const fn default_wait_for_start() -> bool {
    true
}

fn default_thread_name() -> String {
    String::from("consort-coordinator")
}
