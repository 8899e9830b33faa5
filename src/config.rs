//! Global configuration parsing, validation, and environment overrides.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::machine::transport::SpawnConfig;
use crate::{AppError, Result};

/// Environment variable overriding [`GlobalConfig::executable`].
pub const EXECUTABLE_ENV: &str = "CSEND_EXECUTABLE";

/// Environment variable overriding [`GlobalConfig::identity`].
pub const IDENTITY_ENV: &str = "CSEND_IDENTITY";

/// Timeout values (seconds) for the machine-mode client.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Maximum wait for the child's `ready` frame.
    #[serde(default = "default_startup_seconds")]
    pub startup_seconds: u64,
    /// Default deadline for a correlated response.
    #[serde(default = "default_response_seconds")]
    pub response_seconds: u64,
    /// Grace period for each shutdown escalation step.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            startup_seconds: default_startup_seconds(),
            response_seconds: default_response_seconds(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

fn default_startup_seconds() -> u64 {
    5
}

fn default_response_seconds() -> u64 {
    2
}

fn default_shutdown_grace_seconds() -> u64 {
    2
}

/// Chatbot behaviour settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BotConfig {
    /// Greeting broadcast on start and sent to newly joined peers.
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// Maximum retained conversation turns per user.
    #[serde(default = "default_max_context")]
    pub max_context: usize,
    /// Maximum messages per user inside the rate window.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    /// Width of the sliding rate window.
    #[serde(default = "default_rate_window_seconds")]
    pub rate_window_seconds: u64,
    /// Delay before greeting a peer that just joined.
    #[serde(default = "default_peer_greeting_delay_ms")]
    pub peer_greeting_delay_ms: u64,
    /// Text returned by `!about`.
    #[serde(default = "default_about")]
    pub about: String,
    /// Reply used by the built-in responder.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            max_context: default_max_context(),
            rate_limit: default_rate_limit(),
            rate_window_seconds: default_rate_window_seconds(),
            peer_greeting_delay_ms: default_peer_greeting_delay_ms(),
            about: default_about(),
            fallback_reply: default_fallback_reply(),
        }
    }
}

fn default_greeting() -> String {
    "Hello! I'm a CSend bot. How can I help you today?".into()
}

fn default_max_context() -> usize {
    20
}

fn default_rate_limit() -> usize {
    20
}

fn default_rate_window_seconds() -> u64 {
    60
}

fn default_peer_greeting_delay_ms() -> u64 {
    1000
}

fn default_about() -> String {
    "I'm a bot attached to this CSend network. I keep per-user context and can \
     help several people at once."
        .into()
}

fn default_fallback_reply() -> String {
    "I'm having trouble connecting to my AI service right now. Please try again in a moment."
        .into()
}

/// Documentation and log search locations.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SearchConfig {
    /// Directory holding `*.txt` reference documents.
    #[serde(default)]
    pub docs_dir: Option<PathBuf>,
    /// Known platform logs: platform name → file path.
    #[serde(default)]
    pub log_files: BTreeMap<String, PathBuf>,
    /// External log filter script.
    #[serde(default)]
    pub filter_script: Option<PathBuf>,
}

fn default_identity() -> String {
    "bot".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Path to the CSend executable launched in machine mode.
    pub executable: PathBuf,
    /// Username announced to peers (`--machine-mode <identity>`).
    #[serde(default = "default_identity")]
    pub identity: String,
    /// Client timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Chatbot behaviour.
    #[serde(default)]
    pub bot: BotConfig,
    /// Search collaborator locations.
    #[serde(default)]
    pub search: SearchConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal configuration for an executable, with every default applied.
    #[must_use]
    pub fn for_executable(executable: impl Into<PathBuf>, identity: &str) -> Self {
        Self {
            executable: executable.into(),
            identity: identity.to_owned(),
            timeouts: TimeoutConfig::default(),
            bot: BotConfig::default(),
            search: SearchConfig::default(),
        }
    }

    /// Build the effective configuration for a command-line run.
    ///
    /// Precedence, lowest first: the config file (or defaults when there is
    /// none), the environment, then explicit flags.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file is unreadable or invalid, if no
    /// executable is known from any source, or if validation fails.
    pub fn resolve(
        path: Option<&Path>,
        executable: Option<PathBuf>,
        identity: Option<String>,
    ) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::for_executable(PathBuf::new(), &default_identity()),
        };
        config.apply_env_overrides();
        if let Some(executable) = executable {
            config.executable = executable;
        }
        if let Some(identity) = identity {
            config.identity = identity;
        }
        if config.executable.as_os_str().is_empty() {
            return Err(AppError::Config(format!(
                "no executable configured; pass --executable, set {EXECUTABLE_ENV}, or use --config"
            )));
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply [`EXECUTABLE_ENV`] / [`IDENTITY_ENV`] overrides when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(exe) = env::var(EXECUTABLE_ENV) {
            if !exe.is_empty() {
                debug!(executable = %exe, "executable overridden from environment");
                self.executable = PathBuf::from(exe);
            }
        }
        if let Ok(identity) = env::var(IDENTITY_ENV) {
            if !identity.is_empty() {
                debug!(identity = %identity, "identity overridden from environment");
                self.identity = identity;
            }
        }
    }

    /// Spawn parameters for launching the child in machine mode.
    #[must_use]
    pub fn spawn_config(&self) -> SpawnConfig {
        SpawnConfig::machine_mode(&self.executable, &self.identity)
    }

    /// Startup handshake window.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.startup_seconds)
    }

    /// Default correlated-response deadline.
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.response_seconds)
    }

    /// Grace period applied at each shutdown escalation step.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.timeouts.shutdown_grace_seconds)
    }

    /// Validate invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.executable.as_os_str().is_empty() {
            return Err(AppError::Config("executable must not be empty".into()));
        }

        if self.identity.trim().is_empty() {
            return Err(AppError::Config("identity must not be empty".into()));
        }

        if self.timeouts.startup_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.startup_seconds must be greater than zero".into(),
            ));
        }

        if self.timeouts.response_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.response_seconds must be greater than zero".into(),
            ));
        }

        if self.bot.rate_limit == 0 {
            return Err(AppError::Config(
                "bot.rate_limit must be greater than zero".into(),
            ));
        }

        if self.bot.max_context == 0 {
            return Err(AppError::Config(
                "bot.max_context must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
