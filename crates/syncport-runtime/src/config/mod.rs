//! syncport Configuration
//!
//! Provides library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls (programmatic)
//! 2. Environment variables (runtime)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use syncport_runtime::config::{BackendKind, SyncConfig};
//!
//! let config = SyncConfig::from_env()
//!     .backend(BackendKind::Coop)
//!     .idle_poll_interval(Duration::from_millis(2));
//! ```

pub mod defaults;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use syncport_core::env::{env_get, env_get_bool, env_get_opt};
use syncport_core::ConfigError;

/// Which backend to register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Preemptive OS threads
    Native,
    /// Cooperative logical threads
    Coop,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "native" | "os" | "pthread" => Ok(BackendKind::Native),
            "coop" | "cooperative" | "green" => Ok(BackendKind::Coop),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Native => write!(f, "native"),
            BackendKind::Coop => write!(f, "coop"),
        }
    }
}

/// Backend configuration with builder pattern.
///
/// Use `from_env()` to start with library defaults and apply any
/// environment variable overrides.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Backend to register
    pub backend: BackendKind,
    /// Spins before a contended native mutex sleeps
    pub mutex_spins: u32,
    /// Longest single idle poll of the cooperative scheduler
    pub idle_poll_interval: Duration,
    /// Raise the log level to debug on registration
    pub debug_logging: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SyncConfig {
    /// Create config from defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SP_BACKEND` - `native` or `coop` (unknown names fall back to the default)
    /// - `SP_MUTEX_SPINS` - Spins before a native mutex sleeps
    /// - `SP_IDLE_POLL_MS` - Cooperative idle poll bound in milliseconds
    /// - `SP_DEBUG` - Enable debug logging (0/1)
    pub fn from_env() -> Self {
        Self {
            backend: env_get("SP_BACKEND", defaults::BACKEND),
            mutex_spins: env_get("SP_MUTEX_SPINS", defaults::MUTEX_SPINS),
            idle_poll_interval: Duration::from_millis(env_get(
                "SP_IDLE_POLL_MS",
                defaults::IDLE_POLL_MS,
            )),
            debug_logging: env_get_bool("SP_DEBUG", defaults::DEBUG_LOGGING),
        }
    }

    /// Like `from_env`, but an unknown `SP_BACKEND` is an error
    pub fn try_from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_env();
        if let Some(name) = env_get_opt::<String>("SP_BACKEND") {
            config.backend = name.parse()?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Create config with library defaults (no env override).
    /// Useful for testing or when you want full control.
    pub fn new() -> Self {
        Self {
            backend: defaults::BACKEND,
            mutex_spins: defaults::MUTEX_SPINS,
            idle_poll_interval: Duration::from_millis(defaults::IDLE_POLL_MS),
            debug_logging: defaults::DEBUG_LOGGING,
        }
    }

    // Builder methods

    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = kind;
        self
    }

    pub fn mutex_spins(mut self, spins: u32) -> Self {
        self.mutex_spins = spins;
        self
    }

    pub fn idle_poll_interval(mut self, d: Duration) -> Self {
        self.idle_poll_interval = d;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mutex_spins > 1_000_000 {
            return Err(ConfigError::InvalidValue("mutex_spins must be <= 1000000"));
        }
        if self.idle_poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue("idle_poll_interval must be > 0"));
        }
        if self.idle_poll_interval > Duration::from_secs(60) {
            return Err(ConfigError::InvalidValue("idle_poll_interval must be <= 60s"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("syncport Configuration:");
        eprintln!("  backend:             {}", self.backend);
        eprintln!("  mutex_spins:         {}", self.mutex_spins);
        eprintln!("  idle_poll_interval:  {:?}", self.idle_poll_interval);
        eprintln!("  debug_logging:       {}", self.debug_logging);
    }
}
