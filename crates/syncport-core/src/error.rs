//! Error types for syncport backends

use core::fmt;

/// Result type for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in synchronization operations
///
/// I/O slots report through `std::io::Error` instead; these cover
/// primitive creation, registration and caller contract violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A backend is already registered
    AlreadyInitialized,

    /// No backend has been registered yet
    NotInitialized,

    /// The backend could not allocate the primitive
    ResourceExhausted,

    /// Release by a thread that does not hold the lock
    NotHeld,

    /// Request would block the caller on a lock it already holds
    WouldDeadlock,

    /// Rendezvous wait with a guard from a different mutex
    WrongMutex,

    /// Cooperative primitive used outside its scheduler
    NotInScheduler,

    /// Invalid configuration
    Config(ConfigError),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::AlreadyInitialized => write!(f, "threading backend already registered"),
            SyncError::NotInitialized => write!(f, "no threading backend registered"),
            SyncError::ResourceExhausted => write!(f, "resource exhausted creating primitive"),
            SyncError::NotHeld => write!(f, "lock released by a thread that does not hold it"),
            SyncError::WouldDeadlock => write!(f, "lock already held by the calling thread"),
            SyncError::WrongMutex => write!(f, "rendezvous paired with a different mutex"),
            SyncError::NotInScheduler => write!(f, "called outside the cooperative scheduler"),
            SyncError::Config(e) => write!(f, "config error: {}", e),
        }
    }
}

impl std::error::Error for SyncError {}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field failed validation
    InvalidValue(&'static str),

    /// `SP_BACKEND` names no known backend
    UnknownBackend(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "invalid config: {}", msg),
            ConfigError::UnknownBackend(name) => write!(f, "unknown backend: {}", name),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for SyncError {
    fn from(e: ConfigError) -> Self {
        SyncError::Config(e)
    }
}
