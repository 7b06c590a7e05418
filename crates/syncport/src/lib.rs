//! # syncport - pluggable synchronization backends
//!
//! A protocol library written against `syncport` never names a concrete
//! threading system. It asks the registered [`Threading`] dispatch object
//! for mutexes, rendezvous (condition variables), reader/writer locks, the
//! per-thread error buffer and yielding I/O; the backend behind it decides
//! whether those suspend OS threads or cooperative logical threads.
//!
//! ## Quick Start
//!
//! ```ignore
//! use syncport::{init_from_env, threading};
//!
//! fn main() -> syncport::SyncResult<()> {
//!     // SP_BACKEND=native|coop picks the backend
//!     let t = init_from_env()?;
//!
//!     let table = t.rwlock(Vec::<u32>::new())?;
//!     table.write()?.push(7);
//!     assert_eq!(table.read()?.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Protocol library code                      │
//! │          Mutex<T>, Rendez, RwLock<T>, read/write            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Threading (registered once)                    │
//! │                 Arc<dyn Backend>                            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!    ┌─────────────────────┐       ┌─────────────────────┐
//!    │    NativeBackend    │       │     CoopBackend     │
//!    │  futex, poll(2)     │       │ coop scheduler,     │
//!    │                     │       │ stop / wakeup       │
//!    └─────────────────────┘       └─────────────────────┘
//!               │                             │
//!               └──────────────┬──────────────┘
//!                              ▼
//!            QueuedRwLock (mutex + two rendezvous)
//! ```

mod mutex;
mod rendez;
mod rwlock;

use std::fmt;
use std::io;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub use mutex::{Mutex, MutexGuard};
pub use rendez::Rendez;
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};

// Re-export core types
pub use syncport_core::{
    Backend,
    ConfigError,
    ErrBuf,
    Interest,
    PollFd,
    QueuedRwLock,
    RawMutex,
    RawRendez,
    RawRwLock,
    RwSnapshot,
    SyncError,
    SyncResult,
    ThreadId,
    ERRMAX,
};

// Re-export kprint macros for debug logging
pub use syncport_core::{kprint, kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use syncport_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled, set_time_enabled};

// Re-export env utilities
pub use syncport_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use syncport_runtime::{
    backend_from_config,
    coop,
    BackendKind,
    CoopBackend,
    CoopScheduler,
    JoinHandle,
    NativeBackend,
    SyncConfig,
};

/// The dispatch table: one backend behind typed constructors
///
/// Usually registered once with [`install`] and fetched with
/// [`threading`], but it can also be built and passed around directly.
#[derive(Clone)]
pub struct Threading {
    backend: Arc<dyn Backend>,
}

impl Threading {
    pub fn new<B: Backend>(backend: B) -> Self {
        Self { backend: Arc::new(backend) }
    }

    pub fn from_boxed(backend: Box<dyn Backend>) -> Self {
        Self { backend: Arc::from(backend) }
    }

    pub fn backend(&self) -> &dyn Backend {
        &*self.backend
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Identity of the calling thread under this backend
    pub fn current(&self) -> ThreadId {
        self.backend.current()
    }

    pub fn mutex<T>(&self, value: T) -> SyncResult<Mutex<T>> {
        Ok(Mutex::from_raw(self.backend.new_mutex()?, value))
    }

    pub fn rwlock<T>(&self, value: T) -> SyncResult<RwLock<T>> {
        Ok(RwLock::from_raw(self.backend.new_rwlock()?, value))
    }

    /// Rendezvous paired with `mutex`
    pub fn rendez<'m, T: ?Sized>(&self, mutex: &'m Mutex<T>) -> SyncResult<Rendez<'m, T>> {
        Ok(Rendez::from_raw(self.backend.new_rendez()?, mutex))
    }

    /// Error buffer of the calling thread
    pub fn errbuf(&self) -> ErrBuf {
        self.backend.errbuf()
    }

    /// Record a formatted message in the calling thread's error buffer
    ///
    /// ```ignore
    /// t.set_error(format_args!("bad fid {}", fid));
    /// ```
    pub fn set_error(&self, args: fmt::Arguments<'_>) {
        self.errbuf().set_fmt(args);
    }

    /// Last message recorded by the calling thread
    pub fn last_error(&self) -> String {
        self.errbuf().message()
    }

    pub fn read(&self, fd: i32, buf: &mut [u8]) -> io::Result<usize> {
        self.backend.read(fd, buf)
    }

    pub fn write(&self, fd: i32, buf: &[u8]) -> io::Result<usize> {
        self.backend.write(fd, buf)
    }

    pub fn select(&self, fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
        self.backend.select(fds, timeout)
    }
}

impl fmt::Debug for Threading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Threading").field("backend", &self.backend.name()).finish()
    }
}

static GLOBAL: OnceLock<Threading> = OnceLock::new();

/// Register the process-wide dispatch table
///
/// Succeeds once; later calls fail with `AlreadyInitialized` and leave the
/// first registration in place.
pub fn install(threading: Threading) -> SyncResult<&'static Threading> {
    let name = threading.backend_name();
    GLOBAL.set(threading).map_err(|rejected| {
        kwarn!(
            "syncport: {} backend not registered, {} already is",
            rejected.backend_name(),
            GLOBAL.get().map_or("another", |t| t.backend_name())
        );
        SyncError::AlreadyInitialized
    })?;
    kinfo!("syncport: registered {} backend", name);
    self::threading()
}

/// The registered dispatch table
pub fn threading() -> SyncResult<&'static Threading> {
    GLOBAL.get().ok_or(SyncError::NotInitialized)
}

/// Build the backend named by the environment and register it
///
/// See [`SyncConfig::from_env`] for the variables. An unknown `SP_BACKEND`
/// is reported as `SyncError::Config`.
pub fn init_from_env() -> SyncResult<&'static Threading> {
    let config = SyncConfig::try_from_env()?;
    if config.debug_logging {
        set_log_level(LogLevel::Debug);
    }
    kdebug!("syncport: backend {} from environment", config.backend);
    install(Threading::from_boxed(backend_from_config(&config)))
}
