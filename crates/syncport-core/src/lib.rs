//! # syncport-core
//!
//! Core types and traits for syncport threading backends.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Concrete backends (native threads, the cooperative scheduler) live in
//! `syncport-runtime`.
//!
//! ## Modules
//!
//! - `id` - Logical thread identifier
//! - `error` - Error types
//! - `traits` - Raw primitive traits and the `Backend` dispatch table
//! - `rwlock` - Reader/writer lock built from a mutex and two rendezvous
//! - `errbuf` - Per-thread last-error buffer
//! - `spinlock` - Internal spinlock primitive
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod error;
pub mod traits;
pub mod rwlock;
pub mod errbuf;
pub mod spinlock;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::ThreadId;
pub use error::{SyncError, SyncResult, ConfigError};
pub use traits::{Backend, RawMutex, RawRendez, RawRwLock, PollFd, Interest};
pub use rwlock::{QueuedRwLock, RwSnapshot};
pub use errbuf::{ErrBuf, ERRMAX};
pub use spinlock::SpinLock;
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};
