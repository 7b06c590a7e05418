//! # syncport-runtime
//!
//! Platform-specific backends for syncport.
//!
//! This crate provides:
//! - `NativeBackend`: preemptive OS threads, futex primitives on Linux
//! - `CoopBackend`: logical threads on the cooperative scheduler in `coop`
//! - Yielding I/O over `poll(2)`
//! - Per-thread parking used by the cooperative scheduler
//! - Configuration with environment overrides

pub mod config;
pub mod tls;
pub mod parking;
pub mod io;
pub mod native;
pub mod coop;

// Re-exports
pub use config::{BackendKind, SyncConfig};
pub use native::NativeBackend;
pub use coop::{CoopBackend, CoopHandle, CoopScheduler, JoinHandle};
pub use parking::{Parker, new_parker};

cfg_if::cfg_if! {
    if #[cfg(not(unix))] {
        compile_error!("syncport-runtime requires a unix platform (poll(2) and file descriptors)");
    }
}

/// Build the backend selected by `config.backend`
pub fn backend_from_config(config: &SyncConfig) -> Box<dyn syncport_core::Backend> {
    match config.backend {
        BackendKind::Native => Box::new(NativeBackend::new(config.clone())),
        BackendKind::Coop => Box::new(CoopBackend::new()),
    }
}
