//! Library defaults for `SyncConfig`

use crate::config::BackendKind;

pub const BACKEND: BackendKind = BackendKind::Native;

/// Busy-wait attempts before a contended native mutex sleeps in the kernel
pub const MUTEX_SPINS: u32 = 100;

/// Upper bound on one idle poll of the cooperative scheduler
pub const IDLE_POLL_MS: u64 = 10;

/// On when built with the `debug-logging` feature
pub const DEBUG_LOGGING: bool = cfg!(feature = "debug-logging");
