//! Per-thread parking
//!
//! Each logical thread of the cooperative scheduler sleeps on its own
//! parker while another thread holds the baton. A parker carries a single
//! wake token: `unpark` before `park` is remembered, so a wake can never
//! slip in between "decide to sleep" and "sleep".

use std::time::Duration;

/// Platform-specific thread parking
pub trait Parker: Send + Sync {
    /// Sleep until the token is available or `timeout` passes
    ///
    /// Returns `true` if a token was consumed. Callers re-check their own
    /// condition afterwards regardless of the return value.
    fn park(&self, timeout: Option<Duration>) -> bool;

    /// Make the token available and wake the parked thread, if any
    fn unpark(&self);
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub(crate) mod futex_linux;
        pub use futex_linux::FutexParker as PlatformParker;
    } else {
        mod fallback;
        pub use fallback::FallbackParker as PlatformParker;
    }
}

/// Create a new platform-appropriate parker
pub fn new_parker() -> Box<dyn Parker> {
    Box::new(PlatformParker::new())
}
