//! Linux futex-based parking
//!
//! Futex word semantics:
//! - 0 = no token
//! - 1 = token available
//!
//! `park` consumes the token if present, otherwise FUTEX_WAITs on 0.
//! `unpark` publishes the token and FUTEX_WAKEs the sleeper.
//!
//! The raw `futex_wait` / `futex_wake` helpers are shared with the native
//! mutex and rendezvous.

use super::Parker;
use nix::errno::Errno;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// FUTEX_WAIT while `*word == expected`
///
/// Returns `false` on timeout; `true` on wake, value mismatch or signal
/// (all of which mean "re-check").
pub(crate) fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> bool {
    let timespec = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs().min(i64::MAX as u64) as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    });
    let timespec_ptr = match &timespec {
        Some(ts) => ts as *const libc::timespec,
        None => std::ptr::null(),
    };

    let result = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            timespec_ptr,
            std::ptr::null::<u32>(),
            0u32,
        )
    };

    result == 0 || Errno::last() != Errno::ETIMEDOUT
}

/// FUTEX_WAKE up to `count` waiters
pub(crate) fn futex_wake(word: &AtomicU32, count: i32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            count,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}

/// Linux futex-based parker
pub struct FutexParker {
    /// Futex word: 0 = empty, 1 = token
    futex: AtomicU32,
}

impl FutexParker {
    pub fn new() -> Self {
        Self { futex: AtomicU32::new(0) }
    }
}

impl Default for FutexParker {
    fn default() -> Self {
        Self::new()
    }
}

impl Parker for FutexParker {
    fn park(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.futex.swap(0, Ordering::Acquire) == 1 {
                return true;
            }
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return false;
                    }
                    Some(d - now)
                }
                None => None,
            };
            if !futex_wait(&self.futex, 0, remaining) {
                return self.futex.swap(0, Ordering::Acquire) == 1;
            }
        }
    }

    fn unpark(&self) {
        if self.futex.swap(1, Ordering::Release) == 0 {
            futex_wake(&self.futex, 1);
        }
    }
}
