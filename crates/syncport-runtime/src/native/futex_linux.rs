//! Futex mutex and rendezvous for Linux
//!
//! Mutex word:
//! - 0 = unlocked
//! - 1 = locked, no sleepers
//! - 2 = locked, sleepers possible
//!
//! Rendezvous word is a sequence counter bumped by every wake. A sleeper
//! samples it before releasing the mutex and FUTEX_WAITs on the sampled
//! value, so a wake issued after the release but before the sleep changes
//! the word and the wait returns at once.

use std::sync::atomic::{AtomicU32, Ordering};

use syncport_core::traits::{RawMutex, RawRendez};

use crate::parking::futex_linux::{futex_wait, futex_wake};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

pub struct FutexMutex {
    state: AtomicU32,
    spins: u32,
}

impl FutexMutex {
    pub fn new(spins: u32) -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            spins,
        }
    }

    #[cold]
    fn lock_contended(&self) {
        for _ in 0..self.spins {
            if self.state.load(Ordering::Relaxed) == UNLOCKED
                && self.state
                    .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            std::hint::spin_loop();
        }

        // Mark contended so the holder's unlock issues a wake.
        while self.state.swap(CONTENDED, Ordering::Acquire) != UNLOCKED {
            futex_wait(&self.state, CONTENDED, None);
        }
    }
}

impl RawMutex for FutexMutex {
    #[inline]
    fn lock(&self) {
        if self.state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.lock_contended();
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    fn unlock(&self) {
        if self.state.swap(UNLOCKED, Ordering::Release) == CONTENDED {
            futex_wake(&self.state, 1);
        }
    }
}

pub struct FutexRendez {
    seq: AtomicU32,
}

impl FutexRendez {
    pub fn new() -> Self {
        Self { seq: AtomicU32::new(0) }
    }
}

impl Default for FutexRendez {
    fn default() -> Self {
        Self::new()
    }
}

impl RawRendez for FutexRendez {
    fn sleep(&self, mutex: &dyn RawMutex) {
        let seen = self.seq.load(Ordering::Relaxed);
        mutex.unlock();
        futex_wait(&self.seq, seen, None);
        mutex.lock();
    }

    fn wake(&self) {
        self.seq.fetch_add(1, Ordering::Release);
        futex_wake(&self.seq, 1);
    }

    fn wake_all(&self) {
        self.seq.fetch_add(1, Ordering::Release);
        futex_wake(&self.seq, i32::MAX);
    }
}
