//! Portable mutex and rendezvous on std::sync
//!
//! Used on platforms without futex support.

use std::sync::{Condvar, Mutex, PoisonError};

use syncport_core::traits::{RawMutex, RawRendez};

pub struct FallbackMutex {
    locked: Mutex<bool>,
    released: Condvar,
}

impl FallbackMutex {
    pub fn new(_spins: u32) -> Self {
        Self {
            locked: Mutex::new(false),
            released: Condvar::new(),
        }
    }
}

impl RawMutex for FallbackMutex {
    fn lock(&self) {
        let mut locked = self.locked.lock().unwrap_or_else(PoisonError::into_inner);
        while *locked {
            locked = self.released.wait(locked).unwrap_or_else(PoisonError::into_inner);
        }
        *locked = true;
    }

    fn try_lock(&self) -> bool {
        let mut locked = self.locked.lock().unwrap_or_else(PoisonError::into_inner);
        !std::mem::replace(&mut *locked, true)
    }

    fn unlock(&self) {
        *self.locked.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.released.notify_one();
    }
}

/// Sequence-counter rendezvous; the counter's mutex is taken before the
/// caller's mutex is released, which closes the lost-wakeup window.
pub struct FallbackRendez {
    seq: Mutex<u64>,
    changed: Condvar,
}

impl FallbackRendez {
    pub fn new() -> Self {
        Self {
            seq: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    fn bump(&self) {
        let mut seq = self.seq.lock().unwrap_or_else(PoisonError::into_inner);
        *seq = seq.wrapping_add(1);
    }
}

impl Default for FallbackRendez {
    fn default() -> Self {
        Self::new()
    }
}

impl RawRendez for FallbackRendez {
    fn sleep(&self, mutex: &dyn RawMutex) {
        let mut seq = self.seq.lock().unwrap_or_else(PoisonError::into_inner);
        let seen = *seq;
        mutex.unlock();
        while *seq == seen {
            seq = self.changed.wait(seq).unwrap_or_else(PoisonError::into_inner);
        }
        drop(seq);
        mutex.lock();
    }

    fn wake(&self) {
        self.bump();
        self.changed.notify_one();
    }

    fn wake_all(&self) {
        self.bump();
        self.changed.notify_all();
    }
}
