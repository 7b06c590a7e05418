//! Ticket spinlock for short bookkeeping sections
//!
//! Guards scheduler and cooperative-primitive bookkeeping that is held for
//! a handful of instructions and never across a suspension point.
//! NOT a substitute for a backend mutex.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

/// Spins before handing the CPU back to the OS scheduler
const SPINS_BEFORE_YIELD: u32 = 64;

/// A FIFO ticket lock
///
/// Never suspend (stop, yield, wait on I/O) while holding the guard: under
/// the cooperative scheduler the next logical thread would spin forever.
pub struct SpinLock<T> {
    next_ticket: AtomicU32,
    now_serving: AtomicU32,
    value: UnsafeCell<T>,
}

// Safety: only the ticket being served touches `value`
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            value: UnsafeCell::new(value),
        }
    }

    /// Take a ticket and spin until it is served
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let mut spins = 0u32;
        while self.now_serving.load(Ordering::Acquire) != ticket {
            if spins < SPINS_BEFORE_YIELD {
                spins += 1;
                core::hint::spin_loop();
            } else {
                // holder may be preempted
                std::thread::yield_now();
            }
        }
        SpinLockGuard { owner: self }
    }

    /// Run `f` on the protected value
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct SpinLockGuard<'a, T> {
    owner: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.owner.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.owner.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.owner.now_serving.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_with_and_guard() {
        let queue = SpinLock::new(VecDeque::new());
        queue.with(|q| q.push_back(1u32));

        {
            let mut guard = queue.lock();
            guard.push_back(2);
        }

        assert_eq!(queue.with(|q| q.pop_front()), Some(1));
        assert_eq!(queue.with(std::mem::take), [2]);
        assert!(queue.into_inner().is_empty());
    }

    #[test]
    fn test_concurrent_bookkeeping() {
        let waiters = Arc::new(SpinLock::new(Vec::new()));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let waiters = Arc::clone(&waiters);
                thread::spawn(move || {
                    for i in 0..500 {
                        waiters.with(|w| w.push(t * 1000 + i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let all = Arc::try_unwrap(waiters).ok().unwrap().into_inner();
        assert_eq!(all.len(), 2000);
    }
}
