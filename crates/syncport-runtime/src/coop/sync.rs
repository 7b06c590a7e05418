//! Mutex and rendezvous for cooperative logical threads
//!
//! Both keep a FIFO of waiting thread ids and suspend with `stop`. Since
//! only one logical thread runs at a time, releasing the mutex and stopping
//! inside `CoopRendez::sleep` cannot be separated by another thread's wake.

use std::collections::VecDeque;

use syncport_core::id::ThreadId;
use syncport_core::spinlock::SpinLock;
use syncport_core::traits::{RawMutex, RawRendez};
use syncport_core::{kerror, ktrace};

use super::context;

struct MutexState {
    owner: Option<ThreadId>,
    waiting: VecDeque<ThreadId>,
}

/// Mutex that suspends the logical thread instead of the OS thread
///
/// Release hands ownership directly to the longest waiter.
///
/// # Panics
///
/// Every operation panics outside the cooperative scheduler, and `lock`
/// panics if the caller already holds the mutex.
pub struct CoopMutex {
    state: SpinLock<MutexState>,
}

impl CoopMutex {
    pub fn new() -> Self {
        Self {
            state: SpinLock::new(MutexState { owner: None, waiting: VecDeque::new() }),
        }
    }

    /// Current holder, if any
    pub fn owner(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }
}

impl Default for CoopMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl RawMutex for CoopMutex {
    fn lock(&self) {
        let (inner, me) = context();
        let id = me.id();
        {
            let mut state = self.state.lock();
            assert!(state.owner != Some(id), "CoopMutex relocked by its holder {}", id);
            if state.owner.is_none() {
                state.owner = Some(id);
                return;
            }
            state.waiting.push_back(id);
        }
        loop {
            inner.stop(&me);
            if self.state.lock().owner == Some(id) {
                return;
            }
        }
    }

    fn try_lock(&self) -> bool {
        let (_, me) = context();
        let mut state = self.state.lock();
        if state.owner.is_none() {
            state.owner = Some(me.id());
            true
        } else {
            false
        }
    }

    fn unlock(&self) {
        let (inner, me) = context();
        let next = {
            let mut state = self.state.lock();
            if state.owner != Some(me.id()) {
                kerror!("coop: mutex unlocked by {} but held by {:?}", me.id(), state.owner);
                return;
            }
            state.owner = state.waiting.pop_front();
            state.owner
        };
        if let Some(next) = next {
            ktrace!("coop: mutex handed {} -> {}", me.id(), next);
            inner.wakeup(next);
        }
    }
}

/// Rendezvous for cooperative logical threads
pub struct CoopRendez {
    sleepers: SpinLock<VecDeque<ThreadId>>,
}

impl CoopRendez {
    pub fn new() -> Self {
        Self { sleepers: SpinLock::new(VecDeque::new()) }
    }

    /// Number of threads currently asleep here
    pub fn sleepers(&self) -> usize {
        self.sleepers.lock().len()
    }
}

impl Default for CoopRendez {
    fn default() -> Self {
        Self::new()
    }
}

impl RawRendez for CoopRendez {
    fn sleep(&self, mutex: &dyn RawMutex) {
        let (inner, me) = context();
        self.sleepers.lock().push_back(me.id());
        mutex.unlock();
        inner.stop(&me);
        // Woken by something other than wake(): leave the queue.
        self.sleepers.lock().retain(|&id| id != me.id());
        mutex.lock();
    }

    fn wake(&self) {
        let (inner, _) = context();
        let next = self.sleepers.lock().pop_front();
        if let Some(id) = next {
            inner.wakeup(id);
        }
    }

    fn wake_all(&self) {
        let (inner, _) = context();
        let all = self.sleepers.with(std::mem::take);
        for id in all {
            inner.wakeup(id);
        }
    }
}
