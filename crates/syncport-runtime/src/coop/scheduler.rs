//! Cooperative scheduler
//!
//! Every logical thread is backed by its own OS thread, but only the
//! holder of the baton executes. A thread gives the baton away only at
//! `stop`, `yield_now`, a descriptor wait, `join` or when it finishes, so
//! from the point of view of the code running on it the scheduler is
//! strictly non-preemptive.
//!
//! When nothing is runnable, the thread that is trying to give the baton
//! away keeps it and idles: it polls registered descriptors, or parks on
//! the idle parker until an external wakeup arrives.
//!
//! Status word layout: the low bits hold the run state, `NOTIFIED` records
//! a wakeup that arrived while the thread was not stopped so that the next
//! `stop` returns immediately.

use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use syncport_core::id::{IdAllocator, ThreadId};
use syncport_core::spinlock::SpinLock;
use syncport_core::traits::PollFd;
use syncport_core::{kdebug, kerror, ktrace, kwarn, SyncError, SyncResult};

use crate::config::SyncConfig;
use crate::io::poll_fds;
use crate::parking::{new_parker, Parker};
use crate::tls;

const RUNNING: u8 = 0;
const RUNNABLE: u8 = 1;
const STOPPED: u8 = 2;
const FINISHED: u8 = 3;
const STATE_MASK: u8 = 0x0f;
const NOTIFIED: u8 = 0x10;

/// Bookkeeping for one logical thread
pub(crate) struct Slot {
    id: ThreadId,
    status: AtomicU8,
    /// Set by whoever hands this thread the baton
    baton: AtomicBool,
    parker: Box<dyn Parker>,
    /// Threads blocked in `join` on this one
    joiners: SpinLock<Vec<ThreadId>>,
    /// Outcome of the pending descriptor wait
    io_result: SpinLock<Option<io::Result<Vec<PollFd>>>>,
}

impl Slot {
    fn new(id: ThreadId, state: u8) -> Self {
        Self {
            id,
            status: AtomicU8::new(state),
            baton: AtomicBool::new(false),
            parker: new_parker(),
            joiners: SpinLock::new(Vec::new()),
            io_result: SpinLock::new(None),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    fn state(&self) -> u8 {
        self.status.load(Ordering::Acquire) & STATE_MASK
    }

    /// Enter `state`, keeping a pending notification
    fn set_state(&self, state: u8) {
        let _ = self.status.fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
            Some((s & NOTIFIED) | state)
        });
    }

    fn wait_baton(&self) {
        while !self.baton.swap(false, Ordering::Acquire) {
            self.parker.park(None);
        }
    }
}

/// A thread suspended in `select`
struct IoWaiter {
    id: ThreadId,
    fds: Vec<PollFd>,
    deadline: Option<Instant>,
}

/// Scheduler state shared by every logical thread
pub(crate) struct Inner {
    idle_poll_interval: Duration,
    ids: IdAllocator,
    main_id: ThreadId,
    ready: SegQueue<ThreadId>,
    threads: SpinLock<HashMap<ThreadId, Arc<Slot>>>,
    io_waiters: SpinLock<Vec<IoWaiter>>,
    /// Logical threads that have not finished, the main one included
    live: AtomicUsize,
    idle: Box<dyn Parker>,
    idle_warned: AtomicBool,
}

impl Inner {
    fn slot(&self, id: ThreadId) -> Option<Arc<Slot>> {
        self.threads.lock().get(&id).cloned()
    }

    /// Make `id` runnable, or remember the wakeup if it is not stopped
    ///
    /// Returns false if no such thread exists (finished or never spawned).
    pub(crate) fn wakeup(&self, id: ThreadId) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        loop {
            let s = slot.status.load(Ordering::Acquire);
            let (next, enqueue) = match s & STATE_MASK {
                STOPPED => (RUNNABLE, true),
                FINISHED => return false,
                _ => (s | NOTIFIED, false),
            };
            if s == next {
                return true;
            }
            if slot
                .status
                .compare_exchange(s, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if enqueue {
                    ktrace!("coop: wake {}", id);
                    self.ready.push(id);
                    self.idle.unpark();
                }
                return true;
            }
        }
    }

    /// Suspend `me` until a wakeup arrives
    ///
    /// A wakeup remembered while `me` was running is consumed instead.
    pub(crate) fn stop(&self, me: &Slot) {
        loop {
            let s = me.status.load(Ordering::Acquire);
            let next = if s & NOTIFIED != 0 { s & !NOTIFIED } else { STOPPED };
            if me
                .status
                .compare_exchange(s, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if next != STOPPED {
                    return;
                }
                break;
            }
        }
        self.schedule_away(me, false);
    }

    /// Let every other runnable thread go first
    pub(crate) fn yield_now(&self, me: &Slot) {
        me.set_state(RUNNABLE);
        self.ready.push(me.id);
        self.schedule_away(me, false);
    }

    /// Give the baton to the next runnable thread
    ///
    /// Returns once `me` holds the baton again, unless it is exiting.
    fn schedule_away(&self, me: &Slot, exiting: bool) {
        let next = self.find_next();
        if next.id == me.id {
            me.set_state(RUNNING);
            return;
        }
        ktrace!("coop: switch {} -> {}", me.id, next.id);
        next.set_state(RUNNING);
        next.baton.store(true, Ordering::Release);
        next.parker.unpark();
        if !exiting {
            me.wait_baton();
        }
    }

    fn find_next(&self) -> Arc<Slot> {
        loop {
            self.poll_io(Duration::ZERO);
            while let Some(id) = self.ready.pop() {
                match self.slot(id) {
                    Some(slot) if slot.state() == RUNNABLE => return slot,
                    _ => ktrace!("coop: dropping stale ready entry {}", id),
                }
            }
            self.idle();
        }
    }

    fn idle(&self) {
        if self.poll_io(self.idle_poll_interval) {
            return;
        }
        if self.io_waiters.lock().is_empty() {
            if !self.idle_warned.swap(true, Ordering::Relaxed) {
                kwarn!("coop: no runnable thread and no descriptor to wait on; waiting for an external wakeup (possible deadlock)");
            }
            self.idle.park(Some(self.idle_poll_interval));
        }
    }

    /// Poll every registered descriptor wait once
    ///
    /// Waiters that became ready or timed out get their result and are
    /// woken. Returns true if any waiter was woken.
    fn poll_io(&self, max_wait: Duration) -> bool {
        let waiters = self.io_waiters.with(std::mem::take);
        if waiters.is_empty() {
            return false;
        }

        let now = Instant::now();
        let wait = waiters
            .iter()
            .filter_map(|w| w.deadline)
            .map(|d| d.saturating_duration_since(now))
            .fold(max_wait, Duration::min);
        let mut all: Vec<PollFd> = waiters.iter().flat_map(|w| w.fds.iter().copied()).collect();
        let outcome = poll_fds(&mut all, Some(wait));
        let now = Instant::now();

        let mut woken = Vec::new();
        let mut pending = Vec::new();
        let mut offset = 0;
        for mut waiter in waiters {
            let seg = &all[offset..offset + waiter.fds.len()];
            offset += waiter.fds.len();
            let result = match &outcome {
                Err(e) => Some(Err(clone_error(e))),
                Ok(_) => {
                    let expired = waiter.deadline.is_some_and(|d| d <= now);
                    if expired || seg.iter().any(PollFd::is_ready) {
                        waiter.fds.copy_from_slice(seg);
                        Some(Ok(std::mem::take(&mut waiter.fds)))
                    } else {
                        None
                    }
                }
            };
            match result {
                Some(result) => {
                    if let Some(slot) = self.slot(waiter.id) {
                        *slot.io_result.lock() = Some(result);
                    }
                    woken.push(waiter.id);
                }
                None => pending.push(waiter),
            }
        }
        self.io_waiters.with(|w| w.extend(pending));

        for id in &woken {
            self.wakeup(*id);
        }
        !woken.is_empty()
    }

    /// Wait for any entry of `fds` on behalf of `me`
    pub(crate) fn select(&self, me: &Slot, fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
        let n = poll_fds(fds, Some(Duration::ZERO))?;
        if n > 0 || timeout == Some(Duration::ZERO) {
            return Ok(n);
        }

        *me.io_result.lock() = None;
        self.io_waiters.lock().push(IoWaiter {
            id: me.id,
            fds: fds.to_vec(),
            deadline: timeout.map(|t| Instant::now() + t),
        });
        let result = loop {
            if let Some(result) = me.io_result.lock().take() {
                break result;
            }
            self.stop(me);
        };

        let ready = result?;
        fds.copy_from_slice(&ready);
        Ok(ready.iter().filter(|p| p.is_ready()).count())
    }

    fn spawn<F, T>(self: &Arc<Self>, f: F) -> SyncResult<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let id = self.ids.next();
        let slot = Arc::new(Slot::new(id, RUNNABLE));
        let result: Arc<SpinLock<Option<thread::Result<T>>>> = Arc::new(SpinLock::new(None));

        self.threads.lock().insert(id, Arc::clone(&slot));
        self.live.fetch_add(1, Ordering::AcqRel);

        let inner = Arc::clone(self);
        let out = Arc::clone(&result);
        let spawned = thread::Builder::new()
            .name(format!("coop-{}", id))
            .spawn(move || {
                slot.wait_baton();
                tls::set_coop(Arc::clone(&inner), Arc::clone(&slot));
                let value = panic::catch_unwind(AssertUnwindSafe(f));
                if value.is_err() {
                    kdebug!("coop: thread {} panicked", slot.id);
                }
                *out.lock() = Some(value);
                tls::clear_coop();
                inner.finish(&slot);
            });

        if let Err(e) = spawned {
            kerror!("coop: cannot start thread {}: {}", id, e);
            self.threads.lock().remove(&id);
            self.live.fetch_sub(1, Ordering::AcqRel);
            return Err(SyncError::ResourceExhausted);
        }

        ktrace!("coop: spawned {}", id);
        self.ready.push(id);
        Ok(JoinHandle { id, result })
    }

    fn finish(&self, me: &Slot) {
        me.status.store(FINISHED, Ordering::Release);
        let joiners = std::mem::take(&mut *me.joiners.lock());
        self.threads.lock().remove(&me.id);
        for id in joiners {
            self.wakeup(id);
        }
        if self.live.fetch_sub(1, Ordering::AcqRel) == 2 {
            // Only the main thread is left; let `run` return.
            self.wakeup(self.main_id);
        }
        self.schedule_away(me, true);
    }
}

fn clone_error(e: &io::Error) -> io::Error {
    match e.raw_os_error() {
        Some(code) => io::Error::from_raw_os_error(code),
        None => io::Error::new(e.kind(), e.to_string()),
    }
}

/// Handle to a spawned logical thread
pub struct JoinHandle<T> {
    id: ThreadId,
    result: Arc<SpinLock<Option<thread::Result<T>>>>,
}

impl<T> JoinHandle<T> {
    /// Identity of the spawned thread
    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.result.lock().is_some()
    }

    /// Suspend the caller until the thread finishes
    ///
    /// Returns `Err` with the panic payload if the thread panicked.
    ///
    /// # Panics
    ///
    /// Panics if the thread has not finished and the caller is not a
    /// logical thread of the scheduler.
    pub fn join(self) -> thread::Result<T> {
        loop {
            if let Some(result) = self.result.lock().take() {
                return result;
            }
            let Some((inner, me)) = tls::coop_context() else {
                panic!("JoinHandle::join on an unfinished thread outside the cooperative scheduler");
            };
            // The target runs only after we stop, so it cannot finish in between.
            if let Some(target) = inner.slot(self.id) {
                target.joiners.lock().push(me.id);
                inner.stop(&me);
            }
        }
    }
}

/// Wakes logical threads from outside the scheduler
///
/// Safe to use from any OS thread, e.g. a signal or I/O helper thread.
#[derive(Clone)]
pub struct CoopHandle {
    inner: Arc<Inner>,
}

impl CoopHandle {
    /// Make `id` runnable; see [`crate::coop::wakeup`]
    pub fn wakeup(&self, id: ThreadId) -> bool {
        self.inner.wakeup(id)
    }
}

/// Cooperative scheduler hosting logical threads
///
/// ```ignore
/// let sched = CoopScheduler::new(&SyncConfig::from_env());
/// let total = sched.run(|| {
///     let h = coop::spawn(|| 21).unwrap();
///     h.join().unwrap() * 2
/// });
/// ```
pub struct CoopScheduler {
    inner: Arc<Inner>,
}

impl CoopScheduler {
    pub fn new(config: &SyncConfig) -> Self {
        let ids = IdAllocator::starting_at(1);
        let main_id = ids.next();
        Self {
            inner: Arc::new(Inner {
                idle_poll_interval: config.idle_poll_interval,
                ids,
                main_id,
                ready: SegQueue::new(),
                threads: SpinLock::new(HashMap::new()),
                io_waiters: SpinLock::new(Vec::new()),
                live: AtomicUsize::new(0),
                idle: new_parker(),
                idle_warned: AtomicBool::new(false),
            }),
        }
    }

    /// Handle for waking threads of this scheduler from other OS threads
    pub fn handle(&self) -> CoopHandle {
        CoopHandle { inner: Arc::clone(&self.inner) }
    }

    /// Identity the calling thread will have inside `run`
    pub fn main_id(&self) -> ThreadId {
        self.inner.main_id
    }

    /// Run `f` as the main logical thread
    ///
    /// Returns after `f` and every thread spawned under it have finished.
    /// A panic in `f` is re-raised once the other threads are done.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a cooperative thread.
    pub fn run<F, T>(self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        assert!(!tls::is_in_coop(), "CoopScheduler::run called from inside a cooperative thread");
        let inner = self.inner;
        let main = Arc::new(Slot::new(inner.main_id, RUNNING));
        inner.threads.lock().insert(main.id, Arc::clone(&main));
        inner.live.fetch_add(1, Ordering::AcqRel);
        tls::set_coop(Arc::clone(&inner), Arc::clone(&main));
        kdebug!("coop: scheduler started, main thread {}", main.id);

        let value = panic::catch_unwind(AssertUnwindSafe(f));
        while inner.live.load(Ordering::Acquire) > 1 {
            inner.stop(&main);
        }

        main.status.store(FINISHED, Ordering::Release);
        inner.threads.lock().remove(&main.id);
        inner.live.fetch_sub(1, Ordering::AcqRel);
        tls::clear_coop();
        kdebug!("coop: scheduler finished");

        match value {
            Ok(v) => v,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

impl Default for CoopScheduler {
    fn default() -> Self {
        Self::new(&SyncConfig::from_env())
    }
}

/// Spawn on the scheduler of the calling logical thread
pub(crate) fn spawn_current<F, T>(f: F) -> SyncResult<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (inner, _) = tls::coop_context().ok_or(SyncError::NotInScheduler)?;
    inner.spawn(f)
}
