//! Reader/writer lock with explicit wait-queues
//!
//! Built from one backend mutex (the internal critical section) and two
//! rendezvous, one per waiter kind. Used by every backend whose host has no
//! native reader/writer lock.
//!
//! State, all mutated only with the critical section held:
//!
//! - `writer`: the write holder, if any
//! - `readers`: read holders (a thread may appear more than once)
//! - `read_queue` / `write_queue`: blocked requests in arrival order
//!
//! Release hands the lock over directly: a queued writer is made the
//! holder before it is woken, and a batch of queued readers is moved into
//! `readers` before they are woken. A woken thread therefore only checks
//! whether it was granted; it never races new arrivals for the lock.
//!
//! # Fairness
//!
//! Readers are preferred. A new reader joins the current readers even while
//! a writer is queued, so a continuous stream of readers can delay a writer
//! indefinitely. Queued readers are released as one batch.

use core::cell::UnsafeCell;
use std::collections::VecDeque;

use crate::error::{SyncError, SyncResult};
use crate::id::ThreadId;
use crate::traits::{RawMutex, RawRendez, RawRwLock};
use crate::{kerror, ktrace};

struct RwState {
    writer: Option<ThreadId>,
    readers: Vec<ThreadId>,
    read_queue: VecDeque<ThreadId>,
    write_queue: VecDeque<ThreadId>,
}

/// Who a release decided to wake
enum Handoff {
    Nobody,
    Writer(ThreadId),
    Readers(usize),
}

impl RwState {
    const fn new() -> Self {
        Self {
            writer: None,
            readers: Vec::new(),
            read_queue: VecDeque::new(),
            write_queue: VecDeque::new(),
        }
    }

    fn remove_reader(&mut self, id: ThreadId) -> bool {
        match self.readers.iter().position(|&r| r == id) {
            Some(pos) => {
                self.readers.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    fn dequeue(queue: &mut VecDeque<ThreadId>, id: ThreadId) -> bool {
        match queue.iter().position(|&q| q == id) {
            Some(pos) => {
                queue.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Pick the next holder after a release
    fn handoff(&mut self) -> Handoff {
        if self.writer.is_some() {
            return Handoff::Nobody;
        }
        if !self.write_queue.is_empty() && self.readers.is_empty() {
            if let Some(next) = self.write_queue.pop_front() {
                self.writer = Some(next);
                return Handoff::Writer(next);
            }
        }
        if !self.read_queue.is_empty() {
            let n = self.read_queue.len();
            self.readers.extend(self.read_queue.drain(..));
            return Handoff::Readers(n);
        }
        Handoff::Nobody
    }

    fn snapshot(&self) -> RwSnapshot {
        RwSnapshot {
            writer: self.writer,
            readers: self.readers.clone(),
            queued_readers: self.read_queue.iter().copied().collect(),
            queued_writers: self.write_queue.iter().copied().collect(),
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(debug_assertions, feature = "debug-assertions"))] {
        fn check_invariants(st: &RwState) {
            assert!(
                st.writer.is_none() || st.readers.is_empty(),
                "rwlock: writer {:?} coexists with readers {:?}", st.writer, st.readers
            );
            for r in &st.readers {
                assert!(
                    !st.read_queue.contains(r) && !st.write_queue.contains(r),
                    "rwlock: reader {} is also queued", r
                );
            }
        }
    } else {
        #[inline(always)]
        fn check_invariants(_st: &RwState) {}
    }
}

/// Point-in-time copy of a lock's state, for diagnostics and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RwSnapshot {
    pub writer: Option<ThreadId>,
    pub readers: Vec<ThreadId>,
    pub queued_readers: Vec<ThreadId>,
    pub queued_writers: Vec<ThreadId>,
}

impl RwSnapshot {
    /// Mutual exclusion and "holders are never queued"
    pub fn is_consistent(&self) -> bool {
        let exclusive = self.writer.is_none() || self.readers.is_empty();
        let disjoint = self.readers.iter().all(|r| {
            !self.queued_readers.contains(r) && !self.queued_writers.contains(r)
        });
        exclusive && disjoint
    }

    pub fn is_free(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }
}

/// Reader/writer lock composed from backend primitives
///
/// # Example
///
/// ```ignore
/// let lock = QueuedRwLock::new(
///     backend.new_mutex()?,
///     backend.new_rendez()?,
///     backend.new_rendez()?,
///     current_thread_id,
/// );
/// lock.read_lock()?;
/// lock.read_unlock()?;
/// ```
pub struct QueuedRwLock {
    mutex: Box<dyn RawMutex>,
    read_wait: Box<dyn RawRendez>,
    write_wait: Box<dyn RawRendez>,
    state: UnsafeCell<RwState>,
    current: fn() -> ThreadId,
}

// Safety: `state` is only touched while `mutex` is held
unsafe impl Send for QueuedRwLock {}
unsafe impl Sync for QueuedRwLock {}

/// Held critical section; unlocks on drop so early returns and panics
/// cannot leave the internal mutex locked.
struct Critical<'a> {
    lock: &'a QueuedRwLock,
}

impl<'a> Critical<'a> {
    #[inline]
    fn state(&mut self) -> &mut RwState {
        // Safety: we hold the internal mutex
        unsafe { &mut *self.lock.state.get() }
    }

    /// Release the critical section and suspend on `rendez`
    #[inline]
    fn sleep_on(&mut self, rendez: &dyn RawRendez) {
        rendez.sleep(&*self.lock.mutex);
    }
}

impl Drop for Critical<'_> {
    fn drop(&mut self) {
        check_invariants(unsafe { &*self.lock.state.get() });
        self.lock.mutex.unlock();
    }
}

impl QueuedRwLock {
    /// Assemble a lock from a backend's primitives
    ///
    /// `current` must return the identity of the calling logical thread
    /// under the same backend that produced the primitives.
    pub fn new(
        mutex: Box<dyn RawMutex>,
        read_wait: Box<dyn RawRendez>,
        write_wait: Box<dyn RawRendez>,
        current: fn() -> ThreadId,
    ) -> Self {
        Self {
            mutex,
            read_wait,
            write_wait,
            state: UnsafeCell::new(RwState::new()),
            current,
        }
    }

    #[inline]
    fn enter(&self) -> Critical<'_> {
        self.mutex.lock();
        Critical { lock: self }
    }

    fn wake(&self, handoff: Handoff) {
        match handoff {
            Handoff::Nobody => {}
            Handoff::Writer(id) => {
                ktrace!("rwlock: handing write hold to {}", id);
                // Any queued writer may be sleeping; only `id` finds itself granted.
                self.write_wait.wake_all();
            }
            Handoff::Readers(n) => {
                ktrace!("rwlock: waking batch of {} readers", n);
                self.read_wait.wake_all();
            }
        }
    }

    /// Copy the current state
    pub fn snapshot(&self) -> RwSnapshot {
        let mut cs = self.enter();
        cs.state().snapshot()
    }

    /// Release whichever hold the caller has
    pub fn unlock(&self) -> SyncResult<()> {
        let me = (self.current)();
        let is_writer = self.enter().state().writer == Some(me);
        if is_writer {
            self.write_unlock()
        } else {
            self.read_unlock()
        }
    }
}

impl RawRwLock for QueuedRwLock {
    fn read_lock(&self) -> SyncResult<()> {
        let me = (self.current)();
        let mut cs = self.enter();
        let st = cs.state();
        if st.writer == Some(me) {
            kerror!("rwlock: read request from write holder {}", me);
            return Err(SyncError::WouldDeadlock);
        }
        if st.writer.is_none() {
            st.readers.push(me);
            return Ok(());
        }

        st.read_queue.push_back(me);
        ktrace!("rwlock: reader {} queued behind writer {:?}", me, st.writer);
        loop {
            cs.sleep_on(&*self.read_wait);
            let st = cs.state();
            if !st.read_queue.contains(&me) {
                // Moved into `readers` by a release
                return Ok(());
            }
            if st.writer.is_none() {
                RwState::dequeue(&mut st.read_queue, me);
                st.readers.push(me);
                return Ok(());
            }
        }
    }

    fn try_read_lock(&self) -> bool {
        let me = (self.current)();
        let mut cs = self.enter();
        let st = cs.state();
        if st.writer.is_none() {
            st.readers.push(me);
            true
        } else {
            false
        }
    }

    fn write_lock(&self) -> SyncResult<()> {
        let me = (self.current)();
        let mut cs = self.enter();
        let st = cs.state();
        if st.writer == Some(me) || st.readers.contains(&me) {
            kerror!("rwlock: write request from current holder {}", me);
            return Err(SyncError::WouldDeadlock);
        }
        if st.writer.is_none() && st.readers.is_empty() {
            st.writer = Some(me);
            return Ok(());
        }

        st.write_queue.push_back(me);
        ktrace!("rwlock: writer {} queued", me);
        loop {
            cs.sleep_on(&*self.write_wait);
            let st = cs.state();
            if st.writer == Some(me) {
                return Ok(());
            }
            if st.writer.is_none() && st.readers.is_empty() {
                RwState::dequeue(&mut st.write_queue, me);
                st.writer = Some(me);
                return Ok(());
            }
        }
    }

    fn try_write_lock(&self) -> bool {
        let me = (self.current)();
        let mut cs = self.enter();
        let st = cs.state();
        if st.writer.is_none() && st.readers.is_empty() {
            st.writer = Some(me);
            true
        } else {
            false
        }
    }

    fn read_unlock(&self) -> SyncResult<()> {
        let me = (self.current)();
        let mut cs = self.enter();
        let st = cs.state();
        if !st.remove_reader(me) {
            kerror!("rwlock: read_unlock by {} which holds no read lock", me);
            return Err(SyncError::NotHeld);
        }
        let handoff = st.handoff();
        self.wake(handoff);
        Ok(())
    }

    fn write_unlock(&self) -> SyncResult<()> {
        let me = (self.current)();
        let mut cs = self.enter();
        let st = cs.state();
        if st.writer != Some(me) {
            kerror!("rwlock: write_unlock by {} but writer is {:?}", me, st.writer);
            return Err(SyncError::NotHeld);
        }
        st.writer = None;
        let handoff = st.handoff();
        self.wake(handoff);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdAllocator;
    use crossbeam_queue::SegQueue;
    use std::cell::Cell;
    use std::sync::{Arc, Barrier, Condvar, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    // Minimal std-backed primitives so the algorithm can be tested without
    // a runtime.
    struct TestMutex {
        locked: Mutex<bool>,
        cv: Condvar,
    }

    impl RawMutex for TestMutex {
        fn lock(&self) {
            let mut g = self.locked.lock().unwrap();
            while *g {
                g = self.cv.wait(g).unwrap();
            }
            *g = true;
        }

        fn try_lock(&self) -> bool {
            let mut g = self.locked.lock().unwrap();
            !std::mem::replace(&mut *g, true)
        }

        fn unlock(&self) {
            *self.locked.lock().unwrap() = false;
            self.cv.notify_one();
        }
    }

    struct TestRendez {
        seq: Mutex<u64>,
        cv: Condvar,
    }

    impl RawRendez for TestRendez {
        fn sleep(&self, mutex: &dyn RawMutex) {
            let mut g = self.seq.lock().unwrap();
            let start = *g;
            mutex.unlock();
            while *g == start {
                g = self.cv.wait(g).unwrap();
            }
            drop(g);
            mutex.lock();
        }

        fn wake(&self) {
            *self.seq.lock().unwrap() += 1;
            self.cv.notify_one();
        }

        fn wake_all(&self) {
            *self.seq.lock().unwrap() += 1;
            self.cv.notify_all();
        }
    }

    static IDS: IdAllocator = IdAllocator::starting_at(1);

    thread_local! {
        static ME: Cell<ThreadId> = Cell::new(IDS.next());
    }

    fn current() -> ThreadId {
        ME.with(|c| c.get())
    }

    /// Pretend to be another logical thread (non-blocking ops only)
    fn become_thread(raw: u64) {
        ME.with(|c| c.set(ThreadId::new(raw)));
    }

    fn new_lock() -> Arc<QueuedRwLock> {
        let mutex = || Box::new(TestMutex { locked: Mutex::new(false), cv: Condvar::new() });
        let rendez = || Box::new(TestRendez { seq: Mutex::new(0), cv: Condvar::new() });
        Arc::new(QueuedRwLock::new(mutex(), rendez(), rendez(), current))
    }

    fn wait_until(lock: &QueuedRwLock, pred: impl Fn(&RwSnapshot) -> bool) -> RwSnapshot {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let snap = lock.snapshot();
            if pred(&snap) {
                return snap;
            }
            assert!(Instant::now() < deadline, "timed out waiting on {:?}", snap);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_two_readers_share() {
        let lock = new_lock();
        let barrier = Arc::new(Barrier::new(3));
        let mut handles = vec![];

        for _ in 0..2 {
            let lock = Arc::clone(&lock);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                lock.read_lock().unwrap();
                barrier.wait(); // both hold
                barrier.wait(); // main has checked
                lock.read_unlock().unwrap();
            }));
        }

        barrier.wait();
        let snap = lock.snapshot();
        assert_eq!(snap.readers.len(), 2);
        assert!(snap.writer.is_none());
        assert!(!lock.try_write_lock());
        barrier.wait();

        for h in handles {
            h.join().unwrap();
        }
        assert!(lock.try_write_lock());
        lock.write_unlock().unwrap();
    }

    #[test]
    fn test_readers_woken_as_batch() {
        let lock = new_lock();
        lock.write_lock().unwrap();

        let barrier = Arc::new(Barrier::new(3));
        let mut handles = vec![];
        for _ in 0..2 {
            let lock = Arc::clone(&lock);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                lock.read_lock().unwrap();
                barrier.wait();
                lock.read_unlock().unwrap();
            }));
        }

        wait_until(&lock, |s| s.queued_readers.len() == 2);
        lock.write_unlock().unwrap();

        // Both are granted by the single release, before either runs.
        let snap = lock.snapshot();
        assert_eq!(snap.readers.len(), 2);
        assert!(snap.queued_readers.is_empty());

        barrier.wait();
        for h in handles {
            h.join().unwrap();
        }
        assert!(lock.snapshot().is_free());
    }

    #[test]
    fn test_writer_waits_for_reader() {
        let lock = new_lock();
        lock.read_lock().unwrap();

        let acquired = Arc::new(Mutex::new(None));
        let writer = {
            let lock = Arc::clone(&lock);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                lock.write_lock().unwrap();
                *acquired.lock().unwrap() = Some(current());
                lock.write_unlock().unwrap();
            })
        };

        let snap = wait_until(&lock, |s| s.queued_writers.len() == 1);
        let writer_id = snap.queued_writers[0];
        assert!(acquired.lock().unwrap().is_none());

        lock.read_unlock().unwrap();
        writer.join().unwrap();
        assert_eq!(*acquired.lock().unwrap(), Some(writer_id));
    }

    #[test]
    fn test_try_write_fails_under_reader() {
        let lock = new_lock();
        become_thread(500);
        lock.read_lock().unwrap();
        let before = lock.snapshot();

        become_thread(501);
        assert!(!lock.try_write_lock());
        assert_eq!(lock.snapshot(), before);

        become_thread(500);
        lock.read_unlock().unwrap();
    }

    #[test]
    fn test_contract_violations_leave_state_intact() {
        let lock = new_lock();
        become_thread(600);
        assert_eq!(lock.read_unlock(), Err(SyncError::NotHeld));
        assert_eq!(lock.write_unlock(), Err(SyncError::NotHeld));

        lock.write_lock().unwrap();
        assert_eq!(lock.write_lock(), Err(SyncError::WouldDeadlock));
        assert_eq!(lock.read_lock(), Err(SyncError::WouldDeadlock));

        become_thread(601);
        assert_eq!(lock.write_unlock(), Err(SyncError::NotHeld));

        become_thread(600);
        let snap = lock.snapshot();
        assert_eq!(snap.writer, Some(ThreadId::new(600)));
        assert!(snap.is_consistent());
        lock.unlock().unwrap();
        assert!(lock.snapshot().is_free());
    }

    #[test]
    fn test_reader_upgrade_is_rejected() {
        let lock = new_lock();
        become_thread(700);
        lock.read_lock().unwrap();
        assert_eq!(lock.write_lock(), Err(SyncError::WouldDeadlock));
        lock.read_unlock().unwrap();
    }

    #[test]
    fn test_reader_stream_starves_writer() {
        // Known limitation: readers keep joining while a writer waits.
        let lock = new_lock();
        become_thread(800);
        lock.read_lock().unwrap();

        let writer = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                lock.write_lock().unwrap();
                lock.write_unlock().unwrap();
            })
        };
        wait_until(&lock, |s| s.queued_writers.len() == 1);

        // Overlapping readers: each arrives before the previous leaves.
        let mut held = 800;
        for next in 801..820 {
            become_thread(next);
            assert!(lock.try_read_lock(), "reader {} should overtake the writer", next);
            become_thread(held);
            lock.read_unlock().unwrap();
            held = next;
            let snap = lock.snapshot();
            assert!(snap.writer.is_none());
            assert_eq!(snap.queued_writers.len(), 1);
        }

        // Stream stops; the writer gets in.
        become_thread(held);
        lock.read_unlock().unwrap();
        writer.join().unwrap();
        assert!(lock.snapshot().is_free());
    }

    #[test]
    fn test_queued_writer_preferred_over_queued_readers() {
        let lock = new_lock();
        lock.write_lock().unwrap();
        let order = Arc::new(SegQueue::new());
        let mut handles = vec![];

        {
            let lock = Arc::clone(&lock);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                lock.write_lock().unwrap();
                order.push("writer");
                lock.write_unlock().unwrap();
            }));
        }
        wait_until(&lock, |s| s.queued_writers.len() == 1);

        {
            let lock = Arc::clone(&lock);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                lock.read_lock().unwrap();
                order.push("reader");
                lock.read_unlock().unwrap();
            }));
        }
        wait_until(&lock, |s| s.queued_readers.len() == 1);

        lock.write_unlock().unwrap();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(order.pop(), Some("writer"));
        assert_eq!(order.pop(), Some("reader"));
    }

    #[test]
    fn test_random_try_sequences_keep_invariants() {
        let lock = new_lock();
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..5_000 {
            let who = 1_000 + next() % 6;
            become_thread(who);
            let me = ThreadId::new(who);
            let snap = lock.snapshot();
            match next() % 4 {
                0 => {
                    let ok = lock.try_read_lock();
                    assert_eq!(ok, snap.writer.is_none());
                }
                1 => {
                    let ok = lock.try_write_lock();
                    assert_eq!(ok, snap.is_free());
                }
                2 => {
                    let res = lock.read_unlock();
                    assert_eq!(res.is_ok(), snap.readers.contains(&me));
                }
                _ => {
                    let res = lock.write_unlock();
                    assert_eq!(res.is_ok(), snap.writer == Some(me));
                }
            }
            assert!(lock.snapshot().is_consistent());
        }
    }

    #[test]
    fn test_mutual_exclusion_under_contention() {
        let lock = new_lock();
        let active_readers = Arc::new(std::sync::atomic::AtomicIsize::new(0));
        let active_writers = Arc::new(std::sync::atomic::AtomicIsize::new(0));
        let mut handles = vec![];

        for i in 0..8 {
            let lock = Arc::clone(&lock);
            let readers = Arc::clone(&active_readers);
            let writers = Arc::clone(&active_writers);
            handles.push(thread::spawn(move || {
                use std::sync::atomic::Ordering::SeqCst;
                for _ in 0..200 {
                    if i % 3 == 0 {
                        lock.write_lock().unwrap();
                        assert_eq!(writers.fetch_add(1, SeqCst), 0);
                        assert_eq!(readers.load(SeqCst), 0);
                        writers.fetch_sub(1, SeqCst);
                        lock.write_unlock().unwrap();
                    } else {
                        lock.read_lock().unwrap();
                        readers.fetch_add(1, SeqCst);
                        assert_eq!(writers.load(SeqCst), 0);
                        readers.fetch_sub(1, SeqCst);
                        lock.read_unlock().unwrap();
                    }
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
        assert!(lock.snapshot().is_free());
    }
}
