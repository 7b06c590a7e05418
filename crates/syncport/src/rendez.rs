//! Rendezvous (condition variable) paired with one `Mutex`

use core::ptr;

use syncport_core::traits::RawRendez;
use syncport_core::{kerror, SyncError, SyncResult};

use crate::mutex::{Mutex, MutexGuard};

/// Condition variable bound to the mutex it was created for
///
/// The borrow of the mutex guarantees it outlives every sleeper.
///
/// ```ignore
/// let queue = threading.mutex(VecDeque::new())?;
/// let nonempty = threading.rendez(&queue)?;
///
/// let mut q = queue.lock();
/// nonempty.sleep_while(&mut q, |q| q.is_empty())?;
/// let item = q.pop_front();
/// ```
pub struct Rendez<'m, T: ?Sized> {
    raw: Box<dyn RawRendez>,
    mutex: &'m Mutex<T>,
}

impl<'m, T: ?Sized> Rendez<'m, T> {
    pub fn from_raw(raw: Box<dyn RawRendez>, mutex: &'m Mutex<T>) -> Self {
        Self { raw, mutex }
    }

    /// Release the guard's lock, suspend, and hold it again on return
    ///
    /// Wakeups may be spurious; re-check the condition afterwards or use
    /// [`sleep_while`](Self::sleep_while). A guard of any other mutex is
    /// rejected with `WrongMutex` and nothing is released.
    pub fn sleep(&self, guard: &mut MutexGuard<'_, T>) -> SyncResult<()> {
        if !ptr::eq(MutexGuard::mutex(guard), self.mutex) {
            kerror!("rendez: sleep with a guard of a different mutex");
            return Err(SyncError::WrongMutex);
        }
        self.raw.sleep(self.mutex.raw());
        Ok(())
    }

    /// Sleep until `cond` returns false
    pub fn sleep_while<F>(&self, guard: &mut MutexGuard<'_, T>, mut cond: F) -> SyncResult<()>
    where
        F: FnMut(&mut T) -> bool,
    {
        while cond(&mut **guard) {
            self.sleep(guard)?;
        }
        Ok(())
    }

    /// Wake at most one sleeper
    pub fn wake(&self) {
        self.raw.wake();
    }

    /// Wake every current sleeper
    pub fn wake_all(&self) {
        self.raw.wake_all();
    }

    /// The mutex this rendezvous pairs with
    pub fn mutex(&self) -> &'m Mutex<T> {
        self.mutex
    }
}
