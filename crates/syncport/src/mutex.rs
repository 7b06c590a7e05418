//! Owning mutex over a backend lock

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

use syncport_core::traits::RawMutex;

/// A mutex protecting `T`, locked through the registered backend
///
/// Created with [`Threading::mutex`](crate::Threading::mutex). The backend
/// lock is destroyed exactly once, when the `Mutex` is dropped.
///
/// # Example
///
/// ```ignore
/// let counter = threading.mutex(0u32)?;
/// *counter.lock() += 1;
/// ```
pub struct Mutex<T: ?Sized> {
    raw: Box<dyn RawMutex>,
    data: UnsafeCell<T>,
}

// Safety: access to `data` is serialized by `raw`
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Wrap a backend lock around `value`
    pub fn from_raw(raw: Box<dyn RawMutex>, value: T) -> Self {
        Self { raw, data: UnsafeCell::new(value) }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Block until the lock is held
    ///
    /// Not reentrant: locking again from the holder never returns.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard { mutex: self, _not_send: PhantomData }
    }

    /// Take the lock if it is free
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(MutexGuard { mutex: self, _not_send: PhantomData })
        } else {
            None
        }
    }

    /// Get mutable access to the underlying data
    ///
    /// This requires mutable access to the mutex, guaranteeing no other
    /// references exist.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub(crate) fn raw(&self) -> &dyn RawMutex {
        &*self.raw
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("Mutex").field("data", &&*guard).finish(),
            None => f.debug_struct("Mutex").field("data", &"<locked>").finish(),
        }
    }
}

/// Held lock; releases on drop
///
/// Not `Send`: backends track the holder by thread identity.
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    /// The mutex this guard holds
    pub fn mutex(guard: &Self) -> &'a Mutex<T> {
        guard.mutex
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: we hold the lock
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: we hold the lock
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{backends, on_backend};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_guard_unlocks_on_every_path() {
        for kind in backends() {
            on_backend(kind, |t| {
                let m = t.mutex(1).unwrap();
                {
                    let mut g = m.lock();
                    *g += 1;
                    assert!(m.try_lock().is_none());
                }
                assert_eq!(*m.try_lock().unwrap(), 2);

                let early = |m: &crate::Mutex<i32>| -> Result<(), ()> {
                    let _g = m.lock();
                    Err(())
                };
                assert!(early(&m).is_err());
                assert!(m.try_lock().is_some());
                assert_eq!(m.into_inner(), 2);
            });
        }
    }

    #[test]
    fn test_counter_across_threads() {
        for kind in backends() {
            let total = on_backend(kind, |t| {
                let m = Arc::new(t.mutex(0usize).unwrap());
                let inside = Arc::new(AtomicBool::new(false));
                let handles: Vec<_> = (0..4)
                    .map(|_| {
                        let (m, inside) = (Arc::clone(&m), Arc::clone(&inside));
                        crate::test_support::spawn(kind, move || {
                            for _ in 0..200 {
                                let mut g = m.lock();
                                assert!(!inside.swap(true, Ordering::SeqCst));
                                *g += 1;
                                crate::test_support::pause();
                                inside.store(false, Ordering::SeqCst);
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h();
                }
                let g = m.lock();
                *g
            });
            assert_eq!(total, 800);
        }
    }

    #[test]
    fn test_debug_shows_locked() {
        for kind in backends() {
            on_backend(kind, |t| {
                let m = t.mutex(5).unwrap();
                assert_eq!(format!("{:?}", m), "Mutex { data: 5 }");
                let _g = m.lock();
                assert_eq!(format!("{:?}", m), "Mutex { data: \"<locked>\" }");
            });
        }
    }
}
