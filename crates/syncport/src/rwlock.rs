//! Owning reader/writer lock over a backend lock

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

use syncport_core::traits::RawRwLock;
use syncport_core::{kerror, SyncResult};

/// A reader/writer lock protecting `T`
///
/// Readers are preferred: new readers join existing ones even while a
/// writer waits, so a steady stream of readers can hold a writer off.
pub struct RwLock<T: ?Sized> {
    raw: Box<dyn RawRwLock>,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for RwLock<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    pub fn from_raw(raw: Box<dyn RawRwLock>, value: T) -> Self {
        Self { raw, data: UnsafeCell::new(value) }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> RwLock<T> {
    /// Block until a shared hold is granted
    ///
    /// Fails with `WouldDeadlock` if the caller holds the write side.
    pub fn read(&self) -> SyncResult<RwLockReadGuard<'_, T>> {
        self.raw.read_lock()?;
        Ok(RwLockReadGuard { lock: self, _not_send: PhantomData })
    }

    /// Block until the exclusive hold is granted
    ///
    /// Fails with `WouldDeadlock` if the caller already holds either side.
    pub fn write(&self) -> SyncResult<RwLockWriteGuard<'_, T>> {
        self.raw.write_lock()?;
        Ok(RwLockWriteGuard { lock: self, _not_send: PhantomData })
    }

    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        self.raw
            .try_read_lock()
            .then(|| RwLockReadGuard { lock: self, _not_send: PhantomData })
    }

    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        self.raw
            .try_write_lock()
            .then(|| RwLockWriteGuard { lock: self, _not_send: PhantomData })
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_read() {
            Some(guard) => f.debug_struct("RwLock").field("data", &&*guard).finish(),
            None => f.debug_struct("RwLock").field("data", &"<locked>").finish(),
        }
    }
}

/// Shared hold; releases on drop
pub struct RwLockReadGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
    _not_send: PhantomData<*const ()>,
}

/// Exclusive hold; releases on drop
pub struct RwLockWriteGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T: ?Sized> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: no writer while we hold a read
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: we are the only holder
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.raw.read_unlock() {
            kerror!("rwlock: read guard release failed: {}", e);
        }
    }
}

impl<T: ?Sized> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.raw.write_unlock() {
            kerror!("rwlock: write guard release failed: {}", e);
        }
    }
}
