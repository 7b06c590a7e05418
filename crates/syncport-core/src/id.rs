//! Logical thread identifier

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Identity of a logical thread as seen by a backend
///
/// For the native backend this names an OS thread; for the cooperative
/// scheduler it names a logical thread multiplexed by the scheduler.
/// The maximum value (u64::MAX) is reserved as a sentinel for "no thread".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Sentinel value indicating no thread
    pub const NONE: ThreadId = ThreadId(u64::MAX);

    /// Create a new ThreadId from a raw value
    #[inline]
    pub const fn new(id: u64) -> Self {
        ThreadId(id)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if this is the NONE sentinel
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// Check if this names a real thread
    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != u64::MAX
    }

    /// Convert to Option
    #[inline]
    pub const fn to_option(self) -> Option<ThreadId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

/// Monotonic allocator for thread identities
///
/// Each backend owns one of these so ids never repeat within a process run.
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator whose first id is `first`
    pub const fn starting_at(first: u64) -> Self {
        Self { next: AtomicU64::new(first) }
    }

    /// Hand out the next identity
    #[inline]
    pub fn next(&self) -> ThreadId {
        ThreadId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl From<u64> for ThreadId {
    #[inline]
    fn from(id: u64) -> Self {
        ThreadId(id)
    }
}

impl From<ThreadId> for u64 {
    #[inline]
    fn from(id: ThreadId) -> Self {
        id.0
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "ThreadId(NONE)")
        } else {
            write!(f, "ThreadId({})", self.0)
        }
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        ThreadId::NONE
    }
}
