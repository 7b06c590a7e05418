//! Raw primitive traits and the backend dispatch table
//!
//! These traits define the interface between the protocol library and
//! whichever threading backend is linked in. The library never touches a
//! concrete primitive; it holds boxed trait objects handed out by a
//! `Backend`.

use core::ops::BitOr;
use std::io;
use std::time::Duration;

use crate::errbuf::{self, ErrBuf};
use crate::error::SyncResult;
use crate::id::ThreadId;

/// Exclusive lock supplied by a backend
///
/// Not reentrant: a holder that calls `lock` again deadlocks.
pub trait RawMutex: Send + Sync {
    /// Block until exclusive ownership is obtained
    fn lock(&self);

    /// Take ownership if it is free, never blocking
    fn try_lock(&self) -> bool;

    /// Release ownership
    ///
    /// Calling this without holding the lock is a contract violation.
    fn unlock(&self);
}

/// Condition variable ("rendezvous") supplied by a backend
pub trait RawRendez: Send + Sync {
    /// Atomically release `mutex` and suspend; reacquire before returning
    ///
    /// The caller must hold `mutex`. Wakeups may be spurious, so callers
    /// re-check their condition in a loop.
    fn sleep(&self, mutex: &dyn RawMutex);

    /// Wake at most one sleeper
    fn wake(&self);

    /// Wake every current sleeper
    fn wake_all(&self);
}

/// Reader/writer lock supplied by a backend
pub trait RawRwLock: Send + Sync {
    /// Block until the lock is held for reading
    fn read_lock(&self) -> SyncResult<()>;

    /// Take a read hold if no writer holds the lock
    fn try_read_lock(&self) -> bool;

    /// Block until the lock is held for writing
    fn write_lock(&self) -> SyncResult<()>;

    /// Take the write hold if nobody holds the lock
    fn try_write_lock(&self) -> bool;

    /// Drop the caller's read hold
    fn read_unlock(&self) -> SyncResult<()>;

    /// Drop the caller's write hold
    fn write_unlock(&self) -> SyncResult<()>;
}

/// Readiness interest / result bits for `Backend::select`
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READABLE: Interest = Interest(0b001);
    pub const WRITABLE: Interest = Interest(0b010);
    /// Error, hangup or invalid descriptor (result only)
    pub const ERROR: Interest = Interest(0b100);

    #[inline]
    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_readable(self) -> bool {
        self.contains(Interest::READABLE)
    }

    #[inline]
    pub const fn is_writable(self) -> bool {
        self.contains(Interest::WRITABLE)
    }

    #[inline]
    pub const fn is_error(self) -> bool {
        self.contains(Interest::ERROR)
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl core::fmt::Debug for Interest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut parts = Vec::new();
        if self.is_readable() {
            parts.push("READABLE");
        }
        if self.is_writable() {
            parts.push("WRITABLE");
        }
        if self.is_error() {
            parts.push("ERROR");
        }
        if parts.is_empty() {
            write!(f, "Interest(NONE)")
        } else {
            write!(f, "Interest({})", parts.join(" | "))
        }
    }
}

/// One descriptor entry for `Backend::select`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollFd {
    pub fd: i32,
    pub events: Interest,
    /// Filled in by `select`
    pub revents: Interest,
}

impl PollFd {
    pub const fn new(fd: i32, events: Interest) -> Self {
        Self { fd, events, revents: Interest::NONE }
    }

    /// True once `select` reported anything for this entry
    #[inline]
    pub const fn is_ready(&self) -> bool {
        !self.revents.is_empty()
    }
}

/// The dispatch table a backend registers
///
/// One group of slots per primitive kind: `new_*` are the init slots and
/// `Drop` on the returned box is the destroy slot. The remaining slots are
/// the per-thread error buffer and yielding I/O.
pub trait Backend: Send + Sync + 'static {
    /// Backend name (e.g., "native", "coop")
    fn name(&self) -> &'static str;

    /// Identity of the calling logical thread
    fn current(&self) -> ThreadId;

    /// Allocate a new mutex
    fn new_mutex(&self) -> SyncResult<Box<dyn RawMutex>>;

    /// Allocate a new reader/writer lock
    fn new_rwlock(&self) -> SyncResult<Box<dyn RawRwLock>>;

    /// Allocate a new rendezvous
    fn new_rendez(&self) -> SyncResult<Box<dyn RawRendez>>;

    /// Error buffer of the calling thread
    fn errbuf(&self) -> ErrBuf {
        errbuf::errbuf()
    }

    /// Read once `fd` is readable, suspending only the calling thread
    fn read(&self, fd: i32, buf: &mut [u8]) -> io::Result<usize>;

    /// Write once `fd` is writable, suspending only the calling thread
    fn write(&self, fd: i32, buf: &[u8]) -> io::Result<usize>;

    /// Wait until any entry of `fds` is ready or `timeout` elapses
    ///
    /// Returns the number of entries with non-empty `revents`.
    fn select(&self, fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize>;
}
