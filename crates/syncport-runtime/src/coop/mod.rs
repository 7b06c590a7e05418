//! Cooperative logical threads
//!
//! `CoopScheduler::run` hosts a set of logical threads of which exactly one
//! executes at a time. The free functions here act on the logical thread
//! that calls them.
//!
//! ```ignore
//! CoopScheduler::new(&config).run(|| {
//!     let h = coop::spawn(|| work()).unwrap();
//!     coop::yield_now();
//!     h.join().unwrap();
//! });
//! ```

pub(crate) mod scheduler;
mod sync;
mod backend;

use std::io;
use std::time::Duration;

use syncport_core::id::ThreadId;
use syncport_core::traits::{Interest, PollFd};
use syncport_core::{SyncError, SyncResult};

use crate::tls;

pub use backend::CoopBackend;
pub use scheduler::{CoopHandle, CoopScheduler, JoinHandle};
pub use sync::{CoopMutex, CoopRendez};

/// Identity of the calling logical thread, `NONE` outside the scheduler
#[inline]
pub fn current() -> ThreadId {
    tls::coop_thread_id()
}

/// Let every other runnable logical thread run once
///
/// Outside the scheduler this yields the OS thread.
pub fn yield_now() {
    match tls::coop_context() {
        Some((inner, me)) => inner.yield_now(&me),
        None => std::thread::yield_now(),
    }
}

/// Suspend the calling logical thread until someone calls `wakeup` on it
///
/// A wakeup that arrived while the thread was running makes this return
/// immediately. Callers re-check their condition in a loop.
pub fn stop() -> SyncResult<()> {
    let (inner, me) = tls::coop_context().ok_or(SyncError::NotInScheduler)?;
    inner.stop(&me);
    Ok(())
}

/// Make `id` runnable
///
/// Returns `Ok(false)` if `id` has finished or never existed. Use
/// [`CoopHandle::wakeup`] from OS threads outside the scheduler.
pub fn wakeup(id: ThreadId) -> SyncResult<bool> {
    let (inner, _) = tls::coop_context().ok_or(SyncError::NotInScheduler)?;
    Ok(inner.wakeup(id))
}

/// Start a new logical thread on the caller's scheduler
pub fn spawn<F, T>(f: F) -> SyncResult<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    scheduler::spawn_current(f)
}

/// Wait until any entry of `fds` is ready or `timeout` passes
///
/// Only the calling logical thread is suspended. Returns the number of
/// ready entries, with `revents` filled in.
pub fn select(fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
    let (inner, me) = tls::coop_context().ok_or_else(|| io::Error::other(SyncError::NotInScheduler))?;
    inner.select(&me, fds, timeout)
}

/// Suspend until `fd` is readable (or reports an error)
pub fn wait_readable(fd: i32) -> io::Result<()> {
    wait_fd(fd, Interest::READABLE)
}

/// Suspend until `fd` is writable (or reports an error)
pub fn wait_writable(fd: i32) -> io::Result<()> {
    wait_fd(fd, Interest::WRITABLE)
}

fn wait_fd(fd: i32, interest: Interest) -> io::Result<()> {
    let mut fds = [PollFd::new(fd, interest)];
    select(&mut fds, None).map(|_| ())
}

/// Context of the calling logical thread for the cooperative primitives
///
/// # Panics
///
/// Panics outside the scheduler: the primitives have no way to suspend a
/// thread they do not manage.
pub(crate) fn context() -> (std::sync::Arc<scheduler::Inner>, std::sync::Arc<scheduler::Slot>) {
    match tls::coop_context() {
        Some(ctx) => ctx,
        None => panic!("coop primitive used outside the cooperative scheduler"),
    }
}
