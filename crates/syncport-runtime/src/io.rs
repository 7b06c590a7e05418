//! Yielding I/O
//!
//! Reads and writes first wait for readiness through an `IoWait`, so the
//! calling thread gives way to others instead of blocking inside the
//! syscall. Both backends share the retry loop; they differ only in how a
//! readiness wait suspends.
//!
//! ```ignore
//! let n = yielding_read(&waiter, fd, &mut buf)?;
//! ```

use std::io;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use syncport_core::kdebug;
use syncport_core::traits::{Interest, PollFd};

/// How a backend suspends the caller until a descriptor is ready
pub trait IoWait {
    /// Return once `fd` reports `interest` (or an error condition)
    fn wait_fd(&self, fd: i32, interest: Interest) -> io::Result<()>;

    /// Let other threads run once before a retry
    fn reschedule(&self);
}

/// Read from `fd` after waiting for it to become readable
///
/// `EINTR` reschedules and retries, `EAGAIN` waits again, anything else
/// is returned.
pub fn yielding_read<W: IoWait + ?Sized>(waiter: &W, fd: i32, buf: &mut [u8]) -> io::Result<usize> {
    if fd < 0 {
        return Err(Errno::EBADF.into());
    }
    loop {
        waiter.wait_fd(fd, Interest::READABLE)?;
        // SAFETY: buf is valid for buf.len() writable bytes.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        retry_or_fail(waiter, fd, "read")?;
    }
}

/// Write to `fd` after waiting for it to become writable
pub fn yielding_write<W: IoWait + ?Sized>(waiter: &W, fd: i32, buf: &[u8]) -> io::Result<usize> {
    if fd < 0 {
        return Err(Errno::EBADF.into());
    }
    loop {
        waiter.wait_fd(fd, Interest::WRITABLE)?;
        // SAFETY: buf is valid for buf.len() readable bytes.
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        retry_or_fail(waiter, fd, "write")?;
    }
}

/// Classify the errno of a failed read/write
fn retry_or_fail<W: IoWait + ?Sized>(waiter: &W, fd: i32, op: &str) -> io::Result<()> {
    match Errno::last() {
        Errno::EINTR => {
            kdebug!("{} on fd {} interrupted, retrying", op, fd);
            waiter.reschedule();
            Ok(())
        }
        e if e == Errno::EAGAIN || e == Errno::EWOULDBLOCK => Ok(()),
        e => Err(e.into()),
    }
}

/// `poll(2)` over `fds`, filling in `revents`
///
/// `None` waits indefinitely. Interrupted polls are retried with the
/// remaining time. Returns the number of entries that became ready.
pub fn poll_fds(fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
    let mut raw: Vec<libc::pollfd> = fds
        .iter()
        .map(|p| libc::pollfd {
            fd: p.fd,
            events: to_poll_events(p.events),
            revents: 0,
        })
        .collect();
    let deadline = timeout.map(|t| Instant::now() + t);

    let ready = loop {
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        // SAFETY: raw is a valid array of raw.len() pollfd entries.
        let n = unsafe {
            libc::poll(raw.as_mut_ptr(), raw.len() as libc::nfds_t, timeout_ms(remaining))
        };
        if n >= 0 {
            break n as usize;
        }
        match Errno::last() {
            Errno::EINTR => kdebug!("poll interrupted, retrying"),
            e => return Err(e.into()),
        }
    };

    for (p, r) in fds.iter_mut().zip(&raw) {
        p.revents = from_poll_events(r.revents);
    }
    Ok(ready)
}

fn to_poll_events(interest: Interest) -> libc::c_short {
    let mut events = 0;
    if interest.is_readable() {
        events |= libc::POLLIN;
    }
    if interest.is_writable() {
        events |= libc::POLLOUT;
    }
    events
}

fn from_poll_events(revents: libc::c_short) -> Interest {
    let mut out = Interest::NONE;
    if revents & (libc::POLLIN | libc::POLLPRI) != 0 {
        out = out | Interest::READABLE;
    }
    if revents & libc::POLLOUT != 0 {
        out = out | Interest::WRITABLE;
    }
    // A hung-up reader still has to read() to see EOF.
    if revents & libc::POLLHUP != 0 {
        out = out | Interest::READABLE | Interest::ERROR;
    }
    if revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
        out = out | Interest::ERROR;
    }
    out
}

/// Milliseconds for `poll(2)`, rounded up so short waits do not spin
fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_nanos().div_ceil(1_000_000);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}
