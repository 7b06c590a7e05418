//! Backend for code running on the cooperative scheduler

use std::io;
use std::time::Duration;

use syncport_core::id::ThreadId;
use syncport_core::rwlock::QueuedRwLock;
use syncport_core::traits::{Backend, Interest, PollFd, RawMutex, RawRendez, RawRwLock};
use syncport_core::SyncResult;

use super::sync::{CoopMutex, CoopRendez};
use crate::io::{self as yio, IoWait};

/// Dispatch table over `coop` logical threads
///
/// Primitives may be created anywhere, but locking, waiting and I/O must
/// happen on threads of a running `CoopScheduler`.
#[derive(Debug, Default)]
pub struct CoopBackend;

impl CoopBackend {
    pub fn new() -> Self {
        CoopBackend
    }
}

/// Readiness waits that suspend only the calling logical thread
struct CoopIo;

impl IoWait for CoopIo {
    fn wait_fd(&self, fd: i32, interest: Interest) -> io::Result<()> {
        // other runnable threads go first even when fd is already ready
        super::yield_now();
        let mut fds = [PollFd::new(fd, interest)];
        super::select(&mut fds, None).map(|_| ())
    }

    fn reschedule(&self) {
        super::yield_now();
    }
}

impl Backend for CoopBackend {
    fn name(&self) -> &'static str {
        "coop"
    }

    fn current(&self) -> ThreadId {
        super::current()
    }

    fn new_mutex(&self) -> SyncResult<Box<dyn RawMutex>> {
        Ok(Box::new(CoopMutex::new()))
    }

    fn new_rwlock(&self) -> SyncResult<Box<dyn RawRwLock>> {
        Ok(Box::new(QueuedRwLock::new(
            Box::new(CoopMutex::new()),
            Box::new(CoopRendez::new()),
            Box::new(CoopRendez::new()),
            super::current,
        )))
    }

    fn new_rendez(&self) -> SyncResult<Box<dyn RawRendez>> {
        Ok(Box::new(CoopRendez::new()))
    }

    fn read(&self, fd: i32, buf: &mut [u8]) -> io::Result<usize> {
        yio::yielding_read(&CoopIo, fd, buf)
    }

    fn write(&self, fd: i32, buf: &[u8]) -> io::Result<usize> {
        yio::yielding_write(&CoopIo, fd, buf)
    }

    fn select(&self, fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
        super::select(fds, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::coop::{self, CoopScheduler};
    use nix::unistd::pipe;
    use std::os::fd::AsRawFd;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use syncport_core::SyncError;

    fn scheduler() -> CoopScheduler {
        CoopScheduler::new(&SyncConfig::new().idle_poll_interval(Duration::from_millis(2)))
    }

    fn backend() -> Arc<CoopBackend> {
        Arc::new(CoopBackend::new())
    }

    #[test]
    fn test_two_readers_share_then_writer_waits() {
        let backend = backend();
        scheduler().run(move || {
            let lock: Arc<dyn RawRwLock> = Arc::from(backend.new_rwlock().unwrap());
            let readers_in = Arc::new(AtomicUsize::new(0));
            let writer_done = Arc::new(AtomicBool::new(false));

            let readers: Vec<_> = (0..2)
                .map(|_| {
                    let (lock, readers_in) = (Arc::clone(&lock), Arc::clone(&readers_in));
                    coop::spawn(move || {
                        lock.read_lock().unwrap();
                        readers_in.fetch_add(1, Ordering::SeqCst);
                        coop::yield_now();
                        coop::yield_now();
                        lock.read_unlock().unwrap();
                    })
                    .unwrap()
                })
                .collect();
            let writer = {
                let (lock, readers_in, writer_done) =
                    (Arc::clone(&lock), Arc::clone(&readers_in), Arc::clone(&writer_done));
                coop::spawn(move || {
                    lock.write_lock().unwrap();
                    // Both readers got in before us and have left.
                    assert_eq!(readers_in.load(Ordering::SeqCst), 2);
                    writer_done.store(true, Ordering::SeqCst);
                    lock.write_unlock().unwrap();
                })
                .unwrap()
            };

            for h in readers {
                h.join().unwrap();
            }
            writer.join().unwrap();
            assert!(writer_done.load(Ordering::SeqCst));
        });
    }

    #[test]
    fn test_queued_readers_released_as_batch() {
        let backend = backend();
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        scheduler().run(move || {
            let lock: Arc<dyn RawRwLock> = Arc::from(backend.new_rwlock().unwrap());
            lock.write_lock().unwrap();

            let readers: Vec<_> = (0..3)
                .map(|i| {
                    let (lock, l) = (Arc::clone(&lock), Arc::clone(&l));
                    coop::spawn(move || {
                        lock.read_lock().unwrap();
                        l.lock().unwrap().push(format!("in{}", i));
                        coop::yield_now();
                        l.lock().unwrap().push(format!("out{}", i));
                        lock.read_unlock().unwrap();
                    })
                    .unwrap()
                })
                .collect();
            coop::yield_now();
            assert!(l.lock().unwrap().is_empty());

            lock.write_unlock().unwrap();
            for h in readers {
                h.join().unwrap();
            }
        });
        let log = log.lock().unwrap();
        // All three were inside together before anyone left.
        assert_eq!(&log[..3], ["in0", "in1", "in2"]);
    }

    #[test]
    fn test_contract_violations_leave_lock_usable() {
        let backend = backend();
        scheduler().run(move || {
            let lock = backend.new_rwlock().unwrap();
            assert_eq!(lock.read_unlock(), Err(SyncError::NotHeld));
            lock.write_lock().unwrap();
            assert_eq!(lock.write_lock(), Err(SyncError::WouldDeadlock));
            assert_eq!(lock.read_lock(), Err(SyncError::WouldDeadlock));
            lock.write_unlock().unwrap();
            assert!(lock.try_read_lock());
            lock.read_unlock().unwrap();
        });
    }

    #[test]
    fn test_yielding_read_does_not_stall_others() {
        let backend = backend();
        let probe = Arc::new(Mutex::new(Vec::new()));
        let p = Arc::clone(&probe);
        let n = scheduler().run(move || {
            let (rd, wr) = pipe().unwrap();
            let reader = {
                let (backend, p) = (Arc::clone(&backend), Arc::clone(&p));
                coop::spawn(move || {
                    p.lock().unwrap().push("read start");
                    let mut buf = [0u8; 32];
                    let n = backend.read(rd.as_raw_fd(), &mut buf).unwrap();
                    p.lock().unwrap().push("read done");
                    assert_eq!(&buf[..n], b"hello coop");
                    n
                })
                .unwrap()
            };
            let writer = {
                let (backend, p) = (Arc::clone(&backend), Arc::clone(&p));
                coop::spawn(move || {
                    p.lock().unwrap().push("other ran");
                    coop::yield_now();
                    p.lock().unwrap().push("write");
                    backend.write(wr.as_raw_fd(), b"hello coop").unwrap()
                })
                .unwrap()
            };
            assert_eq!(writer.join().unwrap(), 10);
            reader.join().unwrap()
        });
        assert_eq!(n, 10);
        assert_eq!(
            *probe.lock().unwrap(),
            ["read start", "other ran", "write", "read done"]
        );
    }

    #[test]
    fn test_ready_read_still_yields_first() {
        let backend = backend();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = Arc::clone(&order);
        scheduler().run(move || {
            let (rd, wr) = pipe().unwrap();
            nix::unistd::write(&wr, b"!").unwrap();

            let other = {
                let o = Arc::clone(&o);
                coop::spawn(move || o.lock().unwrap().push("other ran")).unwrap()
            };
            let mut buf = [0u8; 4];
            assert_eq!(backend.read(rd.as_raw_fd(), &mut buf).unwrap(), 1);
            o.lock().unwrap().push("read done");
            other.join().unwrap();
        });
        assert_eq!(*order.lock().unwrap(), ["other ran", "read done"]);
    }

    #[test]
    fn test_read_error_surfaced() {
        let backend = backend();
        scheduler().run(move || {
            let (rd, wr) = pipe().unwrap();
            drop(rd);
            let err = backend.write(wr.as_raw_fd(), b"x").unwrap_err();
            assert_eq!(err.raw_os_error(), Some(libc::EPIPE));
        });
    }
}
