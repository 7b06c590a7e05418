//! Per-thread last-error buffer
//!
//! Each thread gets one fixed-capacity byte buffer, created on first access
//! and freed with the thread. The protocol library writes a human-readable
//! message there instead of sharing a global string between threads.

use core::fmt::{self, Write};
use std::cell::RefCell;
use std::rc::Rc;

/// Capacity of the error buffer, including the trailing NUL
pub const ERRMAX: usize = 128;

type Slot = Rc<RefCell<[u8; ERRMAX]>>;

thread_local! {
    static ERRBUF: Slot = Rc::new(RefCell::new([0u8; ERRMAX]));
}

/// Handle to the calling thread's error buffer
///
/// Not `Send`: the buffer belongs to the thread that fetched it. The
/// buffer's address is stable for the life of that thread.
#[derive(Clone)]
pub struct ErrBuf {
    slot: Slot,
}

/// Fetch the calling thread's buffer, creating it on first use
pub fn errbuf() -> ErrBuf {
    ErrBuf { slot: ERRBUF.with(Rc::clone) }
}

impl ErrBuf {
    /// Replace the message, truncating to fit
    pub fn set(&self, msg: &str) {
        let mut buf = self.slot.borrow_mut();
        let mut end = msg.len().min(ERRMAX - 1);
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        buf[..end].copy_from_slice(&msg.as_bytes()[..end]);
        buf[end] = 0;
    }

    /// Replace the message with formatted text
    pub fn set_fmt(&self, args: fmt::Arguments<'_>) {
        let mut text = String::new();
        let _ = text.write_fmt(args);
        self.set(&text);
    }

    /// Current message, up to the first NUL
    pub fn message(&self) -> String {
        let buf = self.slot.borrow();
        let len = buf.iter().position(|&b| b == 0).unwrap_or(ERRMAX);
        String::from_utf8_lossy(&buf[..len]).into_owned()
    }

    pub fn clear(&self) {
        self.slot.borrow_mut()[0] = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.slot.borrow()[0] == 0
    }

    /// Address of the underlying bytes
    pub fn as_ptr(&self) -> *const u8 {
        self.slot.as_ptr() as *const u8
    }
}

impl fmt::Debug for ErrBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrBuf").field("message", &self.message()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_same_thread_same_buffer() {
        let a = errbuf();
        let b = errbuf();
        assert_eq!(a.as_ptr(), b.as_ptr());

        a.set("connection reset");
        assert_eq!(b.message(), "connection reset");
        b.clear();
        assert!(a.is_empty());
    }

    #[test]
    fn test_threads_do_not_interfere() {
        let mine = errbuf();
        mine.set("main thread error");
        let my_addr = mine.as_ptr() as usize;

        let handles: Vec<_> = (0..4)
            .map(|i| {
                thread::spawn(move || {
                    let buf = errbuf();
                    assert!(buf.is_empty());
                    buf.set_fmt(format_args!("worker {} failed", i));
                    thread::yield_now();
                    assert_eq!(buf.message(), format!("worker {} failed", i));
                    buf.as_ptr() as usize
                })
            })
            .collect();

        for h in handles {
            assert_ne!(h.join().unwrap(), my_addr);
        }
        assert_eq!(mine.message(), "main thread error");
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        let buf = errbuf();
        let long = "é".repeat(ERRMAX);
        buf.set(&long);
        let msg = buf.message();
        assert!(msg.len() <= ERRMAX - 1);
        assert!(msg.chars().all(|c| c == 'é'));
        // SAFETY: as_ptr points at ERRMAX bytes owned by this thread.
        assert_eq!(unsafe { *buf.as_ptr().add(msg.len()) }, 0);
    }
}
