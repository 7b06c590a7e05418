//! Fallback parking using std::sync::Condvar
//!
//! Used on platforms without futex support.
//! Less efficient but portable.

use super::Parker;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Condvar-based parker (fallback)
pub struct FallbackParker {
    /// true = token available
    token: Mutex<bool>,
    condvar: Condvar,
}

impl FallbackParker {
    pub fn new() -> Self {
        Self {
            token: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }
}

impl Default for FallbackParker {
    fn default() -> Self {
        Self::new()
    }
}

impl Parker for FallbackParker {
    fn park(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        while !*token {
            token = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return false;
                    }
                    self.condvar
                        .wait_timeout(token, d - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.condvar.wait(token).unwrap_or_else(PoisonError::into_inner),
            };
        }
        *token = false;
        true
    }

    fn unpark(&self) {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        *token = true;
        drop(token);
        self.condvar.notify_one();
    }
}
