//! Thread-local storage for backend context
//!
//! Native identity is allocated lazily per OS thread. Cooperative context
//! (scheduler + the logical thread's slot) is installed by the scheduler
//! on every OS thread that carries a logical thread.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use syncport_core::id::{IdAllocator, ThreadId};

use crate::coop::scheduler::{Inner, Slot};

static NATIVE_IDS: IdAllocator = IdAllocator::starting_at(1);

thread_local! {
    /// Identity of this OS thread under the native backend
    static NATIVE_ID: Cell<ThreadId> = const { Cell::new(ThreadId::NONE) };

    /// Scheduler and slot of the logical thread running on this OS thread
    static COOP: RefCell<Option<(Arc<Inner>, Arc<Slot>)>> = const { RefCell::new(None) };
}

/// Native identity of the calling OS thread
#[inline]
pub fn native_thread_id() -> ThreadId {
    NATIVE_ID.with(|cell| {
        let id = cell.get();
        if id.is_some() {
            return id;
        }
        let id = NATIVE_IDS.next();
        cell.set(id);
        id
    })
}

/// Bind a logical thread to this OS thread
pub(crate) fn set_coop(inner: Arc<Inner>, slot: Arc<Slot>) {
    COOP.with(|cell| *cell.borrow_mut() = Some((inner, slot)));
}

pub(crate) fn clear_coop() {
    COOP.with(|cell| cell.borrow_mut().take());
}

/// Scheduler and slot of the current logical thread, if any
#[inline]
pub(crate) fn coop_context() -> Option<(Arc<Inner>, Arc<Slot>)> {
    COOP.with(|cell| cell.borrow().clone())
}

/// Identity of the current logical thread, or `NONE` outside the scheduler
#[inline]
pub fn coop_thread_id() -> ThreadId {
    COOP.with(|cell| match &*cell.borrow() {
        Some((_, slot)) => slot.id(),
        None => ThreadId::NONE,
    })
}

/// Check if we're running inside the cooperative scheduler
#[inline]
pub fn is_in_coop() -> bool {
    COOP.with(|cell| cell.borrow().is_some())
}
