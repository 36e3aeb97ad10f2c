//! Per-subscription owner lock.
//!
//! A small reentrant mutual-exclusion primitive: the thread that holds it may
//! acquire it again without deadlocking, every other thread blocks on a
//! condition variable until the owner releases its last hold. The lock guards
//! no data of its own; callers use it to serialize state transitions on
//! fields that are otherwise atomics.
//!
//! Releasing from a thread that does not own the lock is a logic error and
//! panics.

use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct OwnerState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Reentrant lock recording the owning thread.
#[derive(Debug, Default)]
pub struct OwnerLock {
    state: Mutex<OwnerState>,
    released: Condvar,
}

impl OwnerLock {
    /// Creates an unowned lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, OwnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires the lock, blocking while another thread owns it.
    pub fn acquire(&self) -> OwnerGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state();
        if state.owner == Some(me) {
            state.depth += 1;
            return OwnerGuard::new(self);
        }
        while state.owner.is_some() {
            state = self.released.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.owner = Some(me);
        state.depth = 1;
        OwnerGuard::new(self)
    }

    /// Returns true if the calling thread currently owns the lock.
    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        self.state().owner == Some(thread::current().id())
    }

    fn release(&self) {
        let me = thread::current().id();
        let mut state = self.state();
        assert!(
            state.owner == Some(me),
            "subscription lock released by {me:?} but owned by {:?}",
            state.owner
        );
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.released.notify_one();
        }
    }
}

/// Hold on an [`OwnerLock`]; released on drop.
///
/// Not `Send`: a hold must be released by the thread that took it.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct OwnerGuard<'a> {
    lock: &'a OwnerLock,
    _not_send: PhantomData<*const ()>,
}

impl<'a> OwnerGuard<'a> {
    fn new(lock: &'a OwnerLock) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
