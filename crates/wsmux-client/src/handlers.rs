//! Callback slots and lock helpers.
//!
//! Callbacks are cloned out of their slot before being invoked, so no lock is
//! held while user code runs and callbacks may re-enter the client.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a callback panicked while holding it.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One replaceable callback.
pub(crate) struct Slot<F: ?Sized>(Mutex<Option<Arc<F>>>);

impl<F: ?Sized> Default for Slot<F> {
    fn default() -> Self {
        Self(Mutex::new(None))
    }
}

impl<F: ?Sized> Slot<F> {
    pub(crate) fn set(&self, f: Arc<F>) {
        *lock(&self.0) = Some(f);
    }

    pub(crate) fn get(&self) -> Option<Arc<F>> {
        lock(&self.0).clone()
    }
}
