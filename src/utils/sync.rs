//! Utilities for concurrency.

use std::sync::{Condvar as StdCondvar, Mutex as StdMutex};


pub use std::sync::MutexGuard;


//------------ Mutex ---------------------------------------------------------

/// A wrapper around a std mutex that panics if it is poisoned.
#[derive(Debug, Default)]
pub struct Mutex<T: ?Sized>(StdMutex<T>);

impl<T> Mutex<T> {
    /// Creates a new mutex in unlocked state.
    pub fn new(t: T) -> Self {
        Mutex(StdMutex::new(t))
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the mutex.
    ///
    /// The current thread will be blocked until nobody else holds the mutex.
    ///
    /// # Panics
    ///
    /// The method panics if the lock is poisoned, i.e., if a panic occured
    /// while holding the lock. It may also panic if the current thread
    /// already holds the lock.
    pub fn lock(&self) -> MutexGuard<T> {
        self.0.lock().expect("acquiring a poisoned mutex")
    }
}


//------------ Condvar -------------------------------------------------------

/// A wrapper around a std condition variable that panics on poisoned locks.
///
/// The condition variable is meant to be used together with [`Mutex`]: the
/// guards returned by [`Mutex::lock`] can be handed to the wait methods.
#[derive(Debug, Default)]
pub struct Condvar(StdCondvar);

impl Condvar {
    /// Creates a new condition variable.
    pub fn new() -> Self {
        Condvar(StdCondvar::new())
    }

    /// Blocks until this condition variable is notified.
    ///
    /// The mutex behind `guard` is released while waiting and re-acquired
    /// before the method returns. Spurious wake-ups are possible, so
    /// callers need to re-check their condition in a loop.
    ///
    /// # Panics
    ///
    /// The method panics if the mutex was poisoned while waiting.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.0.wait(guard).expect("waiting on a poisoned mutex")
    }

    /// Wakes up one blocked thread.
    pub fn notify_one(&self) {
        self.0.notify_one()
    }

    /// Wakes up all blocked threads.
    pub fn notify_all(&self) {
        self.0.notify_all()
    }
}


//============ Tests =========================================================
