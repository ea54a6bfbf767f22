//! Locks that don’t make callers deal with poisoning.
//!
//! The store guards its two keyspaces with a single [`RwLock`]. A panic
//! while holding the write half means a mutating operation stopped half
//! way, so there is no sensible way to continue and these wrappers panic
//! on a poisoned lock instead of handing out the error.

use std::sync::{Mutex as StdMutex, RwLock as StdRwLock};


pub use std::sync::{MutexGuard, RwLockReadGuard, RwLockWriteGuard};


//------------ RwLock --------------------------------------------------------

/// A wrapper around a std read-write lock that panics if it is poisoned.
#[derive(Debug, Default)]
pub struct RwLock<T: ?Sized>(StdRwLock<T>);

impl<T> RwLock<T> {
    /// Creates a new read/write lock in unlocked state.
    pub fn new(t: T) -> Self {
        RwLock(StdRwLock::new(t))
    }

    /// Consumes the lock, returning the guarded value.
    ///
    /// # Panics
    ///
    /// The method panics if the lock is poisoned.
    pub fn into_inner(self) -> T {
        self.0.into_inner().expect("acquiring a poisoned rwlock")
    }
}

impl<T: ?Sized> RwLock<T> {
    /// Acquires the lock for shared read access.
    ///
    /// Blocks until no writer holds the lock. Any number of readers may
    /// hold the lock at the same time.
    ///
    /// # Panics
    ///
    /// The method panics if the lock is poisoned. It may also panic or
    /// deadlock if the current thread already holds the write lock: the
    /// lock is not re-entrant.
    pub fn read(&self) -> RwLockReadGuard<T> {
        self.0.read().expect("acquiring a poisoned rwlock")
    }

    /// Acquires the lock for exclusive write access.
    ///
    /// Blocks until there are neither readers nor a writer.
    ///
    /// # Panics
    ///
    /// The method panics if the lock is poisoned. It may also panic or
    /// deadlock if the current thread already holds the lock.
    pub fn write(&self) -> RwLockWriteGuard<T> {
        self.0.write().expect("acquiring a poisoned rwlock")
    }
}


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
    /// # Panics
    ///
    /// The method panics if the lock is poisoned, i.e., if a panic occured
    /// while holding the lock.
    pub fn lock(&self) -> MutexGuard<T> {
        self.0.lock().expect("acquiring a poisoned mutex")
    }
}


//============ Tests =========================================================
