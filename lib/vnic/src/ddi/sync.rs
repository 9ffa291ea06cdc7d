// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Synchronization primitives used by the engine.
//!
//! These wrap the `std` primitives behind the small API the engine
//! needs. A poisoned lock is recovered and used.

use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

/// A mutex protecting a value of type `T`.
///
/// All access goes through the [`KMutexGuard`] returned by
/// [`KMutex::lock`]; the lock is released when the guard is dropped.
#[derive(Debug, Default)]
pub struct KMutex<T> {
    inner: Mutex<T>,
}

pub struct KMutexGuard<'a, T: 'a> {
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for KMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for KMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

impl<T> KMutex<T> {
    pub fn into_inner(self) -> T {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    pub const fn new(val: T) -> Self {
        KMutex { inner: Mutex::new(val) }
    }

    pub fn lock(&self) -> KMutexGuard<'_, T> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        KMutexGuard { guard }
    }
}

/// A reader/writer lock protecting a value of type `T`.
#[derive(Debug, Default)]
pub struct KRwLock<T> {
    inner: RwLock<T>,
}

pub struct KRwLockReadGuard<'a, T: 'a> {
    guard: RwLockReadGuard<'a, T>,
}

pub struct KRwLockWriteGuard<'a, T: 'a> {
    guard: RwLockWriteGuard<'a, T>,
}

impl<T> Deref for KRwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> Deref for KRwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for KRwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

impl<T> KRwLock<T> {
    pub fn into_inner(self) -> T {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    pub const fn new(val: T) -> Self {
        KRwLock { inner: RwLock::new(val) }
    }

    pub fn read(&self) -> KRwLockReadGuard<'_, T> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        KRwLockReadGuard { guard }
    }

    pub fn write(&self) -> KRwLockWriteGuard<'_, T> {
        let guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        KRwLockWriteGuard { guard }
    }
}

/// A condition variable paired with a [`KMutex`].
#[derive(Debug, Default)]
pub struct KCondvar {
    cv: Condvar,
}

impl KCondvar {
    pub fn new() -> Self {
        Self { cv: Condvar::new() }
    }

    pub fn notify_all(&self) {
        self.cv.notify_all()
    }

    /// Release the lock, sleep until notified, and reacquire it.
    ///
    /// Spurious wakeups are possible; callers re-check their
    /// condition in a loop.
    pub fn wait<'a, T: 'a>(
        &self,
        lock: KMutexGuard<'a, T>,
    ) -> KMutexGuard<'a, T> {
        let guard =
            self.cv.wait(lock.guard).unwrap_or_else(PoisonError::into_inner);
        KMutexGuard { guard }
    }

    /// Like [`KCondvar::wait`], but give up after `dur`. The boolean
    /// is `true` when the wait timed out.
    pub fn wait_timeout<'a, T: 'a>(
        &self,
        lock: KMutexGuard<'a, T>,
        dur: std::time::Duration,
    ) -> (KMutexGuard<'a, T>, bool) {
        let (guard, res) = self
            .cv
            .wait_timeout(lock.guard, dur)
            .unwrap_or_else(PoisonError::into_inner);
        (KMutexGuard { guard }, res.timed_out())
    }
}
