// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Safe abstractions for synchronization primitives.
//!
//! We name these `KMutex`, `KRwLock`, and `KCondvar` on purpose. The
//! engine is written against the narrow API a kernel offers (enter,
//! exit, wait, signal, broadcast) and these types expose exactly
//! that, backed by the std primitives. Lock poisoning is treated as
//! fatal: a panic while holding an engine lock leaves session state
//! in an unknown shape.
use core::ops::Deref;
use core::ops::DerefMut;
use core::time::Duration;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::RwLock;

pub struct KMutex<T> {
    inner: Mutex<T>,
}

pub struct KMutexGuard<'a, T: 'a> {
    guard: std::sync::MutexGuard<'a, T>,
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
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.inner.into_inner().unwrap()
    }

    /// Wrap `val` in a new mutex. All access from here on out must be
    /// done by acquiring a `KMutexGuard` via the `lock()` method.
    pub fn new(val: T) -> Self {
        KMutex { inner: Mutex::new(val) }
    }

    /// Acquire the guard, blocking if it is currently held. The mutex
    /// is released when the guard is dropped.
    pub fn lock(&self) -> KMutexGuard<'_, T> {
        let guard = self.inner.lock().unwrap();
        KMutexGuard { guard }
    }
}

pub struct KRwLock<T> {
    inner: RwLock<T>,
}

pub struct KRwLockReadGuard<'a, T: 'a> {
    guard: std::sync::RwLockReadGuard<'a, T>,
}

pub struct KRwLockWriteGuard<'a, T: 'a> {
    guard: std::sync::RwLockWriteGuard<'a, T>,
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
    pub fn new(val: T) -> Self {
        KRwLock { inner: RwLock::new(val) }
    }

    pub fn read(&self) -> KRwLockReadGuard<'_, T> {
        let guard = self.inner.read().unwrap();
        KRwLockReadGuard { guard }
    }

    pub fn write(&self) -> KRwLockWriteGuard<'_, T> {
        let guard = self.inner.write().unwrap();
        KRwLockWriteGuard { guard }
    }
}

#[derive(Default)]
pub struct KCondvar {
    cv: Condvar,
}

impl KCondvar {
    pub fn new() -> Self {
        Self { cv: Condvar::new() }
    }

    pub fn notify_one(&self) {
        self.cv.notify_one()
    }

    pub fn notify_all(&self) {
        self.cv.notify_all()
    }

    pub fn wait<'a, T: 'a>(
        &self,
        lock: KMutexGuard<'a, T>,
    ) -> KMutexGuard<'a, T> {
        KMutexGuard { guard: self.cv.wait(lock.guard).unwrap() }
    }

    /// Like `wait()`, but give up after `timeout`. The second value
    /// is `true` if the timeout elapsed.
    pub fn wait_timeout<'a, T: 'a>(
        &self,
        lock: KMutexGuard<'a, T>,
        timeout: Duration,
    ) -> (KMutexGuard<'a, T>, bool) {
        let (guard, res) = self.cv.wait_timeout(lock.guard, timeout).unwrap();
        (KMutexGuard { guard }, res.timed_out())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn notify_all_wakes_every_waiter() {
        let state = Arc::new((KMutex::new(false), KCondvar::new()));
        let mut handles = vec![];

        for _ in 0..4 {
            let state = state.clone();
            handles.push(thread::spawn(move || {
                let (lock, cv) = &*state;
                let mut go = lock.lock();
                while !*go {
                    go = cv.wait(go);
                }
            }));
        }

        {
            let (lock, cv) = &*state;
            *lock.lock() = true;
            cv.notify_all();
        }

        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn wait_timeout_elapses() {
        let lock = KMutex::new(());
        let cv = KCondvar::new();
        let (_guard, timed_out) =
            cv.wait_timeout(lock.lock(), Duration::from_millis(10));
        assert!(timed_out);
    }
}
