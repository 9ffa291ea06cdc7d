// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A versioned, copy-on-write holder for state read by every worker
//! and written only by the configuration path.
//!
//! Readers take a [`Snapshot`]: a reference counted pointer to an
//! immutable value and the epoch at which it was published. Writers
//! build a complete new value off to the side and swap it in, so a
//! reader sees either the old value or the new one, never a mix.

use crate::ddi::sync::KMutex;
use crate::ddi::sync::KRwLock;
use std::fmt::Debug;
use std::ops::Deref;
use std::sync::Arc;

#[derive(Clone)]
pub struct Dynamic<T>(Arc<InnerDynamic<T>>);

struct InnerDynamic<T> {
    current: KRwLock<Snapshot<T>>,
    // Serializes writers so that two read-modify-write cycles cannot
    // interleave and lose an update.
    writer: KMutex<()>,
}

#[derive(Debug)]
pub struct Snapshot<T> {
    pub value: Arc<T>,
    pub epoch: u64,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self { value: Arc::clone(&self.value), epoch: self.epoch }
    }
}

impl<T> From<T> for Dynamic<T> {
    fn from(value: T) -> Self {
        let snap = Snapshot { value: Arc::new(value), epoch: 0 };
        Self(Arc::new(InnerDynamic {
            current: KRwLock::new(snap),
            writer: KMutex::new(()),
        }))
    }
}

impl<T> Dynamic<T> {
    /// Replace the current value, returning the new epoch.
    pub fn store(&self, value: T) -> u64 {
        let _w = self.0.writer.lock();
        self.publish(value)
    }

    pub fn load(&self) -> Snapshot<T> {
        self.0.current.read().clone()
    }

    pub fn epoch(&self) -> u64 {
        self.0.current.read().epoch
    }

    fn publish(&self, value: T) -> u64 {
        let mut cur = self.0.current.write();
        let epoch = cur.epoch + 1;
        *cur = Snapshot { value: Arc::new(value), epoch };
        epoch
    }
}

impl<T: Clone> Dynamic<T> {
    /// Copy the current value, let `f` edit the copy, and publish it.
    ///
    /// If `f` fails nothing is published and the error is returned;
    /// readers never observe a partially applied edit.
    pub fn update<F, R, E>(&self, f: F) -> Result<(R, Snapshot<T>), E>
    where
        F: FnOnce(&mut T) -> Result<R, E>,
    {
        let _w = self.0.writer.lock();
        let mut next = T::clone(&self.load().value);
        let res = f(&mut next)?;
        self.publish(next);
        Ok((res, self.load()))
    }
}

impl<T: Debug> Debug for Dynamic<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current_val = self.load();
        write!(f, "{current_val:?}")
    }
}

impl<T> Deref for Snapshot<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}
