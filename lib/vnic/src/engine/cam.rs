// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The MAC address table.
//!
//! A fixed-capacity, bucketed associative table in the style of a
//! hardware CAM: the CRC-32 of the address picks a bucket, and the
//! address may live in any of that bucket's ways. There is no
//! eviction. An insert of a new address into a full bucket fails with
//! [`VnicError::TableOverflow`] and leaves the table unchanged.

use vnic_api::MacAddr;
use vnic_api::VnicError;

/// Ways per bucket.
pub const CAM_WAYS: usize = 4;

pub const DEF_CAM_BUCKETS: usize = 256;

/// The most buckets a table may have.
pub const MAX_CAM_BUCKETS: usize = 1 << 16;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CamEntry {
    pub key: MacAddr,
    pub value: u32,
    pub used: bool,
}

#[derive(Clone, Debug)]
pub struct MacTable {
    buckets: Vec<[CamEntry; CAM_WAYS]>,
    len: usize,
}

impl Default for MacTable {
    fn default() -> Self {
        Self::new(DEF_CAM_BUCKETS)
    }
}

impl MacTable {
    /// Create a table with `nbuckets` buckets, rounded up to a power
    /// of two and clamped to [`MAX_CAM_BUCKETS`].
    pub fn new(nbuckets: usize) -> Self {
        let n = nbuckets.clamp(1, MAX_CAM_BUCKETS).next_power_of_two();
        Self { buckets: vec![[CamEntry::default(); CAM_WAYS]; n], len: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len() * CAM_WAYS
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_idx(&self, key: MacAddr) -> usize {
        crc32fast::hash(&key.bytes()) as usize & (self.buckets.len() - 1)
    }

    pub fn entry(&self, key: MacAddr) -> Option<&CamEntry> {
        self.buckets[self.bucket_idx(key)]
            .iter()
            .find(|e| e.used && e.key == key)
    }

    pub fn lookup(&self, key: MacAddr) -> Option<u32> {
        self.entry(key).map(|e| e.value)
    }

    /// Insert or overwrite the value for `key`.
    pub fn insert(&mut self, key: MacAddr, value: u32) -> Result<(), VnicError> {
        let capacity = self.capacity() as u32;
        let idx = self.bucket_idx(key);
        let bucket = &mut self.buckets[idx];

        if let Some(e) = bucket.iter_mut().find(|e| e.used && e.key == key) {
            e.value = value;
            return Ok(());
        }

        match bucket.iter_mut().find(|e| !e.used) {
            Some(e) => {
                *e = CamEntry { key, value, used: true };
                self.len += 1;
                Ok(())
            }

            None => Err(VnicError::TableOverflow { capacity }),
        }
    }

    pub fn remove(&mut self, key: MacAddr) -> Option<u32> {
        let idx = self.bucket_idx(key);
        let e = self.buckets[idx].iter_mut().find(|e| e.used && e.key == key)?;
        let value = e.value;
        *e = CamEntry::default();
        self.len -= 1;
        Some(value)
    }

    /// Remove every entry whose value is `value`.
    pub fn remove_value(&mut self, value: u32) -> usize {
        let mut n = 0;
        for e in self.buckets.iter_mut().flatten() {
            if e.used && e.value == value {
                *e = CamEntry::default();
                n += 1;
            }
        }
        self.len -= n;
        n
    }

    pub fn iter(&self) -> impl Iterator<Item = &CamEntry> {
        self.buckets.iter().flatten().filter(|e| e.used)
    }
}
