// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The internet checksum (RFC 1071).
//!
//! [`Checksum`] is a rolling one's complement sum with deferred
//! carries; [`HeaderChecksum`] is the complemented value as it sits
//! in a header.
//!
//! # Checksums and Endianness
//!
//! The checksum field is a pair of bytes, not a logical integer. The
//! sum treats every pair of bytes as a native-endian `u16` and the
//! result is stored back the same way, so no byte-order conversion is
//! ever performed on it. On a little-endian host both the summed words
//! and the stored result are flipped, which cancels out (RFC 1071
//! section 1.B). Header structs therefore keep checksums as `[u8; 2]`
//! and only this module interprets them.

/// The checksum as stored in a header: one's complement already
/// applied.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderChecksum {
    inner: [u8; 2],
}

impl HeaderChecksum {
    pub fn bytes(&self) -> [u8; 2] {
        self.inner
    }
}

impl From<Checksum> for HeaderChecksum {
    fn from(mut csum: Checksum) -> HeaderChecksum {
        Self { inner: (!csum.finalize()).to_ne_bytes() }
    }
}

/// A rolling one's complement checksum.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    pub fn compute(bytes: &[u8]) -> Self {
        Self { inner: csum_add(0, bytes) }
    }

    /// Fold the carries and return the sum.
    pub fn finalize(&mut self) -> u16 {
        while (self.inner >> 16) != 0 {
            self.inner = (self.inner >> 16) + (self.inner & 0xFFFF);
        }

        (self.inner & 0xFFFF) as u16
    }
}

fn csum_add(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);
    for pair in &mut chunks {
        csum += u32::from(u16::from_ne_bytes([pair[0], pair[1]]));
    }

    if let [last] = chunks.remainder() {
        csum += u32::from(u16::from_ne_bytes([*last, 0]));
    }

    csum
}
