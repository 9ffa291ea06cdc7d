// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A frame in flight and the metadata stages hand to each other.

use bitflags::bitflags;
use vnic_api::EndpointId;
use vnic_api::VnicError;

/// Bytes reserved in front of every frame for VLAN insertion and the
/// RSS metadata prepend.
pub const FRAME_HEADROOM: usize = 64;

bitflags! {
    /// Checksum verdicts, as computed by the wire MAC and as reported
    /// to the host.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RxCsum: u8 {
        const L3_OK = 1 << 0;
        const L3_BAD = 1 << 1;
        const L4_OK = 1 << 2;
        const L4_BAD = 1 << 3;
        const INNER_L3_OK = 1 << 4;
        const INNER_L3_BAD = 1 << 5;

        const OUTER = Self::L3_OK.bits()
            | Self::L3_BAD.bits()
            | Self::L4_OK.bits()
            | Self::L4_BAD.bits();
    }
}

bitflags! {
    /// Checksums the wire MAC is asked to fill in on transmit.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct TxCsum: u8 {
        const L3 = 1 << 0;
        const L4 = 1 << 1;
    }
}

/// A segmentation offload request from the host: this frame is
/// segment `seg_idx` of a larger send cut at `mss` bytes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LsoReq {
    pub mss: u16,
    pub seg_idx: u16,
    pub last: bool,
}

/// Scratch state carried with the frame between stages.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AppMeta {
    /// Checksum verdicts from the wire MAC (RX).
    pub wire_csum: RxCsum,
    /// Checksum verdicts handed to the host (RX).
    pub rx_csum: RxCsum,
    /// Checksums the host asked the device to compute (TX).
    pub tx_req: TxCsum,
    /// Checksums the wire MAC must compute (TX).
    pub tx_csum: TxCsum,
    pub lso: Option<LsoReq>,
    /// The host declared the frame encapsulated (TX).
    pub encap: bool,
    /// The VLAN tag removed on receive.
    pub vlan_tci: Option<u16>,
    pub hash: Option<u32>,
    pub queue: u8,
}

#[derive(Clone, Debug)]
pub struct Frame {
    buf: Vec<u8>,
    start: usize,
    len: usize,
    /// The endpoint the frame belongs to: its destination on RX, its
    /// source on TX.
    pub port: EndpointId,
    /// The queue it arrived on.
    pub queue: u8,
    pub orig_len: usize,
    pub meta: AppMeta,
}

impl Frame {
    pub fn new(port: EndpointId, bytes: &[u8]) -> Self {
        Self::with_headroom(port, bytes, FRAME_HEADROOM)
    }

    pub fn with_headroom(
        port: EndpointId,
        bytes: &[u8],
        headroom: usize,
    ) -> Self {
        let mut buf = vec![0; headroom + bytes.len()];
        buf[headroom..].copy_from_slice(bytes);
        Self {
            buf,
            start: headroom,
            len: bytes.len(),
            port,
            queue: 0,
            orig_len: bytes.len(),
            meta: AppMeta::default(),
        }
    }

    /// The frame contents.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[self.start..self.start + self.len]
    }

    /// The whole buffer, headroom included. Header offsets index
    /// into this.
    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    pub fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Offset of the first frame byte within [`Frame::buf`].
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Grow the frame by `n` bytes at the front.
    pub fn push_front(&mut self, n: usize) -> Result<(), VnicError> {
        if n > self.start {
            return Err(VnicError::NoHeadroom {
                needed: n,
                available: self.start,
            });
        }
        self.start -= n;
        self.len += n;
        Ok(())
    }

    /// Shrink the frame by `n` bytes at the front.
    pub fn pull_front(&mut self, n: usize) {
        let n = n.min(self.len);
        self.start += n;
        self.len -= n;
    }

    /// Write `bytes` in front of the frame.
    pub fn prepend(&mut self, bytes: &[u8]) -> Result<(), VnicError> {
        self.push_front(bytes.len())?;
        self.buf[self.start..self.start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}
