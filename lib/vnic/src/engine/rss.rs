// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Receive side scaling.
//!
//! The hash is Toeplitz over the addresses, plus the ports when the
//! traffic class enables them. For tunnelled frames the inner headers
//! are used when [`RssHashTypes::INNER`] is set and an inner L3 header
//! was parsed.

use super::parse::L3Hdr;
use super::parse::L4Hdr;
use super::parse::PktHdrs;
use vnic_api::RssCfg;
use vnic_api::RssHashTypes;

/// Size of the metadata prepended in front of a hashed frame.
pub const RSS_META_LEN: usize = 8;

const META_HASH: u32 = 1;
const META_FIELD_SIZE: u32 = 4;

/// The hash type reported to the host.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum RssHashType {
    Ipv4 = 1,
    Ipv6 = 2,
    Ipv4Tcp = 4,
    Ipv6Tcp = 5,
    Ipv4Udp = 7,
    Ipv6Udp = 8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RssResult {
    /// No enabled field was present; the frame keeps the default
    /// queue.
    NoHash,
    Hash { hash: u32, hash_type: RssHashType, queue: u8 },
}

impl RssResult {
    pub fn queue(&self) -> u8 {
        match self {
            Self::NoHash => 0,
            Self::Hash { queue, .. } => *queue,
        }
    }
}

/// The Toeplitz hash of `input` under `key`.
///
/// The key must be at least four bytes longer than the input; missing
/// key bits read as zero.
pub fn toeplitz(key: &[u8], input: &[u8]) -> u32 {
    let key_bit = |i: usize| -> u32 {
        key.get(i / 8).map_or(0, |b| u32::from((b >> (7 - i % 8)) & 1))
    };

    let mut window = (0..32).fold(0u32, |w, i| (w << 1) | key_bit(i));
    let mut hash = 0;

    for (i, byte) in input.iter().enumerate() {
        for bit in 0..8 {
            if byte & (0x80 >> bit) != 0 {
                hash ^= window;
            }
            window = (window << 1) | key_bit(i * 8 + bit + 32);
        }
    }

    hash
}

/// The two big-endian words prepended to a hashed frame.
pub fn meta_bytes(hash_type: RssHashType, hash: u32) -> [u8; RSS_META_LEN] {
    let word0 = (u32::from(hash_type as u8) << META_FIELD_SIZE) | META_HASH;
    let mut out = [0u8; RSS_META_LEN];
    out[..4].copy_from_slice(&word0.to_be_bytes());
    out[4..].copy_from_slice(&hash.to_be_bytes());
    out
}

fn select<'a>(
    hdrs: &'a PktHdrs,
    types: RssHashTypes,
) -> Option<(&'a L3Hdr, Option<&'a L4Hdr>)> {
    if hdrs.is_tunnel() && types.contains(RssHashTypes::INNER) {
        if let Some(l3) = hdrs.i_l3.as_ref() {
            return Some((l3, hdrs.i_l4.as_ref()));
        }
    }
    hdrs.o_l3.as_ref().map(|l3| (l3, hdrs.o_l4.as_ref()))
}

/// Hash the frame and pick its queue.
pub fn classify(hdrs: &PktHdrs, cfg: &RssCfg) -> RssResult {
    use RssHashType::*;

    let types = cfg.hash_types;
    let Some((l3, l4)) = select(hdrs, types) else {
        return RssResult::NoHash;
    };

    let v4 = matches!(l3, L3Hdr::Ip4(_));
    let with_ports = match l4 {
        Some(L4Hdr::Tcp(_)) if v4 && types.contains(RssHashTypes::IPV4_TCP) => {
            Some(Ipv4Tcp)
        }
        Some(L4Hdr::Tcp(_)) if !v4 && types.contains(RssHashTypes::IPV6_TCP) => {
            Some(Ipv6Tcp)
        }
        Some(L4Hdr::Udp(_)) if v4 && types.contains(RssHashTypes::IPV4_UDP) => {
            Some(Ipv4Udp)
        }
        Some(L4Hdr::Udp(_)) if !v4 && types.contains(RssHashTypes::IPV6_UDP) => {
            Some(Ipv6Udp)
        }
        _ => None,
    };

    let hash_type = match with_ports {
        Some(ht) => ht,
        None if v4 && types.contains(RssHashTypes::IPV4) => Ipv4,
        None if !v4 && types.contains(RssHashTypes::IPV6) => Ipv6,
        None => return RssResult::NoHash,
    };

    let (src, dst) = l3.addrs();
    let mut input = Vec::with_capacity(36);
    input.extend_from_slice(src);
    input.extend_from_slice(dst);
    if let (Some(_), Some(l4)) = (with_ports, l4) {
        let (sport, dport) = l4.ports();
        input.extend_from_slice(&sport.to_be_bytes());
        input.extend_from_slice(&dport.to_be_bytes());
    }

    let hash = toeplitz(&cfg.key, &input);
    RssResult::Hash { hash, hash_type, queue: cfg.queue_for(hash) }
}
