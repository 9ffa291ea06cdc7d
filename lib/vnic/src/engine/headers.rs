// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Wire layouts of the headers the pipeline understands.
//!
//! Every header is a fixed-size, unaligned `repr(C)` struct which can
//! be read from and written to a byte slice directly. Multi-byte
//! logical values use network-endian wrappers; checksums are kept as
//! raw byte pairs (see [`super::checksum`] for why).

use super::checksum::Checksum;
use super::checksum::HeaderChecksum;
use vnic_api::MacAddr;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::byteorder::network_endian::U16;
use zerocopy::byteorder::network_endian::U32;

pub const ETHER_TYPE_IPV4: u16 = 0x0800;
pub const ETHER_TYPE_IPV6: u16 = 0x86DD;
pub const ETHER_TYPE_VLAN: u16 = 0x8100;
/// Transparent Ethernet Bridging, the GRE protocol NVGRE carries.
pub const ETHER_TYPE_TEB: u16 = 0x6558;

pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;
pub const IP_PROTO_GRE: u8 = 47;

pub const ETHER_HDR_LEN: usize = 14;
pub const VLAN_HDR_LEN: usize = 4;
pub const IPV4_HDR_LEN: usize = 20;
pub const IPV6_HDR_LEN: usize = 40;
pub const TCP_HDR_LEN: usize = 20;
pub const UDP_HDR_LEN: usize = 8;
pub const VXLAN_HDR_LEN: usize = 8;
pub const NVGRE_HDR_LEN: usize = 8;

pub const VLAN_VID_MASK: u16 = 0x0FFF;

pub const TCP_FLAG_FIN: u8 = 0x01;
pub const TCP_FLAG_PSH: u8 = 0x08;

const VXLAN_FLAG_VNI: u8 = 0x08;
const NVGRE_FLAG_KEY: u16 = 0x2000;

/// Read a header of type `H` at `off`, if `buf` is long enough.
pub fn read_hdr<H>(buf: &[u8], off: usize) -> Option<H>
where
    H: FromBytes + KnownLayout + Immutable,
{
    let bytes = buf.get(off..)?;
    H::read_from_prefix(bytes).ok().map(|(hdr, _)| hdr)
}

/// Write `hdr` at `off`. Returns `false` if it does not fit.
pub fn write_hdr<H>(buf: &mut [u8], off: usize, hdr: &H) -> bool
where
    H: IntoBytes + Immutable,
{
    let src = hdr.as_bytes();
    match buf.get_mut(off..off + src.len()) {
        Some(dst) => {
            dst.copy_from_slice(src);
            true
        }
        None => false,
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
#[repr(C)]
pub struct EtherHdr {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub ether_type: U16,
}

impl EtherHdr {
    pub fn new(dst: MacAddr, src: MacAddr, ether_type: u16) -> Self {
        Self { dst: dst.bytes(), src: src.bytes(), ether_type: U16::new(ether_type) }
    }

    pub fn dst_mac(&self) -> MacAddr {
        MacAddr::from(self.dst)
    }

    pub fn src_mac(&self) -> MacAddr {
        MacAddr::from(self.src)
    }
}

/// The 802.1Q tag as it follows the Ethernet addresses: TCI plus the
/// encapsulated EtherType.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
#[repr(C)]
pub struct VlanHdr {
    pub tci: U16,
    pub ether_type: U16,
}

impl VlanHdr {
    pub fn vid(&self) -> u16 {
        self.tci.get() & VLAN_VID_MASK
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
#[repr(C)]
pub struct Ipv4Hdr {
    pub ver_ihl: u8,
    pub tos: u8,
    pub total_len: U16,
    pub ident: U16,
    pub frag_off: U16,
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl Ipv4Hdr {
    pub fn version(&self) -> u8 {
        self.ver_ihl >> 4
    }

    /// Header length in bytes, options included.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.ver_ihl & 0x0F) * 4
    }

    /// Compute the checksum over the fixed part of the header.
    ///
    /// Options are not covered; the pipeline never rewrites headers
    /// which carry them.
    pub fn compute_csum(&self) -> [u8; 2] {
        let mut copy = *self;
        copy.csum = [0; 2];
        HeaderChecksum::from(Checksum::compute(copy.as_bytes())).bytes()
    }

    pub fn update_csum(&mut self) {
        self.csum = self.compute_csum();
    }

    /// Does the stored checksum match the header contents?
    pub fn csum_ok(&self) -> bool {
        let mut sum = Checksum::compute(self.as_bytes());
        sum.finalize() == 0xFFFF
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
#[repr(C)]
pub struct Ipv6Hdr {
    pub vtc_flow: U32,
    pub payload_len: U16,
    pub next_hdr: u8,
    pub hop_limit: u8,
    pub src: [u8; 16],
    pub dst: [u8; 16],
}

impl Ipv6Hdr {
    pub fn version(&self) -> u8 {
        (self.vtc_flow.get() >> 28) as u8
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
#[repr(C)]
pub struct TcpHdr {
    pub src_port: U16,
    pub dst_port: U16,
    pub seq: U32,
    pub ack: U32,
    pub data_off: u8,
    pub flags: u8,
    pub window: U16,
    pub csum: [u8; 2],
    pub urg: U16,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
#[repr(C)]
pub struct UdpHdr {
    pub src_port: U16,
    pub dst_port: U16,
    pub len: U16,
    pub csum: [u8; 2],
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
#[repr(C)]
pub struct VxlanHdr {
    pub flags: u8,
    pub rsvd0: [u8; 3],
    pub vni: [u8; 3],
    pub rsvd1: u8,
}

impl VxlanHdr {
    pub fn new(vni: u32) -> Self {
        let b = vni.to_be_bytes();
        Self { flags: VXLAN_FLAG_VNI, rsvd0: [0; 3], vni: [b[1], b[2], b[3]], rsvd1: 0 }
    }

    pub fn is_valid(&self) -> bool {
        self.flags & VXLAN_FLAG_VNI != 0
    }

    pub fn vni(&self) -> u32 {
        u32::from_be_bytes([0, self.vni[0], self.vni[1], self.vni[2]])
    }
}

/// GRE with the key present, as NVGRE uses it: the key carries the
/// 24-bit virtual subnet id and an 8-bit flow id.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
#[repr(C)]
pub struct NvgreHdr {
    pub flags_ver: U16,
    pub proto: U16,
    pub key: U32,
}

impl NvgreHdr {
    pub fn new(vsid: u32, flow_id: u8) -> Self {
        Self {
            flags_ver: U16::new(NVGRE_FLAG_KEY),
            proto: U16::new(ETHER_TYPE_TEB),
            key: U32::new((vsid << 8) | u32::from(flow_id)),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags_ver.get() & NVGRE_FLAG_KEY != 0
            && self.proto.get() == ETHER_TYPE_TEB
    }

    pub fn vsid(&self) -> u32 {
        self.key.get() >> 8
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn layout_sizes() {
        assert_eq!(size_of::<EtherHdr>(), ETHER_HDR_LEN);
        assert_eq!(size_of::<VlanHdr>(), VLAN_HDR_LEN);
        assert_eq!(size_of::<Ipv4Hdr>(), IPV4_HDR_LEN);
        assert_eq!(size_of::<Ipv6Hdr>(), IPV6_HDR_LEN);
        assert_eq!(size_of::<TcpHdr>(), TCP_HDR_LEN);
        assert_eq!(size_of::<UdpHdr>(), UDP_HDR_LEN);
        assert_eq!(size_of::<VxlanHdr>(), VXLAN_HDR_LEN);
        assert_eq!(size_of::<NvgreHdr>(), NVGRE_HDR_LEN);
    }

    #[test]
    fn ipv4_csum() {
        // A header captured off the wire, checksum 0xB861.
        #[rustfmt::skip]
        let raw = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00,
            0x40, 0x11, 0xB8, 0x61, 0xC0, 0xA8, 0x00, 0x01,
            0xC0, 0xA8, 0x00, 0xC7,
        ];
        let mut ip: Ipv4Hdr = read_hdr(&raw, 0).unwrap();
        assert_eq!(ip.version(), 4);
        assert_eq!(ip.hdr_len(), 20);
        assert!(ip.csum_ok());
        assert_eq!(ip.compute_csum(), [0xB8, 0x61]);

        ip.ttl = 63;
        assert!(!ip.csum_ok());
        ip.update_csum();
        assert!(ip.csum_ok());
    }

    #[test]
    fn short_buffers() {
        assert!(read_hdr::<EtherHdr>(&[0u8; 13], 0).is_none());
        assert!(read_hdr::<EtherHdr>(&[0u8; 14], 1).is_none());
        assert!(read_hdr::<EtherHdr>(&[0u8; 14], 20).is_none());

        let mut buf = [0u8; 10];
        assert!(write_hdr(&mut buf, 2, &UdpHdr::default()));
        assert!(!write_hdr(&mut buf, 4, &UdpHdr::default()));
    }

    #[test]
    fn encap_fields() {
        let vx = VxlanHdr::new(0x12_3456);
        assert!(vx.is_valid());
        assert_eq!(vx.vni(), 0x12_3456);

        let gre = NvgreHdr::new(0xAB_CDEF, 7);
        assert!(gre.is_valid());
        assert_eq!(gre.vsid(), 0xAB_CDEF);
    }
}
