// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Header parsing and the editable header view.
//!
//! [`PktHdrs::parse`] walks a frame from a given offset and records,
//! for each layer it recognises, a copy of the header and the absolute
//! buffer offset it was found at. Parsing never fails: it stops at the
//! first layer it cannot read and reports what it found through
//! [`PktHdrs::present`].
//!
//! Stages edit the copies and mark the layer dirty. Nothing touches
//! the frame bytes until [`PktHdrs::write_back`], which writes exactly
//! the present and dirty layers at their (possibly moved) offsets.

use super::headers::ETHER_HDR_LEN;
use super::headers::ETHER_TYPE_IPV4;
use super::headers::ETHER_TYPE_IPV6;
use super::headers::ETHER_TYPE_VLAN;
use super::headers::EtherHdr;
use super::headers::IP_PROTO_GRE;
use super::headers::IP_PROTO_TCP;
use super::headers::IP_PROTO_UDP;
use super::headers::IPV4_HDR_LEN;
use super::headers::IPV6_HDR_LEN;
use super::headers::Ipv4Hdr;
use super::headers::Ipv6Hdr;
use super::headers::NVGRE_HDR_LEN;
use super::headers::NvgreHdr;
use super::headers::TcpHdr;
use super::headers::UDP_HDR_LEN;
use super::headers::UdpHdr;
use super::headers::VLAN_HDR_LEN;
use super::headers::VXLAN_HDR_LEN;
use super::headers::VlanHdr;
use super::headers::VxlanHdr;
use super::headers::read_hdr;
use super::headers::write_hdr;
use bitflags::bitflags;
use vnic_api::VnicError;
use zerocopy::byteorder::network_endian::U16;

bitflags! {
    /// One bit per header layer, used both for "present" and "dirty".
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct HdrFlags: u16 {
        const O_ETH = 1 << 0;
        const O_VLAN = 1 << 1;
        const O_IP4 = 1 << 2;
        const O_IP6 = 1 << 3;
        const O_TCP = 1 << 4;
        const O_UDP = 1 << 5;
        const E_VXLAN = 1 << 6;
        const E_NVGRE = 1 << 7;
        const I_ETH = 1 << 8;
        const I_IP4 = 1 << 9;
        const I_IP6 = 1 << 10;
        const I_TCP = 1 << 11;
        const I_UDP = 1 << 12;

        const O_L3 = Self::O_IP4.bits() | Self::O_IP6.bits();
        const O_L4 = Self::O_TCP.bits() | Self::O_UDP.bits();
        const ENCAP = Self::E_VXLAN.bits() | Self::E_NVGRE.bits();
        const I_L3 = Self::I_IP4.bits() | Self::I_IP6.bits();
        const I_L4 = Self::I_TCP.bits() | Self::I_UDP.bits();
    }
}

/// The layers of a frame, outermost first.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Layer {
    OuterEth,
    OuterVlan,
    OuterL3,
    OuterL4,
    Encap,
    InnerEth,
    InnerL3,
    InnerL4,
}

impl Layer {
    pub const ALL: [Layer; 8] = [
        Layer::OuterEth,
        Layer::OuterVlan,
        Layer::OuterL3,
        Layer::OuterL4,
        Layer::Encap,
        Layer::InnerEth,
        Layer::InnerL3,
        Layer::InnerL4,
    ];

    fn flags(self) -> HdrFlags {
        match self {
            Self::OuterEth => HdrFlags::O_ETH,
            Self::OuterVlan => HdrFlags::O_VLAN,
            Self::OuterL3 => HdrFlags::O_L3,
            Self::OuterL4 => HdrFlags::O_L4,
            Self::Encap => HdrFlags::ENCAP,
            Self::InnerEth => HdrFlags::I_ETH,
            Self::InnerL3 => HdrFlags::I_L3,
            Self::InnerL4 => HdrFlags::I_L4,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum L3Hdr {
    Ip4(Ipv4Hdr),
    Ip6(Ipv6Hdr),
}

impl L3Hdr {
    pub fn proto(&self) -> u8 {
        match self {
            Self::Ip4(ip) => ip.proto,
            Self::Ip6(ip) => ip.next_hdr,
        }
    }

    /// Source and destination address bytes.
    pub fn addrs(&self) -> (&[u8], &[u8]) {
        match self {
            Self::Ip4(ip) => (&ip.src, &ip.dst),
            Self::Ip6(ip) => (&ip.src, &ip.dst),
        }
    }

    fn write(&self, buf: &mut [u8], off: usize) -> bool {
        match self {
            Self::Ip4(ip) => write_hdr(buf, off, ip),
            Self::Ip6(ip) => write_hdr(buf, off, ip),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum L4Hdr {
    Tcp(TcpHdr),
    Udp(UdpHdr),
}

impl L4Hdr {
    /// Source and destination ports.
    pub fn ports(&self) -> (u16, u16) {
        match self {
            Self::Tcp(tcp) => (tcp.src_port.get(), tcp.dst_port.get()),
            Self::Udp(udp) => (udp.src_port.get(), udp.dst_port.get()),
        }
    }

    pub fn csum(&self) -> [u8; 2] {
        match self {
            Self::Tcp(tcp) => tcp.csum,
            Self::Udp(udp) => udp.csum,
        }
    }

    pub fn set_csum(&mut self, csum: [u8; 2]) {
        match self {
            Self::Tcp(tcp) => tcp.csum = csum,
            Self::Udp(udp) => udp.csum = csum,
        }
    }

    pub fn proto(&self) -> u8 {
        match self {
            Self::Tcp(_) => IP_PROTO_TCP,
            Self::Udp(_) => IP_PROTO_UDP,
        }
    }

    fn write(&self, buf: &mut [u8], off: usize) -> bool {
        match self {
            Self::Tcp(tcp) => write_hdr(buf, off, tcp),
            Self::Udp(udp) => write_hdr(buf, off, udp),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EncapHdr {
    Vxlan(VxlanHdr),
    Nvgre(NvgreHdr),
}

impl EncapHdr {
    fn write(&self, buf: &mut [u8], off: usize) -> bool {
        match self {
            Self::Vxlan(vx) => write_hdr(buf, off, vx),
            Self::Nvgre(gre) => write_hdr(buf, off, gre),
        }
    }
}

/// What the parser should treat as a tunnel.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParseOpts<'a> {
    /// UDP destination ports carrying VXLAN.
    pub vxlan_ports: &'a [u16],
    /// Recognise NVGRE (GRE carrying Ethernet).
    pub nvgre: bool,
    /// Treat any UDP payload as VXLAN, for frames the host has
    /// already declared encapsulated.
    pub force_tunnel: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PktHdrs {
    pub o_eth: Option<EtherHdr>,
    pub o_vlan: Option<VlanHdr>,
    pub o_l3: Option<L3Hdr>,
    pub o_l4: Option<L4Hdr>,
    pub encap: Option<EncapHdr>,
    pub i_eth: Option<EtherHdr>,
    pub i_l3: Option<L3Hdr>,
    pub i_l4: Option<L4Hdr>,
    offsets: [usize; 8],
    dirty: HdrFlags,
}

fn l3_flag(l3: Option<&L3Hdr>, v4: HdrFlags, v6: HdrFlags) -> HdrFlags {
    match l3 {
        Some(L3Hdr::Ip4(_)) => v4,
        Some(L3Hdr::Ip6(_)) => v6,
        None => HdrFlags::empty(),
    }
}

fn l4_flag(l4: Option<&L4Hdr>, tcp: HdrFlags, udp: HdrFlags) -> HdrFlags {
    match l4 {
        Some(L4Hdr::Tcp(_)) => tcp,
        Some(L4Hdr::Udp(_)) => udp,
        None => HdrFlags::empty(),
    }
}

fn parse_l3(buf: &[u8], off: usize, ether_type: u16) -> Option<(L3Hdr, usize)> {
    match ether_type {
        ETHER_TYPE_IPV4 => {
            let ip = read_hdr::<Ipv4Hdr>(buf, off)?;
            let hlen = ip.hdr_len();
            if ip.version() != 4 || hlen < IPV4_HDR_LEN || off + hlen > buf.len()
            {
                return None;
            }
            Some((L3Hdr::Ip4(ip), hlen))
        }

        ETHER_TYPE_IPV6 => {
            let ip = read_hdr::<Ipv6Hdr>(buf, off)?;
            if ip.version() != 6 {
                return None;
            }
            Some((L3Hdr::Ip6(ip), IPV6_HDR_LEN))
        }

        _ => None,
    }
}

fn parse_l4(buf: &[u8], off: usize, l3: &L3Hdr) -> Option<L4Hdr> {
    // Only the first fragment of a datagram carries the transport
    // header.
    if let L3Hdr::Ip4(ip) = l3 {
        if ip.frag_off.get() & 0x1FFF != 0 {
            return None;
        }
    }

    match l3.proto() {
        IP_PROTO_TCP => read_hdr(buf, off).map(L4Hdr::Tcp),
        IP_PROTO_UDP => read_hdr(buf, off).map(L4Hdr::Udp),
        _ => None,
    }
}

impl PktHdrs {
    /// Parse the frame which starts at `offset` in `buf`.
    pub fn parse(buf: &[u8], offset: usize, opts: &ParseOpts) -> Self {
        let mut hdrs = Self::default();

        let Some(eth) = read_hdr::<EtherHdr>(buf, offset) else {
            return hdrs;
        };
        hdrs.o_eth = Some(eth);
        hdrs.offsets[Layer::OuterEth as usize] = offset;
        let mut off = offset + ETHER_HDR_LEN;
        let mut ether_type = eth.ether_type.get();

        if ether_type == ETHER_TYPE_VLAN {
            let Some(vlan) = read_hdr::<VlanHdr>(buf, off) else {
                return hdrs;
            };
            hdrs.o_vlan = Some(vlan);
            hdrs.offsets[Layer::OuterVlan as usize] = off;
            off += VLAN_HDR_LEN;
            ether_type = vlan.ether_type.get();
        }

        let Some((l3, l3_len)) = parse_l3(buf, off, ether_type) else {
            return hdrs;
        };
        hdrs.o_l3 = Some(l3);
        hdrs.offsets[Layer::OuterL3 as usize] = off;
        off += l3_len;

        if l3.proto() == IP_PROTO_GRE {
            if !opts.nvgre {
                return hdrs;
            }
            if let Some(gre) = read_hdr::<NvgreHdr>(buf, off) {
                if gre.is_valid() {
                    hdrs.encap = Some(EncapHdr::Nvgre(gre));
                    hdrs.offsets[Layer::Encap as usize] = off;
                    hdrs.parse_inner(buf, off + NVGRE_HDR_LEN);
                }
            }
            return hdrs;
        }

        let Some(l4) = parse_l4(buf, off, &l3) else {
            return hdrs;
        };
        hdrs.o_l4 = Some(l4);
        hdrs.offsets[Layer::OuterL4 as usize] = off;

        if let L4Hdr::Udp(udp) = l4 {
            let dport = udp.dst_port.get();
            if opts.force_tunnel || opts.vxlan_ports.contains(&dport) {
                let encap_off = off + UDP_HDR_LEN;
                if let Some(vx) = read_hdr::<VxlanHdr>(buf, encap_off) {
                    if vx.is_valid() {
                        hdrs.encap = Some(EncapHdr::Vxlan(vx));
                        hdrs.offsets[Layer::Encap as usize] = encap_off;
                        hdrs.parse_inner(buf, encap_off + VXLAN_HDR_LEN);
                    }
                }
            }
        }

        hdrs
    }

    // Tunnels do not nest: the inner frame is parsed for Ethernet, L3
    // and L4 only.
    fn parse_inner(&mut self, buf: &[u8], offset: usize) {
        let Some(eth) = read_hdr::<EtherHdr>(buf, offset) else {
            return;
        };
        self.i_eth = Some(eth);
        self.offsets[Layer::InnerEth as usize] = offset;
        let off = offset + ETHER_HDR_LEN;

        let Some((l3, l3_len)) = parse_l3(buf, off, eth.ether_type.get())
        else {
            return;
        };
        self.i_l3 = Some(l3);
        self.offsets[Layer::InnerL3 as usize] = off;

        if let Some(l4) = parse_l4(buf, off + l3_len, &l3) {
            self.i_l4 = Some(l4);
            self.offsets[Layer::InnerL4 as usize] = off + l3_len;
        }
    }

    /// The set of layers currently present.
    pub fn present(&self) -> HdrFlags {
        let mut p = HdrFlags::empty();
        p.set(HdrFlags::O_ETH, self.o_eth.is_some());
        p.set(HdrFlags::O_VLAN, self.o_vlan.is_some());
        p |= l3_flag(self.o_l3.as_ref(), HdrFlags::O_IP4, HdrFlags::O_IP6);
        p |= l4_flag(self.o_l4.as_ref(), HdrFlags::O_TCP, HdrFlags::O_UDP);
        p |= match self.encap {
            Some(EncapHdr::Vxlan(_)) => HdrFlags::E_VXLAN,
            Some(EncapHdr::Nvgre(_)) => HdrFlags::E_NVGRE,
            None => HdrFlags::empty(),
        };
        p.set(HdrFlags::I_ETH, self.i_eth.is_some());
        p |= l3_flag(self.i_l3.as_ref(), HdrFlags::I_IP4, HdrFlags::I_IP6);
        p |= l4_flag(self.i_l4.as_ref(), HdrFlags::I_TCP, HdrFlags::I_UDP);
        p
    }

    pub fn dirty(&self) -> HdrFlags {
        self.dirty
    }

    /// Mark layers as edited. Layers which are not present are
    /// ignored, so the dirty set is always a subset of the present
    /// set.
    pub fn mark_dirty(&mut self, flags: HdrFlags) {
        self.dirty |= flags & self.present();
    }

    pub fn is_tunnel(&self) -> bool {
        self.encap.is_some()
    }

    /// The buffer offset of `layer`, if present.
    pub fn offset(&self, layer: Layer) -> Option<usize> {
        if self.present().intersects(layer.flags()) {
            Some(self.offsets[layer as usize])
        } else {
            None
        }
    }

    /// The offsets of all present layers, outermost first.
    pub fn offsets(&self) -> impl Iterator<Item = (Layer, usize)> + '_ {
        Layer::ALL.into_iter().filter_map(move |l| self.offset(l).map(|o| (l, o)))
    }

    /// The VLAN tag control information, if the frame is tagged.
    pub fn tci(&self) -> Option<u16> {
        self.o_vlan.map(|v| v.tci.get())
    }

    /// Remove the outer VLAN tag, returning its TCI.
    ///
    /// The Ethernet header moves forward by four bytes so that, once
    /// written back, it overwrites the tag. The caller must advance
    /// the frame start by the same amount.
    pub fn vlan_strip(&mut self) -> Option<u16> {
        let eth = self.o_eth.as_mut()?;
        let vlan = self.o_vlan.take()?;
        eth.ether_type = vlan.ether_type;
        self.offsets[Layer::OuterEth as usize] += VLAN_HDR_LEN;
        self.dirty.remove(HdrFlags::O_VLAN);
        self.dirty |= HdrFlags::O_ETH;
        Some(vlan.tci.get())
    }

    /// Insert an outer VLAN tag carrying `tci`.
    ///
    /// The Ethernet header moves back by four bytes, into headroom the
    /// caller must have reserved. Returns `false` without change when
    /// the frame is already tagged or has no Ethernet header.
    pub fn vlan_insert(&mut self, tci: u16) -> Result<bool, VnicError> {
        if self.o_vlan.is_some() {
            return Ok(false);
        }
        let eth_off = self.offsets[Layer::OuterEth as usize];
        let Some(eth) = self.o_eth.as_mut() else {
            return Ok(false);
        };
        if eth_off < VLAN_HDR_LEN {
            return Err(VnicError::NoHeadroom {
                needed: VLAN_HDR_LEN,
                available: eth_off,
            });
        }

        self.o_vlan =
            Some(VlanHdr { tci: U16::new(tci), ether_type: eth.ether_type });
        eth.ether_type = U16::new(ETHER_TYPE_VLAN);
        let new_off = eth_off - VLAN_HDR_LEN;
        self.offsets[Layer::OuterEth as usize] = new_off;
        self.offsets[Layer::OuterVlan as usize] = new_off + ETHER_HDR_LEN;
        self.dirty |= HdrFlags::O_ETH | HdrFlags::O_VLAN;
        Ok(true)
    }

    /// Write every present, dirty layer into `buf` and clear the
    /// dirty set. Returns the layers written.
    pub fn write_back(&mut self, buf: &mut [u8]) -> HdrFlags {
        let todo = self.dirty & self.present();
        let mut written = HdrFlags::empty();

        for layer in Layer::ALL {
            let flags = layer.flags() & todo;
            if flags.is_empty() {
                continue;
            }

            let off = self.offsets[layer as usize];
            let ok = match layer {
                Layer::OuterEth => {
                    self.o_eth.is_some_and(|h| write_hdr(buf, off, &h))
                }
                Layer::OuterVlan => {
                    self.o_vlan.is_some_and(|h| write_hdr(buf, off, &h))
                }
                Layer::OuterL3 => self.o_l3.is_some_and(|h| h.write(buf, off)),
                Layer::OuterL4 => self.o_l4.is_some_and(|h| h.write(buf, off)),
                Layer::Encap => self.encap.is_some_and(|h| h.write(buf, off)),
                Layer::InnerEth => {
                    self.i_eth.is_some_and(|h| write_hdr(buf, off, &h))
                }
                Layer::InnerL3 => self.i_l3.is_some_and(|h| h.write(buf, off)),
                Layer::InnerL4 => self.i_l4.is_some_and(|h| h.write(buf, off)),
            };

            if ok {
                written |= flags;
            }
        }

        self.dirty = HdrFlags::empty();
        written
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use vnic_api::MacAddr;
    use vnic_api::VXLAN_PORT;
    use zerocopy::IntoBytes;

    const SRC: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 0x01]);
    const DST: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 0x02]);

    fn ipv4(proto: u8, payload_len: usize) -> Ipv4Hdr {
        let mut ip = Ipv4Hdr {
            ver_ihl: 0x45,
            ttl: 64,
            proto,
            total_len: U16::new((IPV4_HDR_LEN + payload_len) as u16),
            src: [10, 0, 0, 1],
            dst: [10, 0, 0, 2],
            ..Default::default()
        };
        ip.update_csum();
        ip
    }

    fn udp(dport: u16, payload_len: usize) -> UdpHdr {
        UdpHdr {
            src_port: U16::new(40000),
            dst_port: U16::new(dport),
            len: U16::new((UDP_HDR_LEN + payload_len) as u16),
            csum: [0; 2],
        }
    }

    // Ethernet, optional tag, IPv4, UDP to `dport`, then `payload`.
    fn udp_frame(tci: Option<u16>, dport: u16, payload: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        match tci {
            Some(tci) => {
                v.extend_from_slice(
                    EtherHdr::new(DST, SRC, ETHER_TYPE_VLAN).as_bytes(),
                );
                let tag = VlanHdr {
                    tci: U16::new(tci),
                    ether_type: U16::new(ETHER_TYPE_IPV4),
                };
                v.extend_from_slice(tag.as_bytes());
            }
            None => v.extend_from_slice(
                EtherHdr::new(DST, SRC, ETHER_TYPE_IPV4).as_bytes(),
            ),
        }
        let l4_len = UDP_HDR_LEN + payload.len();
        v.extend_from_slice(ipv4(IP_PROTO_UDP, l4_len).as_bytes());
        v.extend_from_slice(udp(dport, payload.len()).as_bytes());
        v.extend_from_slice(payload);
        v
    }

    fn vxlan_frame(dport: u16) -> Vec<u8> {
        let inner = udp_frame(None, 53, b"inner");
        let mut payload = VxlanHdr::new(77).as_bytes().to_vec();
        payload.extend_from_slice(&inner);
        udp_frame(None, dport, &payload)
    }

    #[test]
    fn plain_udp() {
        let buf = udp_frame(None, 53, b"hello");
        let hdrs = PktHdrs::parse(&buf, 0, &ParseOpts::default());
        assert_eq!(
            hdrs.present(),
            HdrFlags::O_ETH | HdrFlags::O_IP4 | HdrFlags::O_UDP
        );
        assert_eq!(hdrs.offset(Layer::OuterEth), Some(0));
        assert_eq!(hdrs.offset(Layer::OuterL3), Some(14));
        assert_eq!(hdrs.offset(Layer::OuterL4), Some(34));
        assert_eq!(hdrs.offset(Layer::OuterVlan), None);
        assert_eq!(hdrs.o_l4.map(|l4| l4.ports()), Some((40000, 53)));
        assert!(!hdrs.is_tunnel());
    }

    #[test]
    fn tagged_frame() {
        let buf = udp_frame(Some(0x2064), 53, b"hello");
        let hdrs = PktHdrs::parse(&buf, 0, &ParseOpts::default());
        assert!(hdrs.present().contains(HdrFlags::O_VLAN | HdrFlags::O_UDP));
        assert_eq!(hdrs.tci(), Some(0x2064));
        assert_eq!(hdrs.o_vlan.map(|v| v.vid()), Some(0x064));
        assert_eq!(hdrs.offset(Layer::OuterL3), Some(18));
    }

    #[test]
    fn vxlan_only_on_configured_ports() {
        let buf = vxlan_frame(VXLAN_PORT);

        let hdrs = PktHdrs::parse(&buf, 0, &ParseOpts::default());
        assert!(!hdrs.is_tunnel());

        let ports = [VXLAN_PORT];
        let opts = ParseOpts { vxlan_ports: &ports, ..Default::default() };
        let hdrs = PktHdrs::parse(&buf, 0, &opts);
        assert!(hdrs.is_tunnel());
        assert!(hdrs.present().contains(
            HdrFlags::E_VXLAN | HdrFlags::I_ETH | HdrFlags::I_IP4 | HdrFlags::I_UDP
        ));
        assert_eq!(hdrs.offset(Layer::Encap), Some(42));
        assert_eq!(hdrs.offset(Layer::InnerEth), Some(50));
        assert_eq!(hdrs.i_l4.map(|l4| l4.ports()), Some((40000, 53)));

        // The host may declare a frame encapsulated regardless of port.
        let buf = vxlan_frame(9999);
        let opts = ParseOpts { force_tunnel: true, ..Default::default() };
        assert!(PktHdrs::parse(&buf, 0, &opts).is_tunnel());
    }

    #[test]
    fn nvgre() {
        let inner = udp_frame(None, 53, b"inner");
        let mut buf = EtherHdr::new(DST, SRC, ETHER_TYPE_IPV4).as_bytes().to_vec();
        buf.extend_from_slice(
            ipv4(IP_PROTO_GRE, NVGRE_HDR_LEN + inner.len()).as_bytes(),
        );
        buf.extend_from_slice(NvgreHdr::new(0x1234, 0).as_bytes());
        buf.extend_from_slice(&inner);

        let hdrs = PktHdrs::parse(&buf, 0, &ParseOpts::default());
        assert!(!hdrs.is_tunnel());
        assert_eq!(hdrs.present(), HdrFlags::O_ETH | HdrFlags::O_IP4);

        let opts = ParseOpts { nvgre: true, ..Default::default() };
        let hdrs = PktHdrs::parse(&buf, 0, &opts);
        assert!(hdrs.present().contains(HdrFlags::E_NVGRE | HdrFlags::I_UDP));
        assert_eq!(hdrs.offset(Layer::InnerEth), Some(42));
    }

    #[test]
    fn truncated_frames_stop_early() {
        let buf = udp_frame(None, 53, b"");
        let hdrs = PktHdrs::parse(&buf[..20], 0, &ParseOpts::default());
        assert_eq!(hdrs.present(), HdrFlags::O_ETH);

        let hdrs = PktHdrs::parse(&buf[..10], 0, &ParseOpts::default());
        assert_eq!(hdrs.present(), HdrFlags::empty());
        assert_eq!(hdrs.offsets().count(), 0);
    }

    #[test]
    fn offsets_strictly_increase() {
        let buf = vxlan_frame(VXLAN_PORT);
        let ports = [VXLAN_PORT];
        let opts = ParseOpts { vxlan_ports: &ports, ..Default::default() };
        let hdrs = PktHdrs::parse(&buf, 0, &opts);
        let offs: Vec<usize> = hdrs.offsets().map(|(_, o)| o).collect();
        assert_eq!(offs.len(), 7);
        assert!(offs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn write_back_without_edits_is_identity() {
        let orig = vxlan_frame(VXLAN_PORT);
        let mut buf = orig.clone();
        let ports = [VXLAN_PORT];
        let opts = ParseOpts { vxlan_ports: &ports, ..Default::default() };
        let mut hdrs = PktHdrs::parse(&buf, 0, &opts);

        assert_eq!(hdrs.write_back(&mut buf), HdrFlags::empty());
        assert_eq!(buf, orig);

        hdrs.mark_dirty(HdrFlags::all());
        assert_eq!(hdrs.dirty(), hdrs.present());
        assert_eq!(hdrs.write_back(&mut buf), hdrs.present());
        assert_eq!(buf, orig);
        assert_eq!(hdrs.dirty(), HdrFlags::empty());
    }

    #[test]
    fn dirty_never_exceeds_present() {
        let buf = udp_frame(None, 53, b"x");
        let mut hdrs = PktHdrs::parse(&buf, 0, &ParseOpts::default());
        hdrs.mark_dirty(HdrFlags::O_VLAN | HdrFlags::I_TCP | HdrFlags::O_IP4);
        assert_eq!(hdrs.dirty(), HdrFlags::O_IP4);
    }

    #[test]
    fn strip_then_insert_round_trip() {
        let tagged = udp_frame(Some(0x0005), 53, b"payload");
        let untagged = udp_frame(None, 53, b"payload");

        let mut buf = tagged.clone();
        let mut hdrs = PktHdrs::parse(&buf, 0, &ParseOpts::default());
        let l3_off = hdrs.offset(Layer::OuterL3);
        assert_eq!(hdrs.vlan_strip(), Some(0x0005));
        assert_eq!(hdrs.offset(Layer::OuterEth), Some(VLAN_HDR_LEN));
        assert_eq!(hdrs.offset(Layer::OuterVlan), None);
        assert_eq!(hdrs.offset(Layer::OuterL3), l3_off);
        assert_eq!(hdrs.dirty(), HdrFlags::O_ETH);
        hdrs.write_back(&mut buf);
        assert_eq!(&buf[VLAN_HDR_LEN..], &untagged[..]);

        // A second strip finds nothing.
        assert_eq!(hdrs.vlan_strip(), None);

        assert!(hdrs.vlan_insert(0x0005).unwrap());
        assert_eq!(hdrs.offset(Layer::OuterEth), Some(0));
        assert_eq!(hdrs.offset(Layer::OuterVlan), Some(ETHER_HDR_LEN));
        hdrs.write_back(&mut buf);
        assert_eq!(buf, tagged);

        // Already tagged: nothing to do.
        assert!(!hdrs.vlan_insert(0x0007).unwrap());
        assert_eq!(hdrs.tci(), Some(0x0005));
    }

    #[test]
    fn insert_needs_headroom() {
        let buf = udp_frame(None, 53, b"payload");
        let mut hdrs = PktHdrs::parse(&buf, 0, &ParseOpts::default());
        assert!(matches!(
            hdrs.vlan_insert(1),
            Err(VnicError::NoHeadroom { needed: 4, available: 0 })
        ));
        assert!(hdrs.o_vlan.is_none());
    }
}
