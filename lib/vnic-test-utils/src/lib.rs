// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.
//!
//! Frames are built with `smoltcp`'s wire types so that they are
//! independent of the parser under test.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

pub mod pcap;

use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::EthernetAddress;
use smoltcp::wire::EthernetFrame;
use smoltcp::wire::EthernetProtocol;
use smoltcp::wire::EthernetRepr;
use smoltcp::wire::IpAddress;
use smoltcp::wire::IpProtocol;
use smoltcp::wire::Ipv4Address;
use smoltcp::wire::Ipv4Packet;
use smoltcp::wire::Ipv4Repr;
use smoltcp::wire::Ipv6Address;
use smoltcp::wire::Ipv6Packet;
use smoltcp::wire::Ipv6Repr;
use smoltcp::wire::TcpPacket;
use smoltcp::wire::TcpSeqNumber;
use smoltcp::wire::UdpPacket;
pub use std::net::IpAddr;
pub use std::net::Ipv4Addr;
pub use std::net::Ipv6Addr;
pub use std::sync::Arc;

// Let's make our lives easier and pub use a bunch of stuff.
pub use vnic::ExecCtx;
pub use vnic::api::*;
pub use vnic::dynamic::Dynamic;
pub use vnic::engine::Decision;
pub use vnic::engine::DeliveryError;
pub use vnic::engine::Destination;
pub use vnic::engine::Outcome;
pub use vnic::engine::Transport;
pub use vnic::engine::frame::Frame;
pub use vnic::engine::frame::LsoReq;
pub use vnic::engine::frame::RxCsum;
pub use vnic::engine::frame::TxCsum;
pub use vnic::engine::nic::NicState;
pub use vnic::engine::stat::CounterKey;
pub use vnic::engine::stat::CounterKind;
pub use vnic::engine::stat::MemStats;
pub use vnic::provider::NullLog;
pub use vnic::provider::PrintlnLog;

pub const GUEST_MAC: MacAddr = MacAddr::from_const([0xA8, 0x40, 0x25, 0xF7, 0x00, 0x01]);
pub const GUEST_MAC2: MacAddr = MacAddr::from_const([0xA8, 0x40, 0x25, 0xF7, 0x00, 0x02]);
pub const REMOTE_MAC: MacAddr = MacAddr::from_const([0xA8, 0x40, 0x25, 0xF0, 0x00, 0x09]);

pub const GUEST_IP4: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
pub const REMOTE_IP4: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 77);
pub const GUEST_IP6: Ipv6Addr = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 5);
pub const REMOTE_IP6: Ipv6Addr = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 77);

/// The L2 and L3 addresses of a frame.
#[derive(Clone, Copy, Debug)]
pub struct Addrs {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
}

impl Addrs {
    /// Wire to guest over IPv4.
    pub fn inbound4() -> Self {
        Self {
            src_mac: REMOTE_MAC,
            dst_mac: GUEST_MAC,
            src_ip: REMOTE_IP4.into(),
            dst_ip: GUEST_IP4.into(),
        }
    }

    /// Guest to wire over IPv4.
    pub fn outbound4() -> Self {
        Self {
            src_mac: GUEST_MAC,
            dst_mac: REMOTE_MAC,
            src_ip: GUEST_IP4.into(),
            dst_ip: REMOTE_IP4.into(),
        }
    }

    pub fn inbound6() -> Self {
        Self {
            src_ip: REMOTE_IP6.into(),
            dst_ip: GUEST_IP6.into(),
            ..Self::inbound4()
        }
    }

    pub fn outbound6() -> Self {
        Self {
            src_ip: GUEST_IP6.into(),
            dst_ip: REMOTE_IP6.into(),
            ..Self::outbound4()
        }
    }

    fn smol_ips(&self) -> (IpAddress, IpAddress) {
        (smol_ip(self.src_ip), smol_ip(self.dst_ip))
    }
}

fn smol_ip(ip: IpAddr) -> IpAddress {
    match ip {
        IpAddr::V4(ip) => IpAddress::Ipv4(Ipv4Address::from_bytes(&ip.octets())),
        IpAddr::V6(ip) => IpAddress::Ipv6(Ipv6Address::from_bytes(&ip.octets())),
    }
}

/// TCP header fields the tests care about.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpOpts {
    pub seq: u32,
    pub fin: bool,
    pub psh: bool,
}

/// Wrap an L4 segment in IP and Ethernet headers.
pub fn ip_frame(addrs: &Addrs, proto: IpProtocol, l4: &[u8]) -> Vec<u8> {
    let (src, dst) = addrs.smol_ips();
    let (etype, l3) = match (src, dst) {
        (IpAddress::Ipv4(src_addr), IpAddress::Ipv4(dst_addr)) => {
            let ip = Ipv4Repr {
                src_addr,
                dst_addr,
                next_header: proto,
                payload_len: l4.len(),
                hop_limit: 64,
            };
            let mut bytes = vec![0u8; ip.buffer_len() + l4.len()];
            let mut pkt = Ipv4Packet::new_unchecked(&mut bytes);
            ip.emit(&mut pkt, &ChecksumCapabilities::default());
            bytes[ip.buffer_len()..].copy_from_slice(l4);
            (EthernetProtocol::Ipv4, bytes)
        }

        (IpAddress::Ipv6(src_addr), IpAddress::Ipv6(dst_addr)) => {
            let ip = Ipv6Repr {
                src_addr,
                dst_addr,
                next_header: proto,
                payload_len: l4.len(),
                hop_limit: 64,
            };
            let mut bytes = vec![0u8; ip.buffer_len() + l4.len()];
            let mut pkt = Ipv6Packet::new_unchecked(&mut bytes);
            ip.emit(&mut pkt);
            bytes[ip.buffer_len()..].copy_from_slice(l4);
            (EthernetProtocol::Ipv6, bytes)
        }

        _ => panic!("IP src and dst versions must match"),
    };

    eth_frame(addrs.src_mac, addrs.dst_mac, etype, &l3)
}

pub fn eth_frame(
    src: MacAddr,
    dst: MacAddr,
    ethertype: EthernetProtocol,
    payload: &[u8],
) -> Vec<u8> {
    let eth = EthernetRepr {
        src_addr: EthernetAddress(src.bytes()),
        dst_addr: EthernetAddress(dst.bytes()),
        ethertype,
    };
    let mut bytes = vec![0u8; eth.buffer_len() + payload.len()];
    let mut frame = EthernetFrame::new_unchecked(&mut bytes);
    eth.emit(&mut frame);
    frame.payload_mut().copy_from_slice(payload);
    bytes
}

pub fn udp_segment(
    addrs: &Addrs,
    sport: u16,
    dport: u16,
    payload: &[u8],
) -> Vec<u8> {
    let (src, dst) = addrs.smol_ips();
    let len = 8 + payload.len();
    let mut bytes = vec![0u8; len];
    let mut udp = UdpPacket::new_unchecked(&mut bytes);
    udp.set_src_port(sport);
    udp.set_dst_port(dport);
    udp.set_len(len as u16);
    udp.payload_mut().copy_from_slice(payload);
    udp.fill_checksum(&src, &dst);
    bytes
}

pub fn tcp_segment(
    addrs: &Addrs,
    sport: u16,
    dport: u16,
    opts: TcpOpts,
    payload: &[u8],
) -> Vec<u8> {
    let (src, dst) = addrs.smol_ips();
    let mut bytes = vec![0u8; 20 + payload.len()];
    let mut tcp = TcpPacket::new_unchecked(&mut bytes);
    tcp.set_src_port(sport);
    tcp.set_dst_port(dport);
    tcp.set_seq_number(TcpSeqNumber(opts.seq as i32));
    tcp.set_ack_number(TcpSeqNumber(0));
    tcp.set_header_len(20);
    tcp.clear_flags();
    tcp.set_ack(true);
    tcp.set_fin(opts.fin);
    tcp.set_psh(opts.psh);
    tcp.set_window_len(0xFFFF);
    tcp.set_urgent_at(0);
    tcp.payload_mut().copy_from_slice(payload);
    tcp.fill_checksum(&src, &dst);
    bytes
}

/// An Ethernet/IP/UDP frame.
pub fn udp_frame(addrs: &Addrs, sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    ip_frame(addrs, IpProtocol::Udp, &udp_segment(addrs, sport, dport, payload))
}

/// An Ethernet/IP/TCP frame.
pub fn tcp_frame(
    addrs: &Addrs,
    sport: u16,
    dport: u16,
    opts: TcpOpts,
    payload: &[u8],
) -> Vec<u8> {
    ip_frame(
        addrs,
        IpProtocol::Tcp,
        &tcp_segment(addrs, sport, dport, opts, payload),
    )
}

/// Insert an 802.1Q tag after the source MAC.
pub fn vlan_tag(frame: &[u8], tci: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() + 4);
    out.extend_from_slice(&frame[..12]);
    out.extend_from_slice(&0x8100u16.to_be_bytes());
    out.extend_from_slice(&tci.to_be_bytes());
    out.extend_from_slice(&frame[12..]);
    out
}

/// Encapsulate `inner` in VXLAN over UDP port `dport`.
pub fn vxlan_frame(outer: &Addrs, dport: u16, vni: u32, inner: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x08, 0, 0, 0];
    payload.extend_from_slice(&(vni << 8).to_be_bytes());
    payload.extend_from_slice(inner);
    udp_frame(outer, 49152, dport, &payload)
}

/// Encapsulate `inner` in NVGRE.
pub fn nvgre_frame(outer: &Addrs, vsid: u32, inner: &[u8]) -> Vec<u8> {
    let mut gre = Vec::with_capacity(8 + inner.len());
    gre.extend_from_slice(&0x2000u16.to_be_bytes());
    gre.extend_from_slice(&0x6558u16.to_be_bytes());
    gre.extend_from_slice(&(vsid << 8).to_be_bytes());
    gre.extend_from_slice(inner);
    ip_frame(outer, IpProtocol::Unknown(47), &gre)
}

/// A UDP frame padded out to exactly `len` bytes on the wire.
pub fn udp_frame_len(addrs: &Addrs, len: usize) -> Vec<u8> {
    let hdrs = match addrs.src_ip {
        IpAddr::V4(_) => 14 + 20 + 8,
        IpAddr::V6(_) => 14 + 40 + 8,
    };
    let payload = vec![0xA5; len.saturating_sub(hdrs)];
    udp_frame(addrs, 5000, 6000, &payload)
}

/// The IPv4 header checksum as it appears on the wire, for a frame
/// with an untagged outer Ethernet header at `off`.
pub fn ipv4_csum_at(frame: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([frame[off + 10], frame[off + 11]])
}

/// Does the IPv4 header at `off` carry a valid checksum?
pub fn ipv4_csum_valid(frame: &[u8], off: usize) -> bool {
    Ipv4Packet::new_checked(&frame[off..]).is_ok_and(|p| p.verify_checksum())
}

/// Does the TCP segment at `off` carry a valid checksum for `addrs`?
pub fn tcp_csum_valid(frame: &[u8], off: usize, addrs: &Addrs) -> bool {
    let (src, dst) = addrs.smol_ips();
    TcpPacket::new_checked(&frame[off..])
        .is_ok_and(|p| p.verify_checksum(&src, &dst))
}

/// Records every delivery attempt; fails the first `fail` of them.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    fail: std::sync::atomic::AtomicUsize,
    delivered: std::sync::Mutex<Vec<(Destination, Vec<u8>)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(fail: usize) -> Self {
        Self { fail: fail.into(), ..Default::default() }
    }

    pub fn delivered(&self) -> Vec<(Destination, Vec<u8>)> {
        self.delivered.lock().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    fn deliver(
        &self,
        frame: &Frame,
        dest: Destination,
    ) -> Result<(), DeliveryError> {
        use std::sync::atomic::Ordering;

        let left = self.fail.load(Ordering::SeqCst);
        if left > 0 {
            self.fail.store(left - 1, Ordering::SeqCst);
            return Err(DeliveryError { dest });
        }
        self.delivered.lock().unwrap().push((dest, frame.bytes().to_vec()));
        Ok(())
    }
}

/// An endpoint configuration with sensible test defaults.
pub fn endpoint_cfg(mac: MacAddr, offloads: Offloads) -> VnicCfg {
    VnicCfg { enable: true, mac, offloads, ..Default::default() }
}

/// A device with endpoint 0 configured as `cfg`, uplink port 0.
pub fn single_endpoint(cfg: VnicCfg) -> NicState {
    let mut st = NicState::new(256, 0);
    st.set_endpoint(0, cfg).unwrap();
    st
}
