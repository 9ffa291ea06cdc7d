// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The TX pipeline: host to wire.
//!
//! 1. admission: endpoint enabled, link up, length within MTU
//! 2. checksum policy: offloads requested by the host must be enabled
//! 3. parse, honouring the host's encapsulation flag
//! 4. segmentation offload fixups and checksum offload derivation
//! 5. VLAN insert if enabled
//! 6. switch decision on the innermost Ethernet addresses
//!
//! As on RX, header edits are written back whatever the outcome.

use super::Decision;
use super::Destination;
use super::Outcome;
use super::Transport;
use super::frame::Frame;
use super::frame::LsoReq;
use super::frame::TxCsum;
use super::headers::IPV6_HDR_LEN;
use super::headers::TCP_FLAG_FIN;
use super::headers::TCP_FLAG_PSH;
use super::headers::VLAN_HDR_LEN;
use super::nic::NicState;
use super::parse::HdrFlags;
use super::parse::L3Hdr;
use super::parse::L4Hdr;
use super::parse::Layer;
use super::parse::ParseOpts;
use super::parse::PktHdrs;
use super::rx::max_frame_len;
use super::stat::CounterKey;
use super::stat::CounterKind;
use super::stat::StatSink;
use super::switch;
use vnic_api::DropReason;
use vnic_api::Offloads;
use vnic_api::VnicError;
use zerocopy::byteorder::network_endian::U16;
use zerocopy::byteorder::network_endian::U32;

/// Run `frame` through the TX pipeline.
pub fn process(
    state: &NicState,
    link_up: bool,
    frame: &mut Frame,
    stats: &dyn StatSink,
) -> Outcome {
    let (ep, queue) = (frame.port, frame.queue);
    stats.incr(CounterKey::new(CounterKind::TxRing, ep, queue), 1);

    let mut hdrs = PktHdrs::default();
    let mut out = Outcome::new(Decision::Drop(DropReason::LinkDown));

    let res = stages(state, link_up, frame, &mut hdrs, &mut out, stats);
    hdrs.write_back(frame.buf_mut());

    match res {
        Ok(dest) => {
            out.decision = Decision::Forward(dest);
            stats.incr(CounterKey::new(CounterKind::TxPkts, ep, queue), 1);
            stats.incr(
                CounterKey::new(CounterKind::TxBytes, ep, queue),
                frame.len() as u64,
            );
        }

        Err(reason) => {
            out.decision = Decision::Drop(reason);
            stats.incr(CounterKey::new(CounterKind::Drop(reason), ep, queue), 1);
        }
    }

    out
}

fn stages(
    state: &NicState,
    link_up: bool,
    frame: &mut Frame,
    hdrs: &mut PktHdrs,
    out: &mut Outcome,
    stats: &dyn StatSink,
) -> Result<Destination, DropReason> {
    let (ep, queue) = (frame.port, frame.queue);
    let cfg = match state.endpoint(ep) {
        Some(cfg) if cfg.enable && link_up => cfg,
        _ => return Err(DropReason::LinkDown),
    };

    if frame.len() > max_frame_len(cfg, frame) {
        return Err(DropReason::Mtu);
    }

    // Segmentation offload needs the device to finish the checksums.
    let wants_csum = !frame.meta.tx_req.is_empty() || frame.meta.lso.is_some();
    if wants_csum && !cfg.offloads.contains(Offloads::TXCSUM) {
        return Err(DropReason::ChecksumPolicy);
    }

    let opts = ParseOpts {
        vxlan_ports: cfg.tunnel_ports(),
        nvgre: cfg.offloads.contains(Offloads::NVGRE),
        force_tunnel: frame.meta.encap,
    };
    *hdrs = PktHdrs::parse(frame.buf(), frame.start(), &opts);

    if let Some(lso) = frame.meta.lso {
        if cfg.offloads.contains(Offloads::LSO) {
            lso_fixup(hdrs, frame.start() + frame.len(), lso);
        }
    }

    let mut csum = frame.meta.tx_req;
    let dirty = hdrs.dirty();
    if dirty.contains(HdrFlags::O_IP4) {
        csum |= TxCsum::L3;
    }
    if dirty.intersects(HdrFlags::O_L4)
        && hdrs.o_l4.is_some_and(|l4| l4.csum() != [0, 0])
    {
        csum |= TxCsum::L4;
    }
    frame.meta.tx_csum = csum;

    if cfg.offloads.contains(Offloads::TXVLAN) && cfg.vlan != 0 {
        match hdrs.vlan_insert(cfg.vlan) {
            Ok(true) => {
                frame.push_front(VLAN_HDR_LEN).map_err(|_| DropReason::Mtu)?;
                stats.incr(CounterKey::new(CounterKind::TxVlanInsert, ep, queue), 1);
            }
            Ok(false) => {}
            // No room in front of the frame for the tag.
            Err(_) => return Err(DropReason::Mtu),
        }
    }

    let vlan = hdrs.o_vlan.map(|v| v.vid()).unwrap_or(0);
    let eth = match (hdrs.is_tunnel(), hdrs.i_eth, hdrs.o_eth) {
        (true, Some(inner), _) => inner,
        (_, _, Some(outer)) => outer,
        _ => return Err(DropReason::L2Filter),
    };

    let sw = switch::decide(
        ep,
        eth.src_mac(),
        eth.dst_mac(),
        vlan,
        &state.macs,
        &state.vlans,
    );
    out.switch = Some(sw);

    if sw.out_mask != 0 {
        stats.incr(CounterKey::new(CounterKind::TxSwitchVportErr, ep, queue), 1);
    }

    if !sw.uplink {
        stats.incr(CounterKey::new(CounterKind::TxSwitchDrop, ep, queue), 1);
        return Err(DropReason::SwitchUnreachable);
    }

    Ok(Destination::Wire { port: state.uplink_port })
}

fn fix_l3(l3: &mut L3Hdr, len: usize, ident_bump: u16) {
    match l3 {
        L3Hdr::Ip4(ip) => {
            ip.total_len = U16::new(len as u16);
            ip.ident = U16::new(ip.ident.get().wrapping_add(ident_bump));
            ip.update_csum();
        }

        L3Hdr::Ip6(ip) => {
            ip.payload_len = U16::new(len.saturating_sub(IPV6_HDR_LEN) as u16);
        }
    }
}

fn fix_tcp(l4: &mut L4Hdr, lso: LsoReq) {
    if let L4Hdr::Tcp(tcp) = l4 {
        let advance = u32::from(lso.mss) * u32::from(lso.seg_idx);
        tcp.seq = U32::new(tcp.seq.get().wrapping_add(advance));
        if !lso.last {
            tcp.flags &= !(TCP_FLAG_FIN | TCP_FLAG_PSH);
        }
    }
}

/// Make a host-cut segment look like segment `lso.seg_idx` of the
/// original send: lengths describe this segment, the sequence number
/// and IPv4 id advance, and only the last segment keeps FIN and PSH.
/// `end` is the buffer offset just past the frame.
pub fn lso_fixup(hdrs: &mut PktHdrs, end: usize, lso: LsoReq) {
    let inner = hdrs.is_tunnel() && hdrs.i_l4.is_some();
    let outer_l3 = hdrs.offset(Layer::OuterL3);
    let inner_l3 = hdrs.offset(Layer::InnerL3);
    let outer_l4 = hdrs.offset(Layer::OuterL4);

    if let (Some(off), Some(l3)) = (outer_l3, hdrs.o_l3.as_mut()) {
        fix_l3(l3, end - off, if inner { 0 } else { lso.seg_idx });
    }

    if inner {
        if let (Some(off), Some(l3)) = (inner_l3, hdrs.i_l3.as_mut()) {
            fix_l3(l3, end - off, lso.seg_idx);
        }
        if let (Some(off), Some(L4Hdr::Udp(udp))) = (outer_l4, hdrs.o_l4.as_mut())
        {
            udp.len = U16::new((end - off) as u16);
        }
        if let Some(l4) = hdrs.i_l4.as_mut() {
            fix_tcp(l4, lso);
        }
        hdrs.mark_dirty(
            HdrFlags::O_L3 | HdrFlags::O_L4 | HdrFlags::I_L3 | HdrFlags::I_L4,
        );
    } else {
        if let Some(l4) = hdrs.o_l4.as_mut() {
            fix_tcp(l4, lso);
        }
        hdrs.mark_dirty(HdrFlags::O_L3 | HdrFlags::O_L4);
    }
}

/// Hand a TX frame to its destination.
///
/// A failed delivery is counted as a discard and the frame is
/// redirected, once, to the drop sink. If that fails as well the
/// frame is lost and [`VnicError::TxRetryExhausted`] is returned.
pub fn deliver(
    transport: &dyn Transport,
    frame: &Frame,
    decision: Decision,
    stats: &dyn StatSink,
) -> Result<(), VnicError> {
    let dest = decision.destination();
    if transport.deliver(frame, dest).is_ok() {
        return Ok(());
    }

    stats.incr(CounterKey::new(CounterKind::TxDiscard, frame.port, frame.queue), 1);
    if dest == Destination::Drop {
        return Ok(());
    }

    transport
        .deliver(frame, Destination::Drop)
        .map_err(|_| VnicError::TxRetryExhausted)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::DeliveryError;
    use crate::engine::stat::MemStats;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use vnic_api::MacAddr;
    use vnic_api::VnicCfg;

    // Fails the first `fail` attempts.
    struct Flaky {
        fail: usize,
        attempts: AtomicUsize,
    }

    impl Transport for Flaky {
        fn deliver(
            &self,
            _frame: &Frame,
            dest: Destination,
        ) -> Result<(), DeliveryError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail { Err(DeliveryError { dest }) } else { Ok(()) }
        }
    }

    fn flaky(fail: usize) -> Flaky {
        Flaky { fail, attempts: AtomicUsize::new(0) }
    }

    const ME: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 0x01]);
    const PEER: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 0x02]);

    fn state(offloads: Offloads) -> NicState {
        let mut st = NicState::new(16, 7);
        let cfg = VnicCfg { enable: true, mac: ME, offloads, ..Default::default() };
        st.set_endpoint(0, cfg).unwrap();
        st
    }

    fn raw_frame(da: MacAddr, len: usize) -> Frame {
        let mut bytes = vec![0u8; len];
        bytes[..6].copy_from_slice(&da.bytes());
        bytes[6..12].copy_from_slice(&ME.bytes());
        bytes[12] = 0x88;
        bytes[13] = 0xB5;
        Frame::new(0, &bytes)
    }

    #[test]
    fn admission_and_switch() {
        let st = state(Offloads::empty());
        let stats = MemStats::new();

        let mut f = raw_frame(PEER, 1515);
        let out = process(&st, true, &mut f, &stats);
        assert_eq!(out.decision, Decision::Drop(DropReason::Mtu));
        assert_eq!(out.switch, None);

        let mut f = raw_frame(PEER, 60);
        f.meta.tx_req = TxCsum::L4;
        let out = process(&st, true, &mut f, &stats);
        assert_eq!(out.decision, Decision::Drop(DropReason::ChecksumPolicy));

        let mut f = raw_frame(PEER, 60);
        let out = process(&st, true, &mut f, &stats);
        assert_eq!(
            out.decision,
            Decision::Forward(Destination::Wire { port: 7 })
        );
        assert!(out.switch.is_some_and(|sw| sw.uplink && sw.out_mask == 0));

        // Hairpin to our own address.
        let mut f = raw_frame(ME, 60);
        let out = process(&st, true, &mut f, &stats);
        assert_eq!(out.decision, Decision::Drop(DropReason::SwitchUnreachable));

        assert_eq!(stats.total(CounterKind::TxRing), 4);
        assert_eq!(stats.total(CounterKind::TxPkts), 1);
        assert_eq!(stats.total(CounterKind::TxSwitchDrop), 1);
    }

    #[test]
    fn single_retry_to_drop() {
        let frame = Frame::new(3, &[0u8; 60]);
        let fwd = Decision::Forward(Destination::Wire { port: 0 });

        let stats = MemStats::new();
        let t = flaky(0);
        deliver(&t, &frame, fwd, &stats).unwrap();
        assert_eq!(t.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(stats.total(CounterKind::TxDiscard), 0);

        let t = flaky(1);
        deliver(&t, &frame, fwd, &stats).unwrap();
        assert_eq!(t.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(stats.total(CounterKind::TxDiscard), 1);

        let t = flaky(5);
        assert_eq!(
            deliver(&t, &frame, fwd, &stats),
            Err(VnicError::TxRetryExhausted)
        );
        // Exactly one retry, never more.
        assert_eq!(t.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(stats.total(CounterKind::TxDiscard), 2);
    }
}
