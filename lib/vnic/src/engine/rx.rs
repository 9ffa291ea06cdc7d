// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The RX pipeline: wire to host.
//!
//! Frames arrive already steered to an endpoint by the wire port they
//! came in on. The stages run in order and any of them may drop:
//!
//! 1. admission: endpoint enabled, link up, length within MTU
//! 2. checksum verdicts from the wire MAC, if the host wants them
//! 3. parse, decapsulating on the endpoint's tunnel ports
//! 4. L2 filter on the outer addresses
//! 5. inner IPv4 checksum verification for tunnelled frames
//! 6. VLAN receive-buffer constraint, then strip if enabled
//! 7. RSS hash, metadata prepend and queue selection
//!
//! Whatever the outcome, the header edits made so far are written
//! back before the frame leaves.

use super::Decision;
use super::DeliveryError;
use super::Destination;
use super::Outcome;
use super::Transport;
use super::frame::Frame;
use super::frame::RxCsum;
use super::headers::ETHER_HDR_LEN;
use super::headers::ETHER_TYPE_VLAN;
use super::headers::EtherHdr;
use super::headers::VLAN_HDR_LEN;
use super::headers::read_hdr;
use super::nic::NicState;
use super::parse::L3Hdr;
use super::parse::ParseOpts;
use super::parse::PktHdrs;
use super::rss;
use super::rss::RssResult;
use super::stat::CounterKey;
use super::stat::CounterKind;
use super::stat::StatSink;
use vnic_api::DropReason;
use vnic_api::MacAddr;
use vnic_api::Offloads;
use vnic_api::VnicCfg;

/// The largest frame an endpoint accepts, counting the Ethernet
/// header and a tag if the frame carries one.
pub(crate) fn max_frame_len(cfg: &VnicCfg, frame: &Frame) -> usize {
    let tagged = read_hdr::<EtherHdr>(frame.buf(), frame.start())
        .is_some_and(|eth| eth.ether_type.get() == ETHER_TYPE_VLAN);
    usize::from(cfg.mtu) + ETHER_HDR_LEN + if tagged { VLAN_HDR_LEN } else { 0 }
}

/// Does the endpoint's L2 filter accept a frame from `sa` to `da`?
pub fn l2_accept(cfg: &VnicCfg, sa: MacAddr, da: MacAddr) -> bool {
    if sa.is_multicast() {
        return false;
    }

    if cfg.filter.promisc {
        return true;
    }

    if da.is_broadcast() {
        cfg.filter.broadcast
    } else if da.is_multicast() {
        cfg.filter.allmulti
    } else {
        da == cfg.mac
    }
}

/// Run `frame` through the RX pipeline.
pub fn process(
    state: &NicState,
    link_up: bool,
    frame: &mut Frame,
    stats: &dyn StatSink,
) -> Outcome {
    let mut hdrs = PktHdrs::default();
    let mut out = Outcome::new(Decision::Drop(DropReason::LinkDown));

    let res = stages(state, link_up, frame, &mut hdrs, &mut out, stats);
    hdrs.write_back(frame.buf_mut());

    let ep = frame.port;
    match res {
        Ok(dest) => {
            let queue = frame.meta.queue;
            out.decision = Decision::Forward(dest);
            stats.incr(CounterKey::new(CounterKind::RxPkts, ep, queue), 1);
            stats.incr(
                CounterKey::new(CounterKind::RxBytes, ep, queue),
                frame.len() as u64,
            );
            stats.incr(CounterKey::new(CounterKind::RxRing, ep, queue), 1);
        }

        Err(reason) => {
            out.decision = Decision::Drop(reason);
            stats.incr(
                CounterKey::new(CounterKind::Drop(reason), ep, frame.queue),
                1,
            );
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
    let ep = frame.port;
    let cfg = match state.endpoint(ep) {
        Some(cfg) if cfg.enable && link_up => cfg,
        _ => return Err(DropReason::LinkDown),
    };

    if frame.len() > max_frame_len(cfg, frame) {
        return Err(DropReason::Mtu);
    }

    let rxcsum = cfg.offloads.contains(Offloads::RXCSUM);
    if rxcsum {
        frame.meta.rx_csum = frame.meta.wire_csum & RxCsum::OUTER;
    }

    let opts = ParseOpts {
        vxlan_ports: cfg.tunnel_ports(),
        nvgre: cfg.offloads.contains(Offloads::NVGRE),
        force_tunnel: false,
    };
    *hdrs = PktHdrs::parse(frame.buf(), frame.start(), &opts);

    let Some(eth) = hdrs.o_eth else {
        return Err(DropReason::L2Filter);
    };
    if !l2_accept(cfg, eth.src_mac(), eth.dst_mac()) {
        return Err(DropReason::L2Filter);
    }

    if rxcsum && hdrs.is_tunnel() {
        if let Some(L3Hdr::Ip4(ip)) = hdrs.i_l3 {
            frame.meta.rx_csum |= if ip.csum_ok() {
                RxCsum::INNER_L3_OK
            } else {
                RxCsum::INNER_L3_BAD
            };
        }
    }

    if let Some(vlan) = hdrs.o_vlan {
        let members = state.vlans.load(vlan.vid()).unwrap_or_default();
        if let Some(min) = members.min_rx_buf {
            if frame.len() > min as usize {
                return Err(DropReason::Mtu);
            }
        }

        if cfg.offloads.contains(Offloads::RXVLAN) {
            if let Some(tci) = hdrs.vlan_strip() {
                frame.pull_front(VLAN_HDR_LEN);
                frame.meta.vlan_tci = Some(tci);
                stats.incr(
                    CounterKey::new(CounterKind::RxVlanStrip, ep, frame.queue),
                    1,
                );
            }
        }
    }

    let mut queue = 0;
    if cfg.offloads.contains(Offloads::RSS) {
        let res = rss::classify(hdrs, &cfg.rss);
        out.rss = Some(res);

        if let RssResult::Hash { hash, hash_type, queue: q } = res {
            queue = q;
            frame.meta.hash = Some(hash);
            if frame.prepend(&rss::meta_bytes(hash_type, hash)).is_err() {
                stats.incr(
                    CounterKey::new(CounterKind::RxNoMetaRoom, ep, frame.queue),
                    1,
                );
            }
        }
    }

    frame.meta.queue = queue;
    Ok(Destination::Host { ep, queue })
}

/// Hand an RX frame to its destination. A failed delivery is counted
/// as a discard and not retried.
pub fn deliver(
    transport: &dyn Transport,
    frame: &Frame,
    decision: Decision,
    stats: &dyn StatSink,
) -> Result<(), DeliveryError> {
    let res = transport.deliver(frame, decision.destination());
    if res.is_err() {
        stats.incr(
            CounterKey::new(CounterKind::RxDiscard, frame.port, frame.queue),
            1,
        );
    }
    res
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::stat::MemStats;
    use vnic_api::L2Filter;

    const ME: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 0x01]);
    const PEER: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 0x02]);

    fn state(offloads: Offloads) -> NicState {
        let mut st = NicState::new(16, 0);
        let cfg = VnicCfg { enable: true, mac: ME, offloads, ..Default::default() };
        st.set_endpoint(0, cfg).unwrap();
        st
    }

    // Ethernet followed by an EtherType nobody parses.
    fn raw_frame(da: MacAddr, len: usize) -> Frame {
        let mut bytes = vec![0u8; len];
        bytes[..6].copy_from_slice(&da.bytes());
        bytes[6..12].copy_from_slice(&PEER.bytes());
        bytes[12] = 0x88;
        bytes[13] = 0xB5;
        Frame::new(0, &bytes)
    }

    #[test]
    fn filter_rules() {
        let mut cfg = VnicCfg { mac: ME, ..Default::default() };
        let group = MacAddr::from_const([0x01, 0x00, 0x5E, 0, 0, 1]);

        assert!(l2_accept(&cfg, PEER, ME));
        assert!(!l2_accept(&cfg, PEER, PEER));
        assert!(l2_accept(&cfg, PEER, MacAddr::BROADCAST));
        assert!(!l2_accept(&cfg, PEER, group));
        assert!(!l2_accept(&cfg, group, ME));

        cfg.filter = L2Filter { promisc: false, allmulti: true, broadcast: false };
        assert!(l2_accept(&cfg, PEER, group));
        assert!(!l2_accept(&cfg, PEER, MacAddr::BROADCAST));

        cfg.filter.promisc = true;
        assert!(l2_accept(&cfg, PEER, PEER));
    }

    #[test]
    fn admission() {
        let st = state(Offloads::empty());
        let stats = MemStats::new();

        let mut f = raw_frame(ME, 60);
        let out = process(&st, false, &mut f, &stats);
        assert_eq!(out.decision, Decision::Drop(DropReason::LinkDown));

        let mut f = raw_frame(ME, 1515);
        let out = process(&st, true, &mut f, &stats);
        assert_eq!(out.decision, Decision::Drop(DropReason::Mtu));

        let mut f = raw_frame(ME, 1514);
        let out = process(&st, true, &mut f, &stats);
        assert_eq!(
            out.decision,
            Decision::Forward(Destination::Host { ep: 0, queue: 0 })
        );

        let mut f = raw_frame(PEER, 60);
        let out = process(&st, true, &mut f, &stats);
        assert_eq!(out.decision, Decision::Drop(DropReason::L2Filter));

        assert_eq!(stats.total(CounterKind::Drop(DropReason::LinkDown)), 1);
        assert_eq!(stats.total(CounterKind::Drop(DropReason::Mtu)), 1);
        assert_eq!(stats.total(CounterKind::RxPkts), 1);
        assert_eq!(stats.total(CounterKind::RxBytes), 1514);
    }

    #[test]
    fn rss_without_l3_uses_default_queue() {
        let st = state(Offloads::RSS);
        let mut f = raw_frame(ME, 60);
        let out = process(&st, true, &mut f, &MemStats::new());
        assert_eq!(out.rss, Some(RssResult::NoHash));
        assert_eq!(
            out.decision,
            Decision::Forward(Destination::Host { ep: 0, queue: 0 })
        );
        assert_eq!(f.len(), 60);
        assert_eq!(f.meta.hash, None);
    }
}
