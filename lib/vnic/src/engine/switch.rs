// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The L2 switch decision for frames leaving an endpoint.

use super::cam::MacTable;
use super::vlan::VlanTable;
use vnic_api::EndpointId;
use vnic_api::MAX_ENDPOINTS;
use vnic_api::MacAddr;
use vnic_api::VlanId;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SwitchResult {
    /// Endpoints other than the source that should see the frame.
    pub out_mask: u64,
    /// The frame may leave through the uplink.
    pub uplink: bool,
}

impl SwitchResult {
    const DROP: Self = Self { out_mask: 0, uplink: false };
}

/// Decide where a frame from `src` addressed `sa` to `da` on `vlan`
/// may go.
///
/// - On a tagged VLAN the source must be a member; otherwise the
///   frame goes nowhere.
/// - Group addresses flood to the other members of the VLAN and the
///   uplink.
/// - A unicast address owned by another endpoint on the same VLAN
///   selects only that endpoint. One owned by the source itself goes
///   nowhere.
/// - Anything else is for the uplink.
pub fn decide(
    src: EndpointId,
    sa: MacAddr,
    da: MacAddr,
    vlan: VlanId,
    macs: &MacTable,
    vlans: &VlanTable,
) -> SwitchResult {
    let Ok(members) = vlans.load(vlan) else {
        return SwitchResult::DROP;
    };

    if vlan != 0 && !members.contains(src) {
        return SwitchResult::DROP;
    }

    // A group source address is never legitimate.
    if sa.is_multicast() {
        return SwitchResult::DROP;
    }

    let src_bit = if usize::from(src) < MAX_ENDPOINTS { 1u64 << src } else { 0 };

    if da.is_multicast() {
        return SwitchResult { out_mask: members.members & !src_bit, uplink: true };
    }

    match macs.lookup(da) {
        Some(owner) if owner == u32::from(src) => SwitchResult::DROP,

        Some(owner) => match EndpointId::try_from(owner) {
            Ok(ep)
                if usize::from(ep) < MAX_ENDPOINTS
                    && (vlan == 0 || members.contains(ep)) =>
            {
                SwitchResult { out_mask: 1u64 << ep, uplink: false }
            }
            _ => SwitchResult { out_mask: 0, uplink: true },
        },

        None => SwitchResult { out_mask: 0, uplink: true },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const A: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 0xA]);
    const B: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 0xB]);
    const C: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 0xC]);
    const REMOTE: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 0xF]);

    fn tables() -> (MacTable, VlanTable) {
        let src = |_: EndpointId| Some(2048u32);
        let mut macs = MacTable::default();
        macs.insert(A, 0).unwrap();
        macs.insert(B, 1).unwrap();
        macs.insert(C, 2).unwrap();
        let mut vlans = VlanTable::new();
        vlans.add_member(10, 0, &src).unwrap();
        vlans.add_member(10, 1, &src).unwrap();
        vlans.add_member(20, 2, &src).unwrap();
        (macs, vlans)
    }

    #[test]
    fn unknown_unicast_goes_up() {
        let (macs, vlans) = tables();
        let res = decide(0, A, REMOTE, 10, &macs, &vlans);
        assert_eq!(res, SwitchResult { out_mask: 0, uplink: true });
    }

    #[test]
    fn local_unicast_stays_local() {
        let (macs, vlans) = tables();
        let res = decide(0, A, B, 10, &macs, &vlans);
        assert_eq!(res, SwitchResult { out_mask: 1 << 1, uplink: false });

        // C is not on VLAN 10, so it is reached through the uplink.
        let res = decide(0, A, C, 10, &macs, &vlans);
        assert_eq!(res, SwitchResult { out_mask: 0, uplink: true });
    }

    #[test]
    fn broadcast_floods_vlan() {
        let (macs, vlans) = tables();
        let res = decide(0, A, MacAddr::BROADCAST, 10, &macs, &vlans);
        assert_eq!(res, SwitchResult { out_mask: 1 << 1, uplink: true });
    }

    #[test]
    fn non_member_and_hairpin_drop() {
        let (macs, vlans) = tables();
        assert_eq!(decide(2, C, REMOTE, 10, &macs, &vlans), SwitchResult::DROP);
        assert_eq!(decide(0, A, A, 10, &macs, &vlans), SwitchResult::DROP);
        assert_eq!(
            decide(0, MacAddr::BROADCAST, REMOTE, 10, &macs, &vlans),
            SwitchResult::DROP
        );
        assert_eq!(decide(0, A, REMOTE, 4096, &macs, &vlans), SwitchResult::DROP);
    }
}
