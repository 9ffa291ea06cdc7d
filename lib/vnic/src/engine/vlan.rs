// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! VLAN membership.
//!
//! For every VLAN id the table holds a bitmap of member endpoints and
//! the smallest receive buffer among them. Adding a member can only
//! lower that minimum, so it is updated in place. Removing one can
//! raise it, so the minimum is rebuilt from every remaining member.

use vnic_api::EndpointId;
use vnic_api::MAX_ENDPOINTS;
use vnic_api::MAX_VLAN_ID;
use vnic_api::VlanId;
use vnic_api::VnicError;

/// Where the table reads an endpoint's receive buffer size from.
pub trait RxBufSource {
    fn rx_buf_size(&self, ep: EndpointId) -> Option<u32>;
}

impl<F> RxBufSource for F
where
    F: Fn(EndpointId) -> Option<u32>,
{
    fn rx_buf_size(&self, ep: EndpointId) -> Option<u32> {
        self(ep)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct VlanMembers {
    pub members: u64,
    /// Smallest receive buffer of any member; `None` when no member
    /// constrains it.
    pub min_rx_buf: Option<u32>,
}

impl VlanMembers {
    pub fn contains(&self, ep: EndpointId) -> bool {
        usize::from(ep) < MAX_ENDPOINTS && self.members & (1 << ep) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.members == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = EndpointId> + '_ {
        (0..MAX_ENDPOINTS as EndpointId).filter(move |ep| self.contains(*ep))
    }
}

#[derive(Clone, Debug)]
pub struct VlanTable {
    entries: Vec<VlanMembers>,
}

impl Default for VlanTable {
    fn default() -> Self {
        Self::new()
    }
}

fn check_vlan(vlan: VlanId) -> Result<usize, VnicError> {
    if vlan > MAX_VLAN_ID {
        return Err(VnicError::InvalidVlan(vlan));
    }
    Ok(usize::from(vlan))
}

fn check_ep(ep: EndpointId) -> Result<(), VnicError> {
    if usize::from(ep) >= MAX_ENDPOINTS {
        return Err(VnicError::InvalidEndpoint(ep));
    }
    Ok(())
}

impl VlanTable {
    pub fn new() -> Self {
        Self {
            entries: vec![VlanMembers::default(); usize::from(MAX_VLAN_ID) + 1],
        }
    }

    pub fn load(&self, vlan: VlanId) -> Result<VlanMembers, VnicError> {
        Ok(self.entries[check_vlan(vlan)?])
    }

    pub fn add_member(
        &mut self,
        vlan: VlanId,
        ep: EndpointId,
        src: &impl RxBufSource,
    ) -> Result<(), VnicError> {
        let idx = check_vlan(vlan)?;
        check_ep(ep)?;
        let entry = &mut self.entries[idx];
        entry.members |= 1 << ep;
        entry.min_rx_buf = match (entry.min_rx_buf, src.rx_buf_size(ep)) {
            (Some(cur), Some(new)) => Some(cur.min(new)),
            (cur, new) => cur.or(new),
        };
        Ok(())
    }

    /// Remove `ep` from every VLAN it belongs to.
    pub fn remove_member(
        &mut self,
        ep: EndpointId,
        src: &impl RxBufSource,
    ) -> Result<(), VnicError> {
        check_ep(ep)?;
        let bit = 1u64 << ep;

        for entry in self.entries.iter_mut().filter(|e| e.members & bit != 0) {
            entry.members &= !bit;
            entry.min_rx_buf = entry
                .iter()
                .filter_map(|m| src.rx_buf_size(m))
                .min();
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    fn bufs(sizes: &[(EndpointId, u32)]) -> impl Fn(EndpointId) -> Option<u32> {
        let map: BTreeMap<EndpointId, u32> = sizes.iter().copied().collect();
        move |ep| map.get(&ep).copied()
    }

    #[test]
    fn add_then_load() {
        let src = bufs(&[(3, 2048)]);
        let mut t = VlanTable::new();
        t.add_member(10, 3, &src).unwrap();
        let m = t.load(10).unwrap();
        assert!(m.contains(3));
        assert_eq!(m.min_rx_buf, Some(2048));
        assert!(t.load(11).unwrap().is_empty());
        assert_eq!(m.iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn out_of_range() {
        let src = bufs(&[]);
        let mut t = VlanTable::new();
        assert_eq!(t.load(4096), Err(VnicError::InvalidVlan(4096)));
        assert_eq!(t.add_member(5000, 1, &src), Err(VnicError::InvalidVlan(5000)));
        assert_eq!(
            t.add_member(1, MAX_ENDPOINTS as EndpointId, &src),
            Err(VnicError::InvalidEndpoint(MAX_ENDPOINTS as EndpointId))
        );
        assert!(t.load(MAX_VLAN_ID).is_ok());
    }

    #[test]
    fn remove_clears_every_vlan() {
        let src = bufs(&[(1, 4096), (2, 1024)]);
        let mut t = VlanTable::new();
        for vlan in [1, 100, 4095] {
            t.add_member(vlan, 1, &src).unwrap();
        }
        t.add_member(100, 2, &src).unwrap();

        t.remove_member(1, &src).unwrap();
        for vlan in 0..=MAX_VLAN_ID {
            assert!(!t.load(vlan).unwrap().contains(1));
        }
        assert_eq!(t.load(1).unwrap().min_rx_buf, None);
        assert_eq!(t.load(100).unwrap().min_rx_buf, Some(1024));
    }

    #[test]
    fn removing_minimum_rescans() {
        let src = bufs(&[(0, 9216), (1, 1024), (2, 2048), (3, 4096)]);
        let mut t = VlanTable::new();
        for ep in 0..4 {
            t.add_member(7, ep, &src).unwrap();
        }
        assert_eq!(t.load(7).unwrap().min_rx_buf, Some(1024));

        // Drop the holder of the minimum: the second smallest takes over.
        t.remove_member(1, &src).unwrap();
        assert_eq!(t.load(7).unwrap().min_rx_buf, Some(2048));

        t.remove_member(2, &src).unwrap();
        assert_eq!(t.load(7).unwrap().min_rx_buf, Some(4096));

        t.add_member(7, 1, &src).unwrap();
        assert_eq!(t.load(7).unwrap().min_rx_buf, Some(1024));

        for ep in [0, 1, 3] {
            t.remove_member(ep, &src).unwrap();
        }
        assert_eq!(t.load(7).unwrap(), VlanMembers::default());
    }
}
