// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The device state shared by every worker.
//!
//! A [`NicState`] is only ever edited as a private copy inside
//! [`crate::dynamic::Dynamic::update`]; workers see it through an
//! immutable snapshot.

use super::cam::MacTable;
use super::vlan::VlanMembers;
use super::vlan::VlanTable;
use std::collections::BTreeMap;
use vnic_api::EndpointId;
use vnic_api::MAX_ENDPOINTS;
use vnic_api::MacAddr;
use vnic_api::VlanId;
use vnic_api::VnicCfg;
use vnic_api::VnicError;

#[derive(Clone, Debug, Default)]
pub struct NicState {
    pub endpoints: BTreeMap<EndpointId, VnicCfg>,
    pub macs: MacTable,
    pub vlans: VlanTable,
    /// The wire port TX traffic leaves through.
    pub uplink_port: u8,
}

fn rx_bufs(
    eps: &BTreeMap<EndpointId, VnicCfg>,
) -> impl Fn(EndpointId) -> Option<u32> + '_ {
    move |ep| eps.get(&ep).map(|cfg| cfg.rx_buf_size)
}

fn check_ep(ep: EndpointId) -> Result<(), VnicError> {
    if usize::from(ep) >= MAX_ENDPOINTS {
        return Err(VnicError::InvalidEndpoint(ep));
    }
    Ok(())
}

impl NicState {
    pub fn new(cam_buckets: usize, uplink_port: u8) -> Self {
        Self {
            endpoints: BTreeMap::new(),
            macs: MacTable::new(cam_buckets),
            vlans: VlanTable::new(),
            uplink_port,
        }
    }

    pub fn endpoint(&self, ep: EndpointId) -> Option<&VnicCfg> {
        self.endpoints.get(&ep)
    }

    pub fn any_enabled(&self) -> bool {
        self.endpoints.values().any(|cfg| cfg.enable)
    }

    /// Install `cfg` for `ep`, returning whether the endpoint was
    /// enabled before.
    ///
    /// An enabled endpoint owns its MAC in the address table and is a
    /// member of its VLAN; a disabled one has neither.
    pub fn set_endpoint(
        &mut self,
        ep: EndpointId,
        cfg: VnicCfg,
    ) -> Result<bool, VnicError> {
        check_ep(ep)?;
        cfg.validate()?;

        if cfg.enable {
            if let Some(owner) = self.macs.lookup(cfg.mac) {
                if owner != u32::from(ep) {
                    return Err(VnicError::BadConfig(format!(
                        "MAC {} already belongs to endpoint {owner}",
                        cfg.mac
                    )));
                }
            }
        }

        let was_enabled = self.endpoints.get(&ep).is_some_and(|c| c.enable);
        if was_enabled {
            self.detach(ep)?;
        }

        let enable = cfg.enable;
        let (mac, vlan) = (cfg.mac, cfg.vlan);
        self.endpoints.insert(ep, cfg);

        if enable {
            self.add_mac(mac, ep)?;
            self.add_vlan_member(vlan, ep)?;
        }

        Ok(was_enabled)
    }

    // Drop every address and VLAN membership owned by `ep`.
    fn detach(&mut self, ep: EndpointId) -> Result<(), VnicError> {
        self.macs.remove_value(u32::from(ep));
        self.remove_vlan_member(ep)
    }

    pub fn add_mac(
        &mut self,
        mac: MacAddr,
        ep: EndpointId,
    ) -> Result<(), VnicError> {
        check_ep(ep)?;
        self.macs.insert(mac, u32::from(ep))
    }

    pub fn remove_mac(&mut self, mac: MacAddr) -> Option<EndpointId> {
        self.macs.remove(mac).map(|v| v as EndpointId)
    }

    pub fn add_vlan_member(
        &mut self,
        vlan: VlanId,
        ep: EndpointId,
    ) -> Result<(), VnicError> {
        self.vlans.add_member(vlan, ep, &rx_bufs(&self.endpoints))
    }

    pub fn remove_vlan_member(&mut self, ep: EndpointId) -> Result<(), VnicError> {
        self.vlans.remove_member(ep, &rx_bufs(&self.endpoints))
    }

    pub fn vlan(&self, vlan: VlanId) -> Result<VlanMembers, VnicError> {
        self.vlans.load(vlan)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cfg(mac: u8, vlan: VlanId, rx_buf_size: u32) -> VnicCfg {
        VnicCfg {
            enable: true,
            mac: MacAddr::from([0x02, 0, 0, 0, 0, mac]),
            vlan,
            rx_buf_size,
            ..Default::default()
        }
    }

    #[test]
    fn enable_attaches_disable_detaches() {
        let mut st = NicState::new(16, 0);
        assert!(!st.set_endpoint(1, cfg(1, 10, 2048)).unwrap());
        assert!(!st.set_endpoint(2, cfg(2, 10, 1024)).unwrap());
        assert!(st.any_enabled());
        assert_eq!(st.macs.lookup(cfg(1, 0, 0).mac), Some(1));
        assert_eq!(st.vlan(10).unwrap().min_rx_buf, Some(1024));

        let off = VnicCfg { enable: false, ..cfg(2, 10, 1024) };
        assert!(st.set_endpoint(2, off).unwrap());
        assert_eq!(st.macs.lookup(cfg(2, 0, 0).mac), None);
        let m = st.vlan(10).unwrap();
        assert!(!m.contains(2));
        assert_eq!(m.min_rx_buf, Some(2048));
    }

    #[test]
    fn moving_vlan_leaves_old_one() {
        let mut st = NicState::new(16, 0);
        st.set_endpoint(1, cfg(1, 10, 2048)).unwrap();
        assert!(st.set_endpoint(1, cfg(1, 20, 2048)).unwrap());
        assert!(!st.vlan(10).unwrap().contains(1));
        assert!(st.vlan(20).unwrap().contains(1));
    }

    #[test]
    fn rejects_duplicate_mac_and_bad_endpoint() {
        let mut st = NicState::new(16, 0);
        st.set_endpoint(1, cfg(1, 0, 2048)).unwrap();
        assert!(matches!(
            st.set_endpoint(2, cfg(1, 0, 2048)),
            Err(VnicError::BadConfig(_))
        ));
        assert_eq!(
            st.set_endpoint(MAX_ENDPOINTS as EndpointId, cfg(9, 0, 2048)),
            Err(VnicError::InvalidEndpoint(MAX_ENDPOINTS as EndpointId))
        );
        assert_eq!(
            st.set_endpoint(3, cfg(3, 4096, 2048)),
            Err(VnicError::InvalidVlan(4096))
        );
    }
}
