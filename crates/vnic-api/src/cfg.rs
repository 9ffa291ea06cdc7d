// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Per-endpoint configuration as delivered by the host.

use super::MAX_VLAN_ID;
use super::MacAddr;
use super::N_VXLAN_PORTS;
use super::VXLAN_PORT;
use super::VlanId;
use super::VnicError;
use bitflags::bitflags;
use serde::Deserialize;
use serde::Serialize;

pub const RSS_KEY_LEN: usize = 40;
pub const RSS_TABLE_LEN: usize = 128;

pub const MTU_MIN: u16 = 68;
pub const MTU_MAX: u16 = 9216;

/// The well known Toeplitz key used by most NIC drivers.
pub const RSS_DEFAULT_KEY: [u8; RSS_KEY_LEN] = [
    0x6d, 0x5a, 0x56, 0xda, 0x25, 0x5b, 0x0e, 0xc2, 0x41, 0x67, 0x25, 0x3d,
    0x43, 0xa3, 0x8f, 0xb0, 0xd0, 0xca, 0x2b, 0xcb, 0xae, 0x7b, 0x30, 0xb4,
    0x77, 0xcb, 0x2d, 0xa3, 0x80, 0x30, 0xf2, 0x0c, 0x6a, 0x42, 0xb7, 0x3b,
    0xbe, 0xac, 0x01, 0xfa,
];

bitflags! {
    /// Offloads the host enabled on an endpoint.
    #[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
    #[serde(transparent)]
    pub struct Offloads: u32 {
        const RXCSUM = 1 << 0;
        const TXCSUM = 1 << 1;
        /// Strip the outer VLAN tag on receive.
        const RXVLAN = 1 << 2;
        /// Insert the endpoint VLAN tag on transmit.
        const TXVLAN = 1 << 3;
        const LSO = 1 << 4;
        const RSS = 1 << 5;
        const VXLAN = 1 << 6;
        const NVGRE = 1 << 7;
    }
}

bitflags! {
    /// The traffic classes which feed the RSS hash.
    #[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
    #[serde(transparent)]
    pub struct RssHashTypes: u32 {
        const IPV4 = 1 << 0;
        const IPV6 = 1 << 1;
        const IPV4_TCP = 1 << 2;
        const IPV6_TCP = 1 << 3;
        const IPV4_UDP = 1 << 4;
        const IPV6_UDP = 1 << 5;
        /// Hash the inner headers of tunnelled frames.
        const INNER = 1 << 6;
    }
}

/// Which destination addresses the RX path accepts.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct L2Filter {
    pub promisc: bool,
    pub allmulti: bool,
    pub broadcast: bool,
}

impl Default for L2Filter {
    fn default() -> Self {
        Self { promisc: false, allmulti: false, broadcast: true }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct RssCfg {
    pub hash_types: RssHashTypes,
    pub key: Vec<u8>,
    /// Indirection table mapping the low hash bits to a queue.
    pub table: Vec<u8>,
}

impl RssCfg {
    /// A configuration spreading over `nqueues` queues.
    pub fn with_queues(nqueues: u8) -> Self {
        let n = nqueues.max(1);
        Self {
            table: (0..RSS_TABLE_LEN).map(|i| (i % usize::from(n)) as u8).collect(),
            ..Default::default()
        }
    }

    /// Map a hash to its queue through the indirection table.
    pub fn queue_for(&self, hash: u32) -> u8 {
        if self.table.is_empty() {
            return 0;
        }
        self.table[(hash as usize) & (self.table.len() - 1)]
    }
}

impl Default for RssCfg {
    fn default() -> Self {
        Self {
            hash_types: RssHashTypes::IPV4
                | RssHashTypes::IPV6
                | RssHashTypes::IPV4_TCP
                | RssHashTypes::IPV6_TCP,
            key: RSS_DEFAULT_KEY.to_vec(),
            table: vec![0; RSS_TABLE_LEN],
        }
    }
}

/// The configuration of a single endpoint.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct VnicCfg {
    pub enable: bool,
    pub mac: MacAddr,
    pub mtu: u16,
    pub filter: L2Filter,
    pub offloads: Offloads,
    /// Size of the host receive buffers, in bytes.
    pub rx_buf_size: u32,
    /// The VLAN this endpoint belongs to; zero for untagged.
    pub vlan: VlanId,
    pub rss: RssCfg,
    pub vxlan_ports: Vec<u16>,
}

impl Default for VnicCfg {
    fn default() -> Self {
        Self {
            enable: false,
            mac: MacAddr::ZERO,
            mtu: 1500,
            filter: L2Filter::default(),
            offloads: Offloads::RXCSUM | Offloads::TXCSUM | Offloads::RSS,
            rx_buf_size: 2048,
            vlan: 0,
            rss: RssCfg::default(),
            vxlan_ports: vec![VXLAN_PORT],
        }
    }
}

impl VnicCfg {
    pub fn validate(&self) -> Result<(), VnicError> {
        if self.vlan > MAX_VLAN_ID {
            return Err(VnicError::InvalidVlan(self.vlan));
        }

        if !(MTU_MIN..=MTU_MAX).contains(&self.mtu) {
            return Err(VnicError::BadConfig(format!(
                "MTU {} outside {MTU_MIN}..={MTU_MAX}",
                self.mtu
            )));
        }

        if self.vxlan_ports.len() > N_VXLAN_PORTS {
            return Err(VnicError::BadConfig(format!(
                "at most {N_VXLAN_PORTS} VXLAN ports, got {}",
                self.vxlan_ports.len()
            )));
        }

        if self.rss.key.len() != RSS_KEY_LEN {
            return Err(VnicError::BadConfig(format!(
                "RSS key must be {RSS_KEY_LEN} bytes, got {}",
                self.rss.key.len()
            )));
        }

        if !self.rss.table.len().is_power_of_two() {
            return Err(VnicError::BadConfig(format!(
                "RSS table length {} is not a power of two",
                self.rss.table.len()
            )));
        }

        Ok(())
    }

    /// The VXLAN ports the parser should decapsulate, if enabled.
    pub fn tunnel_ports(&self) -> &[u16] {
        if self.offloads.contains(Offloads::VXLAN) {
            &self.vxlan_ports
        } else {
            &[]
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_validates() {
        assert_eq!(VnicCfg::default().validate(), Ok(()));
    }

    #[test]
    fn reject_bad_values() {
        let cfg = VnicCfg { vlan: 4096, ..Default::default() };
        assert_eq!(cfg.validate(), Err(VnicError::InvalidVlan(4096)));

        let cfg = VnicCfg { mtu: 20, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(VnicError::BadConfig(_))));

        let cfg = VnicCfg { vxlan_ports: vec![1, 2, 3, 4, 5], ..Default::default() };
        assert!(matches!(cfg.validate(), Err(VnicError::BadConfig(_))));
    }

    #[test]
    fn rss_table_lookup() {
        let rss = RssCfg::with_queues(4);
        assert_eq!(rss.table.len(), RSS_TABLE_LEN);
        assert_eq!(rss.queue_for(0), 0);
        assert_eq!(rss.queue_for(5), 1);
        // Only the low bits index the table.
        assert_eq!(rss.queue_for(RSS_TABLE_LEN as u32 + 3), 3);
    }

    #[test]
    fn toml_roundtrip() {
        let text = r#"
            enable = true
            mac = "02:08:20:AA:BB:01"
            mtu = 9000
            vlan = 10
            offloads = "RXCSUM | RXVLAN"

            [filter]
            allmulti = true
        "#;
        let cfg: VnicCfg = toml::from_str(text).unwrap();
        assert!(cfg.enable);
        assert_eq!(cfg.mac, MacAddr::from([0x02, 0x08, 0x20, 0xAA, 0xBB, 0x01]));
        assert_eq!(cfg.mtu, 9000);
        assert_eq!(cfg.vlan, 10);
        assert_eq!(cfg.offloads, Offloads::RXCSUM | Offloads::RXVLAN);
        assert!(cfg.filter.allmulti);
        assert!(cfg.filter.broadcast);
        assert_eq!(cfg.vxlan_ports, vec![VXLAN_PORT]);

        let json = serde_json::to_string(&cfg).unwrap();
        let back: VnicCfg = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
