// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types shared between the vNIC engine and its consumers.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod cfg;
pub mod error;
pub mod mac;

pub use cfg::*;
pub use error::*;
pub use mac::*;

/// Identifies a host-facing virtual endpoint (PF or VF).
pub type EndpointId = u16;

/// An 802.1Q VLAN identifier. Zero means "untagged".
pub type VlanId = u16;

/// The largest VLAN id the membership table holds.
pub const MAX_VLAN_ID: VlanId = 4095;

/// The number of endpoints, one bit each in a VLAN's member bitmap.
pub const MAX_ENDPOINTS: usize = 64;

/// The IANA assigned VXLAN port.
pub const VXLAN_PORT: u16 = 4789;

/// The number of VXLAN destination ports an endpoint may enable.
pub const N_VXLAN_PORTS: usize = 4;

/// The direction a frame travels through the pipeline.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Direction {
    /// From the wire to a host queue.
    Rx = 1,
    /// From a host queue to the wire.
    Tx = 2,
}

impl core::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rx" | "in" => Ok(Direction::Rx),
            "tx" | "out" => Ok(Direction::Tx),
            _ => Err(format!("invalid direction: {s}")),
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dirstr = match self {
            Direction::Rx => "RX",
            Direction::Tx => "TX",
        };

        write!(f, "{dirstr}")
    }
}
