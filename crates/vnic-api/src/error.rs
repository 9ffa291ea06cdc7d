// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// Why the pipeline refused to forward a frame.
///
/// Drops are terminal for the frame and are only visible through the
/// per-reason counters.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum DropReason {
    /// The endpoint is disabled or the wire link is down.
    LinkDown,
    /// The frame exceeds the configured MTU or receive-buffer hint.
    Mtu,
    /// The destination address is not accepted by the L2 filter.
    L2Filter,
    /// The switch decision left no path to the uplink.
    SwitchUnreachable,
    /// A checksum offload was requested but is not enabled.
    ChecksumPolicy,
}

impl Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::LinkDown => "link_down",
            Self::Mtu => "mtu",
            Self::L2Filter => "l2_filter",
            Self::SwitchUnreachable => "switch_unreachable",
            Self::ChecksumPolicy => "csum_policy",
        };
        write!(f, "{s}")
    }
}

/// Errors returned to the configuration path.
///
/// None of these are fatal to the device: a failed operation leaves
/// the previously published configuration in place.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, thiserror::Error)]
pub enum VnicError {
    #[error("address table has no free slot (capacity {capacity})")]
    TableOverflow { capacity: u32 },

    #[error("VLAN id {0} is out of range")]
    InvalidVlan(u16),

    #[error("endpoint {0} is out of range or not configured")]
    InvalidEndpoint(u16),

    #[error("TX delivery failed and the drop redirect failed too")]
    TxRetryExhausted,

    #[error("frame headroom too small: needed {needed}, have {available}")]
    NoHeadroom { needed: usize, available: usize },

    #[error("bad configuration: {0}")]
    BadConfig(String),
}
