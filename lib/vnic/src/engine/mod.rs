// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The packet engine: parsing, tables, classification, the RX and TX
//! pipelines, and the workers and coordinator that run them.
pub mod cam;
pub mod checksum;
pub mod frame;
pub mod headers;
pub mod link;
pub mod nic;
pub mod parse;
pub mod print;
pub mod reconfig;
pub mod rss;
pub mod rx;
pub mod stat;
pub mod switch;
pub mod tx;
pub mod vlan;
pub mod worker;

use core::fmt;
use core::fmt::Display;
use frame::Frame;
use rss::RssResult;
use switch::SwitchResult;
pub use vnic_api::Direction;
use vnic_api::DropReason;
use vnic_api::EndpointId;

/// Where a processed frame goes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Destination {
    Host { ep: EndpointId, queue: u8 },
    Wire { port: u8 },
    Drop,
}

/// The pipeline's verdict on a frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
    Forward(Destination),
    Drop(DropReason),
}

impl Decision {
    pub fn destination(&self) -> Destination {
        match self {
            Self::Forward(dest) => *dest,
            Self::Drop(_) => Destination::Drop,
        }
    }

    pub fn is_drop(&self) -> bool {
        matches!(self, Self::Drop(_))
    }
}

/// The result of running a frame through a pipeline.
///
/// Besides the decision this records the classification stages the
/// frame actually reached: `switch` is `None` if the frame never got
/// to the switch decision, `rss` if it never got to the classifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Outcome {
    pub decision: Decision,
    pub switch: Option<SwitchResult>,
    pub rss: Option<RssResult>,
}

impl Outcome {
    fn new(decision: Decision) -> Self {
        Self { decision, switch: None, rss: None }
    }
}

/// A failed attempt to hand a frame on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeliveryError {
    pub dest: Destination,
}

impl Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to deliver frame to {:?}", self.dest)
    }
}

/// Moves finished frames to host queues, the wire, or the drop sink.
pub trait Transport: Send + Sync {
    fn deliver(&self, frame: &Frame, dest: Destination)
    -> Result<(), DeliveryError>;
}
