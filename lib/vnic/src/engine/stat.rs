// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Counters.
//!
//! The pipeline only ever increments. Storage is behind the
//! [`StatSink`] trait; [`MemStats`] keeps everything in memory for the
//! CLI and tests.

use crate::ddi::sync::KMutex;
use core::fmt;
use core::fmt::Display;
use serde::Serialize;
use std::collections::BTreeMap;
use vnic_api::DropReason;
use vnic_api::EndpointId;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum CounterKind {
    Drop(DropReason),
    RxPkts,
    RxBytes,
    TxPkts,
    TxBytes,
    RxVlanStrip,
    TxVlanInsert,
    /// The switch selected another endpoint, which the wire path does
    /// not support.
    TxSwitchVportErr,
    TxSwitchDrop,
    RxDiscard,
    TxDiscard,
    RxNoMetaRoom,
    /// Frames handed to a host queue.
    RxRing,
    /// Frames taken from a host queue.
    TxRing,
}

impl Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Drop(reason) => write!(f, "drop_{reason}"),
            Self::RxPkts => write!(f, "rx_pkts"),
            Self::RxBytes => write!(f, "rx_bytes"),
            Self::TxPkts => write!(f, "tx_pkts"),
            Self::TxBytes => write!(f, "tx_bytes"),
            Self::RxVlanStrip => write!(f, "rx_vlan_strip"),
            Self::TxVlanInsert => write!(f, "tx_vlan_insert"),
            Self::TxSwitchVportErr => write!(f, "tx_sw_vport_err"),
            Self::TxSwitchDrop => write!(f, "tx_sw_drop"),
            Self::RxDiscard => write!(f, "rx_discard"),
            Self::TxDiscard => write!(f, "tx_discard"),
            Self::RxNoMetaRoom => write!(f, "rx_no_meta_room"),
            Self::RxRing => write!(f, "rx_ring"),
            Self::TxRing => write!(f, "tx_ring"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct CounterKey {
    pub kind: CounterKind,
    pub port: EndpointId,
    pub queue: u8,
}

impl CounterKey {
    pub fn new(kind: CounterKind, port: EndpointId, queue: u8) -> Self {
        Self { kind, port, queue }
    }
}

pub trait StatSink: Send + Sync {
    fn incr(&self, key: CounterKey, n: u64);
}

/// Counts nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullStats;

impl StatSink for NullStats {
    fn incr(&self, _key: CounterKey, _n: u64) {}
}

#[derive(Debug, Default)]
pub struct MemStats {
    counters: KMutex<BTreeMap<CounterKey, u64>>,
}

impl MemStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<CounterKey, u64> {
        self.counters.lock().clone()
    }

    /// The sum of `kind` over every port and queue.
    pub fn total(&self, kind: CounterKind) -> u64 {
        self.counters
            .lock()
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .map(|(_, v)| *v)
            .sum()
    }

    pub fn get(&self, key: &CounterKey) -> u64 {
        self.counters.lock().get(key).copied().unwrap_or(0)
    }
}

impl StatSink for MemStats {
    fn incr(&self, key: CounterKey, n: u64) {
        *self.counters.lock().entry(key).or_insert(0) += n;
    }
}
