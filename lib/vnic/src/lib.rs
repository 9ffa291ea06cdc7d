// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The data plane and configuration synchronization core of a
//! virtual NIC.
//!
//! Frames move between a physical wire and a set of host-facing
//! endpoints. Every frame is handled to completion by a single worker;
//! the workers share a versioned configuration snapshot which the
//! reconfiguration coordinator replaces, broadcasts, and confirms via
//! a countdown barrier.

#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub use vnic_api as api;

pub mod ddi;
pub mod dynamic;
pub mod engine;
pub mod provider;

/// The execution context handed to the long running parts of the
/// device: the coordinator, the workers, and the link monitor.
pub struct ExecCtx {
    pub log: Box<dyn provider::LogProvider>,
}
