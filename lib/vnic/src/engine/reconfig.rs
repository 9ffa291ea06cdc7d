// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Configuration synchronization.
//!
//! The [`Coordinator`] is the single writer of the device state. A
//! change is applied to a private copy and published as a new
//! [`Snapshot`]; the snapshot is then broadcast to every worker group
//! together with the generation of the [`SyncCounter`], which was
//! reset to the number of groups. Each group adopts the snapshot at
//! its next checkpoint between frames and acknowledges exactly once.
//! The coordinator blocks until the counter reaches zero: only then
//! is every worker known to be on the new configuration.
//!
//! Rounds never overlap: a change is applied, broadcast and waited on
//! under one lock, so groups adopt snapshots in epoch order.
//!
//! The wait has no timeout. A group that stops acknowledging stalls
//! the coordinator; a group whose channel is gone is acknowledged on
//! its behalf.

use super::nic::NicState;
use crate::ExecCtx;
use crate::ddi::sync::KCondvar;
use crate::ddi::sync::KMutex;
use crate::dynamic::Dynamic;
use crate::dynamic::Snapshot;
use crate::provider::LogLevel;
use crossbeam::channel::Sender;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use vnic_api::EndpointId;
use vnic_api::MacAddr;
use vnic_api::VlanId;
use vnic_api::VnicCfg;
use vnic_api::VnicError;

#[derive(Debug, Default)]
struct CounterState {
    remaining: u32,
    generation: u64,
    // The newest generation to reach zero.
    completed: u64,
}

/// A countdown barrier with a generation number.
///
/// Each [`SyncCounter::reset`] starts a new generation. Only
/// acknowledgements carrying the current generation count, and never
/// more than the number the counter was reset to. A generation that
/// is superseded before it completes is only released once a later
/// one does.
#[derive(Debug, Default)]
pub struct SyncCounter {
    state: KMutex<CounterState>,
    cv: KCondvar,
}

impl SyncCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation expecting `n` acknowledgements.
    pub fn reset(&self, n: u32) -> u64 {
        let mut st = self.state.lock();
        st.generation += 1;
        st.remaining = n;
        if n == 0 {
            st.completed = st.generation;
            self.cv.notify_all();
        }
        st.generation
    }

    /// Acknowledge `generation`. Returns `false` if the ack was stale
    /// or the barrier had already completed.
    pub fn ack(&self, generation: u64) -> bool {
        let mut st = self.state.lock();
        if st.generation != generation || st.remaining == 0 {
            return false;
        }

        st.remaining -= 1;
        if st.remaining == 0 {
            st.completed = st.generation;
            self.cv.notify_all();
        }
        true
    }

    pub fn remaining(&self) -> u32 {
        self.state.lock().remaining
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Block until `generation`, or a later one, completes.
    pub fn wait(&self, generation: u64) {
        let mut st = self.state.lock();
        while st.completed < generation {
            st = self.cv.wait(st);
        }
    }

    /// Like [`SyncCounter::wait`], giving up after `dur`. Returns
    /// `true` if the generation completed.
    pub fn wait_timeout(&self, generation: u64, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        let mut st = self.state.lock();
        loop {
            if st.completed >= generation {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            st = self.cv.wait_timeout(st, deadline - now).0;
        }
    }
}

/// A message from the coordinator to a worker group.
#[derive(Clone, Debug)]
pub enum Control {
    /// Adopt `snapshot`, then acknowledge `generation`.
    Update { generation: u64, snapshot: Snapshot<NicState> },
    Shutdown,
}

/// Where per-endpoint configuration comes from.
pub trait ConfigSource {
    /// The next endpoint whose configuration changed, if any.
    fn poll_change(&mut self) -> Option<EndpointId>;

    /// The endpoint's configuration as it stands now.
    fn read(&mut self, ep: EndpointId) -> Result<VnicCfg, VnicError>;

    /// Report the result of a change: the epoch now in effect on all
    /// workers, or why the change was rejected.
    fn complete(&mut self, ep: EndpointId, res: Result<u64, VnicError>);
}

/// A [`ConfigSource`] fed by hand, for the CLI and tests.
#[derive(Debug, Default)]
pub struct QueuedSource {
    pending: VecDeque<(EndpointId, VnicCfg)>,
    staged: BTreeMap<EndpointId, VnicCfg>,
    completed: Vec<(EndpointId, Result<u64, VnicError>)>,
}

impl QueuedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ep: EndpointId, cfg: VnicCfg) {
        self.pending.push_back((ep, cfg));
    }

    pub fn completed(&self) -> &[(EndpointId, Result<u64, VnicError>)] {
        &self.completed
    }
}

impl ConfigSource for QueuedSource {
    fn poll_change(&mut self) -> Option<EndpointId> {
        let (ep, cfg) = self.pending.pop_front()?;
        self.staged.insert(ep, cfg);
        Some(ep)
    }

    fn read(&mut self, ep: EndpointId) -> Result<VnicCfg, VnicError> {
        self.staged.get(&ep).cloned().ok_or_else(|| {
            VnicError::BadConfig(format!("no configuration for endpoint {ep}"))
        })
    }

    fn complete(&mut self, ep: EndpointId, res: Result<u64, VnicError>) {
        self.staged.remove(&ep);
        self.completed.push((ep, res));
    }
}

/// Turns wire receive on and off for an endpoint.
pub trait WireControl: Send + Sync {
    fn set_rx_enabled(&self, ep: EndpointId, enabled: bool);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullWire;

impl WireControl for NullWire {
    fn set_rx_enabled(&self, _ep: EndpointId, _enabled: bool) {}
}

pub struct Coordinator {
    ectx: Arc<ExecCtx>,
    // Held from state update until the barrier completes.
    round: KMutex<()>,
    state: Dynamic<NicState>,
    counter: Arc<SyncCounter>,
    groups: Vec<Sender<Control>>,
    wire: Box<dyn WireControl>,
}

impl Coordinator {
    pub fn new(
        ectx: Arc<ExecCtx>,
        state: Dynamic<NicState>,
        wire: Box<dyn WireControl>,
    ) -> Self {
        Self {
            ectx,
            round: KMutex::new(()),
            state,
            counter: Arc::new(SyncCounter::new()),
            groups: Vec::new(),
            wire,
        }
    }

    pub fn counter(&self) -> Arc<SyncCounter> {
        Arc::clone(&self.counter)
    }

    pub fn state(&self) -> &Dynamic<NicState> {
        &self.state
    }

    /// Register a worker group's control channel.
    pub fn attach(&mut self, group: Sender<Control>) {
        self.groups.push(group);
    }

    pub fn groups(&self) -> usize {
        self.groups.len()
    }

    // Reset the counter and hand `snap` to every group. Returns the
    // generation to wait on. Callers hold `round`.
    fn broadcast(&self, snap: &Snapshot<NicState>) -> u64 {
        let n = u32::try_from(self.groups.len()).unwrap_or(u32::MAX);
        let generation = self.counter.reset(n);

        for (i, group) in self.groups.iter().enumerate() {
            let msg = Control::Update { generation, snapshot: snap.clone() };
            if group.send(msg).is_err() {
                self.ectx.log.log(
                    LogLevel::Warn,
                    &format!("worker group {i} is gone, acking on its behalf"),
                );
                self.counter.ack(generation);
            }
        }

        generation
    }

    fn sync(&self, snap: &Snapshot<NicState>) -> u64 {
        let generation = self.broadcast(snap);
        self.counter.wait(generation);
        snap.epoch
    }

    // Apply `f` to a copy of the state, publish it, and wait for every
    // group to adopt it.
    fn apply<F, R>(&self, what: &str, f: F) -> Result<(R, u64), VnicError>
    where
        F: FnOnce(&mut NicState) -> Result<R, VnicError>,
    {
        let _round = self.round.lock();
        match self.state.update(f) {
            Ok((res, snap)) => Ok((res, self.sync(&snap))),
            Err(e) => {
                self.ectx.log.log(LogLevel::Error, &format!("{what}: {e}"));
                Err(e)
            }
        }
    }

    /// Install a new configuration for `ep` and wait until every
    /// worker group runs with it. Returns the epoch now in effect.
    pub fn reconfigure(
        &self,
        ep: EndpointId,
        cfg: VnicCfg,
    ) -> Result<u64, VnicError> {
        let enable = cfg.enable;
        let _round = self.round.lock();
        let (was_enabled, snap) = match self
            .state
            .update(|st| st.set_endpoint(ep, cfg))
        {
            Ok(res) => res,
            Err(e) => {
                self.ectx.log.log(
                    LogLevel::Error,
                    &format!("reconfigure endpoint {ep}: {e}"),
                );
                return Err(e);
            }
        };

        self.ectx.log.log(
            LogLevel::Note,
            &format!(
                "reconfigure endpoint {ep}: epoch {} to {} groups",
                snap.epoch,
                self.groups.len()
            ),
        );

        let generation = self.broadcast(&snap);

        if was_enabled != enable {
            self.wire.set_rx_enabled(ep, enable);
            let state = if enable { "enabled" } else { "disabled" };
            self.ectx.log.log(
                LogLevel::Note,
                &format!("endpoint {ep} {state}"),
            );
        }

        self.counter.wait(generation);
        self.ectx.log.log(
            LogLevel::Note,
            &format!("reconfigure endpoint {ep}: epoch {} complete", snap.epoch),
        );
        Ok(snap.epoch)
    }

    pub fn add_mac(&self, mac: MacAddr, ep: EndpointId) -> Result<u64, VnicError> {
        self.apply(&format!("add MAC {mac}"), |st| st.add_mac(mac, ep))
            .map(|((), epoch)| epoch)
    }

    /// Remove `mac`, returning the endpoint that owned it.
    pub fn remove_mac(
        &self,
        mac: MacAddr,
    ) -> Result<(Option<EndpointId>, u64), VnicError> {
        self.apply(&format!("remove MAC {mac}"), |st| Ok(st.remove_mac(mac)))
    }

    pub fn add_vlan_member(
        &self,
        vlan: VlanId,
        ep: EndpointId,
    ) -> Result<u64, VnicError> {
        self.apply(&format!("join VLAN {vlan}"), |st| st.add_vlan_member(vlan, ep))
            .map(|((), epoch)| epoch)
    }

    pub fn remove_vlan_member(&self, ep: EndpointId) -> Result<u64, VnicError> {
        self.apply(&format!("endpoint {ep} leave VLANs"), |st| {
            st.remove_vlan_member(ep)
        })
        .map(|((), epoch)| epoch)
    }

    /// Apply every pending change from `src`, reporting each result
    /// back only once the barrier has completed. Returns the number
    /// of changes handled.
    pub fn service(&self, src: &mut dyn ConfigSource) -> usize {
        let mut n = 0;
        while let Some(ep) = src.poll_change() {
            let res = src.read(ep).and_then(|cfg| self.reconfigure(ep, cfg));
            src.complete(ep, res);
            n += 1;
        }
        n
    }

    /// Tell every group to stop. Groups finish the frame in hand
    /// first.
    pub fn shutdown(&mut self) {
        for group in self.groups.drain(..) {
            let _ = group.send(Control::Shutdown);
        }
    }
}
