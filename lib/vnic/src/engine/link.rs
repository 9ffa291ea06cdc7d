// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Link state.
//!
//! The pipelines read [`LinkStatus`] on every frame. It is fed by a
//! [`LinkMonitor`] polling a [`LinkSource`], and only while some
//! endpoint is enabled.

use super::nic::NicState;
use crate::ExecCtx;
use crate::ddi::time::Duration;
use crate::ddi::time::Periodic;
use crate::dynamic::Dynamic;
use crate::provider::LogLevel;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

/// The current link state, shared between the monitor and workers.
#[derive(Debug, Default)]
pub struct LinkStatus(AtomicBool);

impl LinkStatus {
    pub fn new(up: bool) -> Self {
        Self(AtomicBool::new(up))
    }

    pub fn is_up(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Set the state, returning the previous one.
    pub fn set(&self, up: bool) -> bool {
        self.0.swap(up, Ordering::AcqRel)
    }
}

/// Reports whether the physical link is up.
pub trait LinkSource: Send {
    fn link_up(&mut self) -> bool;
}

impl<F: FnMut() -> bool + Send> LinkSource for F {
    fn link_up(&mut self) -> bool {
        self()
    }
}

pub struct LinkMonitor {
    ectx: Arc<ExecCtx>,
    status: Arc<LinkStatus>,
    source: Box<dyn LinkSource>,
    state: Dynamic<NicState>,
}

impl LinkMonitor {
    pub fn new(
        ectx: Arc<ExecCtx>,
        status: Arc<LinkStatus>,
        source: Box<dyn LinkSource>,
        state: Dynamic<NicState>,
    ) -> Self {
        Self { ectx, status, source, state }
    }

    /// Poll the source once. Returns the new state, or `None` if no
    /// endpoint is enabled and the source was left alone.
    pub fn poll_once(&mut self) -> Option<bool> {
        if !self.state.load().any_enabled() {
            return None;
        }

        let up = self.source.link_up();
        if self.status.set(up) != up {
            let s = if up { "up" } else { "down" };
            self.ectx.log.log(LogLevel::Note, &format!("link {s}"));
        }
        Some(up)
    }

    /// Poll every `interval` until `stop` is set.
    pub fn run(&mut self, interval: Duration, stop: &AtomicBool) {
        let mut tick = Periodic::new(interval);
        while !stop.load(Ordering::Acquire) {
            self.poll_once();
            tick.wait();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::provider::NullLog;
    use vnic_api::VnicCfg;

    #[test]
    fn polls_only_while_enabled() {
        let ectx = Arc::new(ExecCtx { log: Box::new(NullLog) });
        let status = Arc::new(LinkStatus::new(false));
        let state = Dynamic::from(NicState::new(16, 0));

        let mut polls = 0u32;
        let mut mon = LinkMonitor::new(
            ectx,
            Arc::clone(&status),
            Box::new(move || {
                polls += 1;
                polls % 2 == 1
            }),
            state.clone(),
        );

        assert_eq!(mon.poll_once(), None);
        assert!(!status.is_up());

        state
            .update(|st| st.set_endpoint(0, VnicCfg { enable: true, ..Default::default() }))
            .unwrap();
        assert_eq!(mon.poll_once(), Some(true));
        assert!(status.is_up());
        assert_eq!(mon.poll_once(), Some(false));
        assert!(!status.is_up());
    }
}
