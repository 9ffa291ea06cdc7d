// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Worker groups.
//!
//! A group is one thread running frames to completion, one at a time,
//! against the snapshot it last adopted. Between frames it checks for
//! control messages: that checkpoint is the only place a new snapshot
//! is taken on and acknowledged, so a frame never sees two
//! configurations.

use super::Direction;
use super::Transport;
use super::frame::Frame;
use super::link::LinkStatus;
use super::nic::NicState;
use super::reconfig::Control;
use super::reconfig::SyncCounter;
use super::rx;
use super::stat::StatSink;
use super::tx;
use crate::ExecCtx;
use crate::dynamic::Snapshot;
use crate::provider::LogLevel;
use crossbeam::channel::Receiver;
use crossbeam::channel::Sender;
use crossbeam::channel::TryRecvError;
use crossbeam::channel::select;
use crossbeam::channel::unbounded;
use std::sync::Arc;
use std::thread::JoinHandle;

/// A frame queued for a group.
#[derive(Debug)]
pub struct Work {
    pub dir: Direction,
    pub frame: Frame,
}

/// What every group shares.
#[derive(Clone)]
pub struct WorkerCtx {
    pub ectx: Arc<ExecCtx>,
    pub link: Arc<LinkStatus>,
    pub stats: Arc<dyn StatSink>,
    pub transport: Arc<dyn Transport>,
    pub counter: Arc<SyncCounter>,
}

/// A group's totals, returned when it stops.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WorkerReport {
    pub id: usize,
    pub frames: u64,
    pub drops: u64,
    /// The epoch of the last snapshot adopted.
    pub epoch: u64,
}

pub struct WorkerGroup {
    id: usize,
    ctl: Sender<Control>,
    work: Sender<Work>,
    handle: JoinHandle<WorkerReport>,
}

impl WorkerGroup {
    /// Start group `id` running against `snap`.
    pub fn spawn(
        id: usize,
        ctx: WorkerCtx,
        snap: Snapshot<NicState>,
    ) -> std::io::Result<Self> {
        let (ctl, ctl_rx) = unbounded();
        let (work, work_rx) = unbounded();

        let handle = std::thread::Builder::new()
            .name(format!("vnic-worker-{id}"))
            .spawn(move || {
                let mut w = Worker {
                    ctx,
                    snap,
                    report: WorkerReport { id, ..Default::default() },
                };
                w.report.epoch = w.snap.epoch;
                w.run(ctl_rx, work_rx)
            })?;

        Ok(Self { id, ctl, work, handle })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// The channel the coordinator broadcasts on.
    pub fn control(&self) -> Sender<Control> {
        self.ctl.clone()
    }

    /// Queue a frame. Hands the work back if the group has stopped.
    pub fn submit(&self, work: Work) -> Result<(), Work> {
        self.work.send(work).map_err(|e| e.into_inner())
    }

    /// Stop the group once its queue has drained and collect its
    /// report.
    pub fn shutdown(self) -> Option<WorkerReport> {
        drop(self.work);
        let _ = self.ctl.send(Control::Shutdown);
        self.handle.join().ok()
    }
}

struct Worker {
    ctx: WorkerCtx,
    snap: Snapshot<NicState>,
    report: WorkerReport,
}

enum Step {
    Continue,
    Stop,
}

impl Worker {
    fn run(
        &mut self,
        ctl_rx: Receiver<Control>,
        work_rx: Receiver<Work>,
    ) -> WorkerReport {
        let log = &self.ctx.ectx.log;
        log.log(LogLevel::Note, &format!("worker {} start", self.report.id));

        let mut stopping = false;
        loop {
            if !stopping {
                match self.checkpoint(&ctl_rx) {
                    Step::Continue => {}
                    Step::Stop => stopping = true,
                }
            }

            // Once stopping, finish what is queued and leave. Updates
            // still arrive and are acknowledged.
            if stopping {
                self.drain_updates(&ctl_rx);
                match work_rx.try_recv() {
                    Ok(work) => {
                        self.handle(work);
                        continue;
                    }
                    Err(_) => break,
                }
            }

            select! {
                recv(ctl_rx) -> msg => match msg {
                    Ok(ctl) => {
                        if let Step::Stop = self.control(ctl) {
                            stopping = true;
                        }
                    }
                    Err(_) => stopping = true,
                },
                recv(work_rx) -> msg => match msg {
                    Ok(work) => self.handle(work),
                    Err(_) => stopping = true,
                },
            }
        }

        let log = &self.ctx.ectx.log;
        log.log(
            LogLevel::Note,
            &format!(
                "worker {} stop: {} frames, epoch {}",
                self.report.id, self.report.frames, self.report.epoch
            ),
        );
        self.report
    }

    // Apply every control message already waiting.
    fn checkpoint(&mut self, ctl_rx: &Receiver<Control>) -> Step {
        loop {
            match ctl_rx.try_recv() {
                Ok(ctl) => {
                    if let Step::Stop = self.control(ctl) {
                        return Step::Stop;
                    }
                }
                Err(TryRecvError::Empty) => return Step::Continue,
                Err(TryRecvError::Disconnected) => return Step::Stop,
            }
        }
    }

    fn drain_updates(&mut self, ctl_rx: &Receiver<Control>) {
        while let Ok(ctl) = ctl_rx.try_recv() {
            let _ = self.control(ctl);
        }
    }

    fn control(&mut self, ctl: Control) -> Step {
        match ctl {
            Control::Update { generation, snapshot } => {
                self.snap = snapshot;
                self.report.epoch = self.snap.epoch;
                self.ctx.counter.ack(generation);
                Step::Continue
            }

            Control::Shutdown => Step::Stop,
        }
    }

    fn handle(&mut self, work: Work) {
        let Work { dir, mut frame } = work;
        let ctx = &self.ctx;
        let link_up = ctx.link.is_up();

        let out = match dir {
            Direction::Rx => {
                rx::process(&self.snap, link_up, &mut frame, &*ctx.stats)
            }
            Direction::Tx => {
                tx::process(&self.snap, link_up, &mut frame, &*ctx.stats)
            }
        };

        self.report.frames += 1;
        if out.decision.is_drop() {
            self.report.drops += 1;
        }

        match dir {
            Direction::Rx => {
                // Counted by the pipeline.
                let _ = rx::deliver(
                    &*ctx.transport,
                    &frame,
                    out.decision,
                    &*ctx.stats,
                );
            }

            Direction::Tx => {
                if let Err(e) = tx::deliver(
                    &*ctx.transport,
                    &frame,
                    out.decision,
                    &*ctx.stats,
                ) {
                    ctx.ectx.log.log(
                        LogLevel::Error,
                        &format!("endpoint {} TX: {e}", frame.port),
                    );
                }
            }
        }
    }
}
