// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Integration tests for configuration synchronization: the barrier
//! against simulated and real worker groups, and the side effects of
//! enabling and disabling endpoints.

use crossbeam::channel::Receiver;
use crossbeam::channel::unbounded;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use vnic::engine::link::LinkStatus;
use vnic::engine::reconfig::Control;
use vnic::engine::reconfig::Coordinator;
use vnic::engine::reconfig::NullWire;
use vnic::engine::reconfig::QueuedSource;
use vnic::engine::reconfig::SyncCounter;
use vnic::engine::reconfig::WireControl;
use vnic::engine::worker::Work;
use vnic::engine::worker::WorkerCtx;
use vnic::engine::worker::WorkerGroup;
use vnic_test_utils::*;

fn ectx() -> Arc<ExecCtx> {
    Arc::new(ExecCtx { log: Box::new(NullLog) })
}

#[derive(Default)]
struct WireLog(Arc<Mutex<Vec<(EndpointId, bool)>>>);

impl WireControl for WireLog {
    fn set_rx_enabled(&self, ep: EndpointId, enabled: bool) {
        self.0.lock().unwrap().push((ep, enabled));
    }
}

// A worker group that only ever answers control messages.
fn sim_group(
    rx: Receiver<Control>,
    counter: Arc<SyncCounter>,
) -> thread::JoinHandle<Vec<u64>> {
    thread::spawn(move || {
        let mut epochs = vec![];
        while let Ok(Control::Update { generation, snapshot }) = rx.recv() {
            epochs.push(snapshot.epoch);
            counter.ack(generation);
        }
        epochs
    })
}

#[test]
fn barrier_needs_exactly_n_acks() {
    const N: u32 = 4;
    let counter = Arc::new(SyncCounter::new());

    for acks in 0..N {
        let generation = counter.reset(N);
        for _ in 0..acks {
            assert!(counter.ack(generation));
        }
        assert!(!counter.wait_timeout(generation, Duration::from_millis(20)));
        assert_eq!(counter.remaining(), N - acks);
    }

    let generation = counter.reset(N);
    let workers: Vec<_> = (0..N)
        .map(|_| {
            let c = Arc::clone(&counter);
            thread::spawn(move || assert!(c.ack(generation)))
        })
        .collect();
    counter.wait(generation);
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(counter.remaining(), 0);
}

#[test]
fn late_ack_from_old_round_does_not_count() {
    let counter = SyncCounter::new();
    let first = counter.reset(2);
    assert!(counter.ack(first));

    // The coordinator moves on before the second group answers.
    let second = counter.reset(2);
    assert!(!counter.ack(first));
    assert_eq!(counter.remaining(), 2);
    assert!(!counter.wait_timeout(second, Duration::from_millis(10)));
    assert!(counter.ack(second));
    assert!(counter.ack(second));
    assert!(counter.wait_timeout(second, Duration::from_millis(10)));
}

#[test]
fn every_group_sees_every_epoch() {
    let state = Dynamic::from(NicState::new(64, 0));
    let mut coord = Coordinator::new(ectx(), state, Box::new(NullWire));

    let mut sims = vec![];
    for _ in 0..3 {
        let (tx, rx) = unbounded();
        coord.attach(tx);
        sims.push(sim_group(rx, coord.counter()));
    }

    let e1 = coord.reconfigure(0, endpoint_cfg(GUEST_MAC, Offloads::empty()));
    let e2 = coord.add_vlan_member(30, 0);
    let e3 = coord.add_mac(REMOTE_MAC, 0);
    assert_eq!((e1, e2, e3), (Ok(1), Ok(2), Ok(3)));

    coord.shutdown();
    for sim in sims {
        assert_eq!(sim.join().unwrap(), vec![1, 2, 3]);
    }
}

#[test]
fn concurrent_changes_reach_groups_in_epoch_order() {
    const CALLERS: u64 = 4;
    const CHANGES: u64 = 50;

    let state = Dynamic::from(NicState::new(1024, 0));
    let mut coord = Coordinator::new(ectx(), state, Box::new(NullWire));

    let mut sims = vec![];
    for _ in 0..3 {
        let (tx, rx) = unbounded();
        coord.attach(tx);
        sims.push(sim_group(rx, coord.counter()));
    }

    let coord = Arc::new(coord);
    let callers: Vec<_> = (0..CALLERS)
        .map(|t| {
            let coord = Arc::clone(&coord);
            thread::spawn(move || {
                let mut epochs = vec![];
                for i in 0..CHANGES {
                    let mac = MacAddr::from_u64(0x0200_0000_0000 | t << 16 | i);
                    epochs.push(coord.add_mac(mac, 0).unwrap());
                }
                epochs
            })
        })
        .collect();

    for c in callers {
        let epochs = c.join().unwrap();
        assert!(epochs.windows(2).all(|w| w[0] < w[1]));
    }

    let mut coord = Arc::into_inner(coord).unwrap();
    let total = CALLERS * CHANGES;
    assert_eq!(coord.state().epoch(), total);
    assert_eq!(coord.state().load().macs.len(), total as usize);

    // No group ever adopts an older snapshot after a newer one.
    coord.shutdown();
    for sim in sims {
        assert_eq!(sim.join().unwrap(), (1..=total).collect::<Vec<_>>());
    }
}

#[test]
fn rejected_change_is_not_broadcast() {
    let state = Dynamic::from(NicState::new(64, 0));
    let mut coord = Coordinator::new(ectx(), state, Box::new(NullWire));
    let (tx, rx) = unbounded();
    coord.attach(tx);

    assert_eq!(
        coord.add_vlan_member(4096, 0),
        Err(VnicError::InvalidVlan(4096))
    );
    assert!(rx.try_recv().is_err());
    assert_eq!(coord.state().epoch(), 0);
}

#[test]
fn enable_transitions_drive_wire_and_tables() {
    let wire = WireLog::default();
    let log = Arc::clone(&wire.0);
    let state = Dynamic::from(NicState::new(64, 0));
    let coord = Coordinator::new(ectx(), state, Box::new(wire));

    let mut cfg = endpoint_cfg(GUEST_MAC, Offloads::empty());
    cfg.vlan = 12;

    let mut src = QueuedSource::new();
    src.push(3, cfg.clone());
    // Same enable state: no wire toggle.
    src.push(3, VnicCfg { mtu: 9000, ..cfg.clone() });
    src.push(3, VnicCfg { enable: false, ..cfg });
    assert_eq!(coord.service(&mut src), 3);

    assert_eq!(
        src.completed().iter().map(|(_, r)| r.clone()).collect::<Vec<_>>(),
        vec![Ok(1), Ok(2), Ok(3)]
    );
    assert_eq!(*log.lock().unwrap(), vec![(3, true), (3, false)]);

    let st = coord.state().load();
    assert_eq!(st.macs.lookup(GUEST_MAC), None);
    assert!(!st.vlan(12).unwrap().contains(3));
    assert!(!st.any_enabled());
}

#[test]
fn workers_adopt_new_configuration() {
    let state = Dynamic::from(NicState::new(64, 0));
    let mut coord =
        Coordinator::new(ectx(), state.clone(), Box::new(NullWire));
    let transport = Arc::new(RecordingTransport::new());
    let stats = Arc::new(MemStats::new());

    let ctx = WorkerCtx {
        ectx: ectx(),
        link: Arc::new(LinkStatus::new(true)),
        stats: stats.clone(),
        transport: transport.clone(),
        counter: coord.counter(),
    };

    let groups: Vec<_> = (0..2)
        .map(|i| WorkerGroup::spawn(i, ctx.clone(), state.load()).unwrap())
        .collect();
    for g in &groups {
        coord.attach(g.control());
    }

    let bytes = udp_frame(&Addrs::inbound4(), 1, 2, b"first");

    // Nothing is enabled yet.
    groups[0]
        .submit(Work { dir: Direction::Rx, frame: Frame::new(0, &bytes) })
        .unwrap();
    while transport.delivered().is_empty() {
        thread::sleep(Duration::from_millis(1));
    }

    let epoch = coord
        .reconfigure(0, endpoint_cfg(GUEST_MAC, Offloads::empty()))
        .unwrap();

    // Every group is on the new epoch: frames after this point are
    // accepted whichever group takes them.
    for g in &groups {
        g.submit(Work { dir: Direction::Rx, frame: Frame::new(0, &bytes) })
            .unwrap();
    }

    coord.shutdown();
    let reports: Vec<_> =
        groups.into_iter().map(|g| g.shutdown().unwrap()).collect();

    assert!(reports.iter().all(|r| r.epoch == epoch));
    assert_eq!(reports.iter().map(|r| r.frames).sum::<u64>(), 3);
    assert_eq!(stats.total(CounterKind::Drop(DropReason::LinkDown)), 1);
    assert_eq!(stats.total(CounterKind::RxPkts), 2);

    let host = transport
        .delivered()
        .iter()
        .filter(|(d, _)| *d == Destination::Host { ep: 0, queue: 0 })
        .count();
    assert_eq!(host, 2);
}
